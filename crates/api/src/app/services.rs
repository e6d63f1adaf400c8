use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use iapos_auth::{Hs256SessionCodec, SessionCodec, User};
use iapos_core::{DependentId, GasStationId, ProfileId, UserId, VehicleId};
use iapos_family::Dependent;
use iapos_fleet::Vehicle;
use iapos_infra::{AppConfig, InMemoryStore, Store};
use iapos_notifications::{NewNotification, Notification};
use iapos_profiles::Profile;
use iapos_stations::GasStation;

use crate::app::errors::{RpcError, RpcResult};

/// Capacity of the live notification channel; slow subscribers drop events.
const REALTIME_CAPACITY: usize = 256;

/// Everything a handler needs: storage, session codec, settings and the
/// live notification channel.
pub struct AppServices {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<dyn SessionCodec>,
    pub config: AppConfig,
    realtime_tx: broadcast::Sender<Notification>,
}

impl AppServices {
    pub fn new(store: Arc<dyn Store>, config: AppConfig) -> Self {
        let sessions = Arc::new(Hs256SessionCodec::new(config.jwt_secret.as_bytes(), config.session_ttl));
        let (realtime_tx, _) = broadcast::channel(REALTIME_CAPACITY);
        Self {
            store,
            sessions,
            config,
            realtime_tx,
        }
    }

    /// In-memory services (dev mode and tests).
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), config)
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Loaders: NOT_FOUND when the row is missing
    // ─────────────────────────────────────────────────────────────────────

    pub async fn user(&self, id: UserId) -> RpcResult<User> {
        self.store.user_by_id(id).await?.ok_or_else(|| RpcError::not_found("User"))
    }

    pub async fn profile(&self, id: ProfileId) -> RpcResult<Profile> {
        self.store
            .profile_by_id(id)
            .await?
            .ok_or_else(|| RpcError::not_found("Profile"))
    }

    pub async fn station(&self, id: GasStationId) -> RpcResult<GasStation> {
        self.store
            .station_by_id(id)
            .await?
            .ok_or_else(|| RpcError::not_found("Gas station"))
    }

    pub async fn vehicle(&self, id: VehicleId) -> RpcResult<Vehicle> {
        self.store
            .vehicle_by_id(id)
            .await?
            .ok_or_else(|| RpcError::not_found("Vehicle"))
    }

    pub async fn dependent(&self, id: DependentId) -> RpcResult<Dependent> {
        self.store
            .dependent_by_id(id)
            .await?
            .ok_or_else(|| RpcError::not_found("Dependent"))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────

    /// Stores and broadcasts a notification. Failures are logged, never
    /// surfaced: the action that triggered the notification already happened.
    pub async fn notify(&self, notification: NewNotification) {
        let user_id = notification.user_id;
        match self.store.create_notification(notification, self.now()).await {
            Ok(created) => {
                // Lossy: no subscribers is fine.
                let _ = self.realtime_tx.send(created);
            }
            Err(e) => tracing::error!(%user_id, error = %e, "failed to store notification"),
        }
    }

    /// Notifies the owner of `profile_id`, if the profile still exists.
    pub async fn notify_profile_owner(
        &self,
        profile_id: ProfileId,
        build: impl FnOnce(UserId) -> NewNotification,
    ) {
        match self.store.profile_by_id(profile_id).await {
            Ok(Some(profile)) => self.notify(build(profile.user_id)).await,
            Ok(None) => tracing::warn!(%profile_id, "notification target profile is gone"),
            Err(e) => tracing::error!(%profile_id, error = %e, "failed to load notification target"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.realtime_tx.subscribe()
    }
}

/// Server-sent events carrying `user_id`'s new notifications.
pub fn notification_sse_stream(
    services: Arc<AppServices>,
    user_id: UserId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(n) if n.user_id == user_id => {
            let data = serde_json::to_string(&n).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(n.kind.as_str()).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
