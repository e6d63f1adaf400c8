use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{string_enum, text, DomainResult, Entity, NotificationId, UserId};

string_enum! {
    pub enum NotificationType : "notification type" {
        FuelPurchase => "fuel_purchase",
        BalanceRecharge => "balance_recharge",
        Withdrawal => "withdrawal",
        UserInvitation => "user_invitation",
        SystemAlert => "system_alert",
        LowBalance => "low_balance",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub content: String,
    pub related_entity_id: Option<i64>,
    pub related_entity_type: Option<String>,
    pub read: bool,
    pub email_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Notification {
    type Id = NotificationId;

    fn id(&self) -> NotificationId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub kind: NotificationType,
    pub title: String,
    pub content: String,
    pub related_entity_id: Option<i64>,
    pub related_entity_type: Option<String>,
}

impl NewNotification {
    pub fn new(user_id: UserId, kind: NotificationType, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            content: content.into(),
            related_entity_id: None,
            related_entity_type: None,
        }
    }

    pub fn related(mut self, entity_type: &str, entity_id: i64) -> Self {
        self.related_entity_type = Some(entity_type.to_string());
        self.related_entity_id = Some(entity_id);
        self
    }

    pub fn validate(self) -> DomainResult<Self> {
        Ok(Self {
            title: text::required("title", &self.title, 255)?,
            content: text::required("content", &self.content, 10_000)?,
            related_entity_type: text::optional("relatedEntityType", self.related_entity_type, 50)?,
            ..self
        })
    }

    pub fn into_notification(self, id: NotificationId, now: DateTime<Utc>) -> Notification {
        Notification {
            id,
            user_id: self.user_id,
            kind: self.kind,
            title: self.title,
            content: self.content,
            related_entity_id: self.related_entity_id,
            related_entity_type: self.related_entity_type,
            read: false,
            email_sent: false,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_unread_notification() {
        let n = NewNotification::new(UserId::new(2), NotificationType::LowBalance, "Saldo baixo", "Restam 10.00")
            .related("vehicle", 7)
            .validate()
            .unwrap()
            .into_notification(NotificationId::new(1), Utc::now());
        assert!(!n.read);
        assert_eq!(n.related_entity_type.as_deref(), Some("vehicle"));

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "low_balance");
        assert_eq!(json["relatedEntityId"], 7);
    }

    #[test]
    fn title_is_required() {
        let res = NewNotification::new(UserId::new(2), NotificationType::SystemAlert, " ", "x").validate();
        assert!(res.is_err());
    }
}
