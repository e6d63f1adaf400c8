//! Back-office money operations.
//!
//! Payment confirmation and payouts happen outside the platform; an operator
//! records the outcome here. Every procedure requires an admin caller.

use std::sync::Arc;

use axum::{extract::Extension, routing::post, Router};
use serde::{Deserialize, Serialize};

use iapos_auth::require_admin;
use iapos_core::{Money, TransactionId, WithdrawalId};
use iapos_notifications::{NewNotification, NotificationType};
use iapos_stations::{Withdrawal, WithdrawalStatus};
use iapos_wallet::{BalanceRecharge, FuelTransaction};

use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/admin.confirmRecharge", post(confirm_recharge))
        .route("/admin.failRecharge", post(fail_recharge))
        .route("/admin.processWithdrawal", post(process_withdrawal))
        .route("/admin.refundTransaction", post(refund_transaction))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRechargeInput {
    pub reference_code: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceInput {
    pub reference_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessWithdrawalInput {
    pub withdrawal_id: WithdrawalId,
    pub status: WithdrawalStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundInput {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundView {
    pub transaction: FuelTransaction,
    pub holder_balance: Money,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn confirm_recharge(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(admin): CurrentUser,
    RpcInput(input): RpcInput<ConfirmRechargeInput>,
) -> RpcResponse<BalanceRecharge> {
    require_admin(&admin)?;
    let recharge = services
        .store
        .confirm_recharge(&input.reference_code, input.transaction_id, services.now())
        .await?;
    tracing::info!(reference = %recharge.reference_code, profile_id = %recharge.profile_id, amount = %recharge.amount, by = %admin.id, "recharge confirmed");

    let (id, amount, reference) = (recharge.id, recharge.amount, recharge.reference_code.clone());
    services
        .notify_profile_owner(recharge.profile_id, |owner| {
            NewNotification::new(
                owner,
                NotificationType::BalanceRecharge,
                "Balance recharged",
                format!("R$ {amount} was added to your balance ({reference})"),
            )
            .related("recharge", id.get())
        })
        .await;
    ok(recharge)
}

pub async fn fail_recharge(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(admin): CurrentUser,
    RpcInput(input): RpcInput<ReferenceInput>,
) -> RpcResponse<BalanceRecharge> {
    require_admin(&admin)?;
    let recharge = services.store.fail_recharge(&input.reference_code).await?;
    tracing::info!(reference = %recharge.reference_code, by = %admin.id, "recharge marked failed");
    ok(recharge)
}

pub async fn process_withdrawal(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(admin): CurrentUser,
    RpcInput(input): RpcInput<ProcessWithdrawalInput>,
) -> RpcResponse<Withdrawal> {
    require_admin(&admin)?;
    let withdrawal = services
        .store
        .transition_withdrawal(input.withdrawal_id, input.status, services.now())
        .await?;
    tracing::info!(withdrawal_id = %withdrawal.id, status = %withdrawal.status, by = %admin.id, "withdrawal processed");

    let (id, amount, status) = (withdrawal.id, withdrawal.amount, withdrawal.status);
    let content = match status {
        WithdrawalStatus::Failed => format!("Withdrawal of R$ {amount} failed and was returned to your balance"),
        _ => format!("Withdrawal of R$ {amount} is now {status}"),
    };
    services
        .notify_profile_owner(withdrawal.network_id, |owner| {
            NewNotification::new(owner, NotificationType::Withdrawal, "Withdrawal update", content)
                .related("withdrawal", id.get())
        })
        .await;
    ok(withdrawal)
}

pub async fn refund_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(admin): CurrentUser,
    RpcInput(input): RpcInput<RefundInput>,
) -> RpcResponse<RefundView> {
    require_admin(&admin)?;
    let refund = services
        .store
        .refund_transaction(input.transaction_id, services.now())
        .await?;
    tracing::info!(transaction_id = %refund.transaction.id, amount = %refund.transaction.amount_debited, by = %admin.id, "transaction refunded");
    ok(RefundView {
        transaction: refund.transaction,
        holder_balance: refund.holder_balance,
    })
}
