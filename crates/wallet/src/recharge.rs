//! Top-ups of a fleet or family profile balance.
//!
//! A recharge is filed as `pending` and only credits the profile once an
//! administrator confirms that the payment arrived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use iapos_core::{string_enum, text, DomainError, DomainResult, Entity, Money, ProfileId, RechargeId};

string_enum! {
    pub enum PaymentMethod : "payment method" {
        Pix => "pix",
        CreditCard => "credit_card",
        DebitCard => "debit_card",
        Transfer => "transfer",
    }
}

string_enum! {
    pub enum PaymentStatus : "payment status" {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
    }
}

/// `RCG-` followed by 12 uppercase hex digits.
pub fn generate_reference_code() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("RCG-{}", &hex[..12])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRecharge {
    pub id: RechargeId,
    pub profile_id: ProfileId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Payment provider reference, filled on confirmation.
    pub transaction_id: Option<String>,
    pub reference_code: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Entity for BalanceRecharge {
    type Id = RechargeId;

    fn id(&self) -> RechargeId {
        self.id
    }
}

impl BalanceRecharge {
    fn require_pending(&self) -> DomainResult<()> {
        if self.payment_status != PaymentStatus::Pending {
            return Err(DomainError::invariant(format!(
                "recharge {} is already {}",
                self.reference_code, self.payment_status
            )));
        }
        Ok(())
    }

    /// Returns the amount to credit to the profile.
    pub fn confirm(&mut self, transaction_id: Option<String>, now: DateTime<Utc>) -> DomainResult<Money> {
        self.require_pending()?;
        self.transaction_id = text::optional("transactionId", transaction_id, 100)?;
        self.payment_status = PaymentStatus::Completed;
        self.completed_at = Some(now);
        Ok(self.amount)
    }

    pub fn fail(&mut self) -> DomainResult<()> {
        self.require_pending()?;
        self.payment_status = PaymentStatus::Failed;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecharge {
    pub profile_id: ProfileId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

impl NewRecharge {
    pub fn validate(self) -> DomainResult<Self> {
        if !self.amount.is_positive() {
            return Err(DomainError::validation("amount must be greater than zero"));
        }
        Ok(Self {
            notes: text::optional("notes", self.notes, 2000)?,
            ..self
        })
    }

    pub fn into_recharge(self, id: RechargeId, reference_code: String, now: DateTime<Utc>) -> BalanceRecharge {
        BalanceRecharge {
            id,
            profile_id: self.profile_id,
            amount: self.amount,
            payment_method: self.payment_method,
            payment_status: PaymentStatus::Pending,
            transaction_id: None,
            reference_code,
            notes: self.notes,
            created_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(amount: i64) -> BalanceRecharge {
        NewRecharge {
            profile_id: ProfileId::new(1),
            amount: Money::from_reais(amount),
            payment_method: PaymentMethod::Pix,
            notes: Some(" ".into()),
        }
        .validate()
        .unwrap()
        .into_recharge(RechargeId::new(1), generate_reference_code(), Utc::now())
    }

    #[test]
    fn reference_codes_have_fixed_shape() {
        let code = generate_reference_code();
        assert_eq!(code.len(), 16);
        assert!(code.starts_with("RCG-"));
        assert!(code[4..].bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b)));
    }

    #[test]
    fn amount_must_be_positive() {
        let res = NewRecharge {
            profile_id: ProfileId::new(1),
            amount: Money::ZERO,
            payment_method: PaymentMethod::Transfer,
            notes: None,
        }
        .validate();
        assert!(res.is_err());
    }

    #[test]
    fn confirm_once() {
        let mut r = pending(200);
        assert!(r.notes.is_none());
        let now = Utc::now();
        assert_eq!(r.confirm(Some("E2E-123".into()), now).unwrap(), Money::from_reais(200));
        assert_eq!(r.payment_status, PaymentStatus::Completed);
        assert_eq!(r.completed_at, Some(now));
        assert!(r.confirm(None, now).is_err());
        assert!(r.fail().is_err());
    }

    #[test]
    fn failed_recharge_cannot_be_confirmed() {
        let mut r = pending(10);
        r.fail().unwrap();
        assert!(r.confirm(None, Utc::now()).is_err());
    }
}
