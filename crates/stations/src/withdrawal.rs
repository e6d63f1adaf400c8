//! Network cash-out requests.
//!
//! The amount leaves the network balance when the request is filed. A failed
//! withdrawal gives it back; a completed one is final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{string_enum, text, DomainError, DomainResult, Entity, Money, ProfileId, WithdrawalId};

string_enum! {
    pub enum WithdrawalStatus : "withdrawal status" {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

impl WithdrawalStatus {
    pub fn can_transition_to(self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Pending, Failed) | (Processing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }
}

string_enum! {
    pub enum BankAccountType : "bank account type" {
        Checking => "checking",
        Savings => "savings",
        Payment => "payment",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub account_holder: String,
    pub bank_code: String,
    pub account_number: String,
    pub account_type: BankAccountType,
}

impl BankAccount {
    pub fn validate(self) -> DomainResult<Self> {
        let bank_code = text::required("bankCode", &self.bank_code, 10)?;
        if !bank_code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation("bankCode must contain only digits"));
        }
        let account_number = text::required("accountNumber", &self.account_number, 30)?;
        if !account_number
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b'-' || b == b'X' || b == b'x')
        {
            return Err(DomainError::validation(
                "accountNumber may only contain digits, '-' and a check letter",
            ));
        }
        Ok(Self {
            account_holder: text::required("accountHolder", &self.account_holder, 255)?,
            bank_code,
            account_number,
            account_type: self.account_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub network_id: ProfileId,
    pub amount: Money,
    pub bank_account: BankAccount,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Withdrawal {
    type Id = WithdrawalId;

    fn id(&self) -> WithdrawalId {
        self.id
    }
}

impl Withdrawal {
    /// Move to `next`, stamping `processed_at` on terminal states.
    ///
    /// Returns the amount to credit back to the network (non-zero only when
    /// the withdrawal failed).
    pub fn transition(&mut self, next: WithdrawalStatus, now: DateTime<Utc>) -> DomainResult<Money> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "withdrawal cannot move from {} to {}",
                self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.processed_at = Some(now);
        }
        Ok(if next == WithdrawalStatus::Failed {
            self.amount
        } else {
            Money::ZERO
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWithdrawal {
    pub network_id: ProfileId,
    pub amount: Money,
    pub bank_account: BankAccount,
}

impl NewWithdrawal {
    /// Checks the request against the network's current balance.
    pub fn validate(self, available: Money) -> DomainResult<Self> {
        if !self.amount.is_positive() {
            return Err(DomainError::validation("amount must be greater than zero"));
        }
        if self.amount > available {
            return Err(DomainError::invariant("insufficient balance for withdrawal"));
        }
        Ok(Self {
            network_id: self.network_id,
            amount: self.amount,
            bank_account: self.bank_account.validate()?,
        })
    }

    pub fn into_withdrawal(self, id: WithdrawalId, now: DateTime<Utc>) -> Withdrawal {
        Withdrawal {
            id,
            network_id: self.network_id,
            amount: self.amount,
            bank_account: self.bank_account,
            status: WithdrawalStatus::Pending,
            requested_at: now,
            processed_at: None,
            created_at: now,
        }
    }
}
