//! Fuel sales paid with a QR code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{
    string_enum, DomainError, DomainResult, Entity, FuelType, GasStationId, Liters, Money,
    ProfileId, QrCodeId, TransactionId, UserId,
};

use crate::qr::{QrEntityType, QrHolder};

string_enum! {
    pub enum TransactionStatus : "transaction status" {
        Completed => "completed",
        Pending => "pending",
        Failed => "failed",
        Refunded => "refunded",
    }
}

/// What the attendant keys in at the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuelPurchase {
    pub fuel_type: FuelType,
    pub liters: Liters,
    pub unit_price: Money,
}

impl FuelPurchase {
    /// Total to charge: litres × unit price, rounded to the cent.
    pub fn total(&self) -> DomainResult<Money> {
        if !self.liters.is_positive() {
            return Err(DomainError::validation("liters must be greater than zero"));
        }
        if !self.unit_price.is_positive() {
            return Err(DomainError::validation("unitPrice must be greater than zero"));
        }
        let total = self
            .liters
            .cost_at(self.unit_price)
            .ok_or_else(|| DomainError::validation("purchase total is out of range"))?;
        if !total.is_positive() {
            return Err(DomainError::validation("purchase total rounds to zero"));
        }
        Ok(total)
    }

    /// Total plus the holder's balance after paying it.
    pub fn settle(&self, balance: Money) -> DomainResult<(Money, Money)> {
        let total = self.total()?;
        match balance.checked_sub(total) {
            Some(rest) if !rest.is_negative() => Ok((total, rest)),
            _ => Err(DomainError::invariant(format!(
                "insufficient balance: {balance} available, {total} required"
            ))),
        }
    }
}

/// A row of the `transactions` table.
///
/// The paying wallet and the receiving network are denormalised onto the row so
/// refunds and per-holder history do not need to walk QR-code history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelTransaction {
    pub id: TransactionId,
    pub qr_code_id: QrCodeId,
    pub gas_station_id: GasStationId,
    pub network_id: ProfileId,
    pub attendant_id: UserId,
    pub entity_type: QrEntityType,
    pub entity_id: i64,
    pub payer_profile_id: ProfileId,
    pub fuel_type: FuelType,
    pub liters: Liters,
    pub amount_debited: Money,
    pub unit_price: Money,
    pub total_cost: Money,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Entity for FuelTransaction {
    type Id = TransactionId;

    fn id(&self) -> TransactionId {
        self.id
    }
}

impl FuelTransaction {
    pub fn holder(&self) -> QrHolder {
        QrHolder::from_parts(self.entity_type, self.entity_id)
    }

    /// Marks the sale refunded and returns the amount to move back.
    pub fn refund(&mut self) -> DomainResult<Money> {
        if self.status != TransactionStatus::Completed {
            return Err(DomainError::invariant(format!(
                "only completed transactions can be refunded (status is {})",
                self.status
            )));
        }
        self.status = TransactionStatus::Refunded;
        Ok(self.amount_debited)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFuelTransaction {
    pub qr_code_id: QrCodeId,
    pub gas_station_id: GasStationId,
    pub network_id: ProfileId,
    pub attendant_id: UserId,
    pub holder: QrHolder,
    pub payer_profile_id: ProfileId,
    pub purchase: FuelPurchase,
    pub total: Money,
}

impl NewFuelTransaction {
    pub fn into_transaction(self, id: TransactionId, now: DateTime<Utc>) -> FuelTransaction {
        FuelTransaction {
            id,
            qr_code_id: self.qr_code_id,
            gas_station_id: self.gas_station_id,
            network_id: self.network_id,
            attendant_id: self.attendant_id,
            entity_type: self.holder.entity_type(),
            entity_id: self.holder.entity_id(),
            payer_profile_id: self.payer_profile_id,
            fuel_type: self.purchase.fuel_type,
            liters: self.purchase.liters,
            amount_debited: self.total,
            unit_price: self.purchase.unit_price,
            total_cost: self.total,
            status: TransactionStatus::Completed,
            timestamp: now,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iapos_core::VehicleId;

    fn purchase(liters: i64, price: i64) -> FuelPurchase {
        FuelPurchase {
            fuel_type: FuelType::Gasoline,
            liters: Liters::from_hundredths(liters),
            unit_price: Money::from_hundredths(price),
        }
    }

    #[test]
    fn settle_debits_the_rounded_total() {
        let (total, rest) = purchase(1033, 585).settle(Money::from_reais(100)).unwrap();
        assert_eq!(total, Money::from_hundredths(6043));
        assert_eq!(rest, Money::from_hundredths(3957));
    }

    #[test]
    fn settle_rejects_overdraft() {
        let err = purchase(4000, 579).settle(Money::from_reais(200)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(purchase(4000, 579).settle(Money::from_hundredths(23160)).is_ok());
    }

    #[test]
    fn zero_inputs_are_invalid() {
        assert!(purchase(0, 579).total().is_err());
        assert!(purchase(100, 0).total().is_err());
        assert!(purchase(1, 1).total().is_err());
    }

    #[test]
    fn refund_only_once() {
        let p = purchase(1000, 600);
        let now = Utc::now();
        let mut tx = NewFuelTransaction {
            qr_code_id: QrCodeId::new(1),
            gas_station_id: GasStationId::new(1),
            network_id: ProfileId::new(1),
            attendant_id: UserId::new(9),
            holder: QrHolder::Vehicle(VehicleId::new(3)),
            payer_profile_id: ProfileId::new(2),
            purchase: p,
            total: p.total().unwrap(),
        }
        .into_transaction(TransactionId::new(1), now);
        assert_eq!(tx.total_cost, Money::from_reais(60));
        assert_eq!(tx.holder(), QrHolder::Vehicle(VehicleId::new(3)));
        assert_eq!(tx.refund().unwrap(), Money::from_reais(60));
        assert!(tx.refund().is_err());
    }
}
