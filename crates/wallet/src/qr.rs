//! QR codes printed for vehicles and dependents and scanned at the pump.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use iapos_core::{
    string_enum, DependentId, DomainError, DomainResult, Entity, ProfileId, QrCodeId, VehicleId,
};

string_enum! {
    pub enum QrEntityType : "entity type" {
        Vehicle => "vehicle",
        Dependent => "dependent",
    }
}

string_enum! {
    pub enum QrStatus : "QR code status" {
        Active => "active",
        Inactive => "inactive",
        Expired => "expired",
    }
}

/// The wallet a code pays from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QrHolder {
    Vehicle(VehicleId),
    Dependent(DependentId),
}

impl QrHolder {
    pub fn from_parts(entity_type: QrEntityType, entity_id: i64) -> Self {
        match entity_type {
            QrEntityType::Vehicle => QrHolder::Vehicle(VehicleId::new(entity_id)),
            QrEntityType::Dependent => QrHolder::Dependent(DependentId::new(entity_id)),
        }
    }

    pub fn entity_type(self) -> QrEntityType {
        match self {
            QrHolder::Vehicle(_) => QrEntityType::Vehicle,
            QrHolder::Dependent(_) => QrEntityType::Dependent,
        }
    }

    pub fn entity_id(self) -> i64 {
        match self {
            QrHolder::Vehicle(id) => id.get(),
            QrHolder::Dependent(id) => id.get(),
        }
    }
}

const CODE_PREFIX: &str = "IAPOS-";

fn type_letter(entity_type: QrEntityType) -> char {
    match entity_type {
        QrEntityType::Vehicle => 'V',
        QrEntityType::Dependent => 'D',
    }
}

/// `IAPOS-V-<32 hex>` for vehicles, `IAPOS-D-<32 hex>` for dependents.
pub fn generate_code(entity_type: QrEntityType) -> String {
    format!(
        "{CODE_PREFIX}{}-{}",
        type_letter(entity_type),
        Uuid::new_v4().simple()
    )
}

/// Validates the shape of a scanned code and tells which kind of wallet it
/// claims to belong to. The store still decides whether it exists.
pub fn parse_code(input: &str) -> DomainResult<(QrEntityType, String)> {
    let code = input.trim();
    let invalid = || DomainError::validation("malformed QR code");
    let rest = code.strip_prefix(CODE_PREFIX).ok_or_else(invalid)?;
    let (letter, hex) = rest.split_once('-').ok_or_else(invalid)?;
    let entity_type = match letter {
        "V" => QrEntityType::Vehicle,
        "D" => QrEntityType::Dependent,
        _ => return Err(invalid()),
    };
    if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    Ok((entity_type, code.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    pub id: QrCodeId,
    pub code: String,
    pub entity_type: QrEntityType,
    pub entity_id: i64,
    pub profile_id: ProfileId,
    pub status: QrStatus,
    pub generated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub regenerated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for QrCode {
    type Id = QrCodeId;

    fn id(&self) -> QrCodeId {
        self.id
    }
}

impl QrCode {
    pub fn holder(&self) -> QrHolder {
        QrHolder::from_parts(self.entity_type, self.entity_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == QrStatus::Expired || self.expires_at.is_some_and(|t| t <= now)
    }

    /// Active and inside its validity window.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == QrStatus::Active && !self.is_expired(now)
    }

    /// Reason a scan is refused, if any.
    pub fn check_usable(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_expired(now) {
            return Err(DomainError::invariant("QR code has expired"));
        }
        if self.status != QrStatus::Active {
            return Err(DomainError::invariant("QR code is not active"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQrCode {
    pub holder: QrHolder,
    pub profile_id: ProfileId,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewQrCode {
    pub fn validate(self, now: DateTime<Utc>) -> DomainResult<Self> {
        if self.expires_at.is_some_and(|t| t <= now) {
            return Err(DomainError::validation("expiresAt must be in the future"));
        }
        Ok(self)
    }

    /// `replaces_previous` marks a regeneration (an older active code existed).
    pub fn into_qr_code(
        self,
        id: QrCodeId,
        code: String,
        replaces_previous: bool,
        now: DateTime<Utc>,
    ) -> QrCode {
        QrCode {
            id,
            code,
            entity_type: self.holder.entity_type(),
            entity_id: self.holder.entity_id(),
            profile_id: self.profile_id,
            status: QrStatus::Active,
            generated_at: now,
            expires_at: self.expires_at,
            regenerated_at: replaces_previous.then_some(now),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn generated_codes_parse_back() {
        let code = generate_code(QrEntityType::Vehicle);
        assert!(code.starts_with("IAPOS-V-"));
        assert_eq!(code.len(), "IAPOS-V-".len() + 32);
        let (kind, parsed) = parse_code(&format!(" {code} ")).unwrap();
        assert_eq!(kind, QrEntityType::Vehicle);
        assert_eq!(parsed, code);

        let code = generate_code(QrEntityType::Dependent);
        assert_eq!(parse_code(&code).unwrap().0, QrEntityType::Dependent);
        assert_ne!(code, generate_code(QrEntityType::Dependent));
    }

    #[test]
    fn malformed_codes_are_rejected() {
        assert!(parse_code("IAPOS-X-0123456789abcdef0123456789abcdef").is_err());
        assert!(parse_code("IAPOS-V-xyz").is_err());
        assert!(parse_code("hello").is_err());
    }

    #[test]
    fn expiry_and_status_gate_usage() {
        let now = Utc::now();
        let mut qr = NewQrCode {
            holder: QrHolder::Dependent(DependentId::new(4)),
            profile_id: ProfileId::new(2),
            expires_at: Some(now + Duration::days(1)),
        }
        .validate(now)
        .unwrap()
        .into_qr_code(QrCodeId::new(1), generate_code(QrEntityType::Dependent), false, now);

        assert!(qr.is_usable(now));
        assert!(qr.regenerated_at.is_none());
        assert_eq!(qr.holder(), QrHolder::Dependent(DependentId::new(4)));
        assert!(!qr.is_usable(now + Duration::days(2)));
        assert!(qr.check_usable(now + Duration::days(2)).is_err());

        qr.status = QrStatus::Inactive;
        assert!(qr.check_usable(now).is_err());
    }

    #[test]
    fn past_expiry_is_rejected() {
        let now = Utc::now();
        let res = NewQrCode {
            holder: QrHolder::Vehicle(VehicleId::new(1)),
            profile_id: ProfileId::new(2),
            expires_at: Some(now - Duration::seconds(1)),
        }
        .validate(now);
        assert!(res.is_err());
    }
}
