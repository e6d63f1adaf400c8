use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{
    string_enum, text, DomainError, DomainResult, Entity, FuelType, Money, ProfileId, QrCodeId,
    VehicleId,
};

string_enum! {
    pub enum VehicleType : "vehicle type" {
        Car => "car",
        Truck => "truck",
        Van => "van",
        Motorcycle => "motorcycle",
    }
}

string_enum! {
    pub enum VehicleStatus : "vehicle status" {
        Active => "active",
        Inactive => "inactive",
        Maintenance => "maintenance",
    }
}

pub const MIN_YEAR: i32 = 1950;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: VehicleId,
    pub fleet_id: ProfileId,
    pub license_plate: String,
    pub vehicle_type: VehicleType,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub fuel_type: FuelType,
    pub status: VehicleStatus,
    pub qr_code_id: Option<QrCodeId>,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Vehicle {
    type Id = VehicleId;

    fn id(&self) -> VehicleId {
        self.id
    }
}

impl Vehicle {
    pub fn can_refuel(&self) -> bool {
        self.status == VehicleStatus::Active
    }
}

/// Brazilian plates, old (`ABC1234`) or Mercosul (`ABC1D23`) layout.
///
/// Separators are dropped and letters uppercased.
pub fn normalize_plate(input: &str) -> DomainResult<String> {
    let plate: String = input
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let b = plate.as_bytes();
    let ok = b.len() == 7
        && b[..3].iter().all(u8::is_ascii_uppercase)
        && b[3].is_ascii_digit()
        && (b[4].is_ascii_digit() || b[4].is_ascii_uppercase())
        && b[5..].iter().all(u8::is_ascii_digit);
    if !ok {
        return Err(DomainError::validation(format!(
            "'{input}' is not a valid license plate"
        )));
    }
    Ok(plate)
}

fn validate_year(year: Option<i32>, now: DateTime<Utc>) -> DomainResult<Option<i32>> {
    match year {
        Some(y) if !(MIN_YEAR..=now.year() + 1).contains(&y) => Err(DomainError::validation(
            format!("year must be between {MIN_YEAR} and {}", now.year() + 1),
        )),
        other => Ok(other),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVehicle {
    pub fleet_id: ProfileId,
    pub license_plate: String,
    pub vehicle_type: VehicleType,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub fuel_type: FuelType,
}

impl NewVehicle {
    pub fn validate(self, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            fleet_id: self.fleet_id,
            license_plate: normalize_plate(&self.license_plate)?,
            vehicle_type: self.vehicle_type,
            brand: text::optional("brand", self.brand, 100)?,
            model: text::optional("model", self.model, 100)?,
            year: validate_year(self.year, now)?,
            fuel_type: self.fuel_type,
        })
    }

    pub fn into_vehicle(self, id: VehicleId, now: DateTime<Utc>) -> Vehicle {
        Vehicle {
            id,
            fleet_id: self.fleet_id,
            license_plate: self.license_plate,
            vehicle_type: self.vehicle_type,
            brand: self.brand,
            model: self.model,
            year: self.year,
            fuel_type: self.fuel_type,
            status: VehicleStatus::Active,
            qr_code_id: None,
            balance: Money::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleChanges {
    pub status: Option<VehicleStatus>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
}

impl VehicleChanges {
    pub fn validate(self, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            status: self.status,
            brand: text::optional("brand", self.brand, 100)?,
            model: text::optional("model", self.model, 100)?,
            year: validate_year(self.year, now)?,
        })
    }

    pub fn apply(self, vehicle: &mut Vehicle, now: DateTime<Utc>) {
        if let Some(s) = self.status {
            vehicle.status = s;
        }
        if self.brand.is_some() {
            vehicle.brand = self.brand;
        }
        if self.model.is_some() {
            vehicle.model = self.model;
        }
        if self.year.is_some() {
            vehicle.year = self.year;
        }
        vehicle.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn input() -> NewVehicle {
        NewVehicle {
            fleet_id: ProfileId::new(2),
            license_plate: "abc-1d23".into(),
            vehicle_type: VehicleType::Truck,
            brand: Some("Volvo".into()),
            model: Some("FH 540".into()),
            year: Some(2022),
            fuel_type: FuelType::Diesel,
        }
    }

    #[test]
    fn plates_are_normalised() {
        assert_eq!(normalize_plate("abc-1234").unwrap(), "ABC1234");
        assert_eq!(normalize_plate("BRA 2E19").unwrap(), "BRA2E19");
        assert!(normalize_plate("AB12345").is_err());
        assert!(normalize_plate("ABC12345").is_err());
        assert!(normalize_plate("ABC1DD3").is_err());
    }

    #[test]
    fn year_window_is_1950_to_next_year() {
        let mut v = input();
        v.year = Some(2027);
        assert!(v.clone().validate(now()).is_ok());
        v.year = Some(2028);
        assert!(v.clone().validate(now()).is_err());
        v.year = Some(1949);
        assert!(v.validate(now()).is_err());
    }

    #[test]
    fn new_vehicle_defaults() {
        let v = input().validate(now()).unwrap().into_vehicle(VehicleId::new(1), now());
        assert_eq!(v.license_plate, "ABC1D23");
        assert_eq!(v.status, VehicleStatus::Active);
        assert!(v.balance.is_zero());
        assert!(v.qr_code_id.is_none());
        assert!(v.can_refuel());
    }

    #[test]
    fn maintenance_blocks_refuel() {
        let mut v = input().validate(now()).unwrap().into_vehicle(VehicleId::new(1), now());
        VehicleChanges {
            status: Some(VehicleStatus::Maintenance),
            ..Default::default()
        }
        .validate(now())
        .unwrap()
        .apply(&mut v, now());
        assert!(!v.can_refuel());
        assert_eq!(v.brand.as_deref(), Some("Volvo"));
    }
}
