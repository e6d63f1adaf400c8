use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{string_enum, Entity, GasStationId, MembershipId, RecordStatus, UserId};

string_enum! {
    /// Role a user holds inside one station.
    pub enum StationRole : "station role" {
        Supervisor => "supervisor",
        Manager => "manager",
        Cashier => "cashier",
        Attendant => "attendant",
    }
}

impl StationRole {
    /// Roles allowed to register fuel sales at the pump.
    pub fn operates_pump(self) -> bool {
        matches!(self, StationRole::Cashier | StationRole::Attendant)
    }
}

/// A `gas_station_users` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationMembership {
    pub id: MembershipId,
    pub gas_station_id: GasStationId,
    pub user_id: UserId,
    pub role: StationRole,
    pub status: RecordStatus,
    pub invited_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for StationMembership {
    type Id = MembershipId;

    fn id(&self) -> MembershipId {
        self.id
    }
}

impl StationMembership {
    /// Active membership of `user_id` in `station` holding `role`.
    pub fn grants(&self, user_id: UserId, station: GasStationId, role: StationRole) -> bool {
        self.status.is_active()
            && self.user_id == user_id
            && self.gas_station_id == station
            && self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_requires_all_fields_and_active_status() {
        let now = Utc::now();
        let mut m = StationMembership {
            id: MembershipId::new(1),
            gas_station_id: GasStationId::new(2),
            user_id: UserId::new(3),
            role: StationRole::Manager,
            status: RecordStatus::Active,
            invited_at: Some(now),
            accepted_at: Some(now),
            created_at: now,
        };
        assert!(m.grants(UserId::new(3), GasStationId::new(2), StationRole::Manager));
        assert!(!m.grants(UserId::new(3), GasStationId::new(5), StationRole::Manager));
        assert!(!m.grants(UserId::new(3), GasStationId::new(2), StationRole::Cashier));

        m.status = RecordStatus::Inactive;
        assert!(!m.grants(UserId::new(3), GasStationId::new(2), StationRole::Manager));
    }

    #[test]
    fn pump_roles() {
        assert!(StationRole::Attendant.operates_pump());
        assert!(StationRole::Cashier.operates_pump());
        assert!(!StationRole::Manager.operates_pump());
    }
}
