use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{string_enum, Entity, MembershipId, ProfileId, RecordStatus, UserId, VehicleId};

string_enum! {
    pub enum FleetRole : "fleet role" {
        Owner => "owner",
        Finance => "finance",
        Driver => "driver",
    }
}

/// A `fleet_users` row. Drivers only see the vehicles listed in
/// `assigned_vehicles`; other roles ignore the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetMembership {
    pub id: MembershipId,
    pub fleet_id: ProfileId,
    pub user_id: UserId,
    pub role: FleetRole,
    pub status: RecordStatus,
    pub assigned_vehicles: Vec<VehicleId>,
    pub invited_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for FleetMembership {
    type Id = MembershipId;

    fn id(&self) -> MembershipId {
        self.id
    }
}

impl FleetMembership {
    pub fn is_active_in(&self, fleet: ProfileId) -> bool {
        self.status.is_active() && self.fleet_id == fleet
    }

    pub fn is_assigned(&self, vehicle: VehicleId) -> bool {
        self.assigned_vehicles.contains(&vehicle)
    }

    /// Replace the assignment list, dropping duplicates but keeping order.
    pub fn assign(&mut self, vehicles: &[VehicleId]) {
        let mut out: Vec<VehicleId> = Vec::with_capacity(vehicles.len());
        for v in vehicles {
            if !out.contains(v) {
                out.push(*v);
            }
        }
        self.assigned_vehicles = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> FleetMembership {
        FleetMembership {
            id: MembershipId::new(1),
            fleet_id: ProfileId::new(5),
            user_id: UserId::new(8),
            role: FleetRole::Driver,
            status: RecordStatus::Active,
            assigned_vehicles: vec![],
            invited_at: None,
            accepted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn assign_dedupes() {
        let mut m = driver();
        m.assign(&[VehicleId::new(3), VehicleId::new(1), VehicleId::new(3)]);
        assert_eq!(m.assigned_vehicles, vec![VehicleId::new(3), VehicleId::new(1)]);
        assert!(m.is_assigned(VehicleId::new(1)));
        assert!(!m.is_assigned(VehicleId::new(2)));
    }

    #[test]
    fn inactive_membership_is_not_active_in_fleet() {
        let mut m = driver();
        assert!(m.is_active_in(ProfileId::new(5)));
        assert!(!m.is_active_in(ProfileId::new(6)));
        m.status = RecordStatus::Inactive;
        assert!(!m.is_active_in(ProfileId::new(5)));
    }

    #[test]
    fn assigned_vehicles_serialize_as_ids() {
        let mut m = driver();
        m.assign(&[VehicleId::new(7)]);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["assignedVehicles"], serde_json::json!([7]));
        assert_eq!(json["role"], "driver");
    }
}
