use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{
    normalize_cnpj, normalize_state, text, DomainResult, Entity, GasStationId, ProfileId,
    RecordStatus,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasStation {
    pub id: GasStationId,
    /// Owning gas-station network profile.
    pub network_id: ProfileId,
    pub name: String,
    pub cnpj: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub operating_hours: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for GasStation {
    type Id = GasStationId;

    fn id(&self) -> GasStationId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGasStation {
    pub network_id: ProfileId,
    pub name: String,
    pub cnpj: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub operating_hours: Option<String>,
}

impl NewGasStation {
    pub fn validate(self) -> DomainResult<Self> {
        Ok(Self {
            network_id: self.network_id,
            name: text::required("name", &self.name, 255)?,
            cnpj: normalize_cnpj(&self.cnpj)?,
            address: text::required("address", &self.address, 1000)?,
            city: text::required("city", &self.city, 100)?,
            state: normalize_state(&self.state)?,
            zip_code: text::optional("zipCode", self.zip_code, 10)?,
            contact_phone: text::optional("contactPhone", self.contact_phone, 20)?,
            contact_email: text::optional_email("contactEmail", self.contact_email)?,
            operating_hours: text::optional("operatingHours", self.operating_hours, 1000)?,
        })
    }

    pub fn into_station(self, id: GasStationId, now: DateTime<Utc>) -> GasStation {
        GasStation {
            id,
            network_id: self.network_id,
            name: self.name,
            cnpj: self.cnpj,
            address: self.address,
            city: self.city,
            state: self.state,
            zip_code: self.zip_code,
            contact_phone: self.contact_phone,
            contact_email: self.contact_email,
            operating_hours: self.operating_hours,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasStationChanges {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub operating_hours: Option<String>,
}

impl GasStationChanges {
    pub fn validate(self) -> DomainResult<Self> {
        Ok(Self {
            name: self.name.map(|v| text::required("name", &v, 255)).transpose()?,
            address: self.address.map(|v| text::required("address", &v, 1000)).transpose()?,
            city: self.city.map(|v| text::required("city", &v, 100)).transpose()?,
            state: self.state.as_deref().map(normalize_state).transpose()?,
            zip_code: text::optional("zipCode", self.zip_code, 10)?,
            contact_phone: text::optional("contactPhone", self.contact_phone, 20)?,
            contact_email: text::optional_email("contactEmail", self.contact_email)?,
            operating_hours: text::optional("operatingHours", self.operating_hours, 1000)?,
        })
    }

    pub fn apply(self, station: &mut GasStation, now: DateTime<Utc>) {
        if let Some(v) = self.name {
            station.name = v;
        }
        if let Some(v) = self.address {
            station.address = v;
        }
        if let Some(v) = self.city {
            station.city = v;
        }
        if let Some(v) = self.state {
            station.state = v;
        }
        if self.zip_code.is_some() {
            station.zip_code = self.zip_code;
        }
        if self.contact_phone.is_some() {
            station.contact_phone = self.contact_phone;
        }
        if self.contact_email.is_some() {
            station.contact_email = self.contact_email;
        }
        if self.operating_hours.is_some() {
            station.operating_hours = self.operating_hours;
        }
        station.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> NewGasStation {
        NewGasStation {
            network_id: ProfileId::new(1),
            name: "Posto Central".into(),
            cnpj: "11.444.777/0001-61".into(),
            address: "Av. Paulista, 1000".into(),
            city: "São Paulo".into(),
            state: "sp".into(),
            zip_code: Some("01310-100".into()),
            contact_phone: None,
            contact_email: None,
            operating_hours: Some("24h".into()),
        }
    }

    #[test]
    fn validate_requires_cnpj_not_cpf() {
        let ok = input().validate().unwrap();
        assert_eq!(ok.cnpj, "11444777000161");
        assert_eq!(ok.state, "SP");

        let mut bad = input();
        bad.cnpj = "529.982.247-25".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn validate_requires_address_fields() {
        let mut bad = input();
        bad.address = " ".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn new_station_is_active_and_changes_apply() {
        let now = Utc::now();
        let mut s = input().validate().unwrap().into_station(GasStationId::new(4), now);
        assert!(s.status.is_active());

        GasStationChanges {
            name: Some("Posto Central II".into()),
            ..Default::default()
        }
        .validate()
        .unwrap()
        .apply(&mut s, now);
        assert_eq!(s.name, "Posto Central II");
        assert_eq!(s.city, "São Paulo");
    }
}
