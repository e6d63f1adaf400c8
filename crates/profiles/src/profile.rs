use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{
    normalize_document, normalize_state, string_enum, text, DomainResult, Entity, Money, ProfileId,
    UserId,
};

string_enum! {
    /// Which kind of tenant a profile is.
    pub enum ProfileType : "profile type" {
        GasStationNetwork => "gas_station_network",
        Fleet => "fleet",
        Family => "family",
    }
}

string_enum! {
    pub enum ProfileStatus : "profile status" {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
    }
}

pub const DEFAULT_COUNTRY: &str = "Brasil";

/// Tenant row. `balance` is the profile-level wallet: network revenue for a
/// gas-station network, undistributed funds for a fleet or family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    pub user_id: UserId,
    pub profile_type: ProfileType,
    pub name: String,
    pub cnpj_cpf: String,
    pub legal_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: String,
    pub tax_id: Option<String>,
    pub status: ProfileStatus,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Profile {
    type Id = ProfileId;

    fn id(&self) -> ProfileId {
        self.id
    }
}

impl Profile {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    pub fn is_active(&self) -> bool {
        self.status == ProfileStatus::Active
    }
}

/// Input for creating a profile. Call [`NewProfile::validate`] before storing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub user_id: UserId,
    pub profile_type: ProfileType,
    pub name: String,
    pub cnpj_cpf: String,
    pub legal_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub tax_id: Option<String>,
}

impl NewProfile {
    /// Normalises every field; the document is stored as bare digits.
    pub fn validate(self) -> DomainResult<Self> {
        let (_, cnpj_cpf) = normalize_document(&self.cnpj_cpf)?;
        Ok(Self {
            user_id: self.user_id,
            profile_type: self.profile_type,
            name: text::required("name", &self.name, 255)?,
            cnpj_cpf,
            legal_name: text::optional("legalName", self.legal_name, 1000)?,
            contact_email: text::optional_email("contactEmail", self.contact_email)?,
            contact_phone: text::optional("contactPhone", self.contact_phone, 20)?,
            address: text::optional("address", self.address, 1000)?,
            city: text::optional("city", self.city, 100)?,
            state: self.state.as_deref().map(normalize_state).transpose()?,
            zip_code: text::optional("zipCode", self.zip_code, 10)?,
            country: Some(
                text::optional("country", self.country, 100)?
                    .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            ),
            tax_id: text::optional("taxId", self.tax_id, 50)?,
        })
    }

    /// Materialise the row a store would insert.
    pub fn into_profile(self, id: ProfileId, now: DateTime<Utc>) -> Profile {
        Profile {
            id,
            user_id: self.user_id,
            profile_type: self.profile_type,
            name: self.name,
            cnpj_cpf: self.cnpj_cpf,
            legal_name: self.legal_name,
            contact_email: self.contact_email,
            contact_phone: self.contact_phone,
            address: self.address,
            city: self.city,
            state: self.state,
            zip_code: self.zip_code,
            country: self.country.unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            tax_id: self.tax_id,
            status: ProfileStatus::Active,
            balance: Money::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub legal_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub tax_id: Option<String>,
}

impl ProfileChanges {
    pub fn validate(self) -> DomainResult<Self> {
        Ok(Self {
            name: self.name.map(|n| text::required("name", &n, 255)).transpose()?,
            legal_name: text::optional("legalName", self.legal_name, 1000)?,
            contact_email: text::optional_email("contactEmail", self.contact_email)?,
            contact_phone: text::optional("contactPhone", self.contact_phone, 20)?,
            address: text::optional("address", self.address, 1000)?,
            city: text::optional("city", self.city, 100)?,
            state: self.state.as_deref().map(normalize_state).transpose()?,
            zip_code: text::optional("zipCode", self.zip_code, 10)?,
            tax_id: text::optional("taxId", self.tax_id, 50)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, profile: &mut Profile, now: DateTime<Utc>) {
        if let Some(v) = self.name {
            profile.name = v;
        }
        if self.legal_name.is_some() {
            profile.legal_name = self.legal_name;
        }
        if self.contact_email.is_some() {
            profile.contact_email = self.contact_email;
        }
        if self.contact_phone.is_some() {
            profile.contact_phone = self.contact_phone;
        }
        if self.address.is_some() {
            profile.address = self.address;
        }
        if self.city.is_some() {
            profile.city = self.city;
        }
        if self.state.is_some() {
            profile.state = self.state;
        }
        if self.zip_code.is_some() {
            profile.zip_code = self.zip_code;
        }
        if self.tax_id.is_some() {
            profile.tax_id = self.tax_id;
        }
        profile.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_fleet() -> NewProfile {
        NewProfile {
            user_id: UserId::new(1),
            profile_type: ProfileType::Fleet,
            name: " Transportes Rio ".into(),
            cnpj_cpf: "11.222.333/0001-81".into(),
            legal_name: None,
            contact_email: Some("frota@rio.com.br".into()),
            contact_phone: None,
            address: None,
            city: Some("Rio de Janeiro".into()),
            state: Some("rj".into()),
            zip_code: None,
            country: None,
            tax_id: None,
        }
    }

    #[test]
    fn validate_normalises_fields() {
        let p = new_fleet().validate().unwrap();
        assert_eq!(p.name, "Transportes Rio");
        assert_eq!(p.cnpj_cpf, "11222333000181");
        assert_eq!(p.state.as_deref(), Some("RJ"));
        assert_eq!(p.country.as_deref(), Some(DEFAULT_COUNTRY));
    }

    #[test]
    fn validate_rejects_bad_document_and_state() {
        let mut p = new_fleet();
        p.cnpj_cpf = "11.222.333/0001-80".into();
        assert!(p.validate().is_err());

        let mut p = new_fleet();
        p.state = Some("Rio".into());
        assert!(p.validate().is_err());

        let mut p = new_fleet();
        p.name = "  ".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn new_profile_starts_active_with_zero_balance() {
        let now = Utc::now();
        let p = new_fleet().validate().unwrap().into_profile(ProfileId::new(9), now);
        assert_eq!(p.status, ProfileStatus::Active);
        assert!(p.balance.is_zero());
        assert!(p.is_owned_by(UserId::new(1)));
        assert_eq!(p.id(), ProfileId::new(9));
    }

    #[test]
    fn changes_apply_only_provided_fields() {
        let now = Utc::now();
        let mut p = new_fleet().validate().unwrap().into_profile(ProfileId::new(9), now);
        let changes = ProfileChanges {
            city: Some("Niterói".into()),
            ..ProfileChanges::default()
        }
        .validate()
        .unwrap();
        assert!(!changes.is_empty());
        changes.apply(&mut p, now);
        assert_eq!(p.city.as_deref(), Some("Niterói"));
        assert_eq!(p.name, "Transportes Rio");
    }

    #[test]
    fn serializes_camel_case_with_string_balance() {
        let p = new_fleet()
            .validate()
            .unwrap()
            .into_profile(ProfileId::new(3), Utc::now());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["profileType"], "fleet");
        assert_eq!(json["cnpjCpf"], "11222333000181");
        assert_eq!(json["balance"], "0.00");
    }
}
