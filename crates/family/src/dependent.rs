use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{
    normalize_cpf, string_enum, text, DependentId, DomainResult, Entity, Money, ProfileId,
    QrCodeId, RecordStatus, UserId,
};

string_enum! {
    pub enum Relationship : "relationship" {
        Spouse => "spouse",
        Child => "child",
        Parent => "parent",
        Sibling => "sibling",
        Other => "other",
    }
}

/// A `family_dependents` row.
///
/// `user_id` is set once the dependent accepts an invitation and signs in
/// with their own account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependent {
    pub id: DependentId,
    pub family_id: ProfileId,
    pub user_id: Option<UserId>,
    pub name: String,
    pub cpf: Option<String>,
    pub relationship: Relationship,
    pub status: RecordStatus,
    pub qr_code_id: Option<QrCodeId>,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Dependent {
    type Id = DependentId;

    fn id(&self) -> DependentId {
        self.id
    }
}

impl Dependent {
    pub fn is_linked_to(&self, user_id: UserId) -> bool {
        self.user_id == Some(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDependent {
    pub family_id: ProfileId,
    pub name: String,
    pub cpf: Option<String>,
    pub relationship: Relationship,
}

impl NewDependent {
    pub fn validate(self) -> DomainResult<Self> {
        Ok(Self {
            family_id: self.family_id,
            name: text::required("name", &self.name, 255)?,
            cpf: match self.cpf {
                Some(c) if !c.trim().is_empty() => Some(normalize_cpf(&c)?),
                _ => None,
            },
            relationship: self.relationship,
        })
    }

    pub fn into_dependent(self, id: DependentId, now: DateTime<Utc>) -> Dependent {
        Dependent {
            id,
            family_id: self.family_id,
            user_id: None,
            name: self.name,
            cpf: self.cpf,
            relationship: self.relationship,
            status: RecordStatus::Active,
            qr_code_id: None,
            balance: Money::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentChanges {
    pub name: Option<String>,
    pub status: Option<RecordStatus>,
}

impl DependentChanges {
    pub fn validate(self) -> DomainResult<Self> {
        Ok(Self {
            name: self.name.map(|n| text::required("name", &n, 255)).transpose()?,
            status: self.status,
        })
    }

    pub fn apply(self, dependent: &mut Dependent, now: DateTime<Utc>) {
        if let Some(n) = self.name {
            dependent.name = n;
        }
        if let Some(s) = self.status {
            dependent.status = s;
        }
        dependent.updated_at = now;
    }
}
