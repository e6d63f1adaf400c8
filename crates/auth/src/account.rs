//! User accounts: account type, role and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_core::{string_enum, text, DomainError, DomainResult, Entity, UserId};
use iapos_profiles::ProfileType;

string_enum! {
    /// Which side of the platform an account belongs to.
    pub enum AccountType : "account type" {
        Admin => "admin",
        GasStation => "gas_station",
        Fleet => "fleet",
        Family => "family",
    }
}

string_enum! {
    /// Platform-wide role of a user. Station and fleet memberships carry their
    /// own role as well; guards compare the two where it matters.
    pub enum Role : "role" {
        Admin => "admin",
        Owner => "owner",
        Supervisor => "supervisor",
        Manager => "manager",
        Cashier => "cashier",
        Attendant => "attendant",
        Finance => "finance",
        Driver => "driver",
        Responsible => "responsible",
        Dependent => "dependent",
    }
}

string_enum! {
    pub enum UserStatus : "user status" {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
    }
}

impl AccountType {
    /// Account type that may own a profile of `profile_type`.
    pub fn for_profile_type(profile_type: ProfileType) -> AccountType {
        match profile_type {
            ProfileType::GasStationNetwork => AccountType::GasStation,
            ProfileType::Fleet => AccountType::Fleet,
            ProfileType::Family => AccountType::Family,
        }
    }

    /// Profile type this account type owns, if any.
    pub fn profile_type(self) -> Option<ProfileType> {
        match self {
            AccountType::Admin => None,
            AccountType::GasStation => Some(ProfileType::GasStationNetwork),
            AccountType::Fleet => Some(ProfileType::Fleet),
            AccountType::Family => Some(ProfileType::Family),
        }
    }

    pub fn roles(self) -> &'static [Role] {
        match self {
            AccountType::Admin => &[Role::Admin],
            AccountType::GasStation => &[
                Role::Owner,
                Role::Supervisor,
                Role::Manager,
                Role::Cashier,
                Role::Attendant,
            ],
            AccountType::Fleet => &[Role::Owner, Role::Finance, Role::Driver],
            AccountType::Family => &[Role::Responsible, Role::Dependent],
        }
    }

    pub fn permits(self, role: Role) -> bool {
        self.roles().contains(&role)
    }

    /// The role that owns profiles of this account type.
    pub fn head_role(self) -> Role {
        match self {
            AccountType::Admin => Role::Admin,
            AccountType::GasStation | AccountType::Fleet => Role::Owner,
            AccountType::Family => Role::Responsible,
        }
    }
}

/// Every valid (account type, role) pair.
pub fn account_roles() -> impl Iterator<Item = (AccountType, Role)> {
    AccountType::ALL
        .iter()
        .flat_map(|a| a.roles().iter().map(move |r| (*a, *r)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// External identity key; unique.
    pub open_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub account_type: AccountType,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_signed_in: DateTime<Utc>,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Case-insensitive match against the account e-mail.
    pub fn has_email(&self, email: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| e.trim().eq_ignore_ascii_case(email.trim()))
    }
}

/// Sign-in upsert keyed by `open_id`.
///
/// On insert, a missing account type / role defaults to `family` /
/// `dependent`. On update only the provided fields change; `last_signed_in`
/// always moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpsert {
    pub open_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub account_type: Option<AccountType>,
    pub role: Option<Role>,
}

impl UserUpsert {
    pub fn validate(self) -> DomainResult<Self> {
        let open_id = text::required("openId", &self.open_id, 64)?;
        if let (Some(a), Some(r)) = (self.account_type, self.role) {
            if !a.permits(r) {
                return Err(DomainError::validation(format!(
                    "role '{r}' is not valid for account type '{a}'"
                )));
            }
        }
        Ok(Self {
            open_id,
            email: text::optional_email("email", self.email)?,
            name: text::optional("name", self.name, 255)?,
            phone_number: text::optional("phoneNumber", self.phone_number, 20)?,
            account_type: self.account_type,
            role: self.role,
        })
    }

    pub fn into_user(self, id: UserId, now: DateTime<Utc>) -> DomainResult<User> {
        let account_type = self.account_type.unwrap_or(AccountType::Family);
        let role = self.role.unwrap_or(match account_type {
            AccountType::Family => Role::Dependent,
            other => other.head_role(),
        });
        if !account_type.permits(role) {
            return Err(DomainError::validation(format!(
                "role '{role}' is not valid for account type '{account_type}'"
            )));
        }
        Ok(User {
            id,
            open_id: self.open_id,
            email: self.email,
            name: self.name,
            phone_number: self.phone_number,
            account_type,
            role,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
            last_signed_in: now,
        })
    }

    pub fn apply(self, user: &mut User, now: DateTime<Utc>) -> DomainResult<()> {
        let account_type = self.account_type.unwrap_or(user.account_type);
        let role = self.role.unwrap_or(user.role);
        if !account_type.permits(role) {
            return Err(DomainError::validation(format!(
                "role '{role}' is not valid for account type '{account_type}'"
            )));
        }
        if self.email.is_some() {
            user.email = self.email;
        }
        if self.name.is_some() {
            user.name = self.name;
        }
        if self.phone_number.is_some() {
            user.phone_number = self.phone_number;
        }
        user.account_type = account_type;
        user.role = role;
        user.last_signed_in = now;
        user.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_family_dependent() {
        let u = UserUpsert {
            open_id: "oid-1".into(),
            ..Default::default()
        }
        .validate()
        .unwrap()
        .into_user(UserId::new(1), Utc::now())
        .unwrap();
        assert_eq!(u.account_type, AccountType::Family);
        assert_eq!(u.role, Role::Dependent);
        assert!(u.is_active());
    }

    #[test]
    fn account_type_alone_picks_head_role() {
        let u = UserUpsert {
            open_id: "oid-2".into(),
            account_type: Some(AccountType::Fleet),
            ..Default::default()
        }
        .into_user(UserId::new(2), Utc::now())
        .unwrap();
        assert_eq!(u.role, Role::Owner);
    }

    #[test]
    fn mismatched_role_is_rejected() {
        let res = UserUpsert {
            open_id: "oid".into(),
            account_type: Some(AccountType::Fleet),
            role: Some(Role::Attendant),
            ..Default::default()
        }
        .validate();
        assert!(res.is_err());
    }

    #[test]
    fn apply_touches_last_signed_in_and_keeps_unset_fields() {
        let t0 = Utc::now();
        let mut u = UserUpsert {
            open_id: "oid".into(),
            name: Some("Ana".into()),
            ..Default::default()
        }
        .into_user(UserId::new(1), t0)
        .unwrap();
        let t1 = t0 + chrono::Duration::minutes(5);
        UserUpsert {
            open_id: "oid".into(),
            email: Some("ana@example.com".into()),
            ..Default::default()
        }
        .apply(&mut u, t1)
        .unwrap();
        assert_eq!(u.name.as_deref(), Some("Ana"));
        assert!(u.has_email("ANA@example.com"));
        assert_eq!(u.last_signed_in, t1);
    }

    #[test]
    fn profile_type_mapping_round_trips() {
        for pt in ProfileType::ALL {
            assert_eq!(AccountType::for_profile_type(*pt).profile_type(), Some(*pt));
        }
        assert_eq!(AccountType::Admin.profile_type(), None);
        assert_eq!(account_roles().count(), 11);
    }
}
