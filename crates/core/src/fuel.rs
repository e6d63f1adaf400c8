//! Enumerations shared by several bounded contexts.

/// Declares a snake_case string enum with `as_str`/`FromStr` so it can be
/// stored in `TEXT` columns and exchanged over JSON with the same spelling.
#[macro_export]
macro_rules! string_enum {
    ($(#[$meta:meta])* $vis:vis enum $t:ident : $what:literal { $($(#[$vmeta:meta])* $variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $t {
            $(
                $(#[$vmeta])*
                #[serde(rename = $s)]
                $variant,
            )+
        }

        impl $t {
            pub const ALL: &'static [$t] = &[$($t::$variant),+];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $($t::$variant => $s),+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($t::$variant),)+
                    other => Err($crate::DomainError::validation(format!(
                        "unknown {}: '{}'",
                        $what, other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Fuel sold at stations and burned by vehicles.
    pub enum FuelType : "fuel type" {
        Gasoline => "gasoline",
        Diesel => "diesel",
        Ethanol => "ethanol",
        Lpg => "lpg",
        Cng => "cng",
    }
}

string_enum! {
    /// Two-state lifecycle used by stations, memberships and dependents.
    pub enum RecordStatus : "status" {
        Active => "active",
        Inactive => "inactive",
    }
}

impl Default for RecordStatus {
    fn default() -> Self {
        RecordStatus::Active
    }
}

impl RecordStatus {
    pub fn is_active(self) -> bool {
        self == RecordStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_text_columns() {
        for fuel in FuelType::ALL {
            assert_eq!(fuel.as_str().parse::<FuelType>().unwrap(), *fuel);
        }
        assert!("kerosene".parse::<FuelType>().is_err());
    }

    #[test]
    fn json_uses_snake_case_names() {
        assert_eq!(serde_json::to_string(&FuelType::Lpg).unwrap(), "\"lpg\"");
        let s: RecordStatus = serde_json::from_str("\"inactive\"").unwrap();
        assert_eq!(s, RecordStatus::Inactive);
    }
}
