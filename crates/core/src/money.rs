//! Fixed-point quantities with two decimal places.
//!
//! Balances, prices and volumes are `NUMERIC(_, 2)` columns. They are carried as
//! integer hundredths so arithmetic is exact, and they cross the wire as decimal
//! strings (`"12.34"`), which is what clients of the RPC API expect.

use core::fmt;
use core::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;
use crate::value_object::ValueObject;

macro_rules! fixed_point {
    ($(#[$meta:meta])* $t:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $t(i64);

        impl $t {
            pub const ZERO: Self = Self(0);

            pub const fn from_hundredths(value: i64) -> Self {
                Self(value)
            }

            pub const fn hundredths(self) -> i64 {
                self.0
            }

            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }

            pub const fn is_positive(self) -> bool {
                self.0 > 0
            }

            pub const fn is_negative(self) -> bool {
                self.0 < 0
            }

            pub fn checked_add(self, other: Self) -> Option<Self> {
                self.0.checked_add(other.0).map(Self)
            }

            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }

            pub fn checked_neg(self) -> Option<Self> {
                self.0.checked_neg().map(Self)
            }
        }

        impl ValueObject for $t {}

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let sign = if self.0 < 0 { "-" } else { "" };
                let abs = self.0.unsigned_abs();
                write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hundredths(s, $what).map(Self)
            }
        }

        impl Serialize for $t {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(HundredthsVisitor($what)).map(Self)
            }
        }
    };
}

fixed_point!(
    /// Amount of Brazilian reais, in cents.
    Money,
    "amount"
);

fixed_point!(
    /// Fuel volume in hundredths of a litre.
    Liters,
    "liters"
);

impl Money {
    pub const CURRENCY: &'static str = "BRL";

    pub const fn from_reais(reais: i64) -> Self {
        Self(reais * 100)
    }
}

impl Liters {
    /// Price of this volume at `unit_price` per litre, rounded half away from
    /// zero to the cent.
    ///
    /// Returns `None` when the result does not fit in a `Money`.
    pub fn cost_at(self, unit_price: Money) -> Option<Money> {
        let raw = i128::from(self.0) * i128::from(unit_price.hundredths());
        let quotient = raw / 100;
        let remainder = raw % 100;
        let rounded = if remainder.abs() >= 50 {
            quotient + raw.signum()
        } else {
            quotient
        };
        i64::try_from(rounded).ok().map(Money::from_hundredths)
    }
}

fn parse_hundredths(input: &str, what: &str) -> Result<i64, DomainError> {
    let s = input.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty())
        || !all_digits(int_part)
        || !all_digits(frac_part)
    {
        return Err(DomainError::validation(format!("{what} must be a decimal number")));
    }
    if frac_part.len() > 2 {
        return Err(DomainError::validation(format!(
            "{what} supports at most two decimal places"
        )));
    }

    let overflow = || DomainError::validation(format!("{what} is out of range"));

    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| overflow())?
    };
    let frac: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().map_err(|_| overflow())? * 10,
        _ => frac_part.parse().map_err(|_| overflow())?,
    };

    let value = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(overflow)?;
    Ok(if negative { -value } else { value })
}

struct HundredthsVisitor(&'static str);

impl<'de> Visitor<'de> for HundredthsVisitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as a decimal string or number with at most two decimals", self.0)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        parse_hundredths(v, self.0).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        v.checked_mul(100)
            .ok_or_else(|| E::custom(format!("{} is out of range", self.0)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(100))
            .ok_or_else(|| E::custom(format!("{} is out of range", self.0)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
        if !v.is_finite() {
            return Err(E::custom(format!("{} must be finite", self.0)));
        }
        let scaled = v * 100.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return Err(E::custom(format!(
                "{} supports at most two decimal places",
                self.0
            )));
        }
        if rounded.abs() >= i64::MAX as f64 {
            return Err(E::custom(format!("{} is out of range", self.0)));
        }
        Ok(rounded as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn formats_with_two_decimals() {
        assert_eq!(Money::from_hundredths(0).to_string(), "0.00");
        assert_eq!(Money::from_hundredths(5).to_string(), "0.05");
        assert_eq!(Money::from_hundredths(12345).to_string(), "123.45");
        assert_eq!(Money::from_hundredths(-150).to_string(), "-1.50");
    }

    #[test]
    fn parses_common_shapes() {
        assert_eq!("10".parse::<Money>().unwrap(), Money::from_reais(10));
        assert_eq!("10.5".parse::<Money>().unwrap(), Money::from_hundredths(1050));
        assert_eq!(".75".parse::<Money>().unwrap(), Money::from_hundredths(75));
        assert_eq!("-0.01".parse::<Money>().unwrap(), Money::from_hundredths(-1));
    }

    #[test]
    fn rejects_extra_precision_and_junk() {
        assert!("1.234".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
        assert!(".".parse::<Money>().is_err());
        assert!("1,50".parse::<Liters>().is_err());
        assert!("99999999999999999999".parse::<Money>().is_err());
    }

    #[test]
    fn json_accepts_strings_and_numbers() {
        let m: Money = serde_json::from_str("\"25.90\"").unwrap();
        assert_eq!(m.hundredths(), 2590);
        let m: Money = serde_json::from_str("25.9").unwrap();
        assert_eq!(m.hundredths(), 2590);
        let m: Money = serde_json::from_str("30").unwrap();
        assert_eq!(m.hundredths(), 3000);
        assert!(serde_json::from_str::<Money>("1.005").is_err());
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"30.00\"");
    }

    #[test]
    fn cost_rounds_half_up_to_the_cent() {
        // 40.00 L at 5.79 = 231.60
        let cost = Liters::from_hundredths(4000).cost_at(Money::from_hundredths(579));
        assert_eq!(cost, Some(Money::from_hundredths(23160)));

        // 10.33 L at 5.85 = 60.4305 -> 60.43
        let cost = Liters::from_hundredths(1033).cost_at(Money::from_hundredths(585));
        assert_eq!(cost, Some(Money::from_hundredths(6043)));

        // 0.10 L at 0.05 = 0.005 -> 0.01
        let cost = Liters::from_hundredths(10).cost_at(Money::from_hundredths(5));
        assert_eq!(cost, Some(Money::from_hundredths(1)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: formatting then parsing is lossless for any amount.
        #[test]
        fn display_parse_is_lossless(cents in -1_000_000_000_000i64..1_000_000_000_000i64) {
            let m = Money::from_hundredths(cents);
            let back: Money = m.to_string().parse().unwrap();
            prop_assert_eq!(back, m);
        }

        /// Property: the computed cost never drifts more than half a cent from
        /// the exact product.
        #[test]
        fn cost_is_within_half_a_cent(liters in 1i64..100_000, price in 1i64..100_000) {
            let cost = Liters::from_hundredths(liters)
                .cost_at(Money::from_hundredths(price))
                .unwrap();
            let exact = i128::from(liters) * i128::from(price);
            let diff = (i128::from(cost.hundredths()) * 100 - exact).abs();
            prop_assert!(diff <= 50);
        }
    }
}
