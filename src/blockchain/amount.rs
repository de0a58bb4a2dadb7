use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Number of decimal places carried by an [`Amount`]
pub const DECIMALS: u32 = 8;

/// Minor units in one whole coin
pub const MINOR_PER_COIN: u64 = 10u64.pow(DECIMALS);

/// Errors that can occur while parsing or combining amounts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Invalid amount format: {0}")]
    InvalidFormat(String),

    #[error("Too many decimal places in {0} (maximum {max})", max = DECIMALS)]
    TooPrecise(String),

    #[error("Amount overflow")]
    Overflow,
}

/// A quantity of value in fixed-point minor units.
///
/// Amounts never go through floating point, so change computation and
/// conservation checks are exact. The canonical text form always carries
/// [`DECIMALS`] fractional digits, e.g. `949.50000000`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Creates an amount from raw minor units
    pub const fn from_minor(units: u64) -> Self {
        Amount(units)
    }

    /// Creates an amount from a whole number of coins
    pub fn from_coins(coins: u64) -> Result<Self, AmountError> {
        coins
            .checked_mul(MINOR_PER_COIN)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Gets the raw minor units
    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.0 / MINOR_PER_COIN,
            self.0 % MINOR_PER_COIN,
            width = DECIMALS as usize
        )
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };

        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !is_digits(whole) || !is_digits(fraction) {
            return Err(AmountError::InvalidFormat(s.to_string()));
        }
        if fraction.len() > DECIMALS as usize {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let whole: u64 = whole
            .parse()
            .map_err(|_| AmountError::InvalidFormat(s.to_string()))?;
        let padded = format!("{:0<width$}", fraction, width = DECIMALS as usize);
        let fraction: u64 = padded
            .parse()
            .map_err(|_| AmountError::InvalidFormat(s.to_string()))?;

        Amount::from_coins(whole)?
            .checked_add(Amount(fraction))
            .ok_or(AmountError::Overflow)
    }
}

/// Checked summation: `None` when the total does not fit
impl Sum<Amount> for Option<Amount> {
    fn sum<I: Iterator<Item = Amount>>(mut iter: I) -> Self {
        iter.try_fold(Amount::ZERO, Amount::checked_add)
    }
}

impl<'a> Sum<&'a Amount> for Option<Amount> {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal string or a whole number of coins")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Amount::from_coins(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let amount: Amount = "949.5".parse().unwrap();
        assert_eq!(amount.minor_units(), 94_950_000_000);
        assert_eq!(amount.to_string(), "949.50000000");

        let whole: Amount = "1000".parse().unwrap();
        assert_eq!(whole, Amount::from_coins(1000).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!("".parse::<Amount>(), Err(AmountError::InvalidFormat(_))));
        assert!(matches!("-3".parse::<Amount>(), Err(AmountError::InvalidFormat(_))));
        assert!(matches!(".5".parse::<Amount>(), Err(AmountError::InvalidFormat(_))));
        assert!(matches!("1.2.3".parse::<Amount>(), Err(AmountError::InvalidFormat(_))));
        assert!(matches!(
            "0.123456789".parse::<Amount>(),
            Err(AmountError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_exact_arithmetic() {
        // 0.1 + 0.2 is exact here, unlike f64
        let a: Amount = "0.1".parse().unwrap();
        let b: Amount = "0.2".parse().unwrap();
        assert_eq!(a.checked_add(b).unwrap(), "0.3".parse().unwrap());
        assert_eq!(b.checked_sub(a).unwrap(), a);
        assert!(a.checked_sub(b).is_none());
    }

    #[test]
    fn test_serde_forms() {
        let amount: Amount = "3.5".parse().unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"3.50000000\"");

        let from_str: Amount = serde_json::from_str("\"3.5\"").unwrap();
        let from_int: Amount = serde_json::from_str("50").unwrap();
        assert_eq!(from_str, amount);
        assert_eq!(from_int, Amount::from_coins(50).unwrap());
    }

    #[test]
    fn test_sum() {
        let parts = ["1.5", "2.25", "0.25"]
            .iter()
            .map(|s| s.parse::<Amount>().unwrap());
        assert_eq!(parts.sum::<Option<Amount>>(), Some(Amount::from_coins(4).unwrap()));
    }

    #[test]
    fn test_sum_overflow_is_none() {
        let near_max = Amount::from_minor(u64::MAX - 1);
        let parts = [near_max, Amount::from_minor(2)];

        assert_eq!(parts.iter().sum::<Option<Amount>>(), None);
        assert_eq!(
            parts[..1].iter().sum::<Option<Amount>>(),
            Some(near_max)
        );
    }
}
