use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exact decimal price in the source's currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub fn new(value: Decimal) -> Self {
        Price(value)
    }

    /// Integer minor units (cents) as reported by store APIs.
    pub fn from_minor_units(units: i64) -> Self {
        Price(Decimal::new(units, 2))
    }

    pub fn zero() -> Self {
        Price(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Price)
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Price(value)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_keep_two_decimals() {
        let price = Price::from_minor_units(1999);
        assert_eq!(price.to_string(), "19.99");
        assert_eq!(price, "19.99".parse::<Price>().unwrap());
    }

    #[test]
    fn ordering_is_numeric() {
        let cheap: Price = "9.5".parse().unwrap();
        let dear: Price = "10.00".parse().unwrap();
        assert!(cheap < dear);
        assert_eq!("10".parse::<Price>().unwrap(), dear);
    }

    #[test]
    fn serializes_as_string() {
        let price: Price = "4.99".parse().unwrap();
        assert_eq!(serde_json::to_string(&price).unwrap(), "\"4.99\"");
        let back: Price = serde_json::from_str("\"4.99\"").unwrap();
        assert_eq!(back, price);
    }
}
