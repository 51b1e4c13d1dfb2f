//! Monetary amounts in cents.

use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
///
/// Remote services speak decimal major units (`10.5`); conversion happens
/// at the adapter boundary through [`Money::from_major_units`] and
/// [`Money::to_major_units`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from a whole dollar value.
    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars * 100,
        }
    }

    /// Converts a decimal amount in major units, rounding to the nearest cent.
    ///
    /// Returns `None` for non-finite input or values outside the `i64` range.
    pub fn from_major_units(amount: f64) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        let cents = (amount * 100.0).round();
        if cents < i64::MIN as f64 || cents > i64::MAX as f64 {
            return None;
        }
        Some(Self {
            cents: cents as i64,
        })
    }

    /// Returns the amount as decimal major units for wire payloads.
    pub fn to_major_units(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Returns the amount with its sign flipped.
    pub fn negate(&self) -> Money {
        Money {
            cents: -self.cents,
        }
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(|cents| Money { cents })
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents - rhs.cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_cents() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.dollars(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
    }

    #[test]
    fn test_major_unit_conversion_rounds_to_cents() {
        assert_eq!(Money::from_major_units(10.0), Some(Money::from_cents(1000)));
        assert_eq!(Money::from_major_units(0.1 + 0.2), Some(Money::from_cents(30)));
        assert_eq!(Money::from_major_units(-3.5), Some(Money::from_cents(-350)));
        assert_eq!(Money::from_major_units(f64::NAN), None);
        assert_eq!(Money::from_major_units(f64::INFINITY), None);
        assert_eq!(Money::from_cents(1050).to_major_units(), 10.5);
    }

    #[test]
    fn test_checked_multiply() {
        assert_eq!(
            Money::from_cents(500).checked_multiply(2),
            Some(Money::from_cents(1000))
        );
        assert_eq!(Money::from_cents(i64::MAX).checked_multiply(2), None);
    }

    #[test]
    fn test_money_sign_helpers() {
        assert!(Money::from_cents(100).is_positive());
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(100).negate().is_negative());
    }

    #[test]
    fn test_money_serializes_as_cents() {
        let json = serde_json::to_string(&Money::from_cents(999)).unwrap();
        assert_eq!(json, "999");
    }
}
