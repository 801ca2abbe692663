use std::{fmt, ops, str::FromStr};

/// A Kubernetes resource quantity, held as signed milli-units.
///
/// Values finer than a milli-unit are rounded up, as the API server does.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i128);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("invalid quantity: {0:?}")]
    Invalid(String),

    #[error("quantity out of range: {0:?}")]
    Overflow(String),
}

// === impl Quantity ===

impl Quantity {
    pub const ZERO: Self = Self(0);

    pub const fn from_millis(millis: i128) -> Self {
        Self(millis)
    }

    pub const fn from_units(units: i64) -> Self {
        Self(units as i128 * 1000)
    }

    pub const fn millis(self) -> i128 {
        self.0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Subtracts, never going below zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0).max(0))
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Converts a JSON value (a number or a quantity string).
    pub fn from_json(value: &serde_json::Value) -> Result<Self, QuantityError> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::from_units(i)),
                None => n.to_string().parse(),
            },
            serde_json::Value::String(s) => s.parse(),
            other => Err(QuantityError::Invalid(other.to_string())),
        }
    }
}

impl ops::Add for Quantity {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, q| acc + q)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QuantityError::Invalid(s.to_string());
        let overflow = || QuantityError::Overflow(s.to_string());

        let trimmed = s.trim();
        let (negative, rest) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let split = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(split);
        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.contains('.') {
            return Err(invalid());
        }

        let digits = format!("{whole}{frac}");
        let digits = digits.trim_start_matches('0');
        if digits.len() > 30 {
            return Err(overflow());
        }
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid())?
        };

        let (pow10, pow2) = match suffix {
            "" => (0, 0),
            "n" => (-9, 0),
            "u" => (-6, 0),
            "m" => (-3, 0),
            "k" => (3, 0),
            "M" => (6, 0),
            "G" => (9, 0),
            "T" => (12, 0),
            "P" => (15, 0),
            "E" => (18, 0),
            "Ki" => (0, 10),
            "Mi" => (0, 20),
            "Gi" => (0, 30),
            "Ti" => (0, 40),
            "Pi" => (0, 50),
            "Ei" => (0, 60),
            exp if exp.starts_with(['e', 'E']) => {
                (exp[1..].parse::<i32>().map_err(|_| invalid())?, 0)
            }
            _ => return Err(invalid()),
        };

        let scaled = mantissa.checked_mul(1i128 << pow2).ok_or_else(overflow)?;
        let exp10 = pow10 + 3 - frac.len() as i32;
        let millis = if exp10 >= 0 {
            let factor = 10i128.checked_pow(exp10 as u32).ok_or_else(overflow)?;
            scaled.checked_mul(factor).ok_or_else(overflow)?
        } else {
            match 10i128.checked_pow(exp10.unsigned_abs()) {
                Some(divisor) => scaled / divisor + i128::from(scaled % divisor != 0),
                // Far below a milli-unit: any non-zero value rounds up to one.
                None => i128::from(scaled > 0),
            }
        };

        Ok(Self(if negative { -millis } else { millis }))
    }
}

/// The hard limit for one namespace of a quota shared by every namespace of
/// a tenant: the namespace may grow by what the tenant has left, and is
/// frozen at its usage once the tenant is exhausted.
pub fn tenant_scoped_hard(
    tenant_hard: Quantity,
    tenant_used: Quantity,
    namespace_used: Quantity,
) -> Quantity {
    namespace_used + tenant_hard.saturating_sub(tenant_used)
}
