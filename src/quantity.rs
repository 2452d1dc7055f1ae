//! Kubernetes resource-quantity parsing.
//!
//! Parses the serialized form of a quantity (`100m`, `2`, `1.5`, `64Mi`,
//! `1Gi`, `128974848`, `12e6`) and converts it to integer units. CPU
//! requests are reported in milli-units, memory requests in bytes. A value
//! that does not convert exactly to an integer is truncated toward zero;
//! truncation is the documented policy, not rounding.

use std::fmt;

/// Error raised for a malformed quantity string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid quantity {input:?}: {reason}")]
pub struct QuantityError {
    input: String,
    reason: &'static str,
}

impl QuantityError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// A parsed resource quantity.
///
/// Held exactly as `mantissa * 2^exp2 * 10^exp10` so that binary suffixes
/// (`Ki`..`Ei`), decimal suffixes (`k`..`E`, `m`) and decimal exponents
/// (`e6`) all convert without floating-point error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    mantissa: i128,
    exp10: i32,
    exp2: u32,
}

impl Quantity {
    /// Parse the canonical Kubernetes serialization of a quantity.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::new(input, "empty"));
        }

        let (negative, rest) = match s.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let split = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(split);
        if number.is_empty() {
            return Err(QuantityError::new(input, "missing digits"));
        }

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => {
                if f.contains('.') {
                    return Err(QuantityError::new(input, "multiple decimal points"));
                }
                (i, f)
            }
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::new(input, "missing digits"));
        }

        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);
        if digits.len() > 30 {
            return Err(QuantityError::new(input, "too many digits"));
        }
        let mut mantissa: i128 = digits
            .parse()
            .map_err(|_| QuantityError::new(input, "unparsable digits"))?;
        if negative {
            mantissa = -mantissa;
        }

        let mut exp10 = -(frac_part.len() as i32);
        let mut exp2 = 0u32;

        match suffix {
            "" => {}
            "m" => exp10 -= 3,
            "k" => exp10 += 3,
            "M" => exp10 += 6,
            "G" => exp10 += 9,
            "T" => exp10 += 12,
            "P" => exp10 += 15,
            "E" => exp10 += 18,
            "Ki" => exp2 = 10,
            "Mi" => exp2 = 20,
            "Gi" => exp2 = 30,
            "Ti" => exp2 = 40,
            "Pi" => exp2 = 50,
            "Ei" => exp2 = 60,
            _ => {
                // Decimal exponent form, e.g. `12e6` or `1E3`.
                let exp = suffix
                    .strip_prefix(['e', 'E'])
                    .and_then(|e| e.parse::<i32>().ok())
                    .ok_or_else(|| QuantityError::new(input, "unknown suffix"))?;
                if exp.unsigned_abs() > 30 {
                    return Err(QuantityError::new(input, "exponent out of range"));
                }
                exp10 += exp;
            }
        }

        Ok(Self {
            mantissa,
            exp10,
            exp2,
        })
    }

    /// The quantity in whole base units, truncated toward zero.
    ///
    /// Memory quantities convert to bytes: `64Mi` is 67108864.
    pub fn whole_units(&self) -> i64 {
        self.scaled(0)
    }

    /// The quantity in milli-units, truncated toward zero.
    ///
    /// CPU quantities convert to millicores: `100m` is 100, `1.5` is 1500.
    pub fn milli_units(&self) -> i64 {
        self.scaled(3)
    }

    /// Scale by `10^extra_exp10` and truncate. Saturates on overflow.
    fn scaled(&self, extra_exp10: i32) -> i64 {
        let mut value = self.mantissa;
        for _ in 0..self.exp2 {
            value = match value.checked_mul(2) {
                Some(v) => v,
                None => return saturate(self.mantissa),
            };
        }
        let exp10 = self.exp10 + extra_exp10;
        if exp10 >= 0 {
            for _ in 0..exp10 {
                value = match value.checked_mul(10) {
                    Some(v) => v,
                    None => return saturate(self.mantissa),
                };
            }
        } else {
            for _ in 0..(-exp10) {
                // i128 division truncates toward zero, which is the policy.
                value /= 10;
            }
        }
        value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

fn saturate(mantissa: i128) -> i64 {
    if mantissa.is_negative() {
        i64::MIN
    } else {
        i64::MAX
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x2^{}x10^{}",
            self.mantissa, self.exp2, self.exp10
        )
    }
}
