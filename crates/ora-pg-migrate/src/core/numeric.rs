//! Exact decimal numbers in digit form.
//!
//! Oracle `NUMBER` holds up to 38 significant digits and PostgreSQL
//! `numeric` far more, while [`Decimal`] stops at 28. Values are parsed into
//! [`DecimalText`] first; the ones that fit become [`SqlValue::Decimal`] and
//! the rest travel as [`SqlValue::WideDecimal`] text.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::SqlValue;

/// Significant digits [`Decimal`] always holds exactly.
pub const DECIMAL_MAX_DIGITS: usize = 28;

/// Sign, integer digits and fraction digits of an exact decimal.
///
/// The integer part has no leading zeros and the fraction no trailing zeros
/// unless a scale was applied with [`DecimalText::fit`]. Zero is never negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalText {
    negative: bool,
    integer: String,
    fraction: String,
}

impl DecimalText {
    /// Parse plain or scientific notation (`-12.5`, `.5`, `1.2E+40`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, unsigned) = match s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (mantissa, exponent) = match unsigned.find(|c| c == 'e' || c == 'E') {
            Some(i) => (&unsigned[..i], unsigned[i + 1..].parse::<i32>().ok()?),
            None => (unsigned, 0),
        };
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        // a runaway exponent would allocate without bound
        if exponent.unsigned_abs() > 1000 {
            return None;
        }

        let digits = format!("{}{}", int_part, frac_part);
        let point = int_part.len() as i64 + i64::from(exponent);
        let (integer, fraction) = if point <= 0 {
            (String::new(), format!("{}{}", "0".repeat(point.unsigned_abs() as usize), digits))
        } else if point as usize >= digits.len() {
            (format!("{}{}", digits, "0".repeat(point as usize - digits.len())), String::new())
        } else {
            let (i, f) = digits.split_at(point as usize);
            (i.to_string(), f.to_string())
        };
        Some(Self::normalized(negative, &integer, &fraction))
    }

    fn normalized(negative: bool, integer: &str, fraction: &str) -> Self {
        let integer = integer.trim_start_matches('0').to_string();
        let fraction = fraction.trim_end_matches('0').to_string();
        let zero = integer.is_empty() && fraction.is_empty();
        Self {
            negative: negative && !zero,
            integer,
            fraction,
        }
    }

    pub fn from_decimal(d: &Decimal) -> Self {
        // Decimal's Display is plain notation
        Self::parse(&d.to_string()).unwrap_or_else(|| Self::normalized(false, "", ""))
    }

    pub fn integer_digits(&self) -> usize {
        self.integer.len()
    }

    pub fn fraction_digits(&self) -> usize {
        self.fraction.trim_end_matches('0').len()
    }

    /// Fit into numeric(precision, scale): pad the fraction to `scale` and
    /// reject anything that would lose digits.
    pub fn fit(mut self, precision: u32, scale: u32) -> std::result::Result<Self, String> {
        let scale = scale as usize;
        if self.fraction_digits() > scale {
            return Err(format!("{} has more than {} fractional digits", self, scale));
        }
        if self.integer_digits() + scale > precision as usize {
            return Err(format!("{} does not fit numeric({},{})", self, precision, scale));
        }
        self.fraction.truncate(self.fraction_digits());
        self.fraction.push_str(&"0".repeat(scale - self.fraction.len()));
        Ok(self)
    }

    /// The narrowest exact [`SqlValue`]: a [`Decimal`] when it holds every
    /// digit, otherwise the digit text.
    pub fn into_value(self) -> SqlValue {
        if self.integer.len() + self.fraction.len() <= DECIMAL_MAX_DIGITS {
            if let Ok(d) = Decimal::from_str(&self.to_string()) {
                return SqlValue::Decimal(d);
            }
        }
        SqlValue::WideDecimal(self.to_string())
    }

    /// Numeric comparison; trailing fraction zeros do not matter.
    pub fn cmp_value(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => return Ordering::Greater,
            (true, false) => return Ordering::Less,
            _ => {}
        }
        let magnitude = self
            .integer
            .len()
            .cmp(&other.integer.len())
            .then_with(|| self.integer.cmp(&other.integer))
            .then_with(|| {
                self.fraction
                    .trim_end_matches('0')
                    .cmp(other.fraction.trim_end_matches('0'))
            });
        if self.negative {
            magnitude.reverse()
        } else {
            magnitude
        }
    }
}

impl fmt::Display for DecimalText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        if self.integer.is_empty() {
            f.write_str("0")?;
        } else {
            f.write_str(&self.integer)?;
        }
        if !self.fraction.is_empty() {
            write!(f, ".{}", self.fraction)?;
        }
        Ok(())
    }
}
