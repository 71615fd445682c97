//! Fixed-point money and rate types.
//!
//! All money amounts use a 1e-6 (micros) fixed-point representation stored
//! as `i64`. Share quantities and day counts stay plain `i64` and are never
//! implicitly convertible.
//!
//! - [`Micros`]: a monetary amount (1 rupee = `Micros(1_000_000)`).
//! - [`RatePct`]: a percentage at the same scale (10% = `RatePct(10_000_000)`).
//!
//! Decimal strings are parsed deterministically: no floats, at most six
//! fractional digits (more would need rounding and is rejected).

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Scale of both [`Micros`] and [`RatePct`].
pub const MICROS_SCALE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Micros newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-6 scale.
///
/// There is no `From<i64>`; use [`Micros::new`] or [`Micros::from_units`]
/// so that raw integers only become money deliberately.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Micros(i64);

impl Micros {
    pub const ZERO: Micros = Micros(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Whole currency units (`from_units(10)` = 10.000000).
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Micros(units * MICROS_SCALE)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn checked_add(self, rhs: Micros) -> Option<Micros> {
        self.0.checked_add(rhs.0).map(Micros)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Micros) -> Option<Micros> {
        self.0.checked_sub(rhs.0).map(Micros)
    }

    /// Multiply a per-unit price by a share quantity.
    ///
    /// `None` on overflow; trade value overflow is an input error, never a
    /// routine saturation.
    #[inline]
    pub fn checked_mul_qty(self, qty: i64) -> Option<Micros> {
        self.0.checked_mul(qty).map(Micros)
    }

    /// Parse a non-negative decimal string ("10", "10.5", "+0.000001").
    pub fn parse(s: &str) -> Result<Micros, String> {
        parse_decimal_micros(s).map(Micros)
    }
}

// Operators saturate at the i64 bounds.
impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        self.saturating_add(rhs)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Micros {
    type Output = Micros;
    #[inline]
    fn neg(self) -> Micros {
        Micros(self.0.saturating_neg())
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        *self = *self + rhs;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for Micros {
    fn sum<I: Iterator<Item = Micros>>(iter: I) -> Micros {
        iter.fold(Micros::ZERO, |acc, m| acc + m)
    }
}

impl std::fmt::Display for Micros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_scaled(f, self.0)
    }
}

// ---------------------------------------------------------------------------
// RatePct newtype
// ---------------------------------------------------------------------------

/// A percentage at 1e-6 scale: `RatePct::parse("10")` is ten percent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatePct(i64);

impl RatePct {
    pub const ZERO: RatePct = RatePct(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        RatePct(raw)
    }

    #[inline]
    pub const fn from_percent(pct: i64) -> Self {
        RatePct(pct * MICROS_SCALE)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn parse(s: &str) -> Result<RatePct, String> {
        parse_decimal_micros(s).map(RatePct)
    }
}

impl std::fmt::Display for RatePct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_scaled(f, self.0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_scaled(f: &mut std::fmt::Formatter<'_>, raw: i64) -> std::fmt::Result {
    let units = raw / MICROS_SCALE;
    let frac = (raw % MICROS_SCALE).abs();
    // -0.5 truncates to units == 0; keep the sign.
    if raw < 0 && units == 0 {
        write!(f, "-{units}.{frac:06}")
    } else {
        write!(f, "{units}.{frac:06}")
    }
}

/// Parse a decimal string into integer micros.
/// Accepts an optional `+`. Rejects negatives and more than 6 decimals.
fn parse_decimal_micros(s: &str) -> Result<i64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty decimal".to_string());
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        return Err(format!("negative value not allowed: {s}"));
    }

    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    if parts.next().is_some() {
        return Err(format!("invalid decimal format: {s}"));
    }

    if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid integer part: {s}"));
    }
    let int_val: i64 = int_part
        .parse()
        .map_err(|e| format!("parse integer part {int_part:?}: {e}"))?;

    let frac_val = match frac_part {
        None | Some("") => 0_i64,
        Some(frac) => {
            if !frac.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("invalid fractional part: {s}"));
            }
            if frac.len() > 6 {
                return Err(format!("too many decimals: {s}"));
            }
            let padded = format!("{frac:0<6}");
            padded
                .parse::<i64>()
                .map_err(|e| format!("parse fractional part {frac:?}: {e}"))?
        }
    };

    int_val
        .checked_mul(MICROS_SCALE)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| format!("decimal overflow: {s}"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
