//! Exact numbers
//!
//! Nickel numbers are arbitrary precision rationals. A [`Number`] is a
//! host-owned copy, so it stays valid after the expression it came from is
//! dropped and can cross threads.

use std::fmt;
use std::str::FromStr;

use nickel_lang_sys as sys;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};

use crate::handle::{Owned, StringRes};

/// An exact rational number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Number {
    value: BigRational,
}

impl Number {
    /// Copy a number out of the engine.
    ///
    /// # Safety
    ///
    /// `num` must be null or point to a live engine number.
    pub(crate) unsafe fn from_raw(num: *const sys::nickel_number) -> Option<Self> {
        if num.is_null() {
            return None;
        }
        let numerator = Owned::<StringRes>::new();
        let denominator = Owned::<StringRes>::new();
        sys::nickel_number_as_rational(num, numerator.as_ptr(), denominator.as_ptr());

        let numer = BigInt::from_str(&numerator.to_string_lossy()).ok()?;
        let denom = BigInt::from_str(&denominator.to_string_lossy()).ok()?;
        if denom.is_zero() {
            return None;
        }
        Some(Self {
            value: BigRational::new(numer, denom),
        })
    }

    /// The numerator in lowest terms.
    pub fn numerator(&self) -> &BigInt {
        self.value.numer()
    }

    /// The denominator in lowest terms, always positive.
    pub fn denominator(&self) -> &BigInt {
        self.value.denom()
    }

    /// The exact value.
    pub fn as_rational(&self) -> &BigRational {
        &self.value
    }

    /// Is this an integer?
    pub fn is_integer(&self) -> bool {
        self.value.denom().is_one()
    }

    /// The value as `i64`, if it is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        if self.is_integer() {
            self.value.numer().to_i64()
        } else {
            None
        }
    }

    /// The value rounded to the nearest `f64`.
    pub fn as_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(f64::NAN)
    }
}

impl From<BigRational> for Number {
    fn from(value: BigRational) -> Self {
        Self { value }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Self {
            value: BigRational::from_integer(BigInt::from(value)),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integer() {
            write!(f, "{}", self.value.numer())
        } else {
            write!(f, "{}/{}", self.value.numer(), self.value.denom())
        }
    }
}
