use crate::error::{StoreError, StoreResult};
use rust_decimal::Decimal;
use std::fmt;

/// Declared `NUMERIC(precision, scale)` of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    pub precision: u32,
    pub scale: u32,
}

impl Numeric {
    pub const fn new(precision: u32, scale: u32) -> Self {
        Self { precision, scale }
    }

    /// Brings `value` onto this column's grid.
    ///
    /// Extra fractional digits are truncated toward zero. Integral digits are never dropped: a
    /// value that needs more than `precision - scale` of them is rejected.
    pub fn fit(self, field: &'static str, value: Decimal) -> StoreResult<Decimal> {
        let truncated = value.trunc_with_scale(self.scale);
        if truncated.abs() >= self.integral_bound() {
            return Err(StoreError::PrecisionOverflow {
                field,
                value,
                precision: self.precision,
                scale: self.scale,
            });
        }
        Ok(truncated)
    }

    pub fn fit_opt(self, field: &'static str, value: Option<Decimal>) -> StoreResult<Option<Decimal>> {
        value.map(|v| self.fit(field, v)).transpose()
    }

    fn integral_bound(self) -> Decimal {
        let digits = self.precision.saturating_sub(self.scale);
        Decimal::from_i128_with_scale(10i128.pow(digits), 0)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NUMERIC({}, {})", self.precision, self.scale)
    }
}

/// Rejects percentile scores outside [0, 100].
pub(crate) fn check_percentile(field: &'static str, value: Option<Decimal>) -> StoreResult<()> {
    if let Some(v) = value {
        if v < Decimal::ZERO || v > Decimal::ONE_HUNDRED {
            return Err(StoreError::OutOfRange {
                field,
                value: v,
                bounds: "[0, 100]",
            });
        }
    }
    Ok(())
}
