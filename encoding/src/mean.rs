//! Mean of an attribute.

use crate::{bounded, Error};

/// Returns `[sum(v), n]`.
pub fn encode(values: &[i64]) -> Result<Vec<i64>, Error> {
    let sum: i128 = values.iter().map(|v| *v as i128).sum();
    Ok(vec![bounded(sum)?, bounded(values.len() as i128)?])
}

/// Returns `s0 / s1`.
pub fn decode(slots: &[i64]) -> Result<f64, Error> {
    if slots[1] == 0 {
        return Err(Error::EmptyAggregate);
    }
    Ok(slots[0] as f64 / slots[1] as f64)
}
