//! Sum of an attribute.

use crate::{bounded, Error};

/// Returns the single slot `[sum(v)]`.
pub fn encode(values: &[i64]) -> Result<Vec<i64>, Error> {
    let sum: i128 = values.iter().map(|v| *v as i128).sum();
    Ok(vec![bounded(sum)?])
}

/// Returns the aggregated sum.
pub fn decode(slots: &[i64]) -> i64 {
    slots[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        assert_eq!(encode(&[2, 3, 5]).unwrap(), vec![10]);
        assert_eq!(encode(&[]).unwrap(), vec![0]);
        assert!(encode(&[i64::MAX, i64::MAX]).is_err());
    }
}
