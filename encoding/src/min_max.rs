//! Global minimum and maximum over `[min, max]`.
//!
//! Slot `k` of the minimum is the OR-bit of `min + k >= local_min`: after the OR
//! reduction the first set slot is the global minimum. The maximum uses the AND-bit
//! of `min + k >= local_max`, whose first set slot after the AND reduction is the
//! global maximum.

use crate::Error;

/// Checks that every value lies in `[min, max]`.
fn check(values: &[i64], min: i64, max: i64) -> Result<(), Error> {
    if min > max {
        return Err(Error::InvalidDomain(min, max));
    }
    match values.iter().find(|value| **value < min || **value > max) {
        Some(value) => Err(Error::OutOfDomain(*value, min, max)),
        None => Ok(()),
    }
}

/// Bits of the minimum encoding. An empty input sets no bit.
pub fn min_bits(values: &[i64], min: i64, max: i64) -> Result<Vec<bool>, Error> {
    check(values, min, max)?;
    let local = values.iter().min();
    Ok((min..=max)
        .map(|v| local.map(|local| v >= *local).unwrap_or(false))
        .collect())
}

/// Bits of the maximum encoding. An empty input sets every bit.
pub fn max_bits(values: &[i64], min: i64, max: i64) -> Result<Vec<bool>, Error> {
    check(values, min, max)?;
    let local = values.iter().max();
    Ok((min..=max)
        .map(|v| local.map(|local| v >= *local).unwrap_or(true))
        .collect())
}

/// Returns `min + k` for the first set reduced bit `k`.
pub fn decode(bits: &[bool], min: i64) -> Result<i64, Error> {
    bits.iter()
        .position(|bit| *bit)
        .map(|k| min + k as i64)
        .ok_or(Error::EmptyAggregate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_input() {
        let values = [4, 4, 4];
        assert_eq!(decode(&min_bits(&values, 0, 10).unwrap(), 0).unwrap(), 4);
        assert_eq!(decode(&max_bits(&values, 0, 10).unwrap(), 0).unwrap(), 4);
    }

    #[test]
    fn test_bits() {
        assert_eq!(min_bits(&[2, 3], 1, 4).unwrap(), vec![false, true, true, true]);
        assert_eq!(max_bits(&[2, 3], 1, 4).unwrap(), vec![false, false, true, true]);
        assert_eq!(min_bits(&[], 1, 2).unwrap(), vec![false, false]);
        assert_eq!(max_bits(&[], 1, 2).unwrap(), vec![true, true]);
    }

    #[test]
    fn test_out_of_domain() {
        assert_eq!(min_bits(&[-5, 3], 0, 10), Err(Error::OutOfDomain(-5, 0, 10)));
        assert_eq!(max_bits(&[3, 42], 0, 10), Err(Error::OutOfDomain(42, 0, 10)));
        assert_eq!(min_bits(&[0, 10], 0, 10).map(|bits| bits.len()), Ok(11));
        assert_eq!(max_bits(&[1], 2, 1), Err(Error::InvalidDomain(2, 1)));
    }

    #[test]
    fn test_no_bit_set() {
        assert_eq!(decode(&[false, false], 0), Err(Error::EmptyAggregate));
    }
}
