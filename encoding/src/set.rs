//! Set union and intersection over `[min, max]`.

use crate::Error;

/// Indicator vector of the values present in `values`.
pub fn membership(values: &[i64], min: i64, max: i64) -> Result<Vec<bool>, Error> {
    if min > max {
        return Err(Error::InvalidDomain(min, max));
    }
    let mut bits = vec![false; (max as i128 - min as i128 + 1) as usize];
    for value in values {
        if *value < min || *value > max {
            return Err(Error::OutOfDomain(*value, min, max));
        }
        bits[(*value as i128 - min as i128) as usize] = true;
    }
    Ok(bits)
}

/// Values whose reduced bit is set.
pub fn decode(bits: &[bool], min: i64) -> Vec<i64> {
    bits.iter()
        .enumerate()
        .filter(|(_, bit)| **bit)
        .map(|(k, _)| min + k as i64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let bits = membership(&[-1, 2, 2], -1, 2).unwrap();
        assert_eq!(bits, vec![true, false, false, true]);
        assert_eq!(decode(&bits, -1), vec![-1, 2]);
        assert_eq!(membership(&[3], -1, 2), Err(Error::OutOfDomain(3, -1, 2)));
    }
}
