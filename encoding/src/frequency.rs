//! Histogram of an attribute over `[min, max]`.

use crate::{bounded, Error};

/// Returns one slot per value of the domain holding its number of occurrences.
pub fn encode(values: &[i64], min: i64, max: i64) -> Result<Vec<i64>, Error> {
    if min > max {
        return Err(Error::InvalidDomain(min, max));
    }
    let mut counts = vec![0i128; (max as i128 - min as i128 + 1) as usize];
    for value in values {
        if *value < min || *value > max {
            return Err(Error::OutOfDomain(*value, min, max));
        }
        counts[(*value as i128 - min as i128) as usize] += 1;
    }
    counts.into_iter().map(bounded).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(encode(&[0, 0, 0], 0, 3).unwrap(), vec![3, 0, 0, 0]);
        assert_eq!(encode(&[3, 3], 0, 3).unwrap(), vec![0, 0, 0, 2]);
    }

    #[test]
    fn test_out_of_domain() {
        assert_eq!(encode(&[4], 0, 3), Err(Error::OutOfDomain(4, 0, 3)));
        assert_eq!(encode(&[], 1, 0), Err(Error::InvalidDomain(1, 0)));
    }
}
