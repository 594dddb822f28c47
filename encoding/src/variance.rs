//! Variance of an attribute.

use crate::{bounded, Error};

/// Returns `[sum(v), n, sum(v^2)]`.
pub fn encode(values: &[i64]) -> Result<Vec<i64>, Error> {
    let sum: i128 = values.iter().map(|v| *v as i128).sum();
    let squares: i128 = values.iter().map(|v| (*v as i128) * (*v as i128)).sum();
    Ok(vec![
        bounded(sum)?,
        bounded(values.len() as i128)?,
        bounded(squares)?,
    ])
}

/// Returns the population variance `s2/s1 - (s0/s1)^2`.
pub fn decode(slots: &[i64]) -> Result<f64, Error> {
    if slots[1] == 0 {
        return Err(Error::EmptyAggregate);
    }
    let n = slots[1] as f64;
    let mean = slots[0] as f64 / n;
    Ok(slots[2] as f64 / n - mean * mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variance() {
        let slots = encode(&[2, 4, 4, 4, 5, 5, 7, 9]).unwrap();
        assert_eq!(slots, vec![40, 8, 232]);
        assert_eq!(decode(&slots).unwrap(), 4.0);
    }

    #[test]
    fn test_constant_input() {
        assert_eq!(decode(&encode(&[3, 3, 3]).unwrap()).unwrap(), 0.0);
    }
}
