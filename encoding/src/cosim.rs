//! Cosine similarity of two attributes.

use crate::{bounded, Error};

/// Returns `[sum(v), sum(w), sum(v^2), sum(w^2), sum(v*w)]`.
pub fn encode(v: &[i64], w: &[i64]) -> Result<Vec<i64>, Error> {
    if v.len() != w.len() {
        return Err(Error::ColumnMismatch);
    }
    let mut sums = [0i128; 5];
    for (a, b) in v.iter().zip(w) {
        let (a, b) = (*a as i128, *b as i128);
        sums[0] += a;
        sums[1] += b;
        sums[2] += a * a;
        sums[3] += b * b;
        sums[4] += a * b;
    }
    sums.into_iter().map(bounded).collect()
}

/// Returns `s4 / sqrt(s2 * s3)`.
pub fn decode(slots: &[i64]) -> Result<f64, Error> {
    let norms = (slots[2] as f64 * slots[3] as f64).sqrt();
    if norms == 0.0 {
        return Err(Error::EmptyAggregate);
    }
    Ok(slots[4] as f64 / norms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orthogonal() {
        let slots = encode(&[1, 0], &[0, 1]).unwrap();
        assert_eq!(decode(&slots).unwrap(), 0.0);
    }

    #[test]
    fn test_mismatch() {
        assert_eq!(encode(&[1], &[]), Err(Error::ColumnMismatch));
        assert_eq!(decode(&[0, 0, 0, 0, 0]), Err(Error::EmptyAggregate));
    }
}
