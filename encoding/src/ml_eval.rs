//! Coefficient of determination of a model over local labels and predictions.

use crate::{bounded, Error};

/// Returns `[n, sum(y), sum(y^2), sum((pred - y)^2)]`.
pub fn encode(y: &[i64], predictions: &[i64]) -> Result<Vec<i64>, Error> {
    if y.len() != predictions.len() {
        return Err(Error::ColumnMismatch);
    }
    let mut sums = [y.len() as i128, 0, 0, 0];
    for (label, prediction) in y.iter().zip(predictions) {
        let (label, prediction) = (*label as i128, *prediction as i128);
        sums[1] += label;
        sums[2] += label * label;
        sums[3] += (prediction - label) * (prediction - label);
    }
    sums.into_iter().map(bounded).collect()
}

/// Returns `1 - s3 / (s2 - s1^2 / s0)`.
pub fn decode(slots: &[i64]) -> Result<f64, Error> {
    if slots[0] == 0 {
        return Err(Error::EmptyAggregate);
    }
    let (n, sum, squares, residuals) = (
        slots[0] as f64,
        slots[1] as f64,
        slots[2] as f64,
        slots[3] as f64,
    );
    let total = squares - sum * sum / n;
    if total == 0.0 {
        return Err(Error::EmptyAggregate);
    }
    Ok(1.0 - residuals / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_model() {
        let slots = encode(&[1, 2, 3], &[1, 2, 3]).unwrap();
        assert_eq!(slots, vec![3, 6, 14, 0]);
        assert_eq!(decode(&slots).unwrap(), 1.0);
    }

    #[test]
    fn test_mean_model() {
        // Predicting the mean everywhere explains nothing
        let slots = encode(&[1, 2, 3], &[2, 2, 2]).unwrap();
        assert!(decode(&slots).unwrap().abs() < 1e-12);
    }
}
