//! Quality of a binary classifier over labelled records.
//!
//! Labels and predicted classes are `0` or `1`, with `1` the positive class.

use crate::Error;

#[derive(Default)]
struct Confusion {
    tp: usize,
    tn: usize,
    fp: usize,
    fn_: usize,
}

impl Confusion {
    fn new(predicted: &[i64], actual: &[i64]) -> Result<Self, Error> {
        if predicted.len() != actual.len() {
            return Err(Error::ColumnMismatch);
        }
        if actual.is_empty() {
            return Err(Error::EmptyAggregate);
        }
        let mut confusion = Self::default();
        for (predicted, actual) in predicted.iter().zip(actual) {
            match (*predicted == 1, *actual == 1) {
                (true, true) => confusion.tp += 1,
                (false, false) => confusion.tn += 1,
                (true, false) => confusion.fp += 1,
                (false, true) => confusion.fn_ += 1,
            }
        }
        Ok(confusion)
    }
}

fn ratio(numerator: usize, denominator: usize) -> Result<f64, Error> {
    if denominator == 0 {
        return Err(Error::EmptyAggregate);
    }
    Ok(numerator as f64 / denominator as f64)
}

/// Fraction of correctly classified records.
pub fn accuracy(predicted: &[i64], actual: &[i64]) -> Result<f64, Error> {
    let c = Confusion::new(predicted, actual)?;
    ratio(c.tp + c.tn, actual.len())
}

/// Fraction of positive predictions that are correct.
pub fn precision(predicted: &[i64], actual: &[i64]) -> Result<f64, Error> {
    let c = Confusion::new(predicted, actual)?;
    ratio(c.tp, c.tp + c.fp)
}

/// Fraction of positive records predicted as such.
pub fn recall(predicted: &[i64], actual: &[i64]) -> Result<f64, Error> {
    let c = Confusion::new(predicted, actual)?;
    ratio(c.tp, c.tp + c.fn_)
}

/// Harmonic mean of [precision] and [recall].
pub fn fscore(predicted: &[i64], actual: &[i64]) -> Result<f64, Error> {
    let (p, r) = (precision(predicted, actual)?, recall(predicted, actual)?);
    if p + r == 0.0 {
        return Err(Error::EmptyAggregate);
    }
    Ok(2.0 * p * r / (p + r))
}

/// Points of the ROC curve of the scores `predicted`, as true and false positive
/// rates.
///
/// Every distinct score is a cutoff, from the highest down: records scoring at
/// least the cutoff are classified positive. The curve starts at `(0, 0)` and ends
/// at `(1, 1)`.
pub fn roc(predicted: &[f64], actual: &[i64]) -> Result<(Vec<f64>, Vec<f64>), Error> {
    if predicted.len() != actual.len() {
        return Err(Error::ColumnMismatch);
    }
    let positives = actual.iter().filter(|label| **label == 1).count();
    let negatives = actual.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(Error::EmptyAggregate);
    }
    let mut order: Vec<usize> = (0..predicted.len()).collect();
    order.sort_by(|a, b| predicted[*b].total_cmp(&predicted[*a]));

    let (mut tpr, mut fpr) = (vec![0.0], vec![0.0]);
    let (mut tp, mut fp) = (0usize, 0usize);
    for (position, index) in order.iter().enumerate() {
        if actual[*index] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        // Ties share a single point
        let next = order.get(position + 1).map(|next| predicted[*next]);
        if next != Some(predicted[*index]) {
            tpr.push(tp as f64 / positives as f64);
            fpr.push(fp as f64 / negatives as f64);
        }
    }
    Ok((tpr, fpr))
}

/// Area under the [roc] curve, by the trapezoidal rule.
pub fn area_under_curve(predicted: &[f64], actual: &[i64]) -> Result<f64, Error> {
    let (tpr, fpr) = roc(predicted, actual)?;
    Ok(tpr
        .windows(2)
        .zip(fpr.windows(2))
        .map(|(t, f)| (f[1] - f[0]) * (t[0] + t[1]) / 2.0)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREDICTED: [i64; 8] = [1, 1, 1, 0, 0, 0, 1, 0];
    const ACTUAL: [i64; 8] = [1, 1, 0, 0, 0, 1, 1, 0];

    #[test]
    fn test_scores() {
        // tp = 3, tn = 3, fp = 1, fn = 1
        assert_eq!(accuracy(&PREDICTED, &ACTUAL), Ok(0.75));
        assert_eq!(precision(&PREDICTED, &ACTUAL), Ok(0.75));
        assert_eq!(recall(&PREDICTED, &ACTUAL), Ok(0.75));
        assert!((fscore(&PREDICTED, &ACTUAL).unwrap() - 0.75).abs() < 1e-12);

        let predicted = [1, 1, 0, 0];
        let actual = [1, 0, 0, 1];
        assert_eq!(precision(&predicted, &actual), Ok(0.5));
        assert_eq!(recall(&predicted, &actual), Ok(0.5));
    }

    #[test]
    fn test_degenerate_scores() {
        assert_eq!(accuracy(&[1], &[1, 0]), Err(Error::ColumnMismatch));
        assert_eq!(accuracy(&[], &[]), Err(Error::EmptyAggregate));
        // No positive prediction
        assert_eq!(precision(&[0, 0], &[1, 0]), Err(Error::EmptyAggregate));
        assert_eq!(fscore(&[0, 1], &[1, 0]), Err(Error::EmptyAggregate));
    }

    #[test]
    fn test_roc() {
        let scores = [0.9, 0.8, 0.4, 0.4, 0.1];
        let labels = [1, 0, 1, 0, 0];
        let (tpr, fpr) = roc(&scores, &labels).unwrap();
        assert_eq!(tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
        assert_eq!(fpr, vec![0.0, 0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]);

        assert_eq!(roc(&[0.5], &[1]), Err(Error::EmptyAggregate));
    }

    #[test]
    fn test_area_under_curve() {
        // Perfect separation
        let labels = [0, 0, 1, 1];
        assert_eq!(area_under_curve(&[0.1, 0.2, 0.8, 0.9], &labels), Ok(1.0));
        // Inverted scores
        assert_eq!(area_under_curve(&[0.9, 0.8, 0.2, 0.1], &labels), Ok(0.0));
        // Constant scores sit on the diagonal
        assert_eq!(area_under_curve(&[0.5; 4], &labels), Ok(0.5));

        let scores = [0.9, 0.8, 0.4, 0.4, 0.1];
        let auc = area_under_curve(&scores, &[1, 0, 1, 0, 0]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }
}
