//! Logistic regression trained on aggregated approximation coefficients.
//!
//! The log-likelihood is replaced by a polynomial of degree `k` whose coefficients
//! only depend on sums over the records. For a standardised and augmented record
//! `x` (with `x_0 = 1`) and label `y`, level `j` holds one coefficient per tuple
//! `t` of `{0..d}^(j+1)`, in lexicographic order:
//!
//! `A_j[t] = (y - y*(-1)^(j+1) - 1) * prod(x_i for i in t)`
//!
//! Data providers scale the sum of their coefficients by `precision` and encrypt
//! them. The querier recovers the aggregated coefficients and minimizes the
//! approximated cost.

use crate::{bounded, Error};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use drynx_cryptography::{elgamal::decrypt, Ciphertext, DecryptionTable, Scalar};
use rayon::prelude::*;
use tracing::debug;

/// Minimum-area approximation of `log(1 + exp(-z))`.
pub const MIN_AREA_COEFFICIENTS: [f64; 3] = [-0.714761, -0.5, -0.0976419];

/// Largest number of features accepted on the wire.
pub const MAX_FEATURES: usize = 64;

/// Parameters of a logistic-regression query.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameters {
    /// Degree of the approximation.
    pub k: usize,
    pub lambda: f64,
    pub step: f64,
    pub max_iterations: usize,
    pub initial_weights: Vec<f64>,
    /// Scaling applied to the coefficients before encryption.
    pub precision: f64,
    /// Global means and standard deviations (local ones are used when empty).
    pub means: Vec<f64>,
    pub standard_deviations: Vec<f64>,
    /// Total number of records across all data providers.
    pub records: usize,
    pub features: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            k: 2,
            lambda: 1.0,
            step: 0.1,
            max_iterations: 25,
            initial_weights: Vec::new(),
            precision: 1e2,
            means: Vec::new(),
            standard_deviations: Vec::new(),
            records: 0,
            features: 0,
        }
    }
}

impl Parameters {
    /// Checks the consistency of the parameters.
    pub fn validate(&self) -> Result<(), Error> {
        if self.k == 0 || self.k >= MIN_AREA_COEFFICIENTS.len() {
            return Err(Error::InvalidParameters("unsupported approximation degree"));
        }
        if self.features == 0 || self.features > MAX_FEATURES {
            return Err(Error::InvalidParameters("invalid number of features"));
        }
        if !self.initial_weights.is_empty() && self.initial_weights.len() != self.features + 1 {
            return Err(Error::InvalidParameters("initial weights do not match features"));
        }
        if self.means.len() != self.standard_deviations.len()
            || (!self.means.is_empty() && self.means.len() != self.features)
        {
            return Err(Error::InvalidParameters("invalid standardisation parameters"));
        }
        if self.precision <= 0.0 || self.lambda <= 0.0 {
            return Err(Error::InvalidParameters("precision and lambda must be positive"));
        }
        Ok(())
    }
}

/// Number of coefficients of level `level` for `d` features.
pub fn level_len(d: usize, level: usize) -> usize {
    (d + 1).pow(level as u32 + 1)
}

/// Total number of coefficients for `d` features and degree `k`.
pub fn coefficient_count(d: usize, k: usize) -> usize {
    (0..k).map(|level| level_len(d, level)).sum()
}

/// All tuples of `{0..base}^len`, in lexicographic order.
pub fn tuples(base: usize, len: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::with_capacity(base.pow(len as u32));
    if base == 0 {
        return out;
    }
    let mut current = vec![0; len];
    loop {
        out.push(current.clone());
        // Increment from the last position
        let mut position = len;
        loop {
            if position == 0 {
                return out;
            }
            position -= 1;
            current[position] += 1;
            if current[position] < base {
                break;
            }
            current[position] = 0;
        }
    }
}

/// Approximation coefficients of one augmented record.
pub fn approximation_coefficients(x: &[f64], y: i64, k: usize) -> Vec<Vec<f64>> {
    (0..k)
        .map(|level| {
            let sign = if (level + 1) % 2 == 0 { 1 } else { -1 };
            let factor = (y - y * sign - 1) as f64;
            tuples(x.len(), level + 1)
                .iter()
                .map(|t| factor * t.iter().map(|i| x[*i]).product::<f64>())
                .collect()
        })
        .collect()
}

fn column_statistics(matrix: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let features = matrix.first().map(Vec::len).unwrap_or(0);
    let n = matrix.len() as f64;
    let means: Vec<f64> = (0..features)
        .map(|i| matrix.iter().map(|row| row[i]).sum::<f64>() / n)
        .collect();
    let deviations = (0..features)
        .map(|i| {
            let variance = matrix
                .iter()
                .map(|row| (row[i] - means[i]).powi(2))
                .sum::<f64>()
                / n;
            variance.sqrt()
        })
        .collect();
    (means, deviations)
}

/// Standardises every column with its own mean and (population) standard deviation.
pub fn standardise(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let (means, deviations) = column_statistics(matrix);
    standardise_with(matrix, &means, &deviations)
}

/// Standardises every column with the provided means and standard deviations.
///
/// Columns with a zero standard deviation are only centred.
pub fn standardise_with(matrix: &[Vec<f64>], means: &[f64], deviations: &[f64]) -> Vec<Vec<f64>> {
    matrix
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, v)| {
                    let centred = v - means[i];
                    if deviations[i] == 0.0 {
                        centred
                    } else {
                        centred / deviations[i]
                    }
                })
                .collect()
        })
        .collect()
}

/// Prepends the intercept column.
pub fn augment(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    matrix
        .iter()
        .map(|row| std::iter::once(1.0).chain(row.iter().copied()).collect())
        .collect()
}

/// Encodes the records of one data provider (label in column `features`).
pub fn encode(records: &[Vec<f64>], parameters: &Parameters) -> Result<Vec<i64>, Error> {
    parameters.validate()?;
    let d = parameters.features;
    let count = coefficient_count(d, parameters.k);
    if records.is_empty() {
        return Ok(vec![0; count]);
    }
    if records.iter().any(|record| record.len() != d + 1) {
        return Err(Error::ColumnMismatch);
    }

    let x: Vec<Vec<f64>> = records.iter().map(|record| record[..d].to_vec()).collect();
    let y: Vec<i64> = records.iter().map(|record| record[d].round() as i64).collect();
    let x = if parameters.means.is_empty() {
        standardise(&x)
    } else {
        standardise_with(&x, &parameters.means, &parameters.standard_deviations)
    };
    let x = augment(&x);

    // Sum the coefficients of every record, level by level (in record order)
    let per_record: Vec<Vec<Vec<f64>>> = x
        .par_iter()
        .zip(y.par_iter())
        .map(|(record, label)| approximation_coefficients(record, *label, parameters.k))
        .collect();
    let mut aggregated = vec![0.0; count];
    for levels in &per_record {
        for (slot, coefficient) in aggregated.iter_mut().zip(levels.iter().flatten()) {
            *slot += coefficient;
        }
    }
    debug!(records = records.len(), coefficients = count, "aggregated approximation");
    aggregated
        .into_iter()
        .map(|c| bounded((c * parameters.precision).round() as i128))
        .collect()
}

/// Splits packed coefficients into levels and removes the scaling.
pub fn unpack(slots: &[i64], d: usize, k: usize, precision: f64) -> Result<Vec<Vec<f64>>, Error> {
    let count = coefficient_count(d, k);
    if slots.len() != count {
        return Err(Error::SlotCount(count, slots.len()));
    }
    let mut offset = 0;
    Ok((0..k)
        .map(|level| {
            let len = level_len(d, level);
            let out = slots[offset..offset + len]
                .iter()
                .map(|v| *v as f64 / precision)
                .collect();
            offset += len;
            out
        })
        .collect())
}

/// Approximated cost of `weights`.
pub fn cost(weights: &[f64], coefficients: &[Vec<f64>], n: usize, lambda: f64) -> f64 {
    let n = n as f64;
    let mut total = 0.0;
    for (level, values) in coefficients.iter().enumerate() {
        let sum: f64 = tuples(weights.len(), level + 1)
            .iter()
            .zip(values)
            .map(|(t, a)| t.iter().map(|i| weights[*i]).product::<f64>() * a)
            .sum();
        total += MIN_AREA_COEFFICIENTS[level + 1] * sum;
    }
    let regularizer: f64 = weights.iter().skip(1).map(|w| w * w).sum();
    -MIN_AREA_COEFFICIENTS[0] + total / n + lambda / (2.0 * n) * regularizer
}

/// Gradient of [cost].
pub fn gradient(weights: &[f64], coefficients: &[Vec<f64>], n: usize, lambda: f64) -> Vec<f64> {
    let n = n as f64;
    (0..weights.len())
        .map(|index| {
            let mut derivative = 0.0;
            for (level, values) in coefficients.iter().enumerate() {
                let mut sum = 0.0;
                for (t, a) in tuples(weights.len(), level + 1).iter().zip(values) {
                    // d/dw_index of prod(w_t) = sum over occurrences of the other factors
                    for (position, i) in t.iter().enumerate() {
                        if *i != index {
                            continue;
                        }
                        let others: f64 = t
                            .iter()
                            .enumerate()
                            .filter(|(p, _)| *p != position)
                            .map(|(_, j)| weights[*j])
                            .product();
                        sum += others * a;
                    }
                }
                derivative += MIN_AREA_COEFFICIENTS[level + 1] * sum;
            }
            let mut value = derivative / n;
            if index >= 1 {
                value += lambda / n * weights[index];
            }
            value
        })
        .collect()
}

/// Finds the weights minimizing the approximated cost.
///
/// Degree one has the closed form `w_i = -a_1 * A_0[i] / lambda`. Higher degrees run
/// gradient descent and keep the weights of the last iteration whose cost was
/// non-negative.
pub fn minimum_weights(coefficients: &[Vec<f64>], parameters: &Parameters) -> Vec<f64> {
    if coefficients.len() == 1 {
        return coefficients[0]
            .iter()
            .map(|a| -MIN_AREA_COEFFICIENTS[1] * a / parameters.lambda)
            .collect();
    }

    let size = parameters.features + 1;
    let mut weights = if parameters.initial_weights.is_empty() {
        vec![0.0; size]
    } else {
        parameters.initial_weights.clone()
    };
    let mut best = vec![0.0; size];
    let n = parameters.records.max(1);
    for iteration in 0..parameters.max_iterations {
        let current = cost(&weights, coefficients, n, parameters.lambda);
        if current >= 0.0 {
            best.copy_from_slice(&weights);
        }
        let step = gradient(&weights, coefficients, n, parameters.lambda);
        for (w, g) in weights.iter_mut().zip(step) {
            *w -= parameters.step * g;
        }
        debug!(iteration, cost = current, "gradient descent");
    }
    best
}

/// Decodes the aggregated coefficients into trained weights.
pub fn decode(slots: &[i64], parameters: &Parameters) -> Result<Vec<f64>, Error> {
    parameters.validate()?;
    let coefficients = unpack(slots, parameters.features, parameters.k, parameters.precision)?;
    Ok(minimum_weights(&coefficients, parameters))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Probability of the positive class for a (standardised, non-augmented) record.
pub fn predict(record: &[f64], weights: &[f64]) -> f64 {
    let z = weights[0]
        + record
            .iter()
            .zip(&weights[1..])
            .map(|(x, w)| x * w)
            .sum::<f64>();
    sigmoid(z)
}

/// Probability of the positive class for an encrypted record, without decrypting
/// its features.
///
/// The weights are scaled by `weight_precision` and rounded so that the weighted sum
/// is computed homomorphically. Only that sum is decrypted, then divided by both
/// precisions: `data_precision` is the scaling the features were encrypted with.
pub fn predict_homomorphic(
    record: &[Ciphertext],
    weights: &[f64],
    secret: &Scalar,
    table: &DecryptionTable,
    weight_precision: f64,
    data_precision: f64,
) -> Result<f64, Error> {
    if weights.len() != record.len() + 1 {
        return Err(Error::InvalidParameters("weights do not match record"));
    }
    if weight_precision <= 0.0 || data_precision <= 0.0 {
        return Err(Error::InvalidParameters("precisions must be positive"));
    }
    let sum: Ciphertext = record
        .iter()
        .zip(&weights[1..])
        .map(|(x, w)| *x * Scalar::from_i64((w * weight_precision).round() as i64))
        .sum();
    let sum = decrypt(table, secret, &sum)? as f64 / (weight_precision * data_precision);
    Ok(sigmoid(weights[0] + sum))
}

fn read_floats(buf: &mut impl Buf) -> Result<Vec<f64>, CodecError> {
    Vec::<f64>::read_cfg(buf, &(RangeCfg::from(..=MAX_FEATURES + 1), ()))
}

impl Write for Parameters {
    fn write(&self, buf: &mut impl BufMut) {
        self.k.write(buf);
        self.lambda.write(buf);
        self.step.write(buf);
        self.max_iterations.write(buf);
        self.initial_weights.write(buf);
        self.precision.write(buf);
        self.means.write(buf);
        self.standard_deviations.write(buf);
        self.records.write(buf);
        self.features.write(buf);
    }
}

impl EncodeSize for Parameters {
    fn encode_size(&self) -> usize {
        self.k.encode_size()
            + self.lambda.encode_size()
            + self.step.encode_size()
            + self.max_iterations.encode_size()
            + self.initial_weights.encode_size()
            + self.precision.encode_size()
            + self.means.encode_size()
            + self.standard_deviations.encode_size()
            + self.records.encode_size()
            + self.features.encode_size()
    }
}

impl Read for Parameters {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            k: usize::read_cfg(buf, &RangeCfg::from(1..=2))?,
            lambda: f64::read(buf)?,
            step: f64::read(buf)?,
            max_iterations: usize::read_cfg(buf, &RangeCfg::from(..))?,
            initial_weights: read_floats(buf)?,
            precision: f64::read(buf)?,
            means: read_floats(buf)?,
            standard_deviations: read_floats(buf)?,
            records: usize::read_cfg(buf, &RangeCfg::from(..))?,
            features: usize::read_cfg(buf, &RangeCfg::from(1..=MAX_FEATURES))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drynx_cryptography::{elgamal::encrypt, Keypair};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_counts() {
        assert_eq!(coefficient_count(2, 1), 3);
        assert_eq!(coefficient_count(2, 2), 12);
        assert_eq!(tuples(3, 2).len(), 9);
        assert_eq!(tuples(2, 2), vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn test_coefficients() {
        let x = [1.0, 2.0];
        let levels = approximation_coefficients(&x, 1, 2);
        // Level 0: x * (2y - 1), level 1: -1 * x_a * x_b
        assert_eq!(levels[0], vec![1.0, 2.0]);
        assert_eq!(levels[1], vec![-1.0, -2.0, -2.0, -4.0]);
        let levels = approximation_coefficients(&x, 0, 1);
        assert_eq!(levels[0], vec![-1.0, -2.0]);
    }

    #[test]
    fn test_closed_form() {
        let parameters = Parameters {
            k: 1,
            lambda: 2.0,
            features: 1,
            precision: 10.0,
            records: 4,
            ..Parameters::default()
        };
        let weights = decode(&[10, -20], &parameters).unwrap();
        // A_0 = [1, -2] after unscaling
        assert_eq!(weights, vec![0.25, -0.5]);
    }

    #[test]
    fn test_gradient_matches_cost() {
        let coefficients = vec![vec![0.5, -1.0], vec![0.1, 0.2, 0.2, -0.3]];
        let weights = [0.3, -0.7];
        let analytic = gradient(&weights, &coefficients, 5, 1.5);
        let epsilon = 1e-6;
        for i in 0..weights.len() {
            let mut plus = weights;
            let mut minus = weights;
            plus[i] += epsilon;
            minus[i] -= epsilon;
            let numeric = (cost(&plus, &coefficients, 5, 1.5) - cost(&minus, &coefficients, 5, 1.5))
                / (2.0 * epsilon);
            assert!((numeric - analytic[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_training_separates_classes() {
        let records = vec![
            vec![-2.0, 0.0],
            vec![-1.0, 0.0],
            vec![-1.5, 0.0],
            vec![1.0, 1.0],
            vec![2.0, 1.0],
            vec![1.5, 1.0],
        ];
        let parameters = Parameters {
            k: 2,
            lambda: 1.0,
            step: 0.1,
            max_iterations: 50,
            initial_weights: vec![0.0, 0.0],
            precision: 1e3,
            records: records.len(),
            features: 1,
            ..Parameters::default()
        };
        let slots = encode(&records, &parameters).unwrap();
        assert_eq!(slots.len(), coefficient_count(1, 2));
        let weights = decode(&slots, &parameters).unwrap();
        assert!(weights[1] > 0.0);

        let standardised = standardise(&records.iter().map(|r| vec![r[0]]).collect::<Vec<_>>());
        assert!(predict(&standardised[4], &weights) > 0.5);
        assert!(predict(&standardised[0], &weights) < 0.5);
    }

    #[test]
    fn test_empty_provider() {
        let parameters = Parameters {
            features: 2,
            ..Parameters::default()
        };
        assert_eq!(encode(&[], &parameters).unwrap(), vec![0; 12]);
    }

    #[test]
    fn test_invalid_parameters() {
        let parameters = Parameters {
            k: 3,
            features: 1,
            ..Parameters::default()
        };
        assert!(parameters.validate().is_err());
        let parameters = Parameters {
            features: 2,
            initial_weights: vec![0.0],
            ..Parameters::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn test_predict_homomorphic() {
        let mut rng = StdRng::seed_from_u64(11);
        let keypair = Keypair::generate(&mut rng);
        let table = DecryptionTable::shared();
        let record = [0.5, -1.2, 2.0];
        let weights = [0.3, 1.5, -0.8, 0.25];
        let data_precision: f64 = 10.0;
        let encrypted: Vec<Ciphertext> = record
            .iter()
            .map(|x| encrypt(&mut rng, &keypair.public, (x * data_precision).round() as i64))
            .collect();

        let prediction =
            predict_homomorphic(&encrypted, &weights, &keypair.secret, table, 100.0, data_precision)
                .unwrap();
        assert!((prediction - predict(&record, &weights)).abs() < 1e-9);

        assert_eq!(
            predict_homomorphic(&encrypted, &weights[..3], &keypair.secret, table, 100.0, 1.0),
            Err(Error::InvalidParameters("weights do not match record"))
        );
    }
}
