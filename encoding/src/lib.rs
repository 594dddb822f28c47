//! Encode statistical queries into vectors of additively homomorphic ciphertexts.
//!
//! Every [Operation] maps the records of one data provider to a fixed number of
//! ciphertext slots. Slots of different providers are summed componentwise by the
//! computing nodes, and the querier turns the decrypted sum back into a result with
//! [decode].
//!
//! Operations that only care whether a slot is zero (boolean AND/OR, min/max, set
//! union/intersection) are decoded with `DecryptCheckZero` and may be obfuscated.
//! All other operations decrypt through a [DecryptionTable], so every clear slot must
//! lie within `±MAX_HOMOMORPHIC_INT`.
//!
//! # Status
//!
//! `drynx-encoding` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use drynx_cryptography::{
    elgamal::{decrypt_check_zero, decrypt_vector, encrypt_vector},
    table::MAX_HOMOMORPHIC_INT,
    CipherVector, Ciphertext, DecryptionTable, Scalar, G1,
};
use rand::{CryptoRng, RngCore};
use thiserror::Error;
use tracing::debug;

pub mod bits;
pub mod classification;
pub mod cosim;
pub mod frequency;
pub mod lin_reg;
pub mod logreg;
pub mod mean;
pub mod min_max;
pub mod ml_eval;
pub mod noise;
mod operation;
pub mod set;
pub mod sum;
pub mod variance;

pub use logreg::Parameters as LogisticRegressionParameters;
pub use operation::{Operation, MAX_SLOTS};

/// Errors that can occur when encoding or decoding a query.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum Error {
    #[error("value {0} outside of homomorphic range")]
    OutOfHomomorphicRange(i128),
    #[error("value {0} outside of domain [{1}, {2}]")]
    OutOfDomain(i64, i64, i64),
    #[error("invalid domain [{0}, {1}]")]
    InvalidDomain(i64, i64),
    #[error("missing column {0}")]
    MissingColumn(usize),
    #[error("columns have different lengths")]
    ColumnMismatch,
    #[error("unexpected dataset kind")]
    UnexpectedDataset,
    #[error("wrong number of slots: expected {0}, got {1}")]
    SlotCount(usize, usize),
    #[error("empty aggregate")]
    EmptyAggregate,
    #[error("singular system")]
    Singular,
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
    #[error("cryptography: {0}")]
    Cryptography(#[from] drynx_cryptography::Error),
}

/// Records held by one data provider.
#[derive(Clone, Debug, PartialEq)]
pub enum Dataset {
    /// Integer attributes, one vector per column.
    Columns(Vec<Vec<i64>>),
    /// Real-valued records, one vector per row (label in the last column).
    Records(Vec<Vec<f64>>),
}

impl Dataset {
    /// Returns integer column `index`.
    ///
    /// A dataset without any column holds no record, so every column is empty.
    pub fn column(&self, index: usize) -> Result<&[i64], Error> {
        match self {
            Dataset::Columns(columns) if columns.is_empty() => Ok(&[]),
            Dataset::Columns(columns) => columns
                .get(index)
                .map(Vec::as_slice)
                .ok_or(Error::MissingColumn(index)),
            Dataset::Records(_) => Err(Error::UnexpectedDataset),
        }
    }

    /// A dataset without records.
    pub fn empty() -> Self {
        Dataset::Columns(Vec::new())
    }

    /// Returns whether the dataset holds no record.
    pub fn is_empty(&self) -> bool {
        match self {
            Dataset::Columns(columns) => columns.iter().all(Vec::is_empty),
            Dataset::Records(records) => records.is_empty(),
        }
    }
}

/// The encrypted slots of one data provider.
///
/// `clear[i]` and `nonces[i]` are the witness of `ciphertexts[i]`, required to
/// prove its range.
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    pub ciphertexts: CipherVector,
    pub clear: Vec<i64>,
    pub nonces: Vec<Scalar>,
}

impl Encoded {
    /// Number of slots.
    pub fn len(&self) -> usize {
        self.ciphertexts.len()
    }

    /// Returns whether there is no slot.
    pub fn is_empty(&self) -> bool {
        self.ciphertexts.is_empty()
    }
}

/// The decoded result of a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Histogram(Vec<i64>),
    Set(Vec<i64>),
    Coefficients(Vec<f64>),
}

impl Output {
    /// Flattens the output into real values.
    pub fn values(&self) -> Vec<f64> {
        match self {
            Output::Integer(v) => vec![*v as f64],
            Output::Float(v) => vec![*v],
            Output::Bool(b) => vec![if *b { 1.0 } else { 0.0 }],
            Output::Histogram(values) | Output::Set(values) => {
                values.iter().map(|v| *v as f64).collect()
            }
            Output::Coefficients(values) => values.clone(),
        }
    }
}

/// Converts an exact aggregate into a slot value, failing outside of the
/// homomorphic window.
pub(crate) fn bounded(v: i128) -> Result<i64, Error> {
    if v.abs() > MAX_HOMOMORPHIC_INT as i128 {
        return Err(Error::OutOfHomomorphicRange(v));
    }
    Ok(v as i64)
}

/// Encrypts clear slots under `public`.
pub(crate) fn encrypt_slots<R: RngCore + CryptoRng>(
    rng: &mut R,
    public: &G1,
    clear: Vec<i64>,
) -> Encoded {
    let (ciphertexts, nonces) = encrypt_vector(rng, public, &clear);
    Encoded {
        ciphertexts,
        clear,
        nonces,
    }
}

/// Encodes the records of one data provider.
///
/// When `proofs` is set, bit slots encrypt `0`/`1` so that their range can be
/// proven; otherwise a set bit is encrypted as a random scalar.
pub fn encode<R: RngCore + CryptoRng>(
    rng: &mut R,
    operation: &Operation,
    data: &Dataset,
    public: &G1,
    proofs: bool,
) -> Result<Encoded, Error> {
    operation.validate()?;
    let encoded = match operation {
        Operation::Sum => encrypt_slots(rng, public, sum::encode(data.column(0)?)?),
        Operation::Mean => encrypt_slots(rng, public, mean::encode(data.column(0)?)?),
        Operation::Variance => encrypt_slots(rng, public, variance::encode(data.column(0)?)?),
        Operation::Cosim => encrypt_slots(
            rng,
            public,
            cosim::encode(data.column(0)?, data.column(1)?)?,
        ),
        Operation::FrequencyCount { min, max } => encrypt_slots(
            rng,
            public,
            frequency::encode(data.column(0)?, *min, *max)?,
        ),
        Operation::BoolOr => {
            let bit = bits::local_or(data.column(0)?);
            bits::encode(rng, public, &[bit], bits::Reduction::Or, proofs)
        }
        Operation::BoolAnd => {
            let bit = bits::local_and(data.column(0)?);
            bits::encode(rng, public, &[bit], bits::Reduction::And, proofs)
        }
        Operation::Min { min, max } => bits::encode(
            rng,
            public,
            &min_max::min_bits(data.column(0)?, *min, *max)?,
            bits::Reduction::Or,
            proofs,
        ),
        Operation::Max { min, max } => bits::encode(
            rng,
            public,
            &min_max::max_bits(data.column(0)?, *min, *max)?,
            bits::Reduction::And,
            proofs,
        ),
        Operation::Union { min, max } => bits::encode(
            rng,
            public,
            &set::membership(data.column(0)?, *min, *max)?,
            bits::Reduction::Or,
            proofs,
        ),
        Operation::Inter { min, max } => bits::encode(
            rng,
            public,
            &set::membership(data.column(0)?, *min, *max)?,
            bits::Reduction::And,
            proofs,
        ),
        Operation::LinReg { dimensions } => {
            let columns = (0..=*dimensions)
                .map(|i| data.column(i))
                .collect::<Result<Vec<_>, _>>()?;
            let (y, x) = columns.split_last().ok_or(Error::MissingColumn(0))?;
            encrypt_slots(rng, public, lin_reg::encode(x, y)?)
        }
        Operation::LogReg(parameters) => {
            let records = match data {
                Dataset::Records(records) => records,
                Dataset::Columns(_) => return Err(Error::UnexpectedDataset),
            };
            encrypt_slots(rng, public, logreg::encode(records, parameters)?)
        }
        Operation::MlEval => encrypt_slots(
            rng,
            public,
            ml_eval::encode(data.column(0)?, data.column(1)?)?,
        ),
    };
    debug!(
        operation = operation.name(),
        slots = encoded.len(),
        proofs,
        "encoded"
    );
    Ok(encoded)
}

/// Decrypts `ciphertexts` with `secret` and decodes the result of `operation`.
pub fn decode(
    operation: &Operation,
    table: &DecryptionTable,
    secret: &Scalar,
    ciphertexts: &[Ciphertext],
) -> Result<Output, Error> {
    let expected = operation.output_len();
    if ciphertexts.len() != expected {
        return Err(Error::SlotCount(expected, ciphertexts.len()));
    }

    // Bitwise operations only reveal whether each slot is zero
    if let Some(reduction) = operation.reduction() {
        let bits: Vec<bool> = ciphertexts
            .iter()
            .map(|ciphertext| reduction.decode(decrypt_check_zero(secret, ciphertext)))
            .collect();
        return decode_bits(operation, &bits);
    }
    let slots = decrypt_vector(table, secret, ciphertexts)?;
    decode_slots(operation, &slots)
}

/// Decodes the reduced bits of a bitwise operation.
pub fn decode_bits(operation: &Operation, bits: &[bool]) -> Result<Output, Error> {
    match operation {
        Operation::BoolOr | Operation::BoolAnd => bits
            .first()
            .map(|bit| Output::Bool(*bit))
            .ok_or(Error::SlotCount(1, 0)),
        Operation::Min { min, .. } | Operation::Max { min, .. } => {
            min_max::decode(bits, *min).map(Output::Integer)
        }
        Operation::Union { min, .. } | Operation::Inter { min, .. } => {
            Ok(Output::Set(set::decode(bits, *min)))
        }
        _ => Err(Error::InvalidParameters("operation is not bitwise")),
    }
}

/// Decodes the decrypted slots of an arithmetic operation.
pub fn decode_slots(operation: &Operation, slots: &[i64]) -> Result<Output, Error> {
    let expected = operation.output_len();
    if slots.len() != expected {
        return Err(Error::SlotCount(expected, slots.len()));
    }
    match operation {
        Operation::Sum => Ok(Output::Integer(sum::decode(slots))),
        Operation::Mean => mean::decode(slots).map(Output::Float),
        Operation::Variance => variance::decode(slots).map(Output::Float),
        Operation::Cosim => cosim::decode(slots).map(Output::Float),
        Operation::FrequencyCount { .. } => Ok(Output::Histogram(slots.to_vec())),
        Operation::LinReg { dimensions } => {
            lin_reg::decode(slots, *dimensions).map(Output::Coefficients)
        }
        Operation::LogReg(parameters) => {
            logreg::decode(slots, parameters).map(Output::Coefficients)
        }
        Operation::MlEval => ml_eval::decode(slots).map(Output::Float),
        _ => Err(Error::InvalidParameters("operation is bitwise")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drynx_cryptography::{elgamal::sum_vectors, Keypair};
    use rand::{rngs::StdRng, SeedableRng};

    fn run(operation: &Operation, datasets: &[Dataset], proofs: bool, seed: u64) -> Output {
        let mut rng = StdRng::seed_from_u64(seed);
        let keys = Keypair::generate(&mut rng);
        let encoded: Vec<Encoded> = datasets
            .iter()
            .map(|data| encode(&mut rng, operation, data, &keys.public, proofs).unwrap())
            .collect();
        for e in &encoded {
            assert_eq!(e.len(), operation.output_len());
        }
        let aggregate = sum_vectors(
            operation.output_len(),
            encoded.iter().map(|e| e.ciphertexts.as_slice()),
        )
        .unwrap();
        decode(operation, DecryptionTable::shared(), &keys.secret, &aggregate).unwrap()
    }

    fn column(values: &[i64]) -> Dataset {
        Dataset::Columns(vec![values.to_vec()])
    }

    fn bools(values: &[bool]) -> Dataset {
        column(&values.iter().map(|b| *b as i64).collect::<Vec<_>>())
    }

    #[test]
    fn test_sum_three_providers() {
        let datasets = [column(&[2, 3, 5]), column(&[10, 0, 1]), column(&[-4, 0, 7])];
        assert_eq!(run(&Operation::Sum, &datasets, false, 0), Output::Integer(24));
    }

    #[test]
    fn test_frequency_count() {
        let data = column(&[-1, 0, 1, 2, 3, 4, 6, 7, 8, 9, 10, 12, 3, 2]);
        let operation = Operation::FrequencyCount { min: -1, max: 12 };
        assert_eq!(
            run(&operation, &[data], false, 1),
            Output::Histogram(vec![1, 1, 1, 2, 2, 1, 0, 1, 1, 1, 1, 1, 0, 1])
        );
    }

    #[test]
    fn test_cosine_similarity() {
        let v = vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 12];
        let data = Dataset::Columns(vec![v.clone(), v]);
        match run(&Operation::Cosim, &[data], false, 2) {
            Output::Float(similarity) => assert!((similarity - 1.0).abs() < 1e-9),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_min_three_providers() {
        let datasets = [column(&[1, 2, 10]), column(&[3, 9, 5]), column(&[0, 7, 4])];
        let operation = Operation::Min { min: 0, max: 10 };
        assert_eq!(run(&operation, &datasets, false, 3), Output::Integer(0));
        assert_eq!(run(&operation, &datasets, true, 4), Output::Integer(0));
    }

    #[test]
    fn test_max_three_providers() {
        let datasets = [column(&[1, 2, 10]), column(&[3, 9, 5]), column(&[0, 7, 4])];
        let operation = Operation::Max { min: 0, max: 10 };
        assert_eq!(run(&operation, &datasets, false, 5), Output::Integer(10));
        assert_eq!(run(&operation, &datasets, true, 6), Output::Integer(10));
    }

    #[test]
    fn test_bool_or() {
        let datasets = [
            bools(&[false, true, false]),
            bools(&[false, false, false]),
            bools(&[false, true, true]),
        ];
        assert_eq!(run(&Operation::BoolOr, &datasets, false, 7), Output::Bool(true));
        assert_eq!(run(&Operation::BoolOr, &datasets, true, 8), Output::Bool(true));
        assert_eq!(
            run(&Operation::BoolOr, &datasets[1..2], false, 9),
            Output::Bool(false)
        );
    }

    #[test]
    fn test_bool_and() {
        let all = [bools(&[true, true]), bools(&[true])];
        let some = [bools(&[true, true]), bools(&[true, false])];
        for proofs in [false, true] {
            assert_eq!(run(&Operation::BoolAnd, &all, proofs, 10), Output::Bool(true));
            assert_eq!(run(&Operation::BoolAnd, &some, proofs, 11), Output::Bool(false));
        }
    }

    #[test]
    fn test_linear_regression() {
        let x1 = vec![1, 0, 1, 2, 3];
        let x2 = vec![2, 1, 0, 1, 5];
        let y = vec![11, 5, 3, 9, 27];
        let data = Dataset::Columns(vec![x1, x2, y]);
        let operation = Operation::LinReg { dimensions: 2 };
        assert_eq!(
            run(&operation, &[data], false, 12),
            Output::Coefficients(vec![1.0, 2.0, 4.0])
        );
    }

    #[test]
    fn test_set_union_and_intersection() {
        let datasets = [column(&[1, 3]), column(&[3, 4])];
        let union = Operation::Union { min: 0, max: 5 };
        let inter = Operation::Inter { min: 0, max: 5 };
        assert_eq!(run(&union, &datasets, false, 13), Output::Set(vec![1, 3, 4]));
        assert_eq!(run(&inter, &datasets, true, 14), Output::Set(vec![3]));
    }

    #[test]
    fn test_mean_and_variance() {
        let datasets = [column(&[1, 2, 3]), column(&[4, 5])];
        assert_eq!(run(&Operation::Mean, &datasets, false, 15), Output::Float(3.0));
        assert_eq!(run(&Operation::Variance, &datasets, false, 16), Output::Float(2.0));
    }

    #[test]
    fn test_out_of_homomorphic_range() {
        let mut rng = StdRng::seed_from_u64(17);
        let keys = Keypair::generate(&mut rng);
        let data = column(&[MAX_HOMOMORPHIC_INT, 1]);
        assert_eq!(
            encode(&mut rng, &Operation::Sum, &data, &keys.public, false),
            Err(Error::OutOfHomomorphicRange(MAX_HOMOMORPHIC_INT as i128 + 1))
        );
    }

    #[test]
    fn test_slot_count_checked() {
        let mut rng = StdRng::seed_from_u64(18);
        let keys = Keypair::generate(&mut rng);
        assert_eq!(
            decode(&Operation::Mean, DecryptionTable::shared(), &keys.secret, &[]),
            Err(Error::SlotCount(2, 0))
        );
    }
}
