use crate::{bits::Reduction, lin_reg, logreg, Error};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};

/// Maximum number of slots an operation may produce.
pub const MAX_SLOTS: usize = 1 << 16;

/// A statistical operation and its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Sum,
    Mean,
    Variance,
    Cosim,
    FrequencyCount { min: i64, max: i64 },
    BoolAnd,
    BoolOr,
    Min { min: i64, max: i64 },
    Max { min: i64, max: i64 },
    LinReg { dimensions: usize },
    Union { min: i64, max: i64 },
    Inter { min: i64, max: i64 },
    LogReg(logreg::Parameters),
    MlEval,
}

fn domain_width(min: i64, max: i64) -> usize {
    let width = max as i128 - min as i128 + 1;
    if width <= 0 {
        return 0;
    }
    usize::try_from(width).unwrap_or(usize::MAX)
}

impl Operation {
    /// Name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Sum => "sum",
            Operation::Mean => "mean",
            Operation::Variance => "variance",
            Operation::Cosim => "cosim",
            Operation::FrequencyCount { .. } => "frequency_count",
            Operation::BoolAnd => "bool_AND",
            Operation::BoolOr => "bool_OR",
            Operation::Min { .. } => "min",
            Operation::Max { .. } => "max",
            Operation::LinReg { .. } => "lin_reg",
            Operation::Union { .. } => "union",
            Operation::Inter { .. } => "inter",
            Operation::LogReg(_) => "logreg",
            Operation::MlEval => "MLeval",
        }
    }

    /// Number of ciphertext slots each data provider contributes.
    pub fn output_len(&self) -> usize {
        match self {
            Operation::Sum | Operation::BoolAnd | Operation::BoolOr => 1,
            Operation::Mean => 2,
            Operation::Variance => 3,
            Operation::Cosim => 5,
            Operation::MlEval => 4,
            Operation::FrequencyCount { min, max }
            | Operation::Min { min, max }
            | Operation::Max { min, max }
            | Operation::Union { min, max }
            | Operation::Inter { min, max } => domain_width(*min, *max),
            Operation::LinReg { dimensions } => lin_reg::slot_count(*dimensions),
            Operation::LogReg(parameters) => {
                logreg::coefficient_count(parameters.features, parameters.k)
            }
        }
    }

    /// The reduction of bitwise operations, whose slots only reveal whether they are zero.
    pub fn reduction(&self) -> Option<Reduction> {
        match self {
            Operation::BoolOr | Operation::Min { .. } | Operation::Union { .. } => {
                Some(Reduction::Or)
            }
            Operation::BoolAnd | Operation::Max { .. } | Operation::Inter { .. } => {
                Some(Reduction::And)
            }
            _ => None,
        }
    }

    /// Returns whether the aggregate may be obfuscated.
    pub fn obfuscatable(&self) -> bool {
        self.reduction().is_some()
    }

    /// Lower bound of the attribute domain, if any.
    pub fn query_min(&self) -> Option<i64> {
        match self {
            Operation::FrequencyCount { min, .. }
            | Operation::Min { min, .. }
            | Operation::Max { min, .. }
            | Operation::Union { min, .. }
            | Operation::Inter { min, .. } => Some(*min),
            _ => None,
        }
    }

    /// Checks the parameters of the operation.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Operation::FrequencyCount { min, max }
            | Operation::Min { min, max }
            | Operation::Max { min, max }
            | Operation::Union { min, max }
            | Operation::Inter { min, max } => {
                if min > max {
                    return Err(Error::InvalidDomain(*min, *max));
                }
            }
            Operation::LinReg { dimensions } => {
                if *dimensions == 0 {
                    return Err(Error::InvalidParameters("lin_reg needs at least one feature"));
                }
            }
            Operation::LogReg(parameters) => parameters.validate()?,
            _ => {}
        }
        if self.output_len() > MAX_SLOTS {
            return Err(Error::InvalidParameters("too many slots"));
        }
        Ok(())
    }
}

impl Write for Operation {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Operation::Sum => 0u8.write(buf),
            Operation::Mean => 1u8.write(buf),
            Operation::Variance => 2u8.write(buf),
            Operation::Cosim => 3u8.write(buf),
            Operation::FrequencyCount { min, max } => {
                4u8.write(buf);
                min.write(buf);
                max.write(buf);
            }
            Operation::BoolAnd => 5u8.write(buf),
            Operation::BoolOr => 6u8.write(buf),
            Operation::Min { min, max } => {
                7u8.write(buf);
                min.write(buf);
                max.write(buf);
            }
            Operation::Max { min, max } => {
                8u8.write(buf);
                min.write(buf);
                max.write(buf);
            }
            Operation::LinReg { dimensions } => {
                9u8.write(buf);
                dimensions.write(buf);
            }
            Operation::Union { min, max } => {
                10u8.write(buf);
                min.write(buf);
                max.write(buf);
            }
            Operation::Inter { min, max } => {
                11u8.write(buf);
                min.write(buf);
                max.write(buf);
            }
            Operation::LogReg(parameters) => {
                12u8.write(buf);
                parameters.write(buf);
            }
            Operation::MlEval => 13u8.write(buf),
        }
    }
}

impl EncodeSize for Operation {
    fn encode_size(&self) -> usize {
        1 + match self {
            Operation::FrequencyCount { min, max }
            | Operation::Min { min, max }
            | Operation::Max { min, max }
            | Operation::Union { min, max }
            | Operation::Inter { min, max } => min.encode_size() + max.encode_size(),
            Operation::LinReg { dimensions } => dimensions.encode_size(),
            Operation::LogReg(parameters) => parameters.encode_size(),
            _ => 0,
        }
    }
}

impl Read for Operation {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let operation = match u8::read(buf)? {
            0 => Operation::Sum,
            1 => Operation::Mean,
            2 => Operation::Variance,
            3 => Operation::Cosim,
            4 => Operation::FrequencyCount {
                min: i64::read(buf)?,
                max: i64::read(buf)?,
            },
            5 => Operation::BoolAnd,
            6 => Operation::BoolOr,
            7 => Operation::Min {
                min: i64::read(buf)?,
                max: i64::read(buf)?,
            },
            8 => Operation::Max {
                min: i64::read(buf)?,
                max: i64::read(buf)?,
            },
            9 => Operation::LinReg {
                dimensions: usize::read_cfg(buf, &RangeCfg::from(1..=MAX_SLOTS))?,
            },
            10 => Operation::Union {
                min: i64::read(buf)?,
                max: i64::read(buf)?,
            },
            11 => Operation::Inter {
                min: i64::read(buf)?,
                max: i64::read(buf)?,
            },
            12 => Operation::LogReg(logreg::Parameters::read(buf)?),
            13 => Operation::MlEval,
            _ => return Err(CodecError::Invalid("drynx::Operation", "Invalid type")),
        };
        operation
            .validate()
            .map_err(|_| CodecError::Invalid("drynx::Operation", "Invalid parameters"))?;
        Ok(operation)
    }
}
