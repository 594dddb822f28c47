//! Publicly checkable proof of homomorphic aggregation.
//!
//! Aggregation needs no zero knowledge: the proof carries the vectors that
//! were combined and the vector that resulted, and anyone can recompute the
//! componentwise sum.

use crate::{
    elgamal::{sum_vectors, CipherVector},
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, Write};

/// Inputs and output of one aggregation step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregationProof {
    pub inputs: Vec<CipherVector>,
    pub output: CipherVector,
}

impl AggregationProof {
    pub fn new(inputs: Vec<CipherVector>, output: CipherVector) -> Self {
        Self { inputs, output }
    }

    /// Aggregates `inputs` and returns the proof of the result.
    pub fn aggregate(inputs: Vec<CipherVector>, len: usize) -> Result<Self, Error> {
        let output = sum_vectors(len, inputs.iter().map(|v| v.as_slice()))?;
        Ok(Self { inputs, output })
    }

    /// Checks that the output is the componentwise sum of the inputs.
    pub fn verify(&self) -> Result<(), Error> {
        let expected = sum_vectors(self.output.len(), self.inputs.iter().map(|v| v.as_slice()))
            .map_err(|_| Error::InvalidProof("aggregation input length mismatch"))?;
        if expected != self.output {
            return Err(Error::InvalidProof("aggregation sum mismatch"));
        }
        Ok(())
    }
}

impl Write for AggregationProof {
    fn write(&self, buf: &mut impl BufMut) {
        self.inputs.write(buf);
        self.output.write(buf);
    }
}

impl EncodeSize for AggregationProof {
    fn encode_size(&self) -> usize {
        self.inputs.encode_size() + self.output.encode_size()
    }
}

impl Read for AggregationProof {
    /// Maximum number of inputs and of slots.
    type Cfg = (usize, usize);

    fn read_cfg(buf: &mut impl Buf, (inputs, slots): &(usize, usize)) -> Result<Self, CodecError> {
        let inputs = Vec::<CipherVector>::read_cfg(
            buf,
            &(RangeCfg::from(..=*inputs), (RangeCfg::from(..=*slots), ())),
        )?;
        let output = CipherVector::read_cfg(buf, &(RangeCfg::from(..=*slots), ()))?;
        Ok(Self { inputs, output })
    }
}
