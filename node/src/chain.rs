//! Hash-chained log of proof verdicts.
//!
//! The root verifying node appends one [Block] per survey, holding the merged
//! [Bitmap] of every verifying node. The first block of a roster is a genesis block
//! without verdicts.

use crate::wire::{read_string, string_size, write_string, MAX_NAME};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Maximum number of verdicts in a bitmap.
pub const MAX_VERDICTS: usize = 1 << 24;

/// The outcome of verifying one proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Rejected,
    Accepted,
    /// The envelope signature did not match its sender.
    BadSignature,
}

impl Verdict {
    fn code(&self) -> u8 {
        match self {
            Verdict::Rejected => 0,
            Verdict::Accepted => 1,
            Verdict::BadSignature => 2,
        }
    }
}

impl Write for Verdict {
    fn write(&self, buf: &mut impl BufMut) {
        self.code().write(buf);
    }
}

impl EncodeSize for Verdict {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for Verdict {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(Verdict::Rejected),
            1 => Ok(Verdict::Accepted),
            2 => Ok(Verdict::BadSignature),
            _ => Err(CodecError::Invalid("drynx::Verdict", "Invalid type")),
        }
    }
}

/// Verdicts keyed by proof identifier.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Bitmap(BTreeMap<String, Verdict>);

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a verdict, returning whether `identifier` was new.
    pub fn insert(&mut self, identifier: String, verdict: Verdict) -> bool {
        self.0.insert(identifier, verdict).is_none()
    }

    pub fn get(&self, identifier: &str) -> Option<Verdict> {
        self.0.get(identifier).copied()
    }

    /// Adds all verdicts of `other`.
    pub fn merge(&mut self, other: Bitmap) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Verdict)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Write for Bitmap {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.len().write(buf);
        for (identifier, verdict) in &self.0 {
            write_string(identifier, buf);
            verdict.write(buf);
        }
    }
}

impl EncodeSize for Bitmap {
    fn encode_size(&self) -> usize {
        self.0.len().encode_size()
            + self
                .0
                .keys()
                .map(|identifier| string_size(identifier) + 1)
                .sum::<usize>()
    }
}

impl Read for Bitmap {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let len = usize::read_cfg(buf, &RangeCfg::from(..=MAX_VERDICTS))?;
        let mut verdicts = BTreeMap::new();
        for _ in 0..len {
            let identifier = read_string(buf, 4 * MAX_NAME + 64)?;
            let verdict = Verdict::read(buf)?;
            if verdicts.insert(identifier, verdict).is_some() {
                return Err(CodecError::Invalid("drynx::Bitmap", "Duplicate identifier"));
            }
        }
        Ok(Self(verdicts))
    }
}

/// A block of the verdict log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub previous: [u8; 32],
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Empty for the genesis block.
    pub survey_id: String,
    /// Digest of the verifying roster.
    pub roster: [u8; 32],
    pub bitmap: Bitmap,
}

impl Block {
    pub fn genesis(roster: [u8; 32], timestamp: i64) -> Self {
        Self {
            previous: [0; 32],
            timestamp,
            survey_id: String::new(),
            roster,
            bitmap: Bitmap::new(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.survey_id.is_empty()
    }

    /// SHA-256 of the encoded block.
    pub fn hash(&self) -> [u8; 32] {
        let encoded = commonware_codec::Encode::encode(self);
        Sha256::digest(&encoded).into()
    }
}

impl Write for Block {
    fn write(&self, buf: &mut impl BufMut) {
        self.previous.write(buf);
        buf.put_slice(&self.timestamp.to_le_bytes());
        write_string(&self.survey_id, buf);
        self.roster.write(buf);
        self.bitmap.write(buf);
    }
}

impl EncodeSize for Block {
    fn encode_size(&self) -> usize {
        32 + 8 + string_size(&self.survey_id) + 32 + self.bitmap.encode_size()
    }
}

impl Read for Block {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let previous = <[u8; 32]>::read(buf)?;
        let timestamp = i64::from_le_bytes(<[u8; 8]>::read(buf)?);
        Ok(Self {
            previous,
            timestamp,
            survey_id: read_string(buf, MAX_NAME)?,
            roster: <[u8; 32]>::read(buf)?,
            bitmap: Bitmap::read(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    #[test]
    fn test_block_layout() {
        let mut bitmap = Bitmap::new();
        assert!(bitmap.insert("s/range/dp0/0/vn0".into(), Verdict::Accepted));
        assert!(!bitmap.insert("s/range/dp0/0/vn0".into(), Verdict::Accepted));
        let block = Block {
            previous: [7; 32],
            timestamp: 1_000,
            survey_id: "s".into(),
            roster: [9; 32],
            bitmap,
        };
        let encoded = block.encode();
        assert_eq!(encoded.len(), block.encode_size());
        assert_eq!(&encoded[..32], &[7; 32]);
        assert_eq!(&encoded[32..40], &1_000i64.to_le_bytes());
        assert_eq!(encoded[encoded.len() - 1], 1);
        assert_eq!(Block::decode(encoded).unwrap(), block);
    }

    #[test]
    fn test_hash_links() {
        let genesis = Block::genesis([1; 32], 0);
        assert!(genesis.is_genesis());
        let block = Block {
            previous: genesis.hash(),
            timestamp: 1,
            survey_id: "s".into(),
            roster: [1; 32],
            bitmap: Bitmap::new(),
        };
        assert_eq!(block.previous, genesis.hash());
        assert_ne!(block.hash(), genesis.hash());
    }

    #[test]
    fn test_merge() {
        let mut left = Bitmap::new();
        left.insert("a".into(), Verdict::Accepted);
        let mut right = Bitmap::new();
        right.insert("b".into(), Verdict::BadSignature);
        left.merge(right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.get("b"), Some(Verdict::BadSignature));
    }

    #[test]
    fn test_invalid_verdict() {
        let mut bitmap = Bitmap::new();
        bitmap.insert("a".into(), Verdict::Rejected);
        let mut encoded = bitmap.encode();
        let last = encoded.len() - 1;
        encoded[last] = 3;
        assert!(Bitmap::decode(encoded).is_err());
    }
}
