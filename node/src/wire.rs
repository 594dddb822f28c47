//! Messages exchanged between nodes.

use crate::{
    chain::{Bitmap, Block},
    envelope::ProofEnvelope,
    query::{Query, MAX_GROUPS},
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use drynx_cryptography::{CipherVector, Ciphertext};
use std::fmt;

/// Maximum length of a name (survey, node, differ info).
pub const MAX_NAME: usize = 256;

/// Maximum number of members of one role in a roster.
pub const MAX_MEMBERS: usize = 1024;

/// Maximum number of ciphertexts in one vector.
pub const MAX_CIPHERTEXTS: usize = 1 << 20;

/// Maximum number of records in a [Message::ProofsReply].
const MAX_RECORDS: usize = 1 << 20;

/// Maximum size of a stored record.
const MAX_RECORD: usize = 1 << 28;

pub(crate) fn write_string(value: &str, buf: &mut impl BufMut) {
    value.len().write(buf);
    buf.put_slice(value.as_bytes());
}

pub(crate) fn string_size(value: &str) -> usize {
    value.len().encode_size() + value.len()
}

pub(crate) fn read_string(buf: &mut impl Buf, max: usize) -> Result<String, CodecError> {
    let len = usize::read_cfg(buf, &RangeCfg::from(..=max))?;
    if buf.remaining() < len {
        return Err(CodecError::EndOfBuffer);
    }
    let mut bytes = vec![0; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| CodecError::Invalid("drynx::String", "Invalid UTF-8"))
}

fn write_vector(vector: &[Ciphertext], buf: &mut impl BufMut) {
    vector.len().write(buf);
    for ciphertext in vector {
        ciphertext.write(buf);
    }
}

fn vector_size(vector: &[Ciphertext]) -> usize {
    vector.len().encode_size() + vector.iter().map(EncodeSize::encode_size).sum::<usize>()
}

fn read_vector(buf: &mut impl Buf) -> Result<CipherVector, CodecError> {
    CipherVector::read_cfg(buf, &(RangeCfg::from(..=MAX_CIPHERTEXTS), ()))
}

/// A step of the survey protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Data providers answer the query.
    Collection,
    /// Computing nodes sum their children.
    Aggregation,
    Obfuscation,
    /// The noise list travels around the computing nodes.
    Shuffle,
    KeySwitch,
    /// Verifying nodes check the proofs of a survey.
    Verification,
}

impl Phase {
    fn tag(&self) -> u8 {
        match self {
            Phase::Collection => 0,
            Phase::Aggregation => 1,
            Phase::Obfuscation => 2,
            Phase::Shuffle => 3,
            Phase::KeySwitch => 4,
            Phase::Verification => 5,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Collection => "collection",
            Phase::Aggregation => "aggregation",
            Phase::Obfuscation => "obfuscation",
            Phase::Shuffle => "shuffle",
            Phase::KeySwitch => "key switch",
            Phase::Verification => "verification",
        };
        f.write_str(name)
    }
}

impl Write for Phase {
    fn write(&self, buf: &mut impl BufMut) {
        self.tag().write(buf);
    }
}

impl EncodeSize for Phase {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for Phase {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(Phase::Collection),
            1 => Ok(Phase::Aggregation),
            2 => Ok(Phase::Obfuscation),
            3 => Ok(Phase::Shuffle),
            4 => Ok(Phase::KeySwitch),
            5 => Ok(Phase::Verification),
            _ => Err(CodecError::Invalid("drynx::Phase", "Invalid type")),
        }
    }
}

/// Maximum length of a rejection reason.
const MAX_REASON: usize = 4 * MAX_NAME;

fn bounded(mut reason: String) -> String {
    if reason.len() > MAX_REASON {
        let mut end = MAX_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// Why a survey was aborted.
#[derive(Clone, Debug, PartialEq)]
pub enum Failure {
    Timeout { phase: Phase },
    /// `node` did not contribute before the deadline.
    Missing { node: String, phase: Phase },
    /// A clear value left the homomorphic window.
    EncodingRange,
    Rejected(String),
}

impl Failure {
    /// Describes `err` for the querier.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::ProtocolTimeout { phase, .. } => Failure::Timeout { phase: *phase },
            Error::MissingContribution { node_id, phase } => Failure::Missing {
                node: node_id.clone(),
                phase: *phase,
            },
            Error::EncodingRange => Failure::EncodingRange,
            Error::Rejected(reason) => Failure::Rejected(bounded(reason.clone())),
            err => Failure::Rejected(bounded(err.to_string())),
        }
    }

    pub fn into_error(self, survey_id: &str) -> Error {
        match self {
            Failure::Timeout { phase } => Error::ProtocolTimeout {
                phase,
                survey_id: survey_id.to_string(),
            },
            Failure::Missing { node, phase } => Error::MissingContribution {
                node_id: node,
                phase,
            },
            Failure::EncodingRange => Error::EncodingRange,
            Failure::Rejected(reason) => Error::Rejected(reason),
        }
    }
}

impl Write for Failure {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Failure::Timeout { phase } => {
                0u8.write(buf);
                phase.write(buf);
            }
            Failure::Missing { node, phase } => {
                1u8.write(buf);
                write_string(node, buf);
                phase.write(buf);
            }
            Failure::EncodingRange => 2u8.write(buf),
            Failure::Rejected(reason) => {
                3u8.write(buf);
                write_string(reason, buf);
            }
        }
    }
}

impl EncodeSize for Failure {
    fn encode_size(&self) -> usize {
        1 + match self {
            Failure::Timeout { .. } => 1,
            Failure::Missing { node, .. } => string_size(node) + 1,
            Failure::EncodingRange => 0,
            Failure::Rejected(reason) => string_size(reason),
        }
    }
}

impl Read for Failure {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(Failure::Timeout {
                phase: Phase::read(buf)?,
            }),
            1 => Ok(Failure::Missing {
                node: read_string(buf, MAX_NAME)?,
                phase: Phase::read(buf)?,
            }),
            2 => Ok(Failure::EncodingRange),
            3 => Ok(Failure::Rejected(read_string(buf, MAX_REASON)?)),
            _ => Err(CodecError::Invalid("drynx::Failure", "Invalid type")),
        }
    }
}

/// A stored proof, keyed by its identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
}

impl Write for Record {
    fn write(&self, buf: &mut impl BufMut) {
        write_string(&self.key, buf);
        self.value.len().write(buf);
        buf.put_slice(&self.value);
    }
}

impl EncodeSize for Record {
    fn encode_size(&self) -> usize {
        string_size(&self.key) + self.value.len().encode_size() + self.value.len()
    }
}

impl Read for Record {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let key = read_string(buf, 4 * MAX_NAME + 64)?;
        let len = usize::read_cfg(buf, &RangeCfg::from(..=MAX_RECORD))?;
        if buf.remaining() < len {
            return Err(CodecError::EndOfBuffer);
        }
        let mut value = vec![0; len];
        buf.copy_to_slice(&mut value);
        Ok(Self { key, value })
    }
}

/// Every message of the protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Querier to root computing node.
    SurveyQuery(Query),
    /// Computing node to its children in the tree.
    Announce(Query),
    /// Computing node to its data providers.
    SurveyQueryToDP(Query),
    /// Root computing node to verifying nodes.
    SurveyQueryToVN(Query),
    /// Data provider to its computing node.
    DataResponse {
        survey_id: String,
        vector: CipherVector,
    },
    /// Computing node to its parent, carrying the sum of its subtree.
    Aggregate {
        survey_id: String,
        vector: CipherVector,
    },
    /// The aggregate travelling around the ring of computing nodes.
    Obfuscate {
        survey_id: String,
        hop: u32,
        vector: CipherVector,
    },
    /// The noise list travelling around the ring of computing nodes.
    Shuffle {
        survey_id: String,
        hop: u32,
        vector: CipherVector,
    },
    /// Root to every computing node.
    KeySwitchRequest {
        survey_id: String,
        vector: CipherVector,
    },
    KeySwitchContribution {
        survey_id: String,
        switched: CipherVector,
    },
    /// Root to querier: the result of each group, switched to the querier key.
    SurveyResponse {
        survey_id: String,
        vectors: Vec<(String, CipherVector)>,
    },
    Failure {
        survey_id: String,
        failure: Failure,
    },
    Proof(ProofEnvelope),
    /// Verifying node to the root verifying node.
    Bitmap { survey_id: String, bitmap: Bitmap },
    /// Querier to the root verifying node, answered with [Message::BlockReply].
    EndVerification { survey_id: String },
    GetLatestBlock,
    GetGenesis,
    GetBlock { survey_id: String },
    GetProofs { survey_id: String },
    CloseDB { delete: bool },
    BlockReply(Option<Block>),
    ProofsReply(Vec<Record>),
    Ack,
}

impl Message {
    fn tag(&self) -> u8 {
        match self {
            Message::SurveyQuery(_) => 0,
            Message::Announce(_) => 1,
            Message::SurveyQueryToDP(_) => 2,
            Message::SurveyQueryToVN(_) => 3,
            Message::DataResponse { .. } => 4,
            Message::Aggregate { .. } => 5,
            Message::Obfuscate { .. } => 6,
            Message::Shuffle { .. } => 7,
            Message::KeySwitchRequest { .. } => 8,
            Message::KeySwitchContribution { .. } => 9,
            Message::SurveyResponse { .. } => 10,
            Message::Failure { .. } => 11,
            Message::Proof(_) => 12,
            Message::Bitmap { .. } => 13,
            Message::EndVerification { .. } => 14,
            Message::GetLatestBlock => 15,
            Message::GetGenesis => 16,
            Message::GetBlock { .. } => 17,
            Message::GetProofs { .. } => 18,
            Message::CloseDB { .. } => 19,
            Message::BlockReply(_) => 20,
            Message::ProofsReply(_) => 21,
            Message::Ack => 22,
        }
    }

    /// Survey the message belongs to, if any.
    pub fn survey_id(&self) -> Option<&str> {
        match self {
            Message::SurveyQuery(query)
            | Message::Announce(query)
            | Message::SurveyQueryToDP(query)
            | Message::SurveyQueryToVN(query) => Some(&query.survey_id),
            Message::DataResponse { survey_id, .. }
            | Message::Aggregate { survey_id, .. }
            | Message::Obfuscate { survey_id, .. }
            | Message::Shuffle { survey_id, .. }
            | Message::KeySwitchRequest { survey_id, .. }
            | Message::KeySwitchContribution { survey_id, .. }
            | Message::SurveyResponse { survey_id, .. }
            | Message::Failure { survey_id, .. }
            | Message::Bitmap { survey_id, .. }
            | Message::EndVerification { survey_id }
            | Message::GetBlock { survey_id }
            | Message::GetProofs { survey_id } => Some(survey_id),
            Message::Proof(envelope) => Some(&envelope.survey_id),
            _ => None,
        }
    }
}

impl Write for Message {
    fn write(&self, buf: &mut impl BufMut) {
        self.tag().write(buf);
        match self {
            Message::SurveyQuery(query)
            | Message::Announce(query)
            | Message::SurveyQueryToDP(query)
            | Message::SurveyQueryToVN(query) => query.write(buf),
            Message::DataResponse { survey_id, vector }
            | Message::Aggregate { survey_id, vector }
            | Message::KeySwitchRequest { survey_id, vector }
            | Message::KeySwitchContribution {
                survey_id,
                switched: vector,
            } => {
                write_string(survey_id, buf);
                write_vector(vector, buf);
            }
            Message::Obfuscate {
                survey_id,
                hop,
                vector,
            }
            | Message::Shuffle {
                survey_id,
                hop,
                vector,
            } => {
                write_string(survey_id, buf);
                hop.write(buf);
                write_vector(vector, buf);
            }
            Message::SurveyResponse { survey_id, vectors } => {
                write_string(survey_id, buf);
                vectors.len().write(buf);
                for (group, vector) in vectors {
                    write_string(group, buf);
                    write_vector(vector, buf);
                }
            }
            Message::Failure { survey_id, failure } => {
                write_string(survey_id, buf);
                failure.write(buf);
            }
            Message::Proof(envelope) => envelope.write(buf),
            Message::Bitmap { survey_id, bitmap } => {
                write_string(survey_id, buf);
                bitmap.write(buf);
            }
            Message::EndVerification { survey_id }
            | Message::GetBlock { survey_id }
            | Message::GetProofs { survey_id } => write_string(survey_id, buf),
            Message::GetLatestBlock | Message::GetGenesis | Message::Ack => {}
            Message::CloseDB { delete } => delete.write(buf),
            Message::BlockReply(block) => block.write(buf),
            Message::ProofsReply(records) => records.write(buf),
        }
    }
}

impl EncodeSize for Message {
    fn encode_size(&self) -> usize {
        1 + match self {
            Message::SurveyQuery(query)
            | Message::Announce(query)
            | Message::SurveyQueryToDP(query)
            | Message::SurveyQueryToVN(query) => query.encode_size(),
            Message::DataResponse { survey_id, vector }
            | Message::Aggregate { survey_id, vector }
            | Message::KeySwitchRequest { survey_id, vector }
            | Message::KeySwitchContribution {
                survey_id,
                switched: vector,
            } => string_size(survey_id) + vector_size(vector),
            Message::Obfuscate {
                survey_id,
                hop,
                vector,
            }
            | Message::Shuffle {
                survey_id,
                hop,
                vector,
            } => string_size(survey_id) + hop.encode_size() + vector_size(vector),
            Message::SurveyResponse { survey_id, vectors } => {
                string_size(survey_id)
                    + vectors.len().encode_size()
                    + vectors
                        .iter()
                        .map(|(group, vector)| string_size(group) + vector_size(vector))
                        .sum::<usize>()
            }
            Message::Failure { survey_id, failure } => {
                string_size(survey_id) + failure.encode_size()
            }
            Message::Proof(envelope) => envelope.encode_size(),
            Message::Bitmap { survey_id, bitmap } => {
                string_size(survey_id) + bitmap.encode_size()
            }
            Message::EndVerification { survey_id }
            | Message::GetBlock { survey_id }
            | Message::GetProofs { survey_id } => string_size(survey_id),
            Message::GetLatestBlock | Message::GetGenesis | Message::Ack => 0,
            Message::CloseDB { delete } => delete.encode_size(),
            Message::BlockReply(block) => block.encode_size(),
            Message::ProofsReply(records) => records.encode_size(),
        }
    }
}

impl Read for Message {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let tag = u8::read(buf)?;
        let message = match tag {
            0 => Message::SurveyQuery(Query::read(buf)?),
            1 => Message::Announce(Query::read(buf)?),
            2 => Message::SurveyQueryToDP(Query::read(buf)?),
            3 => Message::SurveyQueryToVN(Query::read(buf)?),
            4 => Message::DataResponse {
                survey_id: read_string(buf, MAX_NAME)?,
                vector: read_vector(buf)?,
            },
            5 => Message::Aggregate {
                survey_id: read_string(buf, MAX_NAME)?,
                vector: read_vector(buf)?,
            },
            6 => Message::Obfuscate {
                survey_id: read_string(buf, MAX_NAME)?,
                hop: u32::read(buf)?,
                vector: read_vector(buf)?,
            },
            7 => Message::Shuffle {
                survey_id: read_string(buf, MAX_NAME)?,
                hop: u32::read(buf)?,
                vector: read_vector(buf)?,
            },
            8 => Message::KeySwitchRequest {
                survey_id: read_string(buf, MAX_NAME)?,
                vector: read_vector(buf)?,
            },
            9 => Message::KeySwitchContribution {
                survey_id: read_string(buf, MAX_NAME)?,
                switched: read_vector(buf)?,
            },
            10 => {
                let survey_id = read_string(buf, MAX_NAME)?;
                let len = usize::read_cfg(buf, &RangeCfg::from(..=MAX_GROUPS))?;
                let mut vectors = Vec::with_capacity(len);
                for _ in 0..len {
                    vectors.push((read_string(buf, MAX_NAME)?, read_vector(buf)?));
                }
                Message::SurveyResponse { survey_id, vectors }
            }
            11 => Message::Failure {
                survey_id: read_string(buf, MAX_NAME)?,
                failure: Failure::read(buf)?,
            },
            12 => Message::Proof(ProofEnvelope::read(buf)?),
            13 => Message::Bitmap {
                survey_id: read_string(buf, MAX_NAME)?,
                bitmap: Bitmap::read(buf)?,
            },
            14 => Message::EndVerification {
                survey_id: read_string(buf, MAX_NAME)?,
            },
            15 => Message::GetLatestBlock,
            16 => Message::GetGenesis,
            17 => Message::GetBlock {
                survey_id: read_string(buf, MAX_NAME)?,
            },
            18 => Message::GetProofs {
                survey_id: read_string(buf, MAX_NAME)?,
            },
            19 => Message::CloseDB {
                delete: bool::read(buf)?,
            },
            20 => Message::BlockReply(Option::<Block>::read_cfg(buf, &())?),
            21 => Message::ProofsReply(Vec::<Record>::read_cfg(
                buf,
                &(RangeCfg::from(..=MAX_RECORDS), ()),
            )?),
            22 => Message::Ack,
            _ => return Err(CodecError::Invalid("drynx::Message", "Invalid type")),
        };
        Ok(message)
    }
}
