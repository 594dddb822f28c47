use crate::{envelope::ProofKind, wire::Phase};
use thiserror::Error;

/// Errors that can occur while running a survey.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("clear value outside of homomorphic range")]
    EncodingRange,
    #[error("decrypted point outside of lookup table")]
    DecryptOutOfRange,
    #[error("invalid {kind} proof: {reason}")]
    InvalidProof { kind: ProofKind, reason: String },
    #[error("survey {survey_id} timed out during {phase}")]
    ProtocolTimeout { phase: Phase, survey_id: String },
    #[error("missing contribution of {node_id} during {phase}")]
    MissingContribution { node_id: String, phase: Phase },
    #[error("unknown survey: {0}")]
    UnknownSurvey(String),
    #[error("bad envelope: {0}")]
    BadEnvelope(&'static str),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("insufficient {kind} proofs")]
    InsufficientProofs { kind: ProofKind },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("survey rejected: {0}")]
    Rejected(String),
    #[error("network: {0}")]
    Network(&'static str),
    #[error("encoding: {0}")]
    Encoding(drynx_encoding::Error),
    #[error("cryptography: {0}")]
    Cryptography(drynx_cryptography::Error),
    #[error("codec: {0}")]
    Codec(String),
}

impl Error {
    /// Process exit code of the simulation binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            Error::EncodingRange
            | Error::DecryptOutOfRange
            | Error::InvalidProof { .. }
            | Error::InsufficientProofs { .. }
            | Error::Encoding(_)
            | Error::Cryptography(_) => 4,
            _ => 3,
        }
    }
}

impl From<drynx_cryptography::Error> for Error {
    fn from(err: drynx_cryptography::Error) -> Self {
        match err {
            drynx_cryptography::Error::DecryptOutOfRange => Error::DecryptOutOfRange,
            err => Error::Cryptography(err),
        }
    }
}

impl From<drynx_encoding::Error> for Error {
    fn from(err: drynx_encoding::Error) -> Self {
        match err {
            drynx_encoding::Error::OutOfHomomorphicRange(_) => Error::EncodingRange,
            drynx_encoding::Error::Cryptography(err) => err.into(),
            err => Error::Encoding(err),
        }
    }
}

impl From<commonware_codec::Error> for Error {
    fn from(err: commonware_codec::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
