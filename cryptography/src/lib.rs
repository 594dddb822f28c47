//! Encrypt, aggregate, and prove statements about homomorphic ciphertexts.
//!
//! All encryption happens in the primary group [group::G1] of BLS12-381. The
//! companion group [group::G2] and the pairing ([group::Pairing]) are used
//! exclusively by [range] proofs.
//!
//! # Status
//!
//! `drynx-cryptography` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use thiserror::Error;

pub mod aggregation;
pub mod elgamal;
pub mod group;
pub mod key_switch;
pub mod obfuscation;
pub mod range;
pub mod shuffle;
pub mod table;
pub mod transcript;

pub use elgamal::{CipherVector, Ciphertext, Keypair};
pub use group::{Bls12381, Element, Pairing, Point, Scalar, G1, G2, GT};
pub use table::DecryptionTable;

/// Errors that can occur when working with ciphertexts and proofs.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("decrypted point outside of lookup table")]
    DecryptOutOfRange,
    #[error("invalid proof: {0}")]
    InvalidProof(&'static str),
    #[error("length mismatch: expected {0}, got {1}")]
    LengthMismatch(usize, usize),
    #[error("invalid range: u={0} l={1}")]
    InvalidRange(u64, usize),
    #[error("value out of range: {0}")]
    ValueOutOfRange(i64),
    #[error("missing range signatures")]
    MissingSignatures,
    #[error("missing contributions")]
    MissingContributions,
    #[error("empty shuffle")]
    EmptyShuffle,
    #[error("invalid permutation")]
    InvalidPermutation,
}
