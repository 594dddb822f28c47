//! Encrypted bits reduced with OR or AND under homomorphic addition.
//!
//! A bit is encrypted so that only "is the plaintext zero" matters:
//!
//! * OR: a set bit contributes a non-zero plaintext, a cleared bit contributes zero.
//!   The sum is zero iff every bit is cleared.
//! * AND: a cleared bit contributes a non-zero plaintext, a set bit contributes zero.
//!   The sum is zero iff every bit is set.
//!
//! Without range proofs the non-zero plaintext is a random scalar. With range
//! proofs it is `1`, so that every slot can be proven to lie in `[0, 2)`.

use crate::Encoded;
use drynx_cryptography::{
    elgamal::{encrypt_scalar, encrypt_with_nonce},
    Ciphertext, Scalar, G1,
};
use rand::{CryptoRng, RngCore};

/// How the bits of several data providers are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Or,
    And,
}

impl Reduction {
    /// Returns whether `bit` must be encrypted as a non-zero plaintext.
    fn marks(&self, bit: bool) -> bool {
        match self {
            Reduction::Or => bit,
            Reduction::And => !bit,
        }
    }

    /// Recovers the reduced bit from the zero predicate of the aggregate.
    pub fn decode(&self, is_zero: bool) -> bool {
        match self {
            Reduction::Or => !is_zero,
            Reduction::And => is_zero,
        }
    }
}

/// Encrypts one bit, returning the ciphertext, its clear value and its nonce.
pub fn encrypt_bit<R: RngCore + CryptoRng>(
    rng: &mut R,
    public: &G1,
    bit: bool,
    reduction: Reduction,
    proofs: bool,
) -> (Ciphertext, i64, Scalar) {
    let marked = reduction.marks(bit);
    let clear = marked as i64;
    if proofs {
        let (ciphertext, nonce) = encrypt_with_nonce(rng, public, clear);
        return (ciphertext, clear, nonce);
    }
    let plaintext = if marked {
        Scalar::rand_nonzero(rng)
    } else {
        Scalar::from_u64(0)
    };
    let (ciphertext, nonce) = encrypt_scalar(rng, public, &plaintext);
    (ciphertext, clear, nonce)
}

/// Encrypts a vector of bits.
pub fn encode<R: RngCore + CryptoRng>(
    rng: &mut R,
    public: &G1,
    bits: &[bool],
    reduction: Reduction,
    proofs: bool,
) -> Encoded {
    let mut encoded = Encoded {
        ciphertexts: Vec::with_capacity(bits.len()),
        clear: Vec::with_capacity(bits.len()),
        nonces: Vec::with_capacity(bits.len()),
    };
    for bit in bits {
        let (ciphertext, clear, nonce) = encrypt_bit(rng, public, *bit, reduction, proofs);
        encoded.ciphertexts.push(ciphertext);
        encoded.clear.push(clear);
        encoded.nonces.push(nonce);
    }
    encoded
}

/// Local OR over a column of booleans (non-zero is true).
pub fn local_or(values: &[i64]) -> bool {
    values.iter().any(|v| *v != 0)
}

/// Local AND over a column of booleans (non-zero is true).
pub fn local_and(values: &[i64]) -> bool {
    values.iter().all(|v| *v != 0)
}
