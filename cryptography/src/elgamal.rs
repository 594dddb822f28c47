//! Additively homomorphic ElGamal over [G1].
//!
//! A value `v` encrypted under public key `P` with nonce `r` is the pair
//! `(K, C) = (r*B, v*B + r*P)`. Adding two ciphertexts adds their plaintexts
//! and multiplying a ciphertext by a scalar multiplies its plaintext.

use crate::{
    group::{Element, Scalar, G1, G1_ELEMENT_BYTE_LENGTH},
    table::DecryptionTable,
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, Read, ReadExt, Write};
use rand::{CryptoRng, RngCore};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// An ElGamal key pair.
#[derive(Clone, Copy, Debug)]
pub struct Keypair {
    pub secret: Scalar,
    pub public: G1,
}

impl Keypair {
    /// Samples a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(Scalar::rand_nonzero(rng))
    }

    /// Derives the public key of `secret`.
    pub fn from_secret(secret: Scalar) -> Self {
        Self {
            secret,
            public: G1::base_mul(&secret),
        }
    }
}

/// An ElGamal ciphertext `(K, C)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    pub k: G1,
    pub c: G1,
}

/// Encoded length of a [Ciphertext].
pub const CIPHERTEXT_LENGTH: usize = 2 * G1_ELEMENT_BYTE_LENGTH;

/// An ordered sequence of ciphertexts, operated on componentwise.
pub type CipherVector = Vec<Ciphertext>;

impl Ciphertext {
    /// The encryption of zero with a zero nonce.
    pub fn zero() -> Self {
        Self {
            k: G1::zero(),
            c: G1::zero(),
        }
    }

    /// Re-randomizes the ciphertext with a fresh nonce, returning the nonce.
    pub fn rerandomize<R: RngCore + CryptoRng>(&self, rng: &mut R, public: &G1) -> (Self, Scalar) {
        let beta = Scalar::rand(rng);
        (self.rerandomize_with(public, &beta), beta)
    }

    /// Adds `(beta*B, beta*P)` to the ciphertext.
    pub fn rerandomize_with(&self, public: &G1, beta: &Scalar) -> Self {
        Self {
            k: self.k + G1::base_mul(beta),
            c: self.c + *public * *beta,
        }
    }
}

impl Add for Ciphertext {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            k: self.k + rhs.k,
            c: self.c + rhs.c,
        }
    }
}

impl AddAssign for Ciphertext {
    fn add_assign(&mut self, rhs: Self) {
        self.k += rhs.k;
        self.c += rhs.c;
    }
}

impl Sub for Ciphertext {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Neg for Ciphertext {
    type Output = Self;
    fn neg(self) -> Self {
        Self {
            k: -self.k,
            c: -self.c,
        }
    }
}

impl Mul<Scalar> for Ciphertext {
    type Output = Self;
    fn mul(self, rhs: Scalar) -> Self {
        Self {
            k: self.k * rhs,
            c: self.c * rhs,
        }
    }
}

impl std::iter::Sum for Ciphertext {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, x| acc + x)
    }
}

impl Write for Ciphertext {
    fn write(&self, buf: &mut impl BufMut) {
        self.k.write(buf);
        self.c.write(buf);
    }
}

impl EncodeSize for Ciphertext {
    fn encode_size(&self) -> usize {
        CIPHERTEXT_LENGTH
    }
}

impl Read for Ciphertext {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let k = G1::read(buf)?;
        let c = G1::read(buf)?;
        Ok(Self { k, c })
    }
}

/// Encrypts the point `m` with nonce `r`.
pub fn encrypt_point_with(public: &G1, m: &G1, r: &Scalar) -> Ciphertext {
    Ciphertext {
        k: G1::base_mul(r),
        c: *m + *public * *r,
    }
}

/// Encrypts the integer `v` and returns the nonce used.
pub fn encrypt_with_nonce<R: RngCore + CryptoRng>(
    rng: &mut R,
    public: &G1,
    v: i64,
) -> (Ciphertext, Scalar) {
    encrypt_scalar(rng, public, &Scalar::from_i64(v))
}

/// Encrypts the integer `v`.
pub fn encrypt<R: RngCore + CryptoRng>(rng: &mut R, public: &G1, v: i64) -> Ciphertext {
    encrypt_with_nonce(rng, public, v).0
}

/// Encrypts an arbitrary scalar (its decryption is generally outside of any lookup table).
pub fn encrypt_scalar<R: RngCore + CryptoRng>(
    rng: &mut R,
    public: &G1,
    s: &Scalar,
) -> (Ciphertext, Scalar) {
    let r = Scalar::rand(rng);
    (encrypt_point_with(public, &G1::base_mul(s), &r), r)
}

/// Encrypts every integer of `values`, returning the nonces alongside.
pub fn encrypt_vector<R: RngCore + CryptoRng>(
    rng: &mut R,
    public: &G1,
    values: &[i64],
) -> (CipherVector, Vec<Scalar>) {
    values
        .iter()
        .map(|v| encrypt_with_nonce(rng, public, *v))
        .unzip()
}

/// Encryption with a zero nonce, `(0, v*B)`.
pub fn encrypt_trivial(v: i64) -> Ciphertext {
    Ciphertext {
        k: G1::zero(),
        c: G1::from_i64(v),
    }
}

/// Returns `C - x*K`.
pub fn decrypt_point(secret: &Scalar, ciphertext: &Ciphertext) -> G1 {
    ciphertext.c - ciphertext.k * *secret
}

/// Decrypts an integer inside the window of `table`.
pub fn decrypt(
    table: &DecryptionTable,
    secret: &Scalar,
    ciphertext: &Ciphertext,
) -> Result<i64, Error> {
    table.lookup(&decrypt_point(secret, ciphertext))
}

/// Returns whether the ciphertext encrypts zero.
pub fn decrypt_check_zero(secret: &Scalar, ciphertext: &Ciphertext) -> bool {
    decrypt_point(secret, ciphertext).is_zero()
}

/// Decrypts every ciphertext of `vector`.
pub fn decrypt_vector(
    table: &DecryptionTable,
    secret: &Scalar,
    vector: &[Ciphertext],
) -> Result<Vec<i64>, Error> {
    vector
        .iter()
        .map(|ciphertext| decrypt(table, secret, ciphertext))
        .collect()
}

/// Adds `other` to `acc` componentwise.
pub fn add_vectors(acc: &mut [Ciphertext], other: &[Ciphertext]) -> Result<(), Error> {
    if acc.len() != other.len() {
        return Err(Error::LengthMismatch(acc.len(), other.len()));
    }
    for (a, b) in acc.iter_mut().zip(other) {
        *a += *b;
    }
    Ok(())
}

/// Sums a set of equally sized vectors componentwise.
pub fn sum_vectors<'a, I>(len: usize, vectors: I) -> Result<CipherVector, Error>
where
    I: IntoIterator<Item = &'a [Ciphertext]>,
{
    let mut acc = vec![Ciphertext::zero(); len];
    for vector in vectors {
        add_vectors(&mut acc, vector)?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    fn table() -> DecryptionTable {
        DecryptionTable::new(1_000)
    }

    #[test]
    fn test_decrypt_encrypt() {
        let mut rng = StdRng::seed_from_u64(0);
        let keys = Keypair::generate(&mut rng);
        let table = table();
        for v in [-1_000, -7, 0, 1, 42, 1_000] {
            let ct = encrypt(&mut rng, &keys.public, v);
            assert_eq!(decrypt(&table, &keys.secret, &ct).unwrap(), v);
        }
    }

    #[test]
    fn test_homomorphic_addition() {
        let mut rng = StdRng::seed_from_u64(1);
        let keys = Keypair::generate(&mut rng);
        let table = table();
        let a = encrypt(&mut rng, &keys.public, 17);
        let b = encrypt(&mut rng, &keys.public, -30);
        assert_eq!(decrypt(&table, &keys.secret, &(a + b)).unwrap(), -13);
        assert_eq!(decrypt(&table, &keys.secret, &(a - b)).unwrap(), 47);
        assert_eq!(
            decrypt(&table, &keys.secret, &(a * Scalar::from_u64(3))).unwrap(),
            51
        );
    }

    #[test]
    fn test_out_of_range() {
        let mut rng = StdRng::seed_from_u64(2);
        let keys = Keypair::generate(&mut rng);
        let ct = encrypt(&mut rng, &keys.public, 1_001);
        assert_eq!(
            decrypt(&table(), &keys.secret, &ct),
            Err(Error::DecryptOutOfRange)
        );
    }

    #[test]
    fn test_check_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        let keys = Keypair::generate(&mut rng);
        let scalar = Scalar::rand_nonzero(&mut rng);
        let (random, _) = encrypt_scalar(&mut rng, &keys.public, &scalar);
        assert!(!decrypt_check_zero(&keys.secret, &random));
        let zero = encrypt(&mut rng, &keys.public, 0);
        assert!(decrypt_check_zero(&keys.secret, &zero));
        assert!(decrypt_check_zero(&keys.secret, &Ciphertext::zero()));
    }

    #[test]
    fn test_rerandomize_preserves_plaintext() {
        let mut rng = StdRng::seed_from_u64(4);
        let keys = Keypair::generate(&mut rng);
        let ct = encrypt(&mut rng, &keys.public, 9);
        let (fresh, _) = ct.rerandomize(&mut rng, &keys.public);
        assert_ne!(fresh, ct);
        assert_eq!(decrypt(&table(), &keys.secret, &fresh).unwrap(), 9);
        let trivial = encrypt_trivial(5).rerandomize(&mut rng, &keys.public).0;
        assert_eq!(decrypt(&table(), &keys.secret, &trivial).unwrap(), 5);
    }

    #[test]
    fn test_vectors() {
        let mut rng = StdRng::seed_from_u64(5);
        let keys = Keypair::generate(&mut rng);
        let (a, _) = encrypt_vector(&mut rng, &keys.public, &[1, 2, 3]);
        let (b, _) = encrypt_vector(&mut rng, &keys.public, &[10, 20, 30]);
        let sum = sum_vectors(3, [a.as_slice(), b.as_slice()]).unwrap();
        assert_eq!(
            decrypt_vector(&table(), &keys.secret, &sum).unwrap(),
            vec![11, 22, 33]
        );
        let mut short = vec![Ciphertext::zero(); 2];
        assert_eq!(
            add_vectors(&mut short, &a),
            Err(Error::LengthMismatch(2, 3))
        );
    }

    #[test]
    fn test_codec() {
        let mut rng = StdRng::seed_from_u64(6);
        let keys = Keypair::generate(&mut rng);
        let ct = encrypt(&mut rng, &keys.public, 3);
        let encoded = ct.encode();
        assert_eq!(encoded.len(), CIPHERTEXT_LENGTH);
        assert_eq!(Ciphertext::decode(encoded).unwrap(), ct);
    }

    #[test]
    fn test_encoded_sizes() {
        let mut rng = StdRng::seed_from_u64(7);
        let keys = Keypair::generate(&mut rng);
        assert_eq!(CIPHERTEXT_LENGTH, 96);
        assert_eq!(encrypt(&mut rng, &keys.public, -4).encode().len(), 96);
        assert_eq!(Ciphertext::zero().encode().len(), 96);

        // Vectors carry a varint length prefix
        let (vector, _) = encrypt_vector(&mut rng, &keys.public, &[1, 2, 3]);
        assert_eq!(vector.encode().len(), 1 + 3 * 96);
    }
}
