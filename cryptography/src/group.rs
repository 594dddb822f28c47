//! Group operations over BLS12-381.
//!
//! [G1] is the primary group: every ElGamal ciphertext and every proof except
//! the range proof lives there. [G2] hosts the range-proof signatures and
//! [GT] is the target of the pairing `e: G1 x G2 -> GT`. Code that only needs
//! the primary group depends on [Element]; the range proof additionally
//! depends on [Pairing].
//!
//! # Warning
//!
//! Points received from untrusted sources must be checked to belong to the
//! correct subgroup. This is already taken care of when using the provided
//! `deserialize` functions and codec implementations.

use blst::{
    blst_bendian_from_fp, blst_final_exp, blst_fp, blst_fp12, blst_fp_from_bendian, blst_fp12_mul, blst_fp12_one,
    blst_fr, blst_fr_add, blst_fr_from_scalar, blst_fr_from_uint64, blst_fr_inverse,
    blst_fr_mul, blst_fr_sub, blst_hash_to_g1, blst_hash_to_g2, blst_keygen_v3,
    blst_lendian_from_scalar, blst_miller_loop, blst_p1, blst_p1_add_or_double,
    blst_p1_affine, blst_p1_affine_is_inf, blst_p1_cneg, blst_p1_compress, blst_p1_from_affine,
    blst_p1_in_g1, blst_p1_is_inf, blst_p1_mult, blst_p1_to_affine, blst_p1_uncompress,
    blst_p2, blst_p2_add_or_double, blst_p2_affine, blst_p2_affine_is_inf, blst_p2_cneg,
    blst_p2_compress, blst_p2_from_affine, blst_p2_in_g2, blst_p2_is_inf, blst_p2_mult,
    blst_p2_to_affine, blst_p2_uncompress, blst_scalar, blst_scalar_fr_check,
    blst_scalar_from_be_bytes, blst_scalar_from_fr, blst_scalar_from_lendian, BLS12_381_G1,
    BLS12_381_G2, BLST_ERROR,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, Read, Write};
use rand::RngCore;
use std::{
    fmt,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    ptr,
};
use zeroize::Zeroize;

/// An element of a group.
pub trait Element: Copy + Clone + Eq + PartialEq + Send + Sync + fmt::Debug {
    /// Returns the additive identity.
    fn zero() -> Self;

    /// Returns the multiplicative identity (the generator for curve groups).
    fn one() -> Self;

    /// Adds to self in-place.
    fn add(&mut self, rhs: &Self);

    /// Multiplies self in-place.
    fn mul(&mut self, rhs: &Scalar);

    /// Negates self in-place.
    fn neg(&mut self);

    /// Canonically serializes the element.
    fn serialize(&self) -> Vec<u8>;

    /// Serialized size of the element.
    fn size() -> usize;

    /// Deserializes a canonically encoded element.
    fn deserialize(bytes: &[u8]) -> Option<Self>;
}

/// An element of a group that supports message hashing.
pub trait Point: Element {
    /// Maps the provided data to a group element using the given domain separation tag.
    fn map(&mut self, dst: &[u8], message: &[u8]);
}

/// Pairing capability, required only by the range proof.
pub trait Pairing {
    /// The primary group.
    type G1: Point;
    /// The companion group hosting signatures.
    type G2: Point;
    /// The target group.
    type GT: Eq + Copy + fmt::Debug;

    /// Computes `e(p, q)`.
    fn pair(p: &Self::G1, q: &Self::G2) -> Self::GT;

    /// Computes `prod_i e(p_i, q_i)` with a single final exponentiation.
    fn multi_pair(pairs: &[(Self::G1, Self::G2)]) -> Self::GT;
}

/// The BLS12-381 backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bls12381;

#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub struct Scalar(blst_fr);

/// Encoded length of a [Scalar].
pub const SCALAR_LENGTH: usize = 32;

/// `R = 2^256 mod q` in little-endian Montgomery form which is equivalent to 1 in little-endian
/// non-Montgomery form.
///
/// mod(2^256, 0x73eda753299d7d483339d80809a1d80553bda402fffe5bfeffffffff00000001) = 0x1824b159acc5056f998c4fefecbc4ff55884b7fa0003480200000001fffffffe
// Reference: https://github.com/filecoin-project/blstrs/blob/ffbb41d1495d84e40a712583346439924603b49a/src/scalar.rs#L77-L89
const BLST_FR_ONE: Scalar = Scalar(blst_fr {
    l: [
        0x0000_0001_ffff_fffe,
        0x5884_b7fa_0003_4802,
        0x998c_4fef_ecbc_4ff5,
        0x1824_b159_acc5_056f,
    ],
});

#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub struct G1(blst_p1);

/// Encoded length of a compressed [G1] point.
pub const G1_ELEMENT_BYTE_LENGTH: usize = 48;

/// Domain separation tag for deriving independent generators in G1.
pub const DST_G1: &[u8] = b"DRYNX_G1_XMD:SHA-256_SSWU_RO_";

#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub struct G2(blst_p2);

/// Encoded length of a compressed [G2] point.
pub const G2_ELEMENT_BYTE_LENGTH: usize = 96;

/// Domain separation tag for deriving independent generators in G2.
pub const DST_G2: &[u8] = b"DRYNX_G2_XMD:SHA-256_SSWU_RO_";

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct GT(blst_fp12);

/// Encoded length of a [GT] element (12 base field elements).
pub const GT_ELEMENT_BYTE_LENGTH: usize = 576;

/// Returns the size in bits of a given blst_scalar (represented in little-endian).
fn bits(scalar: &blst_scalar) -> usize {
    let mut bits: usize = SCALAR_LENGTH * 8;
    for i in scalar.b.iter().rev() {
        let leading = i.leading_zeros();
        bits -= leading as usize;
        if leading < 8 {
            break;
        }
    }
    bits
}

impl Scalar {
    /// Generates a random scalar using the provided RNG.
    pub fn rand<R: RngCore>(rng: &mut R) -> Self {
        // Generate a random 64 byte buffer
        let mut ikm = [0u8; 64];
        rng.fill_bytes(&mut ikm);

        // Generate a scalar from the randomly populated buffer
        let mut ret = blst_fr::default();
        unsafe {
            let mut sc = blst_scalar::default();
            blst_keygen_v3(&mut sc, ikm.as_ptr(), ikm.len(), ptr::null(), 0);
            blst_fr_from_scalar(&mut ret, &sc);
        }
        ikm.zeroize();
        Self(ret)
    }

    /// Generates a random non-zero scalar.
    pub fn rand_nonzero<R: RngCore>(rng: &mut R) -> Self {
        loop {
            let s = Self::rand(rng);
            if s != Self::zero() {
                return s;
            }
        }
    }

    /// Returns the scalar corresponding to an unsigned integer.
    pub fn from_u64(i: u64) -> Self {
        // blst requires a buffer of 4 uint64 values. Failure to provide one will
        // result in unexpected behavior (will read past the provided buffer).
        //
        // Reference: https://github.com/supranational/blst/blob/415d4f0e2347a794091836a3065206edfd9c72f3/bindings/blst.h#L102
        let buffer = [i, 0, 0, 0];
        let mut ret = blst_fr::default();
        unsafe { blst_fr_from_uint64(&mut ret, buffer.as_ptr()) };
        Self(ret)
    }

    /// Returns the scalar corresponding to a signed integer (negative values wrap modulo the
    /// group order).
    pub fn from_i64(i: i64) -> Self {
        let magnitude = Self::from_u64(i.unsigned_abs());
        if i < 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Reduces a big-endian byte string of arbitrary length modulo the group order.
    pub fn from_be_bytes_reduced(bytes: &[u8]) -> Self {
        let mut ret = blst_fr::default();
        unsafe {
            let mut scalar = blst_scalar::default();
            blst_scalar_from_be_bytes(&mut scalar, bytes.as_ptr(), bytes.len());
            blst_fr_from_scalar(&mut ret, &scalar);
        }
        Self(ret)
    }

    /// Computes the inverse of the scalar.
    pub fn inverse(&self) -> Option<Self> {
        if *self == Self::zero() {
            return None;
        }
        let mut ret = blst_fr::default();
        unsafe { blst_fr_inverse(&mut ret, &self.0) };
        Some(Self(ret))
    }

    /// Subtracts the provided scalar from self in-place.
    pub fn sub(&mut self, rhs: &Self) {
        unsafe { blst_fr_sub(&mut self.0, &self.0, &rhs.0) }
    }

    /// Returns `self^e` for a small exponent.
    pub fn pow(&self, mut e: u64) -> Self {
        let mut base = *self;
        let mut acc = Self::one();
        while e > 0 {
            if e & 1 == 1 {
                acc = acc * base;
            }
            base = base * base;
            e >>= 1;
        }
        acc
    }
}

impl Zeroize for Scalar {
    fn zeroize(&mut self) {
        self.0.l.zeroize();
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({})", commonware_utils::hex(&self.serialize()))
    }
}

impl Element for Scalar {
    fn zero() -> Self {
        Self(blst_fr::default())
    }

    fn one() -> Self {
        BLST_FR_ONE
    }

    fn add(&mut self, rhs: &Self) {
        unsafe {
            blst_fr_add(&mut self.0, &self.0, &rhs.0);
        }
    }

    fn mul(&mut self, rhs: &Self) {
        unsafe {
            blst_fr_mul(&mut self.0, &self.0, &rhs.0);
        }
    }

    fn neg(&mut self) {
        let mut ret = Self::zero();
        Scalar::sub(&mut ret, self);
        *self = ret;
    }

    fn serialize(&self) -> Vec<u8> {
        let mut bytes = [0u8; SCALAR_LENGTH];
        unsafe {
            let mut scalar = blst_scalar::default();
            blst_scalar_from_fr(&mut scalar, &self.0);
            blst_lendian_from_scalar(bytes.as_mut_ptr(), &scalar);
        }
        bytes.to_vec()
    }

    fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SCALAR_LENGTH {
            return None;
        }
        let mut ret = blst_fr::default();
        unsafe {
            let mut scalar = blst_scalar::default();
            blst_scalar_from_lendian(&mut scalar, bytes.as_ptr());
            if !blst_scalar_fr_check(&scalar) {
                return None;
            }
            blst_fr_from_scalar(&mut ret, &scalar);
        }
        Some(Self(ret))
    }

    fn size() -> usize {
        SCALAR_LENGTH
    }
}

impl G1 {
    /// Returns `s * B` for the fixed generator `B`.
    pub fn base_mul(s: &Scalar) -> Self {
        let mut p = <Self as Element>::one();
        Element::mul(&mut p, s);
        p
    }

    /// Returns `i * B` for a signed integer.
    pub fn from_i64(i: i64) -> Self {
        Self::base_mul(&Scalar::from_i64(i))
    }

    /// Derives a generator with unknown discrete log relative to `B`.
    pub fn hash(label: &[u8]) -> Self {
        let mut p = Self::zero();
        p.map(DST_G1, label);
        p
    }

    /// Returns whether the point is the identity.
    pub fn is_zero(&self) -> bool {
        unsafe { blst_p1_is_inf(&self.0) }
    }
}

impl fmt::Debug for G1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G1({})", commonware_utils::hex(&self.serialize()))
    }
}

impl Element for G1 {
    fn zero() -> Self {
        Self(blst_p1::default())
    }

    fn one() -> Self {
        let mut ret = blst_p1::default();
        unsafe {
            blst_p1_from_affine(&mut ret, &BLS12_381_G1);
        }
        Self(ret)
    }

    fn add(&mut self, rhs: &Self) {
        unsafe {
            blst_p1_add_or_double(&mut self.0, &self.0, &rhs.0);
        }
    }

    fn mul(&mut self, rhs: &Scalar) {
        let mut scalar: blst_scalar = blst_scalar::default();
        unsafe {
            blst_scalar_from_fr(&mut scalar, &rhs.0);
            let nbits = bits(&scalar);
            if nbits == 0 {
                *self = Self::zero();
                return;
            }
            blst_p1_mult(&mut self.0, &self.0, scalar.b.as_ptr(), nbits);
        }
    }

    fn neg(&mut self) {
        unsafe {
            blst_p1_cneg(&mut self.0, true);
        }
    }

    fn serialize(&self) -> Vec<u8> {
        let mut bytes = [0u8; G1_ELEMENT_BYTE_LENGTH];
        unsafe {
            blst_p1_compress(bytes.as_mut_ptr(), &self.0);
        }
        bytes.to_vec()
    }

    fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != G1_ELEMENT_BYTE_LENGTH {
            return None;
        }
        let mut ret = blst_p1::default();
        unsafe {
            let mut affine = blst_p1_affine::default();
            if blst_p1_uncompress(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
                return None;
            }

            // The identity is a legitimate ciphertext component
            if blst_p1_affine_is_inf(&affine) {
                return Some(Self::zero());
            }
            blst_p1_from_affine(&mut ret, &affine);

            // Verify that the deserialized element is in G1
            if !blst_p1_in_g1(&ret) {
                return None;
            }
        }
        Some(Self(ret))
    }

    fn size() -> usize {
        G1_ELEMENT_BYTE_LENGTH
    }
}

impl Point for G1 {
    fn map(&mut self, dst: &[u8], data: &[u8]) {
        unsafe {
            blst_hash_to_g1(
                &mut self.0,
                data.as_ptr(),
                data.len(),
                dst.as_ptr(),
                dst.len(),
                ptr::null(),
                0,
            );
        }
    }
}

impl G2 {
    /// Returns `s * B2` for the fixed generator `B2`.
    pub fn base_mul(s: &Scalar) -> Self {
        let mut p = <Self as Element>::one();
        Element::mul(&mut p, s);
        p
    }

    /// Returns whether the point is the identity.
    pub fn is_zero(&self) -> bool {
        unsafe { blst_p2_is_inf(&self.0) }
    }
}

impl fmt::Debug for G2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G2({})", commonware_utils::hex(&self.serialize()))
    }
}

impl Element for G2 {
    fn zero() -> Self {
        Self(blst_p2::default())
    }

    fn one() -> Self {
        let mut ret = blst_p2::default();
        unsafe {
            blst_p2_from_affine(&mut ret, &BLS12_381_G2);
        }
        Self(ret)
    }

    fn add(&mut self, rhs: &Self) {
        unsafe {
            blst_p2_add_or_double(&mut self.0, &self.0, &rhs.0);
        }
    }

    fn mul(&mut self, rhs: &Scalar) {
        let mut scalar = blst_scalar::default();
        unsafe {
            blst_scalar_from_fr(&mut scalar, &rhs.0);
            let nbits = bits(&scalar);
            if nbits == 0 {
                *self = Self::zero();
                return;
            }
            blst_p2_mult(&mut self.0, &self.0, scalar.b.as_ptr(), nbits);
        }
    }

    fn neg(&mut self) {
        unsafe {
            blst_p2_cneg(&mut self.0, true);
        }
    }

    fn serialize(&self) -> Vec<u8> {
        let mut bytes = [0u8; G2_ELEMENT_BYTE_LENGTH];
        unsafe {
            blst_p2_compress(bytes.as_mut_ptr(), &self.0);
        }
        bytes.to_vec()
    }

    fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != G2_ELEMENT_BYTE_LENGTH {
            return None;
        }
        let mut ret = blst_p2::default();
        unsafe {
            let mut affine = blst_p2_affine::default();
            if blst_p2_uncompress(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
                return None;
            }
            if blst_p2_affine_is_inf(&affine) {
                return Some(Self::zero());
            }
            blst_p2_from_affine(&mut ret, &affine);

            // Verify that the deserialized element is in G2
            if !blst_p2_in_g2(&ret) {
                return None;
            }
        }
        Some(Self(ret))
    }

    fn size() -> usize {
        G2_ELEMENT_BYTE_LENGTH
    }
}

impl Point for G2 {
    fn map(&mut self, dst: &[u8], data: &[u8]) {
        unsafe {
            blst_hash_to_g2(
                &mut self.0,
                data.as_ptr(),
                data.len(),
                dst.as_ptr(),
                dst.len(),
                ptr::null(),
                0,
            );
        }
    }
}

impl GT {
    /// Canonical big-endian encoding, used when binding pairing values into transcripts.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(GT_ELEMENT_BYTE_LENGTH);
        for fp6 in self.0.fp6.iter() {
            for fp2 in fp6.fp2.iter() {
                for fp in fp2.fp.iter() {
                    out.extend_from_slice(&fp_bytes(fp));
                }
            }
        }
        out
    }

    /// Decodes the output of [GT::serialize].
    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != GT_ELEMENT_BYTE_LENGTH {
            return None;
        }
        let mut ret = blst_fp12::default();
        let mut chunks = bytes.chunks_exact(48);
        for fp6 in ret.fp6.iter_mut() {
            for fp2 in fp6.fp2.iter_mut() {
                for fp in fp2.fp.iter_mut() {
                    let chunk = chunks.next()?;
                    unsafe {
                        blst_fp_from_bendian(fp, chunk.as_ptr());
                    }
                }
            }
        }
        Some(Self(ret))
    }

    /// Multiplies self in-place (the group law of GT is written multiplicatively).
    pub fn mul(&mut self, rhs: &Self) {
        unsafe {
            blst_fp12_mul(&mut self.0, &self.0, &rhs.0);
        }
    }
}

impl fmt::Debug for GT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.serialize();
        write!(f, "GT({}..)", commonware_utils::hex(&bytes[..8]))
    }
}

fn fp_bytes(fp: &blst_fp) -> [u8; 48] {
    let mut out = [0u8; 48];
    unsafe {
        blst_bendian_from_fp(out.as_mut_ptr(), fp);
    }
    out
}

fn miller_loop(p: &G1, q: &G2) -> blst_fp12 {
    // Reference: https://github.com/MystenLabs/fastcrypto/blob/bd4999bd3e901eab34ae3dd96dbe38b86ac646a7/fastcrypto/src/groups/bls12381.rs#L223-L234
    let mut pa = blst_p1_affine::default();
    let mut qa = blst_p2_affine::default();
    let mut res = blst_fp12::default();
    unsafe {
        blst_p1_to_affine(&mut pa, &p.0);
        blst_p2_to_affine(&mut qa, &q.0);
        blst_miller_loop(&mut res, &qa, &pa);
    }
    res
}

impl Pairing for Bls12381 {
    type G1 = G1;
    type G2 = G2;
    type GT = GT;

    fn pair(p: &G1, q: &G2) -> GT {
        Self::multi_pair(&[(*p, *q)])
    }

    fn multi_pair(pairs: &[(G1, G2)]) -> GT {
        let mut acc = unsafe { *blst_fp12_one() };
        for (p, q) in pairs {
            // e(0, Q) = e(P, 0) = 1
            if p.is_zero() || q.is_zero() {
                continue;
            }
            let ml = miller_loop(p, q);
            unsafe {
                blst_fp12_mul(&mut acc, &acc, &ml);
            }
        }
        unsafe {
            blst_final_exp(&mut acc, &acc);
        }
        GT(acc)
    }
}

macro_rules! impl_ops {
    ($t:ty) => {
        impl Add for $t {
            type Output = $t;
            fn add(mut self, rhs: $t) -> $t {
                Element::add(&mut self, &rhs);
                self
            }
        }

        impl AddAssign for $t {
            fn add_assign(&mut self, rhs: $t) {
                Element::add(self, &rhs);
            }
        }

        impl Sub for $t {
            type Output = $t;
            fn sub(self, rhs: $t) -> $t {
                self + (-rhs)
            }
        }

        impl SubAssign for $t {
            fn sub_assign(&mut self, rhs: $t) {
                *self = *self - rhs;
            }
        }

        impl Neg for $t {
            type Output = $t;
            fn neg(mut self) -> $t {
                Element::neg(&mut self);
                self
            }
        }

        impl Mul<Scalar> for $t {
            type Output = $t;
            fn mul(mut self, rhs: Scalar) -> $t {
                Element::mul(&mut self, &rhs);
                self
            }
        }

        impl std::iter::Sum for $t {
            fn sum<I: Iterator<Item = $t>>(iter: I) -> $t {
                iter.fold(<$t as Element>::zero(), |acc, x| acc + x)
            }
        }
    };
}

impl_ops!(Scalar);
impl_ops!(G1);
impl_ops!(G2);

macro_rules! impl_codec {
    ($t:ty, $len:expr, $name:expr) => {
        impl Write for $t {
            fn write(&self, buf: &mut impl BufMut) {
                buf.put_slice(&self.serialize());
            }
        }

        impl EncodeSize for $t {
            fn encode_size(&self) -> usize {
                $len
            }
        }

        impl Read for $t {
            type Cfg = ();

            fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
                if buf.remaining() < $len {
                    return Err(CodecError::EndOfBuffer);
                }
                let mut bytes = [0u8; $len];
                buf.copy_to_slice(&mut bytes);
                <$t>::deserialize(&bytes)
                    .ok_or(CodecError::Invalid($name, "invalid encoding"))
            }
        }
    };
}

impl_codec!(Scalar, SCALAR_LENGTH, "Scalar");
impl_codec!(G1, G1_ELEMENT_BYTE_LENGTH, "G1");
impl_codec!(G2, G2_ELEMENT_BYTE_LENGTH, "G2");
impl_codec!(GT, GT_ELEMENT_BYTE_LENGTH, "GT");

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn basic_group() {
        let mut rng = StdRng::seed_from_u64(0);
        let s = Scalar::rand(&mut rng);
        let mut s2 = s;
        Element::add(&mut s2, &s);

        // p1 = (s+s) * B
        let p1 = G1::base_mul(&s2);

        // p2 = sB + sB
        let p2 = G1::base_mul(&s) + G1::base_mul(&s);
        assert_eq!(p1, p2);
    }

    #[test]
    fn signed_integers() {
        let five = G1::from_i64(5);
        let minus_two = G1::from_i64(-2);
        assert_eq!(five + minus_two, G1::from_i64(3));
        assert_eq!(G1::from_i64(2) + minus_two, G1::zero());
        assert_eq!(Scalar::from_i64(-7) + Scalar::from_u64(7), Scalar::zero());
    }

    #[test]
    fn scalar_inverse() {
        let mut rng = StdRng::seed_from_u64(1);
        let s = Scalar::rand_nonzero(&mut rng);
        let inv = s.inverse().unwrap();
        assert_eq!(s * inv, Scalar::one());
        assert!(Scalar::zero().inverse().is_none());
        assert_eq!(Scalar::from_u64(3).pow(4), Scalar::from_u64(81));
    }

    #[test]
    fn scalar_little_endian() {
        let bytes = Scalar::from_u64(1).serialize();
        assert_eq!(bytes[0], 1);
        assert!(bytes[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn encoded_sizes() {
        let mut rng = StdRng::seed_from_u64(2);
        let s = Scalar::rand(&mut rng);
        assert_eq!(s.encode().len(), 32);
        assert_eq!(G1::base_mul(&s).encode().len(), 48);
        assert_eq!(G2::base_mul(&s).encode().len(), 96);
        assert_eq!(G1::zero().encode().len(), G1_ELEMENT_BYTE_LENGTH);
        assert_eq!(G2::zero().encode().len(), G2_ELEMENT_BYTE_LENGTH);
    }

    #[test]
    fn codec_accepts_identity() {
        let zero = G1::zero();
        let decoded = G1::decode(zero.encode()).unwrap();
        assert!(decoded.is_zero());

        let zero = G2::zero();
        let decoded = G2::decode(zero.encode()).unwrap();
        assert!(decoded.is_zero());
    }

    #[test]
    fn codec_rejects_garbage() {
        let bytes = [0xffu8; G1_ELEMENT_BYTE_LENGTH];
        assert!(G1::decode(bytes.as_slice()).is_err());
        let bytes = [0xffu8; SCALAR_LENGTH];
        assert!(Scalar::decode(bytes.as_slice()).is_err());
    }

    #[test]
    fn pairing_bilinear() {
        let mut rng = StdRng::seed_from_u64(2);
        let a = Scalar::rand(&mut rng);
        let b = Scalar::rand(&mut rng);
        let left = Bls12381::pair(&G1::base_mul(&a), &G2::base_mul(&b));
        let right = Bls12381::pair(&G1::base_mul(&(a * b)), &G2::one());
        assert_eq!(left, right);

        // e(aB, B2) * e(-aB, B2) = 1
        let cancel = Bls12381::multi_pair(&[
            (G1::base_mul(&a), G2::one()),
            (-G1::base_mul(&a), G2::one()),
        ]);
        assert_eq!(cancel, Bls12381::multi_pair(&[]));
    }

    #[test]
    fn hashed_generators_differ() {
        assert_ne!(G1::hash(b"h0"), G1::hash(b"h1"));
        assert_ne!(G1::hash(b"h0"), G1::one());
    }
}
