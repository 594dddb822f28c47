//! Zero-knowledge range proofs for ElGamal ciphertexts.
//!
//! A data provider proves that a ciphertext `(K, C) = (r*B, v*B + r*P)` encrypts
//! an integer `v` in `[0, u^l)` by decomposing `v` in base `u` and proving that
//! every digit carries a signature from a computing node. A signer publishes
//! `y = x*B` in [G1] together with the signatures `A_i = (x + i)^-1 * B2` in
//! [G2] for every digit `i` in `[0, u)`.
//!
//! The proof for a single signer set carries, for every digit `j`:
//!
//! * `V_j = v_j * A_{d_j}`, the blinded signature of the digit,
//! * `a_j = e(-s_j*B, V_j) * e(t_j*B, B2)`, the pairing commitment,
//! * `Zphi_j = s_j - c*d_j` and `Zv_j = t_j - c*v_j`, the responses,
//!
//! plus the shared `D = sum_j(u^j*s_j*B) + m*P` and `Zr = m - c*r`. The
//! challenge `c` is derived from all of the above with a [Transcript].
//!
//! When several signers are involved, [RangeProof::prove_aggregated] shares
//! `D`, `Zphi`, `Zr` and `c` across all of them and only repeats the
//! per-signer parts (`V`, `a`, `Zv`).
//!
//! A proof for `u = l = 0` is empty and always verifies.

use crate::{
    elgamal::Ciphertext,
    group::{Bls12381, Element, Pairing, Scalar, G1, G2, GT},
    transcript::Transcript,
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;

const NAMESPACE: &[u8] = b"_DRYNX_RANGE_PROOF";

/// Secret material of a computing node issuing digit signatures for one base `u`.
pub struct RangeSigner {
    secret: Scalar,
    published: PublishedSignatures,
}

/// The public half of a [RangeSigner].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedSignatures {
    /// `y = x*B`.
    pub public: G1,
    /// `A_i = (x + i)^-1 * B2` for `i` in `[0, u)`.
    pub signatures: Vec<G2>,
}

impl RangeSigner {
    /// Samples a new signing key and signs every digit in `[0, u)`.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, u: u64) -> Self {
        loop {
            let secret = Scalar::rand(rng);
            let signatures: Option<Vec<G2>> = (0..u)
                .map(|i| {
                    let inverse = (secret + Scalar::from_u64(i)).inverse()?;
                    Some(G2::base_mul(&inverse))
                })
                .collect();

            // Retry in the (negligible) case where x + i = 0 for some digit
            if let Some(signatures) = signatures {
                return Self {
                    secret,
                    published: PublishedSignatures {
                        public: G1::base_mul(&secret),
                        signatures,
                    },
                };
            }
        }
    }

    /// Returns the base signed by this signer.
    pub fn base(&self) -> u64 {
        self.published.signatures.len() as u64
    }

    /// Returns the public signatures.
    pub fn published(&self) -> &PublishedSignatures {
        &self.published
    }

    /// Returns whether `published` was produced by this signer.
    pub fn owns(&self, published: &PublishedSignatures) -> bool {
        G1::base_mul(&self.secret) == published.public
    }
}

impl Write for PublishedSignatures {
    fn write(&self, buf: &mut impl BufMut) {
        self.public.write(buf);
        self.signatures.write(buf);
    }
}

impl EncodeSize for PublishedSignatures {
    fn encode_size(&self) -> usize {
        self.public.encode_size() + self.signatures.encode_size()
    }
}

impl Read for PublishedSignatures {
    /// Maximum base.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let public = G1::read(buf)?;
        let signatures = Vec::<G2>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        Ok(Self { public, signatures })
    }
}

/// Decomposes `v` into `l` little-endian digits in base `u`.
pub fn to_base(v: i64, u: u64, l: usize) -> Result<Vec<u64>, Error> {
    let bound = upper_bound(u, l)?;
    if v < 0 || v as u64 >= bound {
        return Err(Error::ValueOutOfRange(v));
    }
    let mut rest = v as u64;
    let mut digits = Vec::with_capacity(l);
    for _ in 0..l {
        digits.push(rest % u);
        rest /= u;
    }
    Ok(digits)
}

/// Returns `u^l`, the exclusive upper bound of the range.
pub fn upper_bound(u: u64, l: usize) -> Result<u64, Error> {
    if u < 2 || l == 0 {
        return Err(Error::InvalidRange(u, l));
    }
    let l = u32::try_from(l).map_err(|_| Error::InvalidRange(u, l))?;
    u.checked_pow(l).ok_or(Error::InvalidRange(u, l as usize))
}

/// Proof that `commitment` encrypts a value in `[0, u^l)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeProof {
    pub commitment: Ciphertext,
    pub data: Option<RangeProofData>,
}

/// Sigma-protocol transcript of a non-vacuous [RangeProof].
///
/// Outer vectors of `zv`, `v` and `a` are indexed by signer, inner vectors by digit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeProofData {
    pub challenge: Scalar,
    pub zr: Scalar,
    pub d: G1,
    pub zphi: Vec<Scalar>,
    pub zv: Vec<Vec<Scalar>>,
    pub v: Vec<Vec<G2>>,
    pub a: Vec<Vec<GT>>,
}

#[allow(clippy::too_many_arguments)]
fn challenge(
    tag: &[u8],
    commitment: &Ciphertext,
    public: &G1,
    u: u64,
    l: usize,
    ys: &[G1],
    d: &G1,
    v: &[Vec<G2>],
    a: &[Vec<GT>],
) -> Scalar {
    let mut transcript = Transcript::new(NAMESPACE);
    transcript
        .commit(tag)
        .commit(u.to_be_bytes())
        .commit((l as u64).to_be_bytes())
        .commit_element(&G1::one())
        .commit_element(&commitment.k)
        .commit_element(&commitment.c)
        .commit_element(public)
        .commit_elements(ys)
        .commit_element(d);
    for row in v {
        transcript.commit_elements(row);
    }
    for row in a {
        for element in row {
            transcript.commit_gt(element);
        }
    }
    transcript.challenge()
}

impl RangeProof {
    /// Returns the empty proof used when no range is enforced (`u = l = 0`).
    pub fn vacuous(commitment: Ciphertext) -> Self {
        Self {
            commitment,
            data: None,
        }
    }

    /// Proves the range of `commitment = Enc(public, value; nonce)` against one signer.
    #[allow(clippy::too_many_arguments)]
    pub fn prove<R: RngCore + CryptoRng>(
        rng: &mut R,
        signatures: &PublishedSignatures,
        u: u64,
        l: usize,
        value: i64,
        nonce: &Scalar,
        public: &G1,
        commitment: Ciphertext,
        tag: &[u8],
    ) -> Result<Self, Error> {
        Self::prove_aggregated(
            rng,
            std::slice::from_ref(signatures),
            u,
            l,
            value,
            nonce,
            public,
            commitment,
            tag,
        )
    }

    /// Proves the range of `commitment` against every signer at once, sharing the
    /// digit commitment `D` and its responses.
    #[allow(clippy::too_many_arguments)]
    pub fn prove_aggregated<R: RngCore + CryptoRng>(
        rng: &mut R,
        signatures: &[PublishedSignatures],
        u: u64,
        l: usize,
        value: i64,
        nonce: &Scalar,
        public: &G1,
        commitment: Ciphertext,
        tag: &[u8],
    ) -> Result<Self, Error> {
        if u == 0 && l == 0 {
            return Ok(Self::vacuous(commitment));
        }
        let digits = to_base(value, u, l)?;
        if signatures.is_empty() {
            return Err(Error::MissingSignatures);
        }
        for published in signatures {
            if published.signatures.len() as u64 != u {
                return Err(Error::MissingSignatures);
            }
        }

        // Sample all randomness up front so the pairings can run in parallel
        let s: Vec<Scalar> = (0..l).map(|_| Scalar::rand(rng)).collect();
        let t: Vec<Scalar> = (0..l).map(|_| Scalar::rand(rng)).collect();
        let m = Scalar::rand(rng);
        let blinders: Vec<Vec<Scalar>> = signatures
            .iter()
            .map(|_| (0..l).map(|_| Scalar::rand(rng)).collect())
            .collect();

        // V[k][j] = v_kj * A^k_{d_j}
        let v: Vec<Vec<G2>> = signatures
            .iter()
            .zip(&blinders)
            .map(|(published, row)| {
                digits
                    .iter()
                    .zip(row)
                    .map(|(digit, blinder)| published.signatures[*digit as usize] * *blinder)
                    .collect()
            })
            .collect();

        // a[k][j] = e(-s_j*B, V_kj) * e(t_j*B, B2)
        let a: Vec<Vec<GT>> = v
            .par_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, vkj)| {
                        Bls12381::multi_pair(&[
                            (-G1::base_mul(&s[j]), *vkj),
                            (G1::base_mul(&t[j]), G2::one()),
                        ])
                    })
                    .collect()
            })
            .collect();

        // D = sum_j(u^j*s_j)*B + m*P
        let base = Scalar::from_u64(u);
        let mut weighted = Scalar::zero();
        for (j, sj) in s.iter().enumerate() {
            weighted += base.pow(j as u64) * *sj;
        }
        let d = G1::base_mul(&weighted) + *public * m;

        let ys: Vec<G1> = signatures.iter().map(|p| p.public).collect();
        let c = challenge(tag, &commitment, public, u, l, &ys, &d, &v, &a);

        let zphi = s
            .iter()
            .zip(&digits)
            .map(|(sj, digit)| *sj - c * Scalar::from_u64(*digit))
            .collect();
        let zv = blinders
            .iter()
            .map(|row| row.iter().zip(&t).map(|(vkj, tj)| *tj - c * *vkj).collect())
            .collect();
        let zr = m - c * *nonce;

        Ok(Self {
            commitment,
            data: Some(RangeProofData {
                challenge: c,
                zr,
                d,
                zphi,
                zv,
                v,
                a,
            }),
        })
    }

    /// Verifies the proof against the signers' public keys `ys`.
    pub fn verify(&self, u: u64, l: usize, ys: &[G1], public: &G1, tag: &[u8]) -> Result<(), Error> {
        if u == 0 && l == 0 {
            return Ok(());
        }
        let data = self
            .data
            .as_ref()
            .ok_or(Error::InvalidProof("missing range proof body"))?;
        upper_bound(u, l)?;

        // Check that each signer filled every digit
        if data.zv.len() != ys.len() || data.v.len() != ys.len() || data.a.len() != ys.len() {
            return Err(Error::InvalidProof("signer count mismatch"));
        }
        if data.zphi.len() != l
            || data.zv.iter().any(|row| row.len() != l)
            || data.v.iter().any(|row| row.len() != l)
            || data.a.iter().any(|row| row.len() != l)
        {
            return Err(Error::InvalidProof("digit count mismatch"));
        }

        // D' = c*C + Zr*P + sum_j(u^j*Zphi_j)*B
        let c = data.challenge;
        let base = Scalar::from_u64(u);
        let mut weighted = Scalar::zero();
        for (j, zphi) in data.zphi.iter().enumerate() {
            weighted += base.pow(j as u64) * *zphi;
        }
        let d = self.commitment.c * c + *public * data.zr + G1::base_mul(&weighted);
        if d != data.d {
            return Err(Error::InvalidProof("digit commitment mismatch"));
        }

        // a'[k][j] = e(c*y_k - Zphi_j*B, V_kj) * e(Zv_kj*B, B2)
        let valid = ys.par_iter().enumerate().all(|(k, y)| {
            (0..l).all(|j| {
                let left = *y * c - G1::base_mul(&data.zphi[j]);
                let expected = Bls12381::multi_pair(&[
                    (left, data.v[k][j]),
                    (G1::base_mul(&data.zv[k][j]), G2::one()),
                ]);
                expected == data.a[k][j]
            })
        });
        if !valid {
            return Err(Error::InvalidProof("pairing commitment mismatch"));
        }

        let expected = challenge(
            tag,
            &self.commitment,
            public,
            u,
            l,
            ys,
            &data.d,
            &data.v,
            &data.a,
        );
        if expected != c {
            return Err(Error::InvalidProof("challenge mismatch"));
        }
        Ok(())
    }
}

impl Write for RangeProofData {
    fn write(&self, buf: &mut impl BufMut) {
        self.challenge.write(buf);
        self.zr.write(buf);
        self.d.write(buf);
        self.zphi.write(buf);
        self.zv.write(buf);
        self.v.write(buf);
        self.a.write(buf);
    }
}

impl EncodeSize for RangeProofData {
    fn encode_size(&self) -> usize {
        self.challenge.encode_size()
            + self.zr.encode_size()
            + self.d.encode_size()
            + self.zphi.encode_size()
            + self.zv.encode_size()
            + self.v.encode_size()
            + self.a.encode_size()
    }
}

impl Read for RangeProofData {
    /// Maximum number of signers or digits.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let challenge = Scalar::read(buf)?;
        let zr = Scalar::read(buf)?;
        let d = G1::read(buf)?;
        let zphi = Vec::<Scalar>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        let zv = Vec::<Vec<Scalar>>::read_cfg(buf, &(RangeCfg::from(..=*max), (RangeCfg::from(..=*max), ())))?;
        let v = Vec::<Vec<G2>>::read_cfg(buf, &(RangeCfg::from(..=*max), (RangeCfg::from(..=*max), ())))?;
        let a = Vec::<Vec<GT>>::read_cfg(buf, &(RangeCfg::from(..=*max), (RangeCfg::from(..=*max), ())))?;
        Ok(Self {
            challenge,
            zr,
            d,
            zphi,
            zv,
            v,
            a,
        })
    }
}

impl Write for RangeProof {
    fn write(&self, buf: &mut impl BufMut) {
        self.commitment.write(buf);
        match &self.data {
            Some(data) => {
                true.write(buf);
                data.write(buf);
            }
            None => false.write(buf),
        }
    }
}

impl EncodeSize for RangeProof {
    fn encode_size(&self) -> usize {
        self.commitment.encode_size()
            + 1
            + self.data.as_ref().map_or(0, |data| data.encode_size())
    }
}

impl Read for RangeProof {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let commitment = Ciphertext::read(buf)?;
        let data = if bool::read(buf)? {
            Some(RangeProofData::read_cfg(buf, max)?)
        } else {
            None
        };
        Ok(Self { commitment, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elgamal::{encrypt_with_nonce, Keypair};
    use commonware_codec::{Decode, Encode};
    use rand::{rngs::StdRng, SeedableRng};
    use test_case::test_case;

    const TAG: &[u8] = b"survey";

    #[test_case(0; "zero")]
    #[test_case(1; "one")]
    #[test_case(37; "middle")]
    #[test_case(255; "upper")]
    fn test_prove_verify(value: i64) {
        let mut rng = StdRng::seed_from_u64(value as u64);
        let keys = Keypair::generate(&mut rng);
        let signer = RangeSigner::new(&mut rng, 16);
        let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, value);
        let proof = RangeProof::prove(
            &mut rng,
            signer.published(),
            16,
            2,
            value,
            &r,
            &keys.public,
            ct,
            TAG,
        )
        .unwrap();
        proof
            .verify(16, 2, &[signer.published().public], &keys.public, TAG)
            .unwrap();
    }

    #[test]
    fn test_aggregated_over_signers() {
        let mut rng = StdRng::seed_from_u64(10);
        let keys = Keypair::generate(&mut rng);
        let signers: Vec<_> = (0..3).map(|_| RangeSigner::new(&mut rng, 4)).collect();
        let published: Vec<_> = signers.iter().map(|s| s.published().clone()).collect();
        let ys: Vec<_> = published.iter().map(|p| p.public).collect();
        let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, 45);
        let proof = RangeProof::prove_aggregated(
            &mut rng,
            &published,
            4,
            3,
            45,
            &r,
            &keys.public,
            ct,
            TAG,
        )
        .unwrap();
        proof.verify(4, 3, &ys, &keys.public, TAG).unwrap();

        // Dropping a signer must fail
        assert!(proof.verify(4, 3, &ys[..2], &keys.public, TAG).is_err());
    }

    #[test]
    fn test_value_out_of_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let keys = Keypair::generate(&mut rng);
        let signer = RangeSigner::new(&mut rng, 16);
        let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, 256);
        let result = RangeProof::prove(
            &mut rng,
            signer.published(),
            16,
            2,
            256,
            &r,
            &keys.public,
            ct,
            TAG,
        );
        assert_eq!(result, Err(Error::ValueOutOfRange(256)));
        assert_eq!(to_base(-1, 16, 2), Err(Error::ValueOutOfRange(-1)));
    }

    #[test]
    fn test_proof_for_other_ciphertext_fails() {
        let mut rng = StdRng::seed_from_u64(12);
        let keys = Keypair::generate(&mut rng);
        let signer = RangeSigner::new(&mut rng, 16);
        let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, 20);
        let mut proof = RangeProof::prove(
            &mut rng,
            signer.published(),
            16,
            2,
            20,
            &r,
            &keys.public,
            ct,
            TAG,
        )
        .unwrap();

        // Swap in a ciphertext of an out-of-range value
        let (bad, _) = encrypt_with_nonce(&mut rng, &keys.public, 300);
        proof.commitment = bad;
        assert!(proof
            .verify(16, 2, &[signer.published().public], &keys.public, TAG)
            .is_err());
    }

    #[test]
    fn test_wrong_tag_or_signer_fails() {
        let mut rng = StdRng::seed_from_u64(13);
        let keys = Keypair::generate(&mut rng);
        let signer = RangeSigner::new(&mut rng, 16);
        let other = RangeSigner::new(&mut rng, 16);
        let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, 3);
        let proof = RangeProof::prove(
            &mut rng,
            signer.published(),
            16,
            2,
            3,
            &r,
            &keys.public,
            ct,
            TAG,
        )
        .unwrap();
        let ys = [signer.published().public];
        assert!(proof.verify(16, 2, &ys, &keys.public, b"other").is_err());
        assert!(proof
            .verify(16, 2, &[other.published().public], &keys.public, TAG)
            .is_err());
        assert!(proof.verify(16, 3, &ys, &keys.public, TAG).is_err());
    }

    #[test]
    fn test_vacuous() {
        let mut rng = StdRng::seed_from_u64(14);
        let keys = Keypair::generate(&mut rng);
        let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, 123_456);
        let proof = RangeProof::prove_aggregated(&mut rng, &[], 0, 0, 123_456, &r, &keys.public, ct, TAG)
            .unwrap();
        assert!(proof.data.is_none());
        proof.verify(0, 0, &[], &keys.public, TAG).unwrap();
    }

    #[test]
    fn test_codec() {
        let mut rng = StdRng::seed_from_u64(15);
        let keys = Keypair::generate(&mut rng);
        let signer = RangeSigner::new(&mut rng, 2);
        assert!(signer.owns(signer.published()));
        let (ct, r) = encrypt_with_nonce(&mut rng, &keys.public, 1);
        let proof = RangeProof::prove(
            &mut rng,
            signer.published(),
            2,
            1,
            1,
            &r,
            &keys.public,
            ct,
            TAG,
        )
        .unwrap();
        let decoded = RangeProof::decode_cfg(proof.encode(), &16).unwrap();
        assert_eq!(decoded, proof);
        let published =
            PublishedSignatures::decode_cfg(signer.published().encode(), &16).unwrap();
        assert_eq!(&published, signer.published());
    }
}
