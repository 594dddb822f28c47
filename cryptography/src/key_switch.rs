//! Collective key switching.
//!
//! Ciphertexts `(K_j, C_j)` under the collective key `P = sum(P_i)` are
//! re-encrypted under a target key `Q` without decryption. Computing node `i`
//! contributes `(v_ij*B, v_ij*Q - x_i*K_j)` for every slot `j`. Summing all
//! contributions and adding `C_j` yields `(sum(v_ij)*B, v*B + sum(v_ij)*Q)`,
//! an encryption of the same value under `Q`.
//!
//! Each contribution carries a conjunctive Schnorr proof of knowledge of
//! `(x_i, v_ij)` with `P_i = x_i*B`, `K'_ij = v_ij*B` and
//! `C'_ij = v_ij*Q - x_i*K_j`.

use crate::{
    elgamal::{CipherVector, Ciphertext},
    group::{Element, Scalar, G1},
    transcript::Transcript,
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;

const NAMESPACE: &[u8] = b"_DRYNX_KEY_SWITCH";

/// Schnorr transcript for one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotProof {
    pub challenge: Scalar,
    pub zx: Scalar,
    pub zv: Scalar,
}

/// The per-slot proofs of one computing node's contribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySwitchProof {
    pub proofs: Vec<SlotProof>,
}

/// A computing node's key-switching contribution and its proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub switched: CipherVector,
    pub proof: KeySwitchProof,
}

#[allow(clippy::too_many_arguments)]
fn challenge(
    context: &[u8],
    share: &G1,
    target: &G1,
    input: &Ciphertext,
    output: &Ciphertext,
    t1: &G1,
    t2: &G1,
    t3: &G1,
) -> Scalar {
    let mut transcript = Transcript::new(NAMESPACE);
    transcript
        .commit(context)
        .commit_element(share)
        .commit_element(target)
        .commit_element(&input.k)
        .commit_element(&output.k)
        .commit_element(&output.c)
        .commit_element(t1)
        .commit_element(t2)
        .commit_element(t3);
    transcript.challenge()
}

impl Contribution {
    /// Computes the contribution of the holder of `secret` for every ciphertext of `inputs`.
    pub fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        secret: &Scalar,
        target: &G1,
        inputs: &[Ciphertext],
        context: &[u8],
    ) -> Self {
        let nonces: Vec<Scalar> = inputs.iter().map(|_| Scalar::rand(rng)).collect();
        let switched: CipherVector = inputs
            .par_iter()
            .zip(nonces.par_iter())
            .map(|(input, v)| Ciphertext {
                k: G1::base_mul(v),
                c: *target * *v - input.k * *secret,
            })
            .collect();
        let proof = KeySwitchProof::prove(rng, secret, &nonces, target, inputs, &switched, context);
        Self { switched, proof }
    }
}

impl KeySwitchProof {
    /// Proves that `switched[j]` was computed from `inputs[j]` with `secret` and `nonces[j]`.
    pub fn prove<R: RngCore + CryptoRng>(
        rng: &mut R,
        secret: &Scalar,
        nonces: &[Scalar],
        target: &G1,
        inputs: &[Ciphertext],
        switched: &[Ciphertext],
        context: &[u8],
    ) -> Self {
        let share = G1::base_mul(secret);
        let blinders: Vec<(Scalar, Scalar)> = inputs
            .iter()
            .map(|_| (Scalar::rand(rng), Scalar::rand(rng)))
            .collect();
        let proofs = inputs
            .par_iter()
            .zip(switched.par_iter())
            .zip(nonces.par_iter())
            .zip(blinders.par_iter())
            .map(|(((input, output), v), (wx, wv))| {
                let t1 = G1::base_mul(wx);
                let t2 = G1::base_mul(wv);
                let t3 = *target * *wv - input.k * *wx;
                let c = challenge(context, &share, target, input, output, &t1, &t2, &t3);
                SlotProof {
                    challenge: c,
                    zx: *wx + c * *secret,
                    zv: *wv + c * *v,
                }
            })
            .collect();
        Self { proofs }
    }

    /// Verifies the contribution of the node with public share `share`.
    pub fn verify(
        &self,
        share: &G1,
        target: &G1,
        inputs: &[Ciphertext],
        switched: &[Ciphertext],
        context: &[u8],
    ) -> Result<(), Error> {
        if inputs.len() != switched.len() || inputs.len() != self.proofs.len() {
            return Err(Error::InvalidProof("key switch length mismatch"));
        }
        let valid = inputs
            .par_iter()
            .zip(switched.par_iter())
            .zip(self.proofs.par_iter())
            .all(|((input, output), proof)| {
                let c = proof.challenge;
                let t1 = G1::base_mul(&proof.zx) - *share * c;
                let t2 = G1::base_mul(&proof.zv) - output.k * c;
                let t3 = *target * proof.zv - input.k * proof.zx - output.c * c;
                challenge(context, share, target, input, output, &t1, &t2, &t3) == c
            });
        if !valid {
            return Err(Error::InvalidProof("key switch challenge mismatch"));
        }
        Ok(())
    }
}

/// Combines the original ciphertexts with the sum of all contributions.
///
/// Returns `(sum(K'_ij), C_j + sum(C'_ij))` for every slot `j`.
pub fn combine<'a, I>(inputs: &[Ciphertext], contributions: I) -> Result<CipherVector, Error>
where
    I: IntoIterator<Item = &'a [Ciphertext]>,
{
    let mut combined: CipherVector = inputs
        .iter()
        .map(|input| Ciphertext {
            k: G1::zero(),
            c: input.c,
        })
        .collect();
    let mut count = 0;
    for contribution in contributions {
        if contribution.len() != inputs.len() {
            return Err(Error::LengthMismatch(inputs.len(), contribution.len()));
        }
        for (acc, c) in combined.iter_mut().zip(contribution) {
            *acc += *c;
        }
        count += 1;
    }
    if count == 0 {
        return Err(Error::MissingContributions);
    }
    Ok(combined)
}

impl Write for SlotProof {
    fn write(&self, buf: &mut impl BufMut) {
        self.challenge.write(buf);
        self.zx.write(buf);
        self.zv.write(buf);
    }
}

impl EncodeSize for SlotProof {
    fn encode_size(&self) -> usize {
        self.challenge.encode_size() + self.zx.encode_size() + self.zv.encode_size()
    }
}

impl Read for SlotProof {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            challenge: Scalar::read(buf)?,
            zx: Scalar::read(buf)?,
            zv: Scalar::read(buf)?,
        })
    }
}

impl Write for KeySwitchProof {
    fn write(&self, buf: &mut impl BufMut) {
        self.proofs.write(buf);
    }
}

impl EncodeSize for KeySwitchProof {
    fn encode_size(&self) -> usize {
        self.proofs.encode_size()
    }
}

impl Read for KeySwitchProof {
    /// Maximum number of slots.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let proofs = Vec::<SlotProof>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        Ok(Self { proofs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        elgamal::{decrypt_vector, encrypt_vector, Keypair},
        table::DecryptionTable,
    };
    use commonware_codec::{Decode, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_switch_to_querier_key() {
        let mut rng = StdRng::seed_from_u64(0);
        let nodes: Vec<Keypair> = (0..3).map(|_| Keypair::generate(&mut rng)).collect();
        let collective = nodes.iter().map(|k| k.public).sum::<G1>();
        let querier = Keypair::generate(&mut rng);

        let (inputs, _) = encrypt_vector(&mut rng, &collective, &[4, -9, 0]);
        let contributions: Vec<Contribution> = nodes
            .iter()
            .map(|k| Contribution::generate(&mut rng, &k.secret, &querier.public, &inputs, b"ctx"))
            .collect();
        for (node, contribution) in nodes.iter().zip(&contributions) {
            contribution
                .proof
                .verify(&node.public, &querier.public, &inputs, &contribution.switched, b"ctx")
                .unwrap();
        }

        let outputs = combine(&inputs, contributions.iter().map(|c| c.switched.as_slice())).unwrap();
        let table = DecryptionTable::new(100);
        assert_eq!(
            decrypt_vector(&table, &querier.secret, &outputs).unwrap(),
            vec![4, -9, 0]
        );
    }

    #[test]
    fn test_wrong_share_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let node = Keypair::generate(&mut rng);
        let other = Keypair::generate(&mut rng);
        let querier = Keypair::generate(&mut rng);
        let (inputs, _) = encrypt_vector(&mut rng, &node.public, &[1]);
        let contribution =
            Contribution::generate(&mut rng, &node.secret, &querier.public, &inputs, b"ctx");
        assert!(contribution
            .proof
            .verify(&other.public, &querier.public, &inputs, &contribution.switched, b"ctx")
            .is_err());

        // A contribution computed with another secret than the published share
        let forged =
            Contribution::generate(&mut rng, &other.secret, &querier.public, &inputs, b"ctx");
        assert!(forged
            .proof
            .verify(&node.public, &querier.public, &inputs, &forged.switched, b"ctx")
            .is_err());
    }

    #[test]
    fn test_combine_requires_contributions() {
        assert_eq!(
            combine(&[Ciphertext::zero()], std::iter::empty()),
            Err(Error::MissingContributions)
        );
    }

    #[test]
    fn test_codec() {
        let mut rng = StdRng::seed_from_u64(2);
        let node = Keypair::generate(&mut rng);
        let querier = Keypair::generate(&mut rng);
        let (inputs, _) = encrypt_vector(&mut rng, &node.public, &[1, 2]);
        let contribution =
            Contribution::generate(&mut rng, &node.secret, &querier.public, &inputs, b"ctx");
        let decoded = KeySwitchProof::decode_cfg(contribution.proof.encode(), &2).unwrap();
        assert_eq!(decoded, contribution.proof);
    }
}
