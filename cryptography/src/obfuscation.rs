//! Multiplicative blinding of ciphertexts.
//!
//! Obfuscation maps `(K, C)` to `(s*K, s*C)` for a secret non-zero `s`, which
//! keeps only the "is zero" predicate of the plaintext. The proof is a
//! discrete-log equality: the same `s` relates `K` to `K'` and `C` to `C'`.

use crate::{
    elgamal::{CipherVector, Ciphertext},
    group::{Scalar, G1},
    transcript::Transcript,
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, Read, ReadExt, Write};
use rand::{CryptoRng, RngCore};

const NAMESPACE: &[u8] = b"_DRYNX_OBFUSCATION";

/// Multiplies every ciphertext by a fresh random non-zero scalar.
///
/// Returns the blinded ciphertexts and the scalars used.
pub fn obfuscate<R: RngCore + CryptoRng>(
    rng: &mut R,
    inputs: &[Ciphertext],
) -> (CipherVector, Vec<Scalar>) {
    inputs
        .iter()
        .map(|ciphertext| {
            let s = Scalar::rand_nonzero(rng);
            (*ciphertext * s, s)
        })
        .unzip()
}

/// Proof that `output = s * input` for some non-zero `s`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObfuscationProof {
    pub input: Ciphertext,
    pub output: Ciphertext,
    pub challenge: Scalar,
    pub response: Scalar,
}

fn challenge(
    context: &[u8],
    input: &Ciphertext,
    output: &Ciphertext,
    t1: &G1,
    t2: &G1,
) -> Scalar {
    let mut transcript = Transcript::new(NAMESPACE);
    transcript
        .commit(context)
        .commit_element(&input.k)
        .commit_element(&input.c)
        .commit_element(&output.k)
        .commit_element(&output.c)
        .commit_element(t1)
        .commit_element(t2);
    transcript.challenge()
}

impl ObfuscationProof {
    /// Proves that `output = s * input`.
    pub fn prove<R: RngCore + CryptoRng>(
        rng: &mut R,
        s: &Scalar,
        input: Ciphertext,
        output: Ciphertext,
        context: &[u8],
    ) -> Self {
        let w = Scalar::rand(rng);
        let t1 = input.k * w;
        let t2 = input.c * w;
        let c = challenge(context, &input, &output, &t1, &t2);
        Self {
            input,
            output,
            challenge: c,
            response: w + c * *s,
        }
    }

    /// Verifies the proof.
    pub fn verify(&self, context: &[u8]) -> Result<(), Error> {
        // A zero factor would erase the plaintext
        let input_zero = self.input.k.is_zero() && self.input.c.is_zero();
        let output_zero = self.output.k.is_zero() && self.output.c.is_zero();
        if output_zero && !input_zero {
            return Err(Error::InvalidProof("zero obfuscation factor"));
        }

        // t1 = z*K - c*K', t2 = z*C - c*C'
        let c = self.challenge;
        let t1 = self.input.k * self.response - self.output.k * c;
        let t2 = self.input.c * self.response - self.output.c * c;
        if challenge(context, &self.input, &self.output, &t1, &t2) != c {
            return Err(Error::InvalidProof("obfuscation challenge mismatch"));
        }
        Ok(())
    }
}

impl Write for ObfuscationProof {
    fn write(&self, buf: &mut impl BufMut) {
        self.input.write(buf);
        self.output.write(buf);
        self.challenge.write(buf);
        self.response.write(buf);
    }
}

impl EncodeSize for ObfuscationProof {
    fn encode_size(&self) -> usize {
        self.input.encode_size()
            + self.output.encode_size()
            + self.challenge.encode_size()
            + self.response.encode_size()
    }
}

impl Read for ObfuscationProof {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            input: Ciphertext::read(buf)?,
            output: Ciphertext::read(buf)?,
            challenge: Scalar::read(buf)?,
            response: Scalar::read(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        elgamal::{decrypt_check_zero, encrypt, Keypair},
        group::Element,
    };
    use commonware_codec::{DecodeExt, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_obfuscation_preserves_zero() {
        let mut rng = StdRng::seed_from_u64(0);
        let keys = Keypair::generate(&mut rng);
        let inputs = vec![
            encrypt(&mut rng, &keys.public, 0),
            encrypt(&mut rng, &keys.public, 3),
        ];

        // Two successive computing nodes
        let (first, _) = obfuscate(&mut rng, &inputs);
        let (second, _) = obfuscate(&mut rng, &first);
        assert!(decrypt_check_zero(&keys.secret, &second[0]));
        assert!(!decrypt_check_zero(&keys.secret, &second[1]));
    }

    #[test]
    fn test_prove_verify() {
        let mut rng = StdRng::seed_from_u64(1);
        let keys = Keypair::generate(&mut rng);
        let input = encrypt(&mut rng, &keys.public, 7);
        let (outputs, scalars) = obfuscate(&mut rng, &[input]);
        let proof = ObfuscationProof::prove(&mut rng, &scalars[0], input, outputs[0], b"ctx");
        proof.verify(b"ctx").unwrap();
        assert!(proof.verify(b"other").is_err());

        let decoded = ObfuscationProof::decode(proof.encode()).unwrap();
        assert_eq!(decoded, proof);
    }

    #[test]
    fn test_wrong_output_fails() {
        let mut rng = StdRng::seed_from_u64(2);
        let keys = Keypair::generate(&mut rng);
        let input = encrypt(&mut rng, &keys.public, 7);
        let s = Scalar::rand_nonzero(&mut rng);
        let mut proof = ObfuscationProof::prove(&mut rng, &s, input, input * s, b"ctx");
        proof.output = input * Scalar::rand_nonzero(&mut rng);
        assert!(proof.verify(b"ctx").is_err());

        // s = 0 is refused even with a consistent transcript
        let zero = ObfuscationProof::prove(&mut rng, &Scalar::zero(), input, Ciphertext::zero(), b"ctx");
        assert_eq!(
            zero.verify(b"ctx"),
            Err(Error::InvalidProof("zero obfuscation factor"))
        );
    }
}
