//! Verifiable shuffle of ElGamal ciphertexts.
//!
//! A shuffle re-randomizes and permutes a list of ciphertexts:
//! `w'_j = w_{pi(j)} + (s_{pi(j)}*B, s_{pi(j)}*P)`. The accompanying proof is the
//! Terelius-Wikstrom proof of shuffle (written additively), which convinces a
//! verifier that `w'` decrypts to a permutation of the plaintexts of `w`
//! without revealing `pi` or the re-randomizers.
//!
//! The proof needs `N` generators whose discrete logs relative to `B` are
//! unknown. Both sides derive them with [Generators::derive].

use crate::{
    elgamal::{CipherVector, Ciphertext},
    group::{Element, Scalar, G1},
    transcript::Transcript,
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use rand::{CryptoRng, Rng, RngCore};
use rayon::prelude::*;

const NAMESPACE: &[u8] = b"_DRYNX_SHUFFLE";

/// Independent generators `h_1..h_N`.
#[derive(Clone, Debug)]
pub struct Generators(Vec<G1>);

impl Generators {
    /// Derives `n` generators by hashing to the curve.
    pub fn derive(n: usize) -> Self {
        Self(
            (0..n)
                .into_par_iter()
                .map(|i| {
                    let mut label = NAMESPACE.to_vec();
                    label.extend_from_slice(&(i as u64).to_be_bytes());
                    G1::hash(&label)
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A permutation in one-line notation along with its inverse.
///
/// The element at index `i` moves to index `permutation[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permutation {
    pub permutation: Vec<usize>,
    pub inverse: Vec<usize>,
}

impl Permutation {
    /// Samples a uniform permutation with Fisher-Yates.
    pub fn generate<R: Rng>(rng: &mut R, size: usize) -> Self {
        let mut permutation: Vec<usize> = (0..size).collect();
        for i in (1..size).rev() {
            let j = rng.gen_range(0..=i);
            permutation.swap(i, j);
        }
        let mut inverse = vec![0usize; size];
        for (i, v) in permutation.iter().enumerate() {
            inverse[*v] = i;
        }
        Self {
            permutation,
            inverse,
        }
    }

    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }

    /// Moves `target[i]` to position `permutation[i]`.
    pub fn apply<T: Clone>(&self, target: &[T]) -> Result<Vec<T>, Error> {
        self.place(target, &self.permutation)
    }

    /// Moves `target[i]` to position `inverse[i]`.
    pub fn apply_inverse<T: Clone>(&self, target: &[T]) -> Result<Vec<T>, Error> {
        self.place(target, &self.inverse)
    }

    fn place<T: Clone>(&self, target: &[T], positions: &[usize]) -> Result<Vec<T>, Error> {
        if target.len() != positions.len() {
            return Err(Error::LengthMismatch(positions.len(), target.len()));
        }
        let mut out: Vec<Option<T>> = vec![None; target.len()];
        for (item, position) in target.iter().zip(positions) {
            out[*position] = Some(item.clone());
        }
        out.into_iter()
            .map(|item| item.ok_or(Error::InvalidPermutation))
            .collect()
    }
}

/// A precomputed re-randomizer `(s, s*B, s*P)`.
#[derive(Clone, Copy, Debug)]
pub struct Rerandomizer {
    pub scalar: Scalar,
    pub k: G1,
    pub c: G1,
}

impl Rerandomizer {
    /// Precomputes `n` re-randomizers for `public`.
    pub fn precompute<R: RngCore + CryptoRng>(rng: &mut R, public: &G1, n: usize) -> Vec<Self> {
        let scalars: Vec<Scalar> = (0..n).map(|_| Scalar::rand(rng)).collect();
        scalars
            .into_par_iter()
            .map(|scalar| Self {
                scalar,
                k: G1::base_mul(&scalar),
                c: *public * scalar,
            })
            .collect()
    }

    fn apply(&self, ciphertext: &Ciphertext) -> Ciphertext {
        Ciphertext {
            k: ciphertext.k + self.k,
            c: ciphertext.c + self.c,
        }
    }
}

/// Commitments and responses of a Terelius-Wikstrom proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShuffleProof {
    /// Permutation commitments `u`.
    pub u: Vec<G1>,
    /// Bridging commitments `B`.
    pub b: Vec<G1>,
    pub a_prime: G1,
    pub b_prime: Vec<G1>,
    pub c_prime: G1,
    pub d_prime: G1,
    pub f_prime: Ciphertext,
    pub k_a: Scalar,
    pub k_b: Vec<Scalar>,
    pub k_c: Scalar,
    pub k_d: Scalar,
    pub k_e: Vec<Scalar>,
    pub k_f: Scalar,
}

/// Transcript binding the statement and the permutation commitments.
fn statement(
    context: &[u8],
    public: &G1,
    inputs: &[Ciphertext],
    outputs: &[Ciphertext],
    u: &[G1],
) -> Transcript {
    let mut transcript = Transcript::new(NAMESPACE);
    transcript.commit(context).commit_element(public);
    for ciphertext in inputs.iter().chain(outputs) {
        transcript
            .commit_element(&ciphertext.k)
            .commit_element(&ciphertext.c);
    }
    transcript.commit_elements(u);
    transcript
}

/// Derives the batching challenges `e_1..e_N`.
fn challenge_e(transcript: &Transcript, n: usize) -> Vec<Scalar> {
    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut fork = transcript.clone();
            fork.commit(b"e").commit((i as u64).to_be_bytes());
            fork.challenge()
        })
        .collect()
}

/// Derives the final challenge `v` from the proof commitments.
fn challenge_v(transcript: &Transcript, proof: &ShuffleProof) -> Scalar {
    let mut fork = transcript.clone();
    fork.commit(b"v")
        .commit_elements(&proof.b)
        .commit_element(&proof.a_prime)
        .commit_elements(&proof.b_prime)
        .commit_element(&proof.c_prime)
        .commit_element(&proof.d_prime)
        .commit_element(&proof.f_prime.k)
        .commit_element(&proof.f_prime.c);
    fork.challenge()
}

/// Shuffles `inputs` under `public` and proves the shuffle.
///
/// If `precomputed` is provided it must hold one [Rerandomizer] per input.
pub fn shuffle<R: RngCore + CryptoRng>(
    rng: &mut R,
    public: &G1,
    inputs: &[Ciphertext],
    precomputed: Option<&[Rerandomizer]>,
    context: &[u8],
) -> Result<(CipherVector, ShuffleProof), Error> {
    let n = inputs.len();
    if n == 0 {
        return Err(Error::EmptyShuffle);
    }
    let generators = Generators::derive(n);
    let h = &generators.0;
    let rerandomizers = match precomputed {
        Some(precomputed) if precomputed.len() == n => precomputed.to_vec(),
        Some(precomputed) => return Err(Error::LengthMismatch(n, precomputed.len())),
        None => Rerandomizer::precompute(rng, public, n),
    };
    let g = G1::one();

    // Permute and re-randomize: w'_j = w_{pi(j)} + rho_{pi(j)}
    let permutation = Permutation::generate(rng, n);
    let randomized: Vec<Ciphertext> = inputs
        .iter()
        .zip(&rerandomizers)
        .map(|(w, rho)| rho.apply(w))
        .collect();
    let outputs = permutation.apply_inverse(&randomized)?;
    let s: Vec<Scalar> = rerandomizers.iter().map(|rho| rho.scalar).collect();

    // Permutation commitments: u_{pi(i)} = r_i*g + h_i
    let r: Vec<Scalar> = (0..n).map(|_| Scalar::rand(rng)).collect();
    let committed: Vec<G1> = r
        .par_iter()
        .zip(h.par_iter())
        .map(|(ri, hi)| G1::base_mul(ri) + *hi)
        .collect();
    let u = permutation.apply(&committed)?;

    let transcript = statement(context, public, inputs, &outputs, &u);
    let e = challenge_e(&transcript, n);
    let e_prime = permutation.apply_inverse(&e)?;

    // Bridging commitments: B_i = b_i*g + e'_i*B_{i-1}, B_0 = h_1
    let b_scalars: Vec<Scalar> = (0..n).map(|_| Scalar::rand(rng)).collect();
    let mut b = Vec::with_capacity(n);
    let mut previous = h[0];
    for (bi, ei) in b_scalars.iter().zip(&e_prime) {
        let next = G1::base_mul(bi) + previous * *ei;
        b.push(next);
        previous = next;
    }

    // Proof commitments
    let alpha = Scalar::rand(rng);
    let beta: Vec<Scalar> = (0..n).map(|_| Scalar::rand(rng)).collect();
    let epsilon: Vec<Scalar> = (0..n).map(|_| Scalar::rand(rng)).collect();
    let gamma = Scalar::rand(rng);
    let delta = Scalar::rand(rng);
    let phi = Scalar::rand(rng);

    let a_prime = G1::base_mul(&alpha)
        + h.par_iter()
            .zip(epsilon.par_iter())
            .map(|(hi, ei)| *hi * *ei)
            .reduce(G1::zero, |acc, x| acc + x);
    let b_prime: Vec<G1> = (0..n)
        .into_par_iter()
        .map(|i| {
            let previous = if i == 0 { h[0] } else { b[i - 1] };
            g * beta[i] + previous * epsilon[i]
        })
        .collect();
    let weighted = outputs
        .par_iter()
        .zip(epsilon.par_iter())
        .map(|(w, ei)| *w * *ei)
        .reduce(Ciphertext::zero, |acc, x| acc + x);
    let f_prime = Ciphertext {
        k: weighted.k - g * phi,
        c: weighted.c - *public * phi,
    };
    let c_prime = g * gamma;
    let d_prime = g * delta;

    let mut proof = ShuffleProof {
        u,
        b,
        a_prime,
        b_prime,
        c_prime,
        d_prime,
        f_prime,
        k_a: Scalar::zero(),
        k_b: Vec::new(),
        k_c: Scalar::zero(),
        k_d: Scalar::zero(),
        k_e: Vec::new(),
        k_f: Scalar::zero(),
    };
    let v = challenge_v(&transcript, &proof);

    // a = sum(r_i*e'_i), c = sum(r_i), f = sum(s_i*e_i)
    let a: Scalar = r.iter().zip(&e_prime).map(|(ri, ei)| *ri * *ei).sum();
    let c: Scalar = r.iter().copied().sum();
    let f: Scalar = s.iter().zip(&e).map(|(si, ei)| *si * *ei).sum();

    // d_1 = b_1, d_i = b_i + e'_i*d_{i-1}
    let mut d = b_scalars[0];
    for i in 1..n {
        d = b_scalars[i] + e_prime[i] * d;
    }

    proof.k_a = v * a + alpha;
    proof.k_b = b_scalars
        .iter()
        .zip(&beta)
        .map(|(bi, betai)| v * *bi + *betai)
        .collect();
    proof.k_c = v * c + gamma;
    proof.k_d = v * d + delta;
    proof.k_e = e_prime
        .iter()
        .zip(&epsilon)
        .map(|(ei, epsiloni)| v * *ei + *epsiloni)
        .collect();
    proof.k_f = v * f + phi;
    Ok((outputs, proof))
}

impl ShuffleProof {
    /// Verifies that `outputs` is a re-randomized permutation of `inputs`.
    pub fn verify(
        &self,
        public: &G1,
        inputs: &[Ciphertext],
        outputs: &[Ciphertext],
        context: &[u8],
    ) -> Result<(), Error> {
        let n = inputs.len();
        if n == 0 {
            return Err(Error::EmptyShuffle);
        }
        if outputs.len() != n
            || self.u.len() != n
            || self.b.len() != n
            || self.b_prime.len() != n
            || self.k_b.len() != n
            || self.k_e.len() != n
        {
            return Err(Error::InvalidProof("shuffle length mismatch"));
        }
        let generators = Generators::derive(n);
        let h = &generators.0;
        let g = G1::one();

        let transcript = statement(context, public, inputs, outputs, &self.u);
        let e = challenge_e(&transcript, n);
        let v = challenge_v(&transcript, self);

        // A = sum(e_i*u_i)
        let big_a = self
            .u
            .par_iter()
            .zip(e.par_iter())
            .map(|(ui, ei)| *ui * *ei)
            .reduce(G1::zero, |acc, x| acc + x);

        // F = sum(e_i*w_i)
        let big_f = inputs
            .par_iter()
            .zip(e.par_iter())
            .map(|(w, ei)| *w * *ei)
            .reduce(Ciphertext::zero, |acc, x| acc + x);

        // C = sum(u) - sum(h)
        let big_c = self.u.iter().copied().sum::<G1>() - h.iter().copied().sum::<G1>();

        // D = B_N - prod(e)*h_1
        let e_product = e.iter().fold(Scalar::one(), |acc, ei| acc * *ei);
        let big_d = self.b[n - 1] - h[0] * e_product;

        // v*A + A' = k_a*g + sum(k_e_i*h_i)
        let rhs = g * self.k_a
            + h.par_iter()
                .zip(self.k_e.par_iter())
                .map(|(hi, ki)| *hi * *ki)
                .reduce(G1::zero, |acc, x| acc + x);
        if big_a * v + self.a_prime != rhs {
            return Err(Error::InvalidProof("shuffle permutation commitment"));
        }

        // v*B_i + B'_i = k_b_i*g + k_e_i*B_{i-1}
        let chain_valid = (0..n).into_par_iter().all(|i| {
            let previous = if i == 0 { h[0] } else { self.b[i - 1] };
            self.b[i] * v + self.b_prime[i] == g * self.k_b[i] + previous * self.k_e[i]
        });
        if !chain_valid {
            return Err(Error::InvalidProof("shuffle bridging commitment"));
        }

        // v*C + C' = k_c*g
        if big_c * v + self.c_prime != g * self.k_c {
            return Err(Error::InvalidProof("shuffle commitment sum"));
        }

        // v*D + D' = k_d*g
        if big_d * v + self.d_prime != g * self.k_d {
            return Err(Error::InvalidProof("shuffle commitment product"));
        }

        // v*F + F' = sum(k_e_i*w'_i) - (k_f*g, k_f*P)
        let weighted = outputs
            .par_iter()
            .zip(self.k_e.par_iter())
            .map(|(w, ki)| *w * *ki)
            .reduce(Ciphertext::zero, |acc, x| acc + x);
        let rhs = Ciphertext {
            k: weighted.k - g * self.k_f,
            c: weighted.c - *public * self.k_f,
        };
        if big_f * v + self.f_prime != rhs {
            return Err(Error::InvalidProof("shuffle re-encryption"));
        }
        Ok(())
    }
}

impl Write for ShuffleProof {
    fn write(&self, buf: &mut impl BufMut) {
        self.u.write(buf);
        self.b.write(buf);
        self.a_prime.write(buf);
        self.b_prime.write(buf);
        self.c_prime.write(buf);
        self.d_prime.write(buf);
        self.f_prime.write(buf);
        self.k_a.write(buf);
        self.k_b.write(buf);
        self.k_c.write(buf);
        self.k_d.write(buf);
        self.k_e.write(buf);
        self.k_f.write(buf);
    }
}

impl EncodeSize for ShuffleProof {
    fn encode_size(&self) -> usize {
        self.u.encode_size()
            + self.b.encode_size()
            + self.a_prime.encode_size()
            + self.b_prime.encode_size()
            + self.c_prime.encode_size()
            + self.d_prime.encode_size()
            + self.f_prime.encode_size()
            + self.k_a.encode_size()
            + self.k_b.encode_size()
            + self.k_c.encode_size()
            + self.k_d.encode_size()
            + self.k_e.encode_size()
            + self.k_f.encode_size()
    }
}

impl Read for ShuffleProof {
    /// Maximum number of shuffled ciphertexts.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let u = Vec::<G1>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        let b = Vec::<G1>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        let a_prime = G1::read(buf)?;
        let b_prime = Vec::<G1>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        let c_prime = G1::read(buf)?;
        let d_prime = G1::read(buf)?;
        let f_prime = Ciphertext::read(buf)?;
        let k_a = Scalar::read(buf)?;
        let k_b = Vec::<Scalar>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        let k_c = Scalar::read(buf)?;
        let k_d = Scalar::read(buf)?;
        let k_e = Vec::<Scalar>::read_cfg(buf, &(RangeCfg::from(..=*max), ()))?;
        let k_f = Scalar::read(buf)?;
        Ok(Self {
            u,
            b,
            a_prime,
            b_prime,
            c_prime,
            d_prime,
            f_prime,
            k_a,
            k_b,
            k_c,
            k_d,
            k_e,
            k_f,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        elgamal::{decrypt_vector, encrypt_trivial, encrypt_vector, Keypair},
        table::DecryptionTable,
    };
    use commonware_codec::{Decode, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_permutation_inverse() {
        let mut rng = StdRng::seed_from_u64(0);
        let data = vec!['a', 'b', 'c', 'd', 'e'];
        let permutation = Permutation::generate(&mut rng, data.len());
        let permuted = permutation.apply(&data).unwrap();
        assert_eq!(permutation.apply_inverse(&permuted).unwrap(), data);
        assert!(permutation.apply(&data[..2]).is_err());
    }

    #[test]
    fn test_shuffle_verify() {
        let mut rng = StdRng::seed_from_u64(1);
        let keys = Keypair::generate(&mut rng);
        let (inputs, _) = encrypt_vector(&mut rng, &keys.public, &[1, 2, 3, 4, 5]);
        let (outputs, proof) = shuffle(&mut rng, &keys.public, &inputs, None, b"ctx").unwrap();
        proof.verify(&keys.public, &inputs, &outputs, b"ctx").unwrap();

        // The outputs decrypt to a permutation of the inputs
        let table = DecryptionTable::new(10);
        let mut values = decrypt_vector(&table, &keys.secret, &outputs).unwrap();
        values.sort();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_chained_shuffles_with_precomputation() {
        let mut rng = StdRng::seed_from_u64(2);
        let keys = Keypair::generate(&mut rng);
        let inputs: Vec<_> = [-2, 0, 2].iter().map(|v| encrypt_trivial(*v)).collect();
        let mut current = inputs;
        for _ in 0..3 {
            let precomputed = Rerandomizer::precompute(&mut rng, &keys.public, current.len());
            let (next, proof) =
                shuffle(&mut rng, &keys.public, &current, Some(&precomputed), b"ctx").unwrap();
            proof.verify(&keys.public, &current, &next, b"ctx").unwrap();
            current = next;
        }
        let table = DecryptionTable::new(10);
        let mut values = decrypt_vector(&table, &keys.secret, &current).unwrap();
        values.sort();
        assert_eq!(values, vec![-2, 0, 2]);
    }

    #[test]
    fn test_tampered_shuffle_fails() {
        let mut rng = StdRng::seed_from_u64(3);
        let keys = Keypair::generate(&mut rng);
        let (inputs, _) = encrypt_vector(&mut rng, &keys.public, &[1, 2, 3]);
        let (mut outputs, proof) = shuffle(&mut rng, &keys.public, &inputs, None, b"ctx").unwrap();
        assert!(proof.verify(&keys.public, &inputs, &outputs, b"other").is_err());

        // Replace an output with a fresh encryption of a different value
        outputs[0] = encrypt_vector(&mut rng, &keys.public, &[9]).0[0];
        assert!(proof.verify(&keys.public, &inputs, &outputs, b"ctx").is_err());
    }

    #[test]
    fn test_empty_and_codec() {
        let mut rng = StdRng::seed_from_u64(4);
        let keys = Keypair::generate(&mut rng);
        assert_eq!(
            shuffle(&mut rng, &keys.public, &[], None, b"ctx").err(),
            Some(Error::EmptyShuffle)
        );
        let (inputs, _) = encrypt_vector(&mut rng, &keys.public, &[1, 2]);
        let (_, proof) = shuffle(&mut rng, &keys.public, &inputs, None, b"ctx").unwrap();
        let decoded = ShuffleProof::decode_cfg(proof.encode(), &2).unwrap();
        assert_eq!(decoded, proof);
    }
}
