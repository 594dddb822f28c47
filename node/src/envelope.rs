//! Signed proofs sent to verifying nodes.
//!
//! Every proof produced during a survey travels in a [ProofEnvelope] that names its
//! kind, the survey, the producing node and a `differ_info` distinguishing proofs
//! of the same kind produced by the same node (a slot index, a group, a hop). The
//! envelope is signed by the producer over everything but the signature.
//!
//! Verifying nodes identify a verdict with
//! `{survey_id}/{kind}/{sender}/{differ_info}/{verifier}`.

use crate::{
    query::{ProofMode, Query},
    wire::{read_string, string_size, write_string, MAX_CIPHERTEXTS, MAX_MEMBERS, MAX_NAME},
    Error,
};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{DecodeExt, Encode, EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use commonware_cryptography::{
    ed25519::{PrivateKey, PublicKey, Signature},
    Signer as _, Verifier as _,
};
use drynx_cryptography::{
    aggregation::AggregationProof, key_switch::KeySwitchProof, obfuscation::ObfuscationProof,
    range::RangeProof, shuffle::ShuffleProof, CipherVector, G1,
};
use sha2::{Digest, Sha256};
use std::fmt;

/// Namespace of envelope signatures.
const NAMESPACE: &[u8] = b"_DRYNX_ENVELOPE";

/// Maximum size of an envelope payload.
pub const MAX_PAYLOAD: usize = 1 << 28;

/// Kinds of proofs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProofKind {
    Range,
    Aggregation,
    Obfuscation,
    Shuffle,
    KeySwitch,
}

impl ProofKind {
    pub const ALL: [ProofKind; 5] = [
        ProofKind::Range,
        ProofKind::Aggregation,
        ProofKind::Obfuscation,
        ProofKind::Shuffle,
        ProofKind::KeySwitch,
    ];

    /// Name used in proof identifiers and storage buckets.
    pub fn name(&self) -> &'static str {
        match self {
            ProofKind::Range => "range",
            ProofKind::Aggregation => "aggregation",
            ProofKind::Obfuscation => "obfuscation",
            ProofKind::Shuffle => "shuffle",
            ProofKind::KeySwitch => "keyswitch",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn tag(&self) -> u8 {
        match self {
            ProofKind::Range => 0,
            ProofKind::Aggregation => 1,
            ProofKind::Obfuscation => 2,
            ProofKind::Shuffle => 3,
            ProofKind::KeySwitch => 4,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or(CodecError::Invalid("drynx::ProofKind", "Invalid type"))
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Write for ProofKind {
    fn write(&self, buf: &mut impl BufMut) {
        self.tag().write(buf);
    }
}

impl EncodeSize for ProofKind {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for ProofKind {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Self::from_tag(u8::read(buf)?)
    }
}

/// The Fiat-Shamir context binding a proof to its position in a survey.
pub fn context(survey_id: &str, sender: &str, differ_info: &str) -> Vec<u8> {
    format!("{survey_id}/{sender}/{differ_info}").into_bytes()
}

/// The statement and proof carried by an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Proof {
    /// Range proofs of slot `slot` of a data provider: one per computing node, or a
    /// single aggregated proof.
    Range { slot: usize, proofs: Vec<RangeProof> },
    Aggregation(AggregationProof),
    Obfuscation(ObfuscationProof),
    Shuffle {
        inputs: CipherVector,
        outputs: CipherVector,
        proof: ShuffleProof,
    },
    KeySwitch {
        inputs: CipherVector,
        switched: CipherVector,
        proof: KeySwitchProof,
    },
}

impl Proof {
    pub fn kind(&self) -> ProofKind {
        match self {
            Proof::Range { .. } => ProofKind::Range,
            Proof::Aggregation(_) => ProofKind::Aggregation,
            Proof::Obfuscation(_) => ProofKind::Obfuscation,
            Proof::Shuffle { .. } => ProofKind::Shuffle,
            Proof::KeySwitch { .. } => ProofKind::KeySwitch,
        }
    }

    /// Verifies the proof against `query`, for the envelope of `sender` and `differ_info`.
    pub fn verify(&self, query: &Query, sender: &str, differ_info: &str) -> Result<(), Error> {
        let kind = self.kind();
        let invalid = |reason: String| Error::InvalidProof { kind, reason };
        let context = context(&query.survey_id, sender, differ_info);
        match self {
            Proof::Range { slot, proofs } => {
                let ranges = query
                    .ranges
                    .as_ref()
                    .ok_or_else(|| invalid("survey has no ranges".into()))?;
                let range = ranges
                    .get(slot % query.slots().max(1))
                    .ok_or_else(|| invalid(format!("slot {slot} out of bounds")))?;
                let signers: Vec<G1> = query
                    .signatures
                    .iter()
                    .map(|row| row.get(slot % query.slots().max(1)).map(|p| p.public))
                    .collect::<Option<_>>()
                    .ok_or_else(|| invalid("missing signatures".into()))?;
                let commitment = proofs
                    .first()
                    .map(|proof| proof.commitment)
                    .ok_or_else(|| invalid("no range proof".into()))?;
                if proofs.iter().any(|proof| proof.commitment != commitment) {
                    return Err(invalid("commitments differ".into()));
                }
                let public = query.roster.collective_key()?;
                match query.proofs {
                    ProofMode::Optimized => {
                        if proofs.len() != 1 {
                            return Err(invalid("expected one aggregated proof".into()));
                        }
                        proofs[0]
                            .verify(range.u, range.l, &signers, &public, &context)
                            .map_err(|err| invalid(err.to_string()))
                    }
                    _ => {
                        if proofs.len() != signers.len() {
                            return Err(invalid("expected one proof per computing node".into()));
                        }
                        for (proof, signer) in proofs.iter().zip(&signers) {
                            proof
                                .verify(
                                    range.u,
                                    range.l,
                                    std::slice::from_ref(signer),
                                    &public,
                                    &context,
                                )
                                .map_err(|err| invalid(err.to_string()))?;
                        }
                        Ok(())
                    }
                }
            }
            Proof::Aggregation(proof) => proof.verify().map_err(|err| invalid(err.to_string())),
            Proof::Obfuscation(proof) => proof
                .verify(&context)
                .map_err(|err| invalid(err.to_string())),
            Proof::Shuffle {
                inputs,
                outputs,
                proof,
            } => {
                let public = query.roster.collective_key()?;
                proof
                    .verify(&public, inputs, outputs, &context)
                    .map_err(|err| invalid(err.to_string()))
            }
            Proof::KeySwitch {
                inputs,
                switched,
                proof,
            } => {
                let share = query
                    .roster
                    .computing
                    .iter()
                    .find(|member| member.name == sender)
                    .and_then(|member| member.key)
                    .ok_or_else(|| invalid(format!("{sender} is not a computing node")))?;
                proof
                    .verify(&share, &query.client, inputs, switched, &context)
                    .map_err(|err| invalid(err.to_string()))
            }
        }
    }
}

impl Write for Proof {
    fn write(&self, buf: &mut impl BufMut) {
        self.kind().write(buf);
        match self {
            Proof::Range { slot, proofs } => {
                slot.write(buf);
                proofs.write(buf);
            }
            Proof::Aggregation(proof) => proof.write(buf),
            Proof::Obfuscation(proof) => proof.write(buf),
            Proof::Shuffle {
                inputs,
                outputs,
                proof,
            } => {
                inputs.write(buf);
                outputs.write(buf);
                proof.write(buf);
            }
            Proof::KeySwitch {
                inputs,
                switched,
                proof,
            } => {
                inputs.write(buf);
                switched.write(buf);
                proof.write(buf);
            }
        }
    }
}

impl EncodeSize for Proof {
    fn encode_size(&self) -> usize {
        1 + match self {
            Proof::Range { slot, proofs } => slot.encode_size() + proofs.encode_size(),
            Proof::Aggregation(proof) => proof.encode_size(),
            Proof::Obfuscation(proof) => proof.encode_size(),
            Proof::Shuffle {
                inputs,
                outputs,
                proof,
            } => inputs.encode_size() + outputs.encode_size() + proof.encode_size(),
            Proof::KeySwitch {
                inputs,
                switched,
                proof,
            } => inputs.encode_size() + switched.encode_size() + proof.encode_size(),
        }
    }
}

impl Read for Proof {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let vector = (RangeCfg::from(..=MAX_CIPHERTEXTS), ());
        let proof = match ProofKind::read(buf)? {
            ProofKind::Range => Proof::Range {
                slot: usize::read_cfg(buf, &RangeCfg::from(..MAX_CIPHERTEXTS))?,
                proofs: Vec::<RangeProof>::read_cfg(
                    buf,
                    &(RangeCfg::from(1..=MAX_MEMBERS), MAX_MEMBERS),
                )?,
            },
            ProofKind::Aggregation => Proof::Aggregation(AggregationProof::read_cfg(
                buf,
                &(MAX_MEMBERS, MAX_CIPHERTEXTS),
            )?),
            ProofKind::Obfuscation => Proof::Obfuscation(ObfuscationProof::read(buf)?),
            ProofKind::Shuffle => Proof::Shuffle {
                inputs: CipherVector::read_cfg(buf, &vector)?,
                outputs: CipherVector::read_cfg(buf, &vector)?,
                proof: ShuffleProof::read_cfg(buf, &MAX_CIPHERTEXTS)?,
            },
            ProofKind::KeySwitch => Proof::KeySwitch {
                inputs: CipherVector::read_cfg(buf, &vector)?,
                switched: CipherVector::read_cfg(buf, &vector)?,
                proof: KeySwitchProof::read_cfg(buf, &MAX_CIPHERTEXTS)?,
            },
        };
        Ok(proof)
    }
}

/// A signed proof.
#[derive(Clone, Debug, PartialEq)]
pub struct ProofEnvelope {
    pub kind: ProofKind,
    pub survey_id: String,
    pub sender: String,
    pub differ_info: String,
    /// The encoded [Proof].
    pub payload: Bytes,
    pub signature: Signature,
    /// Names of the verifying nodes the envelope is sent to.
    pub roster: Vec<String>,
}

impl ProofEnvelope {
    /// Encodes and signs `proof`.
    pub fn sign(
        signer: &PrivateKey,
        survey_id: &str,
        sender: &str,
        differ_info: &str,
        proof: &Proof,
        roster: Vec<String>,
    ) -> Self {
        let kind = proof.kind();
        let payload = proof.encode().freeze();
        let digest = digest(kind, survey_id, sender, differ_info, &payload, &roster);
        Self {
            kind,
            survey_id: survey_id.to_string(),
            sender: sender.to_string(),
            differ_info: differ_info.to_string(),
            payload,
            signature: signer.sign(Some(NAMESPACE), &digest),
            roster,
        }
    }

    /// Checks the signature of the envelope against the identity of its sender.
    pub fn verify_signature(&self, identity: &PublicKey) -> bool {
        let digest = digest(
            self.kind,
            &self.survey_id,
            &self.sender,
            &self.differ_info,
            &self.payload,
            &self.roster,
        );
        identity.verify(Some(NAMESPACE), &digest, &self.signature)
    }

    /// Decodes the carried proof, which must match the kind of the envelope.
    pub fn proof(&self) -> Result<Proof, Error> {
        let proof = Proof::decode(self.payload.clone())
            .map_err(|_| Error::BadEnvelope("malformed payload"))?;
        if proof.kind() != self.kind {
            return Err(Error::BadEnvelope("payload kind mismatch"));
        }
        Ok(proof)
    }

    /// Identifier of the verdict of `verifier` on this envelope.
    pub fn identifier(&self, verifier: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.survey_id, self.kind, self.sender, self.differ_info, verifier
        )
    }

    /// Storage bucket of the envelope.
    pub fn bucket(&self) -> String {
        bucket(&self.survey_id, self.kind)
    }
}

/// Storage bucket of the proofs of `kind` of a survey.
pub fn bucket(survey_id: &str, kind: ProofKind) -> String {
    format!("{survey_id}/{kind}")
}

/// Returns the kind named in `identifier`, a verdict identifier of `survey_id`.
pub fn kind_of(identifier: &str, survey_id: &str) -> Option<ProofKind> {
    let rest = identifier.strip_prefix(survey_id)?.strip_prefix('/')?;
    ProofKind::from_name(rest.split('/').next()?)
}

fn digest(
    kind: ProofKind,
    survey_id: &str,
    sender: &str,
    differ_info: &str,
    payload: &Bytes,
    roster: &[String],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([kind.tag()]);
    for field in [survey_id, sender, differ_info] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update((payload.len() as u64).to_be_bytes());
    hasher.update(payload);
    for name in roster {
        hasher.update((name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
    }
    hasher.finalize().into()
}

impl Write for ProofEnvelope {
    fn write(&self, buf: &mut impl BufMut) {
        self.kind.write(buf);
        write_string(&self.survey_id, buf);
        write_string(&self.sender, buf);
        write_string(&self.differ_info, buf);
        self.payload.write(buf);
        self.signature.write(buf);
        self.roster.len().write(buf);
        for name in &self.roster {
            write_string(name, buf);
        }
    }
}

impl EncodeSize for ProofEnvelope {
    fn encode_size(&self) -> usize {
        self.kind.encode_size()
            + string_size(&self.survey_id)
            + string_size(&self.sender)
            + string_size(&self.differ_info)
            + self.payload.encode_size()
            + self.signature.encode_size()
            + self.roster.len().encode_size()
            + self.roster.iter().map(|name| string_size(name)).sum::<usize>()
    }
}

impl Read for ProofEnvelope {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let kind = ProofKind::read(buf)?;
        let survey_id = read_string(buf, MAX_NAME)?;
        let sender = read_string(buf, MAX_NAME)?;
        let differ_info = read_string(buf, MAX_NAME)?;
        let payload = Bytes::read_cfg(buf, &RangeCfg::from(..=MAX_PAYLOAD))?;
        let signature = Signature::read(buf)?;
        let len = usize::read_cfg(buf, &RangeCfg::from(..=MAX_MEMBERS))?;
        let mut roster = Vec::with_capacity(len);
        for _ in 0..len {
            roster.push(read_string(buf, MAX_NAME)?);
        }
        Ok(Self {
            kind,
            survey_id,
            sender,
            differ_info,
            payload,
            signature,
            roster,
        })
    }
}
