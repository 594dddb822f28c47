//! Survey descriptors and the checks every node runs before taking part in a survey.

use crate::{
    envelope::ProofKind,
    wire::{read_string, string_size, write_string, MAX_CIPHERTEXTS, MAX_MEMBERS, MAX_NAME},
    Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use commonware_cryptography::ed25519::PublicKey;
use drynx_cryptography::{range::PublishedSignatures, Element, G1};
use drynx_encoding::{Operation, MAX_SLOTS};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Maximum number of groups of a survey.
pub const MAX_GROUPS: usize = 1024;

/// Maximum base of a range proof.
pub const MAX_BASE: usize = 1 << 12;

/// Values proven to lie in `[0, u^l)`.
///
/// `u = l = 0` requests a vacuous proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueRange {
    pub u: u64,
    pub l: usize,
}

impl ValueRange {
    pub fn new(u: u64, l: usize) -> Self {
        Self { u, l }
    }

    pub fn is_vacuous(&self) -> bool {
        self.u == 0 && self.l == 0
    }
}

impl Write for ValueRange {
    fn write(&self, buf: &mut impl BufMut) {
        self.u.write(buf);
        self.l.write(buf);
    }
}

impl EncodeSize for ValueRange {
    fn encode_size(&self) -> usize {
        self.u.encode_size() + self.l.encode_size()
    }
}

impl Read for ValueRange {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            u: u64::read(buf)?,
            l: usize::read_cfg(buf, &RangeCfg::from(..=64))?,
        })
    }
}

/// Which proofs the nodes produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProofMode {
    /// No proof is produced and verifying nodes are not involved.
    None,
    /// Every proof, with one range proof per computing node.
    #[default]
    Full,
    /// Every proof, with range proofs aggregated across computing nodes.
    Optimized,
}

impl ProofMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, ProofMode::None)
    }
}

impl Write for ProofMode {
    fn write(&self, buf: &mut impl BufMut) {
        let tag: u8 = match self {
            ProofMode::None => 0,
            ProofMode::Full => 1,
            ProofMode::Optimized => 2,
        };
        tag.write(buf);
    }
}

impl EncodeSize for ProofMode {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for ProofMode {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(ProofMode::None),
            1 => Ok(ProofMode::Full),
            2 => Ok(ProofMode::Optimized),
            _ => Err(CodecError::Invalid("drynx::ProofMode", "Invalid type")),
        }
    }
}

/// Laplace noise added to the result.
///
/// Noise is enabled as soon as any parameter is non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct DiffPrivacy {
    pub lap_mean: f64,
    pub lap_scale: f64,
    pub noise_list_size: usize,
    pub quanta: f64,
    pub scale: f64,
    pub limit: f64,
}

impl DiffPrivacy {
    pub fn enabled(&self) -> bool {
        self.lap_mean != 0.0
            || self.lap_scale != 0.0
            || self.noise_list_size != 0
            || self.quanta != 0.0
            || self.scale != 0.0
            || self.limit != 0.0
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.enabled() {
            return Ok(());
        }
        if self.noise_list_size == 0 {
            return Err(Error::Config("noise list size must be set".into()));
        }
        if self.noise_list_size > MAX_CIPHERTEXTS {
            return Err(Error::Config("noise list too large".into()));
        }
        if self.quanta == 0.0 && self.limit == 0.0 {
            return Err(Error::Config("either quanta or limit must be set".into()));
        }
        if self.lap_scale <= 0.0 {
            return Err(Error::Config("laplace scale must be positive".into()));
        }
        Ok(())
    }
}

impl Write for DiffPrivacy {
    fn write(&self, buf: &mut impl BufMut) {
        self.lap_mean.write(buf);
        self.lap_scale.write(buf);
        self.noise_list_size.write(buf);
        self.quanta.write(buf);
        self.scale.write(buf);
        self.limit.write(buf);
    }
}

impl EncodeSize for DiffPrivacy {
    fn encode_size(&self) -> usize {
        5 * 8 + self.noise_list_size.encode_size()
    }
}

impl Read for DiffPrivacy {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            lap_mean: f64::read(buf)?,
            lap_scale: f64::read(buf)?,
            noise_list_size: usize::read_cfg(buf, &RangeCfg::from(..=MAX_CIPHERTEXTS))?,
            quanta: f64::read(buf)?,
            scale: f64::read(buf)?,
            limit: f64::read(buf)?,
        })
    }
}

/// Minimum fraction of accepted verdicts per proof kind.
///
/// `general` applies to shuffle proofs.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Thresholds {
    pub general: f64,
    pub aggregation: f64,
    pub range: f64,
    pub obfuscation: f64,
    pub key_switch: f64,
}

impl Thresholds {
    /// Requires every proof to be accepted by every verifying node.
    pub fn all() -> Self {
        Self {
            general: 1.0,
            aggregation: 1.0,
            range: 1.0,
            obfuscation: 1.0,
            key_switch: 1.0,
        }
    }

    pub fn get(&self, kind: ProofKind) -> f64 {
        match kind {
            ProofKind::Range => self.range,
            ProofKind::Aggregation => self.aggregation,
            ProofKind::Obfuscation => self.obfuscation,
            ProofKind::Shuffle => self.general,
            ProofKind::KeySwitch => self.key_switch,
        }
    }

    fn values(&self) -> [f64; 5] {
        [
            self.general,
            self.aggregation,
            self.range,
            self.obfuscation,
            self.key_switch,
        ]
    }
}

impl Write for Thresholds {
    fn write(&self, buf: &mut impl BufMut) {
        for value in self.values() {
            value.write(buf);
        }
    }
}

impl EncodeSize for Thresholds {
    fn encode_size(&self) -> usize {
        5 * 8
    }
}

impl Read for Thresholds {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            general: f64::read(buf)?,
            aggregation: f64::read(buf)?,
            range: f64::read(buf)?,
            obfuscation: f64::read(buf)?,
            key_switch: f64::read(buf)?,
        })
    }
}

/// A participant of a survey.
///
/// `name` is the overlay endpoint of the member and `identity` the key that signs
/// its proof envelopes. Computing nodes also publish their share of the
/// collective encryption key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub identity: PublicKey,
    pub key: Option<G1>,
}

impl Write for Member {
    fn write(&self, buf: &mut impl BufMut) {
        write_string(&self.name, buf);
        self.identity.write(buf);
        self.key.write(buf);
    }
}

impl EncodeSize for Member {
    fn encode_size(&self) -> usize {
        string_size(&self.name) + self.identity.encode_size() + self.key.encode_size()
    }
}

impl Read for Member {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            name: read_string(buf, MAX_NAME)?,
            identity: PublicKey::read(buf)?,
            key: Option::<G1>::read(buf)?,
        })
    }
}

/// Participants of a survey.
///
/// `providers[i]` are the data providers answering to computing node `i`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Roster {
    pub computing: Vec<Member>,
    pub verifying: Vec<Member>,
    pub providers: Vec<Vec<Member>>,
}

impl Roster {
    /// Sum of the key shares of all computing nodes.
    pub fn collective_key(&self) -> Result<G1, Error> {
        let mut collective = G1::zero();
        for member in &self.computing {
            let key = member
                .key
                .ok_or_else(|| Error::Config(format!("{} has no key", member.name)))?;
            collective += key;
        }
        Ok(collective)
    }

    pub fn computing_index(&self, name: &str) -> Option<usize> {
        self.computing.iter().position(|member| member.name == name)
    }

    pub fn verifying_index(&self, name: &str) -> Option<usize> {
        self.verifying.iter().position(|member| member.name == name)
    }

    /// Returns the member named `name`, whatever its role.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.computing
            .iter()
            .chain(&self.verifying)
            .chain(self.providers.iter().flatten())
            .find(|member| member.name == name)
    }

    /// Number of data providers.
    pub fn provider_count(&self) -> usize {
        self.providers.iter().map(Vec::len).sum()
    }

    /// SHA-256 digest of the verifying roster.
    pub fn verifying_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for member in &self.verifying {
            let encoded = commonware_codec::Encode::encode(member);
            hasher.update(&encoded);
        }
        hasher.finalize().into()
    }

    fn validate(&self, proofs: bool) -> Result<(), Error> {
        if self.computing.is_empty() {
            return Err(Error::Config("at least one computing node is required".into()));
        }
        if self.providers.len() != self.computing.len() {
            return Err(Error::Config("one provider list per computing node is required".into()));
        }
        if proofs && self.verifying.is_empty() {
            return Err(Error::Config("proofs require verifying nodes".into()));
        }
        if !proofs && !self.verifying.is_empty() {
            return Err(Error::Config("verifying nodes require proofs".into()));
        }
        if let Some(member) = self.computing.iter().find(|member| member.key.is_none()) {
            return Err(Error::Config(format!("{} has no key", member.name)));
        }
        let mut names = HashSet::new();
        for member in self
            .computing
            .iter()
            .chain(&self.verifying)
            .chain(self.providers.iter().flatten())
        {
            if member.name.is_empty() || member.name.contains('/') {
                return Err(Error::Config(format!("invalid member name {:?}", member.name)));
            }
            if !names.insert(member.name.as_str()) {
                return Err(Error::Config(format!("duplicate member {}", member.name)));
            }
        }
        Ok(())
    }
}

impl Write for Roster {
    fn write(&self, buf: &mut impl BufMut) {
        self.computing.write(buf);
        self.verifying.write(buf);
        self.providers.write(buf);
    }
}

impl EncodeSize for Roster {
    fn encode_size(&self) -> usize {
        self.computing.encode_size() + self.verifying.encode_size() + self.providers.encode_size()
    }
}

impl Read for Roster {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let members = (RangeCfg::from(..=MAX_MEMBERS), ());
        Ok(Self {
            computing: Vec::<Member>::read_cfg(buf, &members)?,
            verifying: Vec::<Member>::read_cfg(buf, &members)?,
            providers: Vec::<Vec<Member>>::read_cfg(
                buf,
                &(RangeCfg::from(..=MAX_MEMBERS), members),
            )?,
        })
    }
}

/// Number of proofs verifying nodes expect for a survey, per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ProofCounts {
    pub range: usize,
    pub aggregation: usize,
    pub obfuscation: usize,
    pub shuffle: usize,
    pub key_switch: usize,
}

impl ProofCounts {
    pub fn get(&self, kind: ProofKind) -> usize {
        match kind {
            ProofKind::Range => self.range,
            ProofKind::Aggregation => self.aggregation,
            ProofKind::Obfuscation => self.obfuscation,
            ProofKind::Shuffle => self.shuffle,
            ProofKind::KeySwitch => self.key_switch,
        }
    }

    pub fn get_mut(&mut self, kind: ProofKind) -> &mut usize {
        match kind {
            ProofKind::Range => &mut self.range,
            ProofKind::Aggregation => &mut self.aggregation,
            ProofKind::Obfuscation => &mut self.obfuscation,
            ProofKind::Shuffle => &mut self.shuffle,
            ProofKind::KeySwitch => &mut self.key_switch,
        }
    }

    pub fn total(&self) -> usize {
        ProofKind::ALL.iter().map(|kind| self.get(*kind)).sum()
    }
}

/// A survey, as submitted by the querier.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub survey_id: String,
    pub operation: Operation,
    /// One range per output slot, if data providers prove their inputs.
    pub ranges: Option<Vec<ValueRange>>,
    /// `signatures[i][j]`: signatures of computing node `i` for the base of slot `j`.
    pub signatures: Vec<Vec<PublishedSignatures>>,
    pub diff_p: DiffPrivacy,
    pub obfuscation: bool,
    pub cutting_factor: usize,
    pub proofs: ProofMode,
    pub thresholds: Thresholds,
    /// Number of distinct values of each group-by attribute.
    pub group_by: Vec<u32>,
    pub roster: Roster,
    /// Key of the querier, which the result is switched to.
    pub client: G1,
}

impl Query {
    /// Number of output slots of one group.
    pub fn slots(&self) -> usize {
        self.operation.output_len()
    }

    pub fn group_count(&self) -> usize {
        self.group_by.iter().map(|n| *n as usize).product()
    }

    /// Number of ciphertexts exchanged for all groups.
    pub fn vector_len(&self) -> usize {
        self.group_count() * self.slots()
    }

    /// Keys of all groups, such as `[0 1]`, in the order their vectors are concatenated.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<Vec<u32>> = vec![Vec::new()];
        for count in &self.group_by {
            groups = groups
                .into_iter()
                .flat_map(|prefix| {
                    (0..*count).map(move |value| {
                        let mut group = prefix.clone();
                        group.push(value);
                        group
                    })
                })
                .collect();
        }
        groups
            .into_iter()
            .map(|group| {
                let values: Vec<String> = group.iter().map(u32::to_string).collect();
                format!("[{}]", values.join(" "))
            })
            .collect()
    }

    /// Returns whether data providers prove the range of their inputs.
    pub fn range_proofs(&self) -> bool {
        self.proofs.enabled() && self.ranges.is_some()
    }

    /// Number of proofs of each kind the verifying nodes receive.
    pub fn expected_proofs(&self) -> ProofCounts {
        if !self.proofs.enabled() {
            return ProofCounts::default();
        }
        let computing = self.roster.computing.len();
        let non_leaves = (0..computing)
            .filter(|i| !crate::overlay::children(*i, computing).is_empty())
            .count();
        ProofCounts {
            range: if self.ranges.is_some() {
                self.roster.provider_count() * self.vector_len()
            } else {
                0
            },
            aggregation: non_leaves,
            obfuscation: if self.obfuscation {
                computing * self.vector_len()
            } else {
                0
            },
            shuffle: if self.diff_p.enabled() { computing } else { 0 },
            key_switch: computing,
        }
    }

    /// Checks that the survey can be run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.survey_id.is_empty() || self.survey_id.len() > MAX_NAME {
            return Err(Error::Config("invalid survey id".into()));
        }
        self.operation
            .validate()
            .map_err(|err| Error::Config(err.to_string()))?;
        self.roster.validate(self.proofs.enabled())?;

        // Groups
        if self.group_by.iter().any(|count| *count == 0) {
            return Err(Error::Config("group-by attributes need at least one value".into()));
        }
        let groups = self
            .group_by
            .iter()
            .try_fold(1usize, |acc, count| acc.checked_mul(*count as usize))
            .filter(|groups| *groups <= MAX_GROUPS)
            .ok_or_else(|| Error::Config("too many groups".into()))?;
        if groups * self.slots() > MAX_CIPHERTEXTS {
            return Err(Error::Config("too many ciphertexts".into()));
        }

        // Obfuscation only preserves whether a slot is zero
        if self.obfuscation {
            if !self.operation.obfuscatable() {
                return Err(Error::Config(format!(
                    "{} cannot be obfuscated",
                    self.operation.name()
                )));
            }
            if let Some(ranges) = &self.ranges {
                if ranges.iter().any(|range| *range != ValueRange::new(2, 1)) {
                    return Err(Error::Config("obfuscated slots must be bits".into()));
                }
            }
        }

        // Proofs
        if self.proofs.enabled() {
            if let Some(ranges) = &self.ranges {
                self.validate_ranges(ranges)?;
            }
        } else {
            if self.ranges.is_some() || !self.signatures.is_empty() {
                return Err(Error::Config("ranges require proofs".into()));
            }
            if self.thresholds.values().iter().any(|value| *value != 0.0) {
                return Err(Error::Config("thresholds require proofs".into()));
            }
        }
        if self
            .thresholds
            .values()
            .iter()
            .any(|value| !(0.0..=1.0).contains(value))
        {
            return Err(Error::Config("thresholds must lie in [0, 1]".into()));
        }

        // Noise
        self.diff_p.validate()?;
        if self.diff_p.enabled() && self.operation.reduction().is_some() {
            return Err(Error::Config(format!(
                "noise cannot be added to {}",
                self.operation.name()
            )));
        }

        if self.cutting_factor > 0 {
            return Err(Error::Config("cutting factor is not supported".into()));
        }
        Ok(())
    }

    fn validate_ranges(&self, ranges: &[ValueRange]) -> Result<(), Error> {
        if ranges.len() != self.slots() {
            return Err(Error::Config(format!(
                "expected {} ranges, got {}",
                self.slots(),
                ranges.len()
            )));
        }
        for range in ranges {
            if range.is_vacuous() {
                continue;
            }
            if range.u < 2 || range.u as usize > MAX_BASE || range.l == 0 {
                return Err(Error::Config(format!(
                    "invalid range u={} l={}",
                    range.u, range.l
                )));
            }
        }
        if self.signatures.len() != self.roster.computing.len() {
            return Err(Error::Config("one signature row per computing node is required".into()));
        }
        for row in &self.signatures {
            if row.len() != ranges.len() {
                return Err(Error::Config("one signature set per slot is required".into()));
            }
            for (published, range) in row.iter().zip(ranges) {
                if !range.is_vacuous() && published.signatures.len() as u64 != range.u {
                    return Err(Error::Config("signatures do not match range base".into()));
                }
            }
        }
        Ok(())
    }
}

impl Write for Query {
    fn write(&self, buf: &mut impl BufMut) {
        write_string(&self.survey_id, buf);
        self.operation.write(buf);
        self.ranges.write(buf);
        self.signatures.write(buf);
        self.diff_p.write(buf);
        self.obfuscation.write(buf);
        self.cutting_factor.write(buf);
        self.proofs.write(buf);
        self.thresholds.write(buf);
        self.group_by.write(buf);
        self.roster.write(buf);
        self.client.write(buf);
    }
}

impl EncodeSize for Query {
    fn encode_size(&self) -> usize {
        string_size(&self.survey_id)
            + self.operation.encode_size()
            + self.ranges.encode_size()
            + self.signatures.encode_size()
            + self.diff_p.encode_size()
            + self.obfuscation.encode_size()
            + self.cutting_factor.encode_size()
            + self.proofs.encode_size()
            + self.thresholds.encode_size()
            + self.group_by.encode_size()
            + self.roster.encode_size()
            + self.client.encode_size()
    }
}

impl Read for Query {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            survey_id: read_string(buf, MAX_NAME)?,
            operation: Operation::read(buf)?,
            ranges: Option::<Vec<ValueRange>>::read_cfg(
                buf,
                &(RangeCfg::from(..=MAX_SLOTS), ()),
            )?,
            signatures: Vec::<Vec<PublishedSignatures>>::read_cfg(
                buf,
                &(
                    RangeCfg::from(..=MAX_MEMBERS),
                    (RangeCfg::from(..=MAX_SLOTS), MAX_BASE),
                ),
            )?,
            diff_p: DiffPrivacy::read(buf)?,
            obfuscation: bool::read(buf)?,
            cutting_factor: usize::read_cfg(buf, &RangeCfg::from(..))?,
            proofs: ProofMode::read(buf)?,
            thresholds: Thresholds::read(buf)?,
            group_by: Vec::<u32>::read_cfg(buf, &(RangeCfg::from(..=16), ()))?,
            roster: Roster::read(buf)?,
            client: G1::read(buf)?,
        })
    }
}
