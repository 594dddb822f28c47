use crate::{
    query::Query,
    survey::{Arena, Handle, Protocol, Status},
    wire::Phase,
    Error,
};
use drynx_cryptography::{shuffle::Rerandomizer, CipherVector};
use std::collections::BTreeMap;
use tracing::warn;

/// State of one survey at a computing node.
pub struct SurveyState {
    pub query: Query,
    /// Index of the node in the computing roster.
    pub index: usize,
    /// Querier waiting for the result, known by the root only.
    pub origin: Option<String>,

    pub protocols: Arena<Protocol>,
    pub collection: Handle,
    pub aggregation: Handle,
    pub obfuscation: Handle,
    pub shuffle: Handle,
    pub key_switch: Handle,

    /// Vectors of the providers and children, summed once both barriers complete.
    pub inputs: Vec<CipherVector>,
    /// Aggregate of the whole tree (root only).
    pub aggregate: Option<CipherVector>,
    /// Shuffled noise list (root only).
    pub noise: Option<CipherVector>,
    pub rerandomizers: Vec<Rerandomizer>,
    /// Vector being switched to the querier key (root only).
    pub switching: Option<CipherVector>,
    pub contributions: BTreeMap<String, CipherVector>,

    /// Whether the subtree sum was computed.
    pub aggregated: bool,
    /// Number of contributions accepted, watched by the deadline task.
    pub progress: u64,
    pub finished: bool,
}

impl SurveyState {
    pub fn new(query: Query, index: usize, origin: Option<String>) -> Self {
        let mut protocols = Arena::new();
        let collection = protocols.insert(Protocol::new(Phase::Collection));
        let aggregation = protocols.insert(Protocol::new(Phase::Aggregation));
        let obfuscation = protocols.insert(Protocol::new(Phase::Obfuscation));
        let shuffle = protocols.insert(Protocol::new(Phase::Shuffle));
        let key_switch = protocols.insert(Protocol::new(Phase::KeySwitch));
        Self {
            query,
            index,
            origin,
            protocols,
            collection,
            aggregation,
            obfuscation,
            shuffle,
            key_switch,
            inputs: Vec::new(),
            aggregate: None,
            noise: None,
            rerandomizers: Vec::new(),
            switching: None,
            contributions: BTreeMap::new(),
            aggregated: false,
            progress: 0,
            finished: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    pub fn protocol(&mut self, handle: Handle) -> Result<&mut Protocol, Error> {
        self.protocols
            .get_mut(handle)
            .ok_or_else(|| Error::Rejected("unknown protocol".into()))
    }

    /// Records the contribution of `from`, returning whether the protocol completed.
    ///
    /// Unexpected and duplicate contributions are dropped.
    pub fn accept(&mut self, handle: Handle, from: &str) -> Option<bool> {
        let survey_id = &self.query.survey_id;
        let protocol = self.protocols.get_mut(handle)?;
        match protocol.contribute(from) {
            Ok(complete) => {
                self.progress += 1;
                Some(complete)
            }
            Err(err) => {
                warn!(survey_id, phase = %protocol.phase, from, ?err, "dropping contribution");
                None
            }
        }
    }

    pub fn completed(&self, handle: Handle) -> bool {
        self.protocols
            .get(handle)
            .map_or(false, |protocol| protocol.status == Status::Completed)
    }

    /// Describes the first protocol that has not completed.
    pub fn failure(&self) -> Error {
        let survey_id = &self.query.survey_id;
        self.protocols
            .iter()
            .map(|(_, protocol)| protocol)
            .find(|protocol| protocol.status != Status::Completed && protocol.status != Status::Idle)
            .or_else(|| {
                self.protocols
                    .iter()
                    .map(|(_, protocol)| protocol)
                    .find(|protocol| protocol.status != Status::Completed)
            })
            .map(|protocol| protocol.failure(survey_id))
            .unwrap_or_else(|| Error::ProtocolTimeout {
                phase: Phase::KeySwitch,
                survey_id: survey_id.to_string(),
            })
    }

    /// Drops the vectors of a finished survey.
    pub fn finish(&mut self) {
        self.finished = true;
        self.inputs.clear();
        self.aggregate = None;
        self.noise = None;
        self.rerandomizers.clear();
        self.switching = None;
        self.contributions.clear();
    }
}
