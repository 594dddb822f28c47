//! In-flight survey bookkeeping.
//!
//! A node keeps every survey it takes part in within [Surveys], a map that hands out
//! one lock per survey so that tasks working on different surveys never contend.
//! The state of a survey owns its protocol instances in an [Arena] and refers to them
//! through [Handle]s. Phases wait on a [Barrier] that completes once every expected
//! participant contributed.

use crate::{wire::Phase, Error};
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

/// Surveys known to a node, keyed by survey identifier.
pub struct Surveys<S> {
    entries: Mutex<HashMap<String, Arc<Mutex<S>>>>,
}

impl<S> Default for Surveys<S> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> Surveys<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the state of a new survey, failing if `survey_id` is already known.
    pub fn insert(&self, survey_id: &str, state: S) -> Result<Arc<Mutex<S>>, Error> {
        let mut entries = self.lock()?;
        if entries.contains_key(survey_id) {
            return Err(Error::Rejected(format!("survey {survey_id} already exists")));
        }
        let entry = Arc::new(Mutex::new(state));
        entries.insert(survey_id.to_string(), entry.clone());
        Ok(entry)
    }

    pub fn get(&self, survey_id: &str) -> Result<Arc<Mutex<S>>, Error> {
        self.lock()?
            .get(survey_id)
            .cloned()
            .ok_or_else(|| Error::UnknownSurvey(survey_id.to_string()))
    }

    pub fn contains(&self, survey_id: &str) -> bool {
        self.lock().map_or(false, |entries| entries.contains_key(survey_id))
    }

    /// Removes every survey whose state satisfies `done`, returning their
    /// identifiers.
    pub fn prune(&self, done: impl Fn(&S) -> bool) -> Vec<String> {
        let Ok(mut entries) = self.lock() else {
            return Vec::new();
        };
        let pruned: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.lock().map_or(true, |state| done(&state)))
            .map(|(survey_id, _)| survey_id.clone())
            .collect();
        for survey_id in &pruned {
            entries.remove(survey_id);
        }
        pruned
    }

    pub fn remove(&self, survey_id: &str) -> Option<Arc<Mutex<S>>> {
        self.lock().ok()?.remove(survey_id)
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<S>>>>, Error> {
        self.entries
            .lock()
            .map_err(|_| Error::StorageFailure("survey map poisoned".into()))
    }
}

/// Locks the state of one survey.
pub fn lock<S>(entry: &Mutex<S>) -> Result<std::sync::MutexGuard<'_, S>, Error> {
    entry
        .lock()
        .map_err(|_| Error::StorageFailure("survey state poisoned".into()))
}

/// Stable index of a protocol instance in an [Arena].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(usize);

/// Owner of the protocol instances of a survey.
#[derive(Debug)]
pub struct Arena<P> {
    items: Vec<P>,
}

impl<P> Default for Arena<P> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<P> Arena<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: P) -> Handle {
        self.items.push(item);
        Handle(self.items.len() - 1)
    }

    pub fn get(&self, handle: Handle) -> Option<&P> {
        self.items.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut P> {
        self.items.get_mut(handle.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &P)> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| (Handle(index), item))
    }
}

/// Progress of a protocol instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    /// The instance knows its participants and waits for them.
    Announced,
    /// At least one participant contributed.
    Contributing,
    Completed,
}

/// Waits for one contribution of every expected participant.
#[derive(Clone, Debug)]
pub struct Barrier {
    expected: BTreeSet<String>,
    arrived: BTreeSet<String>,
}

impl Barrier {
    pub fn new<I, T>(expected: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
            arrived: BTreeSet::new(),
        }
    }

    /// Records the contribution of `participant`, returning whether the barrier is
    /// now complete.
    pub fn arrive(&mut self, participant: &str) -> Result<bool, Error> {
        if !self.expected.contains(participant) {
            return Err(Error::Rejected(format!("unexpected contribution of {participant}")));
        }
        if !self.arrived.insert(participant.to_string()) {
            return Err(Error::Rejected(format!("duplicate contribution of {participant}")));
        }
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.arrived.len() == self.expected.len()
    }

    /// Participants that did not contribute yet.
    pub fn missing(&self) -> Vec<String> {
        self.expected.difference(&self.arrived).cloned().collect()
    }

    pub fn arrived(&self) -> usize {
        self.arrived.len()
    }
}

/// A protocol instance of a survey: one phase, waiting on its participants.
#[derive(Clone, Debug)]
pub struct Protocol {
    pub phase: Phase,
    pub status: Status,
    pub barrier: Barrier,
}

impl Protocol {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            status: Status::Idle,
            barrier: Barrier::new(Vec::<String>::new()),
        }
    }

    /// Moves to [Status::Announced], waiting on `participants`.
    pub fn announce<I, T>(&mut self, participants: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.barrier = Barrier::new(participants);
        self.status = if self.barrier.is_complete() {
            Status::Completed
        } else {
            Status::Announced
        };
    }

    /// Records a contribution, returning whether the protocol completed.
    pub fn contribute(&mut self, participant: &str) -> Result<bool, Error> {
        if matches!(self.status, Status::Idle | Status::Completed) {
            return Err(Error::Rejected(format!(
                "{} is not expecting contributions",
                self.phase
            )));
        }
        let complete = self.barrier.arrive(participant)?;
        self.status = if complete {
            Status::Completed
        } else {
            Status::Contributing
        };
        Ok(complete)
    }

    /// Moves to [Status::Completed] without participants.
    pub fn complete(&mut self) {
        self.status = Status::Completed;
    }

    /// Describes why the protocol has not completed by its deadline.
    pub fn failure(&self, survey_id: &str) -> Error {
        match self.barrier.missing().into_iter().next() {
            Some(node_id) if self.status != Status::Idle => Error::MissingContribution {
                node_id,
                phase: self.phase,
            },
            _ => Error::ProtocolTimeout {
                phase: self.phase,
                survey_id: survey_id.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier() {
        let mut barrier = Barrier::new(["dp0", "dp1"]);
        assert!(!barrier.arrive("dp1").unwrap());
        assert!(barrier.arrive("dp1").is_err());
        assert!(barrier.arrive("dp7").is_err());
        assert_eq!(barrier.missing(), vec!["dp0".to_string()]);
        assert!(barrier.arrive("dp0").unwrap());
        assert!(barrier.is_complete());
    }

    #[test]
    fn test_protocol_failure() {
        let mut protocol = Protocol::new(Phase::Collection);
        assert_eq!(
            protocol.failure("s"),
            Error::ProtocolTimeout {
                phase: Phase::Collection,
                survey_id: "s".into()
            }
        );
        assert!(protocol.contribute("dp0").is_err());

        protocol.announce(["dp0", "dp1"]);
        assert!(!protocol.contribute("dp0").unwrap());
        assert_eq!(protocol.status, Status::Contributing);
        assert_eq!(
            protocol.failure("s"),
            Error::MissingContribution {
                node_id: "dp1".into(),
                phase: Phase::Collection
            }
        );
        assert!(protocol.contribute("dp1").unwrap());
        assert_eq!(protocol.status, Status::Completed);

        let mut empty = Protocol::new(Phase::Aggregation);
        empty.announce(Vec::<String>::new());
        assert_eq!(empty.status, Status::Completed);
    }

    #[test]
    fn test_arena_and_surveys() {
        let mut arena = Arena::new();
        let first = arena.insert(Protocol::new(Phase::Aggregation));
        let second = arena.insert(Protocol::new(Phase::KeySwitch));
        assert_ne!(first, second);
        arena.get_mut(second).unwrap().complete();
        assert_eq!(arena.get(second).unwrap().status, Status::Completed);
        assert_eq!(arena.iter().count(), 2);

        let surveys = Surveys::new();
        surveys.insert("s", 1u32).unwrap();
        assert!(surveys.insert("s", 2u32).is_err());
        *lock(&surveys.get("s").unwrap()).unwrap() += 1;
        assert_eq!(*lock(&surveys.get("s").unwrap()).unwrap(), 2);
        assert_eq!(surveys.get("t").unwrap_err(), Error::UnknownSurvey("t".into()));
        assert!(surveys.remove("s").is_some());
        assert!(surveys.is_empty());

        surveys.insert("a", 1u32).unwrap();
        surveys.insert("b", 2u32).unwrap();
        assert_eq!(surveys.prune(|state| *state == 2), vec!["b".to_string()]);
        assert!(surveys.contains("a"));
        assert!(!surveys.contains("b"));
        assert!(surveys.prune(|_| false).is_empty());
    }
}
