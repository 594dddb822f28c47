//! Client submitting surveys and checking their verification.
//!
//! A [Querier] holds the key its results are switched to. It gathers the range
//! signatures published by the computing nodes, submits a [Query] to the root
//! computing node, decrypts and decodes the vector of every group and, when proofs
//! are enabled, waits on the block of the survey and evaluates the thresholds of the
//! query against its bitmap.

use crate::{
    chain::{Bitmap, Block, Verdict},
    envelope::{kind_of, ProofKind},
    overlay::{Receiver, Sender},
    query::{Query, ValueRange},
    wire::{Message, Phase},
    Error,
};
use commonware_macros::select;
use commonware_runtime::Clock;
use drynx_cryptography::{range::PublishedSignatures, DecryptionTable, Element, Keypair, G1};
use drynx_encoding::{decode, Output};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Signatures published by one computing node, per range base.
pub type Directory = HashMap<u64, PublishedSignatures>;

/// Result of a survey.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    /// Decoded result of every group, keyed as in [Query::groups].
    pub groups: Vec<(String, Output)>,
    /// Block recording the verdicts on the proofs of the survey.
    pub block: Option<Block>,
}

impl Outcome {
    /// Result of the survey when it is not grouped.
    pub fn output(&self) -> Option<&Output> {
        self.groups.first().map(|(_, output)| output)
    }
}

/// Builds the signature matrix of a query: one row per computing node, one column
/// per slot.
///
/// Slots without range check carry empty signatures.
pub fn signatures(
    ranges: &[ValueRange],
    directories: &[Directory],
) -> Result<Vec<Vec<PublishedSignatures>>, Error> {
    directories
        .iter()
        .enumerate()
        .map(|(index, directory)| {
            ranges
                .iter()
                .map(|range| {
                    if range.is_vacuous() {
                        return Ok(PublishedSignatures {
                            public: G1::zero(),
                            signatures: Vec::new(),
                        });
                    }
                    directory.get(&range.u).cloned().ok_or_else(|| {
                        Error::Config(format!(
                            "computing node {index} published no signatures for base {}",
                            range.u
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// Checks that the fraction of accepted verdicts of every kind reaches the threshold
/// of `query`.
///
/// Every verifying node owes a verdict on every proof the query expects, so verdicts
/// missing from `bitmap` count as not accepted.
pub fn evaluate(query: &Query, bitmap: &Bitmap) -> Result<(), Error> {
    let survey_id = query.survey_id.as_str();
    let mut accepted: BTreeMap<ProofKind, usize> = BTreeMap::new();
    for (identifier, verdict) in bitmap.iter() {
        if *verdict != Verdict::Accepted {
            continue;
        }
        if let Some(kind) = kind_of(identifier, survey_id) {
            *accepted.entry(kind).or_default() += 1;
        }
    }
    let expected = query.expected_proofs();
    let verifiers = query.roster.verifying.len();
    for kind in ProofKind::ALL {
        let total = expected.get(kind) * verifiers;
        if total == 0 {
            continue;
        }
        let accepted = accepted.get(&kind).copied().unwrap_or(0).min(total);
        if (accepted as f64) / (total as f64) < query.thresholds.get(kind) {
            warn!(survey_id, %kind, accepted, total, "insufficient proofs");
            return Err(Error::InsufficientProofs { kind });
        }
    }
    Ok(())
}

/// Submits surveys and decodes their results.
pub struct Querier<E: Clock> {
    context: E,
    keypair: Keypair,
    timeout: Duration,
    sender: Sender,
    receiver: Receiver,
}

impl<E: Clock + RngCore> Querier<E> {
    /// Creates a querier with a fresh key, waiting `timeout` on every answer.
    pub fn new(mut context: E, network: (Sender, Receiver), timeout: Duration) -> Self {
        let mut rng = StdRng::seed_from_u64(context.next_u64());
        let (sender, receiver) = network;
        Self {
            context,
            keypair: Keypair::generate(&mut rng),
            timeout,
            sender,
            receiver,
        }
    }

    /// Key the results are switched to.
    pub fn public(&self) -> G1 {
        self.keypair.public
    }

    /// Runs `query` and returns its decoded result.
    pub async fn execute(&mut self, mut query: Query) -> Result<Outcome, Error> {
        query.client = self.keypair.public;
        query.validate()?;
        let survey_id = query.survey_id.clone();
        let root = query
            .roster
            .computing
            .first()
            .map(|member| member.name.clone())
            .ok_or_else(|| Error::Config("no computing node".into()))?;

        info!(survey_id, operation = query.operation.name(), root, "submitting survey");
        self.sender.send(&root, &Message::SurveyQuery(query.clone()));
        let vectors = self
            .wait(&survey_id, &root, Phase::KeySwitch, |message| match message {
                Message::SurveyResponse { vectors, .. } => Some(Ok(vectors)),
                Message::Failure { failure, survey_id } => Some(Err(failure.into_error(&survey_id))),
                _ => None,
            })
            .await?;

        let groups = query.groups();
        if vectors.len() != groups.len() {
            return Err(Error::Rejected(format!(
                "expected {} groups, got {}",
                groups.len(),
                vectors.len()
            )));
        }
        let table = DecryptionTable::shared();
        let groups = vectors
            .into_iter()
            .map(|(group, vector)| {
                let output = decode(&query.operation, table, &self.keypair.secret, &vector)?;
                Ok((group, output))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        debug!(survey_id, groups = groups.len(), "decoded result");

        if !query.proofs.enabled() {
            return Ok(Outcome {
                groups,
                block: None,
            });
        }
        let block = self.end_verification(&query).await?;
        evaluate(&query, &block.bitmap)?;
        info!(survey_id, verdicts = block.bitmap.len(), "survey verified");
        Ok(Outcome {
            groups,
            block: Some(block),
        })
    }

    /// Waits on the block recording the verdicts of `query`.
    pub async fn end_verification(&mut self, query: &Query) -> Result<Block, Error> {
        let survey_id = query.survey_id.clone();
        let root = query
            .roster
            .verifying
            .first()
            .map(|member| member.name.clone())
            .ok_or_else(|| Error::Config("no verifying node".into()))?;
        self.sender.send(
            &root,
            &Message::EndVerification {
                survey_id: survey_id.clone(),
            },
        );
        self.wait(&survey_id, &root, Phase::Verification, |message| match message {
            Message::BlockReply(Some(block)) => Some(Ok(block)),
            Message::BlockReply(None) => Some(Err(Error::UnknownSurvey(String::new()))),
            Message::Failure { failure, survey_id } => Some(Err(failure.into_error(&survey_id))),
            _ => None,
        })
        .await
    }

    /// Waits on the first message of `expected` that `accept` maps to a result,
    /// dropping the others.
    async fn wait<T>(
        &mut self,
        survey_id: &str,
        expected: &str,
        phase: Phase,
        accept: impl Fn(Message) -> Option<Result<T, Error>>,
    ) -> Result<T, Error> {
        let deadline = self.context.current() + self.timeout;
        loop {
            let remaining = deadline
                .duration_since(self.context.current())
                .unwrap_or_default();
            if remaining.is_zero() {
                return Err(timeout(survey_id, phase));
            }
            select! {
                _ = self.context.sleep(remaining) => {
                    return Err(timeout(survey_id, phase));
                },
                received = self.receiver.recv() => {
                    let (from, message) = received?;
                    if from != expected {
                        debug!(survey_id, from, expected, "dropping message of another node");
                        continue;
                    }
                    if message.survey_id().is_some_and(|id| id != survey_id) {
                        debug!(survey_id, from, "dropping answer of another survey");
                        continue;
                    }
                    match accept(message) {
                        Some(Err(Error::UnknownSurvey(_))) => {
                            return Err(Error::UnknownSurvey(survey_id.to_string()));
                        }
                        Some(result) => return result,
                        None => debug!(survey_id, from, "dropping unexpected message"),
                    }
                },
            }
        }
    }
}

fn timeout(survey_id: &str, phase: Phase) -> Error {
    Error::ProtocolTimeout {
        phase,
        survey_id: survey_id.to_string(),
    }
}
