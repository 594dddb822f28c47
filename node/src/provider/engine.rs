use super::{metrics, Config, DataSource};
use crate::{
    envelope::{context, Proof, ProofEnvelope},
    overlay::{Receiver, Sender},
    query::{ProofMode, Query},
    wire::{Failure, Message},
    Error,
};
use commonware_runtime::{Handle, Metrics, Spawner};
use commonware_cryptography::ed25519::PrivateKey;
use drynx_cryptography::{range::RangeProof, CipherVector};
use drynx_encoding::{encode, Dataset, Operation};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

/// Answers surveys with the records of one data provider.
pub struct Engine<E: Spawner + Metrics + RngCore, S: DataSource> {
    context: E,
    rng: StdRng,

    name: String,
    identity: PrivateKey,
    source: S,

    metrics: metrics::Metrics,
}

impl<E: Spawner + Metrics + RngCore, S: DataSource> Engine<E, S> {
    pub fn new(mut context: E, cfg: Config<S>) -> Self {
        let metrics = metrics::Metrics::init(context.clone());
        let rng = StdRng::seed_from_u64(context.next_u64());
        Self {
            context,
            rng,
            name: cfg.name,
            identity: cfg.identity,
            source: cfg.source,
            metrics,
        }
    }

    /// Starts the engine with the given network.
    pub fn start(mut self, network: (Sender, Receiver)) -> Handle<()> {
        self.context.spawn_ref()(self.run(network))
    }

    async fn run(mut self, network: (Sender, Receiver)) {
        let (sender, mut receiver) = network;
        loop {
            let (from, message) = match receiver.recv().await {
                Ok(received) => received,
                Err(err) => {
                    debug!(?err, name = self.name, "receiver closed");
                    break;
                }
            };
            let Message::SurveyQueryToDP(query) = message else {
                warn!(from, name = self.name, "unexpected message");
                continue;
            };
            let survey_id = query.survey_id.clone();
            match self.answer(&sender, &from, &query) {
                Ok(vector) => {
                    info!(survey_id, name = self.name, slots = vector.len(), "answered survey");
                    self.metrics.answered.inc();
                    sender.send(&from, &Message::DataResponse { survey_id, vector });
                }
                Err(err) => {
                    error!(survey_id, name = self.name, ?err, "failed to answer survey");
                    self.metrics.failed.inc();
                    sender.send(
                        &from,
                        &Message::Failure {
                            survey_id,
                            failure: Failure::from_error(&err),
                        },
                    );
                }
            }
        }
    }

    /// Encodes the records of every group, emitting range proofs when requested.
    fn answer(&mut self, sender: &Sender, from: &str, query: &Query) -> Result<CipherVector, Error> {
        query.validate()?;
        let index = query
            .roster
            .computing_index(from)
            .ok_or_else(|| Error::Rejected(format!("{from} is not a computing node")))?;
        if !query.roster.providers[index]
            .iter()
            .any(|member| member.name == self.name)
        {
            return Err(Error::Rejected(format!("not a provider of {from}")));
        }

        let datasets = self.source.load(query)?;
        if datasets.len() != query.group_count() {
            return Err(Error::Config(format!(
                "expected {} datasets, got {}",
                query.group_count(),
                datasets.len()
            )));
        }
        let public = query.roster.collective_key()?;
        let proofs = query.range_proofs();

        let mut vector = Vec::with_capacity(query.vector_len());
        let mut witnesses = Vec::with_capacity(query.vector_len());
        for dataset in &datasets {
            let dataset = match (&query.operation, dataset) {
                (Operation::LogReg(_), dataset) if dataset.is_empty() => {
                    Dataset::Records(Vec::new())
                }
                (_, dataset) => dataset.clone(),
            };
            let encoded = encode(&mut self.rng, &query.operation, &dataset, &public, proofs)?;
            witnesses.extend(encoded.clear.into_iter().zip(encoded.nonces));
            vector.extend(encoded.ciphertexts);
        }
        if vector.len() != query.vector_len() {
            return Err(Error::Encoding(drynx_encoding::Error::SlotCount(
                query.vector_len(),
                vector.len(),
            )));
        }

        if proofs {
            self.prove_ranges(sender, query, &vector, &witnesses)?;
        }
        Ok(vector)
    }

    fn prove_ranges(
        &mut self,
        sender: &Sender,
        query: &Query,
        vector: &[drynx_cryptography::Ciphertext],
        witnesses: &[(i64, drynx_cryptography::Scalar)],
    ) -> Result<(), Error> {
        let Some(ranges) = &query.ranges else {
            return Ok(());
        };
        let public = query.roster.collective_key()?;
        let slots = query.slots();
        let seeds: Vec<u64> = (0..vector.len()).map(|_| self.rng.next_u64()).collect();

        // Each slot is proven against the signatures of every computing node
        let proofs = vector
            .par_iter()
            .zip(witnesses.par_iter())
            .zip(seeds.par_iter())
            .enumerate()
            .map(|(slot, ((ciphertext, (value, nonce)), seed))| {
                let mut rng = StdRng::seed_from_u64(*seed);
                let range = ranges[slot % slots];
                let differ_info = format!("{}/{}", slot / slots, slot % slots);
                let tag = context(&query.survey_id, &self.name, &differ_info);
                let column: Vec<_> = query
                    .signatures
                    .iter()
                    .map(|row| row[slot % slots].clone())
                    .collect();
                let proofs = match query.proofs {
                    ProofMode::Optimized => vec![RangeProof::prove_aggregated(
                        &mut rng,
                        &column,
                        range.u,
                        range.l,
                        *value,
                        nonce,
                        &public,
                        *ciphertext,
                        &tag,
                    )?],
                    _ => column
                        .iter()
                        .map(|published| {
                            RangeProof::prove(
                                &mut rng,
                                published,
                                range.u,
                                range.l,
                                *value,
                                nonce,
                                &public,
                                *ciphertext,
                                &tag,
                            )
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                };
                Ok::<_, Error>((differ_info, Proof::Range { slot, proofs }))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let verifiers: Vec<String> = query
            .roster
            .verifying
            .iter()
            .map(|member| member.name.clone())
            .collect();
        for (differ_info, proof) in proofs {
            let envelope = ProofEnvelope::sign(
                &self.identity,
                &query.survey_id,
                &self.name,
                &differ_info,
                &proof,
                verifiers.clone(),
            );
            let message = Message::Proof(envelope);
            for verifier in &verifiers {
                sender.send(verifier, &message);
            }
            self.metrics.proofs_emitted.inc();
        }
        debug!(
            survey_id = query.survey_id,
            name = self.name,
            slots = vector.len(),
            "emitted range proofs"
        );
        Ok(())
    }
}
