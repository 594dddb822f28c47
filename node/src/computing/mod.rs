//! Computing nodes.
//!
//! # Overview
//!
//! Computing nodes hold the shares of the collective key and run every protocol of a
//! survey. They are arranged in a binary tree rooted at the first computing node of
//! the roster (`cn_i` has children `cn_{2i+1}` and `cn_{2i+2}`) and in a ring
//! (`cn_i` forwards to `cn_{(i+1) % n}`).
//!
//! The root receives the query from a querier and announces it down the tree. Every
//! node then:
//!
//! 1. Forwards the query to its own data providers (collection).
//! 2. Sums the vectors of its providers and of its children and sends the sum to
//!    its parent (aggregation).
//!
//! At the root, the aggregate optionally travels around the ring so that every node
//! multiplies each slot by a random scalar (obfuscation). When differential privacy
//! is requested, the root also generates a list of noise values that travels around
//! the ring and is shuffled by every node, and adds one noise value drawn from the
//! shuffled list to every slot. Finally every node switches the vector from its
//! share to the key of the querier (key switching) and the root combines the
//! contributions and answers with one vector per group.
//!
//! Every step emits a signed proof to the verifying nodes when the survey requests
//! proofs.
//!
//! # Failures
//!
//! Each survey is watched by a deadline scaled with the height of the subtree of the
//! node, re-armed whenever a contribution arrives. A node that misses its deadline,
//! receives an invalid contribution or a failure from another node aborts the survey
//! and reports towards the root, which reports to the querier. Messages received for
//! a survey not yet announced are buffered, messages for a finished survey are
//! dropped.

mod engine;
pub use engine::Engine;
mod metrics;
mod state;

use commonware_cryptography::ed25519::PrivateKey;
use drynx_cryptography::{range::RangeSigner, Keypair};
use std::time::Duration;

/// Configuration for the [Engine].
pub struct Config {
    /// Name of the node in the roster.
    pub name: String,

    /// Share of the collective key.
    pub keypair: Keypair,

    /// Key signing proof envelopes.
    pub identity: PrivateKey,

    /// Signers whose signatures the node published, one per range base.
    pub signers: Vec<RangeSigner>,

    /// Time to wait on a contribution before aborting a survey.
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        overlay::{tests::join, Network, Receiver, Sender},
        query::{tests::sample, Query},
        wire::{Failure, Message, Phase},
    };
    use commonware_cryptography::PrivateKeyExt as _;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Clock, Metrics, Runner, Spawner};
    use drynx_cryptography::{
        elgamal::{decrypt, encrypt},
        DecryptionTable, Scalar,
    };
    use rand::{rngs::StdRng, SeedableRng};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Starts `n` computing nodes and returns the query they accept with the
    /// querier secret.
    async fn setup(
        context: &deterministic::Context,
        network: &Network<deterministic::Context>,
        n: usize,
    ) -> (Query, Scalar) {
        let mut rng = StdRng::seed_from_u64(7);
        let mut query = sample(n, 0);
        for i in 0..n {
            let keypair = Keypair::generate(&mut rng);
            query.roster.computing[i].key = Some(keypair.public);
            let name = format!("cn{i}");
            let engine = Engine::new(
                context.with_label(&name),
                Config {
                    name: name.clone(),
                    keypair,
                    identity: PrivateKey::from_rng(&mut rng),
                    signers: Vec::new(),
                    timeout: TIMEOUT,
                },
            );
            engine.start(join(network, &name).await);
        }
        let client = Keypair::generate(&mut rng);
        query.client = client.public;
        (query, client.secret)
    }

    /// Answers the next survey forwarded to a provider with `value`.
    async fn answer(
        (sender, mut receiver): (Sender, Receiver),
        collective: &drynx_cryptography::G1,
        value: i64,
    ) {
        let mut rng = StdRng::seed_from_u64(value as u64);
        let (from, message) = receiver.recv().await.unwrap();
        let Message::SurveyQueryToDP(query) = message else {
            panic!("expected query");
        };
        let ciphertext = encrypt(&mut rng, collective, value);
        sender.send(
            &from,
            &Message::DataResponse {
                survey_id: query.survey_id,
                vector: vec![ciphertext],
            },
        );
    }

    #[test_traced]
    fn test_sum() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (query, client) = setup(&context, &network, 3).await;
            let public = query.roster.collective_key().unwrap();
            for (i, value) in [4, 5, 6].into_iter().enumerate() {
                let link = join(&network, &format!("dp{i}")).await;
                context
                    .with_label("provider")
                    .spawn(move |_| async move { answer(link, &public, value).await });
            }

            let (querier, mut receiver) = join(&network, "querier").await;
            querier.send("cn0", &Message::SurveyQuery(query));
            let (from, message) = receiver.recv().await.unwrap();
            assert_eq!(from, "cn0");
            let Message::SurveyResponse { survey_id, vectors } = message else {
                panic!("expected response, got {message:?}");
            };
            assert_eq!(survey_id, "survey");
            assert_eq!(vectors.len(), 1);
            assert_eq!(vectors[0].0, "[]");
            let value = decrypt(DecryptionTable::shared(), &client, &vectors[0].1[0]).unwrap();
            assert_eq!(value, 15);
        });
    }

    #[test_traced]
    fn test_missing_provider() {
        let executor = deterministic::Runner::timed(Duration::from_secs(120));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (query, _) = setup(&context, &network, 3).await;
            let public = query.roster.collective_key().unwrap();

            // dp2 never answers
            for (i, value) in [4, 5].into_iter().enumerate() {
                let link = join(&network, &format!("dp{i}")).await;
                context
                    .with_label("provider")
                    .spawn(move |_| async move { answer(link, &public, value).await });
            }
            let _silent = join(&network, "dp2").await;

            let (querier, mut receiver) = join(&network, "querier").await;
            querier.send("cn0", &Message::SurveyQuery(query));
            let (_, message) = receiver.recv().await.unwrap();
            let Message::Failure { failure, .. } = message else {
                panic!("expected failure, got {message:?}");
            };
            assert_eq!(
                failure,
                Failure::Missing {
                    node: "dp2".into(),
                    phase: Phase::Collection
                }
            );
        });
    }

    #[test_traced]
    fn test_wrong_key() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (mut query, _) = setup(&context, &network, 1).await;
            query.roster.computing[0].key = sample(1, 0).roster.computing[0].key;

            let (querier, mut receiver) = join(&network, "querier").await;
            querier.send("cn0", &Message::SurveyQuery(query));
            let (_, message) = receiver.recv().await.unwrap();
            assert!(matches!(
                message,
                Message::Failure {
                    failure: Failure::Rejected(_),
                    ..
                }
            ));
        });
    }

    #[test_traced]
    fn test_early_data_is_buffered() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (query, client) = setup(&context, &network, 1).await;
            let public = query.roster.collective_key().unwrap();
            let (provider, _provider_receiver) = join(&network, "dp0").await;

            // The response reaches the node before the query
            let mut rng = StdRng::seed_from_u64(1);
            let ciphertext = encrypt(&mut rng, &public, 9);
            provider.send(
                "cn0",
                &Message::DataResponse {
                    survey_id: query.survey_id.clone(),
                    vector: vec![ciphertext],
                },
            );
            context.sleep(Duration::from_millis(100)).await;

            let (querier, mut receiver) = join(&network, "querier").await;
            querier.send("cn0", &Message::SurveyQuery(query));
            let (_, message) = receiver.recv().await.unwrap();
            let Message::SurveyResponse { vectors, .. } = message else {
                panic!("expected response, got {message:?}");
            };
            let value = decrypt(DecryptionTable::shared(), &client, &vectors[0].1[0]).unwrap();
            assert_eq!(value, 9);
        });
    }

    #[test_traced]
    fn test_failure_from_stranger_is_ignored() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (query, client) = setup(&context, &network, 2).await;
            let public = query.roster.collective_key().unwrap();
            let link = join(&network, "dp1").await;
            context
                .with_label("provider")
                .spawn(move |_| async move { answer(link, &public, 3).await });

            // dp0 answers only after a stranger tried to abort the survey
            let (provider, mut provider_receiver) = join(&network, "dp0").await;
            let (stranger, _stranger_receiver) = join(&network, "mallory").await;
            context.with_label("dp0").spawn(move |context| async move {
                let (from, message) = provider_receiver.recv().await.unwrap();
                let Message::SurveyQueryToDP(query) = message else {
                    panic!("expected query");
                };
                stranger.send(
                    &from,
                    &Message::Failure {
                        survey_id: query.survey_id.clone(),
                        failure: Failure::EncodingRange,
                    },
                );
                context.sleep(Duration::from_millis(100)).await;
                let mut rng = StdRng::seed_from_u64(2);
                provider.send(
                    &from,
                    &Message::DataResponse {
                        survey_id: query.survey_id,
                        vector: vec![encrypt(&mut rng, &public, 4)],
                    },
                );
            });

            let (querier, mut receiver) = join(&network, "querier").await;
            querier.send("cn0", &Message::SurveyQuery(query));
            let (_, message) = receiver.recv().await.unwrap();
            let Message::SurveyResponse { vectors, .. } = message else {
                panic!("expected response, got {message:?}");
            };
            let value = decrypt(DecryptionTable::shared(), &client, &vectors[0].1[0]).unwrap();
            assert_eq!(value, 7);
        });
    }

    #[test_traced]
    fn test_finished_surveys_are_pruned() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (query, _) = setup(&context, &network, 1).await;
            let public = query.roster.collective_key().unwrap();
            let (provider, mut provider_receiver) = join(&network, "dp0").await;

            let (querier, mut receiver) = join(&network, "querier").await;
            querier.send("cn0", &Message::SurveyQuery(query.clone()));
            let (from, _) = provider_receiver.recv().await.unwrap();
            assert!(context.encode().contains("cn0_tracked 1"));
            let mut rng = StdRng::seed_from_u64(3);
            let response = Message::DataResponse {
                survey_id: query.survey_id.clone(),
                vector: vec![encrypt(&mut rng, &public, 1)],
            };
            provider.send(&from, &response);
            let (_, message) = receiver.recv().await.unwrap();
            assert!(matches!(message, Message::SurveyResponse { .. }));
            assert!(context.encode().contains("cn0_tracked 0"));

            // Late data is dropped and the identifier cannot be reused
            provider.send(&from, &response);
            querier.send("cn0", &Message::SurveyQuery(query));
            let (_, message) = receiver.recv().await.unwrap();
            assert!(matches!(
                message,
                Message::Failure {
                    failure: Failure::Rejected(_),
                    ..
                }
            ));
            assert!(context.encode().contains("cn0_tracked 0"));
        });
    }
}
