//! Data providers.
//!
//! # Overview
//!
//! A data provider holds raw records and never reveals them. When its computing node
//! forwards a survey, the [Engine] loads one [Dataset](drynx_encoding::Dataset) per
//! group through its [DataSource], encodes and encrypts each group under the
//! collective key, and returns the concatenated vector in a `DataResponse`.
//!
//! When the survey requests range proofs, the provider also proves every slot
//! against the signatures of every computing node (one proof per computing node, or
//! one aggregated proof) and sends each proof, signed, to every verifying node.
//!
//! Any failure (an unknown sender, a value outside of its range, an invalid query)
//! is reported to the computing node instead of the response.

mod engine;
pub use engine::Engine;
mod metrics;
mod source;
pub use source::{DataSource, Fixed, Generated};

use commonware_cryptography::ed25519::PrivateKey;

/// Configuration for the [Engine].
pub struct Config<S: DataSource> {
    /// Name of the provider in the roster.
    pub name: String,

    /// Key signing proof envelopes.
    pub identity: PrivateKey,

    pub source: S,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        envelope::ProofKind,
        overlay::{tests::join, Network},
        query::{tests::sample, Query, ValueRange},
        wire::{Failure, Message},
    };
    use commonware_cryptography::PrivateKeyExt as _;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Metrics, Runner};
    use drynx_cryptography::{
        elgamal::decrypt, range::RangeSigner, DecryptionTable, Keypair, Scalar,
    };
    use drynx_encoding::Dataset;
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::Duration;

    /// A query over one computing node whose secret is returned.
    fn query(ranges: Option<ValueRange>) -> (Query, Scalar) {
        let mut rng = StdRng::seed_from_u64(3);
        let keypair = Keypair::generate(&mut rng);
        let mut query = sample(1, 1);
        query.roster.computing[0].key = Some(keypair.public);
        if let Some(range) = ranges {
            query.ranges = Some(vec![range]);
            query.signatures = vec![vec![RangeSigner::new(&mut rng, range.u)
                .published()
                .clone()]];
        }
        (query, keypair.secret)
    }

    async fn provider(context: &deterministic::Context, network: &Network<deterministic::Context>) {
        let engine = Engine::new(
            context.with_label("dp0"),
            Config {
                name: "dp0".into(),
                identity: PrivateKey::from_rng(&mut StdRng::seed_from_u64(4)),
                source: Fixed::single(Dataset::Columns(vec![vec![2, 3, 5]])),
            },
        );
        engine.start(join(network, "dp0").await);
    }

    #[test_traced]
    fn test_answer() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            provider(&context, &network).await;
            let (cn, mut cn_receiver) = join(&network, "cn0").await;
            let (_, mut vn_receiver) = join(&network, "vn0").await;

            let (query, secret) = query(Some(ValueRange::new(16, 2)));
            assert!(cn.send("dp0", &Message::SurveyQueryToDP(query.clone())));

            // The verifying node receives one range proof per slot
            let (from, message) = vn_receiver.recv().await.unwrap();
            assert_eq!(from, "dp0");
            let Message::Proof(envelope) = message else {
                panic!("expected proof");
            };
            assert_eq!(envelope.kind, ProofKind::Range);
            assert_eq!(envelope.differ_info, "0/0");
            envelope
                .proof()
                .unwrap()
                .verify(&query, "dp0", &envelope.differ_info)
                .unwrap();

            let (_, message) = cn_receiver.recv().await.unwrap();
            let Message::DataResponse { survey_id, vector } = message else {
                panic!("expected data response");
            };
            assert_eq!(survey_id, "survey");
            assert_eq!(vector.len(), 1);
            let value = decrypt(DecryptionTable::shared(), &secret, &vector[0]).unwrap();
            assert_eq!(value, 10);
        });
    }

    #[test_traced]
    fn test_out_of_range() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            provider(&context, &network).await;
            let (cn, mut cn_receiver) = join(&network, "cn0").await;
            let (_, _vn_receiver) = join(&network, "vn0").await;

            // The sum (10) does not fit in [0, 2^3)
            let (query, _) = query(Some(ValueRange::new(2, 3)));
            cn.send("dp0", &Message::SurveyQueryToDP(query));
            let (_, message) = cn_receiver.recv().await.unwrap();
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
    fn test_unknown_computing_node() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            provider(&context, &network).await;
            let (stranger, mut receiver) = join(&network, "stranger").await;

            let (query, _) = query(None);
            stranger.send("dp0", &Message::SurveyQueryToDP(query));
            let (_, message) = receiver.recv().await.unwrap();
            assert!(matches!(message, Message::Failure { .. }));
        });
    }
}
