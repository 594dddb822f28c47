//! Run verifiable privacy-preserving statistical surveys across computing, data
//! provider, and verifying nodes.
//!
//! A querier submits a [query::Query] to the root of a tree of [computing] nodes.
//! Each computing node collects the encrypted contributions of its [provider]s,
//! sums them with those of its children, and the root switches the aggregate to the
//! key of the querier (after optional obfuscation and differential-privacy noise).
//! Every step produces a proof that the [verifier] nodes check and record in a
//! hash-chained log of [chain::Block]s, which the [querier] evaluates against the
//! thresholds of its query.
//!
//! Nodes exchange [wire::Message]s over an in-process [overlay] and can be deployed
//! together with [cluster::Cluster].
//!
//! # Status
//!
//! `drynx-node` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod chain;
pub mod cluster;
pub mod computing;
pub mod config;
pub mod envelope;
mod error;
pub use error::Error;
pub mod overlay;
pub mod provider;
pub mod querier;
pub mod query;
pub mod store;
pub mod survey;
pub mod verifier;
pub mod wire;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::Verdict,
        envelope::ProofKind,
        cluster::{Cluster, Config},
        provider::Fixed,
        query::{DiffPrivacy, ProofMode, Thresholds, ValueRange},
        wire::Phase,
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Metrics, Runner};
    use drynx_encoding::{Dataset, Operation, Output};
    use std::time::Duration;

    fn columns(values: &[&[i64]]) -> Vec<Fixed> {
        values
            .iter()
            .map(|column| Fixed::single(Dataset::Columns(vec![column.to_vec()])))
            .collect()
    }

    async fn start(
        context: &mut deterministic::Context,
        cfg: Config,
        sources: Vec<Fixed>,
    ) -> Cluster<deterministic::Context> {
        let providers = cfg.providers;
        Cluster::start(context, cfg, |i, j| sources[i * providers + j].clone())
            .await
            .unwrap()
    }

    #[test_traced]
    fn test_sum_with_range_proofs() {
        let executor = deterministic::Runner::timed(Duration::from_secs(600));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 3,
                providers: 1,
                verifying: 3,
                bases: vec![16],
                ..Config::default()
            };
            let sources = columns(&[&[10, 20], &[30], &[40, 50]]);
            let cluster = start(&mut context, cfg, sources).await;

            let mut query = cluster.query("sum", Operation::Sum);
            query.thresholds = Thresholds::all();
            cluster
                .with_ranges(&mut query, vec![ValueRange::new(16, 2)])
                .unwrap();
            let expected = query.expected_proofs();
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let outcome = querier.execute(query).await.unwrap();
            assert_eq!(outcome.output(), Some(&Output::Integer(150)));

            // Every verifying node accepted every proof
            let block = outcome.block.unwrap();
            assert_eq!(block.bitmap.len(), expected.total() * 3);
            assert!(block
                .bitmap
                .iter()
                .all(|(_, verdict)| *verdict == Verdict::Accepted));

            // The chain holds the genesis block followed by the block of the survey
            let mut root = cluster.verifier(0).unwrap();
            let genesis = root.genesis().await.unwrap().unwrap();
            assert!(genesis.is_genesis());
            assert_eq!(block.previous, genesis.hash());
            assert_eq!(root.latest().await.unwrap(), Some(block.clone()));
            assert_eq!(root.block("sum").await.unwrap(), Some(block));
        });
    }

    #[test_traced]
    fn test_optimized_range_proofs() {
        let executor = deterministic::Runner::timed(Duration::from_secs(600));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 2,
                providers: 2,
                verifying: 1,
                bases: vec![4],
                ..Config::default()
            };
            let sources = columns(&[&[1, 2], &[3], &[4], &[0]]);
            let cluster = start(&mut context, cfg, sources).await;

            let mut query = cluster.query("mean", Operation::Mean);
            query.proofs = ProofMode::Optimized;
            query.thresholds = Thresholds::all();
            cluster
                .with_ranges(&mut query, vec![ValueRange::new(4, 2), ValueRange::new(4, 1)])
                .unwrap();
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let outcome = querier.execute(query).await.unwrap();
            assert_eq!(outcome.output(), Some(&Output::Float(2.0)));
            assert!(outcome
                .block
                .unwrap()
                .bitmap
                .iter()
                .all(|(_, verdict)| *verdict == Verdict::Accepted));
        });
    }

    #[test_traced]
    fn test_obfuscated_min() {
        let executor = deterministic::Runner::timed(Duration::from_secs(120));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 3,
                providers: 1,
                ..Config::default()
            };
            let sources = columns(&[&[7, 9], &[4], &[6, 5]]);
            let cluster = start(&mut context, cfg, sources).await;

            let mut query = cluster.query("min", Operation::Min { min: 0, max: 10 });
            query.obfuscation = true;
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let outcome = querier.execute(query).await.unwrap();
            assert_eq!(outcome.output(), Some(&Output::Integer(4)));
            assert_eq!(outcome.block, None);
        });
    }

    #[test_traced]
    fn test_noise() {
        let executor = deterministic::Runner::timed(Duration::from_secs(300));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 3,
                providers: 1,
                verifying: 1,
                ..Config::default()
            };
            let sources = columns(&[&[1], &[2], &[3]]);
            let cluster = start(&mut context, cfg, sources).await;

            // A quantum of a tenth of the density at zero fills the list with zeros
            let mut query = cluster.query("noise", Operation::Sum);
            query.diff_p = DiffPrivacy {
                lap_mean: 0.0,
                lap_scale: 1.0,
                noise_list_size: 8,
                quanta: 0.05,
                scale: 1.0,
                limit: 0.0,
            };
            query.thresholds = Thresholds::all();
            let expected = query.expected_proofs();
            assert_eq!(expected.shuffle, 3);
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let outcome = querier.execute(query).await.unwrap();
            assert_eq!(outcome.output(), Some(&Output::Integer(6)));
            assert_eq!(outcome.block.unwrap().bitmap.len(), expected.total());
        });
    }

    #[test_traced]
    fn test_grouped_frequency() {
        let executor = deterministic::Runner::timed(Duration::from_secs(120));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 2,
                providers: 1,
                ..Config::default()
            };
            let sources = vec![
                Fixed::new()
                    .with_group("[0]", Dataset::Columns(vec![vec![0, 1]]))
                    .with_group("[1]", Dataset::Columns(vec![vec![2]])),
                Fixed::new().with_group("[1]", Dataset::Columns(vec![vec![2, 2]])),
            ];
            let cluster = start(&mut context, cfg, sources).await;

            let mut query = cluster.query("grouped", Operation::FrequencyCount { min: 0, max: 2 });
            query.group_by = vec![2];
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let outcome = querier.execute(query).await.unwrap();
            assert_eq!(
                outcome.groups,
                vec![
                    ("[0]".to_string(), Output::Histogram(vec![1, 1, 0])),
                    ("[1]".to_string(), Output::Histogram(vec![0, 0, 3])),
                ]
            );
        });
    }

    #[test_traced]
    fn test_blocked_provider() {
        let executor = deterministic::Runner::timed(Duration::from_secs(300));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 3,
                providers: 1,
                timeout: Duration::from_secs(5),
                ..Config::default()
            };
            let sources = columns(&[&[1], &[2], &[3]]);
            let cluster = start(&mut context, cfg, sources).await;
            cluster.oracle().block("dp2", "cn2").await;

            let query = cluster.query("blocked", Operation::Sum);
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let err = querier.execute(query).await.unwrap_err();
            assert_eq!(
                err,
                Error::MissingContribution {
                    node_id: "dp2".into(),
                    phase: Phase::Collection
                }
            );
        });
    }

    #[test_traced]
    fn test_isolated_verifier_fails_thresholds() {
        let executor = deterministic::Runner::timed(Duration::from_secs(600));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 3,
                providers: 1,
                verifying: 3,
                bases: vec![16],
                verification_timeout: Duration::from_secs(10),
                ..Config::default()
            };
            let sources = columns(&[&[1], &[2], &[3]]);
            let cluster = start(&mut context, cfg, sources).await;

            // vn0 and vn1 still form a quorum but a third of the verdicts is missing
            cluster.oracle().isolate("vn2").await;
            let mut query = cluster.query("isolated", Operation::Sum);
            query.thresholds = Thresholds::all();
            cluster
                .with_ranges(&mut query, vec![ValueRange::new(16, 2)])
                .unwrap();
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let err = querier.execute(query).await.unwrap_err();
            assert_eq!(
                err,
                Error::InsufficientProofs {
                    kind: ProofKind::Range
                }
            );

            // The block of the survey was still appended
            let mut root = cluster.verifier(0).unwrap();
            let block = root.block("isolated").await.unwrap().unwrap();
            assert!(block.bitmap.iter().all(|(identifier, _)| !identifier.ends_with("/vn2")));
        });
    }

    #[test_traced]
    fn test_value_out_of_range() {
        let executor = deterministic::Runner::timed(Duration::from_secs(300));
        executor.start(|mut context| async move {
            let cfg = Config {
                computing: 1,
                providers: 1,
                verifying: 1,
                bases: vec![2],
                ..Config::default()
            };
            let sources = columns(&[&[9]]);
            let cluster = start(&mut context, cfg, sources).await;

            // 9 does not fit in [0, 2^3)
            let mut query = cluster.query("range", Operation::Sum);
            cluster
                .with_ranges(&mut query, vec![ValueRange::new(2, 3)])
                .unwrap();
            let mut querier = cluster
                .querier(context.with_label("querier"), "querier")
                .await
                .unwrap();
            let err = querier.execute(query).await.unwrap_err();
            assert!(matches!(err, Error::Rejected(_)), "unexpected error {err:?}");
        });
    }
}
