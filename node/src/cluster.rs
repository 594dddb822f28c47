//! In-process deployment of every role of a survey.
//!
//! A [Cluster] generates the keys of every node, starts the computing, data
//! provider and verifying engines on one runtime, connects them through an
//! [overlay](crate::overlay) [Network] and builds queries over the resulting
//! [Roster].

use crate::{
    computing,
    overlay::{Network, Oracle},
    provider::{self, DataSource},
    querier::{signatures, Directory, Querier},
    query::{DiffPrivacy, Member, ProofMode, Query, Roster, Thresholds, ValueRange},
    verifier::{self, Mailbox},
    Error,
};
use commonware_cryptography::{ed25519::PrivateKey, PrivateKeyExt as _, Signer as _};
use commonware_runtime::{Clock, Metrics, Network as RNetwork, Spawner, Storage};
use drynx_cryptography::{range::RangeSigner, Element, Keypair};
use drynx_encoding::Operation;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use std::time::Duration;
use tracing::info;

/// Shape of a cluster.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of computing nodes.
    pub computing: usize,
    /// Number of data providers attached to each computing node.
    pub providers: usize,
    /// Number of verifying nodes.
    pub verifying: usize,
    /// Range bases every computing node publishes signatures for.
    pub bases: Vec<u64>,
    /// Time computing nodes wait on a contribution.
    pub timeout: Duration,
    /// Time verifying nodes wait on proofs.
    pub verification_timeout: Duration,
    /// Prefix of the storage partition of every verifying node.
    pub partition: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            computing: 3,
            providers: 1,
            verifying: 0,
            bases: Vec::new(),
            timeout: Duration::from_secs(10),
            verification_timeout: Duration::from_secs(30),
            partition: "drynx".into(),
        }
    }
}

/// A running cluster.
pub struct Cluster<E: Spawner + Metrics> {
    network: Network<E>,
    roster: Roster,
    directories: Vec<Directory>,
    verifiers: Vec<Mailbox>,
    timeout: Duration,
}

impl<E: Clock + Spawner + Storage + Metrics + Rng + RNetwork> Cluster<E> {
    /// Starts every node of `cfg`, loading the data of provider `j` of computing
    /// node `i` from `source(i, j)`.
    pub async fn start<S, F>(context: &mut E, cfg: Config, mut source: F) -> Result<Self, Error>
    where
        S: DataSource,
        F: FnMut(usize, usize) -> S,
    {
        if cfg.computing == 0 {
            return Err(Error::Config("a cluster needs a computing node".into()));
        }
        let mut rng = StdRng::seed_from_u64(context.next_u64());
        let network = Network::new(context.with_label("network"));

        let mut roster = Roster {
            computing: Vec::with_capacity(cfg.computing),
            verifying: Vec::with_capacity(cfg.verifying),
            providers: Vec::with_capacity(cfg.computing),
        };
        let mut directories = Vec::with_capacity(cfg.computing);
        for i in 0..cfg.computing {
            let name = format!("cn{i}");
            let keypair = Keypair::generate(&mut rng);
            let identity = PrivateKey::from_rng(&mut rng);
            let link = network.register(&name, identity.public_key()).await?;
            let signers: Vec<RangeSigner> = cfg
                .bases
                .iter()
                .map(|u| RangeSigner::new(&mut rng, *u))
                .collect();
            directories.push(
                signers
                    .iter()
                    .zip(&cfg.bases)
                    .map(|(signer, u)| (*u, signer.published().clone()))
                    .collect(),
            );
            roster.computing.push(Member {
                name: name.clone(),
                identity: identity.public_key(),
                key: Some(keypair.public),
            });
            let engine = computing::Engine::new(
                context.with_label(&name),
                computing::Config {
                    name: name.clone(),
                    keypair,
                    identity,
                    signers,
                    timeout: cfg.timeout,
                },
            );
            engine.start(link);

            let mut providers = Vec::with_capacity(cfg.providers);
            for j in 0..cfg.providers {
                let name = format!("dp{}", i * cfg.providers + j);
                let identity = PrivateKey::from_rng(&mut rng);
                let link = network.register(&name, identity.public_key()).await?;
                providers.push(Member {
                    name: name.clone(),
                    identity: identity.public_key(),
                    key: None,
                });
                let engine = provider::Engine::new(
                    context.with_label(&name),
                    provider::Config {
                        name: name.clone(),
                        identity,
                        source: source(i, j),
                    },
                );
                engine.start(link);
            }
            roster.providers.push(providers);
        }

        let mut verifiers = Vec::with_capacity(cfg.verifying);
        for k in 0..cfg.verifying {
            let name = format!("vn{k}");
            let identity = PrivateKey::from_rng(&mut rng).public_key();
            let link = network.register(&name, identity.clone()).await?;
            roster.verifying.push(Member {
                name: name.clone(),
                identity,
                key: None,
            });
            let (engine, mailbox) = verifier::Engine::new(
                context.with_label(&name),
                verifier::Config {
                    name: name.clone(),
                    timeout: cfg.verification_timeout,
                    partition: format!("{}-{name}", cfg.partition),
                    mailbox_size: 1024,
                },
            )
            .await?;
            engine.start(link);
            verifiers.push(mailbox);
        }
        info!(
            computing = cfg.computing,
            providers = cfg.computing * cfg.providers,
            verifying = cfg.verifying,
            "started cluster"
        );

        // Queriers wait on every protocol of the deepest path
        let depth = usize::BITS - cfg.computing.leading_zeros();
        let timeout = cfg.timeout * (depth + 2) + cfg.verification_timeout;
        Ok(Self {
            network,
            roster,
            directories,
            verifiers,
            timeout,
        })
    }

    /// Controls the links of the cluster.
    pub fn oracle(&self) -> Oracle {
        self.network.oracle()
    }

    /// Connects a querier named `name` under a fresh overlay key.
    pub async fn querier<C: Clock + RngCore>(
        &self,
        mut context: C,
        name: &str,
    ) -> Result<Querier<C>, Error> {
        let key = PrivateKey::from_seed(context.next_u64()).public_key();
        let link = self.network.register(name, key).await?;
        Ok(Querier::new(context, link, self.timeout))
    }
}

impl<E: Spawner + Metrics> Cluster<E> {
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Local access to the chain of verifying node `index`.
    pub fn verifier(&self, index: usize) -> Option<Mailbox> {
        self.verifiers.get(index).cloned()
    }

    /// A query over the whole cluster, with proofs when the cluster has verifying
    /// nodes.
    pub fn query(&self, survey_id: &str, operation: Operation) -> Query {
        Query {
            survey_id: survey_id.to_string(),
            operation,
            ranges: None,
            signatures: Vec::new(),
            diff_p: DiffPrivacy::default(),
            obfuscation: false,
            cutting_factor: 0,
            proofs: if self.roster.verifying.is_empty() {
                ProofMode::None
            } else {
                ProofMode::Full
            },
            thresholds: Thresholds::default(),
            group_by: Vec::new(),
            roster: self.roster.clone(),
            client: drynx_cryptography::G1::zero(),
        }
    }

    /// Requests range proofs of `ranges` (one per slot) in `query`.
    pub fn with_ranges(&self, query: &mut Query, ranges: Vec<ValueRange>) -> Result<(), Error> {
        query.signatures = signatures(&ranges, &self.directories)?;
        query.ranges = Some(ranges);
        Ok(())
    }
}
