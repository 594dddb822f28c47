//! Verifying nodes.
//!
//! # Overview
//!
//! Verifying nodes learn about a survey from the root computing node, which derives
//! the number of proofs of each kind they should expect. Every [ProofEnvelope]
//! received is checked against the identity of its sender, verified, recorded as a
//! [Verdict] in the local [Bitmap] of the survey and persisted under
//! `"{survey_id}/{kind}"`.
//!
//! Once every expected proof arrived (or the deadline passed), a node persists its
//! bitmap and sends it to the root verifying node (the first of the roster). The root
//! merges the bitmaps of every verifying node into a [Block] appended to the chain,
//! creating the genesis block first if the chain is empty, and answers queriers
//! waiting on `EndVerification`.
//!
//! The root only appends a block once a majority of the verifying nodes sent their
//! bitmap. Otherwise, waiting queriers receive a failure naming a missing node.
//! Surveys are dropped from memory once their block is appended (or their bitmap
//! forwarded), and late messages are answered from the store.
//!
//! Blocks and proofs can be queried over the network (`GetLatestBlock`,
//! `GetGenesis`, `GetBlock`, `GetProofs`) or locally through the [Mailbox].
//!
//! [ProofEnvelope]: crate::envelope::ProofEnvelope
//! [Verdict]: crate::chain::Verdict
//! [Bitmap]: crate::chain::Bitmap
//! [Block]: crate::chain::Block

mod engine;
pub use engine::Engine;
mod ingress;
pub use ingress::Mailbox;
mod metrics;

use std::time::Duration;

/// Configuration for the [Engine].
pub struct Config {
    /// Name of the node in the roster.
    pub name: String,

    /// Time to wait on the proofs of a survey, and at the root on the bitmaps of the
    /// other verifying nodes.
    pub timeout: Duration,

    /// Storage partition of proofs, bitmaps and blocks.
    pub partition: String,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,
}
