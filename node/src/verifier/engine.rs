use super::{ingress, metrics, Config, Mailbox};
use crate::{
    chain::{Bitmap, Block, Verdict},
    envelope::{bucket, ProofEnvelope, ProofKind},
    overlay::{Receiver, Sender},
    query::{ProofCounts, Query},
    store::{self, Store},
    wire::{Failure, Message, Phase, Record},
    Error,
};
use commonware_codec::{DecodeExt, Encode};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner, Storage};
use commonware_utils::hex;
use futures::{channel::mpsc, StreamExt};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info, trace, warn};

/// Maximum number of messages buffered for a survey not yet announced.
const MAX_PENDING: usize = 1 << 16;

/// Number of finished surveys remembered to answer late messages.
const MAX_FINISHED: usize = 1024;

/// How long to sleep when no survey has a deadline.
const IDLE: Duration = Duration::from_secs(3600);

const GENESIS: &str = "genesis";
const BLOCKS: &str = "blocks";
const MAPPING: &str = "mapping";
const CHAIN: &str = "chain";
const LATEST: &str = "latest";

/// Verification state of one survey.
struct Verification {
    query: Query,
    /// Proofs still expected, per kind.
    remaining: ProofCounts,
    bitmap: Bitmap,
    /// Whether the local bitmap was sent to the root.
    forwarded: bool,
    /// When to stop waiting on proofs (or, at the root, on bitmaps).
    deadline: Option<SystemTime>,

    /// Bitmaps received from verifying nodes (root only).
    bitmaps: BTreeMap<String, Bitmap>,
    /// Queriers waiting on the block.
    waiters: Vec<String>,
}

/// Verifies proofs and maintains the verdict log.
pub struct Engine<E: Clock + Spawner + Storage + Metrics> {
    context: E,
    name: String,
    timeout: Duration,
    store: Store<E>,

    mailbox_receiver: mpsc::Receiver<ingress::Message>,

    surveys: HashMap<String, Verification>,
    /// Surveys no longer tracked, with the failure answered to queriers if no
    /// block was appended.
    finished: HashMap<String, Option<Failure>>,
    finished_order: VecDeque<String>,
    /// Messages received before the survey they belong to.
    pending: HashMap<String, Vec<(String, Message)>>,
    pending_count: usize,

    genesis: Option<Block>,
    head: Option<Block>,

    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Storage + Metrics> Engine<E> {
    /// Creates a new engine, restoring the chain from its store.
    pub async fn new(context: E, cfg: Config) -> Result<(Self, Mailbox), Error> {
        let (mailbox_sender, mailbox_receiver) = mpsc::channel(cfg.mailbox_size);
        let mailbox = Mailbox::new(mailbox_sender);
        let metrics = metrics::Metrics::init(context.clone());
        let store = Store::init(
            context.with_label("store"),
            store::Config {
                partition: cfg.partition,
            },
        )
        .await?;

        let genesis = load_block(&store, GENESIS, GENESIS);
        let head = store
            .get(CHAIN, LATEST)?
            .and_then(|hash| String::from_utf8(hash).ok())
            .and_then(|hash| load_block(&store, BLOCKS, &hash))
            .or_else(|| genesis.clone());
        let result = Self {
            context,
            name: cfg.name,
            timeout: cfg.timeout,
            store,
            mailbox_receiver,
            surveys: HashMap::new(),
            finished: HashMap::new(),
            finished_order: VecDeque::new(),
            pending: HashMap::new(),
            pending_count: 0,
            genesis,
            head,
            metrics,
        };
        Ok((result, mailbox))
    }

    /// Starts the engine with the given network.
    pub fn start(mut self, network: (Sender, Receiver)) -> Handle<()> {
        self.context.spawn_ref()(self.run(network))
    }

    async fn run(mut self, network: (Sender, Receiver)) {
        let (sender, mut receiver) = network;
        loop {
            let wait = self
                .next_deadline()
                .map(|deadline| {
                    deadline
                        .duration_since(self.context.current())
                        .unwrap_or_default()
                })
                .unwrap_or(IDLE);
            select! {
                _ = self.context.sleep(wait) => {
                    self.expire(&sender).await;
                },

                mail = self.mailbox_receiver.next() => {
                    let Some(msg) = mail else {
                        debug!(node = self.name, "mailbox closed");
                        break;
                    };
                    self.handle_mail(msg);
                },

                msg = receiver.recv() => {
                    let (from, message) = match msg {
                        Ok(received) => received,
                        Err(err) => {
                            debug!(?err, node = self.name, "receiver closed");
                            break;
                        }
                    };
                    self.handle(&sender, from, message).await;
                },
            }
        }
    }

    fn handle_mail(&mut self, msg: ingress::Message) {
        match msg {
            ingress::Message::Latest { responder } => {
                trace!("mailbox: latest");
                let _ = responder.send(self.head.clone());
            }
            ingress::Message::Genesis { responder } => {
                trace!("mailbox: genesis");
                let _ = responder.send(self.genesis.clone());
            }
            ingress::Message::Block {
                survey_id,
                responder,
            } => {
                trace!(survey_id, "mailbox: block");
                let _ = responder.send(self.block_of(&survey_id));
            }
            ingress::Message::Proofs {
                survey_id,
                responder,
            } => {
                trace!(survey_id, "mailbox: proofs");
                let _ = responder.send(self.proofs_of(&survey_id));
            }
        }
    }

    /// Handles `message`, then every message it releases from the pending buffer.
    async fn handle(&mut self, sender: &Sender, from: String, message: Message) {
        let mut queue = VecDeque::from([(from, message)]);
        while let Some((from, message)) = queue.pop_front() {
            let released = self.dispatch(sender, from, message).await;
            queue.extend(released);
        }
    }

    async fn dispatch(
        &mut self,
        sender: &Sender,
        from: String,
        message: Message,
    ) -> Vec<(String, Message)> {
        match message {
            Message::GetLatestBlock => {
                sender.send(&from, &Message::BlockReply(self.head.clone()));
                return Vec::new();
            }
            Message::GetGenesis => {
                sender.send(&from, &Message::BlockReply(self.genesis.clone()));
                return Vec::new();
            }
            Message::GetBlock { survey_id } => {
                sender.send(&from, &Message::BlockReply(self.block_of(&survey_id)));
                return Vec::new();
            }
            Message::GetProofs { survey_id } => {
                sender.send(&from, &Message::ProofsReply(self.proofs_of(&survey_id)));
                return Vec::new();
            }
            Message::CloseDB { delete } => {
                match self.store.close(delete).await {
                    Ok(()) => info!(node = self.name, delete, "closed store"),
                    Err(err) => error!(node = self.name, ?err, "failed to close store"),
                }
                sender.send(&from, &Message::Ack);
                return Vec::new();
            }
            Message::SurveyQueryToVN(query) => {
                return self.on_query(sender, &from, query).await;
            }
            _ => {}
        }

        let Some(survey_id) = message.survey_id().map(str::to_string) else {
            warn!(from, node = self.name, "unexpected message");
            self.metrics.messages_dropped.inc();
            return Vec::new();
        };
        if !self.surveys.contains_key(&survey_id) {
            if self.is_finished(&survey_id) {
                match message {
                    Message::EndVerification { survey_id } => {
                        self.answer_finished(sender, &from, &survey_id)
                    }
                    _ => {
                        debug!(survey_id, from, node = self.name, "dropping message of finished survey");
                        self.metrics.messages_dropped.inc();
                    }
                }
                return Vec::new();
            }
            if self.pending_count >= MAX_PENDING {
                warn!(survey_id, from, "dropping message of unknown survey");
                self.metrics.messages_dropped.inc();
                return Vec::new();
            }
            self.pending_count += 1;
            self.pending
                .entry(survey_id)
                .or_default()
                .push((from, message));
            return Vec::new();
        }
        match message {
            Message::Proof(envelope) => self.on_proof(sender, &from, envelope).await,
            Message::Bitmap { survey_id, bitmap } => {
                self.on_bitmap(sender, &from, &survey_id, bitmap).await
            }
            Message::EndVerification { survey_id } => self.on_end(&from, &survey_id),
            _ => {
                warn!(survey_id, from, node = self.name, "unexpected message");
                self.metrics.messages_dropped.inc();
            }
        }
        Vec::new()
    }

    ////////////////////////////////////////
    // Proofs
    ////////////////////////////////////////

    /// Starts verifying a survey, returning the messages buffered for it.
    async fn on_query(
        &mut self,
        sender: &Sender,
        from: &str,
        query: Query,
    ) -> Vec<(String, Message)> {
        let survey_id = query.survey_id.clone();
        if self.surveys.contains_key(&survey_id) || self.is_finished(&survey_id) {
            warn!(survey_id, from, "duplicate survey");
            return Vec::new();
        }
        if query.roster.computing.first().map(|member| member.name.as_str()) != Some(from) {
            warn!(survey_id, from, "survey not sent by the root");
            self.metrics.messages_dropped.inc();
            return Vec::new();
        }
        if let Err(err) = query.validate() {
            warn!(survey_id, ?err, "invalid survey");
            return Vec::new();
        }
        if query.roster.verifying_index(&self.name).is_none() {
            warn!(survey_id, node = self.name, "not a verifying node of the survey");
            return Vec::new();
        }

        let remaining = query.expected_proofs();
        debug!(survey_id, expected = remaining.total(), node = self.name, "verifying survey");
        self.surveys.insert(
            survey_id.clone(),
            Verification {
                query,
                remaining,
                bitmap: Bitmap::new(),
                forwarded: false,
                deadline: Some(self.context.current() + self.timeout),
                bitmaps: BTreeMap::new(),
                waiters: Vec::new(),
            },
        );
        self.metrics.surveys.inc();
        self.metrics.tracked.set(self.surveys.len() as i64);

        // Messages received before the survey are replayed once it is known
        let pending = self.pending.remove(&survey_id).unwrap_or_default();
        self.pending_count -= pending.len();
        if remaining.total() == 0 {
            self.forward(sender, &survey_id).await;
        }
        pending
    }

    async fn on_proof(&mut self, sender: &Sender, from: &str, envelope: ProofEnvelope) {
        let survey_id = envelope.survey_id.clone();
        let identifier = envelope.identifier(&self.name);
        let Some(verification) = self.surveys.get_mut(&survey_id) else {
            return;
        };
        if verification.forwarded {
            debug!(survey_id, identifier, "dropping late proof");
            self.metrics.messages_dropped.inc();
            return;
        }
        if from != envelope.sender {
            warn!(survey_id, from, sender = envelope.sender, "proof relayed by another node");
            self.metrics.messages_dropped.inc();
            return;
        }
        if verification.bitmap.get(&identifier).is_some() {
            warn!(survey_id, identifier, "duplicate proof");
            self.metrics.messages_dropped.inc();
            return;
        }
        let Some(member) = verification.query.roster.member(&envelope.sender) else {
            warn!(survey_id, sender = envelope.sender, "proof of unknown node");
            self.metrics.messages_dropped.inc();
            return;
        };
        let remaining = verification.remaining.get_mut(envelope.kind);
        if *remaining == 0 {
            warn!(survey_id, kind = %envelope.kind, sender = envelope.sender, "unexpected proof");
            self.metrics.messages_dropped.inc();
            return;
        }
        *remaining -= 1;

        let verdict = if !envelope.verify_signature(&member.identity) {
            Verdict::BadSignature
        } else {
            match envelope.proof().and_then(|proof| {
                proof.verify(&verification.query, &envelope.sender, &envelope.differ_info)
            }) {
                Ok(()) => Verdict::Accepted,
                Err(err) => {
                    warn!(survey_id, identifier, ?err, "proof rejected");
                    Verdict::Rejected
                }
            }
        };
        if verdict == Verdict::Accepted {
            self.metrics.proofs_verified.inc();
        } else {
            self.metrics.proofs_rejected.inc();
        }
        debug!(survey_id, kind = %envelope.kind, sender = envelope.sender, ?verdict, "verified proof");
        verification.bitmap.insert(identifier.clone(), verdict);
        let done = verification.remaining.total() == 0;

        if let Err(err) = self
            .store
            .put(&envelope.bucket(), &identifier, &envelope.encode())
        {
            error!(survey_id, identifier, ?err, "failed to store proof");
        } else if let Err(err) = self.store.sync().await {
            error!(survey_id, identifier, ?err, "failed to sync proof");
        }
        if done {
            self.forward(sender, &survey_id).await;
        }
    }

    /// Sends the local bitmap of a survey to the root.
    async fn forward(&mut self, sender: &Sender, survey_id: &str) {
        let now = self.context.current();
        let Some(verification) = self.surveys.get_mut(survey_id) else {
            return;
        };
        if verification.forwarded {
            return;
        }
        verification.forwarded = true;
        self.metrics.surveys.dec();
        let bitmap = verification.bitmap.clone();
        let root = verification.query.roster.verifying[0].name.clone();
        verification.deadline = (root == self.name).then(|| now + self.timeout);
        if verification.remaining.total() > 0 {
            warn!(survey_id, missing = verification.remaining.total(), "proofs missing at deadline");
        }

        let key = format!("{survey_id}/map");
        if let Err(err) = self.store.put(&self.name, &key, &bitmap.encode()) {
            error!(survey_id, ?err, "failed to store bitmap");
        } else if let Err(err) = self.store.sync().await {
            error!(survey_id, ?err, "failed to sync bitmap");
        }
        debug!(survey_id, node = self.name, verdicts = bitmap.len(), "forwarding bitmap");
        if root == self.name {
            let name = self.name.clone();
            self.on_bitmap(sender, &name, survey_id, bitmap).await;
        } else {
            sender.send(
                &root,
                &Message::Bitmap {
                    survey_id: survey_id.to_string(),
                    bitmap,
                },
            );
            self.finish(survey_id, None);
        }
    }

    ////////////////////////////////////////
    // Chain
    ////////////////////////////////////////

    async fn on_bitmap(&mut self, sender: &Sender, from: &str, survey_id: &str, bitmap: Bitmap) {
        let Some(verification) = self.surveys.get_mut(survey_id) else {
            return;
        };
        let roster = &verification.query.roster;
        if roster.verifying.first().map(|member| member.name.as_str()) != Some(self.name.as_str())
        {
            warn!(survey_id, from, "bitmap sent to a non-root node");
            self.metrics.messages_dropped.inc();
            return;
        }
        if roster.verifying_index(from).is_none() {
            warn!(survey_id, from, "unexpected bitmap");
            self.metrics.messages_dropped.inc();
            return;
        }
        if verification.bitmaps.insert(from.to_string(), bitmap).is_some() {
            warn!(survey_id, from, "duplicate bitmap");
        }
        if verification.bitmaps.len() == roster.verifying.len() {
            self.append(sender, survey_id).await;
        }
    }

    /// Appends the block of a survey if a majority of verifying nodes sent their
    /// bitmap, and answers the waiting queriers.
    async fn append(&mut self, sender: &Sender, survey_id: &str) {
        let timestamp = self
            .context
            .current()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default();
        let Some(verification) = self.surveys.get_mut(survey_id) else {
            return;
        };
        let waiters = std::mem::take(&mut verification.waiters);
        let verifying = &verification.query.roster.verifying;
        if verification.bitmaps.len() * 2 <= verifying.len() {
            let node = verifying
                .iter()
                .find(|member| !verification.bitmaps.contains_key(&member.name))
                .map(|member| member.name.clone())
                .unwrap_or_default();
            warn!(
                survey_id,
                received = verification.bitmaps.len(),
                verifying = verifying.len(),
                "no quorum of bitmaps"
            );
            let failure = Failure::Missing {
                node,
                phase: Phase::Verification,
            };
            for waiter in waiters {
                sender.send(
                    &waiter,
                    &Message::Failure {
                        survey_id: survey_id.to_string(),
                        failure: failure.clone(),
                    },
                );
            }
            self.finish(survey_id, Some(failure));
            return;
        }

        let mut merged = Bitmap::new();
        for (_, bitmap) in std::mem::take(&mut verification.bitmaps) {
            merged.merge(bitmap);
        }
        let roster = verification.query.roster.verifying_digest();

        let mut writes: Vec<(&str, String, Vec<u8>)> = Vec::new();
        let genesis = match &self.genesis {
            Some(genesis) => genesis.clone(),
            None => {
                let genesis = Block::genesis(roster, timestamp);
                writes.push((GENESIS, GENESIS.to_string(), genesis.encode().to_vec()));
                info!(node = self.name, "created genesis block");
                genesis
            }
        };
        let previous = self.head.as_ref().unwrap_or(&genesis).hash();
        let block = Block {
            previous,
            timestamp,
            survey_id: survey_id.to_string(),
            roster,
            bitmap: merged,
        };
        let hash = hex(&block.hash());
        writes.push((BLOCKS, hash.clone(), block.encode().to_vec()));
        writes.push((MAPPING, survey_id.to_string(), hash.clone().into_bytes()));
        writes.push((CHAIN, LATEST.to_string(), hash.clone().into_bytes()));
        let result = writes
            .iter()
            .try_for_each(|(bucket, key, value)| self.store.put(bucket, key, value));
        let result = match result {
            Ok(()) => self.store.sync().await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            error!(survey_id, ?err, "failed to store block");
        }

        info!(survey_id, block = hash, verdicts = block.bitmap.len(), "appended block");
        self.metrics.blocks.inc();
        self.genesis = Some(genesis);
        self.head = Some(block.clone());
        for waiter in waiters {
            sender.send(&waiter, &Message::BlockReply(Some(block.clone())));
        }
        self.finish(survey_id, None);
    }

    fn on_end(&mut self, from: &str, survey_id: &str) {
        if let Some(verification) = self.surveys.get_mut(survey_id) {
            verification.waiters.push(from.to_string());
        }
    }

    /// Answers `EndVerification` for a survey no longer tracked.
    fn answer_finished(&self, sender: &Sender, from: &str, survey_id: &str) {
        match self.finished.get(survey_id) {
            Some(Some(failure)) => {
                sender.send(
                    from,
                    &Message::Failure {
                        survey_id: survey_id.to_string(),
                        failure: failure.clone(),
                    },
                );
            }
            _ => {
                sender.send(from, &Message::BlockReply(self.block_of(survey_id)));
            }
        }
    }

    /// Stops tracking a survey.
    fn finish(&mut self, survey_id: &str, failure: Option<Failure>) {
        if self.surveys.remove(survey_id).is_none() {
            return;
        }
        self.metrics.tracked.set(self.surveys.len() as i64);
        if self.finished.insert(survey_id.to_string(), failure).is_none() {
            self.finished_order.push_back(survey_id.to_string());
        }
        while self.finished_order.len() > MAX_FINISHED {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
        debug!(survey_id, node = self.name, "survey finished");
    }

    /// Whether a survey was finished, recently or in a previous run.
    fn is_finished(&self, survey_id: &str) -> bool {
        self.finished.contains_key(survey_id)
            || self.store.get(MAPPING, survey_id).ok().flatten().is_some()
    }

    fn block_of(&self, survey_id: &str) -> Option<Block> {
        if survey_id == GENESIS {
            return self.genesis.clone();
        }
        let hash = self.store.get(MAPPING, survey_id).ok().flatten()?;
        load_block(&self.store, BLOCKS, &String::from_utf8(hash).ok()?)
    }

    fn proofs_of(&self, survey_id: &str) -> Vec<Record> {
        let mut records = Vec::new();
        for kind in ProofKind::ALL {
            match self.store.list(&bucket(survey_id, kind)) {
                Ok(list) => records.extend(
                    list.into_iter()
                        .map(|(key, value)| Record { key, value }),
                ),
                Err(err) => error!(survey_id, %kind, ?err, "failed to list proofs"),
            }
        }
        records
    }

    ////////////////////////////////////////
    // Deadlines
    ////////////////////////////////////////

    fn next_deadline(&self) -> Option<SystemTime> {
        self.surveys
            .values()
            .filter_map(|verification| verification.deadline)
            .min()
    }

    /// Forwards incomplete bitmaps and closes incomplete blocks past their deadline.
    async fn expire(&mut self, sender: &Sender) {
        let now = self.context.current();
        let expired: Vec<(String, bool)> = self
            .surveys
            .iter()
            .filter(|(_, verification)| verification.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(survey_id, verification)| (survey_id.clone(), verification.forwarded))
            .collect();
        for (survey_id, forwarded) in expired {
            if !forwarded {
                warn!(survey_id, node = self.name, "verification timed out");
                self.forward(sender, &survey_id).await;
            } else {
                warn!(survey_id, node = self.name, "bitmaps missing at deadline");
                self.append(sender, &survey_id).await;
            }
        }
    }
}

fn load_block<E: Clock + Spawner + Storage + Metrics>(
    store: &Store<E>,
    bucket: &str,
    key: &str,
) -> Option<Block> {
    let bytes = store.get(bucket, key).ok().flatten()?;
    Block::decode(bytes.as_slice()).ok()
}
