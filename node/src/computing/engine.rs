use super::{metrics, state::SurveyState, Config};
use crate::{
    envelope::{context, Proof, ProofEnvelope},
    overlay::{children, parent, ring_next, Receiver, Sender},
    query::Query,
    survey::{lock, Surveys},
    wire::{Failure, Message},
    Error,
};
use commonware_cryptography::ed25519::PrivateKey;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use drynx_cryptography::{
    aggregation::AggregationProof,
    elgamal::encrypt_trivial,
    key_switch::{combine, Contribution},
    obfuscation::{obfuscate, ObfuscationProof},
    range::RangeSigner,
    shuffle::{shuffle, Rerandomizer},
    CipherVector, Keypair,
};
use drynx_encoding::noise;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Maximum number of messages buffered for a survey not yet announced.
const MAX_PENDING: usize = 1024;

/// Number of finished surveys remembered to drop their late messages.
const MAX_FINISHED: usize = 1024;

/// Height of the subtree rooted at computing node `index`.
fn height(index: usize, n: usize) -> u32 {
    children(index, n)
        .into_iter()
        .map(|child| height(child, n) + 1)
        .max()
        .unwrap_or(0)
}

/// Aborts the survey, reporting `err` towards the querier.
fn abort(sender: &Sender, state: &mut SurveyState, err: Error, metrics: &metrics::Metrics) {
    if state.finished {
        return;
    }
    let survey_id = state.query.survey_id.clone();
    let target = if state.is_root() {
        state.origin.clone()
    } else {
        state.query.roster.computing.first().map(|member| member.name.clone())
    };
    state.finish();
    metrics.surveys.dec();
    metrics.failed.inc();
    error!(survey_id, node = sender.name(), ?err, "aborting survey");
    if let Some(target) = target {
        sender.send(
            &target,
            &Message::Failure {
                survey_id,
                failure: Failure::from_error(&err),
            },
        );
    }
}

/// Whether `from` may abort the survey held in `state`: its own providers, and at
/// the root every other computing node.
fn reports_to(state: &SurveyState, from: &str) -> bool {
    let roster = &state.query.roster;
    if roster
        .providers
        .get(state.index)
        .is_some_and(|providers| providers.iter().any(|member| member.name == from))
    {
        return true;
    }
    state.is_root() && roster.computing_index(from).is_some_and(|index| index != 0)
}

/// Checks the survey once its deadline passed, returning whether to keep watching.
fn expire(
    sender: &Sender,
    entry: &Mutex<SurveyState>,
    seen: &mut u64,
    metrics: &metrics::Metrics,
) -> bool {
    let Ok(mut state) = lock(entry) else {
        return false;
    };
    if state.finished {
        return false;
    }
    if state.progress != *seen {
        *seen = state.progress;
        return true;
    }
    let err = state.failure();
    abort(sender, &mut state, err, metrics);
    false
}

/// Runs the protocols of a computing node.
pub struct Engine<E: Clock + Spawner + Metrics + RngCore> {
    context: E,
    rng: StdRng,

    name: String,
    keypair: Keypair,
    identity: PrivateKey,
    signers: Vec<RangeSigner>,
    timeout: Duration,

    surveys: Arc<Surveys<SurveyState>>,
    /// Surveys removed from `surveys`, oldest first.
    finished: HashSet<String>,
    finished_order: VecDeque<String>,
    /// Messages received before the survey they belong to.
    pending: HashMap<String, Vec<(String, Message)>>,

    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics + RngCore> Engine<E> {
    pub fn new(mut context: E, cfg: Config) -> Self {
        let metrics = metrics::Metrics::init(context.clone());
        let rng = StdRng::seed_from_u64(context.next_u64());
        Self {
            context,
            rng,
            name: cfg.name,
            keypair: cfg.keypair,
            identity: cfg.identity,
            signers: cfg.signers,
            timeout: cfg.timeout,
            surveys: Arc::new(Surveys::new()),
            finished: HashSet::new(),
            finished_order: VecDeque::new(),
            pending: HashMap::new(),
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
                    debug!(?err, node = self.name, "receiver closed");
                    break;
                }
            };
            self.handle(&sender, from, message);
        }
    }

    fn handle(&mut self, sender: &Sender, from: String, message: Message) {
        self.prune();
        let Some(survey_id) = message.survey_id().map(str::to_string) else {
            warn!(from, node = self.name, "unexpected message");
            return;
        };
        let result = match message {
            Message::SurveyQuery(query) => self.start_survey(sender, &from, query),
            Message::Announce(query) => self.join_survey(sender, &from, query),
            _ if self.finished.contains(&survey_id) => {
                debug!(survey_id, from, node = self.name, "dropping message of finished survey");
                return;
            }
            message if !self.surveys.contains(&survey_id) => {
                let pending = self.pending.entry(survey_id.clone()).or_default();
                if pending.len() < MAX_PENDING {
                    pending.push((from, message));
                    self.metrics.buffered.inc();
                } else {
                    warn!(survey_id, from, "dropping message of unknown survey");
                }
                return;
            }
            message => self.on_message(sender, &from, &survey_id, message),
        };
        if let Err(err) = result {
            self.fail(sender, &from, &survey_id, err);
        }
        self.prune();
    }

    /// Drops the state of finished surveys, remembering their identifiers.
    fn prune(&mut self) {
        for survey_id in self.surveys.prune(|state| state.finished) {
            debug!(survey_id, node = self.name, "pruned survey");
            self.pending.remove(&survey_id);
            if self.finished.insert(survey_id.clone()) {
                self.finished_order.push_back(survey_id);
            }
        }
        while self.finished_order.len() > MAX_FINISHED {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
        self.metrics.tracked.set(self.surveys.len() as i64);
    }

    /// Aborts a known survey, or answers `from` if the survey never started.
    fn fail(&mut self, sender: &Sender, from: &str, survey_id: &str, err: Error) {
        match self.surveys.get(survey_id) {
            Ok(entry) => match lock(&entry) {
                Ok(mut state) => abort(sender, &mut state, err, &self.metrics),
                Err(err) => error!(survey_id, ?err, "failed to lock survey"),
            },
            Err(_) => {
                warn!(survey_id, from, ?err, "refusing survey");
                sender.send(
                    from,
                    &Message::Failure {
                        survey_id: survey_id.to_string(),
                        failure: Failure::from_error(&err),
                    },
                );
            }
        }
    }

    ////////////////////////////////////////
    // Announcement
    ////////////////////////////////////////

    /// Handles a survey submitted by a querier to the root.
    fn start_survey(&mut self, sender: &Sender, from: &str, query: Query) -> Result<(), Error> {
        if self.surveys.contains(&query.survey_id) || self.finished.contains(&query.survey_id) {
            warn!(survey_id = query.survey_id, from, "duplicate survey");
            sender.send(
                from,
                &Message::Failure {
                    survey_id: query.survey_id.clone(),
                    failure: Failure::Rejected("duplicate survey".into()),
                },
            );
            return Ok(());
        }
        let index = self.check(&query)?;
        if index != 0 {
            return Err(Error::Rejected(format!("{} is not the root", self.name)));
        }
        info!(survey_id = query.survey_id, operation = query.operation.name(), from, "starting survey");
        self.create(sender, query, index, Some(from.to_string()))
    }

    /// Handles a survey announced by the parent of this node.
    fn join_survey(&mut self, sender: &Sender, from: &str, query: Query) -> Result<(), Error> {
        if self.surveys.contains(&query.survey_id) || self.finished.contains(&query.survey_id) {
            warn!(survey_id = query.survey_id, from, "duplicate announcement");
            return Ok(());
        }
        let index = self.check(&query)?;
        let expected = parent(index)
            .and_then(|parent| query.roster.computing.get(parent))
            .map(|member| member.name.as_str());
        if expected != Some(from) {
            return Err(Error::Rejected(format!("{from} is not the parent of {}", self.name)));
        }
        debug!(survey_id = query.survey_id, from, node = self.name, "joining survey");
        self.create(sender, query, index, None)
    }

    /// Validates `query` and returns the index of this node.
    fn check(&self, query: &Query) -> Result<usize, Error> {
        query.validate()?;
        let index = query
            .roster
            .computing_index(&self.name)
            .ok_or_else(|| Error::Rejected(format!("{} is not a computing node", self.name)))?;
        if query.roster.computing[index].key != Some(self.keypair.public) {
            return Err(Error::Rejected(format!("key of {} does not match", self.name)));
        }

        // The querier must use the signatures this node published
        if let (Some(ranges), true) = (&query.ranges, query.proofs.enabled()) {
            let row = query
                .signatures
                .get(index)
                .ok_or_else(|| Error::Rejected("missing signatures".into()))?;
            for (slot, (published, range)) in row.iter().zip(ranges).enumerate() {
                if range.is_vacuous() {
                    continue;
                }
                if !self.signers.iter().any(|signer| signer.owns(published)) {
                    return Err(Error::Rejected(format!(
                        "signatures of slot {slot} were not issued by {}",
                        self.name
                    )));
                }
            }
        }
        Ok(index)
    }

    fn create(
        &mut self,
        sender: &Sender,
        query: Query,
        index: usize,
        origin: Option<String>,
    ) -> Result<(), Error> {
        let survey_id = query.survey_id.clone();
        let entry = self
            .surveys
            .insert(&survey_id, SurveyState::new(query, index, origin))?;
        self.metrics.surveys.inc();
        self.watch(sender, entry.clone(), index);
        {
            let mut state = lock(&entry)?;
            if let Err(err) = self.begin(sender, &mut state) {
                abort(sender, &mut state, err, &self.metrics);
                return Ok(());
            }
        }

        // Replay messages received before the announcement
        for (from, message) in self.pending.remove(&survey_id).unwrap_or_default() {
            self.handle(sender, from, message);
        }
        Ok(())
    }

    /// Aborts the survey if it makes no progress before its deadline.
    ///
    /// Nodes closer to the root wait longer, so that the node missing a contribution
    /// reports first.
    fn watch(&mut self, sender: &Sender, entry: Arc<Mutex<SurveyState>>, index: usize) {
        let n = match lock(&entry) {
            Ok(state) => state.query.roster.computing.len(),
            Err(_) => return,
        };
        let deadline = self.timeout * (height(index, n) + 1);
        let sender = sender.clone();
        let metrics = self.metrics.clone();
        self.context.clone().spawn(move |context| async move {
            let mut seen = 0;
            loop {
                context.sleep(deadline).await;
                if !expire(&sender, &entry, &mut seen, &metrics) {
                    break;
                }
            }
        });
    }

    /// Forwards the survey and announces the protocols this node waits on.
    fn begin(&mut self, sender: &Sender, state: &mut SurveyState) -> Result<(), Error> {
        let query = state.query.clone();
        let index = state.index;
        let n = query.roster.computing.len();
        let name = |i: usize| query.roster.computing[i].name.clone();
        let previous = name((index + n - 1) % n);

        let children: Vec<String> = children(index, n).into_iter().map(name).collect();
        for child in &children {
            sender.send(child, &Message::Announce(query.clone()));
        }
        let providers: Vec<String> = query.roster.providers[index]
            .iter()
            .map(|member| member.name.clone())
            .collect();
        for provider in &providers {
            sender.send(provider, &Message::SurveyQueryToDP(query.clone()));
        }
        if state.is_root() && query.proofs.enabled() {
            for verifier in &query.roster.verifying {
                sender.send(&verifier.name, &Message::SurveyQueryToVN(query.clone()));
            }
        }

        state.protocol(state.collection)?.announce(providers);
        state.protocol(state.aggregation)?.announce(children);
        if !query.obfuscation {
            state.protocol(state.obfuscation)?.complete();
        } else if !state.is_root() {
            state.protocol(state.obfuscation)?.announce([previous.clone()]);
        }
        if !query.diff_p.enabled() {
            state.protocol(state.shuffle)?.complete();
        } else {
            state.protocol(state.shuffle)?.announce([previous]);
        }
        if !state.is_root() {
            state.protocol(state.key_switch)?.announce([name(0)]);
        }

        if query.diff_p.enabled() {
            let public = query.roster.collective_key()?;
            state.rerandomizers =
                Rerandomizer::precompute(&mut self.rng, &public, query.diff_p.noise_list_size);
            if state.is_root() {
                let diff_p = &query.diff_p;
                let list = noise::generate(
                    diff_p.noise_list_size,
                    diff_p.lap_mean,
                    diff_p.lap_scale,
                    diff_p.quanta,
                    diff_p.scale,
                    diff_p.limit,
                )?;
                let vector: CipherVector = list.into_iter().map(encrypt_trivial).collect();
                debug!(survey_id = query.survey_id, size = vector.len(), "generated noise list");
                self.shuffle_hop(sender, state, 0, vector)?;
            }
        }
        self.try_aggregate(sender, state)
    }

    ////////////////////////////////////////
    // Survey messages
    ////////////////////////////////////////

    fn on_message(
        &mut self,
        sender: &Sender,
        from: &str,
        survey_id: &str,
        message: Message,
    ) -> Result<(), Error> {
        let entry = self.surveys.get(survey_id)?;
        let mut guard = lock(&entry)?;
        let state = &mut *guard;
        if state.finished {
            debug!(survey_id, from, "dropping message of finished survey");
            return Ok(());
        }
        let len = state.query.vector_len();
        let result = match message {
            Message::DataResponse { vector, .. } => {
                check_len(from, len, &vector)?;
                match state.accept(state.collection, from) {
                    Some(_) => {
                        state.inputs.push(vector);
                        self.try_aggregate(sender, state)
                    }
                    None => Ok(()),
                }
            }
            Message::Aggregate { vector, .. } => {
                check_len(from, len, &vector)?;
                match state.accept(state.aggregation, from) {
                    Some(_) => {
                        state.inputs.push(vector);
                        self.try_aggregate(sender, state)
                    }
                    None => Ok(()),
                }
            }
            Message::Obfuscate { hop, vector, .. } => {
                check_len(from, len, &vector)?;
                self.on_obfuscate(sender, state, from, hop, vector)
            }
            Message::Shuffle { hop, vector, .. } => {
                check_len(from, state.query.diff_p.noise_list_size, &vector)?;
                self.on_shuffle(sender, state, from, hop, vector)
            }
            Message::KeySwitchRequest { vector, .. } => {
                check_len(from, len, &vector)?;
                self.on_request(sender, state, from, vector)
            }
            Message::KeySwitchContribution { switched, .. } => {
                check_len(from, len, &switched)?;
                self.on_contribution(sender, state, from, switched)
            }
            Message::Failure { failure, .. } if !reports_to(state, from) => {
                warn!(survey_id, from, ?failure, "dropping failure of a non-participant");
                Ok(())
            }
            Message::Failure { failure, .. } => {
                warn!(survey_id, from, ?failure, "received failure");
                let err = failure.into_error(survey_id);
                abort(sender, state, err, &self.metrics);
                Ok(())
            }
            _ => {
                warn!(survey_id, from, node = self.name, "unexpected message");
                Ok(())
            }
        };
        if let Err(err) = result {
            abort(sender, state, err, &self.metrics);
        }
        Ok(())
    }

    /// Sums the subtree once every provider and child contributed.
    fn try_aggregate(&mut self, sender: &Sender, state: &mut SurveyState) -> Result<(), Error> {
        if state.aggregated || !state.completed(state.collection) || !state.completed(state.aggregation)
        {
            return Ok(());
        }
        state.aggregated = true;
        let n = state.query.roster.computing.len();
        let inputs = std::mem::take(&mut state.inputs);
        let proof = AggregationProof::aggregate(inputs, state.query.vector_len())?;
        let output = proof.output.clone();
        if !children(state.index, n).is_empty() {
            self.emit(sender, &state.query, "0", Proof::Aggregation(proof));
        }
        debug!(
            survey_id = state.query.survey_id,
            node = self.name,
            slots = output.len(),
            "aggregated subtree"
        );

        if let Some(parent) = parent(state.index) {
            let parent = state.query.roster.computing[parent].name.clone();
            sender.send(
                &parent,
                &Message::Aggregate {
                    survey_id: state.query.survey_id.clone(),
                    vector: output,
                },
            );
            return Ok(());
        }

        // Root
        if state.query.obfuscation {
            let previous = state.query.roster.computing[n - 1].name.clone();
            state.protocol(state.obfuscation)?.announce([previous]);
            return self.obfuscate_hop(sender, state, 0, output);
        }
        state.aggregate = Some(output);
        self.try_switch(sender, state)
    }

    /// Multiplies every slot by a fresh scalar and forwards around the ring.
    fn obfuscate_hop(
        &mut self,
        sender: &Sender,
        state: &mut SurveyState,
        hop: u32,
        inputs: CipherVector,
    ) -> Result<(), Error> {
        let (outputs, scalars) = obfuscate(&mut self.rng, &inputs);
        if state.query.proofs.enabled() {
            for (slot, ((input, output), s)) in inputs.iter().zip(&outputs).zip(&scalars).enumerate() {
                let differ_info = slot.to_string();
                let tag = context(&state.query.survey_id, &self.name, &differ_info);
                let proof = ObfuscationProof::prove(&mut self.rng, s, *input, *output, &tag);
                self.emit(sender, &state.query, &differ_info, Proof::Obfuscation(proof));
            }
        }
        self.forward(sender, state, hop, outputs, |survey_id, hop, vector| {
            Message::Obfuscate {
                survey_id,
                hop,
                vector,
            }
        })
    }

    /// Shuffles the noise list and forwards around the ring.
    fn shuffle_hop(
        &mut self,
        sender: &Sender,
        state: &mut SurveyState,
        hop: u32,
        inputs: CipherVector,
    ) -> Result<(), Error> {
        let public = state.query.roster.collective_key()?;
        let differ_info = hop.to_string();
        let tag = context(&state.query.survey_id, &self.name, &differ_info);
        let rerandomizers = std::mem::take(&mut state.rerandomizers);
        let precomputed = (rerandomizers.len() == inputs.len()).then_some(rerandomizers.as_slice());
        let (outputs, proof) = shuffle(&mut self.rng, &public, &inputs, precomputed, &tag)?;
        self.emit(
            sender,
            &state.query,
            &differ_info,
            Proof::Shuffle {
                inputs,
                outputs: outputs.clone(),
                proof,
            },
        );
        self.forward(sender, state, hop, outputs, |survey_id, hop, vector| {
            Message::Shuffle {
                survey_id,
                hop,
                vector,
            }
        })
    }

    /// Sends the result of a ring hop to the next node, handling it directly when
    /// this node is alone on the ring.
    fn forward(
        &mut self,
        sender: &Sender,
        state: &mut SurveyState,
        hop: u32,
        vector: CipherVector,
        message: fn(String, u32, CipherVector) -> Message,
    ) -> Result<(), Error> {
        let n = state.query.roster.computing.len();
        let next = ring_next(state.index, n);
        let message = message(state.query.survey_id.clone(), hop + 1, vector);
        if next == state.index {
            let from = self.name.clone();
            return match message {
                Message::Obfuscate { hop, vector, .. } => {
                    self.on_obfuscate(sender, state, &from, hop, vector)
                }
                Message::Shuffle { hop, vector, .. } => {
                    self.on_shuffle(sender, state, &from, hop, vector)
                }
                _ => Ok(()),
            };
        }
        let next = state.query.roster.computing[next].name.clone();
        sender.send(&next, &message);
        Ok(())
    }

    /// Returns whether `hop` is the hop expected by this node on the ring.
    fn expected_hop(state: &SurveyState, hop: u32) -> bool {
        let n = state.query.roster.computing.len();
        let expected = if state.is_root() { n } else { state.index };
        hop as usize == expected
    }

    fn on_obfuscate(
        &mut self,
        sender: &Sender,
        state: &mut SurveyState,
        from: &str,
        hop: u32,
        vector: CipherVector,
    ) -> Result<(), Error> {
        if !Self::expected_hop(state, hop) {
            warn!(survey_id = state.query.survey_id, from, hop, "unexpected obfuscation hop");
            return Ok(());
        }
        if state.accept(state.obfuscation, from).is_none() {
            return Ok(());
        }
        if state.is_root() {
            state.aggregate = Some(vector);
            return self.try_switch(sender, state);
        }
        self.obfuscate_hop(sender, state, hop, vector)
    }

    fn on_shuffle(
        &mut self,
        sender: &Sender,
        state: &mut SurveyState,
        from: &str,
        hop: u32,
        vector: CipherVector,
    ) -> Result<(), Error> {
        if !Self::expected_hop(state, hop) {
            warn!(survey_id = state.query.survey_id, from, hop, "unexpected shuffle hop");
            return Ok(());
        }
        if state.accept(state.shuffle, from).is_none() {
            return Ok(());
        }
        if state.is_root() {
            debug!(survey_id = state.query.survey_id, "noise list shuffled");
            state.noise = Some(vector);
            return self.try_switch(sender, state);
        }
        self.shuffle_hop(sender, state, hop, vector)
    }

    ////////////////////////////////////////
    // Key switching
    ////////////////////////////////////////

    /// Adds noise and requests the contributions of every computing node once the
    /// aggregate and the noise list are ready.
    fn try_switch(&mut self, sender: &Sender, state: &mut SurveyState) -> Result<(), Error> {
        if state.switching.is_some()
            || !state.completed(state.obfuscation)
            || !state.completed(state.shuffle)
        {
            return Ok(());
        }
        let Some(mut vector) = state.aggregate.clone() else {
            return Ok(());
        };

        // One independent draw per slot
        if let Some(noise) = state.noise.take() {
            if noise.is_empty() {
                return Err(Error::Rejected("empty noise list".into()));
            }
            for ciphertext in vector.iter_mut() {
                *ciphertext += noise[self.rng.gen_range(0..noise.len())];
            }
        }
        state.switching = Some(vector.clone());

        let names: Vec<String> = state
            .query
            .roster
            .computing
            .iter()
            .map(|member| member.name.clone())
            .collect();
        state.protocol(state.key_switch)?.announce(names.clone());
        for name in names.iter().skip(1) {
            sender.send(
                name,
                &Message::KeySwitchRequest {
                    survey_id: state.query.survey_id.clone(),
                    vector: vector.clone(),
                },
            );
        }
        debug!(survey_id = state.query.survey_id, "requested key switch");

        let switched = self.contribute(sender, state, &vector);
        let from = self.name.clone();
        self.on_contribution(sender, state, &from, switched)
    }

    /// Switches `vector` from the share of this node and proves it.
    fn contribute(
        &mut self,
        sender: &Sender,
        state: &SurveyState,
        vector: &[drynx_cryptography::Ciphertext],
    ) -> CipherVector {
        let tag = context(&state.query.survey_id, &self.name, "0");
        let contribution = Contribution::generate(
            &mut self.rng,
            &self.keypair.secret,
            &state.query.client,
            vector,
            &tag,
        );
        self.emit(
            sender,
            &state.query,
            "0",
            Proof::KeySwitch {
                inputs: vector.to_vec(),
                switched: contribution.switched.clone(),
                proof: contribution.proof,
            },
        );
        contribution.switched
    }

    fn on_request(
        &mut self,
        sender: &Sender,
        state: &mut SurveyState,
        from: &str,
        vector: CipherVector,
    ) -> Result<(), Error> {
        if state.is_root() || state.accept(state.key_switch, from).is_none() {
            warn!(survey_id = state.query.survey_id, from, "unexpected key switch request");
            return Ok(());
        }
        let switched = self.contribute(sender, state, &vector);
        sender.send(
            from,
            &Message::KeySwitchContribution {
                survey_id: state.query.survey_id.clone(),
                switched,
            },
        );
        debug!(survey_id = state.query.survey_id, node = self.name, "contributed key switch");
        state.finish();
        self.metrics.surveys.dec();
        self.metrics.completed.inc();
        Ok(())
    }

    fn on_contribution(
        &mut self,
        sender: &Sender,
        state: &mut SurveyState,
        from: &str,
        switched: CipherVector,
    ) -> Result<(), Error> {
        if !state.is_root() {
            warn!(survey_id = state.query.survey_id, from, "unexpected key switch contribution");
            return Ok(());
        }
        match state.accept(state.key_switch, from) {
            Some(true) => {}
            Some(false) => {
                state.contributions.insert(from.to_string(), switched);
                return Ok(());
            }
            None => return Ok(()),
        }
        state.contributions.insert(from.to_string(), switched);

        let switching = state
            .switching
            .as_ref()
            .ok_or_else(|| Error::Rejected("no vector to switch".into()))?;
        let contributions = state
            .query
            .roster
            .computing
            .iter()
            .map(|member| {
                state
                    .contributions
                    .get(&member.name)
                    .map(Vec::as_slice)
                    .ok_or_else(|| Error::MissingContribution {
                        node_id: member.name.clone(),
                        phase: crate::wire::Phase::KeySwitch,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let combined = combine(switching, contributions)?;

        let slots = state.query.slots().max(1);
        let vectors = state
            .query
            .groups()
            .into_iter()
            .zip(combined.chunks(slots))
            .map(|(group, chunk)| (group, chunk.to_vec()))
            .collect();
        let survey_id = state.query.survey_id.clone();
        if let Some(origin) = &state.origin {
            sender.send(
                origin,
                &Message::SurveyResponse {
                    survey_id: survey_id.clone(),
                    vectors,
                },
            );
        }
        info!(survey_id, "survey completed");
        state.finish();
        self.metrics.surveys.dec();
        self.metrics.completed.inc();
        Ok(())
    }

    ////////////////////////////////////////
    // Proofs
    ////////////////////////////////////////

    /// Signs `proof` and sends it to every verifying node.
    fn emit(&self, sender: &Sender, query: &Query, differ_info: &str, proof: Proof) {
        if !query.proofs.enabled() {
            return;
        }
        let verifiers: Vec<String> = query
            .roster
            .verifying
            .iter()
            .map(|member| member.name.clone())
            .collect();
        let kind = proof.kind();
        let envelope = ProofEnvelope::sign(
            &self.identity,
            &query.survey_id,
            &self.name,
            differ_info,
            &proof,
            verifiers.clone(),
        );
        let message = Message::Proof(envelope);
        for verifier in &verifiers {
            sender.send(verifier, &message);
        }
        self.metrics.proofs_emitted.inc();
        debug!(survey_id = query.survey_id, node = self.name, %kind, differ_info, "emitted proof");
    }
}

fn check_len(from: &str, expected: usize, vector: &[drynx_cryptography::Ciphertext]) -> Result<(), Error> {
    if vector.len() != expected {
        return Err(Error::Rejected(format!(
            "{from} sent {} ciphertexts, expected {expected}",
            vector.len()
        )));
    }
    Ok(())
}
