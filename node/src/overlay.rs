//! Overlay connecting the nodes of a cluster over a simulated p2p network.
//!
//! Every node registers under its roster name and the public key it is reachable
//! at, and receives a [Sender] and a [Receiver] that address peers by name.
//! Messages are encoded on send and decoded on receipt, so that nodes only ever
//! share bytes. The [Oracle] removes the links between chosen peers, which is how
//! tests make a node unreachable.
//!
//! # Topology
//!
//! Computing nodes form a binary tree rooted at index `0` (node `i` has children
//! `2i + 1` and `2i + 2`) and a ring in roster order.

use crate::{wire::Message, Error};
use bytes::Bytes;
use commonware_codec::{DecodeExt, Encode};
use commonware_cryptography::ed25519::PublicKey;
use commonware_p2p::{
    simulated::{self, Link},
    Receiver as _, Recipients, Sender as _,
};
use commonware_runtime::{Clock, Metrics, Network as RNetwork, Spawner};
use futures::{channel::mpsc, StreamExt};
use prometheus_client::metrics::counter::Counter;
use rand::Rng;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tracing::{debug, trace};

const CHANNEL: commonware_p2p::Channel = 0;

const LINK: Link = Link {
    latency: 10.0,
    jitter: 0.0,
    success_rate: 1.0,
};

/// Children of computing node `index` in a tree of `n` nodes.
pub fn children(index: usize, n: usize) -> Vec<usize> {
    [2 * index + 1, 2 * index + 2]
        .into_iter()
        .filter(|child| *child < n)
        .collect()
}

/// Parent of computing node `index`, if not the root.
pub fn parent(index: usize) -> Option<usize> {
    (index > 0).then(|| (index - 1) / 2)
}

/// Successor of computing node `index` on the ring of `n` nodes.
pub fn ring_next(index: usize, n: usize) -> usize {
    (index + 1) % n
}

type Inbox = mpsc::UnboundedSender<(String, Bytes)>;

#[derive(Default)]
struct Directory {
    keys: HashMap<String, PublicKey>,
    names: HashMap<PublicKey, String>,
    inboxes: HashMap<String, Inbox>,
    blocked: HashSet<(String, String)>,
    isolated: HashSet<String>,
}

impl Directory {
    fn links(&self, from: &str, to: &str) -> bool {
        !self.isolated.contains(from)
            && !self.isolated.contains(to)
            && !self.blocked.contains(&(from.to_string(), to.to_string()))
    }
}

fn lock(directory: &Mutex<Directory>) -> Result<std::sync::MutexGuard<'_, Directory>, Error> {
    directory.lock().map_err(|_| Error::Network("poisoned"))
}

/// Registry of the nodes of a cluster.
#[derive(Clone)]
pub struct Network<E: Spawner + Metrics> {
    context: E,
    oracle: simulated::Oracle<PublicKey>,
    directory: Arc<Mutex<Directory>>,
    delivered: Counter,
    dropped: Counter,
}

impl<E: Spawner + Clock + Rng + RNetwork + Metrics> Network<E> {
    /// Starts a simulated network on `context`.
    pub fn new(context: E) -> Self {
        let (network, oracle) = simulated::Network::new(
            context.with_label("p2p"),
            simulated::Config {
                max_size: 16 * 1024 * 1024,
            },
        );
        network.start();

        let delivered = Counter::default();
        let dropped = Counter::default();
        context.register("delivered", "messages delivered", delivered.clone());
        context.register("dropped", "messages dropped", dropped.clone());
        Self {
            context,
            oracle,
            directory: Arc::default(),
            delivered,
            dropped,
        }
    }

    /// Registers `name` at `key` and links it with every registered peer it may
    /// reach.
    pub async fn register(&self, name: &str, key: PublicKey) -> Result<(Sender, Receiver), Error> {
        let (p2p_sender, mut p2p_receiver) = self
            .oracle
            .clone()
            .register(key.clone(), CHANNEL)
            .await
            .map_err(|_| Error::Network("registration failed"))?;

        let (inbox, receiver) = mpsc::unbounded();
        let peers = {
            let mut directory = lock(&self.directory)?;
            if directory.keys.contains_key(name) || directory.names.contains_key(&key) {
                return Err(Error::Network("already registered"));
            }
            directory.keys.insert(name.to_string(), key.clone());
            directory.names.insert(key.clone(), name.to_string());
            directory.inboxes.insert(name.to_string(), inbox.clone());
            directory
                .keys
                .iter()
                .filter(|(peer, _)| peer.as_str() != name)
                .map(|(peer, peer_key)| {
                    (
                        peer_key.clone(),
                        directory.links(name, peer),
                        directory.links(peer, name),
                    )
                })
                .collect::<Vec<_>>()
        };
        let mut oracle = self.oracle.clone();
        for (peer_key, outgoing, incoming) in peers {
            if outgoing {
                oracle
                    .add_link(key.clone(), peer_key.clone(), LINK)
                    .await
                    .map_err(|_| Error::Network("link failed"))?;
            }
            if incoming {
                oracle
                    .add_link(peer_key, key.clone(), LINK)
                    .await
                    .map_err(|_| Error::Network("link failed"))?;
            }
        }

        // Outbound messages leave in the order they are sent
        let (outbox, mut pending) = mpsc::unbounded::<(PublicKey, Bytes)>();
        let mut p2p_sender = p2p_sender;
        let dropped = self.dropped.clone();
        self.context
            .with_label(name)
            .with_label("outbound")
            .spawn(move |_| async move {
                while let Some((recipient, bytes)) = pending.next().await {
                    match p2p_sender
                        .send(Recipients::One(recipient), bytes, false)
                        .await
                    {
                        Ok(sent) if !sent.is_empty() => {}
                        _ => {
                            dropped.inc();
                        }
                    }
                }
            });

        let directory = self.directory.clone();
        self.context
            .with_label(name)
            .with_label("inbound")
            .spawn(move |_| async move {
                while let Ok((origin, bytes)) = p2p_receiver.recv().await {
                    let origin = match directory.lock() {
                        Ok(directory) => directory.names.get(&origin).cloned(),
                        Err(_) => break,
                    };
                    let Some(origin) = origin else {
                        debug!("dropping message from unknown peer");
                        continue;
                    };
                    if inbox.unbounded_send((origin, bytes)).is_err() {
                        break;
                    }
                }
            });

        debug!(name, "registered");
        Ok((
            Sender {
                name: name.to_string(),
                directory: self.directory.clone(),
                outbox,
                delivered: self.delivered.clone(),
                dropped: self.dropped.clone(),
            },
            Receiver { receiver },
        ))
    }

    /// Returns the oracle controlling links.
    pub fn oracle(&self) -> Oracle {
        Oracle {
            oracle: self.oracle.clone(),
            directory: self.directory.clone(),
        }
    }
}

/// Sends messages on behalf of one node.
#[derive(Clone)]
pub struct Sender {
    name: String,
    directory: Arc<Mutex<Directory>>,
    outbox: mpsc::UnboundedSender<(PublicKey, Bytes)>,
    delivered: Counter,
    dropped: Counter,
}

impl Sender {
    /// Name of the node sending.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `message` to `recipient`, returning whether it was handed to the
    /// network.
    ///
    /// Messages to unknown or blocked recipients are dropped. Messages to the
    /// sender itself never leave the node.
    pub fn send(&self, recipient: &str, message: &Message) -> bool {
        let Ok(directory) = self.directory.lock() else {
            return false;
        };
        if !directory.links(&self.name, recipient) {
            trace!(from = self.name, to = recipient, "link blocked");
            self.dropped.inc();
            return false;
        }
        let bytes = message.encode().freeze();
        let sent = if recipient == self.name {
            directory
                .inboxes
                .get(recipient)
                .is_some_and(|inbox| inbox.unbounded_send((self.name.clone(), bytes)).is_ok())
        } else {
            match directory.keys.get(recipient) {
                Some(key) => self.outbox.unbounded_send((key.clone(), bytes)).is_ok(),
                None => {
                    debug!(from = self.name, to = recipient, "unknown recipient");
                    false
                }
            }
        };
        if sent {
            self.delivered.inc();
        } else {
            self.dropped.inc();
        }
        sent
    }
}

/// Receives the messages of one node.
pub struct Receiver {
    receiver: mpsc::UnboundedReceiver<(String, Bytes)>,
}

impl Receiver {
    /// Waits for the next message, returning the name of its sender.
    ///
    /// Fails once the network shuts down. Messages that cannot be decoded are
    /// skipped.
    pub async fn recv(&mut self) -> Result<(String, Message), Error> {
        loop {
            let (sender, bytes) = self
                .receiver
                .next()
                .await
                .ok_or(Error::Network("closed"))?;
            match Message::decode(bytes) {
                Ok(message) => return Ok((sender, message)),
                Err(err) => debug!(sender, ?err, "dropping malformed message"),
            }
        }
    }
}

/// Controls which links deliver messages.
#[derive(Clone)]
pub struct Oracle {
    oracle: simulated::Oracle<PublicKey>,
    directory: Arc<Mutex<Directory>>,
}

impl Oracle {
    fn key(&self, name: &str) -> Option<PublicKey> {
        self.directory.lock().ok()?.keys.get(name).cloned()
    }

    async fn unlink(&mut self, from: &str, to: &str) {
        let (Some(from_key), Some(to_key)) = (self.key(from), self.key(to)) else {
            return;
        };
        if self.oracle.remove_link(from_key, to_key).await.is_err() {
            trace!(from, to, "link already removed");
        }
    }

    /// Drops every message sent from `from` to `to`.
    pub async fn block(&mut self, from: &str, to: &str) {
        if let Ok(mut directory) = self.directory.lock() {
            directory.blocked.insert((from.to_string(), to.to_string()));
        }
        self.unlink(from, to).await;
    }

    pub async fn unblock(&mut self, from: &str, to: &str) {
        let restore = match self.directory.lock() {
            Ok(mut directory) => {
                directory.blocked.remove(&(from.to_string(), to.to_string()));
                directory.links(from, to)
            }
            Err(_) => false,
        };
        if !restore {
            return;
        }
        if let (Some(from_key), Some(to_key)) = (self.key(from), self.key(to)) {
            if self.oracle.add_link(from_key, to_key, LINK).await.is_err() {
                trace!(from, to, "link already present");
            }
        }
    }

    /// Drops every message sent to or from `name`.
    pub async fn isolate(&mut self, name: &str) {
        let peers = match self.directory.lock() {
            Ok(mut directory) => {
                directory.isolated.insert(name.to_string());
                directory
                    .keys
                    .keys()
                    .filter(|peer| peer.as_str() != name)
                    .cloned()
                    .collect::<Vec<_>>()
            }
            Err(_) => return,
        };
        for peer in peers {
            self.unlink(name, &peer).await;
            self.unlink(&peer, name).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use commonware_cryptography::{ed25519::PrivateKey, PrivateKeyExt as _, Signer as _};
    use commonware_macros::{select, test_traced};
    use commonware_runtime::{deterministic, Runner};
    use sha2::{Digest, Sha256};
    use std::time::Duration;

    /// Overlay key of a node that has no roster identity.
    pub(crate) fn key(name: &str) -> PublicKey {
        let digest = Sha256::digest(name.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        PrivateKey::from_seed(u64::from_le_bytes(seed)).public_key()
    }

    /// Registers `name` at its derived key.
    pub(crate) async fn join<E>(network: &Network<E>, name: &str) -> (Sender, Receiver)
    where
        E: Spawner + Clock + Rng + RNetwork + Metrics,
    {
        network.register(name, key(name)).await.unwrap()
    }

    #[test]
    fn test_topology() {
        assert_eq!(children(0, 3), vec![1, 2]);
        assert_eq!(children(1, 3), Vec::<usize>::new());
        assert_eq!(children(1, 5), vec![3, 4]);
        assert_eq!(children(0, 1), Vec::<usize>::new());
        assert_eq!(parent(0), None);
        assert_eq!(parent(4), Some(1));
        assert_eq!(ring_next(2, 3), 0);
        assert_eq!(ring_next(0, 1), 0);
    }

    #[test_traced]
    fn test_links() {
        let executor = deterministic::Runner::timed(Duration::from_secs(10));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (a, mut a_receiver) = join(&network, "a").await;
            let (_, mut b) = join(&network, "b").await;
            assert!(network.register("b", key("c")).await.is_err());

            assert!(a.send("b", &Message::Ack));
            assert_eq!(b.recv().await.unwrap(), ("a".to_string(), Message::Ack));

            // Messages to self stay local
            assert!(a.send("a", &Message::GetGenesis));
            assert_eq!(
                a_receiver.recv().await.unwrap(),
                ("a".to_string(), Message::GetGenesis)
            );

            assert!(!a.send("c", &Message::Ack));
            let mut oracle = network.oracle();
            oracle.block("a", "b").await;
            assert!(!a.send("b", &Message::GetGenesis));
            oracle.unblock("a", "b").await;
            assert!(a.send("b", &Message::GetLatestBlock));
            assert_eq!(b.recv().await.unwrap().1, Message::GetLatestBlock);

            oracle.isolate("a").await;
            assert!(!a.send("b", &Message::Ack));
        });
    }

    #[test_traced]
    fn test_late_peer_respects_blocks() {
        let executor = deterministic::Runner::timed(Duration::from_secs(10));
        executor.start(|context| async move {
            let network = Network::new(context.with_label("network"));
            let (a, _) = join(&network, "a").await;
            let mut oracle = network.oracle();
            oracle.isolate("b").await;

            // Links to a peer isolated before it joins are never created
            let (b, mut b_receiver) = join(&network, "b").await;
            let (c, mut c_receiver) = join(&network, "c").await;
            assert!(!a.send("b", &Message::Ack));
            assert!(!b.send("c", &Message::Ack));
            assert!(a.send("c", &Message::Ack));
            assert_eq!(c_receiver.recv().await.unwrap().0, "a");
            assert!(c.send("a", &Message::Ack));
            select! {
                _ = b_receiver.recv() => {
                    panic!("isolated peer received a message")
                },
                _ = context.sleep(Duration::from_secs(1)) => {},
            }
        });
    }
}
