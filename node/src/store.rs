//! Bucketed key-value store of verifying nodes.
//!
//! # Format
//!
//! Records live in a [Metadata] partition of the runtime [Storage], each under the
//! SHA-256 digest of its bucket and key:
//!
//! ```text
//! +--------------------+--------+-----+
//! | Bucket length (u32) | Bucket | Key |
//! +--------------------+--------+-----+
//! ```
//!
//! The all-zero digest holds the index of every bucket and the keys it contains,
//! which is what makes buckets listable in key order.

use crate::{
    wire::{read_string, string_size, write_string},
    Error,
};
use bytes::Buf;
use commonware_codec::{EncodeSize, RangeCfg, Read, Write};
use commonware_cryptography::sha256::Digest;
use commonware_runtime::{Clock, Metrics, Spawner, Storage};
use commonware_storage::metadata::{self, Metadata};
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Maximum length of a bucket or key.
const MAX_KEY: usize = 4096;

const INDEX: [u8; 32] = [0; 32];

/// Configuration for a [Store].
#[derive(Clone, Debug)]
pub struct Config {
    /// The [Storage] partition holding the records.
    pub partition: String,
}

type Index = BTreeMap<String, BTreeSet<String>>;

fn storage<E: std::fmt::Display>(err: E) -> Error {
    Error::StorageFailure(err.to_string())
}

fn closed() -> Error {
    Error::StorageFailure("store closed".into())
}

fn record(bucket: &str, key: &str) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update((bucket.len() as u32).to_be_bytes());
    hasher.update(bucket.as_bytes());
    hasher.update(key.as_bytes());
    Digest::from(<[u8; 32]>::from(hasher.finalize()))
}

fn encode_index(index: &Index) -> Vec<u8> {
    let size = index.len().encode_size()
        + index
            .iter()
            .map(|(bucket, keys)| {
                string_size(bucket)
                    + keys.len().encode_size()
                    + keys.iter().map(|key| string_size(key)).sum::<usize>()
            })
            .sum::<usize>();
    let mut buf = Vec::with_capacity(size);
    index.len().write(&mut buf);
    for (bucket, keys) in index {
        write_string(bucket, &mut buf);
        keys.len().write(&mut buf);
        for key in keys {
            write_string(key, &mut buf);
        }
    }
    buf
}

fn decode_index(mut buf: &[u8]) -> Result<Index, Error> {
    let count = usize::read_cfg(&mut buf, &RangeCfg::from(..)).map_err(storage)?;
    let mut index = Index::new();
    for _ in 0..count {
        let bucket = read_string(&mut buf, MAX_KEY).map_err(storage)?;
        let len = usize::read_cfg(&mut buf, &RangeCfg::from(..)).map_err(storage)?;
        let mut keys = BTreeSet::new();
        for _ in 0..len {
            keys.insert(read_string(&mut buf, MAX_KEY).map_err(storage)?);
        }
        index.insert(bucket, keys);
    }
    if buf.has_remaining() {
        return Err(Error::StorageFailure("trailing bytes in index".into()));
    }
    Ok(index)
}

/// A bucketed key-value store persisted in runtime [Storage].
///
/// Writes are buffered until [Store::sync].
pub struct Store<E: Spawner + Clock + Storage + Metrics> {
    metadata: Option<Metadata<E, Digest, Vec<u8>>>,
    index: Index,
}

impl<E: Spawner + Clock + Storage + Metrics> Store<E> {
    /// Opens (or creates) the store in `cfg.partition`.
    pub async fn init(context: E, cfg: Config) -> Result<Self, Error> {
        let metadata: Metadata<E, Digest, Vec<u8>> = Metadata::init(
            context.with_label("metadata"),
            metadata::Config {
                partition: cfg.partition.clone(),
                codec_config: ((0..).into(), ()),
            },
        )
        .await
        .map_err(storage)?;
        let index = match metadata.get(&Digest::from(INDEX)) {
            Some(bytes) => decode_index(bytes)?,
            None => Index::new(),
        };
        debug!(partition = cfg.partition, buckets = index.len(), "opened store");
        Ok(Self {
            metadata: Some(metadata),
            index,
        })
    }

    /// Stores `value` under `key` in `bucket`, replacing any previous value.
    pub fn put(&mut self, bucket: &str, key: &str, value: &[u8]) -> Result<(), Error> {
        let metadata = self.metadata.as_mut().ok_or_else(closed)?;
        if bucket.len() > MAX_KEY || key.len() > MAX_KEY {
            return Err(Error::StorageFailure("key too long".into()));
        }
        metadata.put(record(bucket, key), value.to_vec());
        if self
            .index
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string())
        {
            metadata.put(Digest::from(INDEX), encode_index(&self.index));
        }
        Ok(())
    }

    pub fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let metadata = self.metadata.as_ref().ok_or_else(closed)?;
        Ok(metadata.get(&record(bucket, key)).cloned())
    }

    /// Returns every record of `bucket`, ordered by key.
    pub fn list(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>, Error> {
        let metadata = self.metadata.as_ref().ok_or_else(closed)?;
        let Some(keys) = self.index.get(bucket) else {
            return Ok(Vec::new());
        };
        keys.iter()
            .map(|key| {
                metadata
                    .get(&record(bucket, key))
                    .map(|value| (key.clone(), value.clone()))
                    .ok_or_else(|| Error::StorageFailure(format!("missing record {bucket}/{key}")))
            })
            .collect()
    }

    /// Persists all pending writes.
    pub async fn sync(&mut self) -> Result<(), Error> {
        let metadata = self.metadata.as_mut().ok_or_else(closed)?;
        metadata.sync().await.map_err(storage)
    }

    /// Closes the store, removing its partition if `delete` is set.
    pub async fn close(&mut self, delete: bool) -> Result<(), Error> {
        let metadata = self.metadata.take().ok_or_else(closed)?;
        self.index.clear();
        if delete {
            metadata.destroy().await.map_err(storage)
        } else {
            metadata.close().await.map_err(storage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    fn config() -> Config {
        Config {
            partition: "store".into(),
        }
    }

    #[test_traced]
    fn test_reopen() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut store = Store::init(context.with_label("first"), config())
                .await
                .unwrap();
            store.put("b", "2", b"two").unwrap();
            store.put("b", "1", b"one").unwrap();
            store.put("a", "1", b"other").unwrap();
            store.put("b", "2", b"deux").unwrap();
            assert_eq!(store.get("b", "2").unwrap(), Some(b"deux".to_vec()));
            store.sync().await.unwrap();
            store.close(false).await.unwrap();

            let store = Store::init(context.with_label("second"), config())
                .await
                .unwrap();
            assert_eq!(
                store.list("b").unwrap(),
                vec![
                    ("1".to_string(), b"one".to_vec()),
                    ("2".to_string(), b"deux".to_vec())
                ]
            );
            assert_eq!(store.get("a", "1").unwrap(), Some(b"other".to_vec()));
            assert_eq!(store.get("a", "2").unwrap(), None);
            assert!(store.list("c").unwrap().is_empty());
        });
    }

    #[test_traced]
    fn test_buckets_do_not_collide() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut store = Store::init(context, config()).await.unwrap();
            store.put("ab", "c", b"first").unwrap();
            store.put("a", "bc", b"second").unwrap();
            assert_eq!(store.get("ab", "c").unwrap(), Some(b"first".to_vec()));
            assert_eq!(store.get("a", "bc").unwrap(), Some(b"second".to_vec()));
        });
    }

    #[test_traced]
    fn test_delete() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut store = Store::init(context.with_label("first"), config())
                .await
                .unwrap();
            store.put("b", "1", b"one").unwrap();
            store.sync().await.unwrap();
            store.close(true).await.unwrap();

            // Closed stores refuse every operation
            assert!(store.put("b", "2", b"two").is_err());
            assert!(store.get("b", "1").is_err());
            assert!(store.list("b").is_err());
            assert!(store.sync().await.is_err());
            assert!(store.close(false).await.is_err());

            let store = Store::init(context.with_label("second"), config())
                .await
                .unwrap();
            assert_eq!(store.get("b", "1").unwrap(), None);
            assert!(store.list("b").unwrap().is_empty());
        });
    }
}
