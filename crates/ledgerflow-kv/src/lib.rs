//! Ledgerflow KV
//!
//! A partitioned key-value store with conditional writes. Records are
//! addressed by a partition key and a range key, and writers coordinate
//! through `put_if_absent` and `compare_and_swap` instead of locks.
//!
//! The trait is async to support networked backends.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

/// Error type for key-value operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
  /// The backend could not be reached or rejected the request.
  #[error("kv backend error: {0}")]
  Backend(String),

  #[error("kv lock poisoned")]
  Poisoned,
}

/// Boxed future returned by [`KvStore`] operations.
pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KvError>> + Send + 'a>>;

/// Trait for partitioned key-value storage.
pub trait KvStore: Send + Sync {
  /// Get a value.
  fn get(&self, partition: &str, range: &str) -> KvFuture<'_, Option<String>>;

  /// Write a value unless the key already exists. Returns whether it was written.
  fn put_if_absent(&self, partition: &str, range: &str, value: String) -> KvFuture<'_, bool>;

  /// Replace the value only if it still equals `expected`.
  ///
  /// `None` deletes the key. Returns whether the swap happened.
  fn compare_and_swap(
    &self,
    partition: &str,
    range: &str,
    expected: &str,
    value: Option<String>,
  ) -> KvFuture<'_, bool>;

  /// All `(range, value)` pairs in a partition, ordered by range key.
  fn scan(&self, partition: &str) -> KvFuture<'_, Vec<(String, String)>>;
}

/// In-memory KV store implementation.
///
/// Clones share the same data. Suitable for single-process use or testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvStore {
  data: Arc<Mutex<BTreeMap<(String, String), String>>>,
}

impl InMemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<(String, String), String>>, KvError> {
    self.data.lock().map_err(|_| KvError::Poisoned)
  }
}

fn key(partition: &str, range: &str) -> (String, String) {
  (partition.to_string(), range.to_string())
}

impl KvStore for InMemoryKvStore {
  fn get(&self, partition: &str, range: &str) -> KvFuture<'_, Option<String>> {
    let result = self
      .lock()
      .map(|data| data.get(&key(partition, range)).cloned());
    Box::pin(async move { result })
  }

  fn put_if_absent(&self, partition: &str, range: &str, value: String) -> KvFuture<'_, bool> {
    let result = self.lock().map(|mut data| {
      let key = key(partition, range);
      if data.contains_key(&key) {
        false
      } else {
        data.insert(key, value);
        true
      }
    });
    Box::pin(async move { result })
  }

  fn compare_and_swap(
    &self,
    partition: &str,
    range: &str,
    expected: &str,
    value: Option<String>,
  ) -> KvFuture<'_, bool> {
    let result = self.lock().map(|mut data| {
      let key = key(partition, range);
      if data.get(&key).map(String::as_str) != Some(expected) {
        return false;
      }
      match value {
        Some(value) => data.insert(key, value),
        None => data.remove(&key),
      };
      true
    });
    Box::pin(async move { result })
  }

  fn scan(&self, partition: &str) -> KvFuture<'_, Vec<(String, String)>> {
    let result = self.lock().map(|data| {
      data
        .iter()
        .filter(|((p, _), _)| p == partition)
        .map(|((_, range), value)| (range.clone(), value.clone()))
        .collect()
    });
    Box::pin(async move { result })
  }
}
