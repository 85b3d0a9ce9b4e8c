//! A simple, volatile, in-memory implementation of [`KVStore`].
//!
//! Besides the current contents, `MemDB` keeps the history of every write it performed, in order, so
//! that tests can observe the order in which durable variables changed.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use block_acceptor::state::{
    pluggables::{KVGet, KVStore, WriteBatch},
    variables,
};

#[derive(Default)]
struct Inner {
    map: HashMap<Vec<u8>, Vec<u8>>,
    history: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    batches_written: usize,
}

/// An in-memory implementation of [`KVStore`]. Clones share the same storage.
#[derive(Clone, Default)]
pub(crate) struct MemDB(Arc<Mutex<Inner>>);

impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB::default()
    }

    /// Number of write batches written so far.
    pub(crate) fn batches_written(&self) -> usize {
        self.0.lock().unwrap().batches_written
    }

    /// Every value ever written to `key`, oldest first. `None` marks a deletion.
    pub(crate) fn writes_to(&self, key: &[u8]) -> Vec<Option<Vec<u8>>> {
        self.0
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|(k, _)| k.as_slice() == key)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Every value ever written to the Last Accepted variable, oldest first.
    pub(crate) fn last_accepted_writes(&self) -> Vec<Vec<u8>> {
        self.writes_to(&variables::LAST_ACCEPTED)
            .into_iter()
            .flatten()
            .collect()
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) {
        let mut inner = self.0.lock().unwrap();
        for (key, value) in wb.0 {
            match &value {
                Some(value) => {
                    inner.map.insert(key.clone(), value.clone());
                }
                None => {
                    inner.map.remove(&key);
                }
            }
            inner.history.push((key, value));
        }
        inner.batches_written += 1;
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().map.get(key).cloned()
    }
}

/// A write batch that remembers the order of its operations.
pub(crate) struct MemWriteBatch(Vec<(Vec<u8>, Option<Vec<u8>>)>);

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch(Vec::new())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.0.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.0.push((key.to_vec(), None));
    }
}
