/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Memory shared between the chains hosted by one node, and the commit point for cross-chain
//! atomic requests.
//!
//! # Dual commit
//!
//! A block that carries [`AtomicRequests`] must have its local effects and its cross-chain effects land
//! together or not at all. [`SharedMemory::apply`] is therefore the single actor that physically
//! writes the block's [`LocalBatch`]: it validates every request first, and only if all of them can be
//! applied does it write the batch and then mutate the shared ledger, without releasing its lock in
//! between.
//!
//! # Layout of the ledger
//!
//! For every ordered pair of chains `(from, to)`, the ledger holds the [`Element`]s that `from` has
//! put and that `to` has not yet removed. A put request made by chain `A` for peer `B` adds to
//! `(A, B)`; a remove request made by `A` for peer `B` consumes from `(B, A)`.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::{self, Display},
    sync::{Arc, Mutex},
};

use crate::{
    state::{persistent::LocalBatch, pluggables::KVStore},
    types::{
        data_types::ChainID,
        update_sets::{AtomicRequests, Element},
    },
};

pub trait SharedMemory<K: KVStore>: Send {
    /// Atomically write `batch` and apply `requests`. On error, neither is observable.
    fn apply(&self, requests: &AtomicRequests, batch: LocalBatch<K>)
        -> Result<(), SharedMemoryError>;
}

#[derive(Default)]
struct Ledger(HashMap<(ChainID, ChainID), BTreeMap<Vec<u8>, Element>>);

impl Ledger {
    fn contains(&self, from: ChainID, to: ChainID, key: &[u8]) -> bool {
        self.0
            .get(&(from, to))
            .is_some_and(|elements| elements.contains_key(key))
    }
}

/// Process-wide shared memory. Clones share the same ledger.
///
/// Every application, from any chain, takes the same lock, so concurrent applications that touch the
/// same peer are totally ordered.
#[derive(Clone, Default)]
pub struct InMemorySharedMemory {
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemorySharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the view of this shared memory from `chain`.
    pub fn for_chain(&self, chain: ChainID) -> SharedMemoryHandle {
        SharedMemoryHandle {
            this_chain: chain,
            ledger: self.ledger.clone(),
        }
    }
}

/// Shared memory as seen from one chain.
#[derive(Clone)]
pub struct SharedMemoryHandle {
    this_chain: ChainID,
    ledger: Arc<Mutex<Ledger>>,
}

impl SharedMemoryHandle {
    pub fn chain_id(&self) -> ChainID {
        self.this_chain
    }

    /// Get the values of the elements with `keys` that `peer` has made available to this chain.
    pub fn get(&self, peer: ChainID, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, SharedMemoryError> {
        let ledger = self.ledger.lock().map_err(|_| SharedMemoryError::Poisoned)?;
        let elements = ledger.0.get(&(peer, self.this_chain));
        keys.iter()
            .map(|key| {
                elements
                    .and_then(|elements| elements.get(key))
                    .map(|element| element.value.clone())
                    .ok_or_else(|| SharedMemoryError::MissingElement {
                        peer,
                        key: key.clone(),
                    })
            })
            .collect()
    }

    /// Get every element `peer` has made available to this chain that has at least one of `traits`,
    /// in key order.
    pub fn indexed(
        &self,
        peer: ChainID,
        traits: &[Vec<u8>],
    ) -> Result<Vec<Element>, SharedMemoryError> {
        let ledger = self.ledger.lock().map_err(|_| SharedMemoryError::Poisoned)?;
        Ok(ledger
            .0
            .get(&(peer, self.this_chain))
            .map(|elements| {
                elements
                    .values()
                    .filter(|element| element.traits.iter().any(|t| traits.contains(t)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn validate(&self, ledger: &Ledger, requests: &AtomicRequests) -> Result<(), SharedMemoryError> {
        for (peer, requests) in requests {
            let peer = *peer;
            if peer == self.this_chain {
                return Err(SharedMemoryError::SelfTarget {
                    chain: self.this_chain,
                });
            }

            let mut puts = HashSet::new();
            for element in &requests.put_requests {
                if ledger.contains(self.this_chain, peer, &element.key) || !puts.insert(&element.key)
                {
                    return Err(SharedMemoryError::DuplicatePut {
                        peer,
                        key: element.key.clone(),
                    });
                }
            }

            let mut removes = HashSet::new();
            for key in &requests.remove_requests {
                if !ledger.contains(peer, self.this_chain, key) || !removes.insert(key) {
                    return Err(SharedMemoryError::MissingElement {
                        peer,
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl<K: KVStore> SharedMemory<K> for SharedMemoryHandle {
    fn apply(
        &self,
        requests: &AtomicRequests,
        batch: LocalBatch<K>,
    ) -> Result<(), SharedMemoryError> {
        let mut ledger = self.ledger.lock().map_err(|_| SharedMemoryError::Poisoned)?;

        self.validate(&ledger, requests)?;

        batch.write();

        for (peer, requests) in requests {
            let peer = *peer;
            if let Some(inbound) = ledger.0.get_mut(&(peer, self.this_chain)) {
                for key in &requests.remove_requests {
                    inbound.remove(key);
                }
            }
            if !requests.put_requests.is_empty() {
                let outbound = ledger.0.entry((self.this_chain, peer)).or_default();
                for element in &requests.put_requests {
                    outbound.insert(element.key.clone(), element.clone());
                }
            }
            log::debug!(
                "chain {} applied {} puts and {} removes on shared memory with chain {}",
                self.this_chain,
                requests.put_requests.len(),
                requests.remove_requests.len(),
                peer
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedMemoryError {
    /// A chain addressed atomic requests to itself.
    SelfTarget { chain: ChainID },

    /// An element with `key` is already shared with `peer`, or is put twice by the same requests.
    DuplicatePut { peer: ChainID, key: Vec<u8> },

    /// `peer` has not made an element with `key` available, or it is removed twice by the same
    /// requests.
    MissingElement { peer: ChainID, key: Vec<u8> },

    /// Another thread panicked while holding the ledger's lock.
    Poisoned,
}

impl Display for SharedMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedMemoryError::SelfTarget { chain } => {
                write!(f, "chain {} addressed atomic requests to itself", chain)
            }
            SharedMemoryError::DuplicatePut { peer, key } => {
                write!(f, "duplicate put of key {:?} to chain {}", key, peer)
            }
            SharedMemoryError::MissingElement { peer, key } => {
                write!(f, "no element with key {:?} from chain {}", key, peer)
            }
            SharedMemoryError::Poisoned => write!(f, "shared memory lock is poisoned"),
        }
    }
}

impl std::error::Error for SharedMemoryError {}
