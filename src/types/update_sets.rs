//! Types that store updates produced during block verification and materialized when a block is
//! accepted.

use std::{
    collections::{hash_map, hash_set, HashMap, HashSet},
    hash::Hash,
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{AccountID, ChainID, Timestamp};

/// Generic set of key-value updates that are applied when a particular block is accepted.
///
/// # Uniqueness of Key between `inserts` and `deletes`
///
/// A key is in at most one of `inserts` and `deletes`: scheduling one cancels the other.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateSet<K: Eq + Hash, V> {
    inserts: HashMap<K, V>,
    deletes: HashSet<K>,
}

impl<K: Eq + Hash, V> UpdateSet<K, V> {
    /// Create a new `UpdateSet` with empty `inserts` and `deletes`.
    pub fn new() -> Self {
        Self {
            inserts: HashMap::new(),
            deletes: HashSet::new(),
        }
    }

    /// Schedule the insertion of a `key`-`value` pair.
    ///
    /// This cancels the deletion of `key`, if it has been scheduled using [`delete`](Self::delete).
    pub fn insert(&mut self, key: K, value: V) {
        self.deletes.remove(&key);
        self.inserts.insert(key, value);
    }

    /// Schedule the deletion of `key`.
    ///
    /// This cancels the insertion of `key`, if it has been scheduled using [`insert`](Self::insert).
    pub fn delete(&mut self, key: K) {
        self.inserts.remove(&key);
        self.deletes.insert(key);
    }

    pub fn get_insert(&self, key: &K) -> Option<&V> {
        self.inserts.get(key)
    }

    pub fn contains_delete(&self, key: &K) -> bool {
        self.deletes.contains(key)
    }

    pub fn inserts(&self) -> hash_map::Iter<K, V> {
        self.inserts.iter()
    }

    pub fn deletes(&self) -> hash_set::Iter<K> {
        self.deletes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}

/// Set of key-value updates to the VM's app state (validator records, subnets, UTXOs and the like).
pub type AppStateUpdates = UpdateSet<Vec<u8>, Vec<u8>>;

/// The pending diff of a verified block.
///
/// A `StateDiff` is cheap and safe to construct as many times as needed, but **applying** it is not
/// idempotent: balance changes are deltas against whatever the balance is at the time of application.
/// This is why the [`Acceptor`](crate::acceptor::Acceptor) evicts a block's execution state as soon as
/// its diff has been applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDiff {
    app_state_updates: AppStateUpdates,
    balance_changes: Vec<(AccountID, i128)>,
    chain_time: Option<Timestamp>,
}

impl StateDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.app_state_updates.insert(key, value)
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.app_state_updates.delete(key)
    }

    /// Schedule `amount` (which may be negative) to be added to `account`'s balance.
    pub fn change_balance(&mut self, account: AccountID, amount: i128) {
        self.balance_changes.push((account, amount))
    }

    /// Schedule a transfer of `amount` from `from` to `to`.
    pub fn transfer(&mut self, from: AccountID, to: AccountID, amount: u64) {
        self.change_balance(from, -(amount as i128));
        self.change_balance(to, amount as i128);
    }

    pub fn set_chain_time(&mut self, timestamp: Timestamp) {
        self.chain_time = Some(timestamp)
    }

    pub fn app_state_updates(&self) -> &AppStateUpdates {
        &self.app_state_updates
    }

    pub fn balance_changes(&self) -> &[(AccountID, i128)] {
        &self.balance_changes
    }

    pub fn chain_time(&self) -> Option<Timestamp> {
        self.chain_time
    }
}

/// A value put into shared memory, together with the traits it can be looked up by.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Element {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub traits: Vec<Vec<u8>>,
}

/// The operations a block performs on the shared memory it has with one peer chain.
///
/// - `put_requests` make elements available to the peer chain.
/// - `remove_requests` consume elements the peer chain previously made available to this chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Requests {
    pub remove_requests: Vec<Vec<u8>>,
    pub put_requests: Vec<Element>,
}

impl Requests {
    pub fn is_empty(&self) -> bool {
        self.remove_requests.is_empty() && self.put_requests.is_empty()
    }
}

/// Mapping from destination (peer) chain to the batch of operations on the shared memory with it.
pub type AtomicRequests = HashMap<ChainID, Requests>;
