/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persistent state manager: durable records of accepted blocks and the VM state they produced.
//!
//! # Staging and committing
//!
//! Setters such as [`set_last_accepted`](PersistentState::set_last_accepted) and
//! [`apply_diff`](PersistentState::apply_diff) never touch the backing [`KVStore`]. They append a
//! [`StagedWrite`] to a list kept in call order and update an in-memory overlay, so that getters on
//! `PersistentState` read their own writes. Staged writes become durable in one of two ways:
//! 1. [`commit`](PersistentState::commit) serializes them into a single write batch and writes it.
//! 2. [`commit_batch`](PersistentState::commit_batch) serializes them into a [`ScopedBatch`], whose
//!    [`LocalBatch`] can be handed to another actor (the [shared memory](crate::shared_memory)) to be
//!    written together with effects of its own. Dropping the `ScopedBatch` without calling
//!    [`finalize`](ScopedBatch::finalize) aborts every staged write.
//!
//! [`abort`](PersistentState::abort) discards staged writes and the overlay, leaving the durable
//! state exactly as it was after the last successful commit.

use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use borsh::BorshSerialize;

use crate::types::{
    block::{Block, Status},
    data_types::{AccountID, BlockHeight, BlockID, Timestamp},
    update_sets::StateDiff,
};

use super::{
    pluggables::{KVGet, KVGetError, KVStore, Key, WriteBatch},
    variables::{self, concat},
};

/// Read and write handle into the durable state of one chain.
pub struct PersistentState<K: KVStore> {
    kv_store: K,
    staged: Vec<StagedWrite>,
    overlay: Overlay,
}

/// A write that has been requested but is not yet durable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StagedWrite {
    LastAccepted(BlockID),
    Height(BlockHeight),
    BlockRecord(Block, Status),
    AppStateInsert(Vec<u8>, Vec<u8>),
    AppStateDelete(Vec<u8>),
    Balance(AccountID, u64),
    ChainTime(Timestamp),
}

/// Values of staged writes, kept for reads-your-writes.
#[derive(Default)]
struct Overlay {
    last_accepted: Option<BlockID>,
    height: Option<BlockHeight>,
    app_state: HashMap<Vec<u8>, Option<Vec<u8>>>,
    balances: HashMap<AccountID, u64>,
    chain_time: Option<Timestamp>,
}

/// Lifecycle methods.
impl<K: KVStore> PersistentState<K> {
    pub fn new(kv_store: K) -> Self {
        PersistentState {
            kv_store,
            staged: Vec::new(),
            overlay: Overlay::default(),
        }
    }

    /// Record `genesis` as the accepted block at height 0 if the backing store is empty.
    ///
    /// Returns whether anything was written. Calling this on an already initialized store is a no-op,
    /// so a restarting node can call it unconditionally.
    pub fn initialize(&mut self, genesis: &Block) -> Result<bool, StateError> {
        if self.kv_store.last_accepted()?.is_some() {
            return Ok(false);
        }

        let mut wb = StateWriteBatch::new();
        wb.set_block_record(genesis, Status::Accepted)?;
        wb.set_last_accepted(&genesis.id)?;
        wb.set_height(genesis.height)?;
        if let Some(timestamp) = genesis.generation.timestamp() {
            wb.set_chain_time(timestamp)?;
        }
        self.kv_store.write(wb.0);

        Ok(true)
    }

    /// Get a reference to the backing store. Reads through it only see durable state.
    pub fn kv_store(&self) -> &K {
        &self.kv_store
    }

    pub fn has_staged_writes(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn staged_writes(&self) -> &[StagedWrite] {
        &self.staged
    }
}

/// Setters. None of these are durable until the next successful commit.
impl<K: KVStore> PersistentState<K> {
    pub fn set_last_accepted(&mut self, block: BlockID) {
        self.overlay.last_accepted = Some(block);
        self.staged.push(StagedWrite::LastAccepted(block));
    }

    pub fn set_height(&mut self, height: BlockHeight) {
        self.overlay.height = Some(height);
        self.staged.push(StagedWrite::Height(height));
    }

    /// Record `block` in the block index with `status`. Accepted blocks are also indexed by height.
    pub fn add_block_record(&mut self, block: &Block, status: Status) {
        self.staged
            .push(StagedWrite::BlockRecord(block.clone(), status));
    }

    /// Materialize the mutations described by `diff` into the staged state.
    ///
    /// This is **not** idempotent: every balance change is applied on top of the balance as it is at
    /// the time of the call, including balance changes staged by earlier calls.
    ///
    /// If any balance change would take a balance below zero or above `u64::MAX`, nothing in `diff`
    /// is staged.
    pub fn apply_diff(&mut self, diff: &StateDiff) -> Result<(), StateError> {
        // Compute every resulting balance before staging anything.
        let mut new_balances: Vec<(AccountID, u64)> = Vec::new();
        for (account, change) in diff.balance_changes() {
            let current = match new_balances.iter().rev().find(|(a, _)| a == account) {
                Some((_, balance)) => *balance,
                None => self.balance(account)?,
            };
            let updated = (current as i128).checked_add(*change).ok_or_else(|| {
                StateError::BalanceOverflow {
                    account: account.clone(),
                    balance: current,
                    change: *change,
                }
            })?;
            if updated < 0 {
                return Err(StateError::BalanceUnderflow {
                    account: account.clone(),
                    balance: current,
                    change: *change,
                });
            }
            let updated = u64::try_from(updated).map_err(|_| StateError::BalanceOverflow {
                account: account.clone(),
                balance: current,
                change: *change,
            })?;
            new_balances.push((account.clone(), updated));
        }

        let app_state_updates = diff.app_state_updates();
        for (key, value) in app_state_updates.inserts() {
            self.overlay
                .app_state
                .insert(key.clone(), Some(value.clone()));
            self.staged
                .push(StagedWrite::AppStateInsert(key.clone(), value.clone()));
        }
        for key in app_state_updates.deletes() {
            self.overlay.app_state.insert(key.clone(), None);
            self.staged.push(StagedWrite::AppStateDelete(key.clone()));
        }

        for (account, balance) in new_balances {
            self.overlay.balances.insert(account.clone(), balance);
            self.staged.push(StagedWrite::Balance(account, balance));
        }

        if let Some(timestamp) = diff.chain_time() {
            self.overlay.chain_time = Some(timestamp);
            self.staged.push(StagedWrite::ChainTime(timestamp));
        }

        Ok(())
    }
}

/// Committing and aborting.
impl<K: KVStore> PersistentState<K> {
    /// Atomically write every staged write into the backing store.
    pub fn commit(&mut self) -> Result<(), StateError> {
        let wb = self.serialize_staged()?;
        self.kv_store.write(wb.0);
        self.clear_staged();
        Ok(())
    }

    /// Serialize every staged write into a batch that the caller must either
    /// [`finalize`](ScopedBatch::finalize) or drop (which aborts).
    ///
    /// If serialization fails, the staged writes are aborted before returning the error.
    pub fn commit_batch(&mut self) -> Result<ScopedBatch<'_, K>, StateError> {
        let wb = match self.serialize_staged() {
            Ok(wb) => wb,
            Err(err) => {
                self.abort();
                return Err(err);
            }
        };
        let batch = LocalBatch {
            kv_store: self.kv_store.clone(),
            write_batch: wb.0,
        };
        Ok(ScopedBatch {
            state: self,
            batch: Some(batch),
            finalized: false,
        })
    }

    /// Discard every staged write. Safe to call when nothing is staged.
    pub fn abort(&mut self) {
        if self.has_staged_writes() {
            log::debug!("aborting {} staged writes", self.staged.len());
        }
        self.clear_staged();
    }

    fn clear_staged(&mut self) {
        self.staged.clear();
        self.overlay = Overlay::default();
    }

    fn serialize_staged(&self) -> Result<StateWriteBatch<K::WriteBatch>, StateError> {
        let mut wb = StateWriteBatch::new();
        for write in &self.staged {
            match write {
                StagedWrite::LastAccepted(block) => wb.set_last_accepted(block)?,
                StagedWrite::Height(height) => wb.set_height(*height)?,
                StagedWrite::BlockRecord(block, status) => wb.set_block_record(block, *status)?,
                StagedWrite::AppStateInsert(key, value) => wb.set_app_state(key, value),
                StagedWrite::AppStateDelete(key) => wb.delete_app_state(key),
                StagedWrite::Balance(account, balance) => wb.set_balance(account, *balance)?,
                StagedWrite::ChainTime(timestamp) => wb.set_chain_time(*timestamp)?,
            }
        }
        Ok(wb)
    }
}

/// State getters. These see staged writes.
impl<K: KVStore> PersistentState<K> {
    pub fn last_accepted(&self) -> Result<BlockID, StateError> {
        match self.overlay.last_accepted {
            Some(block) => Ok(block),
            None => self
                .kv_store
                .last_accepted()?
                .ok_or(StateError::NotInitialized),
        }
    }

    pub fn height(&self) -> Result<BlockHeight, StateError> {
        match self.overlay.height {
            Some(height) => Ok(height),
            None => self.kv_store.height()?.ok_or(StateError::NotInitialized),
        }
    }

    pub fn app_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.overlay.app_state.get(key) {
            Some(value) => value.clone(),
            None => self.kv_store.app_state(key),
        }
    }

    pub fn balance(&self, account: &[u8]) -> Result<u64, StateError> {
        match self.overlay.balances.get(account) {
            Some(balance) => Ok(*balance),
            None => Ok(self.kv_store.balance(account)?),
        }
    }

    pub fn chain_time(&self) -> Result<Option<Timestamp>, StateError> {
        match self.overlay.chain_time {
            Some(timestamp) => Ok(Some(timestamp)),
            None => Ok(self.kv_store.chain_time()?),
        }
    }

    /// Get `block`'s durable status. Staged block records are not visible here.
    pub fn block_status(&self, block: &BlockID) -> Result<Option<Status>, StateError> {
        Ok(self.kv_store.block_status(block)?)
    }

    pub fn block(&self, block: &BlockID) -> Result<Option<Block>, StateError> {
        Ok(self.kv_store.block(block)?)
    }
}

/// A write batch produced by [`PersistentState::commit_batch`], released on every exit path.
///
/// The batch itself is taken out with [`take`](Self::take) and handed to whoever will physically write
/// it. Once that write has succeeded, call [`finalize`](Self::finalize). If the `ScopedBatch` is dropped
/// before then, the state's staged writes are aborted.
pub struct ScopedBatch<'a, K: KVStore> {
    state: &'a mut PersistentState<K>,
    batch: Option<LocalBatch<K>>,
    finalized: bool,
}

impl<'a, K: KVStore> ScopedBatch<'a, K> {
    pub fn take(&mut self) -> Result<LocalBatch<K>, StateError> {
        self.batch.take().ok_or(StateError::BatchAlreadyTaken)
    }

    /// Mark the batch as durably written. The staged writes it was built from are dropped from the
    /// overlay, so subsequent reads are served from the backing store.
    pub fn finalize(mut self) {
        self.finalized = true;
        self.state.clear_staged();
    }
}

impl<'a, K: KVStore> Drop for ScopedBatch<'a, K> {
    fn drop(&mut self) {
        if !self.finalized {
            self.state.abort();
        }
    }
}

/// A write batch bound to the store it should be written to.
///
/// `K` must be a handle type whose clones share the same underlying storage.
pub struct LocalBatch<K: KVStore> {
    kv_store: K,
    write_batch: K::WriteBatch,
}

impl<K: KVStore> LocalBatch<K> {
    pub fn write_batch(&self) -> &K::WriteBatch {
        &self.write_batch
    }

    /// Atomically write the batch into the store it was created from.
    pub fn write(self) {
        let LocalBatch {
            mut kv_store,
            write_batch,
        } = self;
        kv_store.write(write_batch)
    }
}

/// Typed setters over a raw [`WriteBatch`].
pub struct StateWriteBatch<W: WriteBatch>(pub(super) W);

impl<W: WriteBatch> StateWriteBatch<W> {
    pub(crate) fn new() -> StateWriteBatch<W> {
        StateWriteBatch(W::new())
    }

    /* ↓↓↓ Last Accepted ↓↓↓ */

    pub fn set_last_accepted(&mut self, block: &BlockID) -> Result<(), KVSetError> {
        Ok(self.0.set(
            &variables::LAST_ACCEPTED,
            &block
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::LastAccepted,
                    source: err,
                })?,
        ))
    }

    /* ↓↓↓ Height ↓↓↓ */

    pub fn set_height(&mut self, height: BlockHeight) -> Result<(), KVSetError> {
        Ok(self.0.set(
            &variables::HEIGHT,
            &height
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::Height,
                    source: err,
                })?,
        ))
    }

    /* ↓↓↓ Blocks, Block Status and Block at Height ↓↓↓ */

    pub fn set_block_record(&mut self, block: &Block, status: Status) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::BLOCKS, &block.id.bytes()),
            &block
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::Block { block: block.id },
                    source: err,
                })?,
        );
        self.0.set(
            &concat(&variables::BLOCK_STATUS, &block.id.bytes()),
            &status
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::BlockStatus { block: block.id },
                    source: err,
                })?,
        );
        if status == Status::Accepted {
            self.0.set(
                &concat(&variables::BLOCK_AT_HEIGHT, &block.height.to_le_bytes()),
                &block
                    .id
                    .try_to_vec()
                    .map_err(|err| KVSetError::SerializeValueError {
                        key: Key::BlockAtHeight {
                            height: block.height,
                        },
                        source: err,
                    })?,
            );
        }
        Ok(())
    }

    /* ↓↓↓ App State ↓↓↓ */

    pub fn set_app_state(&mut self, key: &[u8], value: &[u8]) {
        self.0.set(&concat(&variables::APP_STATE, key), value);
    }

    pub fn delete_app_state(&mut self, key: &[u8]) {
        self.0.delete(&concat(&variables::APP_STATE, key));
    }

    /* ↓↓↓ Balances ↓↓↓ */

    pub fn set_balance(&mut self, account: &[u8], balance: u64) -> Result<(), KVSetError> {
        Ok(self.0.set(
            &concat(&variables::BALANCES, account),
            &balance
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::Balance {
                        account: account.to_vec(),
                    },
                    source: err,
                })?,
        ))
    }

    /* ↓↓↓ Chain Time ↓↓↓ */

    pub fn set_chain_time(&mut self, timestamp: Timestamp) -> Result<(), KVSetError> {
        Ok(self.0.set(
            &variables::CHAIN_TIME,
            &timestamp
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::ChainTime,
                    source: err,
                })?,
        ))
    }
}

/// Error when writing a key-value pair to a [write batch][StateWriteBatch].
/// The error may arise when the value cannot be serialized, and hence cannot be
/// written to the write batch.
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

impl Display for KVSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KVSetError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for KVSetError {}

/// Errors that may be encountered when reading or writing the [`PersistentState`].
#[derive(Debug)]
pub enum StateError {
    /// Error when trying to get a value from the underlying [key value store][KVStore].
    KVGetError(KVGetError),

    /// Error when trying to set a value into a write batch.
    KVSetError(KVSetError),

    /// The backing store has no last accepted block. [`PersistentState::initialize`] was never called.
    NotInitialized,

    BalanceUnderflow {
        account: AccountID,
        balance: u64,
        change: i128,
    },

    BalanceOverflow {
        account: AccountID,
        balance: u64,
        change: i128,
    },

    /// [`ScopedBatch::take`] was called twice.
    BatchAlreadyTaken,
}

impl From<KVGetError> for StateError {
    fn from(value: KVGetError) -> Self {
        StateError::KVGetError(value)
    }
}

impl From<KVSetError> for StateError {
    fn from(value: KVSetError) -> Self {
        StateError::KVSetError(value)
    }
}

impl Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::KVGetError(err) => write!(f, "{}", err),
            StateError::KVSetError(err) => write!(f, "{}", err),
            StateError::NotInitialized => write!(f, "persistent state is not initialized"),
            StateError::BalanceUnderflow {
                account,
                balance,
                change,
            } => write!(
                f,
                "balance of account {:?} would underflow: {} + ({})",
                account, balance, change
            ),
            StateError::BalanceOverflow {
                account,
                balance,
                change,
            } => write!(
                f,
                "balance of account {:?} would overflow: {} + {}",
                account, balance, change
            ),
            StateError::BatchAlreadyTaken => write!(f, "write batch was already taken"),
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::KVGetError(err) => Some(err),
            StateError::KVSetError(err) => Some(err),
            _ => None,
        }
    }
}
