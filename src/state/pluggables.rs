//! Traits for pluggable persistence.
//!
//! The block acceptance engine only requires that the node's storage engine provides the abstract
//! functionality of a key-value store with atomic, batched writes. Implement [`KVStore`] and
//! [`WriteBatch`] for whatever storage engine the node uses.

use std::fmt::{self, Display};

use borsh::BorshDeserialize;

use crate::types::{
    block::{Block, Status},
    data_types::{BlockHeight, BlockID, Timestamp},
};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically write every change in `wb`.
    fn write(&mut self, wb: Self::WriteBatch);
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Get the value at `raw_key` and Borsh-deserialize it, attributing errors to `key`.
    fn get_deserialized<T: BorshDeserialize>(
        &self,
        raw_key: &[u8],
        key: Key,
    ) -> Result<Option<T>, KVGetError> {
        match self.get(raw_key) {
            None => Ok(None),
            Some(bytes) => T::deserialize(&mut bytes.as_slice())
                .map(Some)
                .map_err(|err| KVGetError::DeserializeValueError { key, source: err }),
        }
    }

    /* ↓↓↓ Last Accepted ↓↓↓ */

    fn last_accepted(&self) -> Result<Option<BlockID>, KVGetError> {
        self.get_deserialized(&variables::LAST_ACCEPTED, Key::LastAccepted)
    }

    /* ↓↓↓ Height ↓↓↓ */

    fn height(&self) -> Result<Option<BlockHeight>, KVGetError> {
        self.get_deserialized(&variables::HEIGHT, Key::Height)
    }

    /* ↓↓↓ Blocks ↓↓↓ */

    fn block(&self, block: &BlockID) -> Result<Option<Block>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::BLOCKS, &block.bytes()),
            Key::Block { block: *block },
        )
    }

    fn block_status(&self, block: &BlockID) -> Result<Option<Status>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::BLOCK_STATUS, &block.bytes()),
            Key::BlockStatus { block: *block },
        )
    }

    /* ↓↓↓ Block at Height ↓↓↓ */

    fn block_at_height(&self, height: BlockHeight) -> Result<Option<BlockID>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::BLOCK_AT_HEIGHT, &height.to_le_bytes()),
            Key::BlockAtHeight { height },
        )
    }

    /* ↓↓↓ App State ↓↓↓ */

    fn app_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(&concat(&variables::APP_STATE, key))
    }

    /* ↓↓↓ Balances ↓↓↓ */

    /// Get the balance of `account`. Accounts that were never credited have a balance of 0.
    fn balance(&self, account: &[u8]) -> Result<u64, KVGetError> {
        Ok(self
            .get_deserialized(
                &concat(&variables::BALANCES, account),
                Key::Balance {
                    account: account.to_vec(),
                },
            )?
            .unwrap_or(0))
    }

    /* ↓↓↓ Chain Time ↓↓↓ */

    fn chain_time(&self) -> Result<Option<Timestamp>, KVGetError> {
        self.get_deserialized(&variables::CHAIN_TIME, Key::ChainTime)
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize {}: {}", key, source)
            }
            KVGetError::ValueExpectedButNotFound { key } => {
                write!(f, "{} expected but not found", key)
            }
        }
    }
}

impl std::error::Error for KVGetError {}

#[derive(Debug)]
pub enum Key {
    LastAccepted,
    Height,
    Block { block: BlockID },
    BlockStatus { block: BlockID },
    BlockAtHeight { height: BlockHeight },
    AppState { key: Vec<u8> },
    Balance { account: Vec<u8> },
    ChainTime,
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::LastAccepted => write!(f, "Last Accepted"),
            Key::Height => write!(f, "Height"),
            Key::Block { block } => write!(f, "Block {}", block),
            Key::BlockStatus { block } => write!(f, "Block Status for block {}", block),
            Key::BlockAtHeight { height } => write!(f, "Block at height {}", height),
            Key::AppState { key } => write!(f, "App State for key {:?}", key),
            Key::Balance { account } => write!(f, "Balance for account {:?}", account),
            Key::ChainTime => write!(f, "Chain Time"),
        }
    }
}
