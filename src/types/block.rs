/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Block`] type and its associated methods.
//!
//! A block is built and verified by collaborators outside this crate. By the time it reaches the
//! [`Acceptor`](crate::acceptor::Acceptor) it is immutable, content-addressed by its [`BlockID`], and
//! only read.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

use super::data_types::{BlockHeight, BlockID, CryptoHash, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub id: BlockID,
    pub parent: BlockID,
    pub height: BlockHeight,
    pub generation: Generation,
    pub body: BlockBody,
}

impl Block {
    pub fn new(parent: BlockID, height: BlockHeight, generation: Generation, body: BlockBody) -> Block {
        Block {
            id: Block::compute_id(&parent, height, &generation, &body),
            parent,
            height,
            generation,
            body,
        }
    }

    /// Create the block every chain starts from. Its parent is [`CryptoHash::zero`].
    pub fn genesis(timestamp: Timestamp) -> Block {
        Block::new(
            CryptoHash::zero(),
            BlockHeight::new(0),
            Generation::Timed { timestamp },
            BlockBody::Standard {
                transactions: Vec::new(),
            },
        )
    }

    pub fn compute_id(
        parent: &BlockID,
        height: BlockHeight,
        generation: &Generation,
        body: &BlockBody,
    ) -> BlockID {
        let mut hasher = CryptoHasher::new();
        hasher.update(parent.bytes());
        hasher.update(height.to_le_bytes());
        match generation {
            Generation::Untimed => hasher.update([0u8]),
            Generation::Timed { timestamp } => {
                hasher.update([1u8]);
                hasher.update(timestamp.secs().to_le_bytes());
            }
        }
        hasher.update([body.kind() as u8]);
        for tx in body.transactions() {
            hasher.update((tx.bytes().len() as u64).to_le_bytes());
            hasher.update(tx.bytes());
        }
        let digest: [u8; 32] = hasher.finalize().into();
        CryptoHash::new(digest)
    }

    /// Checks that `id` is the hash of the block's contents.
    pub fn is_correct(&self) -> bool {
        self.id == Block::compute_id(&self.parent, self.height, &self.generation, &self.body)
    }

    pub fn kind(&self) -> BlockKind {
        self.body.kind()
    }

    /// Human-readable label used in logs, e.g. `"timed commit"`.
    pub fn type_label(&self) -> String {
        format!("{} {}", self.generation, self.kind())
    }
}

/// The two protocol generations a block can be built under.
///
/// They differ only in whether a block carries its own timestamp. Under [`Generation::Timed`], a
/// proposal block may itself advance chain time; that advance is carried inside the diffs of its
/// two options and so only becomes durable when one of them is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Generation {
    Untimed,
    Timed { timestamp: Timestamp },
}

impl Generation {
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Generation::Untimed => None,
            Generation::Timed { timestamp } => Some(*timestamp),
        }
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Untimed => write!(f, "untimed"),
            Generation::Timed { .. } => write!(f, "timed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BlockBody {
    Standard { transactions: Vec<Transaction> },
    Proposal { transaction: Transaction },
    Commit,
    Abort,
    Atomic { transaction: Transaction },
}

impl BlockBody {
    pub fn kind(&self) -> BlockKind {
        match self {
            BlockBody::Standard { .. } => BlockKind::Standard,
            BlockBody::Proposal { .. } => BlockKind::Proposal,
            BlockBody::Commit => BlockKind::Commit,
            BlockBody::Abort => BlockKind::Abort,
            BlockBody::Atomic { .. } => BlockKind::Atomic,
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        match self {
            BlockBody::Standard { transactions } => transactions,
            BlockBody::Proposal { transaction } | BlockBody::Atomic { transaction } => {
                std::slice::from_ref(transaction)
            }
            BlockBody::Commit | BlockBody::Abort => &[],
        }
    }
}

/// Payload-free tag of a [`BlockBody`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Standard = 0,
    Proposal = 1,
    Commit = 2,
    Abort = 3,
    Atomic = 4,
}

impl BlockKind {
    pub const fn label(&self) -> &'static str {
        match self {
            BlockKind::Standard => "standard",
            BlockKind::Proposal => "proposal",
            BlockKind::Commit => "commit",
            BlockKind::Abort => "abort",
            BlockKind::Atomic => "atomic",
        }
    }

    /// Whether accepting a block of this kind is unconditional once decided.
    pub const fn is_decision(&self) -> bool {
        !matches!(self, BlockKind::Proposal)
    }
}

impl Display for BlockKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque transaction bytes. Fee and UTXO semantics are the verifier's concern.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Transaction(Vec<u8>);

impl Transaction {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn id(&self) -> CryptoHash {
        let digest: [u8; 32] = CryptoHasher::digest(&self.0).into();
        CryptoHash::new(digest)
    }
}

/// Status of a block as recorded in the persistent block index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Status {
    Processing,
    Rejected,
    Accepted,
}
