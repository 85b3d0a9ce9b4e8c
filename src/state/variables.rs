/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each durable state variable is stored in the user-provided
//! key-value store.
//!
//! # List of State Variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Last Accepted|[`BlockID`](crate::types::data_types::BlockID)|The most recently accepted decision block. Never a proposal block.|
//! |Height|[`BlockHeight`](crate::types::data_types::BlockHeight)|Height of the last accepted block.|
//! |Blocks|[`BlockID`](crate::types::data_types::BlockID) -> [`Block`](crate::types::block::Block)|Every block that has been recorded in the block index.|
//! |Block Status|[`BlockID`](crate::types::data_types::BlockID) -> [`Status`](crate::types::block::Status)|Status of every block in the block index.|
//! |Block at Height|[`BlockHeight`](crate::types::data_types::BlockHeight) -> [`BlockID`](crate::types::data_types::BlockID)|Accepted block at each height. Only accepted blocks appear here, since before acceptance there may be several blocks at one height.|
//! |App State|[`Vec<u8>`] -> [`Vec<u8>`]|All key value pairs of the VM's app state.|
//! |Balances|[`AccountID`](crate::types::data_types::AccountID) -> [`u64`]|Balance of each account.|
//! |Chain Time|[`Timestamp`](crate::types::data_types::Timestamp)|Current chain time.|
//!
//! # Persistence of state variables
//!
//! Each variable is stored as a **Borsh-serialized value**.
//!
//! "Single values" (e.g., last accepted, height) are stored at one-byte constant keys sharing the
//! variable's name. Mappings of the form "`A` -> `B`" are stored at keys formed by concatenating the
//! variable's one-byte prefix with the bytes of an instance of `A`.

// State variables
pub const LAST_ACCEPTED: [u8; 1] = [0];
pub const HEIGHT: [u8; 1] = [1];
pub const BLOCKS: [u8; 1] = [2];
pub const BLOCK_STATUS: [u8; 1] = [3];
pub const BLOCK_AT_HEIGHT: [u8; 1] = [4];
pub const APP_STATE: [u8; 1] = [5];
pub const BALANCES: [u8; 1] = [6];
pub const CHAIN_TIME: [u8; 1] = [7];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
