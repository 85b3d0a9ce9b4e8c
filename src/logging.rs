/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the acceptor's
//! [configuration](crate::config::AcceptorConfiguration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitBlock](crate::events::CommitBlockEvent) is printed:
//!
//! ```text
//! CommitBlock, 1701329264, fNGCJyk, 6, 1
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block's ID.
//! - The fourth value is the height of the block.
//! - The fifth value is the number of peer chains the block's atomic requests were addressed to.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const ACCEPT_BLOCK: &str = "AcceptBlock";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const OPTION_VOTE: &str = "OptionVote";
pub const EVICT_BLOCK_STATE: &str = "EvictBlockState";
pub const REJECT_BLOCK: &str = "RejectBlock";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AcceptBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_block_event: &AcceptBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ACCEPT_BLOCK,
                secs_since_unix_epoch(accept_block_event.timestamp),
                first_seven_base64_chars(&accept_block_event.block.bytes()),
                accept_block_event.height,
                accept_block_event.kind
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.height,
                commit_block_event.atomic_peers
            )
        };
        Box::new(logger)
    }
}

impl Logger for OptionVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |option_vote_event: &OptionVoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                OPTION_VOTE,
                secs_since_unix_epoch(option_vote_event.timestamp),
                first_seven_base64_chars(&option_vote_event.proposal.bytes()),
                if option_vote_event.won { "won" } else { "lost" }
            )
        };
        Box::new(logger)
    }
}

impl Logger for EvictBlockStateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |evict_block_state_event: &EvictBlockStateEvent| {
            log::debug!(
                "{}, {}, {}",
                EVICT_BLOCK_STATE,
                secs_since_unix_epoch(evict_block_state_event.timestamp),
                first_seven_base64_chars(&evict_block_state_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_block_event: &RejectBlockEvent| {
            log::info!(
                "{}, {}, {}",
                REJECT_BLOCK,
                secs_since_unix_epoch(reject_block_event.timestamp),
                first_seven_base64_chars(&reject_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
