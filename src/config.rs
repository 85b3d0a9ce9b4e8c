/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters of an [`Acceptor`](crate::acceptor::Acceptor).

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{types::data_types::ChainID, window::WindowConfig};

/// Stores the user-defined parameters required to accept blocks on a chain, that is:
/// 1. The [chain ID](ChainID) of the chain.
/// 2. The capacity of the recently accepted window, i.e., how many of the most recently accepted
///    block IDs are remembered.
/// 3. How long a block ID stays in the recently accepted window.
/// 4. The "Log Events" flag. If set to "true", every [event](crate::events) is logged.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc = "
    Create a builder for building an [AcceptorConfiguration]. On the builder call the following methods to construct a valid [AcceptorConfiguration].

    Required:
    - `.chain_id(...)`
    - `.log_events(...)`

    Optional:
    - `.recently_accepted_window_size(...)`
    - `.recently_accepted_window_ttl(...)`
"))]
pub struct AcceptorConfiguration {
    #[builder(setter(doc = "Set the chain ID of the chain. Required."))]
    pub chain_id: ChainID,
    #[builder(
        default = 64,
        setter(doc = "Set the number of recently accepted block IDs to remember. Defaults to 64.")
    )]
    pub recently_accepted_window_size: usize,
    #[builder(
        default = Duration::from_secs(30),
        setter(doc = "Set how long a block ID is remembered after its block is accepted. Defaults to 30 seconds.")
    )]
    pub recently_accepted_window_ttl: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl AcceptorConfiguration {
    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            max_size: self.recently_accepted_window_size,
            ttl: self.recently_accepted_window_ttl,
        }
    }
}
