/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A block acceptance engine: the component of a chain's virtual machine that, once consensus has
//! decided a block, makes the block's effects durable.
//!
//! The entry point is the [`Acceptor`](acceptor::Acceptor), usually started through a
//! [`ChainSpec`](chain::ChainSpec). Before a block can be accepted, its verified
//! [execution state](execution::BlockState) must be tracked by the acceptor.

pub mod acceptor;

pub mod chain;

pub mod config;

pub mod events;

pub(crate) mod event_bus;

pub mod execution;

pub mod logging;

pub mod metrics;

pub mod shared_memory;

pub mod state;

pub mod types;

pub mod window;
