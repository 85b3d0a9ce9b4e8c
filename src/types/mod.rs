//! Types that are used across multiple components of the block acceptance engine.
//!
//! Types specific to a single component, e.g., [`BlockState`](crate::execution::BlockState), are defined
//! in that component's module.

pub mod data_types;

pub mod block;

pub mod update_sets;
