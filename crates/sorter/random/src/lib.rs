//! Sorter Random - hierarchical weighted-random client ordering
//!
//! This crate provides the client sorter used by a two-level resource
//! allocator. On every allocation cycle the allocator asks the sorter for
//! an ordering of its active clients; the [`RandomSorter`] answers with a
//! weighted random shuffle over a tree of role paths and keeps per-client
//! allocation ledgers alongside.
//!
//! - [`Sorter`]: the interface shared with sibling sorters
//! - [`RandomSorter`]: role tree, allocation ledgers and weighted shuffler
//! - [`SorterConfig`]: construction settings (identity, seed, exclusions)
//! - [`SorterError`]: contract violations reported by mutators
//!
//! The sorter is an in-memory, single-threaded structure. The owning
//! allocator serializes all calls.

#![deny(unsafe_code)]

mod allocation;
pub mod config;
pub mod error;
mod path;
pub mod random;
mod shuffle;
pub mod sorter;
mod tree;

pub use config::SorterConfig;
pub use error::{SorterError, SorterResult};
pub use random::RandomSorter;
pub use sorter::Sorter;

pub use sorter_types::{AgentId, Resource, ResourceQuantities, Resources, Value};
