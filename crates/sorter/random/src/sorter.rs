//! The sorter interface.

use sorter_types::{AgentId, ResourceQuantities, Resources};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::SorterResult;

/// Orders the clients of an allocator and tracks what each one holds.
///
/// Clients are `/`-separated role paths. Any prefix of a client path may
/// itself be a client.
///
/// Mutators that fail return an error and leave the sorter unchanged.
/// Queries about unknown clients return empty values.
pub trait Sorter {
    /// Record resource names to leave out of fairness calculations.
    fn initialize(&mut self, fairness_exclude_resource_names: Option<BTreeSet<String>>);

    /// Register an inactive client.
    fn add(&mut self, client: &str) -> SorterResult<()>;

    /// Unregister a client and discard its allocation.
    fn remove(&mut self, client: &str) -> SorterResult<()>;

    /// Include the client in `sort()` results. No-op if already active.
    fn activate(&mut self, client: &str) -> SorterResult<()>;

    /// Exclude the client from `sort()` results. No-op if already inactive.
    fn deactivate(&mut self, client: &str) -> SorterResult<()>;

    /// Set the weight of a role path. The path need not be present.
    fn update_weight(&mut self, path: &str, weight: f64) -> SorterResult<()>;

    /// Record resources allocated to `client` on `agent`.
    fn allocated(&mut self, client: &str, agent: &AgentId, resources: &Resources) -> SorterResult<()>;

    /// Replace `old` with `new` in the client's allocation on `agent`.
    fn update(&mut self, client: &str, agent: &AgentId, old: &Resources, new: &Resources) -> SorterResult<()>;

    /// Record resources released by `client` on `agent`.
    fn unallocated(&mut self, client: &str, agent: &AgentId, resources: &Resources) -> SorterResult<()>;

    /// Per-agent allocation of a client.
    fn allocation(&self, client: &str) -> &BTreeMap<AgentId, Resources>;

    /// A client's allocation on a single agent.
    fn allocation_on_agent(&self, client: &str, agent: &AgentId) -> &Resources;

    /// Scalar totals of a client's allocation.
    fn allocation_scalar_quantities(&self, client: &str) -> &ResourceQuantities;

    /// Scalar totals across all clients.
    fn total_allocation_scalar_quantities(&self) -> &ResourceQuantities;

    fn add_agent(&mut self, agent: &AgentId, capacity: &ResourceQuantities);

    fn remove_agent(&mut self, agent: &AgentId);

    /// Active clients in a fresh order.
    fn sort(&mut self) -> Vec<String>;

    fn contains(&self, client: &str) -> bool;

    /// Number of registered clients, active or not.
    fn count(&self) -> usize;
}
