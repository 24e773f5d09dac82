//! Weighted-random sorter.

use rand::rngs::StdRng;
use rand::SeedableRng;
use sorter_types::{AgentId, ResourceQuantities, Resources};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, error, trace};

use crate::config::SorterConfig;
use crate::error::{SorterError, SorterResult};
use crate::path;
use crate::shuffle::{relative_weights, weighted_shuffle, SortInfo};
use crate::sorter::Sorter;
use crate::tree::{NodeId, NodeKind, Tree};

static EMPTY_ALLOCATION: BTreeMap<AgentId, Resources> = BTreeMap::new();
static EMPTY_RESOURCES: Resources = Resources::new();
static EMPTY_QUANTITIES: ResourceQuantities = ResourceQuantities::new();

/// Sorter that orders clients by a weighted random shuffle.
///
/// The chance that a client comes first in [`sort`](Sorter::sort) is its
/// relative weight: each internal role node splits its share among the
/// children that have active clients below them, in proportion to their
/// configured weights.
///
/// # Example
///
/// ```
/// use sorter_random::{RandomSorter, Sorter, SorterConfig};
///
/// let mut sorter = RandomSorter::with_config(SorterConfig::default().with_seed(1));
/// sorter.add("eng/web").unwrap();
/// sorter.add("eng/batch").unwrap();
/// sorter.activate("eng/web").unwrap();
/// sorter.update_weight("eng", 2.0).unwrap();
///
/// assert_eq!(sorter.count(), 2);
/// assert_eq!(sorter.sort(), vec!["eng/web".to_string()]);
/// ```
pub struct RandomSorter {
    config: SorterConfig,
    tree: Tree,
    weights: HashMap<String, f64>,
    sort_info: SortInfo,
    rng: StdRng,
    total: ResourceQuantities,
    fairness_exclude_resource_names: Option<BTreeSet<String>>,
}

impl RandomSorter {
    pub fn new() -> Self {
        Self::with_config(SorterConfig::default())
    }

    pub fn with_config(config: SorterConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let fairness_exclude_resource_names = config.fairness_exclude_resource_names.clone();

        Self {
            config,
            tree: Tree::default(),
            weights: HashMap::new(),
            sort_info: SortInfo::default(),
            rng,
            total: ResourceQuantities::new(),
            fairness_exclude_resource_names,
        }
    }

    /// Construct with the owning allocator's identity and a metrics prefix.
    pub fn with_identity(allocator: Option<String>, metrics_prefix: Option<String>) -> Self {
        Self::with_config(SorterConfig {
            allocator,
            metrics_prefix,
            ..SorterConfig::default()
        })
    }

    pub fn config(&self) -> &SorterConfig {
        &self.config
    }

    pub fn fairness_exclude_resource_names(&self) -> Option<&BTreeSet<String>> {
        self.fairness_exclude_resource_names.as_ref()
    }

    /// Number of active clients.
    pub fn active_count(&self) -> usize {
        self.tree
            .clients()
            .filter(|&(_, leaf)| self.tree[leaf].kind == NodeKind::ActiveLeaf)
            .count()
    }

    /// Whether the next `sort()` recomputes relative weights.
    pub fn is_sort_dirty(&self) -> bool {
        self.sort_info.dirty
    }

    /// Indented dump of the role tree.
    pub fn render_tree(&self) -> String {
        self.tree.render()
    }

    /// Verify the internal consistency of the sorter.
    pub fn check_invariants(&self) -> SorterResult<()> {
        self.tree.check()?;
        self.tree.check_weights(&self.weights)?;

        let mut sum = ResourceQuantities::new();
        for (client, leaf) in self.tree.clients() {
            let allocation = &self.tree[leaf].allocation;
            let expected = allocation.expected_totals();
            if *allocation.totals() != expected {
                return Err(SorterError::InvariantViolation(format!(
                    "totals of '{}' are [{}] but its resources sum to [{}]",
                    client,
                    allocation.totals(),
                    expected
                )));
            }
            sum += allocation.totals();
        }
        if sum != self.total {
            return Err(SorterError::InvariantViolation(format!(
                "sorter total is [{}] but client totals sum to [{}]",
                self.total, sum
            )));
        }

        if !self.sort_info.dirty {
            let mut scratch = self.tree.clone();
            let (clients, weights) = relative_weights(&mut scratch, &self.weights);
            let fresh = clients == self.sort_info.clients
                && weights
                    .iter()
                    .zip(&self.sort_info.weights)
                    .all(|(a, b)| (a - b).abs() < 1e-9);
            if !fresh {
                return Err(SorterError::InvariantViolation(
                    "cached sort info is stale but not marked dirty".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn allocator(&self) -> &str {
        self.config.allocator.as_deref().unwrap_or("-")
    }

    fn leaf(&self, operation: &'static str, client: &str) -> SorterResult<NodeId> {
        self.tree
            .client(client)
            .ok_or_else(|| violation(operation, SorterError::ClientNotFound(client.to_string())))
    }
}

/// Log a contract violation and hand the error back.
fn violation(operation: &'static str, err: SorterError) -> SorterError {
    error!(operation, error = %err, "Sorter contract violation");
    err
}

impl Default for RandomSorter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RandomSorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSorter")
            .field("allocator", &self.config.allocator)
            .field("clients", &self.tree.client_count())
            .field("active", &self.active_count())
            .field("sort_dirty", &self.sort_info.dirty)
            .finish()
    }
}

impl Sorter for RandomSorter {
    fn initialize(&mut self, fairness_exclude_resource_names: Option<BTreeSet<String>>) {
        debug!(
            allocator = self.allocator(),
            metrics_prefix = self.config.metrics_prefix.as_deref().unwrap_or("-"),
            excluded = ?fairness_exclude_resource_names,
            "Sorter initialized"
        );
        self.fairness_exclude_resource_names = fairness_exclude_resource_names;
    }

    fn add(&mut self, client: &str) -> SorterResult<()> {
        self.tree.add(client).map_err(|e| violation("add", e))?;
        self.sort_info.dirty = true;
        debug!(allocator = self.allocator(), client, "Client added");
        Ok(())
    }

    fn remove(&mut self, client: &str) -> SorterResult<()> {
        let allocation = self.tree.remove(client).map_err(|e| violation("remove", e))?;
        self.total -= allocation.totals();
        self.sort_info.dirty = true;
        debug!(allocator = self.allocator(), client, "Client removed");
        Ok(())
    }

    fn activate(&mut self, client: &str) -> SorterResult<()> {
        if self.tree.set_active(client, true).map_err(|e| violation("activate", e))? {
            self.sort_info.dirty = true;
            debug!(allocator = self.allocator(), client, "Client activated");
        }
        Ok(())
    }

    fn deactivate(&mut self, client: &str) -> SorterResult<()> {
        if self.tree.set_active(client, false).map_err(|e| violation("deactivate", e))? {
            self.sort_info.dirty = true;
            debug!(allocator = self.allocator(), client, "Client deactivated");
        }
        Ok(())
    }

    fn update_weight(&mut self, path: &str, weight: f64) -> SorterResult<()> {
        path::split(path).map_err(|e| violation("update_weight", e))?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(violation(
                "update_weight",
                SorterError::InvalidWeight {
                    path: path.to_string(),
                    weight,
                },
            ));
        }

        self.weights.insert(path.to_string(), weight);
        if let Some(node) = self.tree.find(path) {
            self.tree.invalidate_weights(node);
        }
        self.sort_info.dirty = true;
        debug!(allocator = self.allocator(), path, weight, "Weight updated");
        Ok(())
    }

    fn allocated(&mut self, client: &str, agent: &AgentId, resources: &Resources) -> SorterResult<()> {
        let leaf = self.leaf("allocated", client)?;
        let added = self.tree[leaf].allocation.add(agent, resources);
        self.total += &added;
        trace!(client, agent = %agent, resources = %resources, "Resources allocated");
        Ok(())
    }

    fn update(&mut self, client: &str, agent: &AgentId, old: &Resources, new: &Resources) -> SorterResult<()> {
        let leaf = self.leaf("update", client)?;
        self.tree[leaf]
            .allocation
            .check_update(client, agent, old)
            .map_err(|e| violation("update", e))?;

        let (removed, added) = self.tree[leaf].allocation.update(agent, old, new);
        self.total -= &removed;
        self.total += &added;
        trace!(client, agent = %agent, old = %old, new = %new, "Allocation updated");
        Ok(())
    }

    fn unallocated(&mut self, client: &str, agent: &AgentId, resources: &Resources) -> SorterResult<()> {
        let leaf = self.leaf("unallocated", client)?;
        self.tree[leaf]
            .allocation
            .check_subtract(client, agent, resources)
            .map_err(|e| violation("unallocated", e))?;

        let removed = self.tree[leaf].allocation.subtract(agent, resources);
        self.total -= &removed;
        trace!(client, agent = %agent, resources = %resources, "Resources unallocated");
        Ok(())
    }

    fn allocation(&self, client: &str) -> &BTreeMap<AgentId, Resources> {
        match self.tree.client(client) {
            Some(leaf) => self.tree[leaf].allocation.resources(),
            None => &EMPTY_ALLOCATION,
        }
    }

    fn allocation_on_agent(&self, client: &str, agent: &AgentId) -> &Resources {
        self.tree
            .client(client)
            .and_then(|leaf| self.tree[leaf].allocation.on_agent(agent))
            .unwrap_or(&EMPTY_RESOURCES)
    }

    fn allocation_scalar_quantities(&self, client: &str) -> &ResourceQuantities {
        match self.tree.client(client) {
            Some(leaf) => self.tree[leaf].allocation.totals(),
            None => &EMPTY_QUANTITIES,
        }
    }

    fn total_allocation_scalar_quantities(&self) -> &ResourceQuantities {
        &self.total
    }

    // Agents carry no state in this sorter.
    fn add_agent(&mut self, _agent: &AgentId, _capacity: &ResourceQuantities) {}

    fn remove_agent(&mut self, _agent: &AgentId) {}

    fn sort(&mut self) -> Vec<String> {
        if self.sort_info.refresh(&mut self.tree, &self.weights) {
            debug!(
                allocator = self.allocator(),
                active = self.sort_info.clients.len(),
                "Relative weights recomputed"
            );
        }

        let order = weighted_shuffle(&self.sort_info.clients, &self.sort_info.weights, &mut self.rng);
        trace!(clients = order.len(), "Clients sorted");
        order
    }

    fn contains(&self, client: &str) -> bool {
        self.tree.client(client).is_some()
    }

    fn count(&self) -> usize {
        self.tree.client_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorter_types::Resource;

    fn seeded() -> RandomSorter {
        RandomSorter::with_config(SorterConfig::default().with_seed(11))
    }

    fn agent() -> AgentId {
        AgentId::new("agent-1")
    }

    #[test]
    fn new_sorter_is_empty() {
        let mut sorter = RandomSorter::new();
        assert_eq!(sorter.count(), 0);
        assert!(sorter.sort().is_empty());
        assert!(!sorter.contains("a"));
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn with_identity_records_config() {
        let sorter = RandomSorter::with_identity(Some("master".into()), Some("allocator/".into()));
        assert_eq!(sorter.config().allocator.as_deref(), Some("master"));
        assert_eq!(sorter.config().metrics_prefix.as_deref(), Some("allocator/"));
    }

    #[test]
    fn initialize_records_exclusions() {
        let mut sorter = seeded();
        assert!(sorter.fairness_exclude_resource_names().is_none());

        sorter.initialize(Some(BTreeSet::from(["gpus".to_string()])));
        assert!(sorter.fairness_exclude_resource_names().unwrap().contains("gpus"));
    }

    #[test]
    fn config_exclusions_seed_initial_value() {
        let sorter = RandomSorter::with_config(SorterConfig::default().with_fairness_exclusions(["disk"]));
        assert!(sorter.fairness_exclude_resource_names().unwrap().contains("disk"));
    }

    #[test]
    fn add_marks_dirty_and_sort_clears() {
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter.activate("a").unwrap();
        assert!(sorter.is_sort_dirty());

        assert_eq!(sorter.sort(), vec!["a".to_string()]);
        assert!(!sorter.is_sort_dirty());
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn redundant_activation_keeps_cache() {
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter.activate("a").unwrap();
        sorter.sort();

        sorter.activate("a").unwrap();
        assert!(!sorter.is_sort_dirty());
        sorter.deactivate("a").unwrap();
        assert!(sorter.is_sort_dirty());
        assert!(sorter.sort().is_empty());
    }

    #[test]
    fn allocation_does_not_dirty_sort() {
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter.sort();

        sorter
            .allocated("a", &agent(), &Resources::parse("cpus:1").unwrap())
            .unwrap();
        assert!(!sorter.is_sort_dirty());
    }

    #[test]
    fn failed_calls_leave_state_unchanged() {
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter
            .allocated("a", &agent(), &Resources::parse("cpus:1").unwrap())
            .unwrap();
        sorter.sort();

        assert!(sorter.add("a").is_err());
        assert!(sorter.remove("b").is_err());
        assert!(sorter.activate("b").is_err());
        assert!(sorter
            .unallocated("a", &agent(), &Resources::parse("cpus:2").unwrap())
            .is_err());
        assert!(sorter
            .update(
                "a",
                &AgentId::new("other"),
                &Resources::parse("cpus:1").unwrap(),
                &Resources::new()
            )
            .is_err());

        assert_eq!(sorter.count(), 1);
        assert_eq!(sorter.allocation_scalar_quantities("a").get("cpus"), 1.0);
        assert!(!sorter.is_sort_dirty());
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn update_weight_validates() {
        let mut sorter = seeded();
        assert!(matches!(
            sorter.update_weight("a", -1.0),
            Err(SorterError::InvalidWeight { .. })
        ));
        assert!(matches!(
            sorter.update_weight("a", f64::NAN),
            Err(SorterError::InvalidWeight { .. })
        ));
        assert!(matches!(
            sorter.update_weight("", 1.0),
            Err(SorterError::InvalidPath { .. })
        ));
        sorter.update_weight("a", 0.0).unwrap();
    }

    #[test]
    fn update_weight_on_internal_node_invalidates_descendants() {
        let mut sorter = seeded();
        for client in ["team/alice", "solo"] {
            sorter.add(client).unwrap();
            sorter.activate(client).unwrap();
        }
        sorter.sort();

        sorter.update_weight("team", 3.0).unwrap();
        sorter.check_invariants().unwrap();
        sorter.sort();
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn zero_weight_client_is_never_sorted() {
        let mut sorter = seeded();
        for client in ["a", "b"] {
            sorter.add(client).unwrap();
            sorter.activate(client).unwrap();
        }
        sorter.update_weight("b", 0.0).unwrap();

        for _ in 0..50 {
            assert_eq!(sorter.sort(), vec!["a".to_string()]);
        }
    }

    #[test]
    fn remove_drops_allocation_from_total() {
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter.add("b").unwrap();
        sorter
            .allocated("a", &agent(), &Resources::parse("cpus:2").unwrap())
            .unwrap();
        sorter
            .allocated("b", &agent(), &Resources::parse("cpus:1").unwrap())
            .unwrap();
        assert_eq!(sorter.total_allocation_scalar_quantities().get("cpus"), 3.0);

        sorter.remove("a").unwrap();
        assert_eq!(sorter.total_allocation_scalar_quantities().get("cpus"), 1.0);
        assert!(sorter.allocation("a").is_empty());
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn promotion_keeps_allocation_with_client() {
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter
            .allocated("a", &agent(), &Resources::parse("mem:64").unwrap())
            .unwrap();
        sorter.add("a/b").unwrap();

        assert_eq!(sorter.allocation_scalar_quantities("a").get("mem"), 64.0);
        sorter.remove("a/b").unwrap();
        assert_eq!(sorter.allocation_scalar_quantities("a").get("mem"), 64.0);
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn unknown_queries_are_empty() {
        let sorter = seeded();
        assert!(sorter.allocation("x").is_empty());
        assert!(sorter.allocation_on_agent("x", &agent()).is_empty());
        assert!(sorter.allocation_scalar_quantities("x").is_empty());
    }

    #[test]
    fn agent_lifecycle_is_a_no_op() {
        let mut sorter = seeded();
        let quantities: ResourceQuantities = [("cpus", 4.0)].into_iter().collect();
        sorter.add_agent(&agent(), &quantities);
        sorter.remove_agent(&agent());
        assert_eq!(sorter.count(), 0);
    }

    #[test]
    fn same_seed_same_order() {
        let build = || {
            let mut sorter = seeded();
            for client in ["a", "b", "c", "d"] {
                sorter.add(client).unwrap();
                sorter.activate(client).unwrap();
            }
            sorter
        };
        let mut first = build();
        let mut second = build();
        for _ in 0..10 {
            assert_eq!(first.sort(), second.sort());
        }
    }

    #[test]
    fn shared_update_skips_shared_filter() {
        // `update` moves totals by plain scalar quantities, so replacing one
        // copy of a doubly-held shared volume drops it from the totals.
        let volume: Resources = Resource::scalar("disk", 10.0).with_id("v").into_shared().into();
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter.allocated("a", &agent(), &volume).unwrap();
        sorter.allocated("a", &agent(), &volume).unwrap();

        sorter.update("a", &agent(), &volume, &Resources::new()).unwrap();
        assert_eq!(sorter.allocation_on_agent("a", &agent()).len(), 1);
        assert_eq!(sorter.allocation_scalar_quantities("a").get("disk"), 0.0);
    }

    #[test]
    fn update_rejects_old_the_totals_no_longer_cover() {
        let volume: Resources = Resource::scalar("disk", 10.0).with_id("v").into_shared().into();
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter.allocated("a", &agent(), &volume).unwrap();
        sorter.allocated("a", &agent(), &volume).unwrap();
        sorter.update("a", &agent(), &volume, &Resources::new()).unwrap();

        let held = sorter.allocation("a").clone();
        let err = sorter
            .update("a", &agent(), &volume, &Resources::new())
            .unwrap_err();
        assert!(matches!(err, SorterError::InsufficientTotals { .. }));
        assert_eq!(sorter.allocation("a"), &held);
        assert!(sorter.total_allocation_scalar_quantities().is_empty());
    }

    #[test]
    fn update_rejects_old_beyond_holding() {
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter
            .allocated("a", &agent(), &Resources::parse("cpus:1").unwrap())
            .unwrap();

        let err = sorter
            .update(
                "a",
                &agent(),
                &Resources::parse("cpus:2").unwrap(),
                &Resources::parse("cpus:3").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, SorterError::InsufficientAllocation { .. }));
        assert_eq!(sorter.allocation_scalar_quantities("a").get("cpus"), 1.0);
        assert_eq!(sorter.total_allocation_scalar_quantities().get("cpus"), 1.0);
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn deserialized_zero_resources_record_nothing() {
        let zero: Resources =
            serde_json::from_str(r#"[{"resource":{"name":"cpus","value":{"scalar":0.0}}}]"#).unwrap();
        let mut sorter = seeded();
        sorter.add("a").unwrap();
        sorter.allocated("a", &agent(), &zero).unwrap();

        assert!(sorter.allocation("a").is_empty());
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn maximal_weights_keep_every_active_client() {
        let mut sorter = seeded();
        for client in ["x", "y"] {
            sorter.add(client).unwrap();
            sorter.activate(client).unwrap();
            sorter.update_weight(client, f64::MAX).unwrap();
        }

        let mut order = sorter.sort();
        order.sort();
        assert_eq!(order, vec!["x".to_string(), "y".to_string()]);
        sorter.check_invariants().unwrap();
    }

    #[test]
    fn debug_output_summarizes() {
        let mut sorter = RandomSorter::with_identity(Some("m".into()), None);
        sorter.add("a").unwrap();
        let out = format!("{:?}", sorter);
        assert!(out.contains("clients: 1"));
    }
}
