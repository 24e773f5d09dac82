//! Per-client allocation ledger.
//!
//! A ledger records what a client holds on each agent and keeps a cached
//! scalar total. Shared resources contribute to the total once per agent,
//! no matter how many copies of the same instance the client holds there.

use sorter_types::{AgentId, ResourceQuantities, Resources};
use std::collections::BTreeMap;

use crate::error::{SorterError, SorterResult};

#[derive(Debug, Clone, Default)]
pub(crate) struct Allocation {
    resources: BTreeMap<AgentId, Resources>,
    totals: ResourceQuantities,
}

impl Allocation {
    pub(crate) fn resources(&self) -> &BTreeMap<AgentId, Resources> {
        &self.resources
    }

    pub(crate) fn totals(&self) -> &ResourceQuantities {
        &self.totals
    }

    pub(crate) fn on_agent(&self, agent: &AgentId) -> Option<&Resources> {
        self.resources.get(agent)
    }

    /// Record `delta` on `agent`. Returns the quantities added to the total.
    pub(crate) fn add(&mut self, agent: &AgentId, delta: &Resources) -> ResourceQuantities {
        if delta.is_empty() {
            return ResourceQuantities::new();
        }

        let held = self.resources.entry(agent.clone()).or_default();

        // Only shared instances the agent does not hold yet count.
        let shared_added = delta.shared().filter(|r| !held.contains_resource(r));
        let added = ResourceQuantities::from_scalar_resources(&(&delta.non_shared() + &shared_added).scalars());

        *held += delta;
        self.totals += &added;
        added
    }

    /// Check that `delta` can be released from `agent`.
    pub(crate) fn check_subtract(&self, client: &str, agent: &AgentId, delta: &Resources) -> SorterResult<()> {
        let held = self.resources.get(agent).ok_or_else(|| SorterError::AgentNotFound {
            client: client.to_string(),
            agent: agent.clone(),
        })?;

        if !held.contains(delta) {
            return Err(SorterError::InsufficientAllocation {
                client: client.to_string(),
                agent: agent.clone(),
                held: held.clone(),
                requested: delta.clone(),
            });
        }
        Ok(())
    }

    /// Check that `old` can be swapped for something else on `agent`.
    ///
    /// Besides the per-agent check, the cached totals must cover the plain
    /// scalar quantities of `old`, since [`update`](Self::update) moves the
    /// totals by exactly that amount.
    pub(crate) fn check_update(&self, client: &str, agent: &AgentId, old: &Resources) -> SorterResult<()> {
        self.check_subtract(client, agent, old)?;

        let requested = ResourceQuantities::from_scalar_resources(&old.scalars());
        if !self.totals.contains(&requested) {
            return Err(SorterError::InsufficientTotals {
                client: client.to_string(),
                totals: self.totals.clone(),
                requested,
            });
        }
        Ok(())
    }

    /// Release `delta` from `agent`. Returns the quantities removed from
    /// the total. Callers run [`check_subtract`](Self::check_subtract) first.
    pub(crate) fn subtract(&mut self, agent: &AgentId, delta: &Resources) -> ResourceQuantities {
        let Some(held) = self.resources.get_mut(agent) else {
            return ResourceQuantities::new();
        };

        *held -= delta;

        // Only shared instances whose last copy is gone count.
        let shared_removed = delta.shared().filter(|r| !held.contains_resource(r));
        let removed =
            ResourceQuantities::from_scalar_resources(&(&delta.non_shared() + &shared_removed).scalars());

        if held.is_empty() {
            self.resources.remove(agent);
        }
        self.totals -= &removed;
        removed
    }

    /// Replace `old` with `new` on `agent`. Returns `(removed, added)`.
    ///
    /// The total moves by the plain scalar quantities of `old` and `new`;
    /// shared instances are not filtered here.
    pub(crate) fn update(
        &mut self,
        agent: &AgentId,
        old: &Resources,
        new: &Resources,
    ) -> (ResourceQuantities, ResourceQuantities) {
        let removed = ResourceQuantities::from_scalar_resources(&old.scalars());
        let added = ResourceQuantities::from_scalar_resources(&new.scalars());

        let held = self.resources.entry(agent.clone()).or_default();
        *held -= old;
        *held += new;
        if held.is_empty() {
            self.resources.remove(agent);
        }

        self.totals -= &removed;
        self.totals += &added;
        (removed, added)
    }

    /// Totals recomputed from the per-agent map.
    pub(crate) fn expected_totals(&self) -> ResourceQuantities {
        let mut expected = ResourceQuantities::new();
        for held in self.resources.values() {
            expected += &ResourceQuantities::from_scalar_resources(&held.scalars());
        }
        expected
    }
}
