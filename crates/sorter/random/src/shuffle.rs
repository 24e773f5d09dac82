//! Relative weights and the weighted-random permutation.

use rand::Rng;
use std::collections::HashMap;

use crate::tree::{NodeKind, Tree};

/// Cached active clients and their relative weights.
#[derive(Debug, Clone)]
pub(crate) struct SortInfo {
    pub(crate) dirty: bool,
    pub(crate) clients: Vec<String>,
    pub(crate) weights: Vec<f64>,
}

impl Default for SortInfo {
    fn default() -> Self {
        Self {
            dirty: true,
            clients: Vec::new(),
            weights: Vec::new(),
        }
    }
}

impl SortInfo {
    /// Recompute the cache if it is dirty. Returns whether it was.
    pub(crate) fn refresh(&mut self, tree: &mut Tree, weights: &HashMap<String, f64>) -> bool {
        if !self.dirty {
            return false;
        }
        let (clients, relative) = relative_weights(tree, weights);
        self.clients = clients;
        self.weights = relative;
        self.dirty = false;
        true
    }
}

/// Relative weight of every active leaf, in tree order.
///
/// Each internal node hands its own share to the children that have an
/// active leaf below them, in proportion to their configured weights.
pub(crate) fn relative_weights(tree: &mut Tree, weights: &HashMap<String, f64>) -> (Vec<String>, Vec<f64>) {
    let live = tree.active_through();
    let mut clients = Vec::new();
    let mut relative = Vec::new();

    let mut stack = vec![(tree.root(), 1.0_f64)];
    while let Some((id, share)) = stack.pop() {
        match tree[id].kind {
            NodeKind::InactiveLeaf => {}
            NodeKind::ActiveLeaf => {
                clients.push(tree.client_path(id).to_string());
                relative.push(share);
            }
            NodeKind::Internal => {
                let children: Vec<_> = tree[id]
                    .children
                    .iter()
                    .copied()
                    .filter(|child| live.contains(child))
                    .collect();

                let mut shares = Vec::with_capacity(children.len());
                for child in children {
                    shares.push((child, tree.weight(child, weights)));
                }
                // Scaled by the largest sibling so large weights cannot sum to inf.
                let max = shares.iter().map(|(_, w)| *w).fold(0.0_f64, f64::max);
                let total: f64 = if max > 0.0 {
                    shares.iter().map(|(_, w)| w / max).sum()
                } else {
                    0.0
                };

                for (child, weight) in shares.into_iter().rev() {
                    let child_share = if total > 0.0 { share * (weight / max) / total } else { 0.0 };
                    stack.push((child, child_share));
                }
            }
        }
    }

    (clients, relative)
}

/// Weighted permutation of `clients`.
///
/// Each client draws `u` from `(0, 1]` and is keyed by `-ln(u) / weight`;
/// ascending keys give the order. The chance a client comes first equals
/// its share of the total weight. Zero-weight clients are left out.
pub(crate) fn weighted_shuffle<R: Rng>(clients: &[String], weights: &[f64], rng: &mut R) -> Vec<String> {
    let mut keyed: Vec<(f64, &String)> = clients
        .iter()
        .zip(weights)
        .filter(|(_, weight)| **weight > 0.0)
        .map(|(client, &weight)| {
            let u = 1.0 - rng.gen::<f64>();
            (-u.ln() / weight, client)
        })
        .collect();

    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    keyed.into_iter().map(|(_, client)| client.clone()).collect()
}
