//! Scalar resource quantities, keyed by resource name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::resources::Resources;
use crate::value::round_scalar;

/// Name → amount map of scalar resources.
///
/// Roles, ids and sharedness are erased; only the name and amount remain.
/// Zero amounts are never stored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceQuantities {
    quantities: BTreeMap<String, f64>,
}

impl ResourceQuantities {
    pub const fn new() -> Self {
        Self {
            quantities: BTreeMap::new(),
        }
    }

    /// Sum the scalar entries of `resources`.
    ///
    /// A shared instance contributes its amount once, whatever its
    /// reference count.
    pub fn from_scalar_resources(resources: &Resources) -> Self {
        let mut out = Self::new();
        for resource in resources.iter() {
            if let Some(amount) = resource.value.as_scalar() {
                out.add_amount(&resource.name, amount);
            }
        }
        out
    }

    /// Amount for `name`, zero when absent.
    pub fn get(&self, name: &str) -> f64 {
        self.quantities.get(name).copied().unwrap_or(0.0)
    }

    /// Whether every quantity in `other` fits within `self`.
    pub fn contains(&self, other: &ResourceQuantities) -> bool {
        other
            .quantities
            .iter()
            .all(|(name, amount)| round_scalar(self.get(name) - amount) >= 0.0)
    }

    /// Add `amount` of `name`. A non-positive result drops the entry.
    pub fn add_amount(&mut self, name: &str, amount: f64) {
        let current = self.get(name);
        self.set(name, current + amount);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.quantities.iter().map(|(name, amount)| (name.as_str(), *amount))
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    fn set(&mut self, name: &str, amount: f64) {
        let amount = round_scalar(amount);
        if amount > 0.0 {
            self.quantities.insert(name.to_string(), amount);
        } else {
            self.quantities.remove(name);
        }
    }
}

impl fmt::Display for ResourceQuantities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .quantities
            .iter()
            .map(|(name, amount)| format!("{}:{}", name, amount))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ResourceQuantities {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (name, amount) in iter {
            let name: String = name.into();
            out.add_amount(&name, amount);
        }
        out
    }
}

impl AddAssign<&ResourceQuantities> for ResourceQuantities {
    fn add_assign(&mut self, rhs: &ResourceQuantities) {
        for (name, amount) in rhs.iter() {
            self.add_amount(name, amount);
        }
    }
}

/// Subtraction clamps each quantity at zero.
impl SubAssign<&ResourceQuantities> for ResourceQuantities {
    fn sub_assign(&mut self, rhs: &ResourceQuantities) {
        for (name, amount) in rhs.iter() {
            let current = self.get(name);
            self.set(name, (current - amount).max(0.0));
        }
    }
}

impl Add<&ResourceQuantities> for &ResourceQuantities {
    type Output = ResourceQuantities;

    fn add(self, rhs: &ResourceQuantities) -> ResourceQuantities {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub<&ResourceQuantities> for &ResourceQuantities {
    type Output = ResourceQuantities;

    fn sub(self, rhs: &ResourceQuantities) -> ResourceQuantities {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Resource;

    #[test]
    fn from_scalar_resources_erases_roles() {
        let r = Resources::parse("cpus:1;cpus(web):2;mem:64;ports:[1-10]").unwrap();
        let q = ResourceQuantities::from_scalar_resources(&r);

        assert_eq!(q.get("cpus"), 3.0);
        assert_eq!(q.get("mem"), 64.0);
        assert_eq!(q.get("ports"), 0.0);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn shared_instance_counted_once() {
        let volume = Resource::scalar("disk", 10.0).with_id("v").into_shared();
        let mut r = Resources::new();
        r += &volume;
        r += &volume;
        r += &volume;

        let q = ResourceQuantities::from_scalar_resources(&r);
        assert_eq!(q.get("disk"), 10.0);
    }

    #[test]
    fn subtraction_clamps_and_drops_zeroes() {
        let a: ResourceQuantities = [("cpus", 2.0), ("mem", 10.0)].into_iter().collect();
        let b: ResourceQuantities = [("cpus", 5.0), ("mem", 4.0)].into_iter().collect();

        let diff = &a - &b;
        assert_eq!(diff.get("cpus"), 0.0);
        assert_eq!(diff.get("mem"), 6.0);
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn contains_compares_per_name() {
        let a: ResourceQuantities = [("cpus", 2.0), ("mem", 10.0)].into_iter().collect();
        let b: ResourceQuantities = [("cpus", 2.0)].into_iter().collect();
        assert!(a.contains(&b));
        assert!(!b.contains(&a));
        assert!(a.contains(&ResourceQuantities::new()));
    }

    #[test]
    fn add_amount_accumulates_on_owned_value() {
        let mut q = ResourceQuantities::new();
        q.add_amount("cpus", 1.25);
        q.add_amount("cpus", 0.75);
        q.add_amount("mem", 0.0);
        assert_eq!(q.get("cpus"), 2.0);
        assert_eq!(q.len(), 1);

        let sum = &q + &q;
        assert_eq!(sum.get("cpus"), 4.0);
    }

    #[test]
    fn display_is_sorted_by_name() {
        let q: ResourceQuantities = [("mem", 1.5), ("cpus", 2.0)].into_iter().collect();
        assert_eq!(q.to_string(), "cpus:2; mem:1.5");
    }
}
