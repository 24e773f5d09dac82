//! Resources and resource collections.
//!
//! A [`Resources`] value distinguishes two kinds of resource:
//!
//! - **Non-shared** resources are quantitative. Adding `cpus:1` to
//!   `cpus:2` yields `cpus:3`.
//! - **Shared** resources have identity semantics. The same instance (for
//!   example a persistent volume) may be handed out several times; the
//!   collection keeps one entry per instance with a reference count.
//!
//! Iterating a collection yields one [`Resource`] per entry, so a shared
//! instance held `n` times is seen exactly once.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::error::{ResourceError, ResourceResult};
use crate::value::Value;

/// A single named resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub value: Value,
    /// Role the resource is reserved for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Shared resources are tracked by identity rather than quantity.
    #[serde(default)]
    pub shared: bool,
    /// Instance identifier (e.g. a persistent volume id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            role: None,
            shared: false,
            id: None,
        }
    }

    pub fn scalar(name: impl Into<String>, amount: f64) -> Self {
        Self::new(name, Value::scalar(amount))
    }

    pub fn ranges<I>(name: impl Into<String>, ranges: I) -> Self
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        Self::new(name, Value::ranges(ranges))
    }

    pub fn set<I, S>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, Value::set(items))
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mark the resource as shared.
    pub fn into_shared(mut self) -> Self {
        self.shared = true;
        self
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Whether two non-shared resources can be merged into one entry.
    fn combinable(&self, other: &Resource) -> bool {
        !self.shared
            && !other.shared
            && self.name == other.name
            && self.role == other.role
            && self.id == other.id
            && self.value.same_kind(&other.value)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(role) = &self.role {
            write!(f, "({})", role)?;
        }
        if let Some(id) = &self.id {
            write!(f, "[{}]", id)?;
        }
        write!(f, ":{}", self.value)?;
        if self.shared {
            write!(f, " (shared)")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    resource: Resource,
    /// Reference count; only set for shared resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shared_count: Option<u32>,
}

impl Entry {
    fn copies(&self) -> u32 {
        self.shared_count.unwrap_or(1)
    }
}

/// A collection of resources with shared-aware arithmetic.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct Resources {
    entries: Vec<Entry>,
}

impl Resources {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Parse `name[(role)]:value` entries separated by `;`.
    ///
    /// Values are scalars (`mem:1024`), ranges (`ports:[31000-31005, 32000-32000]`)
    /// or sets (`gpus:{a,b}`).
    pub fn parse(text: &str) -> ResourceResult<Self> {
        let mut resources = Resources::new();
        for token in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            resources += parse_resource(token)?;
        }
        Ok(resources)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct entries (a shared instance counts once).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// One item per distinct entry.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.entries.iter().map(|e| &e.resource)
    }

    /// How many copies of `resource` the collection holds.
    ///
    /// For a shared resource this is its reference count; a non-shared
    /// resource counts as one copy when it is contained.
    pub fn count(&self, resource: &Resource) -> u32 {
        if resource.shared {
            return self
                .entries
                .iter()
                .find(|e| e.resource == *resource)
                .map(Entry::copies)
                .unwrap_or(0);
        }
        u32::from(self.contains_resource(resource))
    }

    /// Whether every entry of `other` (with its copies) is held here.
    pub fn contains(&self, other: &Resources) -> bool {
        let mut remaining = self.clone();
        for entry in &other.entries {
            if !remaining.contains_copies(&entry.resource, entry.copies()) {
                return false;
            }
            remaining.subtract_copies(&entry.resource, entry.copies());
        }
        true
    }

    pub fn contains_resource(&self, resource: &Resource) -> bool {
        self.contains_copies(resource, 1)
    }

    /// The shared subset, reference counts preserved.
    pub fn shared(&self) -> Resources {
        self.filter(Resource::is_shared)
    }

    pub fn non_shared(&self) -> Resources {
        self.filter(|r| !r.is_shared())
    }

    /// Entries with scalar values.
    pub fn scalars(&self) -> Resources {
        self.filter(|r| r.value.is_scalar())
    }

    /// Keep the entries matching `predicate`, reference counts preserved.
    pub fn filter<F>(&self, predicate: F) -> Resources
    where
        F: Fn(&Resource) -> bool,
    {
        Resources {
            entries: self
                .entries
                .iter()
                .filter(|e| predicate(&e.resource))
                .cloned()
                .collect(),
        }
    }

    /// Sum of the scalar entries named `name` (each distinct entry once).
    pub fn get_scalar(&self, name: &str) -> f64 {
        let total: f64 = self
            .iter()
            .filter(|r| r.name == name)
            .filter_map(|r| r.value.as_scalar())
            .sum();
        crate::value::round_scalar(total)
    }

    fn contains_copies(&self, resource: &Resource, copies: u32) -> bool {
        if resource.shared {
            return self.count(resource) >= copies;
        }
        if resource.is_empty() {
            return true;
        }
        self.entries
            .iter()
            .any(|e| e.resource.combinable(resource) && e.resource.value.contains(&resource.value))
    }

    fn add_copies(&mut self, resource: &Resource, copies: u32) {
        if copies == 0 {
            return;
        }

        if resource.shared {
            match self.entries.iter_mut().find(|e| e.resource == *resource) {
                Some(entry) => entry.shared_count = Some(entry.copies() + copies),
                None => self.entries.push(Entry {
                    resource: resource.clone(),
                    shared_count: Some(copies),
                }),
            }
            return;
        }

        if resource.is_empty() {
            return;
        }

        match self.entries.iter_mut().find(|e| e.resource.combinable(resource)) {
            Some(entry) => entry.resource.value.merge(&resource.value),
            None => self.entries.push(Entry {
                resource: resource.clone(),
                shared_count: None,
            }),
        }
    }

    fn subtract_copies(&mut self, resource: &Resource, copies: u32) {
        if resource.shared {
            if let Some(index) = self.entries.iter().position(|e| e.resource == *resource) {
                let remaining = self.entries[index].copies().saturating_sub(copies);
                if remaining == 0 {
                    self.entries.remove(index);
                } else {
                    self.entries[index].shared_count = Some(remaining);
                }
            }
            return;
        }

        if let Some(index) = self
            .entries
            .iter()
            .position(|e| e.resource.combinable(resource))
        {
            let entry = &mut self.entries[index];
            entry.resource.value.remove(&resource.value);
            if entry.resource.is_empty() {
                self.entries.remove(index);
            }
        }
    }
}

fn parse_resource(token: &str) -> ResourceResult<Resource> {
    let malformed = || ResourceError::Malformed(token.to_string());

    let (key, value) = token.split_once(':').ok_or_else(malformed)?;
    let (key, value) = (key.trim(), value.trim());

    let (name, role) = match key.split_once('(') {
        Some((name, rest)) => {
            let role = rest.strip_suffix(')').ok_or_else(malformed)?;
            (name.trim(), Some(role.trim().to_string()))
        }
        None => (key, None),
    };

    if name.is_empty() || value.is_empty() {
        return Err(malformed());
    }

    let value = if let Some(inner) = value.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or_else(|| ResourceError::InvalidRanges {
            name: name.to_string(),
            value: value.to_string(),
        })?;
        Value::ranges(parse_ranges(name, inner)?)
    } else if let Some(inner) = value.strip_prefix('{') {
        let inner = inner.strip_suffix('}').ok_or_else(malformed)?;
        Value::set(inner.split(',').map(str::trim).filter(|s| !s.is_empty()))
    } else {
        let invalid = || ResourceError::InvalidScalar {
            name: name.to_string(),
            value: value.to_string(),
        };
        let amount: f64 = value.parse().map_err(|_| invalid())?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(invalid());
        }
        Value::scalar(amount)
    };

    let mut resource = Resource::new(name, value);
    resource.role = role;
    Ok(resource)
}

fn parse_ranges(name: &str, inner: &str) -> ResourceResult<Vec<(u64, u64)>> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|part| {
            let invalid = || ResourceError::InvalidRanges {
                name: name.to_string(),
                value: part.to_string(),
            };
            let (begin, end) = part.split_once('-').ok_or_else(invalid)?;
            let begin: u64 = begin.trim().parse().map_err(|_| invalid())?;
            let end: u64 = end.trim().parse().map_err(|_| invalid())?;
            if begin > end {
                return Err(invalid());
            }
            Ok((begin, end))
        })
        .collect()
}

/// Entries are re-added one by one, so empty values, zero counts and
/// duplicate entries collapse the same way they do under `+=`.
impl<'de> Deserialize<'de> for Resources {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        let mut resources = Resources::new();
        for entry in entries {
            let copies = if entry.resource.shared { entry.copies() } else { 1 };
            resources.add_copies(&entry.resource, copies);
        }
        Ok(resources)
    }
}

impl PartialEq for Resources {
    fn eq(&self, other: &Self) -> bool {
        self.contains(other) && other.contains(self)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|e| match e.shared_count {
                Some(count) if count > 1 => format!("{} x{}", e.resource, count),
                _ => e.resource.to_string(),
            })
            .collect();
        write!(f, "{{{}}}", parts.join("; "))
    }
}

impl From<Resource> for Resources {
    fn from(resource: Resource) -> Self {
        let mut resources = Resources::new();
        resources += &resource;
        resources
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut resources = Resources::new();
        for resource in iter {
            resources += &resource;
        }
        resources
    }
}

impl AddAssign<&Resource> for Resources {
    fn add_assign(&mut self, rhs: &Resource) {
        self.add_copies(rhs, 1);
    }
}

impl AddAssign<Resource> for Resources {
    fn add_assign(&mut self, rhs: Resource) {
        self.add_copies(&rhs, 1);
    }
}

impl SubAssign<&Resource> for Resources {
    fn sub_assign(&mut self, rhs: &Resource) {
        self.subtract_copies(rhs, 1);
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        for entry in &rhs.entries {
            self.add_copies(&entry.resource, entry.copies());
        }
    }
}

impl AddAssign<Resources> for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self += &rhs;
    }
}

impl SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, rhs: &Resources) {
        for entry in &rhs.entries {
            self.subtract_copies(&entry.resource, entry.copies());
        }
    }
}

impl SubAssign<Resources> for Resources {
    fn sub_assign(&mut self, rhs: Resources) {
        *self -= &rhs;
    }
}

impl Add<&Resources> for &Resources {
    type Output = Resources;

    fn add(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(mut self, rhs: Resources) -> Resources {
        self += &rhs;
        self
    }
}

impl Sub<&Resources> for &Resources {
    type Output = Resources;

    fn sub(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(mut self, rhs: Resources) -> Resources {
        self -= &rhs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> Resource {
        Resource::scalar("disk", 10.0).with_id("vol-1").into_shared()
    }

    #[test]
    fn non_shared_scalars_merge() {
        let mut r = Resources::parse("cpus:1;mem:512").unwrap();
        r += Resources::parse("cpus:2").unwrap();

        assert_eq!(r.len(), 2);
        assert_eq!(r.get_scalar("cpus"), 3.0);
        assert_eq!(r.get_scalar("mem"), 512.0);
    }

    #[test]
    fn shared_copies_are_reference_counted() {
        let mut r = Resources::new();
        r += &volume();
        r += &volume();

        assert_eq!(r.len(), 1);
        assert_eq!(r.count(&volume()), 2);
        // Iteration sees the instance once.
        assert_eq!(r.get_scalar("disk"), 10.0);

        r -= &volume();
        assert_eq!(r.count(&volume()), 1);
        assert!(r.contains_resource(&volume()));

        r -= &volume();
        assert!(r.is_empty());
        assert!(!r.contains_resource(&volume()));
    }

    #[test]
    fn contains_respects_copies() {
        let one: Resources = volume().into();
        let two = &one + &one;

        assert!(two.contains(&one));
        assert!(two.contains(&two));
        assert!(!one.contains(&two));
    }

    #[test]
    fn shared_and_non_shared_do_not_mix() {
        let plain = Resource::scalar("disk", 10.0).with_id("vol-1");
        let r: Resources = volume().into();

        assert!(!r.contains_resource(&plain));
        assert_eq!(r.shared().len(), 1);
        assert!(r.non_shared().is_empty());
    }

    #[test]
    fn roles_keep_entries_apart() {
        let r = Resources::parse("cpus:1;cpus(web):2").unwrap();
        assert_eq!(r.len(), 2);
        assert!(!r.contains(&Resources::parse("cpus(web):3").unwrap()));
        assert!(r.contains(&Resources::parse("cpus(web):2;cpus:1").unwrap()));
    }

    #[test]
    fn subtraction_drops_empty_entries() {
        let r = Resources::parse("cpus:2;mem:100").unwrap()
            - Resources::parse("cpus:2").unwrap();
        assert_eq!(r, Resources::parse("mem:100").unwrap());
    }

    #[test]
    fn zero_scalars_are_not_stored() {
        let r = Resources::parse("cpus:0").unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn scalars_filter_drops_ranges_and_sets() {
        let r = Resources::parse("cpus:1;ports:[31000-31010];gpus:{a,b}").unwrap();
        let scalars = r.scalars();
        assert_eq!(scalars.len(), 1);
        assert_eq!(scalars.get_scalar("cpus"), 1.0);
    }

    #[test]
    fn equality_ignores_entry_order() {
        let a = Resources::parse("cpus:1;mem:2").unwrap();
        let b = Resources::parse("mem:2;cpus:1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_ranges_and_sets() {
        let r = Resources::parse("ports:[1-5, 10-12];gpus:{x, y}").unwrap();
        assert!(r.contains_resource(&Resource::ranges("ports", vec![(2, 4), (11, 11)])));
        assert!(r.contains_resource(&Resource::set("gpus", ["y"])));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            Resources::parse("cpus"),
            Err(ResourceError::Malformed(_))
        ));
        assert!(matches!(
            Resources::parse("cpus:-1"),
            Err(ResourceError::InvalidScalar { .. })
        ));
        assert!(matches!(
            Resources::parse("ports:[5-1]"),
            Err(ResourceError::InvalidRanges { .. })
        ));
        assert!(matches!(
            Resources::parse("cpus(web:1"),
            Err(ResourceError::Malformed(_))
        ));
    }

    #[test]
    fn display_shows_copies() {
        let r = &Resources::from(volume()) + &Resources::from(volume());
        assert_eq!(r.to_string(), "{disk[vol-1]:10 (shared) x2}");
    }

    #[test]
    fn serde_preserves_shared_counts() {
        let mut r = Resources::parse("cpus:1").unwrap();
        r += &volume();
        r += &volume();

        let json = serde_json::to_string(&r).unwrap();
        let back: Resources = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.count(&volume()), 2);
    }

    #[test]
    fn deserialize_normalizes_entries() {
        let zero: Resources =
            serde_json::from_str(r#"[{"resource":{"name":"cpus","value":{"scalar":0.0}}}]"#).unwrap();
        assert!(zero.is_empty());

        let json = serde_json::json!([
            {"resource": {"name": "cpus", "value": {"scalar": 1.0}}},
            {"resource": {"name": "cpus", "value": {"scalar": 2.0}}, "shared_count": 4},
            {"resource": {"name": "disk", "value": {"scalar": 5.0}, "shared": true, "id": "v"}, "shared_count": 0},
        ]);
        let merged: Resources = serde_json::from_value(json).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get_scalar("cpus"), 3.0);
        assert_eq!(merged, Resources::parse("cpus:3").unwrap());
    }
}
