//! Resource values: scalars, port-style ranges and sets.
//!
//! Scalars use fixed-point semantics with three decimal places, so
//! repeated additions and subtractions never accumulate float drift.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Number of fractional digits kept for scalar values.
const SCALAR_PRECISION: f64 = 1000.0;

/// Round a scalar to the fixed-point precision.
pub fn round_scalar(value: f64) -> f64 {
    (value * SCALAR_PRECISION).round() / SCALAR_PRECISION
}

fn scalar_units(value: f64) -> i64 {
    (value * SCALAR_PRECISION).round() as i64
}

/// Value carried by a resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// A quantity such as `cpus:2.5` or `mem:1024`.
    Scalar(f64),
    /// Inclusive, sorted, coalesced intervals such as `ports:[31000-32000]`.
    Ranges(Vec<(u64, u64)>),
    /// A set of labels such as `gpus:{a,b}`.
    Set(BTreeSet<String>),
}

impl Value {
    pub fn scalar(value: f64) -> Self {
        Self::Scalar(round_scalar(value))
    }

    pub fn ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        Self::Ranges(normalize_ranges(ranges.into_iter().collect()))
    }

    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(items.into_iter().map(Into::into).collect())
    }

    /// The scalar amount, if this is a scalar value.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Whether the value holds nothing (zero scalar, no ranges, empty set).
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(v) => scalar_units(*v) <= 0,
            Self::Ranges(r) => r.is_empty(),
            Self::Set(s) => s.is_empty(),
        }
    }

    /// Whether both values are of the same variant.
    pub fn same_kind(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Whether `other` fits entirely inside `self`.
    ///
    /// Values of different kinds never contain each other.
    pub fn contains(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => scalar_units(*a) >= scalar_units(*b),
            (Self::Ranges(outer), Self::Ranges(inner)) => inner
                .iter()
                .all(|(ib, ie)| outer.iter().any(|(ob, oe)| ob <= ib && ie <= oe)),
            (Self::Set(outer), Self::Set(inner)) => inner.is_subset(outer),
            _ => false,
        }
    }

    /// Merge `other` into `self`. Mismatched kinds are ignored.
    pub(crate) fn merge(&mut self, other: &Value) {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => *a = round_scalar(*a + *b),
            (Self::Ranges(a), Self::Ranges(b)) => {
                let mut merged = std::mem::take(a);
                merged.extend_from_slice(b);
                *a = normalize_ranges(merged);
            }
            (Self::Set(a), Self::Set(b)) => a.extend(b.iter().cloned()),
            _ => {}
        }
    }

    /// Remove `other` from `self`. Scalars clamp at zero.
    pub(crate) fn remove(&mut self, other: &Value) {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => *a = round_scalar((*a - *b).max(0.0)),
            (Self::Ranges(a), Self::Ranges(b)) => {
                for &(rb, re) in b {
                    *a = carve_range(a, rb, re);
                }
            }
            (Self::Set(a), Self::Set(b)) => a.retain(|item| !b.contains(item)),
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{}", v),
            Self::Ranges(ranges) => {
                let parts: Vec<String> = ranges.iter().map(|(b, e)| format!("{}-{}", b, e)).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Set(items) => {
                let parts: Vec<&str> = items.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Sort, drop inverted intervals and coalesce overlapping or adjacent ones.
fn normalize_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.retain(|(b, e)| b <= e);
    ranges.sort_unstable();

    let mut out: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (b, e) in ranges {
        match out.last_mut() {
            Some(last) if b <= last.1.saturating_add(1) => last.1 = last.1.max(e),
            _ => out.push((b, e)),
        }
    }
    out
}

fn carve_range(ranges: &[(u64, u64)], rb: u64, re: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::with_capacity(ranges.len() + 1);
    for &(b, e) in ranges {
        if re < b || rb > e {
            out.push((b, e));
            continue;
        }
        if b < rb {
            out.push((b, rb - 1));
        }
        if re < e {
            out.push((re + 1, e));
        }
    }
    out
}
