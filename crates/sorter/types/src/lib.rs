//! Sorter Types - resource values shared by the allocator sorters
//!
//! This crate provides the resource arithmetic the sorters build on:
//! - [`Resources`]: shared-aware resource collections
//! - [`ResourceQuantities`]: name → amount maps of scalar resources
//! - [`AgentId`]: identifiers for the agents resources live on

#![deny(unsafe_code)]

pub mod error;
pub mod ids;
pub mod quantities;
pub mod resources;
pub mod value;

pub use error::{ResourceError, ResourceResult};
pub use ids::AgentId;
pub use quantities::ResourceQuantities;
pub use resources::{Resource, Resources};
pub use value::Value;
