//! Error types for the sorter.

use sorter_types::{AgentId, ResourceQuantities, Resources};
use thiserror::Error;

/// Errors returned by sorter operations.
///
/// Every variant except `Config` is a caller contract violation. The
/// operation that returns one leaves the sorter unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SorterError {
    /// `add` on a path that is already a client.
    #[error("client already exists: {0}")]
    ClientAlreadyExists(String),

    /// The path does not name a registered client.
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// The path cannot name a client.
    #[error("invalid client path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Weights must be finite and non-negative.
    #[error("invalid weight {weight} for '{path}'")]
    InvalidWeight { path: String, weight: f64 },

    /// The client holds nothing on the agent.
    #[error("client {client} has no allocation on agent {agent}")]
    AgentNotFound { client: String, agent: AgentId },

    /// The client holds less on the agent than the caller tried to release.
    #[error("client {client} on agent {agent} holds {held}, cannot release {requested}")]
    InsufficientAllocation {
        client: String,
        agent: AgentId,
        held: Resources,
        requested: Resources,
    },

    /// An update would take more out of the client's totals than they hold.
    #[error("client {client} totals [{totals}] do not cover [{requested}]")]
    InsufficientTotals {
        client: String,
        totals: ResourceQuantities,
        requested: ResourceQuantities,
    },

    /// Internal state check failed.
    #[error("sorter invariant violated: {0}")]
    InvariantViolation(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for sorter operations.
pub type SorterResult<T> = Result<T, SorterError>;
