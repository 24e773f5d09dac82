//! Identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of the agent (worker machine) resources live on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random agent id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(AgentId::generate(), AgentId::generate());
    }

    #[test]
    fn display_is_raw_id() {
        assert_eq!(AgentId::new("agent-1").to_string(), "agent-1");
        assert_eq!(AgentId::from("agent-1").as_str(), "agent-1");
    }

    #[test]
    fn ordering_follows_id_text() {
        let mut ids = vec![AgentId::new("b"), AgentId::new("a"), AgentId::new("c")];
        ids.sort();
        assert_eq!(ids, vec![AgentId::new("a"), AgentId::new("b"), AgentId::new("c")]);
    }
}
