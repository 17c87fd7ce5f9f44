//! Identity types for reactors, triggers and reactions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a reactor in the containment tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReactorId(pub u64);

impl ReactorId {
    /// Create a new reactor ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reactor:{}", self.0)
    }
}

/// Unique identifier for a trigger (port, action, timer, startup, shutdown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerId(pub u64);

impl TriggerId {
    /// Create a new trigger ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trigger:{}", self.0)
    }
}

/// Unique identifier for a reaction, mutation or procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReactionId(pub u64);

impl ReactionId {
    /// Create a new reaction ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reaction:{}", self.0)
    }
}

/// Capability token identifying the reactor that holds it
///
/// Each reactor receives exactly one key when it is created. Write and
/// schedule handles carry the key of the reactor that obtained them, and the
/// runtime refuses any write whose key does not match the executing
/// reaction's owner. The inner value is private so keys cannot be forged
/// outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessKey(u64);

impl AccessKey {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactor_id() {
        let id = ReactorId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(format!("{}", id), "reactor:42");
    }

    #[test]
    fn test_trigger_and_reaction_ids() {
        assert_eq!(TriggerId::new(7).to_string(), "trigger:7");
        assert_eq!(ReactionId::new(3).to_string(), "reaction:3");
        assert!(ReactionId::new(1) < ReactionId::new(2));
    }

    #[test]
    fn test_access_keys_compare_by_value() {
        assert_eq!(AccessKey::new(1), AccessKey::new(1));
        assert_ne!(AccessKey::new(1), AccessKey::new(2));
    }
}
