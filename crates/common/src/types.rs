use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bound for anything that identifies an aggregate stream.
///
/// Identifiers key the unit of work and the event store, so they must be
/// hashable, comparable and cheap to clone. Implemented for every type that
/// satisfies the bounds.
pub trait AggregateKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> AggregateKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Unique identifier for an aggregate instance.
///
/// Wraps a UUID so aggregate ids are not confused with other UUID-based
/// identifiers such as event or invocation ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}
