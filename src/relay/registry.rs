//! Registry of attached Rhino clients.

use std::fmt;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Opaque identifier of one attached remote client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps a transport-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The set of currently attached clients, in attach order.
///
/// Every operation takes the lock once, so a concurrent attach or detach is
/// never observed half-applied.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<IndexSet<ClientId>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client. Returns `false` if it was already attached.
    pub fn attach(&self, client: ClientId) -> bool {
        self.clients.lock().insert(client)
    }

    /// Removes a client. Returns `false` if it was not attached.
    pub fn detach(&self, client: &ClientId) -> bool {
        self.clients.lock().shift_remove(client)
    }

    /// Returns an owned snapshot of the attached clients.
    ///
    /// Later attach/detach calls do not affect the returned vector.
    #[must_use]
    pub fn list_attached(&self) -> Vec<ClientId> {
        self.clients.lock().iter().cloned().collect()
    }

    /// Returns `true` if no client is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Number of attached clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Returns `true` if the client is attached.
    #[must_use]
    pub fn contains(&self, client: &ClientId) -> bool {
        self.clients.lock().contains(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let registry = ClientRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.list_attached().is_empty());
    }

    #[test]
    fn attach_is_idempotent() {
        let registry = ClientRegistry::new();
        assert!(registry.attach(ClientId::from("clientA")));
        assert!(!registry.attach(ClientId::from("clientA")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_attached(), vec![ClientId::from("clientA")]);
    }

    #[test]
    fn detach_absent_is_noop() {
        let registry = ClientRegistry::new();
        assert!(!registry.detach(&ClientId::from("ghost")));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_mutations() {
        let registry = ClientRegistry::new();
        registry.attach(ClientId::from("a"));
        registry.attach(ClientId::from("b"));

        let snapshot = registry.list_attached();
        registry.detach(&ClientId::from("a"));
        registry.attach(ClientId::from("c"));

        assert_eq!(snapshot, vec![ClientId::from("a"), ClientId::from("b")]);
        assert_eq!(
            registry.list_attached(),
            vec![ClientId::from("b"), ClientId::from("c")]
        );
    }

    #[test]
    fn arbitrary_event_sequences_keep_set_semantics() {
        let registry = ClientRegistry::new();
        let events = [
            ("attach", "a"),
            ("attach", "b"),
            ("attach", "a"),
            ("detach", "b"),
            ("detach", "b"),
            ("attach", "c"),
            ("detach", "z"),
            ("attach", "b"),
            ("detach", "a"),
        ];

        for (kind, id) in events {
            let id = ClientId::from(id);
            let attached = kind == "attach";
            if attached {
                registry.attach(id.clone());
            } else {
                registry.detach(&id);
            }

            let listed = registry.list_attached();
            assert_eq!(listed.contains(&id), attached, "after {kind} {id}");
            let mut deduped = listed.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(deduped.len(), listed.len(), "duplicate after {kind} {id}");
        }

        assert_eq!(
            registry.list_attached(),
            vec![ClientId::from("c"), ClientId::from("b")]
        );
        assert!(!registry.contains(&ClientId::from("a")));
    }
}
