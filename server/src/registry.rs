//! Session registry for the coordination server
//!
//! This module owns every live [`Session`], keyed by its identifier:
//! - Registration when a transport connection is accepted
//! - Removal on protocol violation, disconnect or transport error
//! - Identifier generation that never collides with a live session
//! - Iteration for broadcast delivery
//!
//! Once a session has been removed it is gone for good; nothing else holds a
//! reference to it, so no later broadcast can reach it.

use crate::session::{Session, SessionId};
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;

/// Length of generated session identifiers
const SESSION_ID_LEN: usize = 9;

/// Manages all live sessions
///
/// Lookups only happen by identifier (frame routing) or by iteration
/// (broadcast). Insertion order is irrelevant.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Live sessions indexed by their identifier
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Generates a short random identifier not used by any live session
    pub fn generate_id(&self) -> SessionId {
        loop {
            let id: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SESSION_ID_LEN)
                .map(char::from)
                .collect();
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Registers a new session
    ///
    /// Returns false and leaves the registry untouched if the identifier is
    /// already taken.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.sessions.contains_key(session.id()) {
            return false;
        }
        info!("[{}] New session", session.id());
        self.sessions.insert(session.id().to_string(), session);
        true
    }

    /// Removes a session and hands it back to the caller
    ///
    /// The caller is responsible for closing its transport.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        info!("[{}] Session removed", id);
        Some(session)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Iterates over every live session, connected or not
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Removes every session, for shutdown
    pub fn drain(&mut self) -> Vec<Session> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    /// Returns the number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns the number of sessions that completed the handshake
    pub fn connected_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_connected()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Outbound;
    use tokio::sync::mpsc;

    fn session(id: &str) -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(id.to_string(), tx), rx)
    }

    #[test]
    fn test_registry_creation() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.connected_count(), 0);
    }

    #[test]
    fn test_insert_and_remove() {
        let mut registry = SessionRegistry::new();
        let (s, _rx) = session("a");

        assert!(registry.insert(s));
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.id(), "a");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insert_duplicate_id() {
        let mut registry = SessionRegistry::new();
        let (first, _rx1) = session("a");
        let (second, _rx2) = session("a");

        assert!(registry.insert(first));
        assert!(!registry.insert(second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_nonexistent_session() {
        let mut registry = SessionRegistry::new();
        assert!(registry.remove("missing").is_none());
    }

    #[test]
    fn test_generate_id_shape() {
        let registry = SessionRegistry::new();
        let id = registry.generate_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_connected_count() {
        let mut registry = SessionRegistry::new();
        let (a, _rx1) = session("a");
        let (b, _rx2) = session("b");
        registry.insert(a);
        registry.insert(b);

        registry.get_mut("a").unwrap().mark_connected();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connected_count(), 1);
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = SessionRegistry::new();
        let (a, _rx1) = session("a");
        let (b, _rx2) = session("b");
        registry.insert(a);
        registry.insert(b);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
