//! Session Registry
//!
//! Concurrent map from session id to [`Session`], backed by `DashMap`.
//!
//! Lookups clone the transport `Arc` out of the map, so no shard lock is
//! ever held across an `.await`.
//!
//! Spans:
//! - `mcp.session.register` - Session inserted (initialize handshake)
//! - `mcp.session.adopt` - Session created for a client-supplied id
//! - `mcp.session.remove` - Session removed (close, DELETE, shutdown)

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::{Session, SessionStats};
use crate::transport::StreamableTransport;

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Look up the transport for a session.
    pub fn get(&self, id: &str) -> Option<Arc<StreamableTransport>> {
        self.sessions.get(id).map(|s| Arc::clone(&s.transport))
    }

    /// Register a session, replacing any previous entry with the same id.
    pub fn insert(&self, session: Session) {
        let _span = tracing::info_span!("mcp.session.register", mcp.session_id = %session.id).entered();

        let id = session.id.clone();
        let transport = Arc::clone(&session.transport);
        match self.sessions.insert(id, session) {
            Some(previous) if !Arc::ptr_eq(&previous.transport, &transport) => {
                tracing::warn!("Replaced a live session with a new transport");
            }
            Some(_) => tracing::debug!("Session re-registered"),
            None => tracing::info!(active = self.sessions.len(), "Session registered"),
        }
    }

    /// Get the transport for `id`, or build and register one atomically.
    ///
    /// `build` runs under the shard lock for `id`, so concurrent callers with
    /// the same unseen id get the same transport. It must not touch the
    /// registry. Returns the transport and whether this call created it.
    pub fn adopt<F, E>(&self, id: &str, build: F) -> Result<(Arc<StreamableTransport>, bool), E>
    where
        F: FnOnce() -> Result<Arc<StreamableTransport>, E>,
    {
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => Ok((Arc::clone(&entry.get().transport), false)),
            Entry::Vacant(entry) => {
                let _span = tracing::info_span!("mcp.session.adopt", mcp.session_id = %id).entered();

                let transport = build()?;
                entry.insert(Session::new(id, Arc::clone(&transport)));
                tracing::info!("Session created for client-supplied id");
                Ok((transport, true))
            }
        }
    }

    /// Remove a session. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if let Some(ref session) = removed {
            let _span = tracing::info_span!("mcp.session.remove", mcp.session_id = %id).entered();
            tracing::info!(
                age_ms = session.age().as_millis() as u64,
                active = self.sessions.len(),
                "Session removed"
            );
        }
        removed
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Snapshot of registered ids.
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session statistics.
    pub fn stats(&self) -> SessionStats {
        let transports: Vec<Arc<StreamableTransport>> = self
            .sessions
            .iter()
            .map(|e| Arc::clone(&e.value().transport))
            .collect();

        SessionStats {
            total: transports.len(),
            streaming: transports.iter().filter(|t| t.has_live_stream()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transport(id: &str) -> Arc<StreamableTransport> {
        StreamableTransport::new(TransportOptions::with_session_id(id))
    }

    #[test]
    fn test_insert_and_get_returns_same_transport() {
        let registry = SessionRegistry::new();
        let t = transport("s1");
        registry.insert(Session::new("s1", Arc::clone(&t)));

        let found = registry.get("s1").unwrap();
        assert!(Arc::ptr_eq(&found, &t));
        assert!(registry.contains("s1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let registry = SessionRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.insert(Session::new("s1", transport("s1")));

        assert!(registry.remove("s1").is_some());
        assert!(registry.remove("s1").is_none());
        assert!(registry.remove("never-existed").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_adopt_builds_once() {
        let registry = SessionRegistry::new();
        let builds = AtomicUsize::new(0);

        let build = || -> Result<_, std::convert::Infallible> {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(transport("client-id"))
        };

        let (first, created) = registry.adopt("client-id", build).unwrap();
        assert!(created);

        let (second, created) = registry
            .adopt("client-id", || -> Result<_, std::convert::Infallible> {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(transport("client-id"))
            })
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adopt_build_failure_registers_nothing() {
        let registry = SessionRegistry::new();
        let result = registry.adopt("x", || Err::<Arc<StreamableTransport>, _>("engine closed"));

        assert_eq!(result.err(), Some("engine closed"));
        assert!(!registry.contains("x"));
    }

    #[test]
    fn test_concurrent_adopt_yields_single_transport() {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .adopt("shared", || Ok::<_, ()>(transport("shared")))
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = results.iter().filter(|(_, created)| *created).count();
        assert_eq!(created, 1);
        assert!(results
            .windows(2)
            .all(|w| Arc::ptr_eq(&w[0].0, &w[1].0)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_snapshot_and_stats() {
        let registry = SessionRegistry::new();
        registry.insert(Session::new("a", transport("a")));
        registry.insert(Session::new("b", transport("b")));

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        // Removing while holding a snapshot is fine.
        for id in &ids {
            registry.remove(id);
        }
        assert!(registry.is_empty());

        let stats = registry.stats();
        assert_eq!(stats, SessionStats { total: 0, streaming: 0 });
    }
}
