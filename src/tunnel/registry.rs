//! Process-local connection registry.
//!
//! Maps connection identifiers to the state of the local socket. An entry
//! exists exactly while this process holds a live socket for the
//! connection; it is only ever removed through [`Registry::remove`], which
//! makes teardown idempotent.
//!
//! The map lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

use super::connection::{Connection, ConnectionId, ConnectionInfo, ConnectionStats, SocketWriter};
use super::error::{TunnelError, TunnelResult};

/// Table of live connections keyed by identifier.
pub struct Registry {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry. Allocated identifiers start at 1.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a fresh identifier.
    ///
    /// Counter based, so identifiers are never reused while the process runs.
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::IdCollision`] if `id` is already live. The
    /// existing entry is left untouched and `connection` is dropped.
    pub fn insert(&self, id: ConnectionId, connection: Connection) -> TunnelResult<()> {
        let mut connections = self.lock();
        if connections.contains_key(&id) {
            return Err(TunnelError::IdCollision(id));
        }
        connections.insert(id, connection);
        trace!(%id, open = connections.len(), "Registered connection");
        Ok(())
    }

    /// Writer and counters for a live connection.
    pub fn writer(&self, id: ConnectionId) -> Option<(SocketWriter, Arc<ConnectionStats>)> {
        self.lock()
            .get(&id)
            .map(|connection| (connection.writer(), connection.stats()))
    }

    /// Start the held reader of `id`.
    ///
    /// Returns `false` for unknown connections and readers that already run.
    pub fn release(&self, id: ConnectionId) -> bool {
        self.lock()
            .get_mut(&id)
            .is_some_and(|connection| connection.release())
    }

    /// Remove a connection, returning it if it was still registered.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.lock().remove(&id)
    }

    /// Remove every connection.
    pub fn drain(&self) -> Vec<(ConnectionId, Connection)> {
        self.lock().drain().collect()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted identifiers of live connections.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of every live connection, ordered by identifier.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .lock()
            .iter()
            .map(|(id, connection)| connection.info(*id))
            .collect();
        infos.sort_unstable_by_key(|info| info.id);
        infos
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
