use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::connection::Connection;

/// The set of live connections plus the id generator. Lookup by id scans
/// a hash map rather than a linear list (cardinality here is bounded by
/// concurrent logins, not total players, so either would do; the map
/// keeps `remove` and `get` both O(1)).
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(ConnectionRegistry { next_id: AtomicU64::new(1), connections: Mutex::new(HashMap::new()) })
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.connections.lock().unwrap().insert(connection.id(), connection);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuts down every live socket and clears the set. Each `close()` is
    /// idempotent and removes itself from this map, so we snapshot first
    /// to avoid mutating the map while iterating it.
    pub fn close_all(&self) {
        let snapshot: Vec<Arc<Connection>> = {
            let mut guard = self.connections.lock().unwrap();
            guard.drain().map(|(_, c)| c).collect()
        };
        for connection in snapshot {
            connection.close();
        }
    }
}
