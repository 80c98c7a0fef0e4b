//! Bookkeeping of the connections the server currently tracks.
//!
//! The table is a flat list. Entries are never removed while the event loop
//! walks it: a disconnect only clears the entry's liveness flag, and the dead
//! entries are swept by [`ConnectionTable::compact`] at the start of the next
//! tick. Compaction swaps the last entry into each hole, so iteration order is
//! not insertion order once anything has been removed.

use crate::transport::ConnectionHandle;
use log::{debug, info};
use std::time::Instant;

/// Default capacity of the table
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// A tracked connection
#[derive(Debug, Clone)]
pub struct Connection {
    /// Transport-assigned identifier, unique among live connections
    pub id: u32,
    /// Handle the transport resolves this connection with
    pub handle: ConnectionHandle,
    /// Cleared when the transport reports a disconnect
    pub alive: bool,
    /// Last state name the client reported switching to
    pub acknowledged_state: Option<String>,
    pub connected_at: Instant,
}

impl Connection {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            id: handle.id(),
            handle,
            alive: true,
            acknowledged_state: None,
            connected_at: Instant::now(),
        }
    }
}

pub struct ConnectionTable {
    connections: Vec<Connection>,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Vec::with_capacity(max_connections.min(DEFAULT_MAX_CONNECTIONS)),
            max_connections,
        }
    }

    /// Starts tracking a newly accepted connection.
    ///
    /// Returns the connection id, or None when the live connections already
    /// fill the table.
    pub fn add(&mut self, handle: ConnectionHandle) -> Option<u32> {
        if self.live_count() >= self.max_connections {
            return None;
        }

        let connection = Connection::new(handle);
        let id = connection.id;
        self.connections.push(connection);
        Some(id)
    }

    /// Live connections, in table order
    pub fn live(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter().filter(|connection| connection.alive)
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.connections.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.connections.get_mut(index)
    }

    /// Finds a live connection by id
    pub fn find(&self, id: u32) -> Option<&Connection> {
        self.live().find(|connection| connection.id == id)
    }

    /// Clears the liveness flag of the entry at `index`. The entry stays in
    /// the table until the next `compact`.
    pub fn mark_dead(&mut self, index: usize) -> bool {
        match self.connections.get_mut(index) {
            Some(connection) if connection.alive => {
                connection.alive = false;
                debug!("Connection {} marked dead", connection.id);
                true
            }
            _ => false,
        }
    }

    /// Removes every dead entry, swapping the last entry into each hole.
    /// Returns how many entries were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.connections.len();

        let mut index = 0;
        while index < self.connections.len() {
            if self.connections[index].alive {
                index += 1;
            } else {
                let removed = self.connections.swap_remove(index);
                info!("Connection {} removed", removed.id);
            }
        }

        before - self.connections.len()
    }

    /// Number of entries, dead ones included
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS)
    }
}
