//! Presence replica for one note session.
//!
//! Wraps the CRDT library's awareness object, bound to the same document
//! store as the document replica. The server itself has no cursor, so its
//! local state is cleared at construction.
//!
//! Inbound updates are applied through [`AwarenessReplica::apply_remote`],
//! which classifies the touched client IDs into added/updated/removed by
//! diffing the presence map around the application, re-encodes an update
//! covering exactly those IDs, and invokes the registered change handlers
//! synchronously, inside the caller's critical section, so that fan-out
//! order equals application order. Stale entries (older clocks) still fan
//! out; receiving peers drop them by clock.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use yrs::sync::{Awareness, AwarenessUpdate};
use yrs::Doc;

use crate::connection::ConnectionId;
use crate::protocol::ProtocolError;

/// Client-ID sets touched by one applied awareness update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwarenessChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
}

impl AwarenessChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Every touched ID, in added → updated → removed order.
    pub fn all(&self) -> impl Iterator<Item = u64> + '_ {
        self.added
            .iter()
            .chain(self.updated.iter())
            .chain(self.removed.iter())
            .copied()
    }

    /// IDs a submitting connection becomes responsible for: the ones it
    /// added or removed. An update observed without a prior add stays
    /// unowned.
    pub fn owned(&self) -> impl Iterator<Item = u64> + '_ {
        self.added.iter().chain(self.removed.iter()).copied()
    }
}

type ChangeHandler = Box<dyn Fn(&AwarenessChange, &AwarenessUpdate, Option<ConnectionId>) + Send + Sync>;

pub struct AwarenessReplica {
    awareness: Awareness,
    handlers: Arc<Mutex<Vec<ChangeHandler>>>,
}

impl AwarenessReplica {
    /// Build a replica over the given document. The server's own presence
    /// slot is cleared immediately.
    pub fn new(doc: &Doc) -> Self {
        let awareness = Awareness::new(doc.clone());
        awareness.clean_local_state();
        Self {
            awareness,
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a change handler invoked with the touched ID sets, the
    /// re-encoded update covering them, and the submitting connection.
    pub fn on_change<F>(&self, f: F)
    where
        F: Fn(&AwarenessChange, &AwarenessUpdate, Option<ConnectionId>) + Send + Sync + 'static,
    {
        self.handlers.lock().push(Box::new(f));
    }

    /// Apply a peer's awareness update.
    pub fn apply_remote(
        &mut self,
        update: AwarenessUpdate,
        origin: Option<ConnectionId>,
    ) -> Result<(), ProtocolError> {
        let touched: Vec<u64> = update.clients.keys().copied().collect();
        if touched.is_empty() {
            return Ok(());
        }

        let before: HashSet<u64> = self
            .awareness
            .iter()
            .filter(|(_, state)| state.data.is_some())
            .map(|(id, _)| id)
            .collect();
        self.awareness
            .apply_update(update)
            .map_err(|e| ProtocolError::Crdt(e.to_string()))?;
        let after: HashSet<u64> = self
            .awareness
            .iter()
            .filter(|(_, state)| state.data.is_some())
            .map(|(id, _)| id)
            .collect();

        let mut change = AwarenessChange::default();
        for id in touched {
            match (before.contains(&id), after.contains(&id)) {
                (false, true) => change.added.push(id),
                (true, true) => change.updated.push(id),
                // A null state is a removal, whether or not the state was
                // known beforehand.
                (_, false) => change.removed.push(id),
            }
        }
        self.emit(change, origin)
    }

    /// Locally expire the given client IDs, e.g. when the connection that
    /// introduced them disconnects. The library advances their clocks, so
    /// the resulting broadcast supersedes any state peers still hold.
    pub fn remove_states(&mut self, ids: &HashSet<u64>) -> Result<(), ProtocolError> {
        if ids.is_empty() {
            return Ok(());
        }
        let before: HashSet<u64> = self
            .awareness
            .iter()
            .filter(|(_, state)| state.data.is_some())
            .map(|(id, _)| id)
            .collect();
        let mut removed = Vec::new();
        for &id in ids {
            self.awareness.remove_state(id);
            if before.contains(&id) {
                removed.push(id);
            }
        }
        if removed.is_empty() {
            // Nothing was live; peers already saw these IDs go.
            return Ok(());
        }
        let change = AwarenessChange {
            removed,
            ..AwarenessChange::default()
        };
        self.emit(change, None)
    }

    /// Whether a client ID currently has live presence state.
    pub fn has_state(&self, client_id: u64) -> bool {
        self.awareness
            .iter()
            .any(|(id, state)| id == client_id && state.data.is_some())
    }

    fn emit(&self, change: AwarenessChange, origin: Option<ConnectionId>) -> Result<(), ProtocolError> {
        if change.is_empty() {
            return Ok(());
        }
        let update = self
            .awareness
            .update_with_clients(change.all())
            .map_err(|e| ProtocolError::Crdt(e.to_string()))?;
        for handler in self.handlers.lock().iter() {
            handler(&change, &update, origin);
        }
        Ok(())
    }
}
