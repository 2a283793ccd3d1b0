//! Per-note document session.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── DocumentReplica (yrs Doc)
//!             ├── NoteSession ────────┤
//! Client B ──┘        │               └── AwarenessReplica (presence)
//!                     │
//!                 Fanout table (connection → outbound queue)
//! ```
//!
//! One session per active note. The replicas live behind the session mutex;
//! `attach`, `detach` and `route_frame` serialize on it, and the replica
//! change handlers run synchronously inside those calls, so every peer
//! observes updates in the order the session emitted them.
//!
//! Fan-out rules: document deltas go to every connection except the origin
//! (the originator already applied the change locally); awareness updates
//! echo to every connection including the origin.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex as FlatMutex;
use tokio::sync::Mutex;
use yrs::sync::SyncMessage;
use yrs::Origin;

use crate::awareness::AwarenessReplica;
use crate::connection::{Connection, ConnectionId};
use crate::document::DocumentReplica;
use crate::error::GatewayError;
use crate::protocol::{self, ProtocolError, WireMessage};

/// Leaf-level connection table. Critical sections are O(connections) map
/// walks with non-blocking enqueues; the lock is never held across await.
#[derive(Default)]
struct Fanout {
    connections: FlatMutex<HashMap<ConnectionId, Connection>>,
}

impl Fanout {
    fn insert(&self, connection: Connection) {
        self.connections.lock().insert(connection.id(), connection);
    }

    fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.lock().remove(&id)
    }

    fn origin_of(&self, id: ConnectionId) -> Option<Origin> {
        self.connections.lock().get(&id).map(|c| c.origin().clone())
    }

    fn len(&self) -> usize {
        self.connections.lock().len()
    }

    fn send_to(&self, id: ConnectionId, frame: Vec<u8>) {
        if let Some(conn) = self.connections.lock().get(&id) {
            conn.send(frame);
        }
    }

    fn send_all(&self, frame: &[u8]) {
        for conn in self.connections.lock().values() {
            conn.send(frame.to_vec());
        }
    }

    fn send_except(&self, origin: Option<&Origin>, frame: &[u8]) {
        for conn in self.connections.lock().values() {
            if Some(conn.origin()) == origin {
                continue;
            }
            conn.send(frame.to_vec());
        }
    }

    fn record_owned<I: IntoIterator<Item = u64>>(&self, id: ConnectionId, ids: I) {
        if let Some(conn) = self.connections.lock().get_mut(&id) {
            conn.own_awareness_ids(ids);
        }
    }
}

struct Replicas {
    document: DocumentReplica,
    awareness: AwarenessReplica,
    /// Set when the last connection leaves. A closed session never accepts
    /// another attach; the registry materializes a fresh one instead.
    closed: bool,
}

pub struct NoteSession {
    note_id: String,
    replicas: Mutex<Replicas>,
    fanout: Arc<Fanout>,
    strict_app_frames: bool,
}

impl NoteSession {
    /// Build a session seeded with the note's stored content and wire the
    /// fan-out handlers into both replicas.
    pub fn new(
        note_id: impl Into<String>,
        initial_content: &str,
        strict_app_frames: bool,
    ) -> Result<Self, GatewayError> {
        let document = DocumentReplica::new(initial_content)?;
        let awareness = AwarenessReplica::new(document.doc());
        let fanout = Arc::new(Fanout::default());

        {
            let fanout = fanout.clone();
            document.on_update(move |update, origin| {
                let frame = protocol::encode_sync(&SyncMessage::Update(update.to_vec()));
                fanout.send_except(origin, &frame);
            });
        }
        {
            let fanout = fanout.clone();
            awareness.on_change(move |change, update, origin| {
                if let Some(conn_id) = origin {
                    fanout.record_owned(conn_id, change.owned());
                }
                let frame = protocol::encode_awareness(update);
                fanout.send_all(&frame);
            });
        }

        Ok(Self {
            note_id: note_id.into(),
            replicas: Mutex::new(Replicas {
                document,
                awareness,
                closed: false,
            }),
            fanout,
            strict_app_frames,
        })
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn connection_count(&self) -> usize {
        self.fanout.len()
    }

    /// Current note body, e.g. for a persister running before destroy.
    pub async fn content(&self) -> String {
        self.replicas.lock().await.document.content()
    }

    /// Add a connection. The client drives the initial handshake by sending
    /// a sync step-1; the session does nothing eager here.
    pub async fn attach(&self, connection: Connection) -> Result<(), GatewayError> {
        let replicas = self.replicas.lock().await;
        if replicas.closed {
            return Err(GatewayError::SessionClosed);
        }
        debug!(
            "connection {} attached to note {}",
            connection.id(),
            self.note_id
        );
        self.fanout.insert(connection);
        Ok(())
    }

    /// Remove a connection, publish removal of its owned awareness IDs, and
    /// report whether this was the last client (the registry destroys the
    /// session in that case).
    pub async fn detach(&self, conn_id: ConnectionId) -> bool {
        let mut replicas = self.replicas.lock().await;
        let Some(mut connection) = self.fanout.remove(conn_id) else {
            return false;
        };
        let owned = connection.take_owned_awareness_ids();
        if let Err(e) = replicas.awareness.remove_states(&owned) {
            warn!(
                "awareness cleanup for connection {conn_id} on note {} failed: {e}",
                self.note_id
            );
        }
        debug!("connection {conn_id} detached from note {}", self.note_id);
        let empty = self.fanout.len() == 0;
        if empty {
            replicas.closed = true;
        }
        empty
    }

    /// Decode one inbound frame and route it to the owning replica.
    ///
    /// Frames from connections that are no longer attached are dropped
    /// silently; their teardown is already in flight.
    pub async fn route_frame(
        &self,
        conn_id: ConnectionId,
        frame: &[u8],
    ) -> Result<(), GatewayError> {
        let mut replicas = self.replicas.lock().await;
        let Some(origin) = self.fanout.origin_of(conn_id) else {
            debug!("dropping frame from detached connection {conn_id}");
            return Ok(());
        };
        match protocol::decode(frame)? {
            WireMessage::Sync(msg) => {
                if let Some(reply) = replicas.document.apply_sync(msg, &origin)? {
                    self.fanout.send_to(conn_id, reply);
                }
                Ok(())
            }
            WireMessage::Awareness(update) => {
                replicas.awareness.apply_remote(update, Some(conn_id))?;
                Ok(())
            }
            WireMessage::App { tag, .. } => {
                if self.strict_app_frames {
                    Err(ProtocolError::UnexpectedApp(tag).into())
                } else {
                    debug!("ignoring inbound app frame (tag {tag}) on note {}", self.note_id);
                    Ok(())
                }
            }
        }
    }

    /// Send an application notification to every attached client.
    pub fn notify_all(&self, tag: u64, payload: &[u8]) {
        self.fanout.send_all(&protocol::encode_app(tag, payload));
    }

    /// Send an application notification to one client.
    pub fn notify(&self, conn_id: ConnectionId, tag: u64, payload: &[u8]) {
        self.fanout.send_to(conn_id, protocol::encode_app(tag, payload));
    }
}
