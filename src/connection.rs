//! Per-client connection record.
//!
//! A connection is the session-side view of one live socket: an identity
//! (which doubles as the CRDT transaction origin for echo suppression), a
//! FIFO outbound frame queue drained by the transport writer, and the set
//! of awareness client IDs this peer introduced, consumed at disconnect.

use std::collections::HashSet;
use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;
use yrs::Origin;

/// Identity of one live client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Origin tag applied to transactions submitted by this connection.
    pub fn origin(&self) -> Origin {
        Origin::from(self.0.to_string().as_str())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One attached client.
pub struct Connection {
    id: ConnectionId,
    origin: Origin,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    owned_awareness_ids: HashSet<u64>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id,
            origin: id.origin(),
            outbound,
            owned_awareness_ids: HashSet::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Enqueue a frame for delivery. Non-blocking; the queue is unbounded
    /// and drained in order by the transport writer. A closed queue means
    /// the peer is mid-teardown and the frame is dropped.
    pub fn send(&self, frame: Vec<u8>) {
        if self.outbound.send(frame).is_err() {
            log::debug!("dropping frame for closed connection {}", self.id);
        }
    }

    /// Record awareness client IDs introduced by this connection.
    pub fn own_awareness_ids<I: IntoIterator<Item = u64>>(&mut self, ids: I) {
        self.owned_awareness_ids.extend(ids);
    }

    pub fn owned_awareness_ids(&self) -> &HashSet<u64> {
        &self.owned_awareness_ids
    }

    /// Hand over the owned set at disconnect.
    pub fn take_owned_awareness_ids(&mut self) -> HashSet<u64> {
        std::mem::take(&mut self.owned_awareness_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_enqueues_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(ConnectionId::new(), tx);
        conn.send(vec![1]);
        conn.send(vec![2]);
        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
    }

    #[test]
    fn test_send_to_closed_queue_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let conn = Connection::new(ConnectionId::new(), tx);
        conn.send(vec![1]);
    }

    #[test]
    fn test_owned_ids_accumulate_and_drain() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(ConnectionId::new(), tx);
        conn.own_awareness_ids([42, 7]);
        conn.own_awareness_ids([42]);
        assert_eq!(conn.owned_awareness_ids().len(), 2);

        let taken = conn.take_owned_awareness_ids();
        assert!(taken.contains(&42) && taken.contains(&7));
        assert!(conn.owned_awareness_ids().is_empty());
    }

    #[test]
    fn test_origin_is_stable_per_id() {
        let id = ConnectionId::new();
        assert_eq!(id.origin(), id.origin());
        assert_ne!(id.origin(), ConnectionId::new().origin());
    }
}
