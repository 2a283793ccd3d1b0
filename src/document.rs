//! Authoritative CRDT replica for one note body.
//!
//! The replica owns the `yrs` document and its `"markdown"` text root. The
//! initial server-side text is inserted at construction inside an
//! origin-less transaction, before the update observer is wired, so seeding
//! never reaches a peer.
//!
//! Inbound sync messages flow through [`DocumentReplica::apply_sync`]:
//! a step-1 state vector is answered with a ready-to-send step-2 frame,
//! while step-2/update payloads are applied inside a transaction tagged
//! with the submitting connection's origin. The library invokes the
//! registered update handlers exactly once per observable change, at
//! transaction commit, which is still inside `apply_sync` and therefore
//! under the owning session's lock.

use std::sync::Arc;

use parking_lot::Mutex;
use yrs::sync::SyncMessage;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, Origin, ReadTxn, Subscription, Text, TextRef, Transact, Update, WriteTxn};

use crate::error::GatewayError;
use crate::protocol::{self, ProtocolError};

/// Name of the text root holding the note body.
const BODY_ROOT: &str = "markdown";

type UpdateHandler = Box<dyn Fn(&[u8], Option<&Origin>) + Send + Sync>;

pub struct DocumentReplica {
    doc: Doc,
    body: TextRef,
    handlers: Arc<Mutex<Vec<UpdateHandler>>>,
    _observer: Subscription,
}

impl DocumentReplica {
    /// Build a replica seeded with the note's current text.
    pub fn new(initial_content: &str) -> Result<Self, GatewayError> {
        let doc = Doc::new();
        let body = {
            let mut txn = doc.transact_mut();
            let body = txn.get_or_insert_text(BODY_ROOT);
            if !initial_content.is_empty() {
                body.insert(&mut txn, 0, initial_content);
            }
            body
        };

        let handlers: Arc<Mutex<Vec<UpdateHandler>>> = Arc::new(Mutex::new(Vec::new()));
        let observer = {
            let handlers = handlers.clone();
            doc.observe_update_v1(move |txn, event| {
                for handler in handlers.lock().iter() {
                    handler(&event.update, txn.origin());
                }
            })
            .map_err(|e| GatewayError::Internal(format!("update observer: {e}")))?
        };

        Ok(Self {
            doc,
            body,
            handlers,
            _observer: observer,
        })
    }

    /// Register a handler invoked once per observable change, local or
    /// remote, with the encoded delta and the origin that submitted it.
    pub fn on_update<F>(&self, f: F)
    where
        F: Fn(&[u8], Option<&Origin>) + Send + Sync + 'static,
    {
        self.handlers.lock().push(Box::new(f));
    }

    /// Feed one inbound sync-protocol message into the replica.
    ///
    /// Returns a ready-to-send frame when the protocol calls for a direct
    /// reply to the submitter (step-1 → step-2), otherwise nothing.
    pub fn apply_sync(
        &mut self,
        msg: SyncMessage,
        origin: &Origin,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        match msg {
            SyncMessage::SyncStep1(remote_sv) => {
                let txn = self.doc.transact();
                let diff = txn.encode_diff_v1(&remote_sv);
                Ok(Some(protocol::encode_sync(&SyncMessage::SyncStep2(diff))))
            }
            SyncMessage::SyncStep2(payload) | SyncMessage::Update(payload) => {
                let update =
                    Update::decode_v1(&payload).map_err(|e| ProtocolError::Crdt(e.to_string()))?;
                let mut txn = self.doc.transact_mut_with(origin.clone());
                txn.apply_update(update)
                    .map_err(|e| ProtocolError::Crdt(e.to_string()))?;
                // Handlers fire at commit, when the transaction drops.
                Ok(None)
            }
        }
    }

    /// Current note body.
    pub fn content(&self) -> String {
        let txn = self.doc.transact();
        self.body.get_string(&txn)
    }

    /// Handle to the underlying document, shared with the awareness replica.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }
}
