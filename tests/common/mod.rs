//! Shared fakes and client helpers for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, Options, ReadTxn, StateVector, Text, Transact, Update, WriteTxn};

use notewire::protocol::{self, WireMessage};
use notewire::{
    ConnectRequest, ConnectionId, GatewayError, Note, NoteService, PermissionsService,
    ServiceError, Services, SessionRegistry, SessionService, User, UserService,
};
use yrs::sync::SyncMessage;

/// One fake backend implementing all four collaborator services.
///
/// Browser-session IDs map to usernames via `sessions`; every known user
/// exists in the directory; reads are allowed unless the username is
/// listed in `read_denied`. Note paths resolve to themselves.
pub struct TestBackend {
    pub content: String,
    pub fetch_delay: Duration,
    pub fetches: AtomicUsize,
    pub sessions: HashMap<String, String>,
    pub read_denied: Vec<String>,
}

impl TestBackend {
    pub fn unwrapped(content: &str) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert("alice-session".to_string(), "alice".to_string());
        sessions.insert("bob-session".to_string(), "bob".to_string());
        Self {
            content: content.to_string(),
            fetch_delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
            sessions,
            read_denied: Vec::new(),
        }
    }

    pub fn new(content: &str) -> Arc<Self> {
        Arc::new(Self::unwrapped(content))
    }

    pub fn with_fetch_delay(content: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetch_delay: delay,
            ..Self::unwrapped(content)
        })
    }

    pub fn services(self: &Arc<Self>) -> Services {
        Services {
            notes: self.clone(),
            sessions: self.clone(),
            users: self.clone(),
            permissions: self.clone(),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NoteService for TestBackend {
    async fn resolve(&self, url_path: &str) -> Result<Option<Note>, ServiceError> {
        if url_path.is_empty() || url_path.contains("missing") {
            return Ok(None);
        }
        Ok(Some(Note::new(url_path)))
    }

    async fn content(&self, _note: &Note) -> Result<String, ServiceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        Ok(self.content.clone())
    }
}

#[async_trait]
impl SessionService for TestBackend {
    async fn username_for(&self, session_id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.sessions.get(session_id).cloned())
    }
}

#[async_trait]
impl UserService for TestBackend {
    async fn by_name(&self, username: &str) -> Result<Option<User>, ServiceError> {
        if username == "ghost" {
            return Ok(None);
        }
        Ok(Some(User::named(username)))
    }
}

#[async_trait]
impl PermissionsService for TestBackend {
    async fn may_read(&self, user: &User, _note: &Note) -> Result<bool, ServiceError> {
        Ok(!self.read_denied.contains(&user.name))
    }
}

pub fn registry(backend: &Arc<TestBackend>) -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new(
        backend.services(),
        Arc::new(notewire::AcceptAllCookies),
        notewire::GatewayConfig::default(),
    ))
}

pub fn cookie_for(session_id: &str) -> String {
    format!("NOTEWIRE_SESSION=s:{session_id}.sig")
}

/// Connect a client to `note` with the given browser-session ID.
pub async fn connect(
    registry: &SessionRegistry,
    note: &str,
    session_id: &str,
) -> Result<(ConnectionId, mpsc::UnboundedReceiver<Vec<u8>>), GatewayError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let request = ConnectRequest {
        url_path: format!("/realtime/{note}"),
        cookie_header: Some(cookie_for(session_id)),
    };
    let conn_id = registry.connect(&request, tx).await?;
    Ok((conn_id, rx))
}

/// A simulated browser editor: a local CRDT replica plus frame helpers.
pub struct TestClient {
    pub doc: Doc,
}

impl TestClient {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Sync step-1 carrying this client's state vector.
    pub fn step1_frame(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        protocol::encode_sync(&SyncMessage::SyncStep1(txn.state_vector()))
    }

    /// Apply a server frame (step-2 or update) to the local replica.
    pub fn apply_frame(&mut self, frame: &[u8]) {
        match protocol::decode(frame).expect("client got undecodable frame") {
            WireMessage::Sync(SyncMessage::SyncStep2(bytes))
            | WireMessage::Sync(SyncMessage::Update(bytes)) => {
                let mut txn = self.doc.transact_mut();
                txn.apply_update(Update::decode_v1(&bytes).unwrap()).unwrap();
            }
            other => panic!("expected a sync payload, got {other:?}"),
        }
    }

    /// Edit the local replica and return the incremental update frame.
    pub fn edit_frame(&mut self, index: u32, insert: &str) -> Vec<u8> {
        let before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };
        {
            let mut txn = self.doc.transact_mut();
            let text = txn.get_or_insert_text("markdown");
            text.insert(&mut txn, index, insert);
        }
        let txn = self.doc.transact();
        protocol::encode_sync(&SyncMessage::Update(txn.encode_diff_v1(&before)))
    }

    pub fn body(&self) -> String {
        let txn = self.doc.transact();
        txn.get_text("markdown")
            .map(|t| t.get_string(&txn))
            .unwrap_or_default()
    }
}

/// Awareness frame from a simulated client with a fixed client ID.
pub fn awareness_frame(client_id: u64, state: &str) -> Vec<u8> {
    let doc = Doc::with_options(Options {
        client_id,
        ..Options::default()
    });
    let mut client = yrs::sync::Awareness::new(doc);
    client.set_local_state(state);
    protocol::encode_awareness(&client.update().unwrap())
}

/// Full-state update frame for a document whose body is `content`.
pub fn seeded_update_frame(content: &str) -> Vec<u8> {
    let doc = Doc::new();
    let mut txn = doc.transact_mut();
    let text = txn.get_or_insert_text("markdown");
    text.insert(&mut txn, 0, content);
    drop(txn);
    let txn = doc.transact();
    protocol::encode_sync(&SyncMessage::Update(
        txn.encode_state_as_update_v1(&StateVector::default()),
    ))
}

/// Decode a frame that must be an awareness update.
pub fn expect_awareness(frame: &[u8]) -> yrs::sync::AwarenessUpdate {
    match protocol::decode(frame).expect("undecodable frame") {
        WireMessage::Awareness(update) => update,
        other => panic!("expected awareness frame, got {other:?}"),
    }
}
