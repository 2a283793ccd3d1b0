//! Session registry and gateway.
//!
//! Owns every live [`NoteSession`] and the connection → session index.
//! Connects are authenticated (cookie → browser session → user → note →
//! permission) before a session is lazily materialized; the last detach
//! tears the session down and releases its replica.
//!
//! Locking: the registry mutex guards O(1) map operations only. The note
//! content fetch runs outside it, serialized by a per-note creation mutex
//! so that N concurrent connects to a cold note produce exactly one fetch
//! and one session. The registry mutex is never held while a session mutex
//! is taken.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as CreationMutex;

use crate::auth::{self, CookieValidator};
use crate::connection::{Connection, ConnectionId};
use crate::error::GatewayError;
use crate::services::{Note, NoteService, PermissionsService, SessionService, UserService};
use crate::session::NoteSession;

/// Prefix of the realtime WebSocket path; the tail names the note.
pub const REALTIME_PATH_PREFIX: &str = "/realtime/";

/// Gateway behavior knobs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Name of the signed browser-session cookie.
    pub session_cookie: String,
    /// Treat inbound app frames (tags ≥2) as protocol errors.
    pub strict_app_frames: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_cookie: "NOTEWIRE_SESSION".to_string(),
            strict_app_frames: false,
        }
    }
}

/// The collaborator services the gateway queries.
#[derive(Clone)]
pub struct Services {
    pub notes: Arc<dyn NoteService>,
    pub sessions: Arc<dyn SessionService>,
    pub users: Arc<dyn UserService>,
    pub permissions: Arc<dyn PermissionsService>,
}

/// What the transport layer learned from the HTTP upgrade request.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url_path: String,
    pub cookie_header: Option<String>,
}

/// Gateway counters, in the spirit of a server stats snapshot.
#[derive(Debug, Clone, Default)]
pub struct GatewayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub frames_routed: u64,
    pub bytes_routed: u64,
}

#[derive(Default)]
struct AtomicStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    sessions_created: AtomicU64,
    sessions_destroyed: AtomicU64,
    frames_routed: AtomicU64,
    bytes_routed: AtomicU64,
}

type BeforeDestroyHook = Box<dyn Fn(&NoteSession) + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, Arc<NoteSession>>,
    by_connection: HashMap<ConnectionId, Arc<NoteSession>>,
    /// Per-note creation locks; an entry exists only while a cold connect
    /// is fetching content.
    creating: HashMap<String, Arc<CreationMutex<()>>>,
}

pub struct SessionRegistry {
    services: Services,
    validator: Arc<dyn CookieValidator>,
    config: GatewayConfig,
    state: Mutex<RegistryState>,
    before_destroy: Mutex<Option<BeforeDestroyHook>>,
    stats: AtomicStats,
}

impl SessionRegistry {
    pub fn new(
        services: Services,
        validator: Arc<dyn CookieValidator>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            services,
            validator,
            config,
            state: Mutex::new(RegistryState::default()),
            before_destroy: Mutex::new(None),
            stats: AtomicStats::default(),
        }
    }

    /// Install the persister seam: called with the session after it has
    /// been unregistered and before its replica is released.
    pub fn on_before_destroy<F>(&self, hook: F)
    where
        F: Fn(&NoteSession) + Send + Sync + 'static,
    {
        *self.before_destroy.lock() = Some(Box::new(hook));
    }

    /// Authenticate an upgrade request and bind the connection to its note
    /// session. `outbound` is the connection's frame queue, drained in
    /// order by the transport writer.
    pub async fn connect(
        &self,
        request: &ConnectRequest,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<ConnectionId, GatewayError> {
        let raw_cookie =
            auth::session_cookie(request.cookie_header.as_deref(), &self.config.session_cookie)
                .ok_or_else(|| GatewayError::AuthRejected("missing session cookie".to_string()))?;
        if !self.validator.validate(&raw_cookie) {
            return Err(GatewayError::AuthRejected(
                "cookie signature rejected".to_string(),
            ));
        }
        let session_id = auth::unwrap_session_id(&raw_cookie);

        let username = self
            .services
            .sessions
            .username_for(&session_id)
            .await
            .map_err(|e| GatewayError::AuthRejected(e.to_string()))?
            .ok_or_else(|| GatewayError::AuthRejected("unknown browser session".to_string()))?;
        let user = self
            .services
            .users
            .by_name(&username)
            .await
            .map_err(|e| GatewayError::AuthRejected(e.to_string()))?
            .ok_or_else(|| GatewayError::AuthRejected(format!("unknown user {username}")))?;

        let note_path = request
            .url_path
            .strip_prefix(REALTIME_PATH_PREFIX)
            .filter(|tail| !tail.is_empty())
            .ok_or_else(|| GatewayError::ResolveFailed(request.url_path.clone()))?;
        let note = self
            .services
            .notes
            .resolve(note_path)
            .await
            .map_err(|e| GatewayError::ResolveFailed(e.to_string()))?
            .ok_or_else(|| GatewayError::ResolveFailed(request.url_path.clone()))?;

        let may_read = self
            .services
            .permissions
            .may_read(&user, &note)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        if !may_read {
            return Err(GatewayError::PermissionDenied {
                user: user.name,
                note: note.id,
            });
        }

        let conn_id = ConnectionId::new();
        loop {
            let session = self.get_or_create(&note).await?;
            match session.attach(Connection::new(conn_id, outbound.clone())).await {
                Ok(()) => {
                    self.state.lock().by_connection.insert(conn_id, session);
                    self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
                    self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
                    info!("user {username} connected to note {} ({conn_id})", note.id);
                    return Ok(conn_id);
                }
                // Lost the race against a last-leaver teardown; the next
                // round materializes a fresh session.
                Err(GatewayError::SessionClosed) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Route one inbound frame. Frames for unknown connections are dropped
    /// silently (the connection may be mid-teardown). A protocol error
    /// tears down the offending connection and is returned so the
    /// transport loop can stop reading.
    pub async fn dispatch(&self, conn_id: ConnectionId, frame: &[u8]) -> Result<(), GatewayError> {
        let session = self.state.lock().by_connection.get(&conn_id).cloned();
        let Some(session) = session else {
            debug!("frame for unknown connection {conn_id} dropped");
            return Ok(());
        };
        self.stats.frames_routed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_routed
            .fetch_add(frame.len() as u64, Ordering::Relaxed);

        match session.route_frame(conn_id, frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    "closing connection {conn_id} on note {}: {e}",
                    session.note_id()
                );
                self.disconnect(conn_id).await;
                Err(e)
            }
        }
    }

    /// Detach a connection; if its session emptied, unregister and destroy
    /// the session. Idempotent.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let session = self.state.lock().by_connection.remove(&conn_id);
        let Some(session) = session else {
            return;
        };
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);

        let emptied = session.detach(conn_id).await;
        if !emptied {
            return;
        }

        let unregistered = {
            let mut state = self.state.lock();
            match state.sessions.get(session.note_id()) {
                Some(current) if Arc::ptr_eq(current, &session) => {
                    state.sessions.remove(session.note_id());
                    true
                }
                _ => false,
            }
        };
        if unregistered {
            if let Some(hook) = self.before_destroy.lock().as_ref() {
                hook(&session);
            }
            self.stats.sessions_destroyed.fetch_add(1, Ordering::Relaxed);
            info!(
                "session for note {} destroyed (last client left)",
                session.note_id()
            );
        }
    }

    /// The live session for a note, if any.
    pub fn lookup(&self, note_id: &str) -> Option<Arc<NoteSession>> {
        self.state.lock().sessions.get(note_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            sessions_created: self.stats.sessions_created.load(Ordering::Relaxed),
            sessions_destroyed: self.stats.sessions_destroyed.load(Ordering::Relaxed),
            frames_routed: self.stats.frames_routed.load(Ordering::Relaxed),
            bytes_routed: self.stats.bytes_routed.load(Ordering::Relaxed),
        }
    }

    /// Return the live session for `note`, materializing it on first use.
    ///
    /// Cold path: take the note's creation mutex, re-check the map (another
    /// waiter may have finished), fetch content, build, publish.
    async fn get_or_create(&self, note: &Note) -> Result<Arc<NoteSession>, GatewayError> {
        let creation = {
            let mut state = self.state.lock();
            if let Some(session) = state.sessions.get(&note.id) {
                return Ok(session.clone());
            }
            state
                .creating
                .entry(note.id.clone())
                .or_insert_with(|| Arc::new(CreationMutex::new(())))
                .clone()
        };

        let _guard = creation.lock().await;
        if let Some(session) = self.state.lock().sessions.get(&note.id) {
            return Ok(session.clone());
        }

        let built = self
            .services
            .notes
            .content(note)
            .await
            .map_err(|e| GatewayError::Internal(format!("content fetch for {}: {e}", note.id)))
            .and_then(|content| {
                NoteSession::new(&note.id, &content, self.config.strict_app_frames)
            });

        let session = {
            let mut state = self.state.lock();
            state.creating.remove(&note.id);
            let session = Arc::new(built?);
            // A full create/destroy cycle could have slipped past the
            // creation mutex; the registered session wins.
            if let Some(existing) = state.sessions.get(&note.id) {
                return Ok(existing.clone());
            }
            state.sessions.insert(note.id.clone(), session.clone());
            session
        };
        self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        info!("session for note {} created", note.id);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.session_cookie, "NOTEWIRE_SESSION");
        assert!(!config.strict_app_frames);
    }
}
