//! Narrow query interfaces the gateway consumes.
//!
//! The surrounding application owns the note store, the browser-session
//! store, the user directory and the permission model; the realtime core
//! only asks the five questions below. Implementations are injected as
//! trait objects so tests can swap in fakes.

use async_trait::async_trait;

/// A user allowed to hold realtime connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub display_name: Option<String>,
}

impl User {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
        }
    }
}

/// Opaque note identity plus whatever the resolver attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
}

impl Note {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Failure inside a collaborator service.
#[derive(Debug, Clone)]
pub struct ServiceError(pub String);

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service error: {}", self.0)
    }
}

impl std::error::Error for ServiceError {}

/// Note resolution and content access.
#[async_trait]
pub trait NoteService: Send + Sync {
    /// Resolve the tail of a realtime URL path to a note.
    async fn resolve(&self, url_path: &str) -> Result<Option<Note>, ServiceError>;

    /// Stored markdown used to seed a fresh session's replica.
    async fn content(&self, note: &Note) -> Result<String, ServiceError>;
}

/// Browser-session lookup.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn username_for(&self, session_id: &str) -> Result<Option<String>, ServiceError>;
}

/// User directory.
#[async_trait]
pub trait UserService: Send + Sync {
    async fn by_name(&self, username: &str) -> Result<Option<User>, ServiceError>;
}

/// Permission checks gating attach.
#[async_trait]
pub trait PermissionsService: Send + Sync {
    async fn may_read(&self, user: &User, note: &Note) -> Result<bool, ServiceError>;
}
