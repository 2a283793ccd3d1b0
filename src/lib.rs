//! # notewire — realtime collaboration core for a markdown note service
//!
//! Hosts long-lived WebSocket connections from browser editors, keeps one
//! authoritative CRDT replica per note, and routes incremental edit and
//! presence updates among everyone editing the same note.
//!
//! ## Architecture
//!
//! ```text
//! Browser A ──┐   WebSocket    ┌──────────────────┐
//!              ├──────────────► │ SessionRegistry  │  auth · resolve · permit
//! Browser B ──┘  binary frames └────────┬─────────┘
//!                                       │ one per active note
//!                                       ▼
//!                              ┌──────────────────┐
//!                              │   NoteSession    │
//!                              │  DocumentReplica │  yrs Doc (authority)
//!                              │  AwarenessReplica│  presence
//!                              │  fan-out table   │
//!                              └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — varuint-tagged binary frame codec
//! - [`document`] — authoritative CRDT replica per note
//! - [`awareness`] — presence replica with owned-ID tracking
//! - [`connection`] — per-client record and outbound queue
//! - [`session`] — per-note aggregation and fan-out rules
//! - [`registry`] — authenticated connect, lazy create, destroy-on-empty
//! - [`server`] — tokio-tungstenite front end
//! - [`services`] — query interfaces onto the surrounding application
//!
//! Sessions are process-local and single-writer: all mutation of a note's
//! replicas serializes on its session lock. A session exists exactly while
//! it has at least one attached connection.

pub mod auth;
pub mod awareness;
pub mod connection;
pub mod document;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod services;
pub mod session;

pub use auth::{AcceptAllCookies, CookieValidator};
pub use awareness::{AwarenessChange, AwarenessReplica};
pub use connection::{Connection, ConnectionId};
pub use document::DocumentReplica;
pub use error::GatewayError;
pub use protocol::{ProtocolError, WireMessage};
pub use registry::{ConnectRequest, GatewayConfig, GatewayStats, SessionRegistry, Services};
pub use server::{CollabServer, ServerConfig};
pub use services::{
    Note, NoteService, PermissionsService, ServiceError, SessionService, User, UserService,
};
pub use session::NoteSession;
