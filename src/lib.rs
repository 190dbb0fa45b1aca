//! schedrelay — a WebSocket relay for collaboratively edited schedules.
//!
//! Clients connect, authenticate, subscribe to a project and exchange
//! change batches. The server reconciles client-assigned phantom ids into
//! permanent ones, stamps every batch with a per-project revision, applies
//! it to the in-memory dataset and fans it out to the project's other
//! subscribers.
//!
//! ```text
//!                       ┌────────────────────────────┐
//!   ws client ──frame──▶│  server   (accept + pump)  │
//!                       └─────────────┬──────────────┘
//!                                     ▼
//!                       ┌────────────────────────────┐
//!                       │  router   (guards + cmds)  │
//!                       └──────┬──────────────┬──────┘
//!                              ▼              ▼
//!                  ┌────────────────┐  ┌──────────────────┐
//!                  │ store          │  │ hub              │
//!                  │  reconcile     │  │  sessions        │
//!                  │  project data  │  │  subscriptions   │
//!                  └────────────────┘  │  revision log    │
//!                                      └────────┬─────────┘
//!                                               ▼
//!                                      subscriber fan-out
//! ```
//!
//! The protocol is flat JSON frames tagged by a `command` field; see
//! [`protocol`] for the full vocabulary.

pub mod client;
pub mod hub;
pub mod identity;
pub mod protocol;
pub mod reconcile;
pub mod router;
pub mod server;
pub mod session;
pub mod store;

pub use hub::Hub;
pub use identity::IdentityStore;
pub use protocol::{ChangeSet, ProjectId, Request};
pub use router::{Outcome, Router};
pub use server::{RelayServer, ServerConfig, ServerError};
pub use session::Session;
pub use store::{ProjectConfig, Storage};
