//! # Sluice Gateway
//!
//! One streaming CRUD HTTP surface in front of many storage backends.
//!
//! This crate provides:
//! - **CRUD Orchestrator**: download / upload / delete / metadata handlers
//! - **Streaming**: uploads and downloads never buffer a whole payload
//! - **Hooks**: fire-and-forget notifications of completed writes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP Clients                      │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                  Sluice Gateway                     │
//! ├─────────────────────────────────────────────────────┤
//! │  Request ID │ Access Log │ CORS │ Trace             │
//! ├─────────────────────────────────────────────────────┤
//! │        CRUD Handlers            │   Hook Worker     │
//! ├─────────────────────────────────────────────────────┤
//! │                 sluice-providers                    │
//! │       (CloudFiles, Dataverse, Memory, Sessions)     │
//! ├─────────────────────────────────────────────────────┤
//! │                   sluice-core                       │
//! │       (Metadata, Paths, Streaming Pipe, Errors)     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{BackendConfig, GatewayConfig, ProviderConfig};
pub use error::{ApiError, ErrorCode};
pub use server::{run_server, run_server_with_shutdown};
pub use state::AppState;
