//! # Sluice Core
//!
//! Backend-agnostic building blocks for the sluice storage gateway.
//!
//! This crate provides:
//! - **Metadata Model**: normalized file/folder metadata computed from raw backend payloads
//! - **Error Taxonomy**: the `StorageError` every provider reports through
//! - **Provider Paths**: canonical, validated request paths
//! - **Streaming Pipe**: bounded, abortable byte conduit between a connection and a provider
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            CRUD Orchestrator            │
//! ├─────────────────────────────────────────┤
//! │     Provider (CloudFiles, Dataverse)    │
//! ├────────────────────┬────────────────────┤
//! │   Metadata Model   │   Streaming Pipe   │
//! └────────────────────┴────────────────────┘
//! ```

pub mod error;
pub mod metadata;
pub mod path;
pub mod stream;

pub use error::{Result, StorageError};
pub use metadata::{
    BaseMetadata, EntryKind, FileMetadata, FolderMetadata, Metadata, MetadataRecord,
};
pub use path::ProviderPath;
pub use stream::{pipe, pump, ByteStream, ChunkSink, PipeReader, PipeWriter};

/// Default size of a single streamed chunk (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of chunks the upload pipe holds before the producer waits
pub const DEFAULT_PIPE_CAPACITY: usize = 8;
