//! Clipsync SDK - keep a local replica of a shared note board in sync
//!
//! A [`SyncEngine`] holds an ordered, in-memory mirror of a remote collection
//! of rich-content notes. Mutations go to the remote store; the replica only
//! changes when the resulting change events come back, so every viewer sees
//! the same thing the same way.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use clipsync_sdk::{
//!     ConnectionState, Document, EngineConfig, MemoryRemote, MemoryStorage, SyncEngine,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> clipsync_sdk::Result<()> {
//!     let engine = SyncEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(MemoryRemote::default()),
//!         Arc::new(MemoryStorage::default()),
//!     );
//!     engine.start();
//!     engine.wait_for_state(ConnectionState::Synced).await;
//!
//!     let id = engine.submit(&Document::text("hello board")).await?;
//!     println!("created {}", id);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`remote`] - remote store trait, change events and an in-memory remote
//! - [`storage`] - object storage trait and an in-memory store
//! - [`media`] - media resolver: decode, upload, address
//! - [`composer`] - editing surface that splices uploads in as they land
//! - [`reconciler`] - the single writer of the replica
//! - [`gateway`] - create/update/delete requests and error classification
//! - [`engine`] - the engine tying it together
//! - [`events`] - what the engine tells the presentation layer
//! - [`config`] - engine and sync configuration
//! - [`error`] - error types

pub mod composer;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod media;
pub mod reconciler;
pub mod remote;
pub mod storage;

pub use composer::{Composer, Settled};
pub use config::{EngineConfig, EngineConfigBuilder, SyncConfig, SyncConfigBuilder};
pub use engine::SyncEngine;
pub use error::{Result, SyncError, UploadError};
pub use events::{ConnectionState, EngineEvent, EventSink, StatusLevel, StatusMessage};
pub use gateway::{classify, MutationGateway};
pub use media::{MediaPayload, MediaResolver, PendingUpload, UploadOutcome, UploadToken};
pub use reconciler::{fold_event, Folded, Reconciler, ReconcilerCommand};
pub use remote::{
    ChangeEvent, ChannelMessage, ChannelStatus, MemoryRemote, RemoteError, RemoteStore,
    Subscription,
};
pub use storage::{MemoryStorage, StorageError, StorageService};

// Re-export the data layer types engines hand out.
pub use clipsync_db::{
    Document, FormatError, Item, ItemId, MediaKind, MediaRef, RemoteRecord, ReplicaStore, Run,
    UNREADABLE_PLACEHOLDER,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::composer::Composer;
    pub use crate::config::EngineConfig;
    pub use crate::engine::SyncEngine;
    pub use crate::error::SyncError;
    pub use crate::events::{ConnectionState, EngineEvent};
    pub use crate::media::MediaPayload;
    pub use crate::remote::{MemoryRemote, RemoteStore};
    pub use crate::storage::{MemoryStorage, StorageService};
    pub use clipsync_db::{Document, ItemId};
}
