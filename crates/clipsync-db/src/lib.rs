//! # clipsync-db
//!
//! Data layer for Clipsync, a board of shared rich-content notes kept in
//! near-real-time sync between viewers.
//!
//! This crate provides:
//! - The document model: legacy scalar or structured text/media runs
//! - Shared items and the raw remote rows they decode from
//! - The replica store: the ordered in-memory mirror of the remote collection
//!
//! Nothing in here performs I/O; the async machinery lives in `clipsync-sdk`.
//!
//! ## Example
//!
//! ```rust
//! use clipsync_db::{Document, MediaRef, ReplicaStore, Item, ItemId};
//! use chrono::Utc;
//!
//! let mut doc = Document::text("see attached");
//! doc.splice_media(3, MediaRef::new("https://cdn.example/cat.png"));
//! assert_eq!(doc.to_plain_text(), "see attached");
//!
//! let mut replica = ReplicaStore::new();
//! replica.upsert(Item::new(ItemId::new("1"), doc, Utc::now()));
//! assert_eq!(replica.len(), 1);
//! ```

pub mod document;
pub mod error;
pub mod item;
pub mod replica;

pub use document::{Document, MediaKind, MediaRef, Run, UNREADABLE_PLACEHOLDER};
pub use error::FormatError;
pub use item::{Item, ItemId, RemoteRecord};
pub use replica::{ReplicaStore, Upsert};
