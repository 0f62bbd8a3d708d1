//! Shared items and the raw rows they are decoded from.

use crate::document::Document;
use crate::error::FormatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Remote-assigned, opaque identifier of an item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A row as the remote store hands it out: identity, raw content and the
/// creation timestamp it assigned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: ItemId,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

/// One shared note.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Assigned by the remote store, immutable.
    pub id: ItemId,
    /// Normalized content.
    pub content: Document,
    /// Assigned at creation, immutable; the only sort key.
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn new(id: ItemId, content: Document, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            content,
            created_at,
        }
    }

    /// Decode a remote row. Content that fails to normalize is replaced by the
    /// unreadable placeholder and the failure is handed back for reporting.
    pub fn from_record(record: RemoteRecord) -> (Self, Option<FormatError>) {
        let (content, warning) = match Document::try_normalize(&record.content) {
            Ok(doc) => (doc, None),
            Err(err) => (Document::unreadable(), Some(err)),
        };
        (Self::new(record.id, content, record.created_at), warning)
    }

    /// Plain-text projection of the content ("copy as text").
    pub fn plain_text(&self) -> String {
        self.content.to_plain_text()
    }
}
