//! Editing surface with deferred media splicing.
//!
//! Pasting an image does not block typing: the payload is decoded, an upload
//! is started in the background and the paste position is remembered as an
//! anchor. Edits made while the upload runs move the anchor, and the resolved
//! reference is spliced into the *current* document when it arrives.
//! Outcomes for tokens the composer no longer tracks (the draft was submitted
//! or cleared) are dropped.
//!
//! Uploads anchored at the same position land in paste order, whatever order
//! they complete in.

use crate::error::{SyncError, UploadError};
use crate::events::EventSink;
use crate::media::{MediaPayload, MediaResolver, PendingUpload, UploadOutcome, UploadToken};
use crate::storage::StorageService;
use clipsync_db::Document;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What happened to one upload outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settled {
    /// The media run was inserted at `at`.
    Spliced { token: UploadToken, at: usize },
    /// The upload failed; the document was left without the media.
    Failed {
        token: UploadToken,
        error: UploadError,
    },
    /// The target draft no longer exists.
    Dropped { token: UploadToken },
}

/// Where a pending upload will be spliced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Anchor {
    at: usize,
    /// Paste sequence number, orders uploads anchored at the same position.
    seq: u64,
}

pub struct Composer<S: StorageService> {
    document: Document,
    resolver: Arc<MediaResolver<S>>,
    anchors: HashMap<UploadToken, Anchor>,
    next_seq: u64,
    events: Option<EventSink>,
    outcome_tx: mpsc::UnboundedSender<UploadOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<UploadOutcome>,
}

impl<S: StorageService> Composer<S> {
    pub fn new(resolver: Arc<MediaResolver<S>>) -> Self {
        Self::with_document(resolver, Document::default())
    }

    /// Start from existing content, e.g. when editing a saved note.
    pub fn with_document(resolver: Arc<MediaResolver<S>>, document: Document) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            document,
            resolver,
            anchors: HashMap::new(),
            next_seq: 0,
            events: None,
            outcome_tx,
            outcome_rx,
        }
    }

    /// Narrate upload failures on `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn pending_uploads(&self) -> usize {
        self.anchors.len()
    }

    pub fn insert_text(&mut self, at: usize, text: &str) {
        let at = at.min(self.document.len());
        let shift = text.chars().count();
        self.document.insert_text(at, text);
        for anchor in self.anchors.values_mut() {
            if anchor.at > at {
                anchor.at += shift;
            }
        }
    }

    /// Append text at the end of the document.
    pub fn push_text(&mut self, text: &str) {
        let end = self.document.len();
        self.insert_text(end, text);
    }

    pub fn delete(&mut self, at: usize, len: usize) {
        self.document.delete(at, len);
        let end = at.saturating_add(len);
        for anchor in self.anchors.values_mut() {
            if anchor.at > end {
                anchor.at -= len;
            } else if anchor.at > at {
                anchor.at = at;
            }
        }
    }

    /// Decode a payload and start uploading it. A payload that fails to decode
    /// changes nothing and is reported immediately.
    pub fn paste_media(
        &mut self,
        at: usize,
        payload: MediaPayload,
    ) -> Result<UploadToken, UploadError> {
        let pending = PendingUpload::prepare(payload)?;
        let token = pending.token;
        let anchor = Anchor {
            at: at.min(self.document.len()),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.anchors.insert(token, anchor);
        self.resolver.spawn(pending, self.outcome_tx.clone());
        Ok(token)
    }

    /// Fold one outcome into the current document.
    pub fn settle(&mut self, outcome: UploadOutcome) -> Settled {
        let token = outcome.token;
        let Some(anchor) = self.anchors.remove(&token) else {
            debug!(%token, "dropping upload for a draft that no longer exists");
            return Settled::Dropped { token };
        };

        match outcome.result {
            Ok(reference) => {
                let at = self.document.splice_media(anchor.at, reference);
                // Later pastes at the same spot go after this one; earlier
                // ones still pending will land in front of it.
                for other in self.anchors.values_mut() {
                    if other.at > at || (other.at == at && other.seq > anchor.seq) {
                        other.at += 1;
                    }
                }
                Settled::Spliced { token, at }
            }
            Err(error) => {
                warn!(%token, %error, "upload failed");
                if let Some(events) = &self.events {
                    events.failure("Error uploading image", &SyncError::Upload(error.clone()));
                }
                Settled::Failed { token, error }
            }
        }
    }

    /// Settle every outcome that has already arrived, without waiting.
    pub fn try_settle(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            settled.push(self.settle(outcome));
        }
        settled
    }

    /// Wait for the next outcome. Returns `None` when nothing is pending.
    pub async fn next_settled(&mut self) -> Option<Settled> {
        if self.anchors.is_empty() {
            return None;
        }
        let outcome = self.outcome_rx.recv().await?;
        Some(self.settle(outcome))
    }

    /// Wait until every pending upload has settled.
    pub async fn settle_all(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while let Some(s) = self.next_settled().await {
            settled.push(s);
        }
        settled
    }

    /// Take the document out, forgetting pending uploads.
    pub fn take_document(&mut self) -> Document {
        self.anchors.clear();
        std::mem::take(&mut self.document)
    }

    /// Replace the document, forgetting pending uploads.
    pub fn reset(&mut self, document: Document) {
        self.anchors.clear();
        self.document = document;
    }

    pub fn clear(&mut self) {
        self.reset(Document::default());
    }
}
