//! Mutation Gateway - create, update and delete requests against the remote store.
//!
//! The gateway never touches the replica. A successful create only becomes
//! visible once its change event comes back through the reconciler.

use crate::error::{Result, SyncError};
use crate::remote::{RemoteError, RemoteStore};
use clipsync_db::{Document, ItemId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Classify a collaborator error so the UI can tell kinds apart.
pub fn classify(err: &RemoteError) -> SyncError {
    let message = err.message.to_lowercase();
    let code = err.code.as_deref().unwrap_or_default();

    if code == "42501"
        || matches!(err.status, Some(401) | Some(403))
        || message.contains("row-level security")
        || message.contains("permission denied")
    {
        return SyncError::Permission(err.message.clone());
    }

    let transient_status = matches!(err.status, Some(408) | Some(429) | Some(500..=599));
    if code == "network"
        || transient_status
        || message.contains("timed out")
        || message.contains("timeout")
        || message.contains("network")
        || message.contains("failed to fetch")
    {
        return SyncError::Transient(err.message.clone());
    }

    SyncError::Unknown(err.message.clone())
}

pub struct MutationGateway<R: RemoteStore> {
    remote: Arc<R>,
}

impl<R: RemoteStore> Clone for MutationGateway<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
        }
    }
}

impl<R: RemoteStore> MutationGateway<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self { remote }
    }

    /// Persist a new note. Empty documents are rejected without a request.
    /// Returns the id the remote store assigned.
    pub async fn create(&self, document: &Document) -> Result<ItemId> {
        if document.is_empty() {
            return Err(SyncError::Validation);
        }
        let record = self.remote.create(document.to_raw()).await.map_err(|err| {
            warn!(?err, "create rejected");
            classify(&err)
        })?;
        debug!(id = %record.id, "created");
        Ok(record.id)
    }

    /// Replace a note's content. Empty documents are rejected like creates.
    pub async fn update(&self, id: &ItemId, document: &Document) -> Result<()> {
        if document.is_empty() {
            return Err(SyncError::Validation);
        }
        self.remote
            .update(id, document.to_raw())
            .await
            .map_err(|err| {
                warn!(%id, ?err, "update rejected");
                classify(&err)
            })?;
        debug!(%id, "updated");
        Ok(())
    }

    pub async fn delete(&self, id: &ItemId) -> Result<()> {
        self.remote.delete(id).await.map_err(|err| {
            warn!(%id, ?err, "delete rejected");
            classify(&err)
        })?;
        debug!(%id, "deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify(&RemoteError::permission_denied("clipboard")),
            SyncError::Permission(_)
        ));
        assert!(matches!(
            classify(&RemoteError::new("permission denied for table clipboard")),
            SyncError::Permission(_)
        ));
        assert!(matches!(
            classify(&RemoteError::new("jwt expired").with_status(401)),
            SyncError::Permission(_)
        ));
        assert!(matches!(
            classify(&RemoteError::timed_out()),
            SyncError::Transient(_)
        ));
        assert!(matches!(
            classify(&RemoteError::new("bad gateway").with_status(502)),
            SyncError::Transient(_)
        ));
        assert!(matches!(
            classify(&RemoteError::network("connection reset")),
            SyncError::Transient(_)
        ));
        assert!(matches!(
            classify(&RemoteError::new("duplicate key").with_code("23505")),
            SyncError::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_create_makes_no_request() {
        let remote = Arc::new(MemoryRemote::default());
        remote.deny_writes(true);
        let gateway = MutationGateway::new(remote.clone());

        for doc in [
            Document::default(),
            Document::Legacy(String::new()),
            Document::text("  \n"),
        ] {
            assert_eq!(gateway.create(&doc).await, Err(SyncError::Validation));
        }
        assert!(remote.records().is_empty());
    }

    #[tokio::test]
    async fn test_create_returns_remote_id() {
        let remote = Arc::new(MemoryRemote::default());
        let gateway = MutationGateway::new(remote.clone());

        let id = gateway.create(&Document::text("hello")).await.unwrap();
        let rows = remote.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].content, Document::text("hello").to_raw());
    }

    #[tokio::test]
    async fn test_update_and_delete_errors_are_classified() {
        let remote = Arc::new(MemoryRemote::default());
        let gateway = MutationGateway::new(remote.clone());
        let id = gateway.create(&Document::text("a")).await.unwrap();

        remote.deny_writes(true);
        assert!(matches!(
            gateway.delete(&id).await,
            Err(SyncError::Permission(_))
        ));
        remote.deny_writes(false);

        assert!(matches!(
            gateway.update(&ItemId::new("404"), &Document::text("b")).await,
            Err(SyncError::Unknown(_))
        ));
        assert_eq!(
            gateway.update(&id, &Document::default()).await,
            Err(SyncError::Validation)
        );
        tokio_test::assert_ok!(gateway.update(&id, &Document::text("b")).await);
        tokio_test::assert_ok!(gateway.delete(&id).await);
        assert!(remote.records().is_empty());
    }
}
