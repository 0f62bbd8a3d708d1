//! Reconciler - folds remote change events into the replica.
//!
//! The reconciler runs as a single task and is the only writer of the replica.
//! Events are folded one at a time, each to completion, in arrival order.
//!
//! Subscription lifecycle:
//!
//! ```text
//! Disconnected -> Subscribing -> Synced -> Reconnecting -> Subscribing -> ...
//!                     |                                        |
//!                     +------- too many failures -------> Offline
//! ```
//!
//! Every entry into `Synced` replaces the replica with a fresh snapshot, which
//! repairs anything missed before the channel was live or while it was down.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{ConnectionState, EventSink, StatusMessage};
use crate::gateway::classify;
use crate::remote::{ChangeEvent, ChannelMessage, ChannelStatus, RemoteStore, Subscription};
use clipsync_db::{FormatError, Item, ItemId, RemoteRecord, ReplicaStore};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Requests the engine can make of a running reconciler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcilerCommand {
    /// Drop the current channel (or leave `Offline`) and subscribe again.
    Reconnect,
    /// Refetch the snapshot without touching the channel.
    Resync,
    Shutdown,
}

/// Result of folding one change event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folded {
    /// Whether the replica differs from before.
    pub changed: bool,
    /// Set when the event's content failed to normalize.
    pub warning: Option<FormatError>,
}

/// Fold one change event into the replica. Inserts and updates are both
/// upserts, so a duplicate insert is a no-op and an update for an unseen id
/// materializes the item.
pub fn fold_event(replica: &mut ReplicaStore, event: ChangeEvent) -> Folded {
    match event {
        ChangeEvent::Insert(record) | ChangeEvent::Update(record) => {
            let (item, warning) = Item::from_record(record);
            Folded {
                changed: replica.upsert(item).changed(),
                warning,
            }
        }
        ChangeEvent::Delete(id) => Folded {
            changed: replica.remove(&id).is_some(),
            warning: None,
        },
    }
}

enum Exit {
    /// The channel went away; try again.
    Dropped(String),
    Shutdown,
}

pub struct Reconciler<R: RemoteStore> {
    remote: Arc<R>,
    replica: Arc<RwLock<ReplicaStore>>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: EventSink,
    config: SyncConfig,
    channel: String,
    commands: mpsc::UnboundedReceiver<ReconcilerCommand>,
}

impl<R: RemoteStore> Reconciler<R> {
    pub fn new(
        remote: Arc<R>,
        replica: Arc<RwLock<ReplicaStore>>,
        state: Arc<watch::Sender<ConnectionState>>,
        events: EventSink,
        config: SyncConfig,
        channel: impl Into<String>,
        commands: mpsc::UnboundedReceiver<ReconcilerCommand>,
    ) -> Self {
        Self {
            remote,
            replica,
            state,
            events,
            config,
            channel: channel.into(),
            commands,
        }
    }

    /// Drive the subscription lifecycle until shut down.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Subscribing);

            let delay = match self.establish().await {
                Ok(Some(subscription)) => {
                    failures = 0;
                    self.set_state(ConnectionState::Synced);
                    match self.consume(subscription).await {
                        Exit::Shutdown => break,
                        Exit::Dropped(reason) => {
                            warn!(%reason, "change channel dropped");
                            self.events
                                .status(StatusMessage::warn("Realtime connection lost. Reconnecting…"));
                            self.config.backoff(1)
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    failures += 1;
                    warn!(attempt = failures, ?err, "subscription attempt failed");
                    if failures >= self.config.max_subscribe_attempts {
                        self.set_state(ConnectionState::Offline);
                        self.events.failure("Realtime unavailable", &SyncError::Offline);
                        if !self.wait_offline().await {
                            break;
                        }
                        failures = 0;
                        continue;
                    }
                    self.config.backoff(failures)
                }
            };

            self.set_state(ConnectionState::Reconnecting);
            if !self.wait_backoff(delay).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("reconciler stopped");
    }

    /// Subscribe and take the baseline snapshot. `Ok(None)` means shutdown was
    /// requested while waiting.
    ///
    /// The acknowledgement and the baseline fetch share one deadline: both are
    /// part of reaching `Synced`.
    async fn establish(&mut self) -> Result<Option<Subscription>> {
        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let channel = self.channel.clone();
        let deadline = self.config.subscribe_timeout();
        let synced = tokio::time::timeout(deadline, async move {
            let mut subscription = remote.subscribe(&channel).await.map_err(|e| classify(&e))?;
            loop {
                match subscription.recv().await {
                    Some(ChannelMessage::Status(ChannelStatus::Subscribed)) => break,
                    Some(ChannelMessage::Status(status)) => {
                        return Err(SyncError::Transient(format!("channel status {:?}", status)))
                    }
                    // Anything before the acknowledgement is covered by the snapshot.
                    Some(ChannelMessage::Change(_)) => continue,
                    None => return Err(SyncError::Transient("channel closed".to_string())),
                }
            }

            info!("realtime connected");
            events.info("Realtime connected…");
            let records = fetch_history(remote.as_ref(), &events).await?;
            Ok::<_, SyncError>((subscription, records))
        });
        tokio::pin!(synced);

        let (subscription, records) = loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(ReconcilerCommand::Shutdown) | None => return Ok(None),
                    Some(other) => debug!(?other, "ignoring command while subscribing"),
                },
                res = &mut synced => match res {
                    Ok(res) => break res?,
                    Err(_) => {
                        return Err(SyncError::Transient(format!(
                            "not synced within {:?}",
                            deadline
                        )))
                    }
                },
            }
        };

        self.install(records);
        Ok(Some(subscription))
    }

    async fn consume(&mut self, mut subscription: Subscription) -> Exit {
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(ReconcilerCommand::Shutdown) | None => {
                        subscription.close();
                        return Exit::Shutdown;
                    }
                    Some(ReconcilerCommand::Reconnect) => {
                        subscription.close();
                        return Exit::Dropped("reconnect requested".to_string());
                    }
                    Some(ReconcilerCommand::Resync) => {
                        if let Err(err) = self.resync().await {
                            debug!(?err, "resync failed");
                        }
                    }
                },
                msg = subscription.recv() => match msg {
                    Some(ChannelMessage::Change(event)) => self.apply(event),
                    Some(ChannelMessage::Status(ChannelStatus::Subscribed)) => {}
                    Some(ChannelMessage::Status(status)) => {
                        subscription.close();
                        return Exit::Dropped(format!("{:?}", status));
                    }
                    None => return Exit::Dropped("channel closed".to_string()),
                },
            }
        }
    }

    /// Replace the replica with the remote snapshot. The fetch is bounded by
    /// the subscribe timeout so a hung store cannot wedge the channel.
    async fn resync(&self) -> Result<usize> {
        let fetch = fetch_history(self.remote.as_ref(), &self.events);
        let records = match tokio::time::timeout(self.config.subscribe_timeout(), fetch).await {
            Ok(records) => records?,
            Err(_) => {
                let err = SyncError::Transient("history fetch timed out".to_string());
                self.events.failure("Error fetching history", &err);
                return Err(err);
            }
        };
        Ok(self.install(records))
    }

    fn install(&self, records: Vec<RemoteRecord>) -> usize {
        let mut warnings = Vec::new();
        let items: Vec<Item> = records
            .into_iter()
            .map(|record| {
                let (item, warning) = Item::from_record(record);
                if let Some(warning) = warning {
                    warnings.push((item.id.clone(), warning));
                }
                item
            })
            .collect();

        let snapshot = {
            let mut replica = self.replica.write();
            replica.replace_all(items);
            replica.all()
        };
        for (id, warning) in warnings {
            self.report_format(&id, warning);
        }

        let count = snapshot.len();
        info!(count, "replica resynced");
        self.events.replica_changed(snapshot);
        self.events.info(format!("Ready. {} item(s) loaded.", count));
        count
    }

    fn apply(&self, event: ChangeEvent) {
        let id = event.id().clone();
        let kind = event.kind();
        let is_delete = matches!(event, ChangeEvent::Delete(_));

        let (folded, snapshot) = {
            let mut replica = self.replica.write();
            let folded = fold_event(&mut replica, event);
            let snapshot = folded.changed.then(|| replica.all());
            (folded, snapshot)
        };
        debug!(%id, kind, changed = folded.changed, "folded change event");

        if let Some(warning) = folded.warning {
            self.report_format(&id, warning);
        }
        if let Some(snapshot) = snapshot {
            if is_delete {
                self.events.info(format!("Item {} removed.", id));
            } else {
                self.events
                    .info(format!("Realtime update received for item {}.", id));
            }
            self.events.replica_changed(snapshot);
        }
    }

    fn report_format(&self, id: &ItemId, warning: FormatError) {
        warn!(%id, %warning, "unreadable content");
        self.events
            .failure(&format!("Item {}", id), &SyncError::Format(warning));
    }

    /// Park until asked to reconnect. Returns false on shutdown.
    async fn wait_offline(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(ReconcilerCommand::Reconnect) => return true,
                Some(ReconcilerCommand::Resync) => {
                    self.events
                        .status(StatusMessage::warn("Offline. Reconnect before resyncing."));
                }
                Some(ReconcilerCommand::Shutdown) | None => return false,
            }
        }
    }

    /// Sleep out a retry delay. Any command but shutdown cuts it short.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        debug!(?delay, "backing off");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        tokio::select! {
            biased;
            cmd = self.commands.recv() => !matches!(cmd, Some(ReconcilerCommand::Shutdown) | None),
            _ = &mut sleep => true,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(%state, "connection state");
            self.events.connection(state);
        }
    }
}

async fn fetch_history<R: RemoteStore>(remote: &R, events: &EventSink) -> Result<Vec<RemoteRecord>> {
    events.info("Fetching history…");
    remote.fetch_all().await.map_err(|err| {
        let err = classify(&err);
        events.failure("Error fetching history", &err);
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use clipsync_db::Document;
    use serde_json::json;

    fn record(id: &str, content: serde_json::Value, secs: i64) -> RemoteRecord {
        RemoteRecord {
            id: ItemId::new(id),
            content,
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_insert_and_update_both_upsert() {
        let mut replica = ReplicaStore::new();

        let folded = fold_event(&mut replica, ChangeEvent::Update(record("1", json!("v1"), 1)));
        assert!(folded.changed);
        assert_eq!(replica.len(), 1);

        let folded = fold_event(&mut replica, ChangeEvent::Insert(record("1", json!("v1"), 1)));
        assert!(!folded.changed);
        assert_eq!(replica.len(), 1);
    }

    #[test]
    fn test_delete_of_absent_id() {
        let mut replica = ReplicaStore::new();
        let folded = fold_event(&mut replica, ChangeEvent::Delete(ItemId::new("9")));
        assert_eq!(
            folded,
            Folded {
                changed: false,
                warning: None
            }
        );
    }

    #[test]
    fn test_unreadable_content_is_kept_as_placeholder() {
        let mut replica = ReplicaStore::new();
        let folded = fold_event(&mut replica, ChangeEvent::Insert(record("1", json!(42), 1)));
        assert!(folded.changed);
        assert!(matches!(
            folded.warning,
            Some(FormatError::UnknownFormat { .. })
        ));
        assert_eq!(
            replica.get(&ItemId::new("1")).unwrap().content,
            Document::unreadable()
        );
    }
}
