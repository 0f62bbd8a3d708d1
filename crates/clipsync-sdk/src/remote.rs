//! Remote store abstractions: the authoritative collection and its change channel.
//!
//! The remote store is a black box offering CRUD on rows plus a push channel
//! of change notifications. [`MemoryRemote`] is an in-process implementation
//! with fault injection, used for tests, demos and the stress harness.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipsync_db::{ItemId, RemoteRecord};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Error reported by the remote store, shaped like a REST/PostgREST error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    /// Backend error code, e.g. `42501` for an access-policy violation.
    pub code: Option<String>,
    /// HTTP-like status, when the transport has one.
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Row-level security rejection.
    pub fn permission_denied(table: &str) -> Self {
        Self::new(format!(
            "new row violates row-level security policy for table \"{}\"",
            table
        ))
        .with_code("42501")
        .with_status(403)
    }

    /// Connection-level failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(message).with_code("network")
    }

    pub fn timed_out() -> Self {
        Self::new("request timed out").with_status(408)
    }

    pub fn not_found(id: &ItemId) -> Self {
        Self::new(format!("no row with id {}", id)).with_status(404)
    }
}

/// A remote change notification.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    /// A row was inserted; carries the full row.
    Insert(RemoteRecord),
    /// A row was updated; carries the full row.
    Update(RemoteRecord),
    /// A row was deleted.
    Delete(ItemId),
}

impl ChangeEvent {
    pub fn id(&self) -> &ItemId {
        match self {
            ChangeEvent::Insert(record) | ChangeEvent::Update(record) => &record.id,
            ChangeEvent::Delete(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert(_) => "INSERT",
            ChangeEvent::Update(_) => "UPDATE",
            ChangeEvent::Delete(_) => "DELETE",
        }
    }
}

/// Connection status reported by a change channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The subscription is acknowledged and live.
    Subscribed,
    /// The channel failed.
    ChannelError(String),
    /// The channel gave up waiting on the server.
    TimedOut,
    /// The channel was closed by the server.
    Closed,
}

/// Messages delivered over a change channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// A live change channel. Dropping or closing it unsubscribes.
pub struct Subscription {
    channel: String,
    messages: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, messages: mpsc::UnboundedReceiver<ChannelMessage>) -> Self {
        Self {
            channel: channel.into(),
            messages,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next status or change message; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.messages.recv().await
    }

    /// Stop receiving. Messages already queued are discarded.
    pub fn close(&mut self) {
        self.messages.close();
    }
}

/// The authoritative remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Every row, for snapshots and resyncs.
    async fn fetch_all(&self) -> Result<Vec<RemoteRecord>, RemoteError>;

    /// Insert a row; id and creation time are assigned remotely.
    async fn create(&self, content: Value) -> Result<RemoteRecord, RemoteError>;

    /// Replace a row's content.
    async fn update(&self, id: &ItemId, content: Value) -> Result<RemoteRecord, RemoteError>;

    /// Delete a row.
    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError>;

    /// Open a change channel. The channel reports [`ChannelStatus::Subscribed`]
    /// once it is live.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, RemoteError>;
}

#[derive(Default)]
struct Faults {
    deny_writes: bool,
    failing_writes: VecDeque<RemoteError>,
    failing_fetches: VecDeque<RemoteError>,
    failing_subscriptions: u32,
    stalled_subscriptions: u32,
    stalled_fetches: u32,
    duplicate_broadcasts: bool,
    hold_broadcasts: bool,
}

struct Subscriber {
    channel: String,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

#[derive(Default)]
struct RemoteState {
    rows: BTreeMap<ItemId, RemoteRecord>,
    next_id: u64,
    last_created: Option<DateTime<Utc>>,
    subscribers: Vec<Subscriber>,
    /// Subscriptions that will never be acknowledged.
    stalled: Vec<mpsc::UnboundedSender<ChannelMessage>>,
    held: Vec<ChangeEvent>,
    faults: Faults,
}

impl RemoteState {
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created = match self.last_created {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(created);
        created
    }

    fn allocate_id(&mut self) -> ItemId {
        self.next_id += 1;
        ItemId::new(self.next_id.to_string())
    }

    fn write_fault(&mut self, table: &str) -> Option<RemoteError> {
        if self.faults.deny_writes {
            return Some(RemoteError::permission_denied(table));
        }
        self.faults.failing_writes.pop_front()
    }

    fn broadcast(&mut self, event: ChangeEvent) {
        if self.faults.hold_broadcasts {
            self.held.push(event);
            return;
        }
        self.send_now(event);
    }

    fn send_now(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|s| !s.tx.is_closed());
        let copies = if self.faults.duplicate_broadcasts { 2 } else { 1 };
        for subscriber in &self.subscribers {
            for _ in 0..copies {
                let _ = subscriber
                    .tx
                    .send(ChannelMessage::Change(event.clone()));
            }
        }
    }
}

/// In-memory remote store for testing and simulation.
pub struct MemoryRemote {
    table: String,
    state: Arc<RwLock<RemoteState>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new("clipboard")
    }
}

impl MemoryRemote {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: Arc::new(RwLock::new(RemoteState::default())),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Rows in creation order (oldest first), as a fetch would return them.
    pub fn records(&self) -> Vec<RemoteRecord> {
        let mut rows: Vec<_> = self.state.read().rows.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.write();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    // === Out-of-band writes (no change event is broadcast) ===

    /// Store rows as they are, without notifying anyone.
    pub fn seed(&self, records: impl IntoIterator<Item = RemoteRecord>) {
        let mut state = self.state.write();
        for record in records {
            if let Ok(n) = record.id.as_str().parse::<u64>() {
                state.next_id = state.next_id.max(n);
            }
            state.rows.insert(record.id.clone(), record);
        }
    }

    /// Create a row whose change event is lost.
    pub fn insert_silently(&self, content: Value) -> RemoteRecord {
        let mut state = self.state.write();
        let record = RemoteRecord {
            id: state.allocate_id(),
            content,
            created_at: state.next_created_at(),
        };
        state.rows.insert(record.id.clone(), record.clone());
        record
    }

    /// Delete a row whose change event is lost.
    pub fn delete_silently(&self, id: &ItemId) -> Option<RemoteRecord> {
        self.state.write().rows.remove(id)
    }

    // === Fault injection ===

    /// Reject every write with a row-level security error.
    pub fn deny_writes(&self, deny: bool) {
        self.state.write().faults.deny_writes = deny;
    }

    /// Fail the next create/update/delete with `err`.
    pub fn fail_next_write(&self, err: RemoteError) {
        self.state.write().faults.failing_writes.push_back(err);
    }

    /// Fail the next snapshot fetch with `err`.
    pub fn fail_next_fetch(&self, err: RemoteError) {
        self.state.write().faults.failing_fetches.push_back(err);
    }

    /// The next `count` subscriptions report a channel error instead of acknowledging.
    pub fn fail_subscriptions(&self, count: u32) {
        self.state.write().faults.failing_subscriptions = count;
    }

    /// The next `count` subscriptions are never acknowledged.
    pub fn stall_subscriptions(&self, count: u32) {
        self.state.write().faults.stalled_subscriptions = count;
    }

    /// The next `count` snapshot fetches never return.
    pub fn stall_fetches(&self, count: u32) {
        self.state.write().faults.stalled_fetches = count;
    }

    /// Deliver every change event twice.
    pub fn duplicate_broadcasts(&self, enabled: bool) {
        self.state.write().faults.duplicate_broadcasts = enabled;
    }

    /// Queue change events instead of delivering them.
    pub fn hold_broadcasts(&self, enabled: bool) {
        self.state.write().faults.hold_broadcasts = enabled;
    }

    /// Deliver queued change events in order; returns how many were sent.
    pub fn release_broadcasts(&self) -> usize {
        let mut state = self.state.write();
        let held = std::mem::take(&mut state.held);
        let count = held.len();
        for event in held {
            state.send_now(event);
        }
        count
    }

    /// Deliver an arbitrary event to every subscriber without touching the rows.
    pub fn inject(&self, event: ChangeEvent) {
        self.state.write().send_now(event);
    }

    /// Close every live channel, as a server restart or network drop would.
    pub fn drop_connections(&self) {
        let mut state = self.state.write();
        for subscriber in state.subscribers.drain(..) {
            debug!(channel = %subscriber.channel, "dropping subscriber");
            let _ = subscriber
                .tx
                .send(ChannelMessage::Status(ChannelStatus::Closed));
        }
        state.stalled.clear();
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_all(&self) -> Result<Vec<RemoteRecord>, RemoteError> {
        let stalled = {
            let mut state = self.state.write();
            if let Some(err) = state.faults.failing_fetches.pop_front() {
                return Err(err);
            }
            let stalled = state.faults.stalled_fetches > 0;
            if stalled {
                state.faults.stalled_fetches -= 1;
            }
            stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(self.records())
    }

    async fn create(&self, content: Value) -> Result<RemoteRecord, RemoteError> {
        let mut state = self.state.write();
        if let Some(err) = state.write_fault(&self.table) {
            return Err(err);
        }
        let record = RemoteRecord {
            id: state.allocate_id(),
            content,
            created_at: state.next_created_at(),
        };
        state.rows.insert(record.id.clone(), record.clone());
        state.broadcast(ChangeEvent::Insert(record.clone()));
        Ok(record)
    }

    async fn update(&self, id: &ItemId, content: Value) -> Result<RemoteRecord, RemoteError> {
        let mut state = self.state.write();
        if let Some(err) = state.write_fault(&self.table) {
            return Err(err);
        }
        let record = match state.rows.get_mut(id) {
            Some(row) => {
                row.content = content;
                row.clone()
            }
            None => return Err(RemoteError::not_found(id)),
        };
        state.broadcast(ChangeEvent::Update(record.clone()));
        Ok(record)
    }

    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError> {
        let mut state = self.state.write();
        if let Some(err) = state.write_fault(&self.table) {
            return Err(err);
        }
        if state.rows.remove(id).is_some() {
            state.broadcast(ChangeEvent::Delete(id.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write();

        if state.faults.failing_subscriptions > 0 {
            state.faults.failing_subscriptions -= 1;
            let _ = tx.send(ChannelMessage::Status(ChannelStatus::ChannelError(
                "subscription rejected".to_string(),
            )));
            return Ok(Subscription::new(channel, rx));
        }

        if state.faults.stalled_subscriptions > 0 {
            state.faults.stalled_subscriptions -= 1;
            state.stalled.push(tx);
            return Ok(Subscription::new(channel, rx));
        }

        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Subscribed));
        state.subscribers.push(Subscriber {
            channel: channel.to_string(),
            tx,
        });
        Ok(Subscription::new(channel, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_identity_and_broadcasts() {
        let remote = MemoryRemote::default();
        let mut sub = remote.subscribe("board").await.unwrap();
        assert_eq!(
            sub.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Subscribed))
        );

        let a = remote.create(json!("a")).await.unwrap();
        let b = remote.create(json!("b")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.created_at > a.created_at);

        match sub.recv().await {
            Some(ChannelMessage::Change(ChangeEvent::Insert(record))) => assert_eq!(record, a),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_faults() {
        let remote = MemoryRemote::default();
        remote.deny_writes(true);
        let err = remote.create(json!("x")).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("42501"));

        remote.deny_writes(false);
        remote.fail_next_write(RemoteError::timed_out());
        assert!(remote.create(json!("x")).await.is_err());
        assert!(remote.create(json!("x")).await.is_ok());
        assert_eq!(remote.records().len(), 1);
    }

    #[tokio::test]
    async fn test_held_and_duplicated_broadcasts() {
        let remote = MemoryRemote::default();
        let mut sub = remote.subscribe("board").await.unwrap();
        let _ = sub.recv().await;

        remote.hold_broadcasts(true);
        remote.duplicate_broadcasts(true);
        remote.create(json!("x")).await.unwrap();
        assert_eq!(remote.release_broadcasts(), 1);

        for _ in 0..2 {
            assert!(matches!(
                sub.recv().await,
                Some(ChannelMessage::Change(ChangeEvent::Insert(_)))
            ));
        }
    }

    #[tokio::test]
    async fn test_closed_subscription_is_pruned() {
        let remote = MemoryRemote::default();
        let mut sub = remote.subscribe("board").await.unwrap();
        assert_eq!(remote.subscriber_count(), 1);
        sub.close();
        assert_eq!(remote.subscriber_count(), 0);
    }
}
