//! Observer contract between the engine and whatever renders it.

use crate::error::SyncError;
use clipsync_db::Item;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

/// Lifecycle of the change-channel subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not started, or shut down.
    Disconnected,
    /// Waiting for the channel to acknowledge.
    Subscribing,
    /// Live; the replica has a fresh baseline.
    Synced,
    /// The channel dropped; waiting to retry.
    Reconnecting,
    /// Retry budget exhausted. Needs a manual reconnect.
    Offline,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Synced => "synced",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Offline => "offline",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

/// Human-readable narration for the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
    /// [`SyncError::kind`] of the failure being reported, if any.
    pub kind: Option<&'static str>,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            text: text.into(),
            kind: None,
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Warn,
            text: text.into(),
            kind: None,
        }
    }

    /// Narrate a failure, keeping its kind distinguishable.
    pub fn failure(context: &str, err: &SyncError) -> Self {
        let level = match err {
            SyncError::Format(_) => StatusLevel::Warn,
            _ => StatusLevel::Error,
        };
        Self {
            level,
            text: format!("{}: {}", context, err),
            kind: Some(err.kind()),
        }
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Events emitted by a [`SyncEngine`](crate::SyncEngine).
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The replica settled after a mutation. Carries the full ordered snapshot.
    ReplicaChanged(Vec<Item>),
    Status(StatusMessage),
    Connection(ConnectionState),
}

/// Sending half of the engine event channel.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no listeners is fine.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn replica_changed(&self, snapshot: Vec<Item>) {
        self.emit(EngineEvent::ReplicaChanged(snapshot));
    }

    pub fn status(&self, message: StatusMessage) {
        self.emit(EngineEvent::Status(message));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.status(StatusMessage::info(text));
    }

    pub fn failure(&self, context: &str, err: &SyncError) {
        self.status(StatusMessage::failure(context, err));
    }

    pub fn connection(&self, state: ConnectionState) {
        self.emit(EngineEvent::Connection(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipsync_db::FormatError;

    #[test]
    fn test_failure_keeps_kind() {
        let msg = StatusMessage::failure("Error adding item", &SyncError::Permission("rls".into()));
        assert_eq!(msg.level, StatusLevel::Error);
        assert_eq!(msg.kind, Some("permission"));
        assert!(msg.text.starts_with("Error adding item: "));

        let format = SyncError::Format(FormatError::UnknownFormat {
            found: "number".into(),
        });
        assert_eq!(StatusMessage::failure("Item 3", &format).level, StatusLevel::Warn);
    }

    #[test]
    fn test_status_serializes_for_log_sinks() {
        let msg = StatusMessage::failure("Error deleting item", &SyncError::Transient("timeout".into()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["kind"], "transient");
        assert_eq!(
            serde_json::to_value(ConnectionState::Reconnecting).unwrap(),
            "reconnecting"
        );
    }

    #[test]
    fn test_sink_without_listeners() {
        let sink = EventSink::new(4);
        sink.info("nobody hears this");

        let mut rx = sink.subscribe();
        sink.connection(ConnectionState::Synced);
        let event = tokio_test::block_on(rx.recv());
        assert_eq!(
            tokio_test::assert_ok!(event),
            EngineEvent::Connection(ConnectionState::Synced)
        );
    }
}
