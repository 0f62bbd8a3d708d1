//! The replica synchronization engine.
//!
//! One explicitly constructed engine per viewer. It owns the replica and the
//! reconciler task and offers the presentation layer its public surface:
//! [`SyncEngine::submit`], [`SyncEngine::delete_item`] and
//! [`SyncEngine::edit_and_save`], plus the [`EngineEvent`] stream.

use crate::composer::Composer;
use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::events::{ConnectionState, EngineEvent, EventSink};
use crate::gateway::MutationGateway;
use crate::media::MediaResolver;
use crate::reconciler::{Reconciler, ReconcilerCommand};
use crate::remote::RemoteStore;
use crate::storage::StorageService;
use clipsync_db::{Document, Item, ItemId, ReplicaStore};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

/// Marks an item busy for as long as it lives.
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<ItemId>>,
    id: ItemId,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a Mutex<HashSet<ItemId>>, id: &ItemId) -> Result<Self> {
        if !busy.lock().insert(id.clone()) {
            return Err(SyncError::Busy(id.clone()));
        }
        Ok(Self {
            busy,
            id: id.clone(),
        })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.id);
    }
}

pub struct SyncEngine<R: RemoteStore, S: StorageService> {
    config: EngineConfig,
    remote: Arc<R>,
    gateway: MutationGateway<R>,
    resolver: Arc<MediaResolver<S>>,
    replica: Arc<RwLock<ReplicaStore>>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: EventSink,
    commands: Mutex<Option<mpsc::UnboundedSender<ReconcilerCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    busy: Mutex<HashSet<ItemId>>,
}

impl<R: RemoteStore, S: StorageService> SyncEngine<R, S> {
    pub fn new(config: EngineConfig, remote: Arc<R>, storage: Arc<S>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let events = EventSink::new(config.sync.event_buffer);
        let resolver = Arc::new(MediaResolver::new(storage, config.media_prefix.clone()));
        Self {
            gateway: MutationGateway::new(Arc::clone(&remote)),
            config,
            remote,
            resolver,
            replica: Arc::new(RwLock::new(ReplicaStore::new())),
            state: Arc::new(state),
            events,
            commands: Mutex::new(None),
            task: Mutex::new(None),
            busy: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn resolver(&self) -> &Arc<MediaResolver<S>> {
        &self.resolver
    }

    /// Listen to replica snapshots, status narration and connection changes.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // === Lifecycle ===

    /// Spawn the reconciler. Calling it on a running engine does nothing.
    pub fn start(&self) {
        let mut commands = self.commands.lock();
        if commands.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let reconciler = Reconciler::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.replica),
            Arc::clone(&self.state),
            self.events.clone(),
            self.config.sync.clone(),
            self.config.channel_name.clone(),
            rx,
        );
        let span = info_span!(
            "reconciler",
            channel = %self.config.channel_name,
            viewer = %self.config.viewer_name
        );
        let handle = tokio::spawn(reconciler.run().instrument(span));

        info!(viewer = %self.config.viewer_name, "engine started");
        *commands = Some(tx);
        *self.task.lock() = Some(handle);
    }

    /// Stop the reconciler and unsubscribe. In-flight uploads may still
    /// finish; their results go nowhere.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.commands.lock().take() {
            let _ = tx.send(ReconcilerCommand::Shutdown);
        }
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                debug!(?err, "reconciler task ended abnormally");
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Leave `Offline` (or drop a live channel) and subscribe again.
    pub fn reconnect(&self) -> Result<()> {
        self.command(ReconcilerCommand::Reconnect)
    }

    /// Refetch the snapshot over the live channel.
    pub fn resync(&self) -> Result<()> {
        self.command(ReconcilerCommand::Resync)
    }

    fn command(&self, command: ReconcilerCommand) -> Result<()> {
        match self.commands.lock().as_ref() {
            Some(tx) => tx.send(command).map_err(|_| SyncError::Shutdown),
            None => Err(SyncError::Shutdown),
        }
    }

    // === Reads ===

    /// The replica, newest first.
    pub fn snapshot(&self) -> Vec<Item> {
        self.replica.read().all()
    }

    pub fn get(&self, id: &ItemId) -> Option<Item> {
        self.replica.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.replica.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.replica.read().is_empty()
    }

    /// Plain text of an item, as "copy as text" would put it on the clipboard.
    pub fn copy_text(&self, id: &ItemId) -> Option<String> {
        self.replica.read().get(id).map(Item::plain_text)
    }

    /// Whether a delete or save for `id` is in flight.
    pub fn is_busy(&self, id: &ItemId) -> bool {
        self.busy.lock().contains(id)
    }

    // === Editing ===

    /// A fresh, empty composer for a new note.
    pub fn composer(&self) -> Composer<S> {
        Composer::new(Arc::clone(&self.resolver)).with_events(self.events.clone())
    }

    /// A composer seeded with an existing item's content.
    pub fn edit_composer(&self, id: &ItemId) -> Option<Composer<S>> {
        let content = self.replica.read().get(id)?.content.clone();
        Some(
            Composer::with_document(Arc::clone(&self.resolver), content)
                .with_events(self.events.clone()),
        )
    }

    // === Mutations ===

    /// Persist a new note. The replica is not touched: the item shows up
    /// when its insert event comes back.
    pub async fn submit(&self, document: &Document) -> Result<ItemId> {
        if document.is_empty() {
            return Err(SyncError::Validation);
        }
        self.events.info("Adding new item…");
        match self.gateway.create(document).await {
            Ok(id) => {
                self.events.info("Item added!");
                Ok(id)
            }
            Err(err) => {
                self.events.failure("Error adding item", &err);
                Err(err)
            }
        }
    }

    /// Submit a composer's content. The composer is cleared only on success so
    /// a failed create leaves the draft for re-editing. Uploads that have not
    /// settled yet are left out.
    pub async fn submit_draft(&self, composer: &mut Composer<S>) -> Result<ItemId> {
        composer.try_settle();
        let id = self.submit(composer.document()).await?;
        composer.clear();
        Ok(id)
    }

    pub async fn delete_item(&self, id: &ItemId) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy, id)?;
        self.events.info(format!("Deleting item {}…", id));
        match self.gateway.delete(id).await {
            Ok(()) => {
                self.events.info(format!("Item {} deleted.", id));
                Ok(())
            }
            Err(err) => {
                self.events.failure("Error deleting item", &err);
                Err(err)
            }
        }
    }

    pub async fn edit_and_save(&self, id: &ItemId, document: &Document) -> Result<()> {
        if document.is_empty() {
            return Err(SyncError::Validation);
        }
        let _guard = BusyGuard::acquire(&self.busy, id)?;
        self.events.info(format!("Updating item {}…", id));
        match self.gateway.update(id, document).await {
            Ok(()) => {
                self.events.info(format!("Item {} updated.", id));
                Ok(())
            }
            Err(err) => {
                self.events.failure("Error updating item", &err);
                Err(err)
            }
        }
    }
}
