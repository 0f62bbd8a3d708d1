//! # Clipsync Board
//!
//! A standalone CLI for a shared board of notes built on the Clipsync SDK.
//! Every viewer runs its own `SyncEngine` against one in-memory remote store;
//! notes only appear on a board once the remote's change event comes back.
//!
//! ## Flow
//!
//! ```text
//! viewer ── submit ──▶ remote ── change event ──▶ every viewer's replica
//!    ▲                                                   │
//!    └──────────────── ReplicaChanged / Status ◀─────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use clipsync_sdk::prelude::*;
use clipsync_sdk::{
    ChangeEvent, EngineConfigBuilder, Item, RemoteRecord, ReplicaStore, StatusLevel,
    SyncConfigBuilder,
};
use colored::*;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// A one-pixel PNG, as a clipboard paste would carry it.
const PIXEL_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "clipsync-board")]
#[command(about = "Shared note board kept in sync by the Clipsync SDK")]
#[command(version)]
struct Cli {
    /// Name of the local viewer
    #[arg(long, global = true, env = "CLIPSYNC_VIEWER", default_value = "Anonymous")]
    viewer: String,

    /// Change channel to subscribe to
    #[arg(long, global = true, default_value = "public-clipboard-history")]
    channel: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: two viewers post, paste an image, edit and delete
    Demo,
    /// Misbehaving channel: duplicates, drops and lost events, healed by resync
    Chaos,
    /// Subscription failures, the offline state and rejected writes
    Offline,
    /// Interactive REPL for manual experimentation
    Interactive,
}

// ─── Viewer: one engine plus its event feed ────────────────────────────────

type Engine = SyncEngine<MemoryRemote, MemoryStorage>;

struct Viewer {
    name: String,
    engine: Engine,
    events: broadcast::Receiver<EngineEvent>,
}

impl Viewer {
    fn new(name: &str, channel: &str, remote: &Arc<MemoryRemote>) -> Self {
        let config = EngineConfigBuilder::new()
            .viewer_name(name)
            .channel_name(channel)
            .sync(
                SyncConfigBuilder::new()
                    .subscribe_timeout(500)
                    .initial_backoff(50)
                    .max_backoff(400)
                    .max_subscribe_attempts(3)
                    .build(),
            )
            .build();
        let engine = SyncEngine::new(
            config,
            Arc::clone(remote),
            Arc::new(MemoryStorage::default()),
        );
        let events = engine.subscribe();
        Self {
            name: name.to_string(),
            engine,
            events,
        }
    }

    async fn connect(&mut self) {
        self.engine.start();
        let synced = tokio::time::timeout(
            Duration::from_secs(3),
            self.engine.wait_for_state(ConnectionState::Synced),
        )
        .await;
        if synced.is_err() {
            println!(
                "  {} {} is {}",
                "!".bright_yellow(),
                self.name,
                self.engine.connection_state()
            );
        }
        self.narrate();
    }

    /// Print everything the engine said since the last call.
    fn narrate(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(EngineEvent::Status(msg)) => {
                    let text = match msg.level {
                        StatusLevel::Info => msg.text.normal(),
                        StatusLevel::Warn => msg.text.bright_yellow(),
                        StatusLevel::Error => msg.text.bright_red(),
                    };
                    let kind = msg
                        .kind
                        .map(|k| format!(" [{}]", k).dimmed().to_string())
                        .unwrap_or_default();
                    println!("  {} {}{}", format!("{}:", self.name).bright_magenta(), text, kind);
                }
                Ok(EngineEvent::Connection(state)) => {
                    println!(
                        "  {} {} {}",
                        format!("{}:", self.name).bright_magenta(),
                        "connection →".dimmed(),
                        state.to_string().bright_cyan()
                    );
                }
                Ok(EngineEvent::ReplicaChanged(_)) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    println!("  {} {} missed {} events", "!".bright_yellow(), self.name, n);
                }
                Err(_) => break,
            }
        }
    }

    async fn shutdown(mut self) {
        self.engine.shutdown().await;
        self.narrate();
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn warn_line(text: &str) {
    println!("  {} {}", "!".bright_red(), text);
}

fn render_item(item: &Item) -> String {
    let text = item.plain_text().replace('\n', " ⏎ ");
    let media = item.content.media_refs().len();
    let media = if media > 0 {
        format!(" [{} image(s)]", media).bright_blue().to_string()
    } else {
        String::new()
    };
    format!("#{:<4} {}{}", item.id.to_string().bright_yellow(), text, media)
}

fn show_board(viewer: &Viewer) {
    let border = "─".repeat(52);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^50} │",
        format!("{} ({})", viewer.name, viewer.engine.connection_state())
            .bright_yellow()
            .to_string()
    );
    println!("  ├{}┤", border);
    let items = viewer.engine.snapshot();
    if items.is_empty() {
        println!("  │ {:^50} │", "(empty board)".dimmed().to_string());
    }
    for item in &items {
        println!("  │ {}", render_item(item));
    }
    println!("  └{}┘", border);
}

/// The board every replica should show once events settle.
fn expected_board(remote: &MemoryRemote) -> Vec<Item> {
    let mut store = ReplicaStore::new();
    store.replace_all(
        remote
            .records()
            .into_iter()
            .map(|record| Item::from_record(record).0),
    );
    store.all()
}

/// Wait until every viewer shows the remote's board, or give up.
async fn settle(remote: &MemoryRemote, viewers: &[&Viewer]) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let want = expected_board(remote);
        if viewers.iter().all(|v| v.engine.snapshot() == want) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL BOARDS MATCH — every viewer shows the same notes!"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED — boards differ!".bright_red().bold()
        );
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo(cli: &Cli) {
    header("DEMO — Shared Board, Realtime Sync & Deferred Media");
    let remote = Arc::new(MemoryRemote::default());

    section("Phase 1: Two viewers connect");
    let mut me = Viewer::new(&cli.viewer, &cli.channel, &remote);
    let mut bob = Viewer::new("bob", &cli.channel, &remote);
    me.connect().await;
    bob.connect().await;

    section("Phase 2: Posting notes");
    match me.engine.submit(&Document::text("Meeting at 3pm\n")).await {
        Ok(id) => step(&format!("{} posted #{}", me.name, id)),
        Err(err) => warn_line(&err.to_string()),
    }
    me.narrate();

    let mut draft = bob.engine.composer();
    draft.push_text("Whiteboard photo: ");
    match draft.paste_media(draft.document().len(), MediaPayload::data_uri(PIXEL_PNG)) {
        Ok(token) => step(&format!("bob pasted an image (upload {})", token)),
        Err(err) => warn_line(&err.to_string()),
    }
    draft.push_text(" (see above)");
    step("bob kept typing while the upload ran");
    for settled in draft.settle_all().await {
        step(&format!("upload settled: {:?}", settled));
    }
    let photo = match bob.engine.submit_draft(&mut draft).await {
        Ok(id) => Some(id),
        Err(err) => {
            warn_line(&err.to_string());
            None
        }
    };
    bob.narrate();

    let ok = settle(&remote, &[&me, &bob]).await;
    show_board(&me);
    show_board(&bob);
    convergence_result(ok);

    section("Phase 3: Edit and delete across viewers");
    let first = me.engine.snapshot().last().map(|item| item.id.clone());
    if let Some(id) = &first {
        if let Some(mut editor) = bob.engine.edit_composer(id) {
            editor.push_text(" (moved to 4pm)");
            if let Err(err) = bob.engine.edit_and_save(id, editor.document()).await {
                warn_line(&err.to_string());
            }
        }
    }
    bob.narrate();
    if let Some(id) = &photo {
        step(&format!("copy as text of #{}: {:?}", id, me.engine.copy_text(id)));
        if let Err(err) = me.engine.delete_item(id).await {
            warn_line(&err.to_string());
        }
    }
    me.narrate();

    let ok = settle(&remote, &[&me, &bob]).await;
    me.narrate();
    bob.narrate();
    show_board(&me);
    show_board(&bob);
    convergence_result(ok);

    me.shutdown().await;
    bob.shutdown().await;
}

// ─── Chaos ─────────────────────────────────────────────────────────────────

async fn run_chaos(cli: &Cli) {
    header("CHAOS — Duplicates, Dropped Channels, Lost Events");
    let remote = Arc::new(MemoryRemote::default());
    let mut me = Viewer::new(&cli.viewer, &cli.channel, &remote);
    let mut carol = Viewer::new("carol", &cli.channel, &remote);
    me.connect().await;
    carol.connect().await;

    section("Phase 1: Every event is delivered twice");
    remote.duplicate_broadcasts(true);
    for text in ["first", "second", "third"] {
        let _ = carol.engine.submit(&Document::text(text)).await;
    }
    let ok = settle(&remote, &[&me, &carol]).await;
    step(&format!("{} sees {} notes, not 6", me.name, me.engine.len()));
    convergence_result(ok);
    remote.duplicate_broadcasts(false);

    section("Phase 2: Channel drops while another client writes");
    remote.drop_connections();
    let missed = remote.insert_silently(Document::text("written while you were away").to_raw());
    step(&format!("#{} was written and its event lost", missed.id));
    let ok = settle(&remote, &[&me, &carol]).await;
    me.narrate();
    carol.narrate();
    step("reconnect re-fetched the snapshot");
    show_board(&me);
    convergence_result(ok);

    section("Phase 3: Known hazard — same-id events out of order");
    let at = missed.created_at;
    remote.inject(ChangeEvent::Update(RemoteRecord {
        id: missed.id.clone(),
        content: json!("v2"),
        created_at: at,
    }));
    remote.inject(ChangeEvent::Insert(RemoteRecord {
        id: missed.id.clone(),
        content: json!("v1"),
        created_at: at,
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    step(&format!(
        "#{} now reads {:?}: the stale insert applied last wins",
        missed.id,
        me.engine.copy_text(&missed.id)
    ));
    let _ = me.engine.resync();
    let ok = settle(&remote, &[&me]).await;
    step("a resync restores the remote's truth");
    me.narrate();
    convergence_result(ok);

    me.shutdown().await;
    carol.shutdown().await;
}

// ─── Offline ───────────────────────────────────────────────────────────────

async fn run_offline(cli: &Cli) {
    header("OFFLINE — Retry Budget, Manual Reconnect, Rejected Writes");
    let remote = Arc::new(MemoryRemote::default());
    let existing = remote.insert_silently(json!("already on the board"));

    section("Phase 1: The channel refuses every attempt");
    remote.fail_subscriptions(3);
    let mut me = Viewer::new(&cli.viewer, &cli.channel, &remote);
    me.engine.start();
    me.engine.wait_for_state(ConnectionState::Offline).await;
    me.narrate();
    show_board(&me);

    section("Phase 2: Manual reconnect");
    if let Err(err) = me.engine.reconnect() {
        warn_line(&err.to_string());
    }
    me.engine.wait_for_state(ConnectionState::Synced).await;
    me.narrate();
    show_board(&me);

    section("Phase 3: The access policy rejects writes");
    remote.deny_writes(true);
    let mut draft = me.engine.composer();
    draft.push_text("this will bounce");
    if let Err(err) = me.engine.submit_draft(&mut draft).await {
        step(&format!("rejected as {}", err.kind()));
    }
    step(&format!(
        "draft kept for re-editing: {:?}",
        draft.document().to_plain_text()
    ));
    let id = existing.id;
    let _ = me.engine.delete_item(&id).await;
    step(&format!("delete control re-enabled: {}", !me.engine.is_busy(&id)));
    me.narrate();

    remote.deny_writes(false);
    if me.engine.submit_draft(&mut draft).await.is_ok() {
        step("retry succeeded, draft cleared");
    }
    let ok = settle(&remote, &[&me]).await;
    me.narrate();
    show_board(&me);
    convergence_result(ok);

    me.shutdown().await;
}

// ─── Interactive ───────────────────────────────────────────────────────────

async fn run_interactive(cli: &Cli) -> std::io::Result<()> {
    header("INTERACTIVE REPL — Clipsync Board");
    let remote = Arc::new(MemoryRemote::default());
    let mut me = Viewer::new(&cli.viewer, &cli.channel, &remote);
    let mut other = Viewer::new("someone-else", &cli.channel, &remote);
    me.connect().await;
    other.connect().await;
    other.narrate();

    println!();
    println!("  {}", "Commands:".bold().underline());
    for (cmd, help) in [
        ("post <text>", "Post a note"),
        ("image [caption]", "Post a note with a pasted image"),
        ("other <text>", "Post as another viewer"),
        ("edit <id> <text>", "Replace a note's text"),
        ("delete <id>", "Delete a note"),
        ("copy <id>", "Copy a note as plain text"),
        ("list", "Show the board"),
        ("drop", "Drop every realtime channel"),
        ("lost <text>", "Write a note whose event is lost"),
        ("deny on|off", "Toggle the access policy"),
        ("reconnect", "Reconnect after going offline"),
        ("resync", "Refetch the board"),
        ("quit", "Exit"),
    ] {
        println!("    {:<22} {}", cmd.bright_cyan(), help);
    }
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout
            .write_all(format!("{}", "clipsync> ".bright_cyan().bold()).as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(input) = lines.next_line().await? else {
            break;
        };
        let input = input.trim();
        let (cmd, rest) = input.split_once(' ').unwrap_or((input, ""));
        let rest = rest.trim();

        match cmd {
            "" => {}
            "post" | "p" => {
                if let Err(err) = me.engine.submit(&Document::text(rest)).await {
                    if err.is_local() {
                        warn_line("Nothing to post");
                    }
                }
            }
            "image" | "i" => {
                let mut draft = me.engine.composer();
                draft.push_text(rest);
                let at = draft.document().len();
                match draft.paste_media(at, MediaPayload::data_uri(PIXEL_PNG)) {
                    Ok(_) => {
                        draft.settle_all().await;
                        let _ = me.engine.submit_draft(&mut draft).await;
                    }
                    Err(err) => warn_line(&err.to_string()),
                }
            }
            "other" | "o" => {
                let _ = other.engine.submit(&Document::text(rest)).await;
                other.narrate();
            }
            "edit" | "e" => {
                let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
                let result = me.engine.edit_and_save(&ItemId::new(id), &Document::text(text)).await;
                if let Err(SyncError::Validation) = result {
                    warn_line("Usage: edit <id> <text>");
                }
            }
            "delete" | "d" => {
                let _ = me.engine.delete_item(&ItemId::new(rest)).await;
            }
            "copy" | "c" => match me.engine.copy_text(&ItemId::new(rest)) {
                Some(text) => step(&format!("copied: {:?}", text)),
                None => warn_line(&format!("No note #{}", rest)),
            },
            "list" | "l" => {}
            "drop" => {
                remote.drop_connections();
                step("all channels dropped");
            }
            "lost" => {
                let record = remote.insert_silently(Document::text(rest).to_raw());
                step(&format!("#{} written without an event; try 'resync'", record.id));
            }
            "deny" => {
                let on = rest != "off";
                remote.deny_writes(on);
                step(&format!("writes {}", if on { "denied" } else { "allowed" }));
            }
            "reconnect" => {
                if let Err(err) = me.engine.reconnect() {
                    warn_line(&err.to_string());
                }
            }
            "resync" => {
                if let Err(err) = me.engine.resync() {
                    warn_line(&err.to_string());
                }
            }
            "quit" | "exit" | "q" => {
                println!("  {}", "Goodbye!".dimmed());
                break;
            }
            "help" | "h" | "?" => {
                println!("  post | image | other | edit | delete | copy | list");
                println!("  drop | lost | deny | reconnect | resync | quit");
            }
            unknown => {
                println!(
                    "  {} Unknown command '{}' — type 'help'",
                    "?".bright_yellow(),
                    unknown
                );
                continue;
            }
        }

        // Give the change events a moment to come back before redrawing.
        tokio::time::sleep(Duration::from_millis(30)).await;
        me.narrate();
        show_board(&me);
    }

    me.shutdown().await;
    other.shutdown().await;
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo => run_demo(&cli).await,
        Commands::Chaos => run_chaos(&cli).await,
        Commands::Offline => run_offline(&cli).await,
        Commands::Interactive => run_interactive(&cli).await?,
    }
    Ok(())
}
