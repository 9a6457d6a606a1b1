//! texelation-server: the long-lived server process.
//!
//! Owns the pane tree and the applications inside it, persists snapshots,
//! and serves any number of client sessions over a unix socket. SIGINT and
//! SIGTERM shut down gracefully (persisting a final snapshot); SIGHUP
//! reloads the theme file in place.

use std::fs;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

use texelation::config::{default_snapshot_path, default_socket_path};
use texelation::server::snapshot::SnapshotStore;
use texelation::server::theme::ThemeStore;
use texelation::server::{handle_connection, ConnectionCtx, Workspace, WorkspaceEvent};
use texelation::server::clipboard::ClipboardStore;
use texelation::session::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DefaultApp {
    Launcher,
    Welcome,
    Texelterm,
}

impl DefaultApp {
    fn app_type(self) -> &'static str {
        match self {
            DefaultApp::Launcher => "launcher",
            DefaultApp::Welcome => "welcome",
            DefaultApp::Texelterm => "texelterm",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "texelation-server", about = "Texelation server", version)]
struct Args {
    /// Listening socket path.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Workspace snapshot path.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Application opened in a fresh workspace.
    #[arg(long, value_enum, default_value_t = DefaultApp::Launcher)]
    default_app: DefaultApp,

    /// Log at debug level.
    #[arg(long)]
    verbose_logs: bool,

    /// Profiling: log per-publish pane counts and timings.
    #[arg(long)]
    publish_stats: bool,

    /// Retained diffs per detached session (0 = unbounded).
    #[arg(long)]
    retention: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose_logs { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let socket_path = args.socket.clone().unwrap_or_else(default_socket_path);
    let snapshot_path = match args.snapshot.clone() {
        Some(path) => path,
        None => default_snapshot_path().context("no snapshot path available")?,
    };

    // Shared stores. The theme loads explicitly before anything reads it.
    let registry = Arc::new(SessionRegistry::new());
    if let Some(limit) = args.retention {
        registry.set_retention_limit(limit);
    }
    let clipboard = Arc::new(ClipboardStore::new());
    let theme = Arc::new(match ThemeStore::default_path() {
        Some(path) => ThemeStore::with_path(path),
        None => ThemeStore::in_memory(),
    });
    if let Err(e) = theme.load() {
        log::warn!("theme load failed: {e:#}");
    }

    // The workspace thread owns all pane state.
    let (events_tx, events_rx) = mpsc::channel();
    let workspace_thread = {
        let registry = Arc::clone(&registry);
        let theme = Arc::clone(&theme);
        let default_app = args.default_app.app_type();
        let publish_stats = args.publish_stats;
        let store = SnapshotStore::new(snapshot_path);
        thread::Builder::new()
            .name("workspace".to_string())
            .spawn(move || {
                let mut workspace = Workspace::new(registry, theme, Some(store));
                if publish_stats {
                    workspace.enable_publish_stats();
                }
                if let Err(e) = workspace.bootstrap(default_app) {
                    log::error!("workspace bootstrap failed: {e:#}");
                    return;
                }
                workspace.run(&events_rx);
            })
            .context("Failed to spawn workspace thread")?
    };

    // Signal handling: terminate flag plus in-place theme reload.
    let terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&terminate))
        .context("Failed to register SIGINT")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&terminate))
        .context("Failed to register SIGTERM")?;
    let reload_theme = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGHUP, Arc::clone(&reload_theme))
        .context("Failed to register SIGHUP")?;

    // Remove a stale socket, but never yank one out from under a live
    // server.
    if socket_path.exists() {
        if UnixStream::connect(&socket_path).is_ok() {
            anyhow::bail!("server already running on {}", socket_path.display());
        }
        fs::remove_file(&socket_path)
            .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;
    listener
        .set_nonblocking(true)
        .context("Failed to set non-blocking")?;
    log::info!("texelation-server listening on {}", socket_path.display());

    while !terminate.load(Ordering::SeqCst) {
        if reload_theme.swap(false, Ordering::SeqCst) {
            log::info!("SIGHUP: reloading theme");
            if let Err(e) = theme.load() {
                log::warn!("theme reload failed: {e:#}");
            }
            let _ = events_tx.send(WorkspaceEvent::ThemeChanged);
        }

        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = ConnectionCtx {
                    registry: Arc::clone(&registry),
                    workspace: events_tx.clone(),
                    clipboard: Arc::clone(&clipboard),
                    theme: Arc::clone(&theme),
                    server_name: format!("texelation-server/{}", env!("CARGO_PKG_VERSION")),
                };
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &ctx) {
                        log::warn!("connection closed with error: {e:#}");
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                log::error!("accept error: {e}");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    log::info!("shutting down");
    let _ = events_tx.send(WorkspaceEvent::Shutdown);
    drop(events_tx);
    let _ = workspace_thread.join();
    fs::remove_file(&socket_path).ok();
    Ok(())
}
