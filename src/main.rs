//! texelation: the thin client.
//!
//! Connects to a running texelation-server, replicates its pane state into
//! a local cache and renders it full-screen; key and mouse input go back
//! over the wire. `--reconnect` resumes the previous session so running
//! applications are picked up where they were left.

use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{
        poll, read, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste,
        EnableMouseCapture, Event,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use texelation::client::ui::WorkspaceView;
use texelation::client::{ClientApp, ServerConnection};
use texelation::config::{default_socket_path, SessionTicket};

#[derive(Parser, Debug)]
#[command(name = "texelation", about = "Texelation client", version)]
struct Args {
    /// Server socket path.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Resume the session persisted by the previous run.
    #[arg(long)]
    reconnect: bool,

    /// Append panic backtraces to this file.
    #[arg(long)]
    panic_log: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Some(path) = args.panic_log.clone() {
        texelation::panic_log::install(path);
    }

    if !std::io::stdin().is_terminal() {
        anyhow::bail!("texelation must be run in an interactive terminal");
    }

    let socket = args.socket.unwrap_or_else(default_socket_path);
    let resume = if args.reconnect {
        SessionTicket::load().map(|t| (t.session_id, 0))
    } else {
        None
    };

    // Connect before touching the terminal so failures print cleanly.
    let connection = ServerConnection::connect(&socket, &client_name(), resume)
        .context("Failed to connect to texelation-server")?;
    SessionTicket::new(connection.session_id)
        .save()
        .unwrap_or_else(|e| log::warn!("could not persist session ticket: {e:#}"));

    // Setup terminal
    enable_raw_mode().context("Failed to enable raw mode - are you in a terminal?")?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableBracketedPaste
    )
    .context("Failed to setup terminal")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let mut app = ClientApp::new(connection);
    if let Ok(size) = terminal.size() {
        app.schedule_resize(size.width, size.height);
    }

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal (always try to restore even on error)
    let _ = disable_raw_mode();
    let _ = execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
        DisableBracketedPaste
    );
    let _ = terminal.show_cursor();

    app.connection().close();
    result
}

fn client_name() -> String {
    format!("texelation@{}", nix::unistd::getuid())
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut ClientApp,
) -> Result<()> {
    loop {
        {
            let state = app.connection().state();
            let state = state.lock().expect("state lock poisoned");
            terminal.draw(|f| f.render_widget(WorkspaceView::new(&state), f.area()))?;
        }

        if poll(Duration::from_millis(50))? {
            match read()? {
                Event::Key(key) => app.handle_key(key)?,
                Event::Mouse(mouse) => app.handle_mouse(mouse)?,
                Event::Resize(w, h) => app.schedule_resize(w, h),
                Event::Paste(text) => app.connection().send_paste(text.into_bytes())?,
                _ => {}
            }
        }

        app.tick()?;

        if app.should_quit {
            return Ok(());
        }
        if !app.connection().is_connected() {
            anyhow::bail!("server connection lost");
        }
    }
}
