//! Client-side protocol plumbing: handshake, inbound dispatch into the
//! shared cache, coalesced acks and keepalive pings.
//!
//! The UI thread reads `ClientState` under its mutex and sends input
//! through `ServerConnection`; three background threads (reader, acker,
//! pinger) keep the replication flowing.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::protocol::frame::{read_frame, write_frame};
use crate::protocol::messages::{
    BufferAck, Clipboard, ConnectRequest, Hello, KeyEvent, Message, MouseEvent, Paste, Ping, Pong,
    Resize, ResumeRequest, StateUpdate, ThemeValue,
};
use crate::protocol::{nil_session, PaneId, SessionId};

use super::cache::BufferCache;

/// Coalesced acks fire at most this often, carrying the highest sequence.
const ACK_INTERVAL: Duration = Duration::from_millis(20);

/// Client keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Replicated state the renderer reads.
pub struct ClientState {
    pub cache: BufferCache,
    pub state: Option<StateUpdate>,
    pub focused: Option<PaneId>,
    /// Last `ClipboardData` received, consumed by the UI.
    pub clipboard: Option<(String, Vec<u8>)>,
    pub connected: bool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            cache: BufferCache::new(),
            state: None,
            focused: None,
            clipboard: None,
            connected: true,
        }
    }
}

/// A live connection to the server.
pub struct ServerConnection {
    writer: Mutex<UnixStream>,
    pub session_id: SessionId,
    state: Arc<Mutex<ClientState>>,
    highest_seq: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl ServerConnection {
    /// Connect and complete the handshake. `resume` carries a previous
    /// session id and the last acknowledged sequence; `None` asks the
    /// server for a fresh session.
    pub fn connect(
        socket_path: &Path,
        client_name: &str,
        resume: Option<(SessionId, u64)>,
    ) -> Result<Arc<Self>> {
        let mut stream = UnixStream::connect(socket_path).with_context(|| {
            format!("Failed to connect to server at {}", socket_path.display())
        })?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;

        write_frame(
            &mut stream,
            &nil_session(),
            0,
            &Message::Hello(Hello {
                client_name: client_name.to_string(),
            }),
        )?;
        let welcome = read_frame(&mut stream)?;
        let Some(Message::Welcome(welcome)) = welcome.message()? else {
            bail!("handshake failed: expected Welcome");
        };
        log::info!("connected to {}", welcome.server_name);

        let requested = resume.map(|(id, _)| id).unwrap_or_else(nil_session);
        write_frame(
            &mut stream,
            &requested,
            0,
            &Message::ConnectRequest(ConnectRequest {
                session_id: requested,
            }),
        )?;
        let accept = read_frame(&mut stream)?;
        let Some(Message::ConnectAccept(accept)) = accept.message()? else {
            bail!("handshake failed: expected ConnectAccept");
        };
        let session_id = accept.session_id;

        let last_sequence = match resume {
            Some((id, last)) if id == session_id => {
                if !accept.resume_supported {
                    bail!("server refused resume");
                }
                write_frame(
                    &mut stream,
                    &session_id,
                    0,
                    &Message::ResumeRequest(ResumeRequest {
                        session_id,
                        last_sequence: last,
                    }),
                )?;
                last
            }
            _ => 0,
        };

        // Steady-state reads block in the reader thread.
        stream.set_read_timeout(None)?;

        let connection = Arc::new(Self {
            writer: Mutex::new(stream.try_clone().context("Failed to clone stream")?),
            session_id,
            state: Arc::new(Mutex::new(ClientState::new())),
            highest_seq: Arc::new(AtomicU64::new(last_sequence)),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        connection.spawn_reader(stream);
        connection.spawn_acker();
        connection.spawn_pinger();
        Ok(connection)
    }

    pub fn state(&self) -> Arc<Mutex<ClientState>> {
        Arc::clone(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().expect("state lock poisoned").connected
    }

    /// Highest diff sequence observed, i.e. the resume cursor.
    pub fn last_sequence(&self) -> u64 {
        self.highest_seq.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.shutdown(std::net::Shutdown::Both);
        }
    }

    // ----- outbound --------------------------------------------------------

    pub fn send(&self, message: &Message) -> Result<()> {
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        write_frame(&mut *writer, &self.session_id, 0, message)
            .context("Failed to send to server")?;
        Ok(())
    }

    pub fn send_key(&self, key: KeyEvent) -> Result<()> {
        self.send(&Message::KeyEvent(key))
    }

    pub fn send_mouse(&self, mouse: MouseEvent) -> Result<()> {
        self.send(&Message::MouseEvent(mouse))
    }

    pub fn send_resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.send(&Message::Resize(Resize { cols, rows }))
    }

    pub fn send_paste(&self, data: Vec<u8>) -> Result<()> {
        self.send(&Message::Paste(Paste { data }))
    }

    pub fn clipboard_set(&self, mime: &str, data: Vec<u8>) -> Result<()> {
        self.send(&Message::ClipboardSet(Clipboard {
            mime: mime.to_string(),
            data,
        }))
    }

    pub fn clipboard_get(&self, mime: &str) -> Result<()> {
        self.send(&Message::ClipboardGet(Clipboard {
            mime: mime.to_string(),
            data: Vec::new(),
        }))
    }

    pub fn theme_update(&self, section: &str, key: &str, value: &str) -> Result<()> {
        self.send(&Message::ThemeUpdate(ThemeValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }))
    }

    // ----- background threads ---------------------------------------------

    fn spawn_reader(self: &Arc<Self>, mut stream: UnixStream) {
        let connection = Arc::clone(self);
        thread::spawn(move || {
            loop {
                let frame = match read_frame(&mut stream) {
                    Ok(frame) => frame,
                    Err(e) => {
                        if !connection.shutdown.load(Ordering::SeqCst) {
                            log::warn!("server connection lost: {e}");
                        }
                        break;
                    }
                };
                let sequence = frame.sequence();
                let message = match frame.message() {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(e) => {
                        log::error!("undecodable payload from server: {e}");
                        break;
                    }
                };
                connection.dispatch(sequence, message);
            }
            let mut state = connection.state.lock().expect("state lock poisoned");
            state.connected = false;
        });
    }

    fn dispatch(&self, sequence: u64, message: Message) {
        match message {
            Message::TreeSnapshot(snapshot) => {
                let mut state = self.state.lock().expect("state lock poisoned");
                state.cache.apply_snapshot(&snapshot);
            }
            Message::BufferDelta(delta) => {
                let mut state = self.state.lock().expect("state lock poisoned");
                state.cache.apply_delta(&delta);
                drop(state);
                // Record for the coalescing acker regardless of staleness;
                // the server trims by sequence, not revision.
                self.highest_seq.fetch_max(sequence, Ordering::SeqCst);
            }
            Message::PaneFocus(focus) => {
                let mut state = self.state.lock().expect("state lock poisoned");
                state.focused = Some(focus.pane_id);
            }
            Message::PaneState(pane_state) => {
                let mut state = self.state.lock().expect("state lock poisoned");
                state.cache.set_pane_flags(&pane_state);
            }
            Message::StateUpdate(update) => {
                let mut state = self.state.lock().expect("state lock poisoned");
                state.state = Some(update);
            }
            Message::ClipboardData(clip) => {
                let mut state = self.state.lock().expect("state lock poisoned");
                state.clipboard = Some((clip.mime, clip.data));
            }
            Message::ThemeAck(ack) => {
                log::debug!("theme value applied: {}.{}", ack.section, ack.key);
            }
            Message::Ping(ping) => {
                let _ = self.send(&Message::Pong(Pong {
                    timestamp: ping.timestamp,
                }));
            }
            Message::Pong(_) => {}
            other => {
                log::debug!("ignoring server message type {}", other.msg_type());
            }
        }
    }

    fn spawn_acker(self: &Arc<Self>) {
        let connection = Arc::clone(self);
        thread::spawn(move || {
            let mut acked = connection.highest_seq.load(Ordering::SeqCst);
            while !connection.shutdown.load(Ordering::SeqCst) {
                thread::sleep(ACK_INTERVAL);
                let highest = connection.highest_seq.load(Ordering::SeqCst);
                if highest > acked {
                    if connection
                        .send(&Message::BufferAck(BufferAck { sequence: highest }))
                        .is_err()
                    {
                        break;
                    }
                    acked = highest;
                }
            }
        });
    }

    fn spawn_pinger(self: &Arc<Self>) {
        let connection = Arc::clone(self);
        thread::spawn(move || {
            while !connection.shutdown.load(Ordering::SeqCst) {
                thread::sleep(PING_INTERVAL);
                let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
                if connection.send(&Message::Ping(Ping { timestamp })).is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::write_frame as server_write;
    use crate::protocol::messages::{
        CellSpan, ConnectAccept, PaneSnapshot, RowDelta, TreeNodeSnapshot, TreeSnapshot, Welcome,
        SPLIT_NONE,
    };
    use crate::protocol::cell::Style;
    use crate::protocol::messages::BufferDelta;
    use std::time::Instant;
    use uuid::Uuid;

    /// Fake just enough of a server over a socketpair-backed listener to
    /// exercise the handshake and inbound dispatch.
    fn fake_server(
        listener: std::os::unix::net::UnixListener,
        session_id: SessionId,
        frames: Vec<(u64, Message)>,
    ) -> thread::JoinHandle<Vec<Message>> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();

            // Hello -> Welcome
            let hello = read_frame(&mut stream).unwrap();
            assert!(matches!(hello.message().unwrap(), Some(Message::Hello(_))));
            server_write(
                &mut stream,
                &session_id,
                0,
                &Message::Welcome(Welcome {
                    server_name: "fake".into(),
                }),
            )
            .unwrap();

            // ConnectRequest -> ConnectAccept
            let connect = read_frame(&mut stream).unwrap();
            assert!(matches!(
                connect.message().unwrap(),
                Some(Message::ConnectRequest(_))
            ));
            server_write(
                &mut stream,
                &session_id,
                0,
                &Message::ConnectAccept(ConnectAccept {
                    session_id,
                    resume_supported: true,
                }),
            )
            .unwrap();

            for (sequence, message) in frames {
                server_write(&mut stream, &session_id, sequence, &message).unwrap();
            }

            // Collect what the client sends back until it disconnects.
            let mut received = Vec::new();
            while let Ok(frame) = read_frame(&mut stream) {
                if let Ok(Some(message)) = frame.message() {
                    received.push(message);
                }
            }
            received
        })
    }

    fn snapshot_message(pane_id: PaneId) -> Message {
        Message::TreeSnapshot(TreeSnapshot {
            panes: vec![PaneSnapshot {
                pane_id,
                revision: 1,
                title: "p".into(),
                rows: vec!["hi".into()],
                x: 0,
                y: 0,
                width: 10,
                height: 3,
                app_type: "texelterm".into(),
                app_config: "{}".into(),
            }],
            root: TreeNodeSnapshot {
                pane_index: 0,
                split: SPLIT_NONE,
                split_ratios: vec![],
                children: vec![],
            },
        })
    }

    fn delta_message(pane_id: PaneId) -> Message {
        Message::BufferDelta(BufferDelta {
            pane_id,
            revision: 2,
            flags: 0,
            styles: vec![Style::default()],
            rows: vec![RowDelta {
                row: 0,
                spans: vec![CellSpan {
                    start_col: 0,
                    style_index: 0,
                    text: "yo".into(),
                }],
            }],
        })
    }

    #[test]
    fn connect_applies_snapshot_and_delta_then_acks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("srv.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let session_id = Uuid::new_v4();
        let pane_id = Uuid::new_v4();

        let server = fake_server(
            listener,
            session_id,
            vec![(0, snapshot_message(pane_id)), (1, delta_message(pane_id))],
        );

        let connection = ServerConnection::connect(&path, "test-client", None).unwrap();
        assert_eq!(connection.session_id, session_id);

        // Wait for the delta to land in the cache.
        let state = connection.state();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            {
                let state = state.lock().unwrap();
                if let Some(pane) = state.cache.pane_by_id(&pane_id) {
                    if pane.revision == 2 {
                        break;
                    }
                }
            }
            assert!(Instant::now() < deadline, "delta never applied");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(connection.last_sequence(), 1);

        // Give the acker a couple of intervals, then close.
        thread::sleep(Duration::from_millis(80));
        connection.close();
        let received = server.join().unwrap();
        assert!(received
            .iter()
            .any(|m| matches!(m, Message::BufferAck(a) if a.sequence == 1)));
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.sock");
        assert!(ServerConnection::connect(&path, "c", None).is_err());
    }
}
