//! Per-connection handling: handshake, inbound dispatch, diff flushing and
//! keepalive.
//!
//! Each accepted connection runs on its own thread. A companion reader
//! thread turns the socket into a channel of decoded frames so the main
//! loop can poll inbound traffic, workspace broadcasts and the session's
//! diff queue on one short cadence without partial reads.

use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::protocol::frame::{read_frame, write_frame, write_raw_frame, CodecError, Frame};
use crate::protocol::messages::{
    Clipboard, ConnectAccept, Message, Pong, Welcome, MSG_BUFFER_DELTA,
};
use crate::protocol::{nil_session, SessionId};
use crate::session::{Session, SessionRegistry};

use super::clipboard::ClipboardStore;
use super::theme::ThemeStore;
use super::workspace::WorkspaceEvent;

/// Poll cadence of the steady-state loop; doubles as the flush interval.
const READ_TICK: Duration = Duration::from_millis(20);

/// Handshake messages must arrive within this window.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A peer silent for longer than this is considered gone.
const KEEPALIVE_GRACE: Duration = Duration::from_secs(30);

/// Shared server context handed to every connection thread.
pub struct ConnectionCtx {
    pub registry: Arc<SessionRegistry>,
    pub workspace: Sender<WorkspaceEvent>,
    pub clipboard: Arc<ClipboardStore>,
    pub theme: Arc<ThemeStore>,
    pub server_name: String,
}

/// Run one client connection to completion. A clean peer disconnect returns
/// `Ok`; codec and protocol violations return the error that closed it.
pub fn handle_connection(stream: UnixStream, ctx: &ConnectionCtx) -> Result<()> {
    let reader_stream = stream.try_clone().context("Failed to clone stream")?;
    let (frame_tx, frame_rx) = mpsc::channel();
    thread::spawn(move || read_loop(reader_stream, &frame_tx));

    let mut conn = Connection {
        stream,
        frames: frame_rx,
        ctx,
        session_id: nil_session(),
        session: None,
        listener: None,
        attached: false,
        awaiting_resume: false,
        snapshot_written: false,
        last_sent: 0,
        last_inbound: Instant::now(),
    };

    let result = conn.run();
    // The reader thread holds a cloned fd; shut the socket down so the
    // peer sees EOF and the reader exits.
    let _ = conn.stream.shutdown(std::net::Shutdown::Both);
    if conn.attached {
        let _ = ctx.workspace.send(WorkspaceEvent::Detach {
            session_id: conn.session_id,
        });
    }
    result
}

/// Blocking socket reads feeding the frame channel. Exits when the peer
/// closes or a codec error poisons the stream.
fn read_loop(mut stream: UnixStream, frames: &Sender<Result<Frame, CodecError>>) {
    loop {
        match read_frame(&mut stream) {
            Ok(frame) => {
                if frames.send(Ok(frame)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = frames.send(Err(e));
                break;
            }
        }
    }
}

struct Connection<'a> {
    stream: UnixStream,
    frames: Receiver<Result<Frame, CodecError>>,
    ctx: &'a ConnectionCtx,
    session_id: SessionId,
    session: Option<Arc<Mutex<Session>>>,
    listener: Option<Receiver<Message>>,
    /// True once the workspace has our listener registered.
    attached: bool,
    /// Connect carried a non-zero session id; diffs wait for ResumeRequest.
    awaiting_resume: bool,
    /// The attach `TreeSnapshot` has been written; diffs may flow.
    snapshot_written: bool,
    last_sent: u64,
    last_inbound: Instant,
}

impl Connection<'_> {
    fn run(&mut self) -> Result<()> {
        self.handshake()?;
        self.steady_state()
    }

    // ----- handshake -------------------------------------------------------

    fn handshake(&mut self) -> Result<()> {
        let hello = self.expect_frame(HANDSHAKE_TIMEOUT)?;
        let Some(Message::Hello(hello)) = hello.message()? else {
            bail!("protocol error: expected Hello");
        };
        log::info!("client connected: {}", hello.client_name);
        self.send(
            0,
            &Message::Welcome(Welcome {
                server_name: self.ctx.server_name.clone(),
            }),
        )?;

        let connect = self.expect_frame(HANDSHAKE_TIMEOUT)?;
        let Some(Message::ConnectRequest(request)) = connect.message()? else {
            bail!("protocol error: expected ConnectRequest");
        };

        if request.session_id == nil_session() {
            let (session_id, session) = self.ctx.registry.create();
            log::info!("allocated session {session_id}");
            self.session_id = session_id;
            self.session = Some(session);
            self.awaiting_resume = false;
        } else {
            // An unknown id is treated like a failed credential.
            let session = self
                .ctx
                .registry
                .lookup(&request.session_id)
                .with_context(|| format!("resume rejected for {}", request.session_id))?;
            log::info!("session {} awaiting resume", request.session_id);
            self.session_id = request.session_id;
            self.session = Some(session);
            self.awaiting_resume = true;
        }

        self.send(
            0,
            &Message::ConnectAccept(ConnectAccept {
                session_id: self.session_id,
                resume_supported: true,
            }),
        )?;

        // New sessions attach immediately; resumed ones wait for the
        // client's ResumeRequest so replay starts from its ack cursor.
        if !self.awaiting_resume {
            self.attach()?;
        }
        Ok(())
    }

    fn attach(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.ctx
            .workspace
            .send(WorkspaceEvent::Attach {
                session_id: self.session_id,
                listener: tx,
            })
            .context("workspace is gone")?;
        self.listener = Some(rx);
        self.attached = true;
        Ok(())
    }

    // ----- steady state ----------------------------------------------------

    fn steady_state(&mut self) -> Result<()> {
        loop {
            match self.frames.recv_timeout(READ_TICK) {
                Ok(Ok(frame)) => {
                    self.last_inbound = Instant::now();
                    self.dispatch(frame)?;
                }
                Ok(Err(e)) => return self.reader_error(e),
                // Timeout is the poll point that lets pending diffs flush.
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }

            self.forward_broadcasts()?;
            self.flush_pending()?;

            if self.last_inbound.elapsed() > KEEPALIVE_GRACE {
                log::warn!("session {}: peer silent, closing", self.session_id);
                return Ok(());
            }
        }
    }

    fn reader_error(&self, error: CodecError) -> Result<()> {
        match &error {
            CodecError::Io(e)
                if e.kind() == std::io::ErrorKind::UnexpectedEof
                    || e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                log::info!("session {}: peer closed", self.session_id);
                Ok(())
            }
            _ => Err(error).context("connection codec failure"),
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let Some(message) = frame.message()? else {
            // Unknown message types are skipped, not fatal.
            log::debug!("ignoring unknown message type {}", frame.header.msg_type);
            return Ok(());
        };
        match message {
            Message::BufferAck(ack) => {
                if let Some(session) = &self.session {
                    session
                        .lock()
                        .expect("session lock poisoned")
                        .ack(ack.sequence);
                }
            }
            Message::Ping(ping) => {
                self.send(
                    frame.sequence(),
                    &Message::Pong(Pong {
                        timestamp: ping.timestamp,
                    }),
                )?;
            }
            Message::Pong(_) => {}
            Message::KeyEvent(key) => {
                let _ = self.ctx.workspace.send(WorkspaceEvent::Key(key));
            }
            Message::MouseEvent(mouse) => {
                let _ = self.ctx.workspace.send(WorkspaceEvent::Mouse(mouse));
            }
            Message::Resize(resize) => {
                let _ = self.ctx.workspace.send(WorkspaceEvent::Resize {
                    cols: resize.cols,
                    rows: resize.rows,
                });
            }
            Message::Paste(paste) => {
                let _ = self.ctx.workspace.send(WorkspaceEvent::Paste(paste.data));
            }
            Message::ClipboardSet(clip) => {
                self.ctx.clipboard.set(&clip.mime, &clip.data);
                let stored = self.ctx.clipboard.get(&clip.mime).unwrap_or_default();
                self.send(
                    0,
                    &Message::ClipboardData(Clipboard {
                        mime: clip.mime,
                        data: stored,
                    }),
                )?;
            }
            Message::ClipboardGet(clip) => {
                let data = self.ctx.clipboard.get(&clip.mime).unwrap_or_default();
                self.send(
                    0,
                    &Message::ClipboardData(Clipboard {
                        mime: clip.mime,
                        data,
                    }),
                )?;
            }
            Message::ThemeUpdate(theme) => {
                self.ctx.theme.set(&theme.section, &theme.key, &theme.value);
                self.send(0, &Message::ThemeAck(theme))?;
                let _ = self.ctx.workspace.send(WorkspaceEvent::ThemeChanged);
            }
            Message::ResumeRequest(resume) => {
                if !self.awaiting_resume {
                    log::debug!("ignoring resume on an already-attached connection");
                } else if resume.session_id != self.session_id {
                    bail!("protocol error: resume for a different session");
                } else {
                    self.last_sent = resume.last_sequence;
                    self.awaiting_resume = false;
                    self.attach()?;
                    log::info!(
                        "session {} resumed from sequence {}",
                        self.session_id,
                        resume.last_sequence
                    );
                }
            }
            // Handshake and server-originated types are noise here.
            other => {
                log::debug!("ignoring unexpected message type {}", other.msg_type());
            }
        }
        Ok(())
    }

    /// Write queued control-plane messages. The attach snapshot always
    /// travels through here before `flush_pending` is allowed to run.
    fn forward_broadcasts(&mut self) -> Result<()> {
        let Some(listener) = &self.listener else {
            return Ok(());
        };
        let messages: Vec<Message> = listener.try_iter().collect();
        for message in messages {
            if matches!(message, Message::TreeSnapshot(_)) {
                self.snapshot_written = true;
                if let Some(session) = &self.session {
                    session
                        .lock()
                        .expect("session lock poisoned")
                        .mark_snapshot();
                }
            }
            self.send(0, &message)?;
        }
        Ok(())
    }

    /// Write retained diffs past the send cursor, in sequence order.
    fn flush_pending(&mut self) -> Result<()> {
        if !self.attached || !self.snapshot_written {
            return Ok(());
        }
        let Some(session) = &self.session else {
            return Ok(());
        };
        let packets = {
            let session = session.lock().expect("session lock poisoned");
            session.pending(self.last_sent)
        };
        for packet in packets {
            write_raw_frame(
                &mut self.stream,
                MSG_BUFFER_DELTA,
                &self.session_id,
                packet.sequence,
                &packet.payload,
            )
            .context("Failed to write diff")?;
            self.last_sent = packet.sequence;
        }
        Ok(())
    }

    fn expect_frame(&mut self, timeout: Duration) -> Result<Frame> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => Err(e).context("handshake codec failure"),
            Err(_) => bail!("handshake timed out"),
        }
    }

    fn send(&mut self, sequence: u64, message: &Message) -> Result<()> {
        write_frame(&mut self.stream, &self.session_id, sequence, message)
            .context("Failed to write frame")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::read_frame;
    use crate::protocol::messages::{BufferAck, ConnectRequest, Hello, ResumeRequest};
    use crate::server::workspace::Workspace;
    use crate::server::theme::ThemeStore;
    use std::time::Duration;

    /// Spin up a full server side (workspace thread + connection thread)
    /// over a socketpair and return the client end plus the registry.
    fn server_fixture() -> (UnixStream, Arc<SessionRegistry>, Sender<WorkspaceEvent>) {
        let registry = Arc::new(SessionRegistry::new());
        let theme = Arc::new(ThemeStore::in_memory());
        let (events_tx, events_rx) = mpsc::channel();

        let ws_registry = Arc::clone(&registry);
        let ws_theme = Arc::clone(&theme);
        thread::spawn(move || {
            let mut workspace = Workspace::new(ws_registry, ws_theme, None);
            workspace.bootstrap("welcome").unwrap();
            workspace.run(&events_rx);
        });

        let (client, server) = UnixStream::pair().unwrap();
        let ctx_registry = Arc::clone(&registry);
        let ctx_events = events_tx.clone();
        thread::spawn(move || {
            let ctx = ConnectionCtx {
                registry: ctx_registry,
                workspace: ctx_events,
                clipboard: Arc::new(ClipboardStore::new()),
                theme,
                server_name: "texelation-test".to_string(),
            };
            let _ = handle_connection(server, &ctx);
        });

        (client, registry, events_tx)
    }

    fn client_send(stream: &mut UnixStream, message: &Message) {
        write_frame(stream, &nil_session(), 0, message).unwrap();
    }

    fn read_message(stream: &mut UnixStream) -> Message {
        let frame = read_frame(stream).unwrap();
        frame.message().unwrap().expect("known message")
    }

    /// Read messages until one matches, failing after a bound.
    fn read_until(stream: &mut UnixStream, mut pred: impl FnMut(&Message) -> Option<bool>) {
        for _ in 0..64 {
            let message = read_message(stream);
            match pred(&message) {
                Some(true) => return,
                Some(false) => panic!("unexpected message order: {message:?}"),
                None => continue,
            }
        }
        panic!("expected message never arrived");
    }

    #[test]
    fn fresh_connect_handshake_then_snapshot_then_delta() {
        let (mut client, _registry, _events) = server_fixture();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        client_send(
            &mut client,
            &Message::Hello(Hello {
                client_name: "c1".into(),
            }),
        );
        assert!(matches!(read_message(&mut client), Message::Welcome(_)));

        client_send(
            &mut client,
            &Message::ConnectRequest(ConnectRequest {
                session_id: nil_session(),
            }),
        );
        let accept = match read_message(&mut client) {
            Message::ConnectAccept(a) => a,
            other => panic!("expected ConnectAccept, got {other:?}"),
        };
        assert!(accept.resume_supported);
        assert_ne!(accept.session_id, nil_session());

        // The tree snapshot precedes the first buffer delta.
        let mut saw_snapshot = false;
        read_until(&mut client, |m| match m {
            Message::TreeSnapshot(_) => {
                saw_snapshot = true;
                None
            }
            Message::BufferDelta(d) => {
                assert!(saw_snapshot, "delta before snapshot");
                assert_eq!(d.revision, 1);
                Some(true)
            }
            _ => None,
        });
    }

    #[test]
    fn first_message_other_than_hello_closes_the_connection() {
        let (mut client, _registry, _events) = server_fixture();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        client_send(&mut client, &Message::BufferAck(BufferAck { sequence: 1 }));
        // Server closes; the next read hits EOF.
        assert!(read_frame(&mut client).is_err());
    }

    #[test]
    fn resume_with_unknown_session_is_rejected() {
        let (mut client, _registry, _events) = server_fixture();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        client_send(
            &mut client,
            &Message::Hello(Hello {
                client_name: "c1".into(),
            }),
        );
        assert!(matches!(read_message(&mut client), Message::Welcome(_)));
        client_send(
            &mut client,
            &Message::ConnectRequest(ConnectRequest {
                session_id: uuid::Uuid::new_v4(),
            }),
        );
        assert!(read_frame(&mut client).is_err());
    }

    #[test]
    fn resume_replays_retained_diffs_after_a_snapshot() {
        let (mut client, registry, events) = server_fixture();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // Create a detached session and let the workspace publish into it.
        let (session_id, session) = registry.create();
        events.send(WorkspaceEvent::ThemeChanged).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.lock().unwrap().pending(0).is_empty() {
            assert!(Instant::now() < deadline, "publisher never ran");
            thread::sleep(Duration::from_millis(10));
        }

        client_send(
            &mut client,
            &Message::Hello(Hello {
                client_name: "c2".into(),
            }),
        );
        assert!(matches!(read_message(&mut client), Message::Welcome(_)));
        client_send(
            &mut client,
            &Message::ConnectRequest(ConnectRequest { session_id }),
        );
        assert!(matches!(read_message(&mut client), Message::ConnectAccept(_)));

        client_send(
            &mut client,
            &Message::ResumeRequest(ResumeRequest {
                session_id,
                last_sequence: 0,
            }),
        );

        // Snapshot first, then replayed diffs in increasing sequence order.
        let mut saw_snapshot = false;
        read_until(&mut client, |m| match m {
            Message::TreeSnapshot(_) => {
                saw_snapshot = true;
                None
            }
            Message::BufferDelta(_) => {
                assert!(saw_snapshot, "delta before snapshot");
                Some(true)
            }
            _ => None,
        });
    }

    #[test]
    fn clipboard_set_then_get_roundtrips() {
        let (mut client, _registry, _events) = server_fixture();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        client_send(
            &mut client,
            &Message::Hello(Hello {
                client_name: "c3".into(),
            }),
        );
        assert!(matches!(read_message(&mut client), Message::Welcome(_)));
        client_send(
            &mut client,
            &Message::ConnectRequest(ConnectRequest {
                session_id: nil_session(),
            }),
        );
        assert!(matches!(read_message(&mut client), Message::ConnectAccept(_)));

        client_send(
            &mut client,
            &Message::ClipboardSet(Clipboard {
                mime: "text/plain".into(),
                data: b"hello".to_vec(),
            }),
        );
        read_until(&mut client, |m| match m {
            Message::ClipboardData(clip) => {
                assert_eq!(clip.mime, "text/plain");
                assert_eq!(clip.data, b"hello".to_vec());
                Some(true)
            }
            _ => None,
        });

        client_send(
            &mut client,
            &Message::ClipboardGet(Clipboard {
                mime: "text/plain".into(),
                data: Vec::new(),
            }),
        );
        read_until(&mut client, |m| match m {
            Message::ClipboardData(clip) => {
                assert_eq!(clip.data, b"hello".to_vec());
                Some(true)
            }
            _ => None,
        });
    }

    #[test]
    fn ping_gets_an_echoing_pong() {
        let (mut client, _registry, _events) = server_fixture();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        client_send(
            &mut client,
            &Message::Hello(Hello {
                client_name: "c4".into(),
            }),
        );
        assert!(matches!(read_message(&mut client), Message::Welcome(_)));
        client_send(
            &mut client,
            &Message::ConnectRequest(ConnectRequest {
                session_id: nil_session(),
            }),
        );
        assert!(matches!(read_message(&mut client), Message::ConnectAccept(_)));

        client_send(&mut client, &Message::Ping(crate::protocol::messages::Ping { timestamp: 777 }));
        read_until(&mut client, |m| match m {
            Message::Pong(pong) => {
                assert_eq!(pong.timestamp, 777);
                Some(true)
            }
            _ => None,
        });
    }
}
