//! The long-lived primary agent session.
//!
//! Each session gets a dedicated OS thread for PTY reads, because the
//! reader blocks. The thread frames bytes into lines, decodes each line
//! into a [`Record`], and broadcasts it; when the reader hits EOF it waits
//! on the child and broadcasts the exit event last, so subscribers always
//! see every completed line before `process-exit`.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agentdesk_proto::{LineFramer, Record};
use agentdesk_pty::{Child, ChildKiller, PtyHandle, SpawnSpec};
use tokio::sync::broadcast;

use crate::error::SessionError;
use crate::events::SessionEvent;

/// Outbound message for the agent: raw text or a JSON value serialized to
/// its canonical compact form.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    /// The newline-terminated wire form. Exactly one trailing terminator,
    /// regardless of what the caller supplied.
    pub fn to_wire(&self) -> String {
        let mut line = match self {
            Payload::Text(text) => text.clone(),
            Payload::Json(value) => value.to_string(),
        };
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        line.push('\n');
        line
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// How a child ended. The portable-pty backend does not surface the
/// killing signal, so `signal` is `None` there; the field is kept for
/// wire compatibility with the shell.
#[derive(Debug, Clone, Copy)]
pub struct ExitSummary {
    pub exit_code: Option<u32>,
    pub signal: Option<i32>,
}

/// Read PTY output to EOF, feeding every completed line to `on_line`.
///
/// Reads are raw byte chunks and can end mid-character, so a truncated
/// trailing UTF-8 sequence is carried into the next read rather than
/// decoded; line content survives any byte-level chunking. The framer
/// lives and dies with this call, so the partial-line buffer is reset for
/// free on exit and never shared between channels.
pub(crate) fn drain_lines(mut reader: Box<dyn Read + Send>, mut on_line: impl FnMut(String)) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 8192];
    let mut bytes: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break, // PTY closed
        };
        bytes.extend_from_slice(&buf[..n]);
        let keep = incomplete_suffix_len(&bytes);
        let rest = bytes.split_off(bytes.len() - keep);
        let chunk = String::from_utf8_lossy(&bytes).into_owned();
        bytes = rest;
        for line in framer.feed(&chunk) {
            on_line(line);
        }
    }
}

/// Length of the truncated UTF-8 sequence at the end of `bytes`, zero when
/// the buffer ends on a character boundary. Only an incomplete multi-byte
/// character counts; invalid sequences are left to lossy replacement.
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte < 0x80 {
            return 0;
        }
        if byte >= 0xC0 {
            let need = match byte {
                0xF0..=0xFF => 4,
                0xE0..=0xEF => 3,
                _ => 2,
            };
            return if need > back { back } else { 0 };
        }
        // continuation byte, keep scanning back
    }
    0
}

/// Reap the child after its output channel closed.
pub(crate) fn wait_child(child: &mut Box<dyn Child + Send + Sync>) -> ExitSummary {
    match child.wait() {
        Ok(status) => ExitSummary {
            exit_code: Some(status.exit_code()),
            signal: None,
        },
        Err(err) => {
            log::warn!("failed to reap child: {err}");
            ExitSummary {
                exit_code: None,
                signal: None,
            }
        }
    }
}

/// The primary interactive agent session.
///
/// Owns the PTY handle (keeping the master and writer alive) and a killer;
/// the reader and child live on the pump thread. `exited` flips once the
/// pump has broadcast the exit event, letting the gateway clear its slot
/// lazily.
pub(crate) struct PrimarySession {
    pid: u32,
    pty: PtyHandle,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exited: Arc<AtomicBool>,
}

impl PrimarySession {
    pub fn spawn(
        spec: &SpawnSpec,
        workspace_dir: &Path,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let mut pty = PtyHandle::spawn(spec)?;
        let pid = pty.process_id().unwrap_or(0);
        let killer = pty.clone_killer();

        let reader = pty
            .take_reader()
            .ok_or_else(|| SessionError::SpawnFailed("PTY reader unavailable".to_string()))?;
        let mut child = pty
            .take_child()
            .ok_or_else(|| SessionError::SpawnFailed("PTY child unavailable".to_string()))?;

        // Announce the session before the pump thread starts so no record
        // can precede the start event in the stream.
        let _ = events.send(SessionEvent::ProcessStart {
            pid,
            workspace_dir: workspace_dir.to_path_buf(),
        });

        let exited = Arc::new(AtomicBool::new(false));
        let exited_flag = Arc::clone(&exited);

        std::thread::Builder::new()
            .name(format!("agent-io-{pid}"))
            .spawn(move || {
                drain_lines(reader, |line| {
                    let _ = events.send(SessionEvent::Record {
                        record: Record::decode(&line),
                    });
                });
                let summary = wait_child(&mut child);
                log::debug!("agent pid {pid} exited: {summary:?}");
                // All completed lines are out; only now report the exit.
                exited_flag.store(true, Ordering::SeqCst);
                let _ = events.send(SessionEvent::ProcessExit {
                    exit_code: summary.exit_code,
                    signal: summary.signal,
                });
            })
            .map_err(|e| SessionError::SpawnFailed(format!("failed to start I/O thread: {e}")))?;

        Ok(Self {
            pid,
            pty,
            killer,
            exited,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Write one newline-framed payload to the agent's input.
    pub fn write_line(&mut self, payload: &Payload) -> Result<(), SessionError> {
        self.pty.write(payload.to_wire().as_bytes())?;
        Ok(())
    }

    /// Request termination of the child process.
    pub fn kill(&mut self) -> Result<(), SessionError> {
        self.killer
            .kill()
            .map_err(|e| SessionError::TerminationFailed(e.to_string()))
    }
}
