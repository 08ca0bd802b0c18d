//! Auxiliary sessions for bounded auth sub-commands.
//!
//! Two flavors: a collected run for one-shot commands (`auth status`,
//! `auth logout`) that resolves with the full output on exit, and a
//! streaming run for interactive login, which broadcasts each line and an
//! exit event instead of accumulating. Modeling them separately keeps
//! "this process ends quickly and I want everything it said" apart from
//! "this process streams until it decides to stop."

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agentdesk_pty::{ChildKiller, PtyHandle, SpawnSpec};
use tokio::sync::{broadcast, oneshot};

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::session::{drain_lines, wait_child, ExitSummary};

/// Result of a successful one-shot auxiliary command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: u32,
    pub signal: Option<i32>,
    /// Every framed line, in order, joined with newlines and trimmed.
    pub output: String,
}

/// An in-flight one-shot sub-command.
///
/// Spawning and awaiting are split so the caller can clone a killer for
/// the child between the two; the gateway sweeps that killer on shutdown
/// to reach a hung command.
pub(crate) struct CollectedRun {
    pty: PtyHandle,
    done_rx: oneshot::Receiver<(ExitSummary, Vec<String>)>,
}

impl CollectedRun {
    /// Spawn the sub-command and start its output pump.
    ///
    /// Lines are kept as raw text; status/administrative commands never
    /// emit JSON worth decoding.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, SessionError> {
        let mut pty = PtyHandle::spawn(spec)?;
        let reader = pty
            .take_reader()
            .ok_or_else(|| SessionError::SpawnFailed("PTY reader unavailable".to_string()))?;
        let mut child = pty
            .take_child()
            .ok_or_else(|| SessionError::SpawnFailed("PTY child unavailable".to_string()))?;

        let (done_tx, done_rx) = oneshot::channel::<(ExitSummary, Vec<String>)>();

        std::thread::Builder::new()
            .name("agent-aux-io".to_string())
            .spawn(move || {
                let mut lines = Vec::new();
                drain_lines(reader, |line| lines.push(line));
                let summary = wait_child(&mut child);
                let _ = done_tx.send((summary, lines));
            })
            .map_err(|e| {
                SessionError::SpawnFailed(format!("failed to start I/O thread: {e}"))
            })?;

        Ok(Self { pty, done_rx })
    }

    /// Clone a killer for the running child.
    pub fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.pty.clone_killer()
    }

    /// Await exit. Exit code zero resolves with the joined output; anything
    /// else rejects with the same text as diagnostic content.
    pub async fn wait(self) -> Result<CommandOutput, SessionError> {
        // `self.pty` stays alive across the await so the master end (and
        // with it the child's terminal) survives until the command finishes.
        let (summary, lines) = self
            .done_rx
            .await
            .map_err(|_| SessionError::SpawnFailed("auxiliary output pump died".to_string()))?;

        let output = lines.join("\n").trim().to_string();
        match summary.exit_code {
            Some(0) => Ok(CommandOutput {
                exit_code: 0,
                signal: summary.signal,
                output,
            }),
            exit_code => Err(SessionError::SubcommandFailed {
                exit_code,
                signal: summary.signal,
                output,
            }),
        }
    }
}

/// Run a sub-command to completion, collecting all of its output.
pub async fn run_collected(spec: &SpawnSpec) -> Result<CommandOutput, SessionError> {
    CollectedRun::spawn(spec)?.wait().await
}

/// A live streaming auxiliary session (interactive login).
pub(crate) struct AuxSession {
    pid: u32,
    _pty: PtyHandle,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exited: Arc<AtomicBool>,
}

impl AuxSession {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn kill(&mut self) -> Result<(), SessionError> {
        self.killer
            .kill()
            .map_err(|e| SessionError::TerminationFailed(e.to_string()))
    }
}

/// Spawn a streaming auxiliary session.
///
/// Every framed line is broadcast as `auth:login`, followed by a single
/// `auth:login-exit` once the channel has been fully flushed.
pub(crate) fn run_streaming(
    spec: &SpawnSpec,
    events: broadcast::Sender<SessionEvent>,
) -> Result<AuxSession, SessionError> {
    let mut pty = PtyHandle::spawn(spec)?;
    let pid = pty.process_id().unwrap_or(0);
    let killer = pty.clone_killer();

    let reader = pty
        .take_reader()
        .ok_or_else(|| SessionError::SpawnFailed("PTY reader unavailable".to_string()))?;
    let mut child = pty
        .take_child()
        .ok_or_else(|| SessionError::SpawnFailed("PTY child unavailable".to_string()))?;

    // Announced before the pump thread starts so no login line can precede
    // the start event in the stream.
    let _ = events.send(SessionEvent::AuthLoginStart { pid });

    let exited = Arc::new(AtomicBool::new(false));
    let exited_flag = Arc::clone(&exited);

    std::thread::Builder::new()
        .name(format!("agent-auth-io-{pid}"))
        .spawn(move || {
            drain_lines(reader, |line| {
                let _ = events.send(SessionEvent::AuthLogin { line });
            });
            let summary = wait_child(&mut child);
            log::debug!("auth session pid {pid} exited: {summary:?}");
            exited_flag.store(true, Ordering::SeqCst);
            let _ = events.send(SessionEvent::AuthLoginExit {
                exit_code: summary.exit_code,
                signal: summary.signal,
            });
        })
        .map_err(|e| SessionError::SpawnFailed(format!("failed to start I/O thread: {e}")))?;

    Ok(AuxSession {
        pid,
        _pty: pty,
        killer,
        exited,
    })
}
