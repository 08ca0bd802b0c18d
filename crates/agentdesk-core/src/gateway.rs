//! The façade the desktop shell talks to.
//!
//! All lifecycle operations lock the gateway's inner state for their full
//! duration, which serializes them: two concurrent `start` calls produce
//! exactly one child, and nothing observes a half-initialized session. The
//! one deliberate exception is `submit_credential`, which resolves the
//! secret rendezvous without the inner lock so a suspended `start` can be
//! resumed at all.

use std::path::PathBuf;

use agentdesk_pty::ChildKiller;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::command::{self, AuxSession, CommandOutput};
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::launch::{self, LaunchConfig};
use crate::secret::SecretBroker;
use crate::session::{Payload, PrimarySession};

/// Broadcast capacity for the event fan-out. Slow subscribers that fall
/// further behind than this see `Lagged` and miss events.
const EVENT_CAPACITY: usize = 256;

/// Result of a `start` call. `already_running` marks the idempotent case:
/// the returned pid is the live session's, not a new child's.
#[derive(Debug, Clone, Serialize)]
pub struct StartInfo {
    pub pid: u32,
    pub workspace_dir: PathBuf,
    pub already_running: bool,
}

/// Result of a `stop` call.
#[derive(Debug, Clone, Serialize)]
pub struct StopInfo {
    pub already_stopped: bool,
}

/// Result of a `login` call.
#[derive(Debug, Clone, Serialize)]
pub struct LoginInfo {
    pub pid: u32,
    pub already_running: bool,
}

struct GatewayInner {
    primary: Option<PrimarySession>,
    aux: Option<AuxSession>,
    workspace_dir: PathBuf,
    /// Held for the remainder of the run once acquired; never persisted.
    credential: Option<String>,
}

/// Owns the primary session, the auxiliary auth session, the workspace
/// directory, and the in-memory credential. One instance per process,
/// created on application ready and torn down via [`shutdown`].
///
/// [`shutdown`]: SessionGateway::shutdown
pub struct SessionGateway {
    inner: Mutex<GatewayInner>,
    events: broadcast::Sender<SessionEvent>,
    secrets: SecretBroker,
    config: LaunchConfig,
    /// Killer for an in-flight one-shot auth command. Lives outside the
    /// inner lock because that lock is held for the command's whole run;
    /// `shutdown` sweeps this slot first so a hung command cannot wedge
    /// teardown.
    oneshot_killer: std::sync::Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
}

impl SessionGateway {
    /// Create a gateway. The workspace defaults to the process's initial
    /// working directory until a selection action changes it.
    pub fn new(config: LaunchConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(GatewayInner {
                primary: None,
                aux: None,
                workspace_dir: std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from(".")),
                credential: None,
            }),
            events,
            secrets: SecretBroker::new(),
            config,
            oneshot_killer: std::sync::Mutex::new(None),
        }
    }

    /// Subscribe to the gateway's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start the primary agent session.
    ///
    /// Idempotent while a session is live: returns the existing pid with
    /// `already_running` set instead of spawning twice. Suspends while the
    /// credential is acquired; cancellation fails with
    /// `CredentialRequired` and leaves everything not-started.
    pub async fn start(&self) -> Result<StartInfo, SessionError> {
        let mut inner = self.inner.lock().await;

        if let Some(primary) = &inner.primary {
            if !primary.is_exited() {
                return Ok(StartInfo {
                    pid: primary.pid(),
                    workspace_dir: inner.workspace_dir.clone(),
                    already_running: true,
                });
            }
            inner.primary = None;
        }

        let credential = self.acquire_credential(&mut inner).await?;

        let spec = launch::build_spawn_spec(
            &self.config,
            &[],
            &inner.workspace_dir,
            Some(&credential),
        );
        let session =
            PrimarySession::spawn(&spec, &inner.workspace_dir, self.events.clone())?;
        let pid = session.pid();
        inner.primary = Some(session);

        let workspace_dir = inner.workspace_dir.clone();
        log::info!("agent session started (pid {pid}) in {}", workspace_dir.display());

        Ok(StartInfo {
            pid,
            workspace_dir,
            already_running: false,
        })
    }

    /// Credential precedence: value held this run, then the configured
    /// environment variable, then the blocking acquisition flow.
    async fn acquire_credential(
        &self,
        inner: &mut GatewayInner,
    ) -> Result<String, SessionError> {
        if let Some(held) = &inner.credential {
            return Ok(held.clone());
        }

        if let Ok(value) = std::env::var(&self.config.credential_env) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                inner.credential = Some(value.clone());
                return Ok(value);
            }
        }

        let rx = self.secrets.request();
        self.emit(SessionEvent::CredentialRequest);
        match rx.await {
            Ok(Some(value)) => {
                inner.credential = Some(value.clone());
                Ok(value)
            }
            // Cancelled, dismissed, or superseded.
            _ => Err(SessionError::CredentialRequired),
        }
    }

    /// Send one payload to the primary session, newline-framed.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        match inner.primary.as_mut() {
            Some(primary) if !primary.is_exited() => primary.write_line(&payload.into()),
            _ => {
                inner.primary = None;
                Err(SessionError::NotRunning)
            }
        }
    }

    /// Stop the primary session. A no-op success when nothing is running.
    ///
    /// Cleanup is unconditional: the session slot is cleared even when the
    /// kill signal cannot be delivered, and that failure is surfaced after
    /// cleanup.
    pub async fn stop(&self) -> Result<StopInfo, SessionError> {
        let mut inner = self.inner.lock().await;
        let Some(mut primary) = inner.primary.take() else {
            return Ok(StopInfo {
                already_stopped: true,
            });
        };
        if primary.is_exited() {
            return Ok(StopInfo {
                already_stopped: true,
            });
        }

        match primary.kill() {
            Ok(()) => Ok(StopInfo {
                already_stopped: false,
            }),
            // The kill can race the child's own exit; that is a stop, not
            // a failure.
            Err(_) if primary.is_exited() => Ok(StopInfo {
                already_stopped: false,
            }),
            Err(err) => {
                log::warn!("stop: {err}");
                Err(err)
            }
        }
    }

    /// Start an interactive login session. Idempotent while one is live.
    pub async fn login(&self) -> Result<LoginInfo, SessionError> {
        let mut inner = self.inner.lock().await;

        if let Some(aux) = &inner.aux {
            if !aux.is_exited() {
                return Ok(LoginInfo {
                    pid: aux.pid(),
                    already_running: true,
                });
            }
            inner.aux = None;
        }

        let spec = launch::build_spawn_spec(
            &self.config,
            &["auth", "login"],
            &inner.workspace_dir,
            inner.credential.as_deref(),
        );
        let aux = command::run_streaming(&spec, self.events.clone())?;
        let pid = aux.pid();
        inner.aux = Some(aux);

        Ok(LoginInfo {
            pid,
            already_running: false,
        })
    }

    /// One-shot `auth status`.
    pub async fn auth_status(&self) -> Result<CommandOutput, SessionError> {
        self.run_auth_command(&["auth", "status"]).await
    }

    /// One-shot `auth logout`.
    pub async fn logout(&self) -> Result<CommandOutput, SessionError> {
        self.run_auth_command(&["auth", "logout"]).await
    }

    /// Run a bounded auth sub-command. Holding the inner lock for the
    /// whole run is what guarantees at most one auxiliary session; a live
    /// streaming login still refuses with `AlreadyRunning`.
    async fn run_auth_command(&self, args: &[&str]) -> Result<CommandOutput, SessionError> {
        let mut inner = self.inner.lock().await;

        if let Some(aux) = &inner.aux {
            if !aux.is_exited() {
                return Err(SessionError::AlreadyRunning);
            }
            inner.aux = None;
        }

        let spec = launch::build_spawn_spec(
            &self.config,
            args,
            &inner.workspace_dir,
            inner.credential.as_deref(),
        );
        let run = command::CollectedRun::spawn(&spec)?;
        if let Ok(mut slot) = self.oneshot_killer.lock() {
            *slot = Some(run.clone_killer());
        }
        let result = run.wait().await;
        if let Ok(mut slot) = self.oneshot_killer.lock() {
            *slot = None;
        }
        result
    }

    /// Store the workspace directory chosen by the external picker. Every
    /// later session spawn uses it as the child's working directory.
    pub async fn set_workspace(&self, dir: PathBuf) -> PathBuf {
        let mut inner = self.inner.lock().await;
        inner.workspace_dir = dir.clone();
        self.emit(SessionEvent::WorkspaceSet {
            workspace_dir: dir.clone(),
        });
        dir
    }

    pub async fn workspace_dir(&self) -> PathBuf {
        self.inner.lock().await.workspace_dir.clone()
    }

    /// Resolve the pending secret rendezvous. `None` (or an empty value)
    /// cancels the suspended start. Returns `false` when nothing was
    /// pending.
    pub fn submit_credential(&self, value: Option<String>) -> bool {
        self.secrets.submit(value)
    }

    /// Application-shutdown teardown: force-stop whatever is live.
    pub async fn shutdown(&self) {
        // An in-flight one-shot holds the inner lock until its child
        // exits, so it must be killed before that lock is taken.
        let oneshot = match self.oneshot_killer.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(mut killer) = oneshot {
            if let Err(err) = killer.kill() {
                log::warn!("shutdown: {err}");
            }
        }

        let mut inner = self.inner.lock().await;
        if let Some(mut primary) = inner.primary.take() {
            if !primary.is_exited() {
                if let Err(err) = primary.kill() {
                    log::warn!("shutdown: {err}");
                }
            }
        }
        if let Some(mut aux) = inner.aux.take() {
            if !aux.is_exited() {
                if let Err(err) = aux.kill() {
                    log::warn!("shutdown: {err}");
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Send fails only when no subscriber is connected.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// A gateway pinned to an explicit program, with a credential variable
    /// that is guaranteed to exist so no prompt fires.
    fn gateway(program: &str, base_args: &[&str]) -> SessionGateway {
        SessionGateway::new(LaunchConfig {
            program: Some(PathBuf::from(program)),
            base_args: base_args.iter().map(|s| s.to_string()).collect(),
            // HOME is always set in the test environment.
            credential_env: "HOME".to_string(),
        })
    }

    /// A gateway whose credential variable is never set, forcing the
    /// acquisition flow.
    fn prompting_gateway(program: &str, test_var: &str) -> SessionGateway {
        std::env::remove_var(test_var);
        SessionGateway::new(LaunchConfig {
            program: Some(PathBuf::from(program)),
            base_args: Vec::new(),
            credential_env: test_var.to_string(),
        })
    }

    async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn start_emits_records_in_order_then_exit() {
        let gw = gateway("/bin/sh", &["-c", "printf '{\"a\":1}\\nplain text\\n'"]);
        let mut rx = gw.subscribe();

        let info = gw.start().await.expect("start failed");
        assert!(!info.already_running);
        assert!(info.pid > 0);

        match next_event(&mut rx).await {
            SessionEvent::ProcessStart { pid, .. } => assert_eq!(pid, info.pid),
            other => panic!("expected process-start, got {other:?}"),
        }

        let mut records = Vec::new();
        loop {
            match next_event(&mut rx).await {
                SessionEvent::Record { record } => records.push(record),
                SessionEvent::ProcessExit { exit_code, .. } => {
                    assert_eq!(exit_code, Some(0));
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(records.len(), 2, "got {records:?}");
        assert_eq!(
            records[0].as_json().and_then(|v| v.get("a")),
            Some(&serde_json::json!(1))
        );
        assert_eq!(records[1].as_text(), Some("plain text"));
    }

    #[tokio::test]
    async fn second_start_is_idempotent_on_pid() {
        let gw = gateway("/bin/cat", &[]);
        let first = gw.start().await.expect("start failed");
        let second = gw.start().await.expect("second start failed");
        assert_eq!(first.pid, second.pid);
        assert!(!first.already_running);
        assert!(second.already_running);
        gw.stop().await.expect("stop failed");
    }

    #[tokio::test]
    async fn send_roundtrips_through_the_agent() {
        let gw = gateway("/bin/cat", &[]);
        let mut rx = gw.subscribe();
        gw.start().await.expect("start failed");

        gw.send("ping-marker").await.expect("send failed");

        // cat echoes the line back; PTY echo may surface it twice, so just
        // require it at least once before stopping.
        loop {
            match next_event(&mut rx).await {
                SessionEvent::Record { record } => {
                    if record.as_text() == Some("ping-marker") {
                        break;
                    }
                }
                SessionEvent::ProcessStart { .. } => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }
        gw.stop().await.expect("stop failed");
    }

    #[tokio::test]
    async fn send_without_session_is_not_running() {
        let gw = gateway("/bin/cat", &[]);
        let err = gw.send("nope").await.expect_err("send should fail");
        assert!(matches!(err, SessionError::NotRunning));
    }

    #[tokio::test]
    async fn stop_when_idle_reports_already_stopped() {
        let gw = gateway("/bin/cat", &[]);
        let info = gw.stop().await.expect("stop failed");
        assert!(info.already_stopped);
    }

    #[tokio::test]
    async fn stop_kills_and_exit_event_arrives() {
        let gw = gateway("/bin/cat", &[]);
        let mut rx = gw.subscribe();
        gw.start().await.expect("start failed");

        let info = gw.stop().await.expect("stop failed");
        assert!(!info.already_stopped);

        loop {
            if let SessionEvent::ProcessExit { .. } = next_event(&mut rx).await {
                break;
            }
        }

        // Slot was cleared; a new start spawns a fresh child.
        let again = gw.start().await.expect("restart failed");
        assert!(!again.already_running);
        gw.stop().await.expect("second stop failed");
    }

    #[tokio::test]
    async fn cancelled_credential_flow_fails_start_without_spawning() {
        let gw = Arc::new(prompting_gateway("/bin/cat", "AGENTDESK_TEST_CRED_CANCEL"));
        let mut rx = gw.subscribe();

        let starter = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.start().await })
        };

        match next_event(&mut rx).await {
            SessionEvent::CredentialRequest => {}
            other => panic!("expected credential-request, got {other:?}"),
        }
        assert!(gw.submit_credential(None));

        let result = starter.await.expect("start task panicked");
        assert!(matches!(result, Err(SessionError::CredentialRequired)));

        // Nothing was spawned: send still reports not running.
        let err = gw.send("x").await.expect_err("send should fail");
        assert!(matches!(err, SessionError::NotRunning));
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_exactly_one_child() {
        let gw = Arc::new(prompting_gateway(
            "/bin/cat",
            "AGENTDESK_TEST_CRED_CONCURRENT",
        ));
        let mut rx = gw.subscribe();

        let a = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.start().await })
        };
        let b = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.start().await })
        };

        // Exactly one request: the second start finds the session (and the
        // retained credential) once the first finishes.
        match next_event(&mut rx).await {
            SessionEvent::CredentialRequest => {}
            other => panic!("expected credential-request, got {other:?}"),
        }
        assert!(gw.submit_credential(Some("sk-test".to_string())));

        let a = a.await.expect("task panicked").expect("start failed");
        let b = b.await.expect("task panicked").expect("start failed");
        assert_eq!(a.pid, b.pid);
        assert_ne!(
            a.already_running, b.already_running,
            "exactly one call should have spawned"
        );

        // Credential is retained: a restart must not prompt again.
        gw.stop().await.expect("stop failed");
        let again = gw.start().await.expect("restart failed");
        assert!(!again.already_running);
        gw.stop().await.expect("stop failed");
    }

    #[tokio::test]
    async fn workspace_selection_applies_to_the_next_spawn() {
        let dir = std::env::temp_dir().canonicalize().unwrap();
        let gw = gateway("/bin/sh", &["-c", "pwd"]);
        let mut rx = gw.subscribe();

        let stored = gw.set_workspace(dir.clone()).await;
        assert_eq!(stored, dir);
        match next_event(&mut rx).await {
            SessionEvent::WorkspaceSet { workspace_dir } => assert_eq!(workspace_dir, dir),
            other => panic!("expected workspace:set, got {other:?}"),
        }

        let info = gw.start().await.expect("start failed");
        assert_eq!(info.workspace_dir, dir);

        let needle = dir.to_string_lossy().into_owned();
        loop {
            match next_event(&mut rx).await {
                SessionEvent::Record { record } => {
                    if record.as_text() == Some(needle.as_str()) {
                        break;
                    }
                }
                SessionEvent::ProcessStart { .. } => {}
                SessionEvent::ProcessExit { .. } => {
                    panic!("exited without printing the workspace dir")
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn login_streams_and_clears_the_aux_slot_on_exit() {
        // `sh -c 'echo follow the url' agentdesk auth login` ignores the
        // trailing words, so the login invocation runs the script.
        let gw = gateway("/bin/sh", &["-c", "echo follow the url", "agentdesk"]);
        let mut rx = gw.subscribe();

        let info = gw.login().await.expect("login failed");
        assert!(!info.already_running);

        let mut saw_start = false;
        let mut saw_line = false;
        loop {
            match next_event(&mut rx).await {
                SessionEvent::AuthLoginStart { pid } => {
                    assert_eq!(pid, info.pid);
                    saw_start = true;
                }
                SessionEvent::AuthLogin { line } => {
                    assert_eq!(line, "follow the url");
                    saw_line = true;
                }
                SessionEvent::AuthLoginExit { exit_code, .. } => {
                    assert_eq!(exit_code, Some(0));
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_start && saw_line);

        // Exited session is cleared lazily: the next login spawns anew.
        let again = gw.login().await.expect("second login failed");
        assert!(!again.already_running);
        loop {
            if let SessionEvent::AuthLoginExit { .. } = next_event(&mut rx).await {
                break;
            }
        }
    }

    #[tokio::test]
    async fn one_shot_auth_refused_while_login_is_live() {
        let gw = gateway("/bin/sh", &["-c", "sleep 2", "agentdesk"]);
        let info = gw.login().await.expect("login failed");

        let second = gw.login().await.expect("second login failed");
        assert!(second.already_running);
        assert_eq!(second.pid, info.pid);

        let err = gw.auth_status().await.expect_err("status should be refused");
        assert!(matches!(err, SessionError::AlreadyRunning));

        gw.shutdown().await;
    }

    #[tokio::test]
    async fn auth_status_collects_output() {
        // The one-shot path appends `auth status`; the stub script ignores
        // those words and prints a status line.
        let gw = gateway("/bin/sh", &["-c", "printf 'logged in as tester\\n'", "agentdesk"]);
        let out = gw.auth_status().await.expect("status failed");
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.output, "logged in as tester");
    }

    #[tokio::test]
    async fn failing_auth_command_carries_diagnostics() {
        let gw = gateway("/bin/sh", &["-c", "echo not logged in; exit 1", "agentdesk"]);
        let err = gw.logout().await.expect_err("logout should fail");
        match err {
            SessionError::SubcommandFailed {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(output, "not logged in");
            }
            other => panic!("expected SubcommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_reaches_an_in_flight_one_shot() {
        let gw = Arc::new(gateway("/bin/sh", &["-c", "sleep 30", "agentdesk"]));

        let status = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.auth_status().await })
        };
        // Let the runner spawn the child and register its killer.
        tokio::time::sleep(Duration::from_millis(500)).await;

        gw.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(5), status)
            .await
            .expect("shutdown left the one-shot hanging")
            .expect("status task panicked");
        assert!(matches!(result, Err(SessionError::SubcommandFailed { .. })));
    }

    #[tokio::test]
    async fn shutdown_tears_down_live_sessions() {
        let gw = gateway("/bin/cat", &[]);
        gw.start().await.expect("start failed");
        gw.shutdown().await;

        let err = gw.send("x").await.expect_err("send should fail after shutdown");
        assert!(matches!(err, SessionError::NotRunning));
    }
}
