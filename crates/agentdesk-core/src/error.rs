/// Errors from session lifecycle operations.
///
/// Decode failures never appear here: malformed JSON lines fall back to
/// text records inside `agentdesk-proto` rather than erroring. Nothing is
/// retried automatically; retry is the caller's decision.
#[derive(Debug)]
pub enum SessionError {
    /// An operation that needs a live primary session found none.
    NotRunning,
    /// A one-shot auth command was refused because a streaming auth
    /// session is still live.
    AlreadyRunning,
    /// The secret acquisition flow was cancelled or dismissed.
    CredentialRequired,
    /// The child process could not be created.
    SpawnFailed(String),
    /// The kill signal could not be delivered. Session state has already
    /// been cleaned up when this is returned.
    TerminationFailed(String),
    /// An auxiliary one-shot command exited non-zero.
    SubcommandFailed {
        exit_code: Option<u32>,
        signal: Option<i32>,
        output: String,
    },
    /// An I/O error writing to the session's PTY.
    Io(std::io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotRunning => write!(f, "agent session is not running"),
            SessionError::AlreadyRunning => write!(f, "an auth session is already running"),
            SessionError::CredentialRequired => {
                write!(f, "a credential is required to start the agent")
            }
            SessionError::SpawnFailed(msg) => write!(f, "failed to spawn agent: {msg}"),
            SessionError::TerminationFailed(msg) => {
                write!(f, "failed to stop agent: {msg}")
            }
            SessionError::SubcommandFailed {
                exit_code,
                signal,
                output,
            } => write!(
                f,
                "auth command failed (exit_code={}, signal={}): {output}",
                exit_code.map_or_else(|| "n/a".to_string(), |c| c.to_string()),
                signal.map_or_else(|| "n/a".to_string(), |s| s.to_string()),
            ),
            SessionError::Io(err) => write!(f, "session I/O error: {err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<agentdesk_pty::PtyError> for SessionError {
    fn from(err: agentdesk_pty::PtyError) -> Self {
        match err {
            agentdesk_pty::PtyError::SpawnFailed(msg) => SessionError::SpawnFailed(msg),
            agentdesk_pty::PtyError::Io(err) => SessionError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommand_failure_reports_diagnostics() {
        let err = SessionError::SubcommandFailed {
            exit_code: Some(2),
            signal: None,
            output: "not logged in".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("exit_code=2"));
        assert!(text.contains("not logged in"));
    }

    #[test]
    fn pty_errors_map_into_session_errors() {
        let err: SessionError =
            agentdesk_pty::PtyError::SpawnFailed("no such file".to_string()).into();
        assert!(matches!(err, SessionError::SpawnFailed(_)));
    }
}
