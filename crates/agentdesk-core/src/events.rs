//! Events surfaced to the UI collaborator.
//!
//! Serialized as tagged JSON; the tag strings match the payloads the shell
//! already understands (`process-start`, `auth:login`, …), so the gateway
//! can be dropped behind the existing renderer without a protocol change.

use std::path::PathBuf;

use agentdesk_proto::Record;
use serde::Serialize;

/// One event from the session gateway's broadcast stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// The primary session spawned.
    #[serde(rename = "process-start")]
    ProcessStart { pid: u32, workspace_dir: PathBuf },
    /// One decoded line of primary session output.
    #[serde(rename = "record")]
    Record { record: Record },
    /// The primary session's process exited. Emitted after every buffered
    /// complete line from that channel has been decoded and emitted.
    #[serde(rename = "process-exit")]
    ProcessExit {
        exit_code: Option<u32>,
        signal: Option<i32>,
    },
    /// A session start is suspended waiting for a credential; the shell
    /// should open its secret-entry surface and call `submit_credential`.
    #[serde(rename = "credential-request")]
    CredentialRequest,
    /// An interactive login session spawned.
    #[serde(rename = "auth:login-start")]
    AuthLoginStart { pid: u32 },
    /// One line of interactive login output.
    #[serde(rename = "auth:login")]
    AuthLogin { line: String },
    /// The interactive login session exited.
    #[serde(rename = "auth:login-exit")]
    AuthLoginExit {
        exit_code: Option<u32>,
        signal: Option<i32>,
    },
    /// The workspace directory changed.
    #[serde(rename = "workspace:set")]
    WorkspaceSet { workspace_dir: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_wire_tags() {
        let event = SessionEvent::ProcessStart {
            pid: 42,
            workspace_dir: PathBuf::from("/work"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "process-start", "pid": 42, "workspace_dir": "/work"})
        );

        let event = SessionEvent::AuthLoginExit {
            exit_code: Some(0),
            signal: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "auth:login-exit", "exit_code": 0, "signal": null})
        );
    }

    #[test]
    fn record_events_embed_the_decoded_value() {
        let event = SessionEvent::Record {
            record: Record::decode(r#"{"a":1}"#),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "record", "record": {"a": 1}})
        );
    }
}
