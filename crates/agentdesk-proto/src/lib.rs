//! agentdesk-proto: the line-oriented wire protocol spoken with the agent CLI.
//!
//! The agent writes newline-delimited output where each line is either a
//! JSON value or plain text. PTY output arrives in arbitrary chunks with
//! mixed CRLF/LF line endings, so decoding is split into two stages:
//!
//! - [`LineFramer`] — Accumulates chunks and yields complete, trimmed lines.
//! - [`Record`] — Classifies one line as parsed JSON or opaque text.

pub mod framer;
pub mod record;

pub use framer::LineFramer;
pub use record::Record;
