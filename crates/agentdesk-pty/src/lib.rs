//! agentdesk-pty: pseudo-terminal process management for Agentdesk.
//!
//! The agent CLI changes its output framing when it detects a real terminal,
//! so the shell always runs it attached to a PTY rather than plain pipes.
//! This crate owns the low-level spawn/read/write/kill surface; line framing
//! and session lifecycle live in the crates above it.
//!
//! # Architecture
//!
//! - [`SpawnSpec`] — Everything needed to launch one child: program, args,
//!   working directory, environment overlay, and terminal geometry.
//! - [`PtyHandle`] — Owns the PTY master, the spawned child, and the
//!   reader/writer ends. The reader and child can be taken out for use on a
//!   dedicated I/O thread, since PTY reads are blocking.

pub mod pty;

pub use portable_pty::{Child, ChildKiller};
pub use pty::{PtyError, PtyHandle, SpawnSpec};
