//! agentdesk-core: session lifecycle for the Agentdesk desktop shell.
//!
//! The shell launches the agent CLI in a pseudo-terminal, exchanges
//! newline-delimited JSON with it, and relays decoded records to the UI.
//! This crate owns everything between the PTY and the UI boundary:
//!
//! - [`SessionGateway`] — The façade the shell invokes. Serializes
//!   start/send/stop against the single primary session and login/status/
//!   logout against the single auxiliary auth session; fans events out to
//!   subscribers over a broadcast channel.
//! - [`session`] — The primary session: one PTY child, a dedicated read
//!   pump, records broadcast in arrival order, exit reported last.
//! - [`command`] — Bounded auth sub-commands, collected or streaming.
//! - [`secret`] — The one-shot credential rendezvous `start` suspends on.
//! - [`launch`] — Agent CLI resolution and platform launcher wrapping.
//!
//! Window creation, menus, dialogs and rendering live in the shell layer
//! above; it consumes [`SessionEvent`]s and calls gateway methods.

pub mod command;
pub mod error;
pub mod events;
pub mod gateway;
pub mod launch;
pub mod secret;
pub mod session;

pub use command::CommandOutput;
pub use error::SessionError;
pub use events::SessionEvent;
pub use gateway::{LoginInfo, SessionGateway, StartInfo, StopInfo};
pub use launch::LaunchConfig;
pub use secret::SecretBroker;
pub use session::Payload;
