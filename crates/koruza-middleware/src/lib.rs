//! `koruza-middleware` – Messaging Layer
//!
//! Moves frames between the daemon and the outside world without caring
//! about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – In-process publish/subscribe bus with a local and a remote
//!   lane, built on Tokio broadcast channels.
//! - [`pubsub`] – WebSocket publish endpoint serving one lane as
//!   `topic@json` text frames.
//! - [`command`] – Request/reply command channel and its WebSocket endpoint.
//! - [`protocol`] – Command request validation, reply encoding and argument
//!   coercion.

pub mod bus;
pub mod command;
pub mod protocol;
pub mod pubsub;

pub use bus::{Lane, LaneReceiver, MessageBus};
pub use command::{CommandChannel, CommandSender, CommandSocket, PendingCommand, command_channel};
pub use protocol::{CommandError, CommandRequest};
pub use pubsub::PubSocket;
