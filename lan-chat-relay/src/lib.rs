//! Chat relay for a local network that also carries file transfers.
//!
//! Every client holds one TCP connection. Text frames are chat lines or
//! slash commands; `/send` switches the connection into a binary mode that
//! streams a file in chunks to one user or to everyone. Each module focuses
//! on a concrete responsibility:
//!
//! - [`frame`] reads and writes the length-prefixed wire format.
//! - [`envelope`] defines what travels through the hub.
//! - [`hub`] keeps the registry of live sessions and fans envelopes out.
//! - [`session`] runs one connection: handshake, read loop, delivery, teardown.
//! - [`command`] parses slash commands.
//! - [`relay`] tracks both ends of a file transfer.
//! - [`directory`] manages the per-user incoming folders.
//! - [`server`] accepts connections and spawns sessions.
//! - [`cli`] and [`config`] turn command-line flags into runtime settings.
//!
//! Integration tests drive the server over loopback TCP.

pub mod cli;
pub mod command;
pub mod config;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod hub;
pub mod relay;
pub mod server;
pub mod session;
