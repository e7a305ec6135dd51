//! Line-oriented TCP chat relay.
//!
//! Clients connect, give a display name, and every line they send is fanned
//! out to every other connected client. A single router task owns the set of
//! live sessions; per-connection read and write tasks talk to it over
//! bounded channels, so membership never needs a lock and a stalled client
//! can only ever lose its own lines.
//!
//! - [`cli`] declares the command-line interface for serve and client modes.
//! - [`server`] accepts TCP connections and spawns a session per client.
//! - [`session`] runs one connection: handshake, read loop, write loop.
//! - [`router`] owns the session registry and broadcasts every line.
//! - [`protocol`] defines the wire lines and line-at-a-time I/O helpers.
//! - [`client`] connects to a relay and chats from the terminal.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
