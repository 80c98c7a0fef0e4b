//! # Account Server Library
//!
//! This library provides the authoritative server for a small multiplayer game:
//! it accepts client connections, creates and authenticates accounts, owns the
//! single game state every client observes, and broadcasts state changes.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Connections are accepted from the transport at the start of every tick and
//! tracked in a flat table. A disconnect only flags the entry; it is removed at
//! the start of the following tick so the table never changes while it is
//! being walked.
//!
//! ### Protocol Dispatch
//! Clients speak a comma separated text protocol (see `shared::protocol`).
//! Account commands are answered to the sender only; a successful login moves
//! the shared state to `MainMenu` and announces it to everyone. Malformed
//! messages are dropped without a reply.
//!
//! ### Account Persistence
//! Accounts are kept in an append-only text file with one record per line.
//! Usernames are unique for the lifetime of the file.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick
//! All work happens inside [`network::Server::tick`], on one thread, in a fixed
//! order: accept, transport update, compaction, event draining. The async
//! [`network::Server::run_until`] wrapper only waits between ticks, so the
//! account store and game state need no locking.
//!
//! ### Transport Seam
//! The server talks to the network through the [`transport::Transport`]
//! trait. [`transport::UdpTransport`] provides reliable-ordered and
//! unreliable-unordered channels over one UDP socket;
//! [`transport::MemoryTransport`] runs everything in process.
//!
//! ## Module Organization
//!
//! - `accounts`: durable username/credential records
//! - `broadcast`: fan-out to every live connection
//! - `config`: runtime settings
//! - `connection_table`: tracked connections and deferred removal
//! - `error`: error types
//! - `game`: the shared game state machine and its hooks
//! - `network`: the event loop
//! - `transport`: the transport trait and its bindings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::transport::UdpTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let transport = UdpTransport::new(config.connection_timeout);
//!
//!     let mut server = Server::start(transport, &config)?;
//!     server.run_until(tokio::signal::ctrl_c()).await;
//!     server.stop();
//!
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod broadcast;
pub mod config;
pub mod connection_table;
pub mod error;
pub mod game;
pub mod network;
pub mod transport;
