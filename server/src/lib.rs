//! # Chat Broker Library
//!
//! This library implements the server side of a real-time multi-user
//! chat: clients connect over TCP, are assigned a unique display name,
//! and exchange broadcast messages, image references, and renames with
//! everyone else connected.
//!
//! ## Architecture
//!
//! The broker is a single-threaded event processor. Per-connection
//! reader tasks translate wire frames into events; one broker loop
//! handles those events sequentially, mutating the session registry and
//! fanning packets out through per-connection writer channels. Because
//! exactly one event is in flight at a time, registry operations are
//! atomic without locks and every broadcast completes before the next
//! event is looked at.
//!
//! ## Module Organization
//!
//! ### Identity Module (`identity`)
//! Generates candidate display names and retries until one is free
//! under case-insensitive comparison, with a bounded retry budget.
//!
//! ### Registry Module (`registry`)
//! The authoritative connection-id to session mapping. Sole owner of
//! session state; enforces the invariant that no two active sessions
//! share a case-insensitively equal display name.
//!
//! ### Router Module (`router`)
//! The protocol state machine. Dispatches connect, message, image,
//! rename, and disconnect events into registry mutations and outbound
//! broadcasts (to one connection, to all but one, or to all).
//!
//! ### Network Module (`network`)
//! The TCP transport: listener, per-connection reader/writer tasks,
//! frame codec plumbing, and the broker event loop. Owns no business
//! logic.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:3000").await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod identity;
pub mod network;
pub mod registry;
pub mod router;
