//! # World Sync Server Library
//!
//! The authoritative side of the shared world. It owns the state of every
//! player entity, decides who may change it, and answers snapshot requests
//! so each client can draw everyone else.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! Entity positions and colors live only here. Clients request changes;
//! the server validates each request at the boundary and either applies it
//! or answers with a typed error. No client-supplied delta is trusted.
//!
//! ### Session Management
//! Each player name can be held by one session at a time. Joining with a
//! name that is already live is rejected. Sessions that stop sending
//! requests are expired by a periodic sweep, which also removes their
//! entities.
//!
//! ### Move Reconciliation
//! Moves are not idempotent, so every move carries a per-session sequence
//! number. Only the next expected number is applied; replays and gaps are
//! answered with `StaleMove` and leave the world unchanged.
//!
//! ## Module Organization
//!
//! ### Store Module (`store`)
//! In-memory map of entity id to entity, guarded by a single lock with
//! short, I/O-free critical sections.
//!
//! ### Session Module (`session`)
//! Session table, token validation, duplicate-join policy, expiry sweep.
//!
//! ### Protocol Module (`protocol`)
//! `SyncService`: the explicitly constructed server context. Validates and
//! dispatches decoded requests.
//!
//! ### Network Module (`network`)
//! UDP socket handling, datagram decoding, per-request tasks and the sweep
//! task.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::WorldConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:8080", WorldConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod protocol;
pub mod session;
pub mod store;
