//! # World Sync Client Library
//!
//! Client side of the shared-world service: joins under a display name,
//! then keeps a local view of every entity in step with the server at a
//! fixed display rate.
//!
//! ## Architecture Overview
//!
//! The client is single-threaded. One loop drives everything:
//!
//! 1. Pull a snapshot of the world (this also keeps the session alive)
//! 2. Every K-th tick, push at most one move and any pending color change
//! 3. Hand the merged view to the display
//!
//! ### Client-Side Prediction
//! A move is applied to the local entity as soon as it is chosen. The
//! server's copy only replaces the local one once nothing is awaiting
//! acknowledgement.
//!
//! ### Sequenced Moves
//! Every move carries a per-session sequence number. A move whose reply was
//! lost is resent with the same number, so the server applies it at most
//! once; its `StaleMove` answer says where numbering resumes.
//!
//! ### Recovery
//! Timeouts skip a tick and never stop the loop. After too many in a row
//! the display is told to warn the user. A session the server has expired
//! is rejoined automatically.
//!
//! ## Module Organization
//!
//! - `driver`: the client loop state machine and tick pacing
//! - `input`: keyboard mapping to loop events
//! - `network`: request/response transport over UDP
//! - `rendering`: the display abstraction and the macroquad renderer
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::driver::{ClientLoop, InputSource};
//! use client::input::InputEvent;
//! use client::network::UdpTransport;
//! use client::rendering::Display;
//! use shared::{ClientConfig, EntityView};
//!
//! struct Quiet;
//! impl Display for Quiet {
//!     fn display(&mut self, _entities: &[EntityView]) {}
//! }
//!
//! struct NoInput;
//! impl InputSource for NoInput {
//!     fn poll(&mut self) -> Vec<InputEvent> {
//!         Vec::new()
//!     }
//! }
//!
//! let config = ClientConfig::default();
//! let transport = UdpTransport::connect("127.0.0.1:8080", config.request_timeout)?;
//! let mut client = ClientLoop::new(transport, "alice", config);
//! client.run_blocking(&mut Quiet, &mut NoInput)?;
//! # Ok::<(), client::network::ClientError>(())
//! ```

pub mod driver;
pub mod input;
pub mod network;
pub mod rendering;
