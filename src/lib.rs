//! Client engine for the JSON-over-websocket event bus bridge protocol.
//!
//! The bridge exposes a server-side event bus to remote clients through a
//! small JSON frame vocabulary (`register`, `unregister`, `send`, `publish`,
//! `ping`). This crate implements the client side: one [`Bridge`] per
//! websocket connection, address-keyed handler subscriptions, request/reply
//! correlation over single-use tokens, and a keepalive timer.
//!
//! # Quick start
//!
//! ```ignore
//! use eventbus_bridge::{Bridge, ConnectOptions, message_handler};
//!
//! let bridge = Bridge::connect(
//!     "ws://localhost:8765/eventbus".into(),
//!     |eb| {
//!         eb.register_handler("news.sports", message_handler(|msg| {
//!             println!("scores: {}", msg.body());
//!         }))
//!         .unwrap();
//!     },
//!     ConnectOptions::new(),
//! )
//! .await?;
//!
//! bridge.publish("news.sports", "kickoff in five")?;
//! ```
//!
//! # Model
//!
//! - All handler callbacks run synchronously on the connection's inbound
//!   task, strictly in frame arrival order.
//! - Outbound operations never block; frames are queued to a dedicated
//!   writer task.
//! - A closed bridge is terminal. There is no reconnection; every operation
//!   against it fails with [`BridgeError::Closed`].

mod bridge;
mod message;
mod replies;
mod writer;

pub mod envelope;
pub mod error;
pub mod handler;
pub mod target;

pub use bridge::{Bridge, BridgeState};
pub use envelope::{Envelope, FrameType};
pub use error::{BridgeError, Result};
pub use handler::{event_handler, message_handler, BridgeHandler};
pub use message::BridgeMessage;
pub use target::{ConnectOptions, ErrorCallback, Target};
