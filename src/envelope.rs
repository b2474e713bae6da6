//! Envelope codec - builds and parses the JSON wire frames.
//!
//! One envelope per websocket text frame. Outbound frames are always one of
//! `register`/`unregister`/`send`/`publish`/`ping`; the peer additionally
//! sends `rec` for deliveries and `err` for rejected operations. Envelopes
//! are immutable once built and constructed fresh per send.
//!
//! # Example
//!
//! ```
//! use eventbus_bridge::envelope::{Envelope, FrameType};
//!
//! let env = Envelope::register("news.sports");
//! let json = env.to_json().unwrap();
//! assert_eq!(json, r#"{"type":"register","address":"news.sports"}"#);
//!
//! let parsed = Envelope::from_json(&json).unwrap();
//! assert_eq!(parsed.frame_type, FrameType::Register);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Frame kind carried in the `type` field.
///
/// The dispatcher only branches on [`FrameType::Err`]; every other inbound
/// frame is routed by address regardless of its tag, which is what keeps the
/// codec compatible with bridge servers that tag deliveries differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Subscribe the connection to an address.
    Register,
    /// Drop the connection's subscription to an address.
    Unregister,
    /// Point-to-point message.
    Send,
    /// Broadcast message.
    Publish,
    /// Keepalive.
    Ping,
    /// Peer-reported protocol failure.
    Err,
    /// Delivery from the peer to a registered address.
    Rec,
    /// Any tag this engine does not know; still routed by address.
    #[serde(other)]
    Other,
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame kind.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Target or subscription address.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    /// Payload; string or arbitrary JSON value.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<Value>,
    /// One-shot correlation token for request/reply.
    #[serde(rename = "replyAddress", skip_serializing_if = "Option::is_none", default)]
    pub reply_address: Option<String>,
}

impl Envelope {
    /// Build a `register` frame for an address.
    pub fn register(address: &str) -> Self {
        Self {
            frame_type: FrameType::Register,
            address: Some(address.to_string()),
            body: None,
            reply_address: None,
        }
    }

    /// Build an `unregister` frame for an address.
    pub fn unregister(address: &str) -> Self {
        Self {
            frame_type: FrameType::Unregister,
            address: Some(address.to_string()),
            body: None,
            reply_address: None,
        }
    }

    /// Build a keepalive frame.
    pub fn ping() -> Self {
        Self {
            frame_type: FrameType::Ping,
            address: None,
            body: None,
            reply_address: None,
        }
    }

    /// Build a `send` or `publish` frame.
    pub fn message(
        frame_type: FrameType,
        address: &str,
        body: Value,
        reply_address: Option<String>,
    ) -> Self {
        Self {
            frame_type,
            address: Some(address.to_string()),
            body: Some(body),
            reply_address,
        }
    }

    /// Whether this is a peer-reported error frame.
    #[inline]
    pub fn is_err(&self) -> bool {
        self.frame_type == FrameType::Err
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a frame from its wire representation.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
