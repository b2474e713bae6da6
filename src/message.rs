//! The message handed to handlers, with reply and self-unregistration.
//!
//! A [`BridgeMessage`] is built per handler per inbound frame. It carries a
//! cheap [`Bridge`] handle, so replying re-enters the ordinary outbound path
//! synchronously, and it captures the exact handler instance it was delivered
//! to, so [`BridgeMessage::unregister`] removes that instance rather than
//! whatever happens to be registered under the address by then.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::handler::BridgeHandler;

pub struct BridgeMessage {
    address: String,
    reply_address: Option<String>,
    body: Value,
    bridge: Bridge,
    delivered_to: Option<Arc<dyn BridgeHandler>>,
}

impl BridgeMessage {
    pub(crate) fn new(
        address: String,
        reply_address: Option<String>,
        body: Value,
        bridge: Bridge,
        delivered_to: Option<Arc<dyn BridgeHandler>>,
    ) -> Self {
        Self {
            address,
            reply_address,
            body,
            bridge,
            delivered_to,
        }
    }

    /// The address this message arrived on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The sender's one-shot reply token, if it expects a reply.
    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_deref()
    }

    /// The payload.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The payload as a string slice, when it is a JSON string.
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_str()
    }

    /// The connection this message arrived on.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Reply to the sender, fire-and-forget.
    ///
    /// Fails with [`BridgeError::NoReplyAddress`] when the sender did not
    /// attach a reply token.
    pub fn reply(&self, body: impl Into<Value>) -> Result<()> {
        let target = self.require_reply_address()?;
        self.bridge.send(target, body)?;
        Ok(())
    }

    /// Reply and await a counter-reply, extending the chain one hop.
    ///
    /// Each hop gets a fresh correlation token, so chains can nest to
    /// arbitrary depth.
    pub fn reply_with(
        &self,
        body: impl Into<Value>,
        handler: Arc<dyn BridgeHandler>,
    ) -> Result<()> {
        let target = self.require_reply_address()?.to_string();
        self.bridge.send_with_reply(&target, body, handler)?;
        Ok(())
    }

    /// Remove the handler this message was delivered to from its address.
    ///
    /// No-op for reply deliveries, which are one-shot and already consumed.
    pub fn unregister(&self) -> Result<()> {
        if let Some(handler) = &self.delivered_to {
            self.bridge.unregister_handler(&self.address, handler)?;
        }
        Ok(())
    }

    fn require_reply_address(&self) -> Result<&str> {
        self.reply_address.as_deref().ok_or(BridgeError::NoReplyAddress)
    }
}

impl fmt::Debug for BridgeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeMessage")
            .field("address", &self.address)
            .field("reply_address", &self.reply_address)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
