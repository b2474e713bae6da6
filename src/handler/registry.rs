//! Handler registry - maps addresses to ordered handler lists.
//!
//! The registry ref-counts registrations per address to decide when the peer
//! needs to hear about them: a `register` frame goes out exactly once when an
//! address goes from zero to one handlers, an `unregister` frame exactly once
//! when it goes back to zero. Both decisions happen under the registry lock
//! so concurrent callers cannot double-emit.
//!
//! Handlers are identified by `Arc` pointer, not by structure: registering
//! two identical closures yields two entries and two deliveries per frame.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::handler::BridgeHandler;
use crate::writer::WriterHandle;

pub(crate) struct HandlerRegistry {
    entries: Mutex<HashMap<String, Vec<Arc<dyn BridgeHandler>>>>,
    writer: WriterHandle,
}

impl HandlerRegistry {
    pub fn new(writer: WriterHandle) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            writer,
        }
    }

    /// Append a handler to an address, emitting a `register` frame if this is
    /// the first one. On a failed emit nothing is registered.
    pub fn register(&self, address: &str, handler: Arc<dyn BridgeHandler>) -> Result<()> {
        let mut entries = self.entries.lock();
        let list = entries.entry(address.to_string()).or_default();
        if list.is_empty() {
            // Emitted while the lock is held: a concurrent register for the
            // same address cannot observe the non-empty list before the
            // frame is queued, and the writer channel preserves order.
            self.writer.frame(&Envelope::register(address))?;
        }
        list.push(handler);
        Ok(())
    }

    /// Remove the first pointer-equal registration of `handler` under
    /// `address`, emitting an `unregister` frame if the list became empty.
    /// Unknown handlers and addresses are ignored.
    pub fn unregister(&self, address: &str, handler: &Arc<dyn BridgeHandler>) -> Result<()> {
        let mut entries = self.entries.lock();
        let Some(list) = entries.get_mut(address) else {
            return Ok(());
        };
        let Some(pos) = list.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return Ok(());
        };
        list.remove(pos);
        if list.is_empty() {
            entries.remove(address);
            self.writer.frame(&Envelope::unregister(address))?;
        }
        Ok(())
    }

    /// Point-in-time copy of the handler list for an address.
    ///
    /// The dispatcher iterates this snapshot, never the live list, so a
    /// handler unregistering itself or a sibling mid-delivery cannot corrupt
    /// or skip the current pass.
    pub fn snapshot(&self, address: &str) -> Vec<Arc<dyn BridgeHandler>> {
        self.entries.lock().get(address).cloned().unwrap_or_default()
    }

    /// Number of handlers currently registered under an address.
    pub fn count(&self, address: &str) -> usize {
        self.entries.lock().get(address).map_or(0, Vec::len)
    }

    /// Number of addresses with at least one handler.
    pub fn address_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop every registration without emitting unregister frames.
    /// Used on connection teardown.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
