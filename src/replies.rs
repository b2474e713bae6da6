//! Reply correlator - single-use tokens mapped to one-shot reply handlers.
//!
//! Tokens are random UUIDs drawn from the same namespace as subscription
//! addresses; the dispatcher checks both mechanisms for every inbound frame.
//! A mapping is inserted *before* its request frame is handed to the writer
//! (a reply can never race ahead of its own registration) and consumed
//! atomically on the first matching frame. There is no per-request timeout;
//! a reply that never arrives stays resident until the connection closes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::handler::BridgeHandler;

pub(crate) struct ReplyCorrelator {
    pending: Mutex<HashMap<String, Arc<dyn BridgeHandler>>>,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a one-shot handler and return its fresh correlation token.
    pub fn insert(&self, handler: Arc<dyn BridgeHandler>) -> String {
        let token = Uuid::new_v4().to_string();
        self.pending.lock().insert(token.clone(), handler);
        token
    }

    /// Atomically remove and return the handler for a token, if any.
    /// A second call with the same token always returns `None`.
    pub fn take(&self, address: &str) -> Option<Arc<dyn BridgeHandler>> {
        self.pending.lock().remove(address)
    }

    /// Number of replies still awaited.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every pending mapping without invoking anything.
    /// Used on connection teardown.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}
