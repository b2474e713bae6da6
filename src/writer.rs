//! Dedicated writer task for the outbound half of the websocket.
//!
//! All outbound frames funnel through an unbounded mpsc channel into one
//! task that owns the sink half of the stream:
//!
//! ```text
//! send/publish ─┐
//! registry     ─┼─► WriterHandle ─► writer task ─► websocket sink
//! keepalive    ─┘
//! ```
//!
//! The channel keeps every producer synchronous and non-blocking, which is
//! what lets handlers re-enter the outbound path while the inbound dispatch
//! that invoked them is still on the stack. Envelopes are serialized and
//! size-checked at the call site so codec and limit errors surface to the
//! caller, not inside the task.

use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::envelope::Envelope;
use crate::error::{BridgeError, Result};

/// Commands accepted by the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A serialized envelope to send as one text frame.
    Frame(String),
    /// Send a websocket close frame and stop.
    Close,
}

/// Cheaply cloneable handle for queueing outbound frames.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    max_frame_size: usize,
}

impl WriterHandle {
    /// Serialize an envelope and queue it for transmission.
    ///
    /// Fails fast with [`BridgeError::Closed`] once the writer task is gone
    /// and with [`BridgeError::FrameTooLarge`] past the transport limit.
    pub fn frame(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.to_json()?;
        if text.len() > self.max_frame_size {
            return Err(BridgeError::FrameTooLarge {
                size: text.len(),
                limit: self.max_frame_size,
            });
        }
        self.tx
            .send(Outbound::Frame(text))
            .map_err(|_| BridgeError::Closed)
    }

    /// Ask the writer task to close the websocket. Best effort.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Create a writer handle and its receiving end without spawning a task.
pub(crate) fn channel(max_frame_size: usize) -> (WriterHandle, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        WriterHandle {
            tx,
            max_frame_size,
        },
        rx,
    )
}

/// Spawn the writer task over the sink half of a websocket stream.
pub(crate) fn spawn_writer_task<S>(
    sink: SplitSink<S, WsMessage>,
    max_frame_size: usize,
) -> (WriterHandle, JoinHandle<()>)
where
    S: futures::Sink<WsMessage, Error = WsError> + Send + 'static,
{
    let (handle, rx) = channel(max_frame_size);
    let task = tokio::spawn(writer_loop(sink, rx));
    (handle, task)
}

async fn writer_loop<S>(mut sink: SplitSink<S, WsMessage>, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: futures::Sink<WsMessage, Error = WsError>,
{
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Outbound::Frame(text) => {
                if let Err(err) = sink.send(WsMessage::text(text)).await {
                    tracing::debug!("writer stopping: {err}");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    // Also reached when every handle is dropped; finish the close handshake
    // so the peer is not left with a half-open connection.
    let _ = sink.close().await;
}
