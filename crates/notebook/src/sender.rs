//! Outbound broadcaster: a single emitter task that decouples result
//! production from network emission.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::OutboundMessage;

/// Delivery failure for a single broadcast; never fatal to the emit loop.
#[derive(Debug, Error)]
#[error("broadcast delivery failed: {0}")]
pub struct EmitError(String);

impl EmitError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Fans one message out to every connected subscriber, best-effort.
#[async_trait]
pub trait Broadcast: Send + 'static {
    async fn emit(&mut self, message: &OutboundMessage) -> Result<(), EmitError>;
}

/// Cloneable handle to the emitter task's queue.
#[derive(Clone)]
pub struct OutboundSender {
    queue: mpsc::UnboundedSender<OutboundMessage>,
    cancel: CancellationToken,
    emitter: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Starts the emit loop over `transport`. The queue is unbounded on
/// purpose: output is never dropped while the bridge is running, and
/// producers never block. The cost is unchecked growth when no subscriber
/// keeps up, which is acceptable for an interactive session.
pub fn launch<B: Broadcast>(transport: B) -> OutboundSender {
    let (queue, messages) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let emitter = task::spawn(run_emitter(transport, messages, cancel.clone()));
    OutboundSender {
        queue,
        cancel,
        emitter: Arc::new(Mutex::new(Some(emitter))),
    }
}

impl OutboundSender {
    pub fn enqueue(&self, message: OutboundMessage) {
        if self.queue.send(message).is_err() {
            warn!("outbound queue is closed; dropping message");
        }
    }

    /// Stops the emit loop after any in-flight emit. Messages enqueued
    /// after this are dropped; stop upstream producers first.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.emitter.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn run_emitter<B: Broadcast>(
    mut transport: B,
    mut messages: mpsc::UnboundedReceiver<OutboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            incoming = messages.recv() => {
                let Some(message) = incoming else { break };
                if let Err(e) = transport.emit(&message).await {
                    warn!(error = %e, "message could not be delivered");
                }
            }
        }
    }
    debug!("outbound emitter stopped");
}
