#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use runnel_notebook::message::OutboundMessage;
use runnel_notebook::sender::{Broadcast, EmitError};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Transport double that hands every emitted message to the test.
pub struct ChannelBroadcast {
    delivered: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelBroadcast {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (delivered, inbox) = mpsc::unbounded_channel();
        (Self { delivered }, inbox)
    }
}

#[async_trait]
impl Broadcast for ChannelBroadcast {
    async fn emit(&mut self, message: &OutboundMessage) -> Result<(), EmitError> {
        self.delivered
            .send(message.clone())
            .map_err(|_| EmitError::new("test inbox closed"))
    }
}

/// Collects broadcast messages up to and including the stream terminator.
pub async fn collect_until_end(
    inbox: &mut mpsc::UnboundedReceiver<OutboundMessage>,
) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    loop {
        let message = timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("broadcast stream stalled")
            .expect("broadcast stream closed");
        let is_end = matches!(message, OutboundMessage::End);
        messages.push(message);
        if is_end {
            return messages;
        }
    }
}

/// Drains whatever has been delivered so far without waiting.
pub fn collect_available(
    inbox: &mut mpsc::UnboundedReceiver<OutboundMessage>,
) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = inbox.try_recv() {
        messages.push(message);
    }
    messages
}
