//! External-facing command router: decodes inbound envelopes from the
//! transport and invokes bridge operations.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use runnel_kernel::Kernel;

use crate::handler::Handler;
use crate::message::OutboundMessage;
use crate::sender::OutboundSender;

/// Inbound command envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Restart,
    Shutdown,
    Interrupt,
    Execute { code: String },
    /// Shutdown plus disconnect of the issuing client.
    Exit,
    JupyterConnectionInfo { id: Option<i64> },
}

/// What the transport should do with the connection after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Disconnect,
}

pub struct Messenger<K: Kernel> {
    handler: Handler<K>,
    sender: OutboundSender,
}

impl<K: Kernel> Messenger<K> {
    pub fn new(handler: Handler<K>, sender: OutboundSender) -> Self {
        Self { handler, sender }
    }

    /// Decodes one inbound envelope and runs it. Malformed commands are
    /// logged and ignored; every recognized command is acknowledged once
    /// its bridge call returns.
    pub async fn dispatch(&self, envelope: Value) -> Disposition {
        let command = match Command::deserialize(&envelope) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "ignoring malformed command");
                return Disposition::Continue;
            }
        };

        info!(?command, "dispatching command");
        let mut disposition = Disposition::Continue;
        match command {
            Command::Restart => {
                if let Err(e) = self.handler.restart().await {
                    warn!(error = %e, "restart failed");
                }
            }
            Command::Shutdown => {
                if let Err(e) = self.handler.shutdown().await {
                    warn!(error = %e, "shutdown failed");
                }
            }
            Command::Interrupt => {
                if let Err(e) = self.handler.interrupt().await {
                    warn!(error = %e, "interrupt failed");
                }
            }
            Command::Execute { code } => {
                self.sender
                    .enqueue(OutboundMessage::echo(format_input_prompt(&code)));
                self.handler.execute(code).await;
            }
            Command::Exit => {
                if let Err(e) = self.handler.shutdown().await {
                    warn!(error = %e, "shutdown failed");
                }
                disposition = Disposition::Disconnect;
            }
            Command::JupyterConnectionInfo { id } => self.handler.send_connection_info(id),
        }
        // Acceptance acknowledgement: lifecycle commands have completed by
        // now; an execute has been accepted and terminates its own stream
        // with a `notebook-end`.
        self.sender.enqueue(OutboundMessage::ack());
        disposition
    }
}

/// Formats submitted code the way an interactive prompt would echo it.
fn format_input_prompt(code: &str) -> String {
    let mut lines = code.lines();
    let mut formatted = format!(">>> {}", lines.next().unwrap_or_default());
    for line in lines {
        formatted.push_str("\n... ");
        formatted.push_str(line);
    }
    formatted
}
