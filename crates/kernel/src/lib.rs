pub mod config;
pub mod gate;
pub mod manager;
pub mod queue;
pub mod wire;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use config::{ConnectionInfo, KernelSettings};
pub use gate::{ExecutionGate, ExecutionPermit};
pub use manager::KernelManager;

/// Execution state, either self-reported by the kernel or claimed by the
/// executor while a submission is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Busy,
}

/// One translated output event from the kernel, ready for broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub content: Value,
    pub msg_type: String,
}

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("an execution is already outstanding")]
    Busy,
    #[error("kernel has been shut down")]
    ShutDown,
    #[error("kernel process spawn failed: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("kernel process control failed: {0}")]
    Process(#[source] std::io::Error),
    #[error("kernel channel failure: {0}")]
    Channel(#[from] zeromq::ZmqError),
    #[error("malformed kernel message: {0}")]
    Wire(#[from] wire::WireError),
    #[error("kernel did not acknowledge the request within {0:?}")]
    ReplyTimeout(std::time::Duration),
}

/// The kernel as the execution bridge sees it: a control channel to claim
/// and submit on, lifecycle controls, and the drained notification stream.
#[async_trait]
pub trait Kernel: Send + Sync + 'static {
    /// Waits for the previous execution to fully settle, then claims the
    /// control channel for a new submission.
    async fn begin_execution(&self) -> ExecutionPermit;

    /// Submits `code` and blocks for the kernel's acknowledgement. The
    /// permit is released on every path, success or failure.
    async fn submit_code(&self, permit: ExecutionPermit, code: &str) -> Result<(), KernelError>;

    async fn restart(&self) -> Result<(), KernelError>;
    async fn interrupt(&self) -> Result<(), KernelError>;
    async fn shutdown(&self) -> Result<(), KernelError>;

    /// Non-blocking: pops every buffered notification, skipping pure
    /// status/echo categories, preserving arrival order.
    fn drain_results(&self) -> Vec<ResultRecord>;

    fn clear_results(&self);

    /// Resolves when new notifications may be available to drain.
    async fn wait_results(&self);

    /// The kernel's self-reported execution state.
    fn execution_state(&self) -> Status;

    fn connection_info(&self) -> ConnectionInfo;
}
