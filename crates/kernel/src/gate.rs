use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::{KernelError, Status};

/// Owner of every execution-state transition: the executor slot (one permit,
/// held while a submission is outstanding) and the kernel's self-reported
/// state. `try_begin`/`begin` are the only ways to start an execution.
pub struct ExecutionGate {
    slot: Arc<Semaphore>,
    kernel_state: watch::Sender<Status>,
}

/// Witness that one execution owns the control channel. Dropping it returns
/// the executor to idle on every path.
#[derive(Debug)]
pub struct ExecutionPermit {
    _slot: OwnedSemaphorePermit,
}

impl ExecutionGate {
    pub fn new() -> Self {
        let (kernel_state, _) = watch::channel(Status::Idle);
        Self {
            slot: Arc::new(Semaphore::new(1)),
            kernel_state,
        }
    }

    /// Claims the control channel, failing if a submission is outstanding.
    pub fn try_begin(&self) -> Result<ExecutionPermit, KernelError> {
        let slot = self
            .slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| KernelError::Busy)?;
        // Claim the kernel state up front so a drain task started right
        // after this call never observes a stale idle.
        self.kernel_state.send_replace(Status::Busy);
        Ok(ExecutionPermit { _slot: slot })
    }

    /// Waits until the previous execution has released the slot and the
    /// kernel has reported idle, then claims the channel.
    pub async fn begin(&self) -> ExecutionPermit {
        let slot = self
            .slot
            .clone()
            .acquire_owned()
            .await
            .expect("execution gate semaphore closed");
        self.wait_kernel_idle().await;
        self.kernel_state.send_replace(Status::Busy);
        ExecutionPermit { _slot: slot }
    }

    pub fn executor_state(&self) -> Status {
        if self.slot.available_permits() == 0 {
            Status::Busy
        } else {
            Status::Idle
        }
    }

    pub fn kernel_state(&self) -> Status {
        *self.kernel_state.borrow()
    }

    /// Records the kernel's self-reported execution state.
    pub fn record_kernel_state(&self, state: Status) {
        self.kernel_state.send_replace(state);
    }

    pub async fn wait_kernel_idle(&self) {
        let mut state = self.kernel_state.subscribe();
        let _ = state.wait_for(|state| *state == Status::Idle).await;
    }
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new()
    }
}
