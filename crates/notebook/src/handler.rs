//! Kernel execution bridge: serializes submissions against lifecycle
//! commands and drains the result stream to the broadcaster.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use runnel_kernel::{Kernel, KernelError, Status};

use crate::message::OutboundMessage;
use crate::sender::OutboundSender;

pub struct Handler<K: Kernel> {
    kernel: Arc<K>,
    sender: OutboundSender,
    skip: Mutex<CancellationToken>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl<K: Kernel> Handler<K> {
    pub fn new(kernel: Arc<K>, sender: OutboundSender) -> Self {
        Self {
            kernel,
            sender,
            skip: Mutex::new(CancellationToken::new()),
            drain: Mutex::new(None),
        }
    }

    /// Submits `code` once the previous execution has fully settled, then
    /// drains its result stream in the background. Callers that need
    /// completion wait on [`Handler::join_execution`].
    pub async fn execute(&self, code: String) {
        // The previous stream must have terminated before a new one starts,
        // or two drain tasks would race for the same queue.
        self.join_execution().await;

        let permit = self.kernel.begin_execution().await;
        debug!(bytes = code.len(), "execution slot claimed");

        let kernel = Arc::clone(&self.kernel);
        task::spawn(async move {
            if let Err(e) = kernel.submit_code(permit, &code).await {
                warn!(error = %e, "code submission failed");
            }
        });

        let skip = self.skip.lock().await.clone();
        let drain = task::spawn(drain_stream(
            Arc::clone(&self.kernel),
            self.sender.clone(),
            skip,
        ));
        *self.drain.lock().await = Some(drain);
    }

    /// Waits for the in-flight drain task, if any, to finish.
    pub async fn join_execution(&self) {
        let handle = self.drain.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub async fn restart(&self) -> Result<(), KernelError> {
        self.kernel.restart().await?;
        self.kernel.clear_results();
        self.sender.enqueue(OutboundMessage::Restarted);
        info!("kernel restarted");
        Ok(())
    }

    /// Idempotent: interrupting with nothing in flight only broadcasts.
    pub async fn interrupt(&self) -> Result<(), KernelError> {
        self.preempt().await?;
        self.sender.enqueue(OutboundMessage::Interrupted);
        Ok(())
    }

    /// Terminal; no further `execute` is valid afterwards.
    pub async fn shutdown(&self) -> Result<(), KernelError> {
        self.preempt().await?;
        self.kernel.shutdown().await?;
        self.sender.enqueue(OutboundMessage::ShutDown);
        info!("kernel disabled");
        Ok(())
    }

    /// Broadcasts the kernel's connection parameters tagged with the
    /// caller's correlation id.
    pub fn send_connection_info(&self, id: Option<i64>) {
        let info = self.kernel.connection_info();
        let content = serde_json::to_value(&info).expect("connection info serializes");
        self.sender.enqueue(OutboundMessage::ConnectionInfo { content, id });
        debug!("sent kernel connection info");
    }

    /// Common preemption sequence: stop the drain task before touching the
    /// kernel, then leave a fresh skip token behind.
    async fn preempt(&self) -> Result<(), KernelError> {
        self.skip.lock().await.cancel();
        self.kernel.interrupt().await?;
        self.join_execution().await;
        self.kernel.clear_results();
        *self.skip.lock().await = CancellationToken::new();
        Ok(())
    }
}

/// Forwards result records in arrival order until the kernel settles, then
/// terminates the stream. Records already dequeued when the skip token is
/// cancelled may still go out; nothing is forwarded after it is observed.
async fn drain_stream<K: Kernel>(kernel: Arc<K>, sender: OutboundSender, skip: CancellationToken) {
    loop {
        for record in kernel.drain_results() {
            if skip.is_cancelled() {
                return;
            }
            debug!(msg_type = %record.msg_type, "forwarding kernel result");
            sender.enqueue(OutboundMessage::update(record));
        }
        if kernel.execution_state() == Status::Idle {
            break;
        }
        tokio::select! {
            _ = skip.cancelled() => return,
            _ = kernel.wait_results() => {}
        }
    }
    sender.enqueue(OutboundMessage::End);
}
