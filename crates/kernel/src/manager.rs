//! Kernel process control: owns the kernel process, the request/reply
//! control channel and the notification listener.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::config::{ConnectionInfo, KernelSettings};
use crate::gate::{ExecutionGate, ExecutionPermit};
use crate::queue::NotificationQueue;
use crate::wire::{self, Notification, WireError};
use crate::{Kernel, KernelError, ResultRecord, Status};

/// Dwell after an acknowledged submission so the listener observes the
/// trailing status flip before the next submission claims the channel.
const MIN_SUBMIT_DWELL: Duration = Duration::from_millis(50);

pub struct KernelManager {
    settings: KernelSettings,
    session: String,
    gate: Arc<ExecutionGate>,
    results: Arc<NotificationQueue>,
    control: Mutex<Option<ReqSocket>>,
    inner: Mutex<ManagerInner>,
    pid: AtomicU32,
    disabled: CancellationToken,
}

struct ManagerInner {
    process: Option<Child>,
    listener: Option<(CancellationToken, JoinHandle<()>)>,
}

impl KernelManager {
    /// Launches the kernel process against the configured fixed channel
    /// addresses and starts listening for notifications. Socket setup
    /// failure is fatal.
    pub async fn start(settings: KernelSettings) -> Result<Self, KernelError> {
        tokio::fs::create_dir_all(&settings.working_dir)
            .await
            .map_err(KernelError::Spawn)?;
        let contents =
            serde_json::to_vec_pretty(&settings.connection).map_err(WireError::Json)?;
        tokio::fs::write(settings.connection_file(), contents)
            .await
            .map_err(KernelError::Spawn)?;

        let manager = Self {
            session: Uuid::new_v4().to_string(),
            gate: Arc::new(ExecutionGate::new()),
            results: Arc::new(NotificationQueue::new()),
            control: Mutex::new(None),
            inner: Mutex::new(ManagerInner {
                process: None,
                listener: None,
            }),
            pid: AtomicU32::new(0),
            disabled: CancellationToken::new(),
            settings,
        };

        {
            let mut inner = manager.inner.lock().await;
            manager.spawn_process(&mut inner)?;
            manager.open_channels(&mut inner).await?;
        }
        info!(session = %manager.session, "kernel started");
        Ok(manager)
    }

    fn spawn_process(&self, inner: &mut ManagerInner) -> Result<(), KernelError> {
        let connection_file = self.settings.connection_file();
        let argv: Vec<String> = self
            .settings
            .command
            .iter()
            .map(|arg| arg.replace("{connection_file}", &connection_file.to_string_lossy()))
            .collect();
        let (program, args) = argv.split_first().ok_or_else(|| {
            KernelError::Spawn(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty kernel command",
            ))
        })?;

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.settings.working_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(KernelError::Spawn)?;
        self.pid.store(child.id().unwrap_or(0), Ordering::SeqCst);
        debug!(pid = self.pid.load(Ordering::SeqCst), "kernel process spawned");
        inner.process = Some(child);
        Ok(())
    }

    async fn open_channels(&self, inner: &mut ManagerInner) -> Result<(), KernelError> {
        let mut control = ReqSocket::new();
        control
            .connect(&self.settings.connection.shell_address())
            .await?;

        let mut notifications = SubSocket::new();
        notifications
            .connect(&self.settings.connection.iopub_address())
            .await?;
        notifications.subscribe("").await?;

        *self.control.lock().await = Some(control);

        let cancel = CancellationToken::new();
        let handle = task::spawn(listen(
            notifications,
            Arc::clone(&self.gate),
            Arc::clone(&self.results),
            cancel.clone(),
        ));
        inner.listener = Some((cancel, handle));
        Ok(())
    }

    async fn close_channels(&self, inner: &mut ManagerInner) {
        if let Some((cancel, handle)) = inner.listener.take() {
            cancel.cancel();
            let _ = handle.await;
        }
        *self.control.lock().await = None;
    }

    async fn kill_process(inner: &mut ManagerInner) {
        if let Some(mut child) = inner.process.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "kernel process kill failed");
            }
        }
    }

    fn signal_interrupt(&self) -> Result<(), KernelError> {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc != 0 {
                return Err(KernelError::Process(std::io::Error::last_os_error()));
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            warn!("kernel interrupt is not supported on this platform");
            Ok(())
        }
    }

    /// One request/reply exchange on the control channel. The socket mutex
    /// keeps lifecycle operations off the channel while a reply is pending.
    async fn roundtrip(&self, request: ZmqMessage) -> Result<Notification, KernelError> {
        let mut control = self.control.lock().await;
        let socket = control.as_mut().ok_or(KernelError::ShutDown)?;
        socket.send(request).await?;
        let reply = match self.settings.reply_timeout() {
            Some(limit) => timeout(limit, socket.recv())
                .await
                .map_err(|_| KernelError::ReplyTimeout(limit))??,
            None => socket.recv().await?,
        };
        Ok(wire::decode(reply)?)
    }

    /// Runs the configured baseline cells after a restart, discarding their
    /// output. The reply means each cell finished; status chatter missed on
    /// the fresh subscription must not leave the state stuck busy.
    async fn run_preload(&self) -> Result<(), KernelError> {
        for cell in &self.settings.preload_cells {
            debug!(cell = %cell, "preloading baseline cell");
            let permit = self.gate.begin().await;
            self.submit_code(permit, cell).await?;
            self.gate.record_kernel_state(Status::Idle);
            self.results.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl Kernel for KernelManager {
    async fn begin_execution(&self) -> ExecutionPermit {
        self.gate.begin().await
    }

    async fn submit_code(&self, permit: ExecutionPermit, code: &str) -> Result<(), KernelError> {
        if self.disabled.is_cancelled() {
            return Err(KernelError::ShutDown);
        }
        debug!(bytes = code.len(), "submitting code");
        let request = wire::execute_request(&self.session, code);
        match self.roundtrip(request).await {
            Ok(ack) => {
                debug!(msg_type = %ack.msg_type, "submission acknowledged");
                sleep(MIN_SUBMIT_DWELL).await;
                drop(permit);
                Ok(())
            }
            Err(e) => {
                // The kernel never took the work; roll back the busy claim
                // so the result stream can terminate.
                self.gate.record_kernel_state(Status::Idle);
                drop(permit);
                Err(e)
            }
        }
    }

    async fn restart(&self) -> Result<(), KernelError> {
        if self.disabled.is_cancelled() {
            return Err(KernelError::ShutDown);
        }
        info!("restarting kernel");
        // Hurry along any submission still waiting on its reply.
        if let Err(e) = self.signal_interrupt() {
            warn!(error = %e, "pre-restart interrupt failed");
        }
        let mut inner = self.inner.lock().await;
        self.close_channels(&mut inner).await;
        Self::kill_process(&mut inner).await;
        self.spawn_process(&mut inner)?;
        self.open_channels(&mut inner).await?;
        self.gate.record_kernel_state(Status::Idle);
        drop(inner);
        self.run_preload().await
    }

    async fn interrupt(&self) -> Result<(), KernelError> {
        if self.disabled.is_cancelled() {
            return Ok(());
        }
        info!("interrupting kernel");
        self.signal_interrupt()
    }

    async fn shutdown(&self) -> Result<(), KernelError> {
        if self.disabled.is_cancelled() {
            return Ok(());
        }
        self.disabled.cancel();
        info!("shutting down kernel");
        let mut inner = self.inner.lock().await;
        self.close_channels(&mut inner).await;
        Self::kill_process(&mut inner).await;
        Ok(())
    }

    fn drain_results(&self) -> Vec<ResultRecord> {
        let mut records = Vec::new();
        while let Some(notification) = self.results.pop() {
            if matches!(notification.msg_type.as_str(), "status" | "execute_input") {
                continue;
            }
            records.push(ResultRecord::from(notification));
        }
        records
    }

    fn clear_results(&self) {
        self.results.clear();
    }

    async fn wait_results(&self) {
        self.results.notified().await;
    }

    fn execution_state(&self) -> Status {
        self.gate.kernel_state()
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.settings.connection.clone()
    }
}

/// Exclusive owner of the notification socket. Status notifications are
/// folded into the gate; everything else is buffered for the drain.
async fn listen(
    mut socket: SubSocket,
    gate: Arc<ExecutionGate>,
    results: Arc<NotificationQueue>,
    cancel: CancellationToken,
) {
    loop {
        let incoming = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            incoming = socket.recv() => incoming,
        };
        let message = match incoming {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "notification channel receive failed");
                break;
            }
        };
        match wire::decode(message) {
            Ok(notification) if notification.msg_type == "status" => {
                match wire::execution_state(&notification) {
                    Some(state) => gate.record_kernel_state(state),
                    None => warn!("status notification without an execution state"),
                }
                results.wake();
            }
            Ok(notification) => {
                debug!(msg_type = %notification.msg_type, "kernel notification buffered");
                results.push(notification);
            }
            Err(e) => warn!(error = %e, "discarding malformed kernel notification"),
        }
    }
    debug!("notification listener stopped");
}
