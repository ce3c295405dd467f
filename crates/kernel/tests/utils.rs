#![allow(dead_code)]

use std::time::Duration;

use runnel_kernel::{Kernel, KernelSettings, ResultRecord, Status};
use tokio::time::{sleep, timeout};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runnel_kernel=debug".parse().expect("valid filter")),
        )
        .with(fmt::layer())
        .try_init();
}

/// Settings bound to a per-test port block so tests can run in parallel.
/// The spawned "kernel" is an inert process; the fake kernel in this test
/// suite serves the sockets instead.
pub fn test_settings(port_base: u16) -> KernelSettings {
    let mut settings = KernelSettings::default();
    settings.connection.ip = "127.0.0.1".to_string();
    settings.connection.shell_port = port_base;
    settings.connection.iopub_port = port_base + 1;
    settings.connection.stdin_port = port_base + 2;
    settings.connection.hb_port = port_base + 3;
    settings.connection.control_port = port_base + 4;
    settings.command = vec!["sleep".to_string(), "60".to_string()];
    settings.working_dir = std::env::temp_dir().join(format!("runnel-test-{port_base}"));
    settings.reply_timeout_ms = Some(5_000);
    settings
}

/// Drains until at least one record arrives or the deadline hits.
pub async fn drain_first_records<K: Kernel>(kernel: &K, limit: Duration) -> Vec<ResultRecord> {
    timeout(limit, async {
        loop {
            let records = kernel.drain_results();
            if !records.is_empty() {
                return records;
            }
            kernel.wait_results().await;
        }
    })
    .await
    .expect("no kernel results before the deadline")
}

pub async fn wait_execution_idle<K: Kernel>(kernel: &K, limit: Duration) {
    timeout(limit, async {
        while kernel.execution_state() != Status::Idle {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("kernel did not return to idle")
}
