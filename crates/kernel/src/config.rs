use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel endpoints for the kernel. Ports are fixed so a restarted kernel
/// rebinds to the same addresses; this is also what gets written to the
/// connection file the kernel process reads at launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_shell_port")]
    pub shell_port: u16,
    #[serde(default = "default_iopub_port")]
    pub iopub_port: u16,
    #[serde(default = "default_stdin_port")]
    pub stdin_port: u16,
    #[serde(default = "default_hb_port")]
    pub hb_port: u16,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Empty key disables message signing.
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,
}

impl ConnectionInfo {
    pub fn shell_address(&self) -> String {
        format!("{}://{}:{}", self.transport, self.ip, self.shell_port)
    }

    pub fn iopub_address(&self) -> String {
        format!("{}://{}:{}", self.transport, self.ip, self.iopub_port)
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            ip: default_ip(),
            shell_port: default_shell_port(),
            iopub_port: default_iopub_port(),
            stdin_port: default_stdin_port(),
            hb_port: default_hb_port(),
            control_port: default_control_port(),
            key: String::new(),
            signature_scheme: default_signature_scheme(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSettings {
    #[serde(default)]
    pub connection: ConnectionInfo,
    /// Kernel launch argv; `{connection_file}` is substituted before spawn.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Working directory of the kernel process, created if missing.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Bound on the control-channel reply wait. `None` blocks until the
    /// kernel acknowledges; an interrupt unblocks a long execution.
    #[serde(default)]
    pub reply_timeout_ms: Option<u64>,
    /// Cells executed after every restart, output discarded.
    #[serde(default)]
    pub preload_cells: Vec<String>,
}

impl KernelSettings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    pub fn connection_file(&self) -> PathBuf {
        self.working_dir.join("kernel-connection.json")
    }
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionInfo::default(),
            command: default_command(),
            working_dir: default_working_dir(),
            reply_timeout_ms: None,
            preload_cells: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_shell_port() -> u16 {
    4023
}

fn default_iopub_port() -> u16 {
    4024
}

fn default_stdin_port() -> u16 {
    4025
}

fn default_hb_port() -> u16 {
    4026
}

fn default_control_port() -> u16 {
    4027
}

fn default_signature_scheme() -> String {
    "hmac-sha256".to_string()
}

fn default_command() -> Vec<String> {
    ["python3", "-m", "ipykernel_launcher", "-f", "{connection_file}"]
        .map(str::to_string)
        .to_vec()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/user")
}
