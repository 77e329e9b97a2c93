use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use fleetops_core::ClientId;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the liveness endpoint to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Json { dir: PathBuf },
}

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Interval in seconds between health sweeps
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Side-effect free command used to probe a host
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
    /// Upper bound on probes running at the same time
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    /// Samples kept per device
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutorConfig {
    Ssh {
        /// ssh client binary
        #[serde(default = "default_ssh_program")]
        program: String,
        /// Connection plus command timeout in seconds
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        /// Helper used to feed passwords to ssh (reads `SSHPASS`)
        #[serde(default = "default_password_helper")]
        password_helper: String,
    },
    Mock {
        /// Addresses that behave as unreachable
        #[serde(default)]
        unreachable: Vec<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifierConfig {
    #[default]
    Log,
    Webhook {
        /// Mail relay endpoint accepting JSON messages
        url: String,
        /// Sender address
        from: String,
    },
}

/// Remote commands run by device actions.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_restart_command")]
    pub restart: String,
    #[serde(default = "default_shutdown_command")]
    pub shutdown: String,
    /// `{stamp}` is replaced with the current time
    #[serde(default = "default_fix_command")]
    pub fix: String,
    /// `{stamp}` is replaced with the current time
    #[serde(default = "default_alert_command")]
    pub alert: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub id: ClientId,
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_probe_command() -> String {
    "hostname".to_string()
}

fn default_max_concurrent_probes() -> usize {
    16
}

fn default_history_capacity() -> usize {
    1000
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_password_helper() -> String {
    "sshpass".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_restart_command() -> String {
    "sudo systemctl reboot".to_string()
}

fn default_shutdown_command() -> String {
    "sudo shutdown -h now".to_string()
}

fn default_fix_command() -> String {
    r#"echo "Fixed at $(date)" > /tmp/fixed_{stamp}.txt && echo "Fix file created: /tmp/fixed_{stamp}.txt""#
        .to_string()
}

fn default_alert_command() -> String {
    r#"echo "Alert created at $(date)" > /tmp/alert_{stamp}.txt"#.to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            probe_command: default_probe_command(),
            max_concurrent_probes: default_max_concurrent_probes(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            restart: default_restart_command(),
            shutdown: default_shutdown_command(),
            fix: default_fix_command(),
            alert: default_alert_command(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::Ssh {
            program: default_ssh_program(),
            timeout_secs: default_timeout_secs(),
            password_helper: default_password_helper(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                http_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            },
            storage: StorageConfig::Json {
                dir: PathBuf::from("data"),
            },
            monitor: MonitorConfig::default(),
            executor: ExecutorConfig::default(),
            notifier: NotifierConfig::default(),
            actions: ActionsConfig::default(),
            clients: Vec::new(),
        }
    }
}
