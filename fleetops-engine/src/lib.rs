pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod ticketing;
pub mod uptime;

pub use config::{
    ActionsConfig, ClientConfig, Config, DeviceConfig, ExecutorConfig, MonitorConfig,
    NotifierConfig, ServerConfig, StorageConfig,
};
pub use engine::{CancelOutcome, DEFAULT_UPTIME_HOURS, DeviceAction, EngineOptions, FleetEngine};
pub use error::EngineError;
pub use executor::mock::MockExecutor;
pub use executor::ssh::SshExecutor;
pub use executor::{CommandOutcome, RemoteExecutor, RemoteTarget};
pub use ledger::UpdateRequest;
pub use notify::webhook::WebhookNotifier;
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use registry::{Client, Device, DeviceRegistry};
pub use report::UpdateReport;
pub use storage::json::JsonFileStore;
pub use storage::memory::MemoryStore;
pub use storage::{DocumentStore, StorageError};
