use fleetops_core::{ClientId, UpdateId, UpdateStatus};

/// Errors reported to callers of the engine.
///
/// Failures while talking to hosts, persisting documents or sending
/// notifications never surface here; they are recorded and logged instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid schedule time '{value}': {reason}")]
    InvalidScheduleTime { value: String, reason: String },

    #[error("client {0} not found")]
    ClientNotFound(ClientId),

    #[error("device '{device}' not found for client {client_id}")]
    DeviceNotFound { client_id: ClientId, device: String },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("update {0} not found")]
    UpdateNotFound(UpdateId),

    #[error("update {id} cannot run from status {status}")]
    NotRunnable { id: UpdateId, status: UpdateStatus },

    #[error("invalid report range '{0}'")]
    InvalidRange(String),

    #[error("update dispatcher is already running")]
    DispatcherRunning,
}
