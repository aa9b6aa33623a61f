use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Rejected before any side effect happened.
    InvalidRequest { message: String },
    AlreadyRunning { key: String },
    AlreadyExists { path: String },
    NothingRunning,
    CancelRejected { reason: String },
    /// The external script could not be started.
    SpawnFailure { message: String },
    /// The script exited unsuccessfully, or a transfer failed midway.
    RuntimeFailure { message: String },
    NotFound { name: String },
    Config { message: String },
}

impl Error {
    /// Errors that only ever reach a caller through a terminal `error` record.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            Error::SpawnFailure { .. } | Error::RuntimeFailure { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRequest { message } => write!(f, "invalid request: {message}"),
            Error::AlreadyRunning { key } => write!(f, "operation '{key}' is already running"),
            Error::AlreadyExists { path } => write!(f, "file already exists: {path}"),
            Error::NothingRunning => write!(f, "no installation is running"),
            Error::CancelRejected { reason } => write!(f, "cannot stop installation: {reason}"),
            Error::SpawnFailure { message } => write!(f, "failed to start script: {message}"),
            Error::RuntimeFailure { message } => write!(f, "{message}"),
            Error::NotFound { name } => write!(f, "image '{name}' not found"),
            Error::Config { message } => write!(f, "configuration error: {message}"),
        }
    }
}

impl std::error::Error for Error {}
