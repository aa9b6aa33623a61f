use serde::{Deserialize, Serialize};
use std::fmt;

/// Which lifecycle a record belongs to. Only affects the labels shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Install,
    Download,
}

/// Canonical lifecycle state shared by installs and downloads.
///
/// | canonical   | install   | download      |
/// |-------------|-----------|---------------|
/// | `Ready`     | `ready`   | `ready`       |
/// | `Running`   | `running` | `downloading` |
/// | `Paused`    | -         | `paused`      |
/// | `Succeeded` | `success` | `completed`   |
/// | `Failed`    | `error`   | `error`       |
/// | `Stopped`   | `stopped` | `stopped`     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ready,
    Running,
    /// Reserved for resumable downloads; nothing produces it yet.
    Paused,
    Succeeded,
    Failed,
    Stopped,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::Stopped)
    }

    pub fn label(self, kind: OperationKind) -> &'static str {
        match (self, kind) {
            (Status::Ready, _) => "ready",
            (Status::Running, OperationKind::Install) => "running",
            (Status::Running, OperationKind::Download) => "downloading",
            (Status::Paused, _) => "paused",
            (Status::Succeeded, OperationKind::Install) => "success",
            (Status::Succeeded, OperationKind::Download) => "completed",
            (Status::Failed, _) => "error",
            (Status::Stopped, _) => "stopped",
        }
    }

    /// Accepts either vocabulary.
    pub fn from_label(label: &str) -> Option<Status> {
        match label {
            "ready" => Some(Status::Ready),
            "running" | "downloading" => Some(Status::Running),
            "paused" => Some(Status::Paused),
            "success" | "completed" => Some(Status::Succeeded),
            "error" => Some(Status::Failed),
            "stopped" => Some(Status::Stopped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKey {
    /// At most one install runs at a time, so it has a single key.
    Install,
    Download(String),
}

impl OperationKey {
    pub fn download(name: impl Into<String>) -> Self {
        OperationKey::Download(name.into())
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OperationKey::Install => OperationKind::Install,
            OperationKey::Download(_) => OperationKind::Download,
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKey::Install => write!(f, "install"),
            OperationKey::Download(name) => write!(f, "download:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub percentage: u8,
    pub message: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

impl ProgressRecord {
    pub fn ready() -> Self {
        Self {
            percentage: 0,
            message: "ready".to_string(),
            status: Status::Ready,
            speed: None,
            eta: None,
        }
    }

    /// A fresh record for an operation that has just begun.
    pub fn started(message: impl Into<String>) -> Self {
        Self {
            percentage: 0,
            message: message.into(),
            status: Status::Running,
            speed: None,
            eta: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self::ready()
    }
}
