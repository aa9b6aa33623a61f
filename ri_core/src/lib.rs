pub mod classify;
pub mod error;
pub mod progress;
pub mod request;
pub mod transfer;

pub use classify::{OutputClassifier, PhaseRule, PhaseUpdate};
pub use error::Error;
pub use progress::{OperationKey, OperationKind, ProgressRecord, Status};
pub use request::{InstallPlan, InstallRequest, InstallTarget, OsType, redact_args};
pub use transfer::TransferMeter;
