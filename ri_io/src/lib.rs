pub mod cancel;
pub mod download;
pub mod engine;
pub mod install;
pub mod library;
pub mod script;
pub mod store;

pub use cancel::{CancelListener, CancellationGate};
pub use download::{DownloadResource, DownloadRun, DownloadSupervisor};
pub use engine::{Engine, EngineConfig};
pub use install::{InstallRun, InstallSupervisor};
pub use library::{ImageLibrary, LocalImage};
pub use script::ScriptLocation;
pub use store::{ProgressHandle, ProgressStore};
