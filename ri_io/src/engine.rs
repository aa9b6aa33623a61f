use std::path::{Path, PathBuf};

use ri_core::{Error, InstallRequest, OperationKey, ProgressRecord};
use tracing::info;

use crate::download::{DownloadResource, DownloadRun, DownloadSupervisor};
use crate::install::{InstallRun, InstallSupervisor};
use crate::library::{ImageLibrary, LocalImage};
use crate::script::ScriptLocation;
use crate::store::ProgressStore;

const DEFAULT_IMAGE_EXTENSION: &str = "vhd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub script: ScriptLocation,
    /// Bundle the script is copied from when it is missing.
    pub offline_dir: Option<PathBuf>,
    pub download_dir: PathBuf,
    pub image_extension: String,
    pub kill_on_stop: bool,
    pub user_agent: String,
}

impl EngineConfig {
    /// Lay everything out under one root directory.
    pub fn from_root(root: &Path) -> Self {
        Self {
            script: ScriptLocation::new(root.join("reinstall")),
            offline_dir: Some(root.join("offline")),
            download_dir: root.join("vhd"),
            image_extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            kill_on_stop: false,
            user_agent: concat!("ri/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Entry point tying installs, downloads and the local image library to
/// one progress store. Engines built separately share nothing.
pub struct Engine {
    store: ProgressStore,
    installer: InstallSupervisor,
    downloads: DownloadSupervisor,
    offline_dir: Option<PathBuf>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        let store = ProgressStore::new();
        let installer =
            InstallSupervisor::new(store.clone(), config.script).kill_on_stop(config.kill_on_stop);
        let library = ImageLibrary::new(config.download_dir, config.image_extension);
        let downloads = DownloadSupervisor::new(client, store.clone(), library);

        Ok(Self {
            store,
            installer,
            downloads,
            offline_dir: config.offline_dir,
        })
    }

    /// Bring the script in from the offline bundle and make sure the
    /// download directory exists.
    pub async fn prepare(&self) -> Result<(), Error> {
        if let Some(offline) = &self.offline_dir {
            self.installer.script().provision(offline).await?;
        }
        let dir = self.downloads.library().dir();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Config {
                message: format!("failed to create {}: {e}", dir.display()),
            })
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn start_install(&self, request: &InstallRequest) -> Result<InstallRun, Error> {
        self.installer.start(request)
    }

    pub fn stop_install(&self) -> Result<(), Error> {
        self.installer.stop()
    }

    pub fn install_progress(&self) -> ProgressRecord {
        self.installer.progress()
    }

    /// Whether an accepted stop also terminates the script.
    pub fn kills_on_stop(&self) -> bool {
        self.installer.kills_on_stop()
    }

    pub fn start_download(&self, resource: DownloadResource) -> Result<DownloadRun, Error> {
        self.downloads.start(resource)
    }

    pub fn download_progress(&self, name: &str) -> Option<ProgressRecord> {
        self.downloads.progress(name)
    }

    /// Write a library image to disk with `dd`, reusing the credentials and
    /// SSH port of `access`.
    pub fn install_local_image(
        &self,
        name: &str,
        access: &InstallRequest,
    ) -> Result<InstallRun, Error> {
        let path = self.downloads.library().path_of(name)?;
        if !path.is_file() {
            return Err(Error::NotFound {
                name: name.to_string(),
            });
        }
        info!(image = %path.display(), "installing local image");
        self.installer
            .start(&InstallRequest::from_local_image(&path, access))
    }

    pub fn local_images(&self) -> Result<Vec<LocalImage>, Error> {
        self.downloads.library().list()
    }

    /// Images still being downloaded cannot be deleted.
    pub fn delete_local_image(&self, name: &str) -> Result<(), Error> {
        let key = OperationKey::download(name);
        if self.downloads.is_running(&key) {
            return Err(Error::AlreadyRunning {
                key: key.to_string(),
            });
        }
        self.downloads.library().delete(name)?;
        info!(name, "deleted local image");
        Ok(())
    }
}
