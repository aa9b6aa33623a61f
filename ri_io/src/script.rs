use std::path::{Path, PathBuf};
use std::process::Stdio;

use ri_core::Error;
use tokio::process::Command;
use tracing::info;

#[cfg(windows)]
const SCRIPT_NAME: &str = "reinstall.bat";
#[cfg(not(windows))]
const SCRIPT_NAME: &str = "reinstall.sh";

/// Where the reinstall script lives and how it gets launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLocation {
    pub dir: PathBuf,
    pub file_name: String,
    /// Program that runs the script, followed by its leading arguments.
    pub interpreter: Vec<String>,
}

impl ScriptLocation {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: SCRIPT_NAME.to_string(),
            interpreter: default_interpreter(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_interpreter<I, S>(mut self, interpreter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter = interpreter.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Copy the script in from an offline bundle when it is missing here.
    /// Returns whether a copy happened.
    pub async fn provision(&self, offline_dir: &Path) -> Result<bool, Error> {
        let target = self.path();
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(false);
        }

        let source = offline_dir.join(&self.file_name);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Config {
                message: format!("failed to create script directory {}: {e}", self.dir.display()),
            })?;
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| Error::Config {
                message: format!("failed to copy {}: {e}", source.display()),
            })?;

        info!(from = %source.display(), to = %target.display(), "provisioned reinstall script");
        Ok(true)
    }

    /// A missing script is reported before any process is created.
    pub(crate) fn command(&self, args: &[String]) -> Result<Command, Error> {
        let script = self.path();
        if !script.is_file() {
            return Err(Error::SpawnFailure {
                message: format!("reinstall script not found: {}", script.display()),
            });
        }

        let mut cmd = match self.interpreter.split_first() {
            Some((program, leading)) => {
                let mut cmd = Command::new(program);
                cmd.args(leading).arg(&script);
                cmd
            }
            None => Command::new(&script),
        };
        cmd.args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

#[cfg(windows)]
fn default_interpreter() -> Vec<String> {
    vec!["cmd".to_string(), "/C".to_string()]
}

#[cfg(not(windows))]
fn default_interpreter() -> Vec<String> {
    vec!["bash".to_string()]
}
