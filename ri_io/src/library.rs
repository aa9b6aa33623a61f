use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ri_core::Error;
use serde::Serialize;

/// Disk images kept on this machine, one `<name>.<extension>` file each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLibrary {
    dir: PathBuf,
    extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalImage {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub size: String,
}

impl ImageLibrary {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> Result<PathBuf, Error> {
        check_name(name)?;
        Ok(self.dir.join(format!("{name}.{}", self.extension)))
    }

    /// Images sorted by name. A missing directory just means no images yet.
    pub fn list(&self) -> Result<Vec<LocalImage>, Error> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::RuntimeFailure {
                    message: format!("failed to read {}: {e}", self.dir.display()),
                });
            }
        };

        let mut images = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            images.push(LocalImage {
                name: name.to_string(),
                size_bytes: meta.len(),
                size: format_gigabytes(meta.len()),
                path: path.clone(),
            });
        }

        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    pub fn delete(&self, name: &str) -> Result<(), Error> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(Error::RuntimeFailure {
                message: format!("failed to delete {}: {e}", path.display()),
            }),
        }
    }
}

fn check_name(name: &str) -> Result<(), Error> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidRequest {
            message: "image name is required".to_string(),
        });
    }
    if trimmed != name || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::InvalidRequest {
            message: format!("invalid image name '{name}'"),
        });
    }
    Ok(())
}

fn format_gigabytes(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}
