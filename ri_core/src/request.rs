use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
    Dd,
}

impl FromStr for OsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "linux" => Ok(OsType::Linux),
            "windows" => Ok(OsType::Windows),
            "dd" => Ok(OsType::Dd),
            "" => Err(Error::InvalidRequest {
                message: "os type is required".to_string(),
            }),
            other => Err(Error::InvalidRequest {
                message: format!("unsupported os type '{other}'"),
            }),
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsType::Linux => write!(f, "linux"),
            OsType::Windows => write!(f, "windows"),
            OsType::Dd => write!(f, "dd"),
        }
    }
}

/// An install request as it arrives from a caller. Nothing here is trusted
/// until [`InstallRequest::validate`] turns it into an [`InstallPlan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallRequest {
    pub os_type: String,
    pub system: String,
    pub version: String,
    pub password: String,
    pub ssh_key: String,
    pub ssh_port: u16,
    pub web_port: u16,
    pub image_url: String,
    pub iso_url: String,
    pub image_name: String,
    pub language: String,
    pub minimal: bool,
    pub allow_ping: bool,
    pub rdp_port: u16,
    pub drivers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallTarget {
    Linux {
        system: String,
        version: Option<String>,
        ssh_key: Option<String>,
        web_port: Option<u16>,
        minimal: bool,
    },
    Windows {
        image_name: Option<String>,
        iso_url: Option<String>,
        language: Option<String>,
        rdp_port: Option<u16>,
        allow_ping: bool,
        drivers: Vec<String>,
    },
    Dd {
        image_url: String,
        ssh_key: Option<String>,
    },
}

/// A validated request, ready to be turned into script arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub target: InstallTarget,
    pub password: Option<String>,
    pub ssh_port: Option<u16>,
}

const SECRET_FLAGS: [&str; 2] = ["--password", "--ssh-key"];

fn text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Credentials go to the script byte for byte; only an empty value is dropped.
fn secret(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn port(value: u16) -> Option<u16> {
    (value > 0).then_some(value)
}

impl InstallRequest {
    /// A `dd` request that writes a disk image already on this machine,
    /// carrying over credentials and the SSH port from `access`.
    pub fn from_local_image(image: &Path, access: &InstallRequest) -> Self {
        Self {
            os_type: OsType::Dd.to_string(),
            image_url: format!("file://{}", image.display()),
            password: access.password.clone(),
            ssh_key: access.ssh_key.clone(),
            ssh_port: access.ssh_port,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<InstallPlan, Error> {
        let os_type: OsType = self.os_type.parse()?;

        let target = match os_type {
            OsType::Linux => InstallTarget::Linux {
                system: text(&self.system).ok_or_else(|| Error::InvalidRequest {
                    message: "linux installs require a system name".to_string(),
                })?,
                version: text(&self.version),
                ssh_key: secret(&self.ssh_key),
                web_port: port(self.web_port),
                minimal: self.minimal,
            },
            OsType::Windows => {
                let image_name = text(&self.image_name);
                let iso_url = text(&self.iso_url);
                if image_name.is_none() && iso_url.is_none() {
                    return Err(Error::InvalidRequest {
                        message: "windows installs require an image name or an ISO URL"
                            .to_string(),
                    });
                }
                InstallTarget::Windows {
                    image_name,
                    iso_url,
                    language: text(&self.language),
                    rdp_port: port(self.rdp_port),
                    allow_ping: self.allow_ping,
                    drivers: self.drivers.iter().filter_map(|d| text(d)).collect(),
                }
            }
            OsType::Dd => InstallTarget::Dd {
                image_url: text(&self.image_url).ok_or_else(|| Error::InvalidRequest {
                    message: "dd installs require an image URL".to_string(),
                })?,
                ssh_key: secret(&self.ssh_key),
            },
        };

        Ok(InstallPlan {
            target,
            password: secret(&self.password),
            ssh_port: port(self.ssh_port),
        })
    }
}

impl InstallPlan {
    pub fn os_type(&self) -> OsType {
        match self.target {
            InstallTarget::Linux { .. } => OsType::Linux,
            InstallTarget::Windows { .. } => OsType::Windows,
            InstallTarget::Dd { .. } => OsType::Dd,
        }
    }

    /// Arguments for the reinstall script. The order is fixed per target so
    /// the same plan always produces the same vector.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        match &self.target {
            InstallTarget::Linux {
                system,
                version,
                ssh_key,
                web_port,
                minimal,
            } => {
                args.push(system.clone());
                if let Some(version) = version {
                    args.push(version.clone());
                }
                self.push_password(&mut args);
                push_flag(&mut args, "--ssh-key", ssh_key.as_deref());
                self.push_ssh_port(&mut args);
                if let Some(web_port) = web_port {
                    push_flag(&mut args, "--web-port", Some(&web_port.to_string()));
                }
                if *minimal {
                    args.push("--minimal".to_string());
                }
            }
            InstallTarget::Windows {
                image_name,
                iso_url,
                language,
                rdp_port,
                allow_ping,
                drivers,
            } => {
                args.push("windows".to_string());
                push_flag(&mut args, "--image-name", image_name.as_deref());
                push_flag(&mut args, "--iso", iso_url.as_deref());
                push_flag(&mut args, "--lang", language.as_deref());
                self.push_password(&mut args);
                self.push_ssh_port(&mut args);
                if let Some(rdp_port) = rdp_port {
                    push_flag(&mut args, "--rdp-port", Some(&rdp_port.to_string()));
                }
                if *allow_ping {
                    args.push("--allow-ping".to_string());
                }
                for driver in drivers {
                    push_flag(&mut args, "--add-driver", Some(driver));
                }
            }
            InstallTarget::Dd { image_url, ssh_key } => {
                args.push("dd".to_string());
                push_flag(&mut args, "--img", Some(image_url));
                self.push_password(&mut args);
                push_flag(&mut args, "--ssh-key", ssh_key.as_deref());
                self.push_ssh_port(&mut args);
            }
        }

        args
    }

    fn push_password(&self, args: &mut Vec<String>) {
        push_flag(args, "--password", self.password.as_deref());
    }

    fn push_ssh_port(&self, args: &mut Vec<String>) {
        if let Some(ssh_port) = self.ssh_port {
            push_flag(args, "--ssh-port", Some(&ssh_port.to_string()));
        }
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Copy of `args` safe to log: values that follow a credential flag are replaced.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            redacted.push("***".to_string());
            hide_next = false;
            continue;
        }
        hide_next = SECRET_FLAGS.contains(&arg.as_str());
        redacted.push(arg.clone());
    }
    redacted
}
