use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use console::style;
use ri_core::{Error, InstallRequest};
use ri_io::{DownloadResource, Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ri")]
#[command(version)]
#[command(about = "Reinstall this machine's operating system and manage local disk images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base directory for the script, offline bundle and images
    #[arg(long, env = "RI_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Directory holding the reinstall script (default: <root>/reinstall)
    #[arg(long, env = "RI_SCRIPT_DIR", global = true)]
    script_dir: Option<PathBuf>,

    /// Offline bundle to copy a missing script from (default: <root>/offline)
    #[arg(long, env = "RI_OFFLINE_DIR", global = true)]
    offline_dir: Option<PathBuf>,

    /// Where downloaded images are stored (default: <root>/vhd)
    #[arg(long, env = "RI_DOWNLOAD_DIR", global = true)]
    download_dir: Option<PathBuf>,

    /// Program used to run the script, e.g. "bash" or "cmd /C"
    #[arg(long, env = "RI_INTERPRETER", global = true)]
    interpreter: Option<String>,

    /// Terminate the script when an install is stopped
    #[arg(long, env = "RI_KILL_ON_STOP", global = true)]
    kill_on_stop: bool,

    /// Log debug output, including every line the script prints
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reinstall the operating system
    Install(InstallArgs),

    /// Write a downloaded image to disk
    InstallImage {
        name: String,

        #[command(flatten)]
        access: AccessArgs,
    },

    /// Download an image into the local library
    Download { name: String, url: String },

    /// List local images
    Images,

    /// Delete a local image
    Delete { name: String },
}

#[derive(Args)]
struct InstallArgs {
    /// linux, windows or dd
    #[arg(required_unless_present = "request")]
    os_type: Option<String>,

    /// Read the whole request from a JSON file instead
    #[arg(long, conflicts_with = "os_type")]
    request: Option<PathBuf>,

    /// Linux distribution, e.g. debian
    #[arg(long)]
    system: Option<String>,

    /// Distribution release, e.g. 12
    #[arg(long)]
    release: Option<String>,

    #[command(flatten)]
    access: AccessArgs,

    #[arg(long)]
    web_port: Option<u16>,

    #[arg(long)]
    minimal: bool,

    /// Image to write for dd installs
    #[arg(long)]
    image_url: Option<String>,

    #[arg(long)]
    iso_url: Option<String>,

    /// Windows edition name
    #[arg(long)]
    image_name: Option<String>,

    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    rdp_port: Option<u16>,

    #[arg(long)]
    allow_ping: bool,

    /// Extra driver to inject, may be repeated
    #[arg(long = "driver")]
    drivers: Vec<String>,
}

#[derive(Args)]
struct AccessArgs {
    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    ssh_key: Option<String>,

    #[arg(long)]
    ssh_port: Option<u16>,
}

impl AccessArgs {
    fn apply(self, request: &mut InstallRequest) {
        request.password = self.password.unwrap_or_default();
        request.ssh_key = self.ssh_key.unwrap_or_default();
        request.ssh_port = self.ssh_port.unwrap_or_default();
    }
}

impl InstallArgs {
    fn into_request(self) -> Result<InstallRequest, Error> {
        if let Some(path) = &self.request {
            let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
                message: format!("failed to read {}: {e}", path.display()),
            })?;
            return serde_json::from_str(&raw).map_err(|e| Error::Config {
                message: format!("invalid request file {}: {e}", path.display()),
            });
        }

        let mut request = InstallRequest {
            os_type: self.os_type.unwrap_or_default(),
            system: self.system.unwrap_or_default(),
            version: self.release.unwrap_or_default(),
            web_port: self.web_port.unwrap_or_default(),
            minimal: self.minimal,
            image_url: self.image_url.unwrap_or_default(),
            iso_url: self.iso_url.unwrap_or_default(),
            image_name: self.image_name.unwrap_or_default(),
            language: self.language.unwrap_or_default(),
            rdp_port: self.rdp_port.unwrap_or_default(),
            allow_ping: self.allow_ping,
            drivers: self.drivers,
            ..Default::default()
        };
        self.access.apply(&mut request);
        Ok(request)
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ri_io={level},ri_cli={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn build_config(cli: &Cli) -> EngineConfig {
    let root = cli.root.clone().unwrap_or_else(default_root);
    let mut config = EngineConfig::from_root(&root);

    if let Some(dir) = &cli.script_dir {
        config.script.dir = dir.clone();
    }
    if let Some(interpreter) = &cli.interpreter {
        config.script = config
            .script
            .with_interpreter(interpreter.split_whitespace());
    }
    if let Some(dir) = &cli.offline_dir {
        config.offline_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.download_dir {
        config.download_dir = dir.clone();
    }
    config.kill_on_stop = cli.kill_on_stop;
    config
}

async fn run(cli: Cli) -> Result<(), Error> {
    let engine = Engine::new(build_config(&cli))?;
    engine.prepare().await?;

    match cli.command {
        Commands::Install(args) => {
            let request = args.into_request()?;
            commands::install::execute(&engine, &request).await
        }
        Commands::InstallImage { name, access } => {
            let mut request = InstallRequest::default();
            access.apply(&mut request);
            commands::install::execute_image(&engine, &name, &request).await
        }
        Commands::Download { name, url } => {
            commands::download::execute(&engine, DownloadResource::new(name, url)).await
        }
        Commands::Images => commands::images::list(&engine),
        Commands::Delete { name } => commands::images::delete(&engine, &name),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn install_flags_become_a_request() {
        let cli = Cli::try_parse_from([
            "ri",
            "install",
            "linux",
            "--system",
            "debian",
            "--release",
            "12",
            "--password",
            "secret",
            "--ssh-port",
            "2222",
            "--minimal",
        ])
        .unwrap();
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        let request = args.into_request().unwrap();
        assert_eq!(request.os_type, "linux");
        assert_eq!(request.system, "debian");
        assert_eq!(request.version, "12");
        assert_eq!(request.password, "secret");
        assert_eq!(request.ssh_port, 2222);
        assert!(request.minimal);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn request_file_is_read_as_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"os_type": "dd", "image_url": "https://example.com/disk.img", "ssh_port": 22}}"#
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "ri",
            "install",
            "--request",
            file.path().to_str().unwrap(),
        ])
        .unwrap();
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        let request = args.into_request().unwrap();
        assert_eq!(request.os_type, "dd");
        assert_eq!(request.image_url, "https://example.com/disk.img");
        assert_eq!(request.ssh_port, 22);
    }

    #[test]
    fn install_needs_os_type_or_request_file() {
        assert!(Cli::try_parse_from(["ri", "install"]).is_err());
    }

    #[test]
    fn directory_flags_override_root_layout() {
        let cli = Cli::try_parse_from([
            "ri",
            "--root",
            "/srv/ri",
            "--download-dir",
            "/data/images",
            "--interpreter",
            "cmd /C",
            "images",
        ])
        .unwrap();
        let config = build_config(&cli);
        assert_eq!(config.script.dir, PathBuf::from("/srv/ri/reinstall"));
        assert_eq!(config.download_dir, PathBuf::from("/data/images"));
        assert_eq!(config.offline_dir, Some(PathBuf::from("/srv/ri/offline")));
        assert_eq!(config.script.interpreter, vec!["cmd", "/C"]);
    }
}
