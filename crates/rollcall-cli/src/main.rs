mod config;
mod console;
mod devices;
mod preview;
mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use console::TerminalConsole;
use devices::V4lDevices;
use rollcall_core::TemplateStore;
use rollcall_hw::Camera;
use rollcall_store::{AttendanceError, AttendanceLog, CredentialStore};
use session::Session;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance register", version)]
struct Cli {
    /// Config file (default: $ROLLCALL_CONFIG, then <data dir>/rollcall.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the credential database, faces and attendance log
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Print the attendance table
    Attendance,
    /// List enrolled faces
    Faces,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config =
        Config::load(cli.config.as_deref(), cli.data_dir).context("loading configuration")?;
    init_logging(&config)?;

    match cli.command {
        Some(Commands::Devices) => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Some(Commands::Attendance) => {
            let log = AttendanceLog::open(config.attendance_path())?;
            match log.load_all() {
                Ok(records) => println!("{}", console::format_table(&records)),
                Err(AttendanceError::NotFound(path)) => {
                    println!("No attendance recorded yet ({path})");
                }
                Err(e) => return Err(e).context("reading attendance"),
            }
        }
        Some(Commands::Faces) => {
            let store = TemplateStore::open(config.faces_dir())?;
            let names = store.names()?;
            if names.is_empty() {
                println!("No faces enrolled in {}", store.dir().display());
            }
            for name in names {
                println!("{name}");
            }
        }
        None => {
            let admins = CredentialStore::open(config.db_path())
                .and_then(|store| store.usernames())
                .context("opening credential store")?;
            tracing::info!(
                data_dir = %config.data_dir.display(),
                camera = %config.camera_device,
                admins = admins.len(),
                "rollcall starting"
            );

            let devices = V4lDevices::from_config(&config);
            let mut session = Session::open(&config, &devices)?;
            let mut console = TerminalConsole::new();
            session.run(&mut console).context("terminal I/O failed")?;
            println!("{} marked present this session", session.marked().len());
        }
    }

    Ok(())
}

/// Log to `<data_dir>/rollcall.log` so the interactive screen stays clean.
fn init_logging(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
        .with_context(|| format!("opening log file {}", config.log_path().display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
