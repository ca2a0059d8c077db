//! user-managerd - Sailfish user manager daemon
//!
//! Entry point for the daemon binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_managerd::config::Settings;
use user_managerd::identity::{ShadowBackend, UserHelper};
use user_managerd::manager::{self, ExitTimer, UserManager};
use user_managerd::mce::MceCallMonitor;
use user_managerd::seat::LogindSeatTracker;
use user_managerd::{OBJECT_PATH, SERVICE_NAME};

/// The daemon quits after one minute without activity.
const QUIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Command-line arguments for user-managerd
#[derive(Parser, Debug)]
#[command(name = "user-managerd")]
#[command(version, about = "Sailfish user manager daemon", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/user-managerd/config.toml")]
    config: PathBuf,

    /// Remove the local files of a user and exit
    #[arg(long = "removeUserFiles", value_name = "USERNAME")]
    remove_user_files: Option<String>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// Everything runs on one thread; all blocking work (identity store,
// filesystem, hook scripts) is short and intentional.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            warn!("Failed to load config: {err:#}, using defaults");
            Settings::default()
        }
    };
    let settings = Arc::new(settings);

    if let Some(username) = &args.remove_user_files {
        let users = UserHelper::new(Box::new(ShadowBackend::new()));
        if !manager::remove_user_files_for(&settings, &users, username) {
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("user-managerd v{} starting", env!("CARGO_PKG_VERSION"));

    let connection = zbus::connection::Builder::system()
        .context("Cannot connect to the system bus")?
        .build()
        .await
        .context("Cannot connect to the system bus")?;

    let exit = ExitTimer::new(QUIT_TIMEOUT);
    let users = UserHelper::new(Box::new(ShadowBackend::new()));
    let seat = Box::new(LogindSeatTracker::new(connection.clone()));
    let calls = Box::new(MceCallMonitor::new(connection.clone()));
    let user_manager = UserManager::new(settings, users, seat, calls, exit.clone());

    connection
        .object_server()
        .at(OBJECT_PATH, user_manager)
        .await
        .with_context(|| format!("Cannot register D-Bus object at {OBJECT_PATH}"))?;
    connection
        .request_name(SERVICE_NAME)
        .await
        .with_context(|| format!("Cannot register D-Bus service at {SERVICE_NAME}"))?;

    info!("serving {SERVICE_NAME} at {OBJECT_PATH}");

    manager::wait_for_exit(&connection, &exit).await?;

    info!("user-managerd exiting");
    Ok(())
}

fn init_logging(args: &Args) {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("user_managerd={log_level},warn"))
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}
