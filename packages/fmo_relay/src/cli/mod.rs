pub mod daemon;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{FileConfig, LogLevel, RelayConfig, save_default_config};
use crate::{logging, service};
use daemon::DaemonError;

/// Options for `start` after merging CLI flags with the config file.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Detach into the background.
    pub daemon: bool,
    /// Set when this process is the detached child.
    pub detached: bool,
    pub pid_file: PathBuf,
    pub debug: bool,
}

impl StartOptions {
    pub fn resolve(
        config: &FileConfig,
        daemon: bool,
        detached: bool,
        pid_file: Option<PathBuf>,
        debug: bool,
    ) -> Self {
        Self {
            daemon: daemon || config.daemon.enabled,
            detached,
            pid_file: pid_file.unwrap_or_else(|| config.daemon.pid_file.clone()),
            debug,
        }
    }
}

/// Write a default config file.
pub fn generate_config_command(path: &Path) -> Result<()> {
    save_default_config(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Run the relay, in the foreground or as a detached background process.
pub async fn start_command(config_path: &Path, config: FileConfig, opts: StartOptions) -> Result<()> {
    if opts.daemon && !opts.detached {
        let pid = daemon::start_daemon(config_path, &opts.pid_file)?;
        println!("Relay started in background (PID {})", pid);
        return Ok(());
    }

    let mut logging_config = config.logging.clone();
    if opts.detached {
        logging_config.console = false;
    }
    let level = if opts.debug {
        LogLevel::Debug
    } else {
        config.log_level()
    };
    let _log_guard = logging::init(&logging_config, level)?;

    if !config_path.exists() {
        info!(
            "Config file {} not found, using defaults",
            config_path.display()
        );
    }

    if opts.detached {
        if let Some(pid) = daemon::check_daemon(&opts.pid_file) {
            if pid != std::process::id() {
                return Err(DaemonError::AlreadyRunning(pid).into());
            }
        }
        daemon::write_pid_file(&opts.pid_file, std::process::id())?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal, stopping relay...");
            cancel.cancel();
        }
    });

    let result = service::run(&RelayConfig::from_file(&config), cancel).await;

    if opts.detached {
        daemon::cleanup_pid_file(&opts.pid_file);
    }
    info!("Shutdown complete");
    result
}

/// Stop the background relay.
pub async fn stop_command(pid_file: &Path) -> Result<()> {
    match daemon::stop_daemon(pid_file).await {
        Ok(pid) => {
            println!("Relay stopped (PID {})", pid);
            Ok(())
        }
        Err(DaemonError::NotRunning) => {
            println!("Relay is not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stop the background relay if it is running, then start a new one.
pub async fn restart_command(config_path: &Path, pid_file: &Path) -> Result<()> {
    stop_command(pid_file).await?;
    let pid = daemon::start_daemon(config_path, pid_file)?;
    println!("Relay started in background (PID {})", pid);
    Ok(())
}

/// Report whether a background relay is running.
pub fn status_command(pid_file: &Path) -> Result<()> {
    let had_pid_file = pid_file.exists();
    match daemon::check_daemon(pid_file) {
        Some(pid) => println!("Relay is running (PID {})", pid),
        None if had_pid_file && !pid_file.exists() => {
            println!("Relay is not running (removed stale PID file)")
        }
        None => println!("Relay is not running"),
    }
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Load and validate the config, with a path-specific error message.
pub fn load_config(config_path: &Path) -> Result<FileConfig> {
    FileConfig::load(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_cli_pid_file() {
        let config = FileConfig::default();
        let opts = StartOptions::resolve(
            &config,
            false,
            false,
            Some(PathBuf::from("/tmp/relay.pid")),
            false,
        );
        assert_eq!(opts.pid_file, PathBuf::from("/tmp/relay.pid"));
        assert!(!opts.daemon);
    }

    #[test]
    fn resolve_falls_back_to_config() {
        let mut config = FileConfig::default();
        config.daemon.enabled = true;
        let opts = StartOptions::resolve(&config, false, false, None, true);
        assert!(opts.daemon);
        assert!(opts.debug);
        assert_eq!(opts.pid_file, PathBuf::from("/var/run/fmo_relay.pid"));
    }

    #[test]
    fn generate_config_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        generate_config_command(&path).unwrap();
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn load_config_error_names_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[mqtt]\nport = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[tokio::test]
    async fn stop_without_daemon_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(stop_command(&tmp.path().join("none.pid")).await.is_ok());
    }

    #[test]
    fn status_without_daemon_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(status_command(&tmp.path().join("none.pid")).is_ok());
    }
}
