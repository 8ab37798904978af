//! keel — staged Kubernetes releases with backup, health gating, and rollback.
//!
//! # Usage
//!
//! ```text
//! keel --config keel.toml                 # full release
//! keel --dry-run                          # validate manifests only
//! keel --rollback                         # restore the latest snapshot
//! keel --rollback 20261017_120000         # restore a named snapshot
//! keel --list-backups
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use keel_backup::SnapshotId;
use keel_cluster::Kubectl;
use keel_core::KeelConfig;
use keel_health::HttpProbe;
use keel_notify::Channel;
use keel_rollout::{Mode, Orchestrator};
use tracing::{info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "keel",
    about = "Staged releases with backup, health gating, and rollback",
    version
)]
struct Cli {
    /// Path to keel.toml.
    #[arg(short, long, default_value = "keel.toml")]
    config: PathBuf,

    /// Override run.namespace.
    #[arg(short, long)]
    namespace: Option<String>,

    /// Override run.health_url.
    #[arg(long)]
    health_url: Option<String>,

    /// Override run.backup_dir.
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Validate every manifest server-side without changing anything.
    #[arg(long, conflicts_with_all = ["rollback", "list_backups"])]
    dry_run: bool,

    /// Restore a snapshot instead of releasing. Without an ID, the latest.
    #[arg(long, value_name = "ID", num_args = 0..=1, conflicts_with = "list_backups")]
    rollback: Option<Option<String>>,

    /// List snapshots in the backup directory and exit.
    #[arg(long)]
    list_backups: bool,
}

impl Cli {
    fn mode(&self) -> anyhow::Result<Mode> {
        if self.dry_run {
            return Ok(Mode::DryRun);
        }
        match &self.rollback {
            None => Ok(Mode::Deploy),
            Some(None) => Ok(Mode::Rollback(None)),
            Some(Some(id)) => {
                let id: SnapshotId = id.parse().map_err(|e| anyhow::anyhow!("--rollback: {e}"))?;
                Ok(Mode::Rollback(Some(id)))
            }
        }
    }

    /// Load the config file and layer command-line overrides on top.
    fn load_config(&self) -> anyhow::Result<KeelConfig> {
        let mut config = KeelConfig::from_file(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        if let Some(namespace) = &self.namespace {
            config.run.namespace = namespace.clone();
        }
        if let Some(url) = &self.health_url {
            config.run.health_url = url.clone();
        }
        if let Some(dir) = &self.backup_dir {
            config.run.backup_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,keel=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
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
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

fn print_backups(
    backup_dir: &Path,
    orchestrator: &Orchestrator<Kubectl, HttpProbe, Channel>,
) -> anyhow::Result<()> {
    let snapshots = orchestrator
        .list_backups()
        .with_context(|| format!("listing {}", backup_dir.display()))?;
    if snapshots.is_empty() {
        println!("no snapshots in {}", backup_dir.display());
        return Ok(());
    }
    for snapshot in snapshots {
        let dump = if snapshot.has_dump() { "db" } else { "-" };
        let state = if snapshot.complete { "" } else { " (incomplete)" };
        println!(
            "{}\t{}\t{}{}",
            snapshot.id(),
            snapshot.meta.created_at.to_rfc3339(),
            dump,
            state
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mode = cli.mode()?;
    let config = cli.load_config()?;

    let cluster = Kubectl::from_config(&config.cluster);
    let probe = HttpProbe::new(config.health.probe_timeout);
    let notifier = Channel::from_url(config.run.notify_url.as_deref(), NOTIFY_TIMEOUT)
        .context("building notification channel")?;
    let backup_dir = config.run.backup_dir.clone();
    let orchestrator = Orchestrator::new(config, cluster, probe, notifier);

    if cli.list_backups {
        print_backups(&backup_dir, &orchestrator)?;
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = orchestrator.run_until(&mode, shutdown_signal()).await;
    let code = outcome.exit_code();
    info!(exit_code = code, phase = %orchestrator.phase(), "keel finished");
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[run]
namespace = "staging"
backup_dir = "/var/backups/keel"
health_url = "http://app.staging.internal/health"
"#;

    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("keel.toml");
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("keel").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn default_mode_is_deploy() {
        let cli = parse(&[]);
        assert_eq!(cli.mode().unwrap(), Mode::Deploy);
        assert_eq!(cli.config, PathBuf::from("keel.toml"));
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn rollback_with_and_without_id() {
        assert_eq!(parse(&["--rollback"]).mode().unwrap(), Mode::Rollback(None));

        let mode = parse(&["--rollback", "20261017_120000"]).mode().unwrap();
        assert_eq!(
            mode,
            Mode::Rollback(Some("20261017_120000".parse().unwrap()))
        );
    }

    #[test]
    fn rollback_rejects_latest_as_id() {
        assert!(parse(&["--rollback", "latest"]).mode().is_err());
    }

    #[test]
    fn dry_run_conflicts_with_rollback() {
        let result = Cli::try_parse_from(["keel", "--dry-run", "--rollback"]);
        assert!(result.is_err());
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let cli = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--namespace",
            "prod",
            "--health-url",
            "http://app.prod.internal/healthz",
            "--backup-dir",
            "/tmp/keel-backups",
        ]);

        let config = cli.load_config().unwrap();
        assert_eq!(config.run.namespace, "prod");
        assert_eq!(config.run.health_url, "http://app.prod.internal/healthz");
        assert_eq!(config.run.backup_dir, PathBuf::from("/tmp/keel-backups"));
        // Reference plan, anchored at the config file's directory.
        assert_eq!(config.stages.len(), 6);
        assert!(config.stages[0].manifests[0].starts_with(dir.path()));
    }

    #[test]
    fn invalid_override_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let cli = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--health-url",
            "https://app.prod.internal/health",
        ]);
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = parse(&["--config", "/nonexistent/keel.toml"]);
        assert!(cli.load_config().is_err());
    }
}
