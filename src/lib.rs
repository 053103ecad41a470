pub mod clock;
pub mod config;
pub mod defaults;
pub mod diagnostics;
pub mod engine;
pub mod input;
pub mod notification;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod watcher;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use clock::{SharedClock, SystemClock};
use config::NotifierConfig;
use engine::{MessagePicker, RuleEngine};
use notification::{NotificationSink, StdoutSink, TracingSink};
use session::Session;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};

/// Rule-driven quality notifications for an editor session.
///
/// Reads editor events as JSON lines on stdin and writes the notifications
/// to show as JSON lines on stdout.
#[derive(Debug, Parser)]
#[command(name = "qat-notifier", version, about)]
pub struct Cli {
    /// Workspace root; relative rules paths resolve against it.
    #[arg(long, short = 'w')]
    pub workspace: Option<PathBuf>,

    /// Config file [default: <workspace>/.vscode/qat-notifier.toml]
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory for rolling log files [env: QAT_NOTIFIER_LOG_DIR]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Seed for message selection, for reproducible sessions.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the effective config (defaults filled in) and exit.
    #[arg(long)]
    pub write_config: bool,

    /// Log notifications instead of writing them to stdout.
    #[arg(long)]
    pub log_only: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    // -----------------------------------------------------------------------
    // Logging: rolling daily file. stdout carries notifications, so nothing
    // else may write there.
    // -----------------------------------------------------------------------
    let log_dir = resolve_log_dir(cli.log_dir.as_deref());
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "qat-notifier.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qat_notifier_lib=debug".parse()?),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    // -----------------------------------------------------------------------
    // Panic hook: route panics through tracing before the process dies.
    // -----------------------------------------------------------------------
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        tracing::error!("PANIC at {}: {}", location, message);
    }));

    tracing::info!(
        "qat-notifier {} starting, logs in {}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );

    let config_path = cli
        .config
        .clone()
        .or_else(|| config::default_config_path(cli.workspace.as_deref()));
    let loaded = match &config_path {
        Some(path) => config::load_or_default(path),
        None => Ok(NotifierConfig::default()),
    };

    if cli.write_config {
        // Never overwrite a file we could not read
        let cfg = loaded?;
        let path = config_path
            .ok_or_else(|| anyhow!("--write-config needs --config or --workspace"))?;
        config::save(&cfg, &path)?;
        tracing::info!("Wrote config to {}", path.display());
        return Ok(());
    }

    let cfg = startup_config(loaded);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let sink: Box<dyn NotificationSink> = if cli.log_only {
        Box::new(TracingSink)
    } else {
        Box::new(StdoutSink)
    };
    runtime.block_on(serve(cli.workspace, cli.seed, cfg, config_path, sink))
}

/// An unreadable config file at startup is logged and replaced by the
/// defaults; the watcher picks up a corrected file later.
fn startup_config(loaded: Result<NotifierConfig, config::ConfigError>) -> NotifierConfig {
    loaded.unwrap_or_else(|e| {
        tracing::warn!("{}. Using default configuration.", e);
        NotifierConfig::default()
    })
}

fn resolve_log_dir(flag: Option<&Path>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    std::env::var_os("QAT_NOTIFIER_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("qat-notifier").join("logs"))
}

/// Wires the pipeline: stdin → input → session → stdout, with the rule store
/// and config watcher feeding the session over watch channels.
async fn serve(
    workspace:   Option<PathBuf>,
    seed:        Option<u64>,
    cfg:         NotifierConfig,
    config_path: Option<PathBuf>,
    sink:        Box<dyn NotificationSink>,
) -> Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);

    let (config_tx, config_rx) = watch::channel(cfg.clone());
    match config_path {
        Some(path) => {
            tokio::spawn(watcher::run_config(path, config_tx));
        }
        None => tracing::info!("No config file; configuration is fixed for this session"),
    }

    let (reload_tx, reload_rx) = mpsc::channel::<()>(1);
    let (event_tx, event_rx)   = mpsc::channel::<input::EditorEvent>(256);

    let rule_store = store::RuleStore::new(workspace.clone(), &cfg);
    let rules_rx = rule_store.subscribe();

    tokio::spawn(store::run(rule_store, reload_rx, config_rx.clone(), reload_tx.clone()));
    tokio::spawn(input::run(BufReader::new(tokio::io::stdin()), event_tx));

    let picker = match seed {
        Some(seed) => MessagePicker::seeded(seed),
        None => MessagePicker::from_entropy(),
    };
    let engine = RuleEngine::new(
        rules_rx.borrow().clone(),
        cfg,
        sink,
        clock.clone(),
        picker,
    );
    let mut session = Session::new(engine, workspace, reload_tx, clock);

    session::run(&mut session, event_rx, rules_rx, config_rx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_all_flags() {
        let cli = Cli::parse_from([
            "qat-notifier",
            "--workspace", "/ws",
            "--config", "/ws/custom.toml",
            "--log-dir", "/tmp/logs",
            "--seed", "42",
            "--write-config",
            "--log-only",
        ]);
        assert_eq!(cli.workspace, Some(PathBuf::from("/ws")));
        assert_eq!(cli.config, Some(PathBuf::from("/ws/custom.toml")));
        assert_eq!(cli.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(cli.seed, Some(42));
        assert!(cli.write_config && cli.log_only);
    }

    #[test]
    fn cli_flags_are_optional() {
        let cli = Cli::parse_from(["qat-notifier"]);
        assert!(cli.workspace.is_none() && cli.config.is_none() && cli.seed.is_none());
        assert!(!cli.write_config);
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, "idleMs = \"soon\"\n").unwrap();

        let cfg = startup_config(config::load_or_default(&path));
        assert_eq!(cfg, NotifierConfig::default());
    }

    #[test]
    fn log_dir_flag_wins() {
        assert_eq!(resolve_log_dir(Some(Path::new("/var/log/qat"))), PathBuf::from("/var/log/qat"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
