//! upwatchd: the upwatch uptime monitor.
//!
//! Single binary that assembles the monitor:
//! - Config file (targets, intervals, notification channels)
//! - State store (redb)
//! - Monitor loop (probes, debounce, notifications)
//!
//! # Usage
//!
//! ```text
//! upwatchd init --config ./upwatch.toml --id api --url https://api.example.com
//! upwatchd run --config /etc/upwatch/upwatch.toml
//! upwatchd uptime --target api --span day
//! ```
//!
//! The running daemon only holds the state database for the length of each
//! store call, so `history`, `uptime`, `template` and `check` work next to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use upwatch_core::UpwatchConfig;
use upwatch_health::{
    build_client, CycleReport, Monitor, MonitorSettings, MonitorStore, NotificationSender,
    DEFAULT_TEMPLATE,
};
use upwatch_state::{
    BucketStatus, MonitoredTarget, StateError, StateStore, StoreFile, UptimeSpan,
    SETTING_NOTIFICATION_TEMPLATE,
};

const DB_FILE: &str = "upwatch.redb";

#[derive(Parser)]
#[command(name = "upwatchd", about = "Uptime monitor daemon")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "/etc/upwatch/upwatch.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config file with one target.
    Init {
        #[arg(long, default_value = "example")]
        id: String,

        #[arg(long, default_value = "Example")]
        name: String,

        /// Public URL of the target.
        #[arg(long, default_value = "https://example.com")]
        url: String,

        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// Run the monitor until Ctrl-C.
    Run,

    /// Run a single monitoring cycle and print the report.
    Check,

    /// Show recorded transitions for a target, newest first.
    History {
        #[arg(long)]
        target: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show a bucketed uptime summary for a target.
    Uptime {
        #[arg(long)]
        target: String,

        /// hour, day, week or month.
        #[arg(long, default_value = "day")]
        span: UptimeSpan,
    },

    /// Inspect or change the notification template.
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Print the template in use.
    Show,
    /// Store a new template. Placeholders: !name, !url, !status.
    Set { template: String },
    /// Remove the stored template and fall back to the default.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Command::Init { id, name, url, force } = &cli.command {
        return init(&cli.config, id, name, url, *force);
    }

    let config = UpwatchConfig::from_file(&cli.config)?;

    match cli.command {
        Command::Init { .. } => Ok(()), // handled above
        Command::Run => run(&config).await,
        Command::Check => check(&config).await,
        Command::History { target, limit } => history(&config, &target, limit),
        Command::Uptime { target, span } => uptime(&config, &target, span),
        Command::Template { action } => template(&config, action),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,upwatchd=debug,upwatch_health=debug")
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn init(path: &Path, id: &str, name: &str, url: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = UpwatchConfig::scaffold(id, name, url);
    config.validate()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn store_file(config: &UpwatchConfig) -> anyhow::Result<StoreFile> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    Ok(StoreFile::new(data_dir.join(DB_FILE)))
}

fn open_store(config: &UpwatchConfig) -> anyhow::Result<StateStore> {
    let file = store_file(config)?;
    file.open().map_err(|e| match e {
        StateError::Locked(path) => anyhow::anyhow!(
            "state database {path} is held by another upwatchd process; stop the daemon first"
        ),
        other => other.into(),
    })
}

/// Sync targets and template, then release the database for the monitor.
fn prepare_store(config: &UpwatchConfig) -> anyhow::Result<StoreFile> {
    let file = store_file(config)?;
    let store = open_store(config)?;
    seed(&store, config)?;
    info!(path = ?file.path(), "state store ready");
    Ok(file)
}

/// Bring the stored targets in line with the config file and seed the
/// notification template when none is stored yet.
fn seed(store: &StateStore, config: &UpwatchConfig) -> anyhow::Result<()> {
    let targets: Vec<MonitoredTarget> = config
        .targets
        .iter()
        .map(|t| MonitoredTarget::from_config(t, true))
        .collect();
    let (upserted, removed) = store.sync_targets(&targets)?;
    info!(upserted, removed, "targets synced from config");
    if targets.is_empty() {
        warn!("no targets configured");
    }

    if let Some(template) = config.template() {
        if store.notification_template()?.is_none() {
            store.set_notification_template(template)?;
            info!("notification template seeded from config");
        }
    }
    Ok(())
}

fn build_monitor(store: Arc<dyn MonitorStore>, config: &UpwatchConfig) -> anyhow::Result<Monitor> {
    let client = build_client()?;
    let notifier = NotificationSender::from_config(config, client.clone());
    info!(channels = notifier.len(), "notification channels configured");
    Ok(Monitor::new(
        store,
        client,
        notifier,
        MonitorSettings::from_config(config),
    ))
}

async fn run(config: &UpwatchConfig) -> anyhow::Result<()> {
    info!("upwatch daemon starting");

    let file = prepare_store(config)?;
    let mut monitor = build_monitor(Arc::new(file), config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = config.interval();
    let monitor_handle = tokio::spawn(async move {
        monitor.run(interval, shutdown_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = monitor_handle.await;
    info!("upwatch daemon stopped");
    Ok(())
}

async fn check(config: &UpwatchConfig) -> anyhow::Result<()> {
    let file = prepare_store(config)?;
    let mut monitor = build_monitor(Arc::new(file), config)?;

    let report = monitor.tick().await;
    print_report(&report);
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!(
        "checked {} target(s): {} reachable, {} unreachable, {} skipped",
        report.checked, report.reachable, report.unreachable, report.skipped
    );
    for event in &report.transitions {
        println!("{} -> {}: {}", event.target_id, event.status, event.message);
    }
}

fn history(config: &UpwatchConfig, target_id: &str, limit: usize) -> anyhow::Result<()> {
    let store = open_store(config)?;
    require_known_target(&store, target_id)?;

    let entries = store.recent_history(target_id, limit)?;
    if entries.is_empty() {
        println!("no transitions recorded for {target_id}");
    }
    for entry in entries {
        let status = if entry.online { "online" } else { "offline" };
        println!("{}  {status}", entry.at);
    }
    Ok(())
}

fn uptime(config: &UpwatchConfig, target_id: &str, span: UptimeSpan) -> anyhow::Result<()> {
    let store = open_store(config)?;
    require_known_target(&store, target_id)?;

    let summary = store.uptime_summary(target_id, span, epoch_secs())?;
    let bar: String = summary
        .buckets
        .iter()
        .map(|b| match b.status {
            BucketStatus::Online => '#',
            BucketStatus::Offline => 'x',
            BucketStatus::Missing => '.',
        })
        .collect();

    println!("{target_id} over the last {span}:");
    println!("  {bar}");
    match summary.uptime_percent() {
        Some(pct) => println!("  uptime {pct:.2}%"),
        None => println!("  no data"),
    }
    Ok(())
}

fn template(config: &UpwatchConfig, action: TemplateAction) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match action {
        TemplateAction::Show => match store.notification_template()? {
            Some(t) if !t.trim().is_empty() => println!("{t}"),
            _ => println!("{DEFAULT_TEMPLATE} (default)"),
        },
        TemplateAction::Set { template } => {
            anyhow::ensure!(!template.trim().is_empty(), "template must not be empty");
            store.set_notification_template(&template)?;
            println!("template updated");
        }
        TemplateAction::Reset => {
            store.delete_setting(SETTING_NOTIFICATION_TEMPLATE)?;
            println!("template reset to default");
        }
    }
    Ok(())
}

/// A target stays known after removal from the config while its history is kept.
fn require_known_target(store: &StateStore, target_id: &str) -> anyhow::Result<()> {
    if store.get_target(target_id)?.is_none() && store.list_history(target_id)?.is_empty() {
        anyhow::bail!("unknown target: {target_id}");
    }
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(dir: &Path, extra: &str) -> UpwatchConfig {
        let toml = format!(
            "[monitor]\ndata_dir = \"{}\"\n{extra}\n[[targets]]\nid = \"api\"\nname = \"API\"\npublic_url = \"http://127.0.0.1:1/\"\n",
            dir.display()
        );
        UpwatchConfig::from_toml_str(&toml).unwrap()
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["upwatchd", "uptime", "--target", "api", "--span", "week"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Uptime { ref target, span: UptimeSpan::Week } if target == "api"
        ));

        let cli = Cli::try_parse_from([
            "upwatchd", "--config", "/tmp/u.toml", "--log-format", "json", "template", "set", "!name !status",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/u.toml"));
        assert!(cli.log_format == LogFormat::Json);
        assert!(matches!(
            cli.command,
            Command::Template { action: TemplateAction::Set { ref template } } if template == "!name !status"
        ));

        assert!(Cli::try_parse_from(["upwatchd", "uptime", "--target", "api", "--span", "year"]).is_err());
    }

    #[test]
    fn seed_syncs_targets_and_template_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "[notifications]\ntemplate = \"!name: !status\"\n");
        let store = open_store(&config).unwrap();
        assert!(dir.path().join(DB_FILE).exists());

        seed(&store, &config).unwrap();
        let targets = store.list_targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].online);
        assert_eq!(store.notification_template().unwrap().as_deref(), Some("!name: !status"));

        // A template changed at runtime survives a restart.
        store.set_notification_template("custom").unwrap();
        store.set_online_status("api", false).unwrap();
        seed(&store, &config).unwrap();
        assert_eq!(store.notification_template().unwrap().as_deref(), Some("custom"));
        assert!(!store.get_target("api").unwrap().unwrap().online);
    }

    #[test]
    fn template_reset_removes_stored_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        {
            let store = open_store(&config).unwrap();
            store.set_notification_template("custom").unwrap();
        }
        template(&config, TemplateAction::Reset).unwrap();
        let store = open_store(&config).unwrap();
        assert_eq!(store.notification_template().unwrap(), None);
    }

    #[test]
    fn init_writes_a_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("upwatch.toml");

        init(&path, "api", "API", "https://api.example.com", false).unwrap();
        let config = UpwatchConfig::from_file(&path).unwrap();
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].id, "api");
        assert_eq!(config.targets[0].public_url, "https://api.example.com");

        let err = init(&path, "web", "Web", "https://web.example.com", false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(UpwatchConfig::from_file(&path).unwrap().targets[0].id, "api");

        init(&path, "web", "Web", "https://web.example.com", true).unwrap();
        assert_eq!(UpwatchConfig::from_file(&path).unwrap().targets[0].id, "web");

        assert!(init(&dir.path().join("bad.toml"), "a:b", "Bad", "https://x", false).is_err());
    }

    #[test]
    fn cli_parses_init() {
        let cli = Cli::try_parse_from(["upwatchd", "init", "--id", "api", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Init { ref id, ref url, force: true, .. } if id == "api" && url == "https://example.com"
        ));
    }

    #[test]
    fn held_database_asks_to_stop_the_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let held = open_store(&config).unwrap();

        let err = template(&config, TemplateAction::Show).unwrap_err();
        assert!(err.to_string().contains("stop the daemon first"), "{err}");

        drop(held);
        template(&config, TemplateAction::Show).unwrap();
    }

    #[tokio::test]
    async fn commands_work_while_the_monitor_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            "[monitor]\ndata_dir = \"{}\"\nprobe_timeout = \"2s\"\n\n[[targets]]\nid = \"api\"\nname = \"API\"\npublic_url = \"http://127.0.0.1:1/\"\nmin_downtime_seconds = 0\n",
            dir.path().display()
        );
        let config = UpwatchConfig::from_toml_str(&toml).unwrap();

        let file = prepare_store(&config).unwrap();
        let mut monitor = build_monitor(Arc::new(file), &config).unwrap();

        // The monitor is alive but not holding the file between calls.
        template(&config, TemplateAction::Set { template: "!name went !status".to_string() }).unwrap();

        let report = monitor.tick().await;
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].message, "API went offline");

        history(&config, "api", 5).unwrap();
        uptime(&config, "api", UptimeSpan::Hour).unwrap();
        let store = open_store(&config).unwrap();
        assert!(!store.get_target("api").unwrap().unwrap().online);
        assert_eq!(store.list_history("api").unwrap().len(), 1);
    }

    #[test]
    fn removed_target_history_stays_readable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        {
            let store = open_store(&config).unwrap();
            seed(&store, &config).unwrap();
            store.append_history("old", false, epoch_secs()).unwrap();
        }

        history(&config, "old", 5).unwrap();
        uptime(&config, "old", UptimeSpan::Day).unwrap();
        assert!(uptime(&config, "never", UptimeSpan::Day).is_err());
    }

    #[test]
    fn history_rejects_unknown_target() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let err = history(&config, "nope", 5).unwrap_err();
        assert!(err.to_string().contains("unknown target"));
    }
}
