//! Monitoring cycles over every registered target.
//!
//! A cycle loads the notification template once, then probes each target in
//! order, feeds the result to the [`TransitionTracker`], and for every
//! confirmed transition notifies and persists. Nothing in a cycle is fatal:
//! bad URLs are skipped, store and delivery failures are logged.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use upwatch_core::{
    UpwatchConfig, DEFAULT_MIN_DOWNTIME, DEFAULT_PROBE_TIMEOUT, DEFAULT_STORE_TIMEOUT,
};
use upwatch_state::{MonitoredTarget, StateError, StateResult, StateStore, StoreFile, TargetId};

use crate::notify::{render_template, NotificationSender};
use crate::probe::{probe_target, ProbeOutcome};
use crate::tracker::{Status, TransitionTracker};

/// Storage the monitor reads targets and settings from and writes
/// transitions to.
///
/// Calls are blocking; the monitor runs them on the blocking pool under
/// [`MonitorSettings::store_timeout`].
pub trait MonitorStore: Send + Sync + 'static {
    fn list_targets(&self) -> StateResult<Vec<MonitoredTarget>>;

    fn notification_template(&self) -> StateResult<Option<String>>;

    /// Overwrite the stored online flag.
    fn set_online_status(&self, target_id: &str, online: bool) -> StateResult<()>;

    /// Append an immutable history record.
    fn append_history(&self, target_id: &str, online: bool, at: u64) -> StateResult<()>;
}

impl MonitorStore for StateStore {
    fn list_targets(&self) -> StateResult<Vec<MonitoredTarget>> {
        StateStore::list_targets(self)
    }

    fn notification_template(&self) -> StateResult<Option<String>> {
        StateStore::notification_template(self)
    }

    fn set_online_status(&self, target_id: &str, online: bool) -> StateResult<()> {
        StateStore::set_online_status(self, target_id, online)
    }

    fn append_history(&self, target_id: &str, online: bool, at: u64) -> StateResult<()> {
        StateStore::append_history(self, target_id, online, at)
    }
}

/// Each call opens the database file and closes it again, leaving it free
/// for other processes between calls.
impl MonitorStore for StoreFile {
    fn list_targets(&self) -> StateResult<Vec<MonitoredTarget>> {
        self.with_store(|s| s.list_targets())
    }

    fn notification_template(&self) -> StateResult<Option<String>> {
        self.with_store(|s| s.notification_template())
    }

    fn set_online_status(&self, target_id: &str, online: bool) -> StateResult<()> {
        self.with_store(|s| s.set_online_status(target_id, online))
    }

    fn append_history(&self, target_id: &str, online: bool, at: u64) -> StateResult<()> {
        self.with_store(|s| s.append_history(target_id, online, at))
    }
}

/// Errors from a single store call made by the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("store error: {0}")]
    Store(#[from] StateError),

    #[error("store call {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("store task failed: {0}")]
    Task(String),
}

/// Tunables for a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Upper bound for one HTTP probe.
    pub probe_timeout: Duration,
    /// Upper bound for one store call.
    pub store_timeout: Duration,
    /// Debounce threshold for targets without their own.
    pub min_downtime: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            min_downtime: DEFAULT_MIN_DOWNTIME,
        }
    }
}

impl MonitorSettings {
    pub fn from_config(config: &UpwatchConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout(),
            store_timeout: config.store_timeout(),
            min_downtime: config.min_downtime(),
        }
    }
}

/// A confirmed status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub target_id: TargetId,
    pub status: Status,
    /// The rendered notification.
    pub message: String,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Targets probed.
    pub checked: usize,
    /// Targets left out because their URL was unusable.
    pub skipped: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub transitions: Vec<TransitionEvent>,
}

/// Runs monitoring cycles and owns the per-target debounce state.
pub struct Monitor {
    store: Arc<dyn MonitorStore>,
    client: reqwest::Client,
    notifier: NotificationSender,
    tracker: TransitionTracker,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        client: reqwest::Client,
        notifier: NotificationSender,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            store,
            client,
            notifier,
            tracker: TransitionTracker::new(),
            settings,
        }
    }

    pub fn tracker(&self) -> &TransitionTracker {
        &self.tracker
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    /// Run cycles until `shutdown` flips.
    ///
    /// The next cycle starts `interval` after the previous one finished, so
    /// cycles never overlap.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "monitor started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.tick().await;
            info!(
                checked = report.checked,
                skipped = report.skipped,
                reachable = report.reachable,
                unreachable = report.unreachable,
                transitions = report.transitions.len(),
                "monitoring cycle finished"
            );

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("monitor shutting down");
    }

    /// Load the current targets from the store and run one cycle over them.
    pub async fn tick(&mut self) -> CycleReport {
        let targets = match self.call_store("list_targets", |s| s.list_targets()).await {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "failed to load targets, skipping cycle");
                return CycleReport::default();
            }
        };

        let report = self.run_cycle(&targets).await;
        self.tracker
            .retain_targets(targets.iter().map(|t| t.id.as_str()));
        report
    }

    /// Run one cycle over `targets`, in order.
    pub async fn run_cycle(&mut self, targets: &[MonitoredTarget]) -> CycleReport {
        let template = self.load_template().await;
        let mut report = CycleReport::default();

        for target in targets {
            debug!(target_id = %target.id, name = %target.name, url = %target.public_url, "checking");

            let Some(outcome) =
                probe_target(&self.client, target, self.settings.probe_timeout).await
            else {
                report.skipped += 1;
                continue;
            };

            report.checked += 1;
            if outcome.reachable {
                report.reachable += 1;
            } else {
                report.unreachable += 1;
            }

            if let Some(event) = self
                .process_outcome(target, &outcome, template.as_deref(), Instant::now())
                .await
            {
                report.transitions.push(event);
            }
        }

        report
    }

    /// The stored template, or `None` (the built-in default) on any failure.
    ///
    /// Whitespace-only templates are deliberately treated like an empty one,
    /// matching [`render_template`].
    pub async fn load_template(&self) -> Option<String> {
        match self
            .call_store("notification_template", |s| s.notification_template())
            .await
        {
            Ok(template) => template.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!(error = %e, "failed to load notification template, using default");
                None
            }
        }
    }

    /// Feed one probe result through the tracker; on a confirmed transition
    /// notify and persist.
    pub async fn process_outcome(
        &mut self,
        target: &MonitoredTarget,
        outcome: &ProbeOutcome,
        template: Option<&str>,
        now: Instant,
    ) -> Option<TransitionEvent> {
        let threshold = target.min_downtime(self.settings.min_downtime);
        let status = self.tracker.evaluate(
            &target.id,
            outcome.reachable,
            target.online,
            threshold,
            now,
        )?;

        let message = render_template(
            template,
            &target.name,
            &target.public_url,
            status,
        );
        info!(target_id = %target.id, %status, "status transition confirmed");

        self.notifier.send(&message).await;
        self.persist(&target.id, status.is_online()).await;

        Some(TransitionEvent {
            target_id: target.id.clone(),
            status,
            message,
        })
    }

    /// Write the new status and a history record. Failures are logged only.
    async fn persist(&self, target_id: &str, online: bool) {
        let id = target_id.to_string();
        if let Err(e) = self
            .call_store("set_online_status", move |s| s.set_online_status(&id, online))
            .await
        {
            error!(%target_id, online, error = %e, "failed to update online status");
        }

        let id = target_id.to_string();
        let at = epoch_secs();
        if let Err(e) = self
            .call_store("append_history", move |s| s.append_history(&id, online, at))
            .await
        {
            error!(%target_id, online, error = %e, "failed to append history");
        }
    }

    /// Run a blocking store call on the blocking pool, bounded by the store
    /// timeout.
    async fn call_store<T, F>(&self, op: &'static str, f: F) -> Result<T, MonitorError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MonitorStore) -> StateResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || f(store.as_ref()));
        match tokio::time::timeout(self.settings.store_timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(MonitorError::Task(join.to_string())),
            Err(_) => Err(MonitorError::Timeout {
                op,
                after: self.settings.store_timeout,
            }),
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
