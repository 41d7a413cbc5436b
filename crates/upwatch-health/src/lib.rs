//! upwatch-health: reachability monitoring for upwatch.
//!
//! Probes every registered target over HTTP(S) once per cycle, debounces the
//! raw reachable/unreachable signal into confirmed status transitions, and
//! on each confirmed transition sends a notification and persists the new
//! status plus a history record.
//!
//! # Architecture
//!
//! ```text
//! Monitor (one cycle = every target, sequentially)
//!   ├── probe_target() → Option<ProbeOutcome>   (skipped on a bad URL)
//!   ├── TransitionTracker::evaluate()           (debounce window)
//!   └── on confirmed transition
//!       ├── render_template() → NotificationSender
//!       └── MonitorStore: set_online_status + append_history
//! ```
//!
//! # Debounce
//!
//! A transition is confirmed only once the raw signal has disagreed with the
//! stored status for at least the target's minimum downtime (30s unless
//! overridden). Any flip of the raw signal restarts the window, so flapping
//! targets never notify.

pub mod monitor;
pub mod notify;
pub mod probe;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use monitor::{CycleReport, Monitor, MonitorError, MonitorSettings, MonitorStore, TransitionEvent};
pub use notify::{
    render_template, LogNotifier, NotificationSender, Notifier, NotifyError, NotifyFuture,
    WebhookNotifier,
    DEFAULT_TEMPLATE,
};
pub use probe::{build_client, is_certificate_identity_error, probe_target, ProbeOutcome};
pub use tracker::{Debounce, Status, TransitionTracker};
