//! Debounced status transitions.
//!
//! Each target carries a single [`Debounce`] value recording which way the
//! raw probe signal points and since when. A transition is confirmed only
//! when the raw signal disagrees with the stored status and has held for at
//! least the target's threshold. Every flip of the raw signal restarts the
//! clock, so a target that flaps faster than its threshold never confirms.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use upwatch_state::TargetId;

/// Confirmed reachability of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn from_online(online: bool) -> Self {
        if online { Status::Online } else { Status::Offline }
    }

    pub fn is_online(self) -> bool {
        self == Status::Online
    }

    /// Lowercase name used in notifications.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the raw probe signal and when it last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debounce {
    /// Reachable continuously since `since`.
    Online { since: Instant },
    /// Unreachable continuously since `since`.
    Offline { since: Instant },
}

impl Debounce {
    fn new(status: Status, since: Instant) -> Self {
        match status {
            Status::Online => Debounce::Online { since },
            Status::Offline => Debounce::Offline { since },
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Debounce::Online { .. } => Status::Online,
            Debounce::Offline { .. } => Status::Offline,
        }
    }

    pub fn since(&self) -> Instant {
        match *self {
            Debounce::Online { since } | Debounce::Offline { since } => since,
        }
    }
}

/// Per-target debounce state, owned by the monitor.
#[derive(Debug, Default)]
pub struct TransitionTracker {
    states: HashMap<TargetId, Debounce>,
}

impl TransitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw probe result and decide whether it confirms a transition.
    ///
    /// `stored_online` is the last persisted status. Returns the new status
    /// when the raw signal disagrees with it and has held for `threshold`.
    pub fn evaluate(
        &mut self,
        target_id: &str,
        reachable: bool,
        stored_online: bool,
        threshold: Duration,
        now: Instant,
    ) -> Option<Status> {
        let observed = Status::from_online(reachable);
        self.observe(target_id, observed, now);

        if reachable == stored_online {
            return None;
        }
        if self.is_confirmed(target_id, observed, threshold, now) {
            Some(observed)
        } else {
            None
        }
    }

    /// Record the raw signal, restarting the clock only when it changes
    /// direction.
    pub fn observe(&mut self, target_id: &str, observed: Status, now: Instant) -> Debounce {
        match self.states.get_mut(target_id) {
            Some(state) if state.status() == observed => *state,
            Some(state) => {
                debug!(%target_id, status = %observed, "raw status flipped, restarting debounce");
                *state = Debounce::new(observed, now);
                *state
            }
            None => {
                let state = Debounce::new(observed, now);
                self.states.insert(target_id.to_string(), state);
                state
            }
        }
    }

    /// Whether the raw signal has pointed towards `status` for at least
    /// `threshold`. False when nothing has been observed in that direction.
    pub fn is_confirmed(
        &self,
        target_id: &str,
        status: Status,
        threshold: Duration,
        now: Instant,
    ) -> bool {
        let Some(since) = self.since(target_id, status) else {
            return false;
        };
        let elapsed = now.saturating_duration_since(since);
        if elapsed < threshold {
            debug!(
                %target_id,
                %status,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "transition pending"
            );
            return false;
        }
        true
    }

    /// When the raw signal last turned towards `status`, if it currently
    /// points that way.
    pub fn since(&self, target_id: &str, status: Status) -> Option<Instant> {
        self.states
            .get(target_id)
            .filter(|state| state.status() == status)
            .map(Debounce::since)
    }

    pub fn online_since(&self, target_id: &str) -> Option<Instant> {
        self.since(target_id, Status::Online)
    }

    pub fn offline_since(&self, target_id: &str) -> Option<Instant> {
        self.since(target_id, Status::Offline)
    }

    pub fn get(&self, target_id: &str) -> Option<Debounce> {
        self.states.get(target_id).copied()
    }

    /// Drop state for targets that are no longer monitored.
    pub fn retain_targets<'a>(&mut self, active: impl IntoIterator<Item = &'a str>) {
        let active: HashSet<&str> = active.into_iter().collect();
        self.states.retain(|id, _| active.contains(id.as_str()));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
