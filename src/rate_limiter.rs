//! # Feature: Tries and Cooldown
//!
//! Soft throttle on message generation: a fixed number of tries, then a cooldown
//! window. The limiter only reports state; callers decide whether to reject.
//!
//! - **Version**: 2.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 2.1.0: Atomic check-and-count and idle client eviction
//! - 2.0.0: Optional server-side tracking keyed by client identity
//! - 1.0.0: Tries/cooldown state machine with lazy expiry

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Tries allowed before a cooldown starts
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Length of the cooldown window in minutes
pub const DEFAULT_COOLDOWN_MINUTES: u64 = 10;

/// Longest configurable cooldown, one year
pub const MAX_COOLDOWN_MINUTES: u64 = 365 * 24 * 60;

/// Tracked clients above which expired entries are swept on the next attempt
const PRUNE_THRESHOLD: usize = 10_000;

/// Minimum gap between two sweeps
const PRUNE_INTERVAL_MS: i64 = 60_000;

/// Persisted tries state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriesState {
    pub count: u32,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Snapshot reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriesStatus {
    pub tries: u32,
    pub max_tries: u32,
    pub in_cooldown: bool,
    pub remaining_ms: i64,
    pub remaining_text: String,
}

/// Format a remaining duration as `MM:SS`, rounding partial seconds up
pub fn format_remaining(remaining_ms: i64) -> String {
    let seconds = (remaining_ms.max(0) + 999) / 1000;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// `now + cooldown`, saturating at the latest representable instant
fn cooldown_end(now: DateTime<Utc>, cooldown: std::time::Duration) -> DateTime<Utc> {
    Duration::from_std(cooldown)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Tries/cooldown state machine for a single client
#[derive(Debug, Clone)]
pub struct TriesLimiter {
    max_tries: u32,
    cooldown: std::time::Duration,
    state: TriesState,
}

impl TriesLimiter {
    pub fn new(max_tries: u32, cooldown: std::time::Duration) -> Self {
        Self::with_state(max_tries, cooldown, TriesState::default())
    }

    /// Resume from a previously stored state
    pub fn with_state(max_tries: u32, cooldown: std::time::Duration, state: TriesState) -> Self {
        TriesLimiter {
            max_tries,
            cooldown,
            state,
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Current state, resetting an expired cooldown first
    pub fn state_at(&mut self, now: DateTime<Utc>) -> TriesState {
        if let Some(until) = self.state.cooldown_until {
            if now >= until {
                debug!("Cooldown ended at {until}, tries reset");
                self.state = TriesState::default();
            }
        }
        self.state
    }

    pub fn state(&mut self) -> TriesState {
        self.state_at(Utc::now())
    }

    pub fn status_at(&mut self, now: DateTime<Utc>) -> TriesStatus {
        let state = self.state_at(now);
        let remaining_ms = state
            .cooldown_until
            .map(|until| (until - now).num_milliseconds().max(0))
            .unwrap_or(0);
        let in_cooldown = state.cooldown_until.is_some();

        TriesStatus {
            tries: state.count,
            max_tries: self.max_tries,
            in_cooldown,
            remaining_ms,
            remaining_text: if in_cooldown {
                format_remaining(remaining_ms)
            } else {
                String::new()
            },
        }
    }

    pub fn status(&mut self) -> TriesStatus {
        self.status_at(Utc::now())
    }

    pub fn in_cooldown_at(&mut self, now: DateTime<Utc>) -> bool {
        self.state_at(now).cooldown_until.is_some()
    }

    /// Count one attempt. Reaching `max_tries` starts the cooldown; attempts
    /// during a cooldown leave it untouched.
    pub fn note_attempt_at(&mut self, now: DateTime<Utc>) -> TriesStatus {
        if self.in_cooldown_at(now) {
            return self.status_at(now);
        }

        let next = (self.state.count + 1).min(self.max_tries);
        self.state.count = next;
        self.state.last_attempt = Some(now);
        if next >= self.max_tries {
            self.state.cooldown_until = Some(cooldown_end(now, self.cooldown));
        }
        self.status_at(now)
    }

    pub fn note_attempt(&mut self) -> TriesStatus {
        self.note_attempt_at(Utc::now())
    }

    pub fn reset(&mut self) {
        self.state = TriesState::default();
    }
}

/// Result of counting an attempt against a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Counted; the status may show a cooldown that this attempt started
    Counted(TriesStatus),
    /// The client was already cooling down and nothing changed
    Rejected(TriesStatus),
}

impl Attempt {
    pub fn status(&self) -> &TriesStatus {
        match self {
            Attempt::Counted(status) | Attempt::Rejected(status) => status,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Attempt::Rejected(_))
    }
}

/// Server-side tries tracking, one state machine per client identity
pub struct ClientThrottle {
    max_tries: u32,
    cooldown: std::time::Duration,
    clients: DashMap<String, TriesState>,
    last_prune_ms: AtomicI64,
}

impl ClientThrottle {
    pub fn new(max_tries: u32, cooldown: std::time::Duration) -> Self {
        ClientThrottle {
            max_tries,
            cooldown,
            clients: DashMap::new(),
            last_prune_ms: AtomicI64::new(i64::MIN),
        }
    }

    fn limiter(&self, state: TriesState) -> TriesLimiter {
        TriesLimiter::with_state(self.max_tries, self.cooldown, state)
    }

    /// Whether a stored state carries nothing worth keeping at `now`: an expired
    /// cooldown, or a partial count idle for longer than one cooldown window
    fn is_stale(&self, state: &TriesState, now: DateTime<Utc>) -> bool {
        match (state.cooldown_until, state.last_attempt) {
            (Some(until), _) => now >= until,
            (None, Some(last)) => cooldown_end(last, self.cooldown) <= now,
            (None, None) => true,
        }
    }

    pub fn status_at(&self, client: &str, now: DateTime<Utc>) -> TriesStatus {
        let stored = self.clients.get(client).map(|s| *s);
        let status = self.limiter(stored.unwrap_or_default()).status_at(now);

        if stored.is_some() {
            self.clients
                .remove_if(client, |_, state| state.cooldown_until.is_some_and(|until| now >= until));
        }
        status
    }

    pub fn status(&self, client: &str) -> TriesStatus {
        self.status_at(client, Utc::now())
    }

    /// Count an attempt unless the client is cooling down. The check and the
    /// update happen under the same map entry lock.
    pub fn note_attempt_at(&self, client: &str, now: DateTime<Utc>) -> Attempt {
        if self.clients.len() > PRUNE_THRESHOLD {
            self.maybe_prune_at(now);
        }

        let mut entry = self.clients.entry(client.to_string()).or_default();
        let mut limiter = self.limiter(*entry);
        if limiter.in_cooldown_at(now) {
            return Attempt::Rejected(limiter.status_at(now));
        }

        let status = limiter.note_attempt_at(now);
        *entry = limiter.state_at(now);
        drop(entry);

        if status.in_cooldown {
            info!(
                "Client {} reached {} tries, cooling down for {}",
                client, self.max_tries, status.remaining_text
            );
        }
        Attempt::Counted(status)
    }

    pub fn note_attempt(&self, client: &str) -> Attempt {
        self.note_attempt_at(client, Utc::now())
    }

    pub fn reset(&self, client: &str) {
        self.clients.remove(client);
    }

    fn maybe_prune_at(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let last = self.last_prune_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < PRUNE_INTERVAL_MS {
            return;
        }
        if self
            .last_prune_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.prune_at(now);
        }
    }

    /// Drop clients with an expired cooldown or an idle partial count
    pub fn prune_at(&self, now: DateTime<Utc>) {
        let before = self.clients.len();
        self.clients.retain(|_, state| !self.is_stale(state, now));
        debug!("Pruned {} idle clients", before.saturating_sub(self.clients.len()));
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
