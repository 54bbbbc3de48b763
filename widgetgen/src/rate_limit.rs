//! Rate limiting for the widget refresh side channel.
//!
//! Three independent keyed counters share one mutex:
//! - per client IP: fixed window (default 100 per hour)
//! - per session: fixed window (default 20 per 24 hours)
//! - per widget instance: minimum spacing (default 5 s) plus a lifetime cap
//!   (default 50). Widget entries are never swept.
//!
//! Every check is a single check-and-increment under the lock. The `*_at`
//! variants take the current instant so tests control the clock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::io::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub ip_window: Duration,
    pub ip_max_requests: u32,
    pub session_window: Duration,
    pub session_max_requests: u32,
    pub widget_min_interval: Duration,
    pub widget_max_refreshes: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for RateLimits {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            ip_window: Duration::from_secs(cfg.ip_window_secs),
            ip_max_requests: cfg.ip_max_requests,
            session_window: Duration::from_secs(cfg.session_window_secs),
            session_max_requests: cfg.session_max_requests,
            widget_min_interval: Duration::from_secs(cfg.widget_min_interval_secs),
            widget_max_refreshes: cfg.widget_max_refreshes,
        }
    }
}

/// Result of a widget check. Rejections always carry a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl WidgetDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    opened_at: Instant,
}

impl WindowEntry {
    /// Measured from the window start so huge windows cannot overflow `Instant`.
    fn is_open(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.opened_at) < window
    }
}

#[derive(Debug, Clone, Copy)]
struct WidgetEntry {
    last_refresh: Instant,
    total: u32,
}

#[derive(Debug, Default)]
struct LimiterState {
    ips: HashMap<String, WindowEntry>,
    sessions: HashMap<String, WindowEntry>,
    widgets: HashMap<String, WidgetEntry>,
}

/// Entry counts, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    pub ips: usize,
    pub sessions: usize,
    pub widgets: usize,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: RateLimits,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    pub fn check_ip_limit(&self, ip: &str) -> bool {
        self.check_ip_limit_at(ip, Instant::now())
    }

    pub fn check_ip_limit_at(&self, ip: &str, now: Instant) -> bool {
        let mut state = self.lock();
        check_window(
            &mut state.ips,
            ip,
            now,
            self.limits.ip_window,
            self.limits.ip_max_requests,
        )
    }

    pub fn check_session_limit(&self, session_id: &str) -> bool {
        self.check_session_limit_at(session_id, Instant::now())
    }

    pub fn check_session_limit_at(&self, session_id: &str, now: Instant) -> bool {
        let mut state = self.lock();
        check_window(
            &mut state.sessions,
            session_id,
            now,
            self.limits.session_window,
            self.limits.session_max_requests,
        )
    }

    pub fn check_widget_limit(&self, widget_id: &str) -> WidgetDecision {
        self.check_widget_limit_at(widget_id, Instant::now())
    }

    /// Spacing is checked before the lifetime cap.
    pub fn check_widget_limit_at(&self, widget_id: &str, now: Instant) -> WidgetDecision {
        let mut state = self.lock();
        let Some(entry) = state.widgets.get_mut(widget_id) else {
            state.widgets.insert(
                widget_id.to_string(),
                WidgetEntry {
                    last_refresh: now,
                    total: 1,
                },
            );
            return WidgetDecision::allow();
        };

        if now.saturating_duration_since(entry.last_refresh) < self.limits.widget_min_interval {
            return WidgetDecision::reject(format!(
                "Too soon - minimum {} seconds between refreshes",
                self.limits.widget_min_interval.as_secs()
            ));
        }
        if entry.total >= self.limits.widget_max_refreshes {
            return WidgetDecision::reject(format!(
                "Widget refresh limit reached ({} refreshes)",
                self.limits.widget_max_refreshes
            ));
        }
        entry.last_refresh = now;
        entry.total += 1;
        WidgetDecision::allow()
    }

    /// Refreshes left before the widget's lifetime cap.
    pub fn remaining_refreshes(&self, widget_id: &str) -> u32 {
        let used = self.lock().widgets.get(widget_id).map_or(0, |e| e.total);
        self.limits.widget_max_refreshes.saturating_sub(used)
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Drop IP and session entries whose window has ended. Returns how many
    /// entries were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let before = state.ips.len() + state.sessions.len();
        let (ip_window, session_window) = (self.limits.ip_window, self.limits.session_window);
        state.ips.retain(|_, e| e.is_open(now, ip_window));
        state.sessions.retain(|_, e| e.is_open(now, session_window));
        let removed = before - (state.ips.len() + state.sessions.len());
        if removed > 0 {
            debug!(removed, "swept expired rate-limit entries");
        }
        removed
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.lock();
        LimiterStats {
            ips: state.ips.len(),
            sessions: state.sessions.len(),
            widgets: state.widgets.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_window(
    entries: &mut HashMap<String, WindowEntry>,
    key: &str,
    now: Instant,
    window: Duration,
    max: u32,
) -> bool {
    match entries.get_mut(key) {
        Some(entry) if entry.is_open(now, window) => {
            if entry.count >= max {
                return false;
            }
            entry.count += 1;
            true
        }
        _ => {
            entries.insert(
                key.to_string(),
                WindowEntry {
                    count: 1,
                    opened_at: now,
                },
            );
            true
        }
    }
}
