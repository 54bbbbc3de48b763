//! Shared application state for the widget server.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use widgetgen::io::agent::Agent;
use widgetgen::io::config::GenConfig;
use widgetgen::orchestrator::Orchestrator;
use widgetgen::rate_limit::{RateLimiter, RateLimits};

pub type SharedOrchestrator = Arc<Orchestrator<Arc<dyn Agent>>>;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SharedOrchestrator,
    /// One limiter per process; counters are never persisted.
    pub limiter: Arc<RateLimiter>,
    pub sweep_interval: Duration,
}

impl AppState {
    pub fn new(orchestrator: SharedOrchestrator, limiter: RateLimiter, sweep_interval: Duration) -> Self {
        Self {
            orchestrator,
            limiter: Arc::new(limiter),
            sweep_interval,
        }
    }

    pub fn from_config(agent: Arc<dyn Agent>, cfg: &GenConfig) -> anyhow::Result<Self> {
        let orchestrator = Orchestrator::from_config(agent, cfg)?;
        Ok(Self::new(
            Arc::new(orchestrator),
            RateLimiter::new(RateLimits::from(&cfg.rate_limit)),
            Duration::from_secs(cfg.rate_limit.sweep_interval_secs),
        ))
    }

    /// Periodically drop expired IP and session windows.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let limiter = Arc::clone(&self.limiter);
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            tick.tick().await;
            loop {
                tick.tick().await;
                let removed = limiter.sweep();
                let stats = limiter.stats();
                debug!(
                    removed,
                    ips = stats.ips,
                    sessions = stats.sessions,
                    widgets = stats.widgets,
                    "rate limiter sweep"
                );
            }
        })
    }
}
