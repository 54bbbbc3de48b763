//! Refresh-only entry point: re-run data acquisition for a rendered widget.
//!
//! Every call is gated by the rate limiter. Checks run in order: client IP,
//! session (only when a session id is supplied), widget instance. A rejection
//! is a normal outcome, not an error.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::types::{Confidence, DataSource, Plan};
use crate::io::agent::Agent;
use crate::orchestrator::Orchestrator;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub plan: Plan,
    pub query: String,
    pub data_mode: Option<DataSource>,
    pub widget_id: String,
    pub client_ip: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
}

/// Fresh data for a widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedData {
    pub data: Value,
    pub source: Option<String>,
    pub confidence: Confidence,
    /// RFC 3339, UTC.
    pub refreshed_at: String,
    pub remaining_refreshes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Ip,
    Session,
    Widget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub scope: LimitScope,
    /// User-facing explanation.
    pub reason: String,
    /// The widget should stop auto-refreshing.
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed(RefreshedData),
    RateLimited(Rejection),
}

#[instrument(skip_all, fields(widget_id = %request.widget_id, ip = %request.client_ip))]
pub fn refresh_data<A: Agent>(
    orchestrator: &Orchestrator<A>,
    limiter: &RateLimiter,
    request: &RefreshRequest,
) -> RefreshOutcome {
    if let Some(rejection) = check_limits(limiter, request) {
        warn!(scope = ?rejection.scope, reason = %rejection.reason, "refresh rate limited");
        return RefreshOutcome::RateLimited(rejection);
    }

    let data = orchestrator.acquire_data(
        &request.query,
        &request.plan,
        request.data_mode,
        request.model.as_deref(),
    );
    let remaining_refreshes = limiter.remaining_refreshes(&request.widget_id);
    info!(remaining_refreshes, "widget refreshed");

    RefreshOutcome::Refreshed(RefreshedData {
        data: data.data,
        source: data.source,
        confidence: data.confidence,
        refreshed_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        remaining_refreshes,
    })
}

fn check_limits(limiter: &RateLimiter, request: &RefreshRequest) -> Option<Rejection> {
    let limits = limiter.limits();
    if !limiter.check_ip_limit(&request.client_ip) {
        return Some(Rejection {
            scope: LimitScope::Ip,
            reason: format!(
                "Too many refresh requests from this IP. Limit: {} per hour.",
                limits.ip_max_requests
            ),
            paused: false,
        });
    }
    if let Some(session_id) = request.session_id.as_deref()
        && !limiter.check_session_limit(session_id)
    {
        return Some(Rejection {
            scope: LimitScope::Session,
            reason: format!(
                "Session refresh limit reached ({} per day).",
                limits.session_max_requests
            ),
            paused: false,
        });
    }
    let decision = limiter.check_widget_limit(&request.widget_id);
    if !decision.allowed {
        return Some(Rejection {
            scope: LimitScope::Widget,
            reason: decision
                .reason
                .unwrap_or_else(|| "Widget refresh limit reached".to_string()),
            paused: true,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::Phase;
    use crate::core::types::{DataStructure, WidgetKind};
    use crate::phases::PipelineSettings;
    use crate::rate_limit::RateLimits;
    use crate::test_support::{ScriptedAgent, reply};

    fn request(widget_id: &str, session: Option<&str>) -> RefreshRequest {
        RefreshRequest {
            plan: Plan {
                widget_type: WidgetKind::StockTicker,
                data_source: DataSource::WebSearch,
                search_query: Some("TSLA stock price".to_string()),
                query_intent: None,
                data_structure: DataStructure::SingleValue,
                key_entities: vec!["Tesla".to_string()],
                reasoning: String::new(),
            },
            query: "What's Tesla stock price?".to_string(),
            data_mode: None,
            widget_id: widget_id.to_string(),
            client_ip: "10.0.0.1".to_string(),
            session_id: session.map(str::to_string),
            model: None,
        }
    }

    fn agent() -> ScriptedAgent {
        ScriptedAgent::new(|_| {
            reply(r#"{"data":{"symbol":"TSLA","price":258.4},"source":"finance.example.com","confidence":"high"}"#)
        })
    }

    #[test]
    fn refresh_returns_new_data_and_remaining_budget() {
        let agent = agent();
        let orchestrator = Orchestrator::new(&agent, PipelineSettings::default()).expect("orchestrator");
        let limiter = RateLimiter::default();

        let RefreshOutcome::Refreshed(refreshed) = refresh_data(&orchestrator, &limiter, &request("w1", None)) else {
            panic!("expected refreshed data");
        };
        assert_eq!(refreshed.data["symbol"], "TSLA");
        assert_eq!(refreshed.source.as_deref(), Some("finance.example.com"));
        assert_eq!(refreshed.remaining_refreshes, 49);
        assert!(chrono::DateTime::parse_from_rfc3339(&refreshed.refreshed_at).is_ok());
        assert_eq!(agent.calls_for(Phase::Searching), 1);

        let json = serde_json::to_value(&refreshed).expect("serialize");
        assert!(json.get("refreshedAt").is_some());
        assert!(json.get("remainingRefreshes").is_some());
    }

    #[test]
    fn immediate_second_refresh_is_paused_without_calling_agent() {
        let agent = agent();
        let orchestrator = Orchestrator::new(&agent, PipelineSettings::default()).expect("orchestrator");
        let limiter = RateLimiter::default();

        refresh_data(&orchestrator, &limiter, &request("w1", None));
        let RefreshOutcome::RateLimited(rejection) = refresh_data(&orchestrator, &limiter, &request("w1", None)) else {
            panic!("expected rate limit");
        };
        assert_eq!(rejection.scope, LimitScope::Widget);
        assert!(rejection.paused);
        assert!(rejection.reason.starts_with("Too soon"));
        assert_eq!(agent.requests().len(), 1);
    }

    #[test]
    fn ip_limit_is_checked_first() {
        let agent = agent();
        let orchestrator = Orchestrator::new(&agent, PipelineSettings::default()).expect("orchestrator");
        let limiter = RateLimiter::new(RateLimits {
            ip_max_requests: 1,
            session_max_requests: 1,
            ..RateLimits::default()
        });

        refresh_data(&orchestrator, &limiter, &request("w1", Some("s1")));
        let RefreshOutcome::RateLimited(rejection) = refresh_data(&orchestrator, &limiter, &request("w2", Some("s1"))) else {
            panic!("expected rate limit");
        };
        assert_eq!(rejection.scope, LimitScope::Ip);
        assert!(!rejection.paused);
        assert_eq!(
            rejection.reason,
            "Too many refresh requests from this IP. Limit: 1 per hour."
        );
    }

    #[test]
    fn session_limit_applies_only_with_session_id() {
        let agent = agent();
        let orchestrator = Orchestrator::new(&agent, PipelineSettings::default()).expect("orchestrator");
        let limiter = RateLimiter::new(RateLimits {
            session_max_requests: 1,
            ..RateLimits::default()
        });

        refresh_data(&orchestrator, &limiter, &request("w1", Some("s1")));
        let outcome = refresh_data(&orchestrator, &limiter, &request("w2", Some("s1")));
        assert!(matches!(
            outcome,
            RefreshOutcome::RateLimited(Rejection { scope: LimitScope::Session, .. })
        ));
        let outcome = refresh_data(&orchestrator, &limiter, &request("w3", None));
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
    }
}
