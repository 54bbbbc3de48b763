//! HTTP route handlers for the widget API.

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use widgetgen::core::types::{DataSource, Plan};
use widgetgen::refresh::{LimitScope, RefreshOutcome, RefreshRequest, refresh_data};

use crate::sse::{StreamRequest, update_stream};
use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stream", post(stream))
        .route("/refresh", post(refresh))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub data_mode: Option<DataSource>,
}

/// POST /api/stream - run the pipeline, one SSE `data:` frame per update.
async fn stream(State(state): State<AppState>, Json(body): Json<StreamBody>) -> Response {
    if body.message.trim().is_empty() {
        return bad_request("Message is required");
    }
    info!(data_mode = ?body.data_mode, "stream request");
    update_stream(
        state.orchestrator,
        StreamRequest {
            message: body.message,
            model: body.model,
            data_mode: body.data_mode,
        },
    )
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    pub plan: Option<Plan>,
    pub query: Option<String>,
    #[serde(default)]
    pub data_mode: Option<DataSource>,
    pub widget_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// POST /api/refresh - re-acquire data for a rendered widget.
///
/// Malformed or incomplete bodies are a 400, not axum's default 422.
async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RefreshBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed refresh body");
            return bad_request("Invalid request body");
        }
    };
    let (Some(plan), Some(query), Some(widget_id)) = (body.plan, body.query, body.widget_id) else {
        return bad_request("Missing required fields: plan, query, widgetId");
    };
    let request = RefreshRequest {
        plan,
        query,
        data_mode: body.data_mode,
        widget_id,
        client_ip: client_ip(&headers),
        session_id: body.session_id.filter(|s| !s.trim().is_empty()),
        model: body.model,
    };

    let orchestrator = state.orchestrator;
    let limiter = state.limiter;
    let outcome =
        tokio::task::spawn_blocking(move || refresh_data(&*orchestrator, &limiter, &request)).await;

    match outcome {
        Ok(RefreshOutcome::Refreshed(data)) => Json(data).into_response(),
        Ok(RefreshOutcome::RateLimited(rejection)) => {
            let error = match rejection.scope {
                LimitScope::Ip => "Rate limit exceeded",
                LimitScope::Session => "Session rate limit exceeded",
                LimitScope::Widget => "Widget refresh limit exceeded",
            };
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": error,
                    "message": rejection.reason,
                    "paused": rejection.paused,
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "refresh task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to refresh data" })),
            )
                .into_response()
        }
    }
}

/// First `x-forwarded-for` entry, then `x-real-ip`, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(ip) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }
    header("x-real-ip").unwrap_or("unknown").to_string()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::extract::FromRequest;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{HeaderValue, Request};
    use serde_json::Value;
    use widgetgen::core::progress::Phase;
    use widgetgen::io::agent::Agent;
    use widgetgen::orchestrator::Orchestrator;
    use widgetgen::phases::PipelineSettings;
    use widgetgen::rate_limit::{RateLimiter, RateLimits};
    use widgetgen::retry::RetryPolicy;
    use widgetgen::test_support::{ScriptedAgent, data_json, failure, plan_json, reply};

    use super::*;

    fn state(agent: ScriptedAgent, limits: RateLimits) -> AppState {
        let settings = PipelineSettings {
            retry: RetryPolicy {
                max_retries: 0,
                backoff: Duration::ZERO,
            },
            ..PipelineSettings::default()
        };
        let agent: Arc<dyn Agent> = Arc::new(agent);
        let orchestrator = Orchestrator::new(agent, settings).expect("orchestrator");
        AppState::new(Arc::new(orchestrator), RateLimiter::new(limits), Duration::from_secs(300))
    }

    fn ticker_agent() -> ScriptedAgent {
        ScriptedAgent::by_phase(vec![
            (Phase::Planning, plan_json("stock-ticker", "web-search", "single-value")),
            (
                Phase::Searching,
                data_json(json!({"symbol": "TSLA", "price": 258.4}), "finance.example.com", "high"),
            ),
            (
                Phase::Generating,
                r#"{"type":"stock-ticker","data":{"symbol":"TSLA","price":258.4},"updateInterval":60000}"#.to_string(),
            ),
        ])
    }

    fn refresh_body(widget_id: &str) -> RefreshBody {
        RefreshBody {
            plan: serde_json::from_str(&plan_json("stock-ticker", "web-search", "single-value")).ok(),
            query: Some("What's Tesla stock price?".to_string()),
            data_mode: None,
            widget_id: Some(widget_id.to_string()),
            session_id: None,
            model: None,
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers), "10.0.0.9");
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[tokio::test]
    async fn blank_stream_message_is_bad_request() {
        let agent = ScriptedAgent::new(|_| failure("unused"));
        let response = stream(
            State(state(agent, RateLimits::default())),
            Json(StreamBody {
                message: "  ".to_string(),
                model: None,
                data_mode: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_emits_one_frame_per_update_ending_in_complete() {
        let response = stream(
            State(state(ticker_agent(), RateLimits::default())),
            Json(StreamBody {
                message: "What's Tesla stock price?".to_string(),
                model: None,
                data_mode: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        let frames: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).expect("frame json"))
            .collect();

        assert!(frames.iter().any(|f| f["type"] == "plan"));
        let last = frames.last().expect("frames");
        assert_eq!(last["type"], "complete");
        assert_eq!(last["response"]["widget"]["type"], "stock-ticker");
        assert_eq!(last["response"]["source"], "finance.example.com");
        assert_eq!(frames.iter().filter(|f| f["type"] == "complete").count(), 1);
    }

    #[tokio::test]
    async fn refresh_missing_fields_is_bad_request() {
        let agent = ScriptedAgent::new(|_| failure("unused"));
        let body = RefreshBody {
            widget_id: None,
            ..refresh_body("w1")
        };
        let response = refresh(State(state(agent, RateLimits::default())), HeaderMap::new(), Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    async fn extract_refresh_body(raw: &'static str) -> Result<Json<RefreshBody>, JsonRejection> {
        let request = Request::builder()
            .method("POST")
            .uri("/api/refresh")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(raw))
            .expect("request");
        Json::<RefreshBody>::from_request(request, &()).await
    }

    #[tokio::test]
    async fn malformed_refresh_plan_is_bad_request() {
        let agent = ScriptedAgent::new(|_| failure("unused"));
        let body = extract_refresh_body(
            r#"{"plan": {"widgetType": 7}, "query": "q", "widgetId": "w1"}"#,
        )
        .await;
        assert!(body.is_err());

        let response = refresh(State(state(agent, RateLimits::default())), HeaderMap::new(), body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Invalid request body");
    }

    #[tokio::test]
    async fn well_formed_refresh_body_extracts() {
        let body = extract_refresh_body(
            r#"{"plan": {"widgetType": "stock-ticker", "dataSource": "web-search", "dataStructure": "single-value", "keyEntities": ["TSLA"]}, "query": "q", "widgetId": "w1", "sessionId": "s1"}"#,
        )
        .await
        .expect("valid body");
        assert_eq!(body.widget_id.as_deref(), Some("w1"));
        assert_eq!(body.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn refresh_returns_data_then_pauses_widget() {
        let app = state(
            ScriptedAgent::new(|_| reply(&data_json(json!({"symbol": "TSLA", "price": 259.1}), "finance.example.com", "high"))),
            RateLimits::default(),
        );

        let response = refresh(State(app.clone()), HeaderMap::new(), Ok(Json(refresh_body("w1")))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["price"], 259.1);
        assert_eq!(body["remainingRefreshes"], 49);
        assert!(body["refreshedAt"].is_string());

        let response = refresh(State(app), HeaderMap::new(), Ok(Json(refresh_body("w1")))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Widget refresh limit exceeded");
        assert_eq!(body["paused"], true);
    }

    #[tokio::test]
    async fn refresh_ip_limit_is_not_paused() {
        let app = state(
            ScriptedAgent::new(|_| reply(&data_json(json!({"price": 1}), "x", "low"))),
            RateLimits {
                ip_max_requests: 1,
                ..RateLimits::default()
            },
        );
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4"));

        let first = refresh(State(app.clone()), headers.clone(), Ok(Json(refresh_body("w1")))).await;
        assert_eq!(first.status(), StatusCode::OK);
        let second = refresh(State(app), headers, Ok(Json(refresh_body("w2")))).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(second).await;
        assert_eq!(body["paused"], false);
        assert_eq!(body["message"], "Too many refresh requests from this IP. Limit: 1 per hour.");
    }
}
