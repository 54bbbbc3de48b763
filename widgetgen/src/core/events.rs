//! Raw agent stream events and the update events emitted to callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::progress::Phase;
use crate::core::types::{DataResult, Plan, WidgetResponse};

/// Event type carried in the `type` field of an agent stream line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEventKind {
    System,
    User,
    Thinking,
    ToolCall,
    Assistant,
    Result,
    Other,
}

/// One line of the agent's `stream-json` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub part_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl AgentEvent {
    /// Bare event with only `type` and `subtype` set.
    pub fn new(event_type: &str, subtype: Option<&str>) -> Self {
        Self {
            event_type: event_type.to_string(),
            subtype: subtype.map(str::to_string),
            session_id: None,
            message: None,
            tool_call: None,
            model: None,
            duration_ms: None,
            is_error: None,
            result: None,
        }
    }

    /// Assistant event carrying a single text part.
    pub fn assistant(text: &str) -> Self {
        Self {
            message: Some(AgentMessage {
                role: Some("assistant".to_string()),
                content: vec![ContentPart {
                    part_type: Some("text".to_string()),
                    text: Some(text.to_string()),
                }],
            }),
            ..Self::new("assistant", None)
        }
    }

    pub fn kind(&self) -> AgentEventKind {
        match self.event_type.as_str() {
            "system" => AgentEventKind::System,
            "user" => AgentEventKind::User,
            "thinking" => AgentEventKind::Thinking,
            "tool_call" => AgentEventKind::ToolCall,
            "assistant" => AgentEventKind::Assistant,
            "result" => AgentEventKind::Result,
            _ => AgentEventKind::Other,
        }
    }

    pub fn subtype_is(&self, subtype: &str) -> bool {
        self.subtype.as_deref() == Some(subtype)
    }

    /// Text of the first content part, if any.
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_ref()?
            .content
            .first()?
            .text
            .as_deref()
    }

    /// Tool name from `tool_call.name`, or the first key of the tool payload.
    pub fn tool_name(&self) -> Option<&str> {
        let call = self.tool_call.as_ref()?.as_object()?;
        if let Some(name) = call.get("name").and_then(Value::as_str) {
            return Some(name);
        }
        call.keys().next().map(String::as_str)
    }

    /// Whether a `result` event reports failure.
    pub fn reports_error(&self) -> bool {
        self.is_error == Some(true)
            || self
                .subtype
                .as_deref()
                .is_some_and(|s| s.starts_with("error"))
    }
}

/// Parse one stdout line. Blank or non-JSON lines yield `None`.
pub fn parse_event_line(line: &str) -> Option<AgentEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Tagged update delivered to the caller while a request runs.
///
/// Order per request: progress/agent events interleaved by phase, one `plan`,
/// one `data`, then exactly one terminal `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    Progress {
        phase: Phase,
        message: String,
        progress: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtext: Option<String>,
    },
    AgentEvent {
        phase: Phase,
        message: String,
        /// Unix milliseconds.
        timestamp: i64,
    },
    Plan {
        plan: Plan,
    },
    Data {
        #[serde(rename = "dataResult")]
        data_result: DataResult,
    },
    Complete {
        response: WidgetResponse,
    },
}

impl UpdateEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, UpdateEvent::Complete { .. })
    }
}
