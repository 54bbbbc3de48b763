//! Guaranteed substitutes used when a phase or the whole pipeline gives up.
//!
//! Nothing here performs I/O, so none of it can fail.

use serde_json::{Map, Value, json};

use crate::core::types::{DataSource, DataStructure, Plan, Widget, WidgetKind};

pub const FALLBACK_PLAN_REASONING: &str = "Fallback plan due to planning failure";

/// Plan used when planning exhausts its retries.
pub fn fallback_plan(query: &str) -> Plan {
    Plan {
        widget_type: WidgetKind::MetricCard,
        data_source: DataSource::SyntheticExample,
        search_query: None,
        query_intent: None,
        data_structure: DataStructure::SingleValue,
        key_entities: vec![query.to_string()],
        reasoning: FALLBACK_PLAN_REASONING.to_string(),
    }
}

/// Terminal metric card that apologises and echoes the original query.
///
/// `activity` completes the sentence "I encountered an issue while ...".
pub fn apology_widget(query: &str, activity: &str) -> Widget {
    let mut config = Map::new();
    config.insert("variant".to_string(), Value::from("warning"));
    config.insert("size".to_string(), Value::from("md"));

    let mut widget = Widget::new(
        WidgetKind::MetricCard,
        json!({
            "label": "Unable to complete request",
            "value": "⚠️",
            "description": format!(
                "I encountered an issue while {activity}. Please try rephrasing your question or try again."
            ),
            "context": query,
        }),
    );
    widget.config = config;
    widget
}
