//! Validation for plan, data and widget payloads.
//!
//! Structure (types, enums, required members, the container/children rule)
//! is checked against the JSON Schemas embedded from `schemas/`. The rules a
//! schema cannot express, such as source-dependent hints and per-kind data
//! sufficiency, live here as plain Rust.
//!
//! Validators never fail: they report path-qualified messages such as
//! `children[1].type: ...` and leave the retry/warn/abort decision to the
//! caller. Hard errors block the payload; warnings describe degraded but
//! renderable input.

use std::sync::LazyLock;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, ValidationError, Validator};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::types::{DataResult, DataSource, Plan, Widget, WidgetKind};

/// Minimum refresh period a widget may request, in milliseconds.
pub const MIN_UPDATE_INTERVAL_MS: u64 = 5_000;

pub const CHART_TYPES: [&str; 5] = ["line", "bar", "area", "pie", "radial"];

const PLAN_SCHEMA_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan.schema.json"
));
const DATA_SCHEMA_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/data.schema.json"
));
const WIDGET_SCHEMA_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/widget.schema.json"
));

static PLAN_SCHEMA: LazyLock<Validator> = LazyLock::new(|| compile(PLAN_SCHEMA_JSON));
static DATA_SCHEMA: LazyLock<Validator> = LazyLock::new(|| compile(DATA_SCHEMA_JSON));
static WIDGET_SCHEMA: LazyLock<Validator> = LazyLock::new(|| compile(WIDGET_SCHEMA_JSON));

/// Embedded schemas are fixed at build time; the tests below compile each one.
fn compile(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema is valid JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded schema compiles")
}

/// Outcome of validating one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation<T> {
    pub value: Option<T>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl<T> Validation<T> {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.value.is_some()
    }

    /// Errors joined for retry feedback.
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }

    fn finish(value: &Value, errors: Vec<String>, warnings: Vec<String>) -> Self
    where
        T: DeserializeOwned,
    {
        if !errors.is_empty() {
            return Self {
                value: None,
                errors,
                warnings,
            };
        }
        match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) => Self {
                value: Some(parsed),
                errors,
                warnings,
            },
            Err(err) => Self {
                value: None,
                errors: vec![err.to_string()],
                warnings,
            },
        }
    }
}

/// Validate a planning-phase payload.
pub fn validate_plan(value: &Value) -> Validation<Plan> {
    let errors = schema_errors(&PLAN_SCHEMA, value, "plan");
    let mut warnings = Vec::new();

    let text = |field: &str| value.get(field).and_then(Value::as_str);
    let blank = |field: &str| text(field).is_none_or(|s| s.trim().is_empty());
    match text("dataSource").and_then(DataSource::parse) {
        Some(DataSource::WebSearch) if blank("searchQuery") => {
            warnings.push("searchQuery: expected for web-search data source".to_string());
        }
        Some(DataSource::InternalDatabase) if blank("queryIntent") => {
            warnings.push("queryIntent: expected for internal-database data source".to_string());
        }
        _ => {}
    }

    Validation::finish(value, errors, warnings)
}

/// Validate a data-acquisition payload. `data` itself is left untyped.
pub fn validate_data(value: &Value) -> Validation<DataResult> {
    let errors = schema_errors(&DATA_SCHEMA, value, "data result");
    Validation::finish(value, errors, Vec::new())
}

/// Validate a widget tree, container children included.
pub fn validate_widget(value: &Value) -> Validation<Widget> {
    let errors = schema_errors(&WIDGET_SCHEMA, value, "widget");
    Validation::finish(value, errors, Vec::new())
}

fn schema_errors(schema: &Validator, value: &Value, root: &str) -> Vec<String> {
    schema
        .iter_errors(value)
        .map(|err| describe(&err, root))
        .collect()
}

fn describe(err: &ValidationError<'_>, root: &str) -> String {
    let path = dotted_path(&err.instance_path().to_string());
    if let ValidationErrorKind::Required { property } = err.kind() {
        let name = property.as_str().unwrap_or_default();
        return if path.is_empty() {
            format!("{name}: required")
        } else {
            format!("{path}.{name}: required")
        };
    }
    if path.is_empty() {
        format!("{root}: {err}")
    } else {
        format!("{path}: {err}")
    }
}

/// `/children/1/interactions/0/type` becomes `children[1].interactions[0].type`.
fn dotted_path(pointer: &str) -> String {
    let mut out = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.parse::<usize>().is_ok() {
            out.push('[');
            out.push_str(&segment);
            out.push(']');
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(&segment);
        }
    }
    out
}

/// Kind-specific data checks. Never blocks a widget; renderers degrade on
/// missing fields, so callers only log these.
pub fn check_widget_data(widget: &Widget) -> Vec<String> {
    let mut issues = Vec::new();
    check_node_data(widget, "", &mut issues);
    issues
}

fn check_node_data(widget: &Widget, prefix: &str, issues: &mut Vec<String>) {
    let kind = widget.kind;
    let data = widget.data.as_object();
    let has = |field: &str| data.and_then(|d| d.get(field)).is_some_and(|v| !v.is_null());
    let has_array = |field: &str| data.and_then(|d| d.get(field)).is_some_and(Value::is_array);

    let mut missing: Vec<&str> = Vec::new();
    let mut require = |ok: bool, field: &'static str| {
        if !ok {
            missing.push(field);
        }
    };
    match kind {
        WidgetKind::MetricCard => {
            require(has("label"), "data.label");
            require(has("value"), "data.value");
        }
        WidgetKind::MetricGrid => require(has_array("metrics"), "data.metrics"),
        WidgetKind::List | WidgetKind::Gallery => require(has_array("items"), "data.items"),
        WidgetKind::Comparison => require(has_array("options"), "data.options"),
        WidgetKind::Chart => {
            require(
                has_array("points") || has_array("datasets"),
                "data.points|data.datasets",
            );
            require(widget.config_str("chartType").is_some(), "config.chartType");
        }
        WidgetKind::Timeline => require(has_array("events"), "data.events"),
        WidgetKind::Form => require(has_array("fields"), "data.fields"),
        WidgetKind::Profile => require(has("name"), "data.name"),
        WidgetKind::Container => {
            require(widget.config_str("variant").is_some(), "config.variant");
            require(!widget.children.is_empty(), "children");
        }
        WidgetKind::Quote => {
            require(has("quote"), "data.quote");
            require(has("author"), "data.author");
        }
        WidgetKind::Recipe => {
            require(has_array("ingredients"), "data.ingredients");
            require(has_array("steps"), "data.steps");
        }
        WidgetKind::Weather => {
            require(has("location"), "data.location");
            require(has("temperature"), "data.temperature");
        }
        WidgetKind::StockTicker => {
            require(has("symbol"), "data.symbol");
            require(has("price"), "data.price");
        }
    }
    for field in missing {
        issues.push(format!("{prefix}{field}: required for {kind}"));
    }

    if kind == WidgetKind::Chart
        && let Some(chart) = widget.config_str("chartType")
        && !CHART_TYPES.contains(&chart)
    {
        issues.push(format!(
            "{prefix}config.chartType: unknown chart type {chart:?}"
        ));
    }

    for (idx, child) in widget.children.iter().enumerate() {
        check_node_data(child, &format!("{prefix}children[{idx}]."), issues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Confidence, DataStructure, InteractionKind};
    use serde_json::json;

    fn plan_json() -> Value {
        json!({
            "widgetType": "metric-card",
            "dataSource": "internal-database",
            "queryIntent": "Sum mrr from all active subscriptions",
            "dataStructure": "single-value",
            "keyEntities": ["MRR"],
            "reasoning": "internal metric"
        })
    }

    fn has_error(errors: &[String], prefix: &str) -> bool {
        errors.iter().any(|e| e.starts_with(prefix))
    }

    fn enum_strings(schema: &Value, pointer: &str) -> Vec<String> {
        schema
            .pointer(pointer)
            .and_then(Value::as_array)
            .expect("enum array")
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    fn names(all: &[&str]) -> Vec<String> {
        all.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn embedded_schemas_compile() {
        LazyLock::force(&PLAN_SCHEMA);
        LazyLock::force(&DATA_SCHEMA);
        LazyLock::force(&WIDGET_SCHEMA);
    }

    /// The schemas repeat the closed enums; keep both sides in step.
    #[test]
    fn schema_enums_match_types() {
        let plan: Value = serde_json::from_str(PLAN_SCHEMA_JSON).expect("plan schema");
        let data: Value = serde_json::from_str(DATA_SCHEMA_JSON).expect("data schema");
        let widget: Value = serde_json::from_str(WIDGET_SCHEMA_JSON).expect("widget schema");

        let kinds = names(&WidgetKind::ALL.map(WidgetKind::as_str));
        assert_eq!(enum_strings(&plan, "/properties/widgetType/enum"), kinds);
        assert_eq!(
            enum_strings(&widget, "/$defs/widget/properties/type/enum"),
            kinds
        );
        assert_eq!(
            enum_strings(&plan, "/properties/dataStructure/enum"),
            names(&DataStructure::ALL.map(DataStructure::as_str))
        );
        assert_eq!(
            enum_strings(&plan, "/properties/dataSource/enum")[..3],
            names(&DataSource::ALL.map(DataSource::as_str))[..]
        );
        assert_eq!(
            enum_strings(&data, "/properties/confidence/enum"),
            names(&Confidence::ALL.map(Confidence::as_str))
        );
        assert_eq!(
            enum_strings(&widget, "/$defs/interaction/properties/type/enum"),
            names(&InteractionKind::ALL.map(InteractionKind::as_str))
        );
        assert_eq!(
            widget
                .pointer("/$defs/widget/properties/updateInterval/minimum")
                .and_then(Value::as_u64),
            Some(MIN_UPDATE_INTERVAL_MS)
        );
    }

    #[test]
    fn pointer_becomes_dotted_path() {
        assert_eq!(dotted_path(""), "");
        assert_eq!(dotted_path("/keyEntities/1"), "keyEntities[1]");
        assert_eq!(
            dotted_path("/children/1/interactions/0/type"),
            "children[1].interactions[0].type"
        );
    }

    #[test]
    fn valid_plan_parses() {
        let result = validate_plan(&plan_json());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
        let plan = result.value.expect("plan");
        assert_eq!(plan.widget_type, WidgetKind::MetricCard);
        assert_eq!(plan.key_entities, vec!["MRR".to_string()]);
    }

    #[test]
    fn legacy_data_source_spelling_is_accepted() {
        let mut value = plan_json();
        value["dataSource"] = json!("mock-database");
        let result = validate_plan(&value);
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(
            result.value.expect("plan").data_source,
            DataSource::InternalDatabase
        );
    }

    #[test]
    fn plan_reports_every_bad_field() {
        let result = validate_plan(&json!({
            "widgetType": "hologram",
            "dataSource": "web-search",
            "keyEntities": ["ok", 3]
        }));
        assert!(!result.is_valid());
        assert!(has_error(&result.errors, "widgetType: "));
        assert!(result.error_summary().contains("hologram"));
        assert!(result.errors.contains(&"dataStructure: required".to_string()));
        assert!(has_error(&result.errors, "keyEntities[1]: "));
    }

    #[test]
    fn null_reasoning_is_rejected() {
        let mut value = plan_json();
        value["reasoning"] = Value::Null;
        let result = validate_plan(&value);
        assert!(!result.is_valid());
        assert_eq!(
            result.errors,
            vec!["invalid type: null, expected a string".to_string()]
        );
    }

    #[test]
    fn non_object_plan_is_reported_at_root() {
        let result = validate_plan(&json!([1, 2]));
        assert!(!result.is_valid());
        assert!(has_error(&result.errors, "plan: "));
    }

    #[test]
    fn missing_search_query_only_warns() {
        let result = validate_plan(&json!({
            "widgetType": "weather",
            "dataSource": "web-search",
            "searchQuery": null,
            "dataStructure": "single-value",
            "keyEntities": ["Stockholm"]
        }));
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(
            result.warnings,
            vec!["searchQuery: expected for web-search data source".to_string()]
        );
    }

    #[test]
    fn data_requires_source_key_and_known_confidence() {
        let ok = validate_data(&json!({"data": {"value": 1}, "source": null, "confidence": "high"}));
        assert!(ok.is_valid());

        let bad = validate_data(&json!({"data": {}, "confidence": "certain"}));
        assert!(!bad.is_valid());
        assert!(bad.errors.contains(&"source: required".to_string()));
        assert!(has_error(&bad.errors, "confidence: "));
    }

    #[test]
    fn data_payload_is_untyped() {
        let result = validate_data(&json!({"data": [1, 2, 3], "source": "example.com", "confidence": "low"}));
        assert!(result.is_valid());
        assert_eq!(result.value.expect("data").data, json!([1, 2, 3]));
    }

    #[test]
    fn container_without_children_is_rejected() {
        let result = validate_widget(&json!({"type": "container", "config": {"variant": "tabs"}}));
        assert!(!result.is_valid());
        assert_eq!(result.errors, vec!["children: required".to_string()]);

        let empty = validate_widget(&json!({"type": "container", "children": []}));
        assert!(!empty.is_valid());
        assert!(empty.errors.iter().all(|e| e.starts_with("children")));
    }

    #[test]
    fn container_with_valid_children_is_accepted() {
        let result = validate_widget(&json!({
            "type": "container",
            "config": {"variant": "tabs", "labels": ["Now", "Trend"]},
            "children": [
                {"type": "metric-card", "data": {"label": "Temp", "value": 3}},
                {"type": "chart", "config": {"chartType": "line"}, "data": {"points": []}}
            ]
        }));
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.value.expect("widget").node_count(), 3);
    }

    #[test]
    fn non_container_with_children_is_rejected() {
        let result = validate_widget(&json!({
            "type": "list",
            "data": {"items": []},
            "children": [{"type": "metric-card"}]
        }));
        assert!(!result.is_valid());
        assert!(has_error(&result.errors, "children: "));
    }

    #[test]
    fn nested_errors_carry_child_paths() {
        let result = validate_widget(&json!({
            "type": "container",
            "children": [
                {"type": "chart"},
                {"type": "sparkle", "interactions": [{"type": "wiggle"}]}
            ]
        }));
        assert!(!result.is_valid());
        assert!(has_error(&result.errors, "children[1].type: "));
        assert!(has_error(&result.errors, "children[1].interactions[0].type: "));
        assert!(
            result
                .errors
                .contains(&"children[1].interactions[0].effect: required".to_string())
        );
        assert!(!has_error(&result.errors, "children[0]"));
    }

    #[test]
    fn update_interval_has_a_floor() {
        let fast = validate_widget(&json!({"type": "stock-ticker", "updateInterval": 1000}));
        assert!(has_error(&fast.errors, "updateInterval: "));

        let fractional = validate_widget(&json!({"type": "stock-ticker", "updateInterval": 6000.5}));
        assert!(has_error(&fractional.errors, "updateInterval: "));

        let ok = validate_widget(&json!({"type": "stock-ticker", "updateInterval": 5000}));
        assert_eq!(ok.value.expect("widget").update_interval, Some(5000));
    }

    #[test]
    fn sufficiency_flags_missing_kind_fields() {
        let widget: Widget = serde_json::from_value(json!({
            "type": "container",
            "children": [
                {"type": "list", "data": {"title": "Steps"}},
                {"type": "chart", "config": {"chartType": "donut"}, "data": {"datasets": []}}
            ]
        }))
        .expect("widget");

        let issues = check_widget_data(&widget);
        assert_eq!(
            issues,
            vec![
                "config.variant: required for container".to_string(),
                "children[0].data.items: required for list".to_string(),
                "children[1].config.chartType: unknown chart type \"donut\"".to_string(),
            ]
        );
    }

    #[test]
    fn sufficient_metric_card_has_no_issues() {
        let widget = Widget::new(
            WidgetKind::MetricCard,
            json!({"label": "Total MRR", "value": 2943, "unit": "$"}),
        );
        assert!(check_widget_data(&widget).is_empty());
    }
}
