//! Value records passed between pipeline phases.
//!
//! A [`Plan`] decides what to build, a [`DataResult`] carries the payload that
//! populates it, and a [`Widget`] is the renderable tree handed back to the
//! caller. All three are immutable once validated; phases pass them by value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of renderable widget kinds. `Container` is the only kind that
/// may carry children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetKind {
    MetricCard,
    MetricGrid,
    List,
    Comparison,
    Chart,
    Timeline,
    Form,
    Gallery,
    Profile,
    Container,
    Quote,
    Recipe,
    Weather,
    StockTicker,
}

impl WidgetKind {
    pub const ALL: [WidgetKind; 14] = [
        WidgetKind::MetricCard,
        WidgetKind::MetricGrid,
        WidgetKind::List,
        WidgetKind::Comparison,
        WidgetKind::Chart,
        WidgetKind::Timeline,
        WidgetKind::Form,
        WidgetKind::Gallery,
        WidgetKind::Profile,
        WidgetKind::Container,
        WidgetKind::Quote,
        WidgetKind::Recipe,
        WidgetKind::Weather,
        WidgetKind::StockTicker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WidgetKind::MetricCard => "metric-card",
            WidgetKind::MetricGrid => "metric-grid",
            WidgetKind::List => "list",
            WidgetKind::Comparison => "comparison",
            WidgetKind::Chart => "chart",
            WidgetKind::Timeline => "timeline",
            WidgetKind::Form => "form",
            WidgetKind::Gallery => "gallery",
            WidgetKind::Profile => "profile",
            WidgetKind::Container => "container",
            WidgetKind::Quote => "quote",
            WidgetKind::Recipe => "recipe",
            WidgetKind::Weather => "weather",
            WidgetKind::StockTicker => "stock-ticker",
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the data for a widget comes from.
///
/// Also used as the caller-selected data mode, which overrides the plan's own
/// choice. Input accepts the older `mock-database`/`example-data` spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
    #[serde(alias = "mock-database")]
    InternalDatabase,
    WebSearch,
    #[serde(alias = "example-data")]
    SyntheticExample,
}

impl DataSource {
    pub const ALL: [DataSource; 3] = [
        DataSource::InternalDatabase,
        DataSource::WebSearch,
        DataSource::SyntheticExample,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::InternalDatabase => "internal-database",
            DataSource::WebSearch => "web-search",
            DataSource::SyntheticExample => "synthetic-example",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "internal-database" | "mock-database" => Some(DataSource::InternalDatabase),
            "web-search" => Some(DataSource::WebSearch),
            "synthetic-example" | "example-data" => Some(DataSource::SyntheticExample),
            _ => None,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            let allowed: Vec<&str> = Self::ALL.iter().map(|source| source.as_str()).collect();
            format!("unknown data source {s:?} (expected one of {})", allowed.join(", "))
        })
    }
}

/// Shape of the data the plan expects to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataStructure {
    SingleValue,
    List,
    Comparison,
    Timeseries,
    Grid,
}

impl DataStructure {
    pub const ALL: [DataStructure; 5] = [
        DataStructure::SingleValue,
        DataStructure::List,
        DataStructure::Comparison,
        DataStructure::Timeseries,
        DataStructure::Grid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataStructure::SingleValue => "single-value",
            DataStructure::List => "list",
            DataStructure::Comparison => "comparison",
            DataStructure::Timeseries => "timeseries",
            DataStructure::Grid => "grid",
        }
    }
}

impl fmt::Display for DataStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub const ALL: [Confidence; 3] = [Confidence::High, Confidence::Medium, Confidence::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Hover,
    Click,
    Slider,
    Toggle,
    Filter,
    Sort,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 6] = [
        InteractionKind::Hover,
        InteractionKind::Click,
        InteractionKind::Slider,
        InteractionKind::Toggle,
        InteractionKind::Filter,
        InteractionKind::Sort,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Hover => "hover",
            InteractionKind::Click => "click",
            InteractionKind::Slider => "slider",
            InteractionKind::Toggle => "toggle",
            InteractionKind::Filter => "filter",
            InteractionKind::Sort => "sort",
        }
    }
}

/// Decision produced by the planning phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub widget_type: WidgetKind,
    pub data_source: DataSource,
    /// Expected when `data_source` is web search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    /// Expected when `data_source` is the internal database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_intent: Option<String>,
    pub data_structure: DataStructure,
    pub key_entities: Vec<String>,
    /// Diagnostic only.
    #[serde(default)]
    pub reasoning: String,
}

impl Plan {
    /// Apply a caller-selected data mode over the plan's own choice.
    pub fn with_data_mode(mut self, mode: Option<DataSource>) -> Self {
        if let Some(mode) = mode {
            self.data_source = mode;
        }
        self
    }
}

/// Payload acquired for a widget plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResult {
    #[serde(default)]
    pub data: Value,
    pub source: Option<String>,
    pub confidence: Confidence,
}

impl DataResult {
    /// Result used when acquisition fails outright.
    pub fn empty() -> Self {
        Self {
            data: Value::Object(Map::new()),
            source: None,
            confidence: Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub effect: String,
}

/// Renderable widget tree.
///
/// `data` and `config` stay open maps because their shape depends on `kind`;
/// the per-kind expectations live in [`crate::core::schema::check_widget_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<Interaction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Widget>,
    /// Refresh period in milliseconds (at least 5000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<u64>,
    /// Set only by the refresh side channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl Widget {
    pub fn new(kind: WidgetKind, data: Value) -> Self {
        Self {
            kind,
            data,
            config: Map::new(),
            interactions: Vec::new(),
            children: Vec::new(),
            update_interval: None,
            last_updated: None,
        }
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Total number of nodes in this tree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Widget::node_count).sum::<usize>()
    }
}

/// Terminal payload of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetResponse {
    Widget {
        widget: Widget,
        source: Option<String>,
    },
    Text {
        #[serde(rename = "textResponse")]
        text_response: String,
        error: bool,
    },
}

impl WidgetResponse {
    pub fn widget(&self) -> Option<&Widget> {
        match self {
            WidgetResponse::Widget { widget, .. } => Some(widget),
            WidgetResponse::Text { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WidgetResponse::Text { error: true, .. })
    }
}
