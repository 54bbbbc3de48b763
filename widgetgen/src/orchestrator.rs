//! End-to-end generation with a fallback chain that always completes.
//!
//! Strategy order for one request:
//! 1. the full pipeline with the caller's data mode (or the plan's own choice)
//! 2. the full pipeline again with `synthetic-example` forced, unless the
//!    caller already asked for it
//! 3. a guaranteed apology widget built without any I/O
//!
//! Exactly one `complete` event is emitted per request and it is always last.

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::events::UpdateEvent;
use crate::core::fallback::apology_widget;
use crate::core::pipeline::Generation;
use crate::core::progress::Phase;
use crate::core::schema::check_widget_data;
use crate::core::types::{DataResult, DataSource, Plan, Widget, WidgetResponse};
use crate::io::agent::Agent;
use crate::io::config::GenConfig;
use crate::io::prompt::PromptEngine;
use crate::phases::{EventSink, PhaseRunner, PipelineSettings};

pub const EMPTY_MESSAGE_RESPONSE: &str = "Please enter a question so I can build a widget for you.";

/// Which strategy produced the terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Primary,
    SyntheticFallback,
    Guaranteed,
    /// Blank input; answered with an error text response.
    Rejected,
}

impl Outcome {
    pub fn is_degraded(self) -> bool {
        matches!(self, Outcome::Guaranteed | Outcome::Rejected)
    }
}

pub struct Orchestrator<A> {
    agent: A,
    settings: PipelineSettings,
    prompts: PromptEngine,
}

impl<A: Agent> Orchestrator<A> {
    pub fn new(agent: A, settings: PipelineSettings) -> Result<Self> {
        Ok(Self {
            agent,
            settings,
            prompts: PromptEngine::new()?,
        })
    }

    pub fn from_config(agent: A, cfg: &GenConfig) -> Result<Self> {
        Self::new(agent, PipelineSettings::from(cfg))
    }

    /// Run one request, streaming updates to `on_update`.
    ///
    /// Never fails: the final event is always `complete`.
    #[instrument(skip_all, fields(model = model.unwrap_or(self.settings.default_model.as_str()), data_mode = ?data_mode))]
    pub fn run(
        &self,
        message: &str,
        model: Option<&str>,
        data_mode: Option<DataSource>,
        on_update: &mut dyn FnMut(UpdateEvent),
    ) -> Outcome {
        let mut sink = EventSink::new(on_update);
        let query = message.trim();
        if query.is_empty() {
            sink.emit(UpdateEvent::Complete {
                response: WidgetResponse::Text {
                    text_response: EMPTY_MESSAGE_RESPONSE.to_string(),
                    error: true,
                },
            });
            return Outcome::Rejected;
        }
        let model = self.resolve_model(model);

        match self.attempt(query, model, data_mode, &mut sink) {
            Ok(response) => {
                sink.emit(UpdateEvent::Complete { response });
                return Outcome::Primary;
            }
            Err(e) => warn!(step = "fallback", err = %format!("{e:#}"), "primary pipeline failed"),
        }

        if data_mode != Some(DataSource::SyntheticExample) {
            info!(step = "fallback", "retrying with synthetic example data");
            sink.restart();
            sink.emit(UpdateEvent::Progress {
                phase: Phase::Preparing,
                message: "Trying alternative approach".to_string(),
                progress: 15,
                subtext: Some("Using example data".to_string()),
            });
            match self.attempt(query, model, Some(DataSource::SyntheticExample), &mut sink) {
                Ok(response) => {
                    sink.emit(UpdateEvent::Complete { response });
                    return Outcome::SyntheticFallback;
                }
                Err(e) => {
                    warn!(step = "fallback", err = %format!("{e:#}"), "synthetic fallback failed");
                }
            }
        }

        warn!(step = "fallback", "emitting guaranteed widget");
        sink.emit(UpdateEvent::Complete {
            response: WidgetResponse::Widget {
                widget: apology_widget(query, "generating your widget"),
                source: None,
            },
        });
        Outcome::Guaranteed
    }

    /// Run a request and return only its terminal response.
    pub fn answer(
        &self,
        message: &str,
        model: Option<&str>,
        data_mode: Option<DataSource>,
    ) -> WidgetResponse {
        let mut terminal = None;
        self.run(message, model, data_mode, &mut |event: UpdateEvent| {
            if let UpdateEvent::Complete { response } = event {
                terminal = Some(response);
            }
        });
        terminal.unwrap_or_else(|| WidgetResponse::Text {
            text_response: EMPTY_MESSAGE_RESPONSE.to_string(),
            error: true,
        })
    }

    /// Re-run only data acquisition for an existing plan. Emits nothing.
    pub fn acquire_data(
        &self,
        query: &str,
        plan: &Plan,
        data_mode: Option<DataSource>,
        model: Option<&str>,
    ) -> DataResult {
        let plan = plan.clone().with_data_mode(data_mode);
        let model = self.resolve_model(model);
        info!(step = "data", "{}", describe_data_branch(&plan));
        let data = self
            .runner(model)
            .acquire_data(query, &plan, &mut EventSink::discard());
        info!(step = "data", "{}", describe_data(&data));
        data
    }

    fn attempt(
        &self,
        query: &str,
        model: &str,
        data_mode: Option<DataSource>,
        sink: &mut EventSink<'_>,
    ) -> Result<WidgetResponse> {
        let runner = self.runner(model);
        let mut generation = Generation::new();

        sink.emit(Phase::Planning.progress_event());
        let plan = runner.plan(query, sink).with_data_mode(data_mode);
        info!(step = "planning", "{}", describe_plan(&plan));
        sink.emit(UpdateEvent::Plan { plan: plan.clone() });
        generation.record_plan(plan.clone())?;

        sink.emit(Phase::for_source(plan.data_source).progress_event());
        info!(step = "data", "{}", describe_data_branch(&plan));
        let data = runner.acquire_data(query, &plan, sink);
        info!(step = "data", "{}", describe_data(&data));
        sink.emit(UpdateEvent::Data {
            data_result: data.clone(),
        });
        generation.record_data(data.clone())?;

        sink.emit(Phase::Generating.progress_event());
        let widget = match runner.generate_widget(query, &plan, &data, sink) {
            Ok(widget) => widget,
            Err(e) => {
                let stage = generation.fail();
                let kind = generation.plan().map_or("unplanned", |p| p.widget_type.as_str());
                return Err(e.context(format!("pipeline failed during {stage} ({kind} widget)")));
            }
        };
        generation.record_widget(widget)?;

        sink.emit(Phase::Validating.progress_event());
        if let Some(widget) = generation.widget() {
            let issues = check_widget_data(widget);
            if !issues.is_empty() {
                if self.settings.debug {
                    warn!(step = "validation", issues = ?issues, "widget data looks incomplete");
                } else {
                    warn!(step = "validation", count = issues.len(), "widget data looks incomplete");
                }
            }
        }
        let (widget, source) = generation.complete()?;
        info!(step = "widget", "{}", describe_widget(&widget));
        Ok(WidgetResponse::Widget { widget, source })
    }

    fn runner<'a>(&'a self, model: &'a str) -> PhaseRunner<'a, A> {
        PhaseRunner::new(&self.agent, &self.prompts, &self.settings, model)
    }

    fn resolve_model<'a>(&'a self, model: Option<&'a str>) -> &'a str {
        model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.settings.default_model.as_str())
    }
}

fn describe_plan(plan: &Plan) -> String {
    format!(
        "Plan: {} from {} as {} (entities: {})",
        plan.widget_type,
        plan.data_source,
        plan.data_structure,
        plan.key_entities.join(", ")
    )
}

fn describe_data_branch(plan: &Plan) -> String {
    match plan.data_source {
        DataSource::InternalDatabase => format!(
            "Querying internal database: {}",
            truncate(plan.query_intent.as_deref().unwrap_or("(no intent)"), 80)
        ),
        DataSource::WebSearch => format!(
            "Searching the web for: {}",
            truncate(plan.search_query.as_deref().unwrap_or("(no query)"), 80)
        ),
        DataSource::SyntheticExample => {
            format!("Generating example data for a {}", plan.widget_type)
        }
    }
}

fn describe_data(data: &DataResult) -> String {
    let fields = match &data.data {
        Value::Object(map) => map.len(),
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    };
    format!(
        "Data: {fields} field(s), {} confidence, source {}",
        data.confidence.as_str(),
        truncate(data.source.as_deref().unwrap_or("none"), 80)
    )
}

fn describe_widget(widget: &Widget) -> String {
    let title = widget
        .data
        .get("title")
        .and_then(Value::as_str)
        .map(|t| format!(" \"{}\"", truncate(t, 80)))
        .unwrap_or_default();
    format!(
        "Widget: {}{title} with {} node(s)",
        widget.kind,
        widget.node_count()
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
