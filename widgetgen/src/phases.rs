//! Phase executors: planning, data acquisition and widget generation.
//!
//! Planning and data acquisition never fail; they substitute a fallback plan
//! or an empty data result once retries are exhausted. Widget generation
//! returns its error so the orchestrator can fall back.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tracing::{debug, error, warn};

use crate::core::events::{AgentEvent, UpdateEvent};
use crate::core::fallback::fallback_plan;
use crate::core::progress::{AgentEventTranslator, Phase};
use crate::core::schema::{validate_data, validate_plan, validate_widget};
use crate::core::types::{DataResult, DataSource, Plan, Widget};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::config::GenConfig;
use crate::io::database::load_dataset;
use crate::io::prompt::{PhasePrompt, PromptEngine};
use crate::retry::{RetryPolicy, retry_with_feedback};

/// Knobs shared by every phase of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub default_model: String,
    pub retry: RetryPolicy,
    pub database_path: PathBuf,
    pub debug: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&GenConfig::default())
    }
}

impl From<&GenConfig> for PipelineSettings {
    fn from(cfg: &GenConfig) -> Self {
        Self {
            default_model: cfg.model.clone(),
            retry: RetryPolicy::from(&cfg.retry),
            database_path: cfg.database.path.clone(),
            debug: cfg.debug,
        }
    }
}

/// Destination for update events of one request.
///
/// Owns the agent-event translator so throttling never leaks across requests.
pub struct EventSink<'a> {
    on_update: Option<&'a mut dyn FnMut(UpdateEvent)>,
    translator: AgentEventTranslator,
}

impl<'a> EventSink<'a> {
    pub fn new(on_update: &'a mut dyn FnMut(UpdateEvent)) -> Self {
        Self {
            on_update: Some(on_update),
            translator: AgentEventTranslator::new(),
        }
    }

    /// Sink that drops everything (refresh requests have no event stream).
    pub fn discard() -> Self {
        Self {
            on_update: None,
            translator: AgentEventTranslator::new(),
        }
    }

    pub fn emit(&mut self, event: UpdateEvent) {
        if let Some(on_update) = &mut self.on_update {
            on_update(event);
        }
    }

    /// Start a fresh phase sequence with new throttle state.
    pub fn restart(&mut self) {
        self.translator = AgentEventTranslator::new();
    }

    fn agent_event(&mut self, phase: Phase, event: &AgentEvent) {
        if self.on_update.is_none() {
            return;
        }
        if let Some(message) = self.translator.translate(phase, event, Instant::now()) {
            self.emit(UpdateEvent::AgentEvent {
                phase,
                message,
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }
    }
}

/// Runs individual phases against an agent for one model.
pub struct PhaseRunner<'a, A> {
    agent: &'a A,
    prompts: &'a PromptEngine,
    settings: &'a PipelineSettings,
    model: &'a str,
}

impl<'a, A: Agent> PhaseRunner<'a, A> {
    pub fn new(
        agent: &'a A,
        prompts: &'a PromptEngine,
        settings: &'a PipelineSettings,
        model: &'a str,
    ) -> Self {
        Self {
            agent,
            prompts,
            settings,
            model,
        }
    }

    /// Decide widget kind and data source. Falls back to a default plan.
    pub fn plan(&self, query: &str, sink: &mut EventSink<'_>) -> Plan {
        let prompt = match self.prompts.planning(query) {
            Ok(p) => p,
            Err(e) => {
                error!(step = "planning", err = %format!("{e:#}"), "planner prompt failed to render");
                return fallback_plan(query);
            }
        };
        let result = retry_with_feedback(
            "planning",
            &self.settings.retry,
            self.settings.debug,
            |feedback| self.call_agent(sink, Phase::Planning, &prompt, feedback),
            validate_plan,
        );
        match result {
            Ok(plan) => plan,
            Err(e) => {
                warn!(step = "planning", err = %format!("{e:#}"), "planning exhausted retries, using fallback plan");
                fallback_plan(query)
            }
        }
    }

    /// Fetch, query or generate the widget's data according to `plan.data_source`.
    /// Falls back to an empty low-confidence result.
    pub fn acquire_data(&self, query: &str, plan: &Plan, sink: &mut EventSink<'_>) -> DataResult {
        let phase = Phase::for_source(plan.data_source);
        let prompt = match plan.data_source {
            DataSource::InternalDatabase => {
                let dataset = load_dataset(&self.settings.database_path);
                self.prompts.database_query(query, plan, &dataset.summary())
            }
            DataSource::WebSearch => self.prompts.web_data(query, plan),
            DataSource::SyntheticExample => self.prompts.synthetic_data(query, plan),
        };
        let prompt = match prompt {
            Ok(p) => p,
            Err(e) => {
                error!(step = "data", err = %format!("{e:#}"), "data prompt failed to render");
                return DataResult::empty();
            }
        };

        let result = retry_with_feedback(
            "data",
            &self.settings.retry,
            self.settings.debug,
            |feedback| self.call_agent(sink, phase, &prompt, feedback),
            validate_data,
        );
        match result {
            Ok(mut data) => {
                if plan.data_source == DataSource::InternalDatabase {
                    data.source = Some(DataSource::InternalDatabase.as_str().to_string());
                }
                data
            }
            Err(e) => {
                warn!(step = "data", source = %plan.data_source, err = %format!("{e:#}"), "data acquisition exhausted retries, using empty data");
                DataResult::empty()
            }
        }
    }

    /// Build the widget tree. Errors once retries are exhausted.
    pub fn generate_widget(
        &self,
        query: &str,
        plan: &Plan,
        data: &DataResult,
        sink: &mut EventSink<'_>,
    ) -> Result<Widget> {
        let prompt = self.prompts.widget(query, plan, data)?;
        retry_with_feedback(
            "widget",
            &self.settings.retry,
            self.settings.debug,
            |feedback| self.call_agent(sink, Phase::Generating, &prompt, feedback),
            validate_widget,
        )
    }

    fn call_agent(
        &self,
        sink: &mut EventSink<'_>,
        phase: Phase,
        prompt: &PhasePrompt,
        feedback: Option<&str>,
    ) -> Result<String> {
        let request = AgentRequest {
            prompt: format!("{}{}", prompt.user, feedback.unwrap_or_default()),
            system_prompt: Some(prompt.system.clone()),
            model: self.model.to_string(),
            phase,
        };
        if self.settings.debug {
            debug!(phase = %phase, prompt_len = request.prompt.len(), "calling agent");
        }
        let run = self
            .agent
            .invoke(&request, &mut |event: &AgentEvent| sink.agent_event(phase, event));
        if !run.success {
            return Err(anyhow!(
                "agent failed: {}",
                run.error.as_deref().unwrap_or("unknown error")
            ));
        }
        if run.text.trim().is_empty() {
            return Err(anyhow!("agent returned no text"));
        }
        Ok(run.text)
    }
}
