//! Prompt builder for each pipeline phase.
//!
//! System prompts are minijinja templates compiled into the binary; user
//! prompts are short formatted strings carrying the per-request values.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::core::schema::{CHART_TYPES, MIN_UPDATE_INTERVAL_MS};
use crate::core::types::{DataResult, DataSource, DataStructure, InteractionKind, Plan, WidgetKind};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const DATA_FETCH_TEMPLATE: &str = include_str!("prompts/data_fetch.md");
const DATA_GENERATE_TEMPLATE: &str = include_str!("prompts/data_generate.md");
const DATABASE_QUERY_TEMPLATE: &str = include_str!("prompts/database_query.md");
const WIDGET_TEMPLATE: &str = include_str!("prompts/widget.md");

/// Internal tables described to the planner.
const TABLE_SCHEMAS: [TableSchema; 4] = [
    TableSchema {
        name: "users",
        columns: "id, email, name, created_at, plan_type (free/pro/enterprise), status (active/churned), churned_at",
    },
    TableSchema {
        name: "subscriptions",
        columns: "id, user_id, plan (free/pro/enterprise), mrr, start_date, end_date, status (active/cancelled)",
    },
    TableSchema {
        name: "mrr_snapshots",
        columns: "month (YYYY-MM), total_mrr, active_subscriptions, new_mrr, churned_mrr",
    },
    TableSchema {
        name: "feature_usage",
        columns: "id, user_id, feature_name (api_calls/dashboard_views/exports/reports), usage_count, date",
    },
];

#[derive(Debug, Clone, Copy, Serialize)]
struct TableSchema {
    name: &'static str,
    columns: &'static str,
}

/// System and user prompt for one agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePrompt {
    pub system: String,
    pub user: String,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("planner", PLANNER_TEMPLATE),
            ("data_fetch", DATA_FETCH_TEMPLATE),
            ("data_generate", DATA_GENERATE_TEMPLATE),
            ("database_query", DATABASE_QUERY_TEMPLATE),
            ("widget", WIDGET_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    pub fn planning(&self, query: &str) -> Result<PhasePrompt> {
        let system = self.render(
            "planner",
            context! {
                widget_types => join(WidgetKind::ALL.map(WidgetKind::as_str)),
                data_sources => join(DataSource::ALL.map(DataSource::as_str)),
                data_structures => join(DataStructure::ALL.map(DataStructure::as_str)),
                tables => TABLE_SCHEMAS,
            },
        )?;
        Ok(PhasePrompt {
            system,
            user: query.to_string(),
        })
    }

    pub fn web_data(&self, query: &str, plan: &Plan) -> Result<PhasePrompt> {
        let system = self.render("data_fetch", plan_context(plan))?;
        let search = plan.search_query.as_deref().unwrap_or(query);
        Ok(PhasePrompt {
            system,
            user: format!("Extract structured data for: {query}\nSearch query: {search}"),
        })
    }

    pub fn synthetic_data(&self, query: &str, plan: &Plan) -> Result<PhasePrompt> {
        let system = self.render("data_generate", plan_context(plan))?;
        Ok(PhasePrompt {
            system,
            user: format!(
                "Generate realistic data for: \"{query}\"\nWidget type: {}\nKey entities: {}",
                plan.widget_type,
                plan.key_entities.join(", ")
            ),
        })
    }

    /// `summary` is the dataset summary embedded verbatim.
    pub fn database_query(&self, query: &str, plan: &Plan, summary: &Value) -> Result<PhasePrompt> {
        let system = self.render("database_query", context! {})?;
        let intent = plan.query_intent.as_deref().unwrap_or(query);
        let summary =
            serde_json::to_string_pretty(summary).context("serialize dataset summary")?;
        Ok(PhasePrompt {
            system,
            user: format!(
                "Query Intent: \"{intent}\"\nUser Question: \"{query}\"\nWidget Type: {}\nData Structure: {}\n\nDatabase Content:\n{summary}\n\nExtract the data that answers the query intent and return it in the output format.",
                plan.widget_type, plan.data_structure
            ),
        })
    }

    pub fn widget(&self, query: &str, plan: &Plan, data: &DataResult) -> Result<PhasePrompt> {
        let system = self.render(
            "widget",
            context! {
                chart_types => CHART_TYPES.join(", "),
                interaction_types => join(InteractionKind::ALL.map(InteractionKind::as_str)),
                min_update_interval => MIN_UPDATE_INTERVAL_MS,
            },
        )?;
        let data_json = serde_json::to_string(&data.data).context("serialize widget data")?;
        Ok(PhasePrompt {
            system,
            user: format!(
                "USER: \"{query}\"\nWidget type: {}\nData structure: {}\nAvailable data: {data_json}\n\nGenerate a widget JSON configuration that displays this data.",
                plan.widget_type, plan.data_structure
            ),
        })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} template"))?;
        Ok(rendered)
    }
}

fn plan_context(plan: &Plan) -> minijinja::Value {
    context! {
        widget_type => plan.widget_type.as_str(),
        data_structure => plan.data_structure.as_str(),
    }
}

fn join<const N: usize>(items: [&str; N]) -> String {
    items.join("|")
}
