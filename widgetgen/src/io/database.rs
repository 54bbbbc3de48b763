//! Internal dataset backing the `internal-database` data source.
//!
//! The dataset is a JSON object of named tables (arrays of row objects). It is
//! not queried directly: a summary of every table is handed to the agent
//! together with the plan's query intent.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

/// Tables every dataset exposes, even when empty.
pub const STANDARD_TABLES: [&str; 4] = ["users", "subscriptions", "mrr_snapshots", "feature_usage"];

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    tables: BTreeMap<String, Vec<Value>>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            tables: STANDARD_TABLES
                .iter()
                .map(|t| ((*t).to_string(), Vec::new()))
                .collect(),
        }
    }
}

impl Dataset {
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("parse dataset json")?;
        let Value::Object(obj) = value else {
            return Err(anyhow!("dataset must be a JSON object of tables"));
        };
        let mut dataset = Self::default();
        for (name, rows) in obj {
            match rows {
                Value::Array(rows) => {
                    dataset.tables.insert(name, rows);
                }
                other => warn!(table = %name, kind = %json_kind(&other), "skipping non-array table"),
            }
        }
        Ok(dataset)
    }

    pub fn rows(&self, table: &str) -> &[Value] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    /// Row counts per table, for logging.
    pub fn stats(&self) -> BTreeMap<&str, usize> {
        self.tables
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.len()))
            .collect()
    }

    /// `{table: {count, sample, all}}` for every table.
    ///
    /// Samples hold the first three rows, five for `feature_usage`.
    pub fn summary(&self) -> Value {
        let mut out = Map::new();
        for (name, rows) in &self.tables {
            let sample_len = if name == "feature_usage" { 5 } else { 3 };
            let sample: Vec<&Value> = rows.iter().take(sample_len).collect();
            out.insert(
                name.clone(),
                json!({
                    "count": rows.len(),
                    "sample": sample,
                    "all": rows,
                }),
            );
        }
        Value::Object(out)
    }
}

/// Load the dataset at `path`.
///
/// A missing or malformed file yields empty standard tables so the internal
/// source degrades instead of failing the request.
pub fn load_dataset(path: &Path) -> Dataset {
    let result = fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))
        .and_then(|raw| Dataset::from_json(&raw));
    match result {
        Ok(dataset) => {
            info!(path = %path.display(), stats = ?dataset.stats(), "loaded internal dataset");
            dataset
        }
        Err(e) => {
            warn!(path = %path.display(), err = %format!("{e:#}"), "internal dataset unavailable, using empty tables");
            Dataset::default()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
