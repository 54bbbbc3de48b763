//! Test-only helpers: a scripted in-process agent and canned agent payloads.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::events::AgentEvent;
use crate::core::progress::Phase;
use crate::io::agent::{Agent, AgentRequest, AgentRun};

type Script = dyn Fn(&AgentRequest) -> AgentRun + Send + Sync;

/// Agent whose replies come from a closure. Records every request.
pub struct ScriptedAgent {
    script: Box<Script>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&AgentRequest) -> AgentRun + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Agent that answers each phase with a fixed payload; other phases fail.
    pub fn by_phase(replies: Vec<(Phase, String)>) -> Self {
        Self::new(move |request| {
            replies
                .iter()
                .find(|(phase, _)| *phase == request.phase)
                .map_or_else(|| failure("no scripted reply"), |(_, text)| reply(text))
        })
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, phase: Phase) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.phase == phase)
            .count()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest, on_event: &mut dyn FnMut(&AgentEvent)) -> AgentRun {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let run = (self.script)(request);
        for event in &run.events {
            on_event(event);
        }
        run
    }
}

/// Successful run streaming `text` as one assistant message plus a result.
pub fn reply(text: &str) -> AgentRun {
    let result = AgentEvent {
        result: Some(text.to_string()),
        is_error: Some(false),
        duration_ms: Some(1),
        ..AgentEvent::new("result", Some("success"))
    };
    AgentRun {
        success: true,
        text: text.to_string(),
        events: vec![
            AgentEvent::new("system", Some("init")),
            AgentEvent::assistant(text),
            result,
        ],
        error: None,
        duration_ms: Some(1),
    }
}

pub fn failure(message: &str) -> AgentRun {
    AgentRun::failed(message)
}

pub fn plan_json(widget_type: &str, data_source: &str, data_structure: &str) -> String {
    json!({
        "widgetType": widget_type,
        "dataSource": data_source,
        "searchQuery": "example search",
        "queryIntent": "example intent",
        "dataStructure": data_structure,
        "keyEntities": ["example"],
        "reasoning": "scripted",
    })
    .to_string()
}

pub fn data_json(data: Value, source: &str, confidence: &str) -> String {
    json!({ "data": data, "source": source, "confidence": confidence }).to_string()
}

/// Temporary directory holding fake agent executables.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create script dir")?,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Write an executable `sh` script and return its path.
    #[cfg(unix)]
    pub fn script(&self, name: &str, body: &str) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))
            .with_context(|| format!("write {}", path.display()))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", path.display()))?;
        Ok(path)
    }
}
