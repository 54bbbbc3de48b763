//! External agent invocation.
//!
//! The agent is an out-of-process CLI that prints newline-delimited JSON
//! events (`--output-format stream-json`). [`CliAgent`] spawns it, forwards
//! each parsed event to the caller, accumulates assistant text and settles on
//! the terminal `result` event, process exit or timeout.

use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::events::{AgentEvent, AgentEventKind, parse_event_line};
use crate::core::progress::Phase;
use crate::io::config::AgentConfig;
use crate::io::process::{LineControl, StreamEnd, run_command_streaming};

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: String,
    /// Phase the call belongs to; used for logging and event labelling.
    pub phase: Phase,
}

/// Outcome of an invocation. Failures are values, never panics or errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentRun {
    pub success: bool,
    /// Concatenated assistant text.
    pub text: String,
    pub events: Vec<AgentEvent>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl AgentRun {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Something that can run a prompt through the external generator.
///
/// `on_event` is called for every parsed stream event in arrival order.
pub trait Agent: Send + Sync {
    fn invoke(&self, request: &AgentRequest, on_event: &mut dyn FnMut(&AgentEvent)) -> AgentRun;
}

impl<A: Agent + ?Sized> Agent for &A {
    fn invoke(&self, request: &AgentRequest, on_event: &mut dyn FnMut(&AgentEvent)) -> AgentRun {
        (**self).invoke(request, on_event)
    }
}

impl<A: Agent + ?Sized> Agent for Arc<A> {
    fn invoke(&self, request: &AgentRequest, on_event: &mut dyn FnMut(&AgentEvent)) -> AgentRun {
        (**self).invoke(request, on_event)
    }
}

impl<A: Agent + ?Sized> Agent for Box<A> {
    fn invoke(&self, request: &AgentRequest, on_event: &mut dyn FnMut(&AgentEvent)) -> AgentRun {
        (**self).invoke(request, on_event)
    }
}

/// Fold a system prompt into the user prompt; the CLI has no separate flag.
pub fn compose_prompt(prompt: &str, system_prompt: Option<&str>) -> String {
    match system_prompt.map(str::trim).filter(|s| !s.is_empty()) {
        Some(system) => format!(
            "SYSTEM INSTRUCTIONS:\n{system}\n\nUSER REQUEST:\n{prompt}\n\nIMPORTANT: Follow the SYSTEM INSTRUCTIONS exactly. Output only the requested format (JSON, code, etc.) without any additional explanation or commentary."
        ),
        None => prompt.to_string(),
    }
}

/// Agent backed by a `cursor-agent`-compatible CLI.
#[derive(Debug, Clone)]
pub struct CliAgent {
    command: Vec<String>,
    timeout: Duration,
    stderr_limit_bytes: usize,
    force: bool,
    /// `(env var name, value)` exported to the child.
    api_key: Option<(String, String)>,
    debug: bool,
}

impl CliAgent {
    pub fn new(command: Vec<String>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            command,
            timeout: Duration::from_secs(defaults.timeout_secs),
            stderr_limit_bytes: defaults.stderr_limit_bytes,
            force: defaults.force,
            api_key: None,
            debug: false,
        }
    }

    /// Build from config, reading the credential from the configured env var.
    pub fn from_config(cfg: &AgentConfig, debug: bool) -> Self {
        let api_key = env::var(&cfg.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| (cfg.api_key_env.clone(), v));
        if api_key.is_none() {
            debug!(env = %cfg.api_key_env, "no agent api key in environment");
        }
        Self {
            command: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            stderr_limit_bytes: cfg.stderr_limit_bytes,
            force: cfg.force,
            api_key,
            debug,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_api_key(mut self, env_name: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_key = Some((env_name.into(), key.into()));
        self
    }

    /// Arguments appended after the configured command prefix.
    pub fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ];
        if self.force {
            args.push("--force".to_string());
        }
        if !request.model.trim().is_empty() {
            args.push("--model".to_string());
            args.push(request.model.clone());
        }
        args.push(compose_prompt(
            &request.prompt,
            request.system_prompt.as_deref(),
        ));
        args
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        let name = self
            .command
            .first()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        if name.contains(std::path::MAIN_SEPARATOR) {
            return Ok(PathBuf::from(name));
        }
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
        let mut candidates = Vec::new();
        if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
            candidates.push(home.join(".local/bin").join(name));
            candidates.push(home.join(".cursor/bin").join(name));
        }
        candidates.push(PathBuf::from("/usr/local/bin").join(name));
        candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                anyhow!(
                    "{name} not found on PATH or in ~/.local/bin, ~/.cursor/bin, /usr/local/bin; install it with `curl https://cursor.com/install -fsS | bash`"
                )
            })
    }
}

impl Agent for CliAgent {
    #[instrument(skip_all, fields(phase = %request.phase, model = %request.model))]
    fn invoke(&self, request: &AgentRequest, on_event: &mut dyn FnMut(&AgentEvent)) -> AgentRun {
        let started = Instant::now();
        let program = match self.resolve_program() {
            Ok(p) => p,
            Err(e) => {
                error!(err = %e, "agent binary not found");
                return AgentRun::failed(format!("{e:#}"));
            }
        };

        let mut cmd = Command::new(&program);
        cmd.args(&self.command[1..]).args(self.build_args(request));
        if let Some((name, key)) = &self.api_key {
            cmd.env(name, key);
        }
        if self.debug {
            let preview: String = request.prompt.chars().take(200).collect();
            debug!(program = %program.display(), prompt = %preview, "invoking agent");
        }

        let mut text = String::new();
        let mut events = Vec::new();
        let mut result_event: Option<AgentEvent> = None;
        let debug_events = self.debug;

        let output = run_command_streaming(cmd, self.timeout, self.stderr_limit_bytes, |line| {
            let Some(event) = parse_event_line(line) else {
                if debug_events && !line.trim().is_empty() {
                    debug!(line = %line.chars().take(120).collect::<String>(), "skipping non-event line");
                }
                return LineControl::Continue;
            };
            if debug_events {
                debug!(event_type = %event.event_type, subtype = ?event.subtype, "agent event");
            }
            on_event(&event);
            match event.kind() {
                AgentEventKind::Assistant => {
                    if let Some(chunk) = event.text() {
                        text.push_str(chunk);
                    }
                    events.push(event);
                    LineControl::Continue
                }
                AgentEventKind::Result => {
                    result_event = Some(event.clone());
                    events.push(event);
                    LineControl::Resolve
                }
                _ => {
                    events.push(event);
                    LineControl::Continue
                }
            }
        });
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                error!(err = %e, "agent process failed to start");
                return AgentRun {
                    events,
                    duration_ms: Some(elapsed_ms),
                    ..AgentRun::failed(format!("failed to start agent: {e:#}"))
                };
            }
        };

        let (success, error, duration_ms) = match (output.end, result_event) {
            (StreamEnd::Resolved, Some(result)) => {
                let failed = result.reports_error();
                if text.is_empty()
                    && !failed
                    && let Some(final_text) = &result.result
                {
                    text.push_str(final_text);
                }
                let error = failed.then(|| {
                    result.result.clone().unwrap_or_else(|| {
                        format!(
                            "agent reported failure ({})",
                            result.subtype.as_deref().unwrap_or("error")
                        )
                    })
                });
                (!failed, error, result.duration_ms.or(Some(elapsed_ms)))
            }
            (StreamEnd::Resolved, None) => (
                false,
                Some("agent resolved without a result event".to_string()),
                Some(elapsed_ms),
            ),
            (StreamEnd::Exited(status), _) => {
                let error = (!status.success()).then(|| {
                    let stderr = output.stderr_text();
                    if stderr.is_empty() {
                        format!("agent exited with {status}")
                    } else {
                        stderr
                    }
                });
                (status.success(), error, Some(elapsed_ms))
            }
            (StreamEnd::TimedOut, _) => (
                false,
                Some(format!(
                    "agent timed out after {}s",
                    self.timeout.as_secs()
                )),
                Some(elapsed_ms),
            ),
        };

        if success {
            info!(
                duration_ms,
                events = events.len(),
                text_len = text.len(),
                "agent finished"
            );
        } else {
            warn!(err = error.as_deref().unwrap_or_default(), "agent failed");
        }

        AgentRun {
            success,
            text,
            events,
            error,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(system: Option<&str>) -> AgentRequest {
        AgentRequest {
            prompt: "What's our MRR?".to_string(),
            system_prompt: system.map(str::to_string),
            model: "composer-1".to_string(),
            phase: Phase::Planning,
        }
    }

    #[test]
    fn args_follow_cli_contract() {
        let agent = CliAgent::new(vec!["cursor-agent".to_string()]);
        let args = agent.build_args(&request(None));
        assert_eq!(
            args,
            vec![
                "--print",
                "--output-format",
                "stream-json",
                "--force",
                "--model",
                "composer-1",
                "What's our MRR?",
            ]
        );

        let quiet = agent.with_force(false);
        assert!(!quiet.build_args(&request(None)).contains(&"--force".to_string()));
    }

    #[test]
    fn system_prompt_is_wrapped_into_the_prompt() {
        let composed = compose_prompt("hello", Some("You are a Widget Planner."));
        assert!(composed.starts_with("SYSTEM INSTRUCTIONS:\nYou are a Widget Planner."));
        assert!(composed.contains("USER REQUEST:\nhello"));
        assert!(composed.contains("IMPORTANT: Follow the SYSTEM INSTRUCTIONS exactly."));
        assert_eq!(compose_prompt("hello", Some("  ")), "hello");
    }

    #[test]
    fn api_key_never_lands_in_argv() {
        let agent = CliAgent::new(vec!["cursor-agent".to_string()]).with_api_key("CURSOR_API_KEY", "sk-secret");
        let args = agent.build_args(&request(Some("sys")));
        assert!(args.iter().all(|a| !a.contains("sk-secret")));
    }

    #[test]
    fn missing_binary_is_a_failed_run() {
        let agent = CliAgent::new(vec!["widgetgen-no-such-agent-binary".to_string()]);
        let run = agent.invoke(&request(None), &mut |_| {});
        assert!(!run.success);
        assert!(
            run.error
                .as_deref()
                .is_some_and(|e| e.contains("widgetgen-no-such-agent-binary"))
        );
    }
}
