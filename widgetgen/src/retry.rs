//! Retry-with-feedback loop shared by every phase.
//!
//! Each attempt invokes the agent, extracts (and if needed repairs) JSON from
//! its text and validates it. A failed attempt's reason is appended to the
//! next prompt so the generator can correct itself.

use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::json_extract::extract_json_with_repair;
use crate::core::schema::Validation;
use crate::io::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff: cfg.backoff(),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Text appended to the prompt after a failed attempt.
pub fn feedback_text(reason: &str) -> String {
    format!("\n\nPREVIOUS ATTEMPT FAILED: {reason}\nPlease fix these issues and return valid JSON.")
}

/// Run `invoke` until `validate` accepts its JSON or attempts run out.
///
/// `invoke` receives `None` on the first attempt and the feedback text of the
/// previous failure afterwards. Invocation, parse and validation failures all
/// take the same path. The last failure is returned once
/// `policy.max_retries + 1` attempts have been made.
pub fn retry_with_feedback<T, I, V>(
    label: &str,
    policy: &RetryPolicy,
    debug_enabled: bool,
    mut invoke: I,
    validate: V,
) -> Result<T>
where
    I: FnMut(Option<&str>) -> Result<String>,
    V: Fn(&Value) -> Validation<T>,
{
    let attempts = policy.attempts();
    let mut feedback: Option<String> = None;
    let mut last_error = anyhow!("{label}: no attempts made");

    for attempt in 1..=attempts {
        info!(step = label, attempt, attempts, "{label} attempt {attempt}/{attempts}");
        match attempt_once(&mut invoke, feedback.as_deref(), &validate, debug_enabled) {
            Ok(value) => {
                if attempt > 1 {
                    info!(step = label, attempt, "{label} succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(step = label, attempt, attempts, err = %e, "{label} attempt failed");
                feedback = Some(feedback_text(&e.to_string()));
                last_error = e;
                if attempt < attempts && !policy.backoff.is_zero() {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }

    Err(last_error.context(format!("{label} failed after {attempts} attempts")))
}

fn attempt_once<T, I, V>(
    invoke: &mut I,
    feedback: Option<&str>,
    validate: &V,
    debug_enabled: bool,
) -> Result<T>
where
    I: FnMut(Option<&str>) -> Result<String>,
    V: Fn(&Value) -> Validation<T>,
{
    let text = invoke(feedback)?;
    let value = match extract_json_with_repair(&text) {
        Ok(value) => value,
        Err(e) => {
            if debug_enabled && let Some((head, tail)) = e.preview() {
                debug!(head = %head, tail = %tail, "unparsable agent text");
            }
            return Err(e.into());
        }
    };

    let validation = validate(&value);
    if !validation.warnings.is_empty() {
        if debug_enabled {
            debug!(warnings = ?validation.warnings, "validation warnings");
        } else {
            debug!(count = validation.warnings.len(), "validation warnings");
        }
    }
    if !validation.is_valid() {
        if debug_enabled {
            debug!(errors = ?validation.errors, payload = %value, "validation failed");
        }
        return Err(anyhow!("Validation failed: {}", validation.error_summary()));
    }
    validation
        .value
        .ok_or_else(|| anyhow!("Validation failed: no value produced"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::validate_plan;
    use crate::core::types::WidgetKind;

    const VALID_PLAN: &str = r#"{"widgetType":"chart","dataSource":"web-search","searchQuery":"TSLA","dataStructure":"timeseries","keyEntities":["Tesla"]}"#;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff: Duration::ZERO,
        }
    }

    /// Verifies two failures followed by success take three calls with feedback on retries.
    #[test]
    fn succeeds_on_third_attempt_with_feedback() {
        let mut calls: Vec<Option<String>> = Vec::new();
        let plan = retry_with_feedback(
            "planning",
            &fast(),
            false,
            |feedback| {
                calls.push(feedback.map(str::to_string));
                Ok(match calls.len() {
                    1 => "no json here".to_string(),
                    2 => r#"{"widgetType":"hologram"}"#.to_string(),
                    _ => VALID_PLAN.to_string(),
                })
            },
            validate_plan,
        )
        .expect("third attempt succeeds");

        assert_eq!(plan.widget_type, WidgetKind::Chart);
        assert_eq!(calls.len(), 3);
        assert!(calls[0].is_none());
        for feedback in &calls[1..] {
            let text = feedback.as_deref().expect("feedback on retry");
            assert!(text.contains("PREVIOUS ATTEMPT FAILED:"));
        }
        assert!(
            calls[2]
                .as_deref()
                .is_some_and(|f| f.contains("Validation failed:") && f.contains("widgetType: "))
        );
    }

    #[test]
    fn invocation_errors_are_retried_then_propagated() {
        let mut count = 0;
        let err = retry_with_feedback(
            "widget",
            &fast(),
            false,
            |_| {
                count += 1;
                Err(anyhow!("agent exited with status 1"))
            },
            validate_plan,
        )
        .expect_err("all attempts fail");
        assert_eq!(count, 3);
        let chain = format!("{err:#}");
        assert!(chain.contains("widget failed after 3 attempts"));
        assert!(chain.contains("agent exited with status 1"));
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let mut count = 0;
        let policy = RetryPolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
        };
        let result = retry_with_feedback(
            "planning",
            &policy,
            false,
            |_| {
                count += 1;
                Ok("{}".to_string())
            },
            validate_plan,
        );
        assert!(result.is_err());
        assert_eq!(count, 1);
    }

    #[test]
    fn repaired_json_is_accepted() {
        let truncated = r#"Here you go: {"widgetType":"chart","dataSource":"web-search","dataStructure":"timeseries","keyEntities":["Tesla"],"#;
        let plan = retry_with_feedback("planning", &fast(), true, |_| Ok(truncated.to_string()), validate_plan)
            .expect("repair recovers");
        assert_eq!(plan.key_entities, vec!["Tesla".to_string()]);
    }
}
