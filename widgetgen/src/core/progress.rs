//! Progress phases and translation of raw agent events into short status lines.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::events::{AgentEvent, AgentEventKind, UpdateEvent};
use crate::core::types::DataSource;

/// Minimum spacing between two agent-event messages of the same phase.
pub const AGENT_EVENT_THROTTLE: Duration = Duration::from_secs(2);

/// Thinking deltas consumed before the rotating message advances.
const DELTAS_PER_MESSAGE: usize = 15;

/// User-facing phase label attached to progress and agent events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Querying,
    Searching,
    Preparing,
    Generating,
    Validating,
}

/// Default message, percentage and subtext for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadingState {
    pub message: &'static str,
    pub progress: u8,
    pub subtext: &'static str,
}

struct MessagePool {
    init: &'static [&'static str],
    thinking: &'static [&'static str],
    complete: &'static [&'static str],
}

const HANDOFF: &[&str] = &[
    "Moving to design...",
    "Starting build phase...",
    "Preparing components...",
];

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Querying => "querying",
            Phase::Searching => "searching",
            Phase::Preparing => "preparing",
            Phase::Generating => "generating",
            Phase::Validating => "validating",
        }
    }

    /// Data-acquisition phase label for a source.
    pub fn for_source(source: DataSource) -> Self {
        match source {
            DataSource::InternalDatabase => Phase::Querying,
            DataSource::WebSearch => Phase::Searching,
            DataSource::SyntheticExample => Phase::Preparing,
        }
    }

    pub fn loading_state(self) -> LoadingState {
        match self {
            Phase::Planning => LoadingState {
                message: "Thinking",
                progress: 10,
                subtext: "Determining widget type",
            },
            Phase::Querying => LoadingState {
                message: "Querying database",
                progress: 40,
                subtext: "Reading internal records",
            },
            Phase::Searching => LoadingState {
                message: "Searching the web",
                progress: 40,
                subtext: "Searching for live data",
            },
            Phase::Preparing => LoadingState {
                message: "Generating",
                progress: 40,
                subtext: "Creating example data",
            },
            Phase::Generating => LoadingState {
                message: "Building UI",
                progress: 70,
                subtext: "Building interface",
            },
            Phase::Validating => LoadingState {
                message: "Validating",
                progress: 90,
                subtext: "Checking structure",
            },
        }
    }

    /// Progress event announcing entry into this phase.
    pub fn progress_event(self) -> UpdateEvent {
        let state = self.loading_state();
        UpdateEvent::Progress {
            phase: self,
            message: state.message.to_string(),
            progress: state.progress,
            subtext: Some(state.subtext.to_string()),
        }
    }

    fn pool(self) -> MessagePool {
        match self {
            Phase::Planning => MessagePool {
                init: &["Waking up...", "Getting ready...", "Booting up..."],
                thinking: &[
                    "Analyzing your question...",
                    "Understanding the request...",
                    "Figuring things out...",
                    "Mapping the strategy...",
                    "Connecting the dots...",
                    "Planning the approach...",
                ],
                complete: &[
                    "Planning next steps...",
                    "Moving forward...",
                    "Preparing data phase...",
                ],
            },
            Phase::Querying => MessagePool {
                init: &[
                    "Opening the vault...",
                    "Diving into data...",
                    "Accessing database...",
                ],
                thinking: &[
                    "Crunching numbers...",
                    "Analyzing records...",
                    "Scanning data...",
                    "Filtering results...",
                    "Sorting information...",
                    "Extracting insights...",
                ],
                complete: HANDOFF,
            },
            Phase::Searching => MessagePool {
                init: &[
                    "Searching the web...",
                    "Going online...",
                    "Fetching live data...",
                ],
                thinking: &[
                    "Scanning results...",
                    "Gathering information...",
                    "Reading sources...",
                    "Verifying data...",
                    "Cross-referencing...",
                    "Compiling findings...",
                ],
                complete: HANDOFF,
            },
            Phase::Preparing => MessagePool {
                init: &[
                    "Generating data...",
                    "Creating examples...",
                    "Building dataset...",
                ],
                thinking: &[
                    "Crafting realistic data...",
                    "Making it look good...",
                    "Adding details...",
                    "Structuring information...",
                    "Fine-tuning values...",
                    "Balancing the dataset...",
                ],
                complete: HANDOFF,
            },
            Phase::Generating => MessagePool {
                init: &[
                    "Building your chart...",
                    "Crafting the UI...",
                    "Assembling components...",
                ],
                thinking: &[
                    "Polishing the design...",
                    "Adding colors...",
                    "Fine-tuning layout...",
                    "Adjusting spacing...",
                    "Choosing the palette...",
                    "Making it beautiful...",
                ],
                complete: &[
                    "Running final checks...",
                    "Reviewing the build...",
                    "Validating everything...",
                ],
            },
            Phase::Validating => MessagePool {
                init: &["Quality check...", "Reviewing work...", "Final inspection..."],
                thinking: &[
                    "Checking everything...",
                    "Validating data...",
                    "Verifying accuracy...",
                    "Double-checking...",
                ],
                complete: &[
                    "Wrapping up...",
                    "Finalizing details...",
                    "Getting ready...",
                ],
            },
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request translator from raw agent events to friendly messages.
///
/// Holds the throttle clock and thinking counters for one request only.
#[derive(Debug, Default)]
pub struct AgentEventTranslator {
    last_sent: HashMap<Phase, Instant>,
    thinking_deltas: HashMap<Phase, usize>,
    rotation: usize,
}

impl AgentEventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message to surface for `event`, or `None` when the event is not worth
    /// showing or the phase spoke less than [`AGENT_EVENT_THROTTLE`] ago.
    pub fn translate(&mut self, phase: Phase, event: &AgentEvent, now: Instant) -> Option<String> {
        let message = self.message_for(phase, event)?;
        if let Some(last) = self.last_sent.get(&phase)
            && now.saturating_duration_since(*last) < AGENT_EVENT_THROTTLE
        {
            return None;
        }
        self.last_sent.insert(phase, now);
        Some(message)
    }

    fn message_for(&mut self, phase: Phase, event: &AgentEvent) -> Option<String> {
        let pool = phase.pool();
        match event.kind() {
            AgentEventKind::Thinking if event.subtype_is("delta") => {
                let count = self.thinking_deltas.entry(phase).or_insert(0);
                *count += 1;
                let idx = (*count / DELTAS_PER_MESSAGE) % pool.thinking.len();
                Some(pool.thinking[idx].to_string())
            }
            AgentEventKind::Thinking if event.subtype_is("completed") => {
                self.thinking_deltas.insert(phase, 0);
                Some(self.pick(pool.complete))
            }
            AgentEventKind::System
                if event.subtype_is("init") || event.subtype_is("session_start") =>
            {
                Some(self.pick(pool.init))
            }
            AgentEventKind::ToolCall => {
                let tool = event.tool_name().unwrap_or_default().to_ascii_lowercase();
                if tool.contains("search") {
                    Some("Searching the internet...".to_string())
                } else if tool.contains("read") {
                    Some("Reading data...".to_string())
                } else if tool.contains("grep") {
                    Some("Scanning records...".to_string())
                } else if event.subtype_is("started") {
                    Some(self.pick(pool.thinking))
                } else if event.subtype_is("completed") || event.subtype_is("finished") {
                    Some(self.pick(pool.complete))
                } else {
                    None
                }
            }
            AgentEventKind::Assistant => {
                let first_line = event.text()?.lines().next()?.trim();
                let len = first_line.chars().count();
                let looks_structured = first_line.starts_with('{')
                    || first_line.starts_with('[')
                    || first_line.starts_with("```");
                (len > 10 && len < 100 && !looks_structured).then(|| first_line.to_string())
            }
            AgentEventKind::Result if event.subtype_is("success") => Some(self.pick(pool.complete)),
            _ => None,
        }
    }

    fn pick(&mut self, messages: &[&str]) -> String {
        let message = messages[self.rotation % messages.len()];
        self.rotation += 1;
        message.to_string()
    }
}
