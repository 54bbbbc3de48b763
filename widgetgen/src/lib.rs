//! Natural-language question to widget generation.
//!
//! A request is answered by orchestrating an external AI agent CLI through
//! three phases (planning, data acquisition, widget generation), each wrapped
//! in a retry-with-feedback loop and validated before use. The layout keeps
//! a strict split:
//!
//! - **[`core`]**: Pure logic (types, JSON extraction and repair, validation,
//!   progress translation, fallbacks). No I/O.
//! - **[`io`]**: Side effects (agent processes, config, prompts, the bundled
//!   dataset).
//!
//! [`orchestrator`] drives a full request with its fallback chain and
//! [`refresh`] re-runs data acquisition for an existing widget behind the
//! [`rate_limit`] counters.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod phases;
pub mod rate_limit;
pub mod refresh;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
