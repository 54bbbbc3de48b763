//! Stable exit codes for widgetgen CLI commands.

/// Command succeeded; `ask` produced a widget from real or example data.
pub const OK: i32 = 0;
/// Invalid input, config or payload, or an unexpected error.
pub const INVALID: i32 = 1;
/// `ask` answered with the guaranteed fallback widget or an error text.
pub const DEGRADED: i32 = 2;
