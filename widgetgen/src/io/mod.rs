//! I/O helpers: agent processes, prompts, configuration and the dataset.

pub mod agent;
pub mod config;
pub mod database;
pub mod process;
pub mod prompt;
