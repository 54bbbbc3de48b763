//! Deterministic, pure logic shared by the generation pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod events;
pub mod fallback;
pub mod json_extract;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod types;
