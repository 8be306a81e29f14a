//! Bootstrap layer — modules that run before any service or unit starts.
//!
//! - **logger** — tracing-subscriber initialisation.

pub mod logger;
