//! Core infrastructure — shared foundation used across the whole crate.
//!
//! - **config** — configuration loading and resolved types.
//! - **error** — loader and application error enums.

pub mod config;
pub mod error;
