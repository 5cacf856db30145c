//! Core data models for quantval.
//!
//! - `config`: resolvable parameters (TOML + environment overrides)
//! - `error`: infrastructure error taxonomy
//! - `problem`: options, solver opinions, consensus outcomes, problems
//! - `stats`: per-run statistics

mod config;
mod error;
mod problem;
mod stats;

pub use config::*;
pub use error::*;
pub use problem::*;
pub use stats::*;
