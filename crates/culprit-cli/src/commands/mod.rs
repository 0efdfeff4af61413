//! CLI command implementations.

pub mod checks;
pub mod config;
pub mod minimize;
pub mod show;
