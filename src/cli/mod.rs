//! CLI-specific functionality for the docaiche binary
//!
//! This module contains argument parsing and the execution of each
//! subcommand against the configuration and LLM layers.

pub mod args;
pub mod commands;

pub use args::{Args, Commands, ExecutionMode, SetConfig, TestProviderConfig};
pub use commands::{execute, manager_for};
