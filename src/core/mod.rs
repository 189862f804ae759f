//! Core modules shared by the engine and the CLI.
//!
//! Storage, configuration, logging, errors and the small helpers every
//! command uses. Nothing here knows about mission semantics.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;
