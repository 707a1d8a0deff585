// src/config/mod.rs

//! Configuration loading and validation for snapd.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate schedules, durations, nodes and notification blocks
//!   (`validate.rs`), and check them against the in-process registries.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    AgentSettings, ConfigFile, DatabaseSettings, NodeSpec, NotificationConfig, NotificationTarget,
    RawConfigFile,
};
pub use validate::check_registrations;
