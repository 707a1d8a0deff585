// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`runner`] defines the [`CommandRunner`] trait the upload manager talks
//!   to, and [`ProcessRunner`], the production implementation built on
//!   `tokio::process::Command`.
//!
//! Tests swap in a scripted runner so no real external tool is needed.

pub mod runner;

pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
