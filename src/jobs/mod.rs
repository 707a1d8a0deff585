// src/jobs/mod.rs

//! Scheduled jobs.
//!
//! - [`node_upload`]: one per scheduled node; starts uploads.
//! - [`monitor`]: one global job; discovers and reconciles uploads.
//! - [`notify`]: routes notifications to the configured transports.

pub mod monitor;
pub mod node_upload;
pub mod notify;

pub use monitor::{MonitorJob, MonitorReport};
pub use node_upload::{JobOutcome, NodeUploadJob};
pub use notify::NotificationDispatcher;
