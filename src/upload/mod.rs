// src/upload/mod.rs

//! Upload model and lifecycle.
//!
//! - [`snapshot`]: parses the external tool's `info upload` output.
//! - [`record`]: persisted rows and partial updates.
//! - [`manager`]: starts uploads, discovers them, and reconciles their state.

pub mod manager;
pub mod record;
pub mod snapshot;

pub use manager::{ReconcileOutcome, UploadManager, UploadRequest};
pub use record::{NewUpload, ProtocolData, UploadPatch, UploadRecord};
pub use snapshot::{UploadSnapshot, parse_upload_info};
