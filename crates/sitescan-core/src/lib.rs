//! Sitescan Core - Foundation crate for the Sitescan analysis pipeline.
//!
//! This crate provides shared types, error handling and configuration
//! management that all other Sitescan crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`AnalysisId`, `Capability`, `AnalysisStatus`)
//!
//! # Example
//!
//! ```rust
//! use sitescan_core::{AnalysisStatus, CapabilitySet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let requested = CapabilitySet::parse(&["tech", "seo"])?;
//! assert_eq!(requested.resolve().len(), 2);
//!
//! assert!(AnalysisStatus::Pending.can_transition_to(AnalysisStatus::InProgress));
//! assert!(!AnalysisStatus::Completed.can_transition_to(AnalysisStatus::Pending));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, NotificationConfig, QueueBackend, QueueConfig, ScanningConfig,
    SecurityConfig, StorageConfig, WorkerConfig,
};
pub use error::{ConfigError, ConfigResult, Result, SitescanError};
pub use types::{AnalysisId, AnalysisStatus, Capability, CapabilitySet, Requirement};
