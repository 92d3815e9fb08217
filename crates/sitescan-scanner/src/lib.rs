//! Sitescan Scanner - analysis orchestration for the Sitescan pipeline.
//!
//! This crate turns a queued analysis job into a finished record. It validates
//! target hosts, runs the pluggable scan capabilities against one rendered
//! page, aggregates their results and publishes completion events.
//!
//! # Features
//!
//! - SSRF guard that resolves the host and rejects internal addresses
//! - One shared page load per job for page-bound capabilities
//! - Per-capability timeouts and failure isolation
//! - Bounded retries through the queue's backoff policy
//! - Recent-result summaries and room-scoped notifications
//!
//! # Example
//!
//! ```rust,ignore
//! use sitescan_scanner::{AnalysisService, HostValidator};
//! use std::sync::Arc;
//!
//! let service = AnalysisService::new(
//!     HostValidator::system(2048),
//!     Arc::new(database),
//!     Arc::new(queue),
//! );
//!
//! let started = service.start_analysis("https://example.com", &["tech", "seo"]).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod capabilities;
#[allow(missing_docs)]
pub mod capability;
#[allow(missing_docs)]
pub mod error;
#[allow(missing_docs)]
pub mod host_validator;
#[allow(missing_docs)]
pub mod http;
pub mod notifier;
pub mod orchestrator;
#[allow(missing_docs)]
pub mod page;
#[allow(missing_docs)]
pub mod service;
#[allow(missing_docs)]
pub mod summary;
#[allow(missing_docs)]
pub mod worker;

// Re-export commonly used types
pub use capability::{CapabilityRegistry, Input, ScanCapability, ScanContext, ScanSettings};
pub use error::{CapabilityError, OrchestrationError, Result, ScanError, ServiceError};
pub use host_validator::{
    classify_ip, AddressClass, HostResolver, HostValidator, RejectReason, StaticResolver,
    SystemResolver, Verdict,
};
pub use http::build_client;
pub use notifier::{
    AnalysisSubscription, BroadcastPublisher, EventKind, NoopPublisher, NotificationEvent,
    NotificationPublisher,
};
pub use orchestrator::{AnalysisOrchestrator, ProcessOutcome};
pub use service::{AnalysisService, StartedAnalysis};
pub use summary::build_summary;
pub use worker::{Worker, WorkerSettings};
