//! Browser sessions for rendered-page analysis.
//!
//! Wraps a headless Chromium behind the [`PageProvider`]/[`PageHandle`]
//! traits so analysis code can be exercised without a real browser, and
//! bounds concurrent use through [`BrowserPool`].

pub mod actions;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod pool;

pub use actions::{LoadedPage, PageHandle, PageProvider};
pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use fingerprint::PageProfile;
pub use pool::{BrowserPool, PageLease, SessionLease};
