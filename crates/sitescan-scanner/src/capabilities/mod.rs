//! Built-in capabilities.

pub mod accessibility;
pub mod performance;
pub mod security;
pub mod seo;
pub mod tech;
pub mod tls;

pub use accessibility::AccessibilityCapability;
pub use performance::PerformanceCapability;
pub use security::SecurityCapability;
pub use seo::SeoCapability;
pub use tech::TechCapability;
