pub mod error;
pub mod jobs;
pub mod memory;
pub mod queue;
pub mod scheduler;

pub use error::{QueueError, Result};
pub use jobs::Job;
pub use memory::{BackoffQueue, InMemoryQueue};
pub use queue::JobQueue;
pub use scheduler::{RetryDecision, RetryPolicy};
