pub mod config;
pub mod error;
pub mod executor;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use executor::{ExecutionOutcome, Executor};
pub use store::job::{AttemptRecord, FailOutcome, JobPriority, JobRow, JobState};
pub use store::{MetricsSummary, Store, WorkerRecord};
pub use supervisor::{Supervisor, WorkerStatus};
pub use worker::Worker;

/// Current version of queuectl.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn error_category_round_trip() {
        let err = Error::validation("bad input");
        assert_eq!(err.category(), "validation");
    }
}
