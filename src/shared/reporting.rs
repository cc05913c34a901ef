//! Error Reporting
//!
//! Seam for escalating faults to an external tracking service. Background
//! workers report through this trait instead of logging ad hoc, so the sink
//! can be swapped (or mocked) without touching the workers.

use std::fmt::Display;

/// Sink for escalated errors.
///
/// Implementations must be cheap to call from hot paths; anything slow
/// (network delivery, batching) belongs behind the implementation.
pub trait ErrorReporter: Send + Sync {
    /// Report an error together with the component it originated from.
    fn report(&self, component: &str, error: &dyn Display);
}

/// Reporter that emits structured error events through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, component: &str, error: &dyn Display) {
        tracing::error!(component = component, error = %error, "Escalated error");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Reporter that records every report for assertions.
    #[derive(Default, Clone)]
    pub struct RecordingReporter {
        pub reports: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, component: &str, error: &dyn Display) {
            self.reports
                .lock()
                .push((component.to_string(), error.to_string()));
        }
    }
}
