//! Parameter resolution boundary
//!
//! A resolver maps a job identity to its configuration payload. It is called
//! concurrently from every worker and must not have side effects.

use serde_json::Value;

/// Produces the configuration payload for a job
pub trait ParameterResolver: Send + Sync {
    /// Payload for `job_id`, or `None` when nothing is available
    fn resolve(&self, job_id: &str) -> Option<Value>;
}

impl<F> ParameterResolver for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn resolve(&self, job_id: &str) -> Option<Value> {
        self(job_id)
    }
}

/// Resolver that never has a payload
#[derive(Debug, Clone, Copy, Default)]
pub struct NoParameters;

impl ParameterResolver for NoParameters {
    fn resolve(&self, _job_id: &str) -> Option<Value> {
        None
    }
}
