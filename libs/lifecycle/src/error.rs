//! Lifecycle error taxonomy.
//!
//! Provisioning-path errors halt immediately and carry enough context
//! (phase, step) to diagnose without re-running the whole lifecycle.
//! Destroy-path errors are logged by the orchestrator and folded into
//! the destroy report instead of being raised.

use std::time::Duration;

use thiserror::Error;

use bnode_cloud::CloudError;

use crate::node::LifecycleState;

/// Fatal lifecycle errors on the provisioning path.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Missing credential/zone/spec, detected before any remote call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Provider call failed outside a polling window.
    #[error("provider error during {state}: {source}")]
    Provider {
        state: LifecycleState,
        #[source]
        source: CloudError,
    },

    /// A bounded polling window elapsed. The resource is left intact
    /// for manual inspection; its state is ambiguous and billable.
    #[error("timed out waiting for {what} after {elapsed:?}")]
    Timeout { what: &'static str, elapsed: Duration },

    /// A bootstrap step's remote command exited non-zero or timed out.
    /// Remaining steps were not executed; VM and DNS are left intact.
    #[error("bootstrap step '{step}' failed: {detail}")]
    Step { step: &'static str, detail: String },

    /// The lifecycle was cancelled through the shutdown signal.
    #[error("lifecycle cancelled")]
    Cancelled,
}

impl LifecycleError {
    pub fn provider(state: LifecycleState, source: CloudError) -> Self {
        Self::Provider { state, source }
    }

    /// The bootstrap step name, when this is a step failure.
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}
