//! Best-effort sequential execution of async steps.
//!
//! Steps run strictly one after another. A step that fails or overruns its
//! budget is logged and the chain moves on; the caller only learns that every
//! step has been attempted. Callers needing strict propagation wrap their
//! steps themselves.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

/// A step exceeded its time budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step '{step}' timed out after {timeout_ms}ms")]
pub struct StepTimeoutError {
    pub step: String,
    pub timeout_ms: u64,
}

type StepFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A named, zero-argument async operation.
pub struct Step {
    name: String,
    run: StepFn,
}

impl Step {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Builds a step from a closure producing a future.
pub fn step<F, Fut>(name: impl Into<String>, f: F) -> Step
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Step {
        name: name.into(),
        run: Box::new(move || Box::pin(f())),
    }
}

/// Runs `steps` in order. With `timeout` set, each step races its own timer;
/// a step that loses is abandoned (its future is dropped) and reported as a
/// [`StepTimeoutError`] in the log.
pub async fn run_serial(steps: Vec<Step>, timeout: Option<Duration>) {
    let total = steps.len();
    for (index, Step { name, run }) in steps.into_iter().enumerate() {
        debug!(step = %name, index, total, "running step");
        let fut = run();
        let outcome = match timeout {
            Some(budget) => match tokio::time::timeout(budget, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = budget.as_millis() as u64;
                    Err(StepTimeoutError {
                        step: name.clone(),
                        timeout_ms,
                    }
                    .into())
                }
            },
            None => fut.await,
        };
        if let Err(err) = outcome {
            warn!(step = %name, error = %err, "step failed, continuing");
        }
    }
}
