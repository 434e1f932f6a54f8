//! Wait-group for one orchestration phase.
//!
//! Every participant arrives exactly once with its outcome. Failures travel
//! on an explicit channel so the waiter can tell them apart from successes,
//! and completion fires once when the last participant arrives.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::error::{Phase, ServiceFailure};

struct BarrierState {
    remaining: usize,
    done: Option<oneshot::Sender<()>>,
}

/// Participant side. Cheap to clone; one clone per service task.
#[derive(Clone)]
pub struct PhaseBarrier {
    phase: Phase,
    state: Arc<Mutex<BarrierState>>,
    failures: mpsc::UnboundedSender<ServiceFailure>,
}

/// Waiting side, consumed by one of the `wait_*` methods.
pub struct PhaseWait {
    done: oneshot::Receiver<()>,
    failures: mpsc::UnboundedReceiver<ServiceFailure>,
}

impl std::fmt::Debug for PhaseBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseBarrier")
            .field("phase", &self.phase)
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl PhaseBarrier {
    /// Barrier expecting `participants` arrivals. With zero participants it
    /// is complete immediately.
    #[must_use]
    pub fn new(phase: Phase, participants: usize) -> (Self, PhaseWait) {
        let (done_tx, done) = oneshot::channel();
        let (failures_tx, failures) = mpsc::unbounded_channel();
        let mut state = BarrierState {
            remaining: participants,
            done: Some(done_tx),
        };
        if participants == 0 {
            if let Some(tx) = state.done.take() {
                let _ = tx.send(());
            }
        }
        (
            Self {
                phase,
                state: Arc::new(Mutex::new(state)),
                failures: failures_tx,
            },
            PhaseWait { done, failures },
        )
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    /// Records one participant's outcome. Returns `false` (and changes
    /// nothing) if every participant already arrived.
    pub fn arrive(&self, service: &str, outcome: anyhow::Result<()>) -> bool {
        let mut state = self.state.lock();
        if state.remaining == 0 {
            warn!(service, phase = %self.phase, "extra arrival at a completed barrier ignored");
            return false;
        }
        if let Err(error) = outcome {
            // Sent before the count drops so a completed barrier has every failure queued.
            let _ = self.failures.send(ServiceFailure {
                service: service.to_string(),
                phase: self.phase,
                error,
            });
        }
        state.remaining -= 1;
        if state.remaining == 0 {
            if let Some(tx) = state.done.take() {
                let _ = tx.send(());
            }
        }
        true
    }
}

impl PhaseWait {
    /// Waits for every participant and returns all failures, in arrival order.
    pub async fn wait_all(mut self) -> Vec<ServiceFailure> {
        let _ = (&mut self.done).await;
        let mut failures = Vec::new();
        while let Ok(failure) = self.failures.try_recv() {
            failures.push(failure);
        }
        failures
    }

    /// Waits for every participant, or returns the first failure as soon as
    /// it arrives.
    ///
    /// # Errors
    ///
    /// The first reported failure.
    pub async fn wait_first_failure(mut self) -> Result<(), ServiceFailure> {
        tokio::select! {
            biased;
            Some(failure) = self.failures.recv() => Err(failure),
            _ = &mut self.done => match self.failures.try_recv() {
                Ok(failure) => Err(failure),
                Err(_) => Ok(()),
            },
        }
    }
}
