//! Completion primitives shared between answer handlers and the
//! waiting side of a run.
//!
//! - `CompletionTracker` / `Completions`: a bounded counted queue, one
//!   signal per finished bulk exchange, any number of producers.
//! - `RunCompletion` / `RunCompleted`: a one-shot flag for the
//!   single-exchange flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error};

/// One finished exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSignal;

/// Why a wait on a completion primitive ended without a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Nothing arrived within the allowed time.
    Timeout,
    /// Producers dropped signals because the queue was full.
    Overflow(u64),
    /// Every producer is gone.
    Closed,
}

/// The queue refused a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("completion queue is full")]
    Full,
    #[error("completion queue is closed")]
    Closed,
}

/// Create a completion queue able to hold `capacity` pending signals.
///
/// The capacity must cover every exchange that can be in flight at
/// once, otherwise handlers start dropping signals.
pub fn completion_queue(capacity: usize) -> (CompletionTracker, Completions) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflows = Arc::new(AtomicU64::new(0));

    (
        CompletionTracker {
            tx,
            overflows: Arc::clone(&overflows),
        },
        Completions { rx, overflows },
    )
}

/// Producer side. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    tx: mpsc::Sender<CompletionSignal>,
    overflows: Arc<AtomicU64>,
}

impl CompletionTracker {
    /// Record one finished exchange.
    ///
    /// A full queue is a sizing bug: it is logged, latched, and surfaced
    /// to the consumer on its next wait.
    pub fn signal(&self) -> Result<(), SignalError> {
        match self.tx.try_send(CompletionSignal) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let count = self.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    overflows = count,
                    capacity = self.tx.max_capacity(),
                    "Completion queue full, signal dropped"
                );
                Err(SignalError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SignalError::Closed),
        }
    }
}

/// Consumer side, owned by the orchestrator.
#[derive(Debug)]
pub struct Completions {
    rx: mpsc::Receiver<CompletionSignal>,
    overflows: Arc<AtomicU64>,
}

impl Completions {
    /// Wait for the next signal, giving up after `limit`.
    pub async fn next(&mut self, limit: Duration) -> Result<CompletionSignal, WaitError> {
        self.check_overflow()?;

        match timeout(limit, self.rx.recv()).await {
            Ok(Some(signal)) => Ok(signal),
            Ok(None) => Err(WaitError::Closed),
            Err(_) => {
                // A dropped signal explains the silence better than a stall.
                self.check_overflow()?;
                Err(WaitError::Timeout)
            }
        }
    }

    fn check_overflow(&self) -> Result<(), WaitError> {
        match self.overflows.load(Ordering::Relaxed) {
            0 => Ok(()),
            n => Err(WaitError::Overflow(n)),
        }
    }
}

/// Create a one-shot run completion flag.
pub fn run_completion() -> (RunCompletion, RunCompleted) {
    let (tx, rx) = oneshot::channel();
    (
        RunCompletion {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        RunCompleted { rx },
    )
}

/// Firing side of the one-shot flag. Only the first fire counts.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl RunCompletion {
    /// Fire the flag. Returns false if it had already fired.
    pub fn fire(&self) -> bool {
        let sender = match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(tx) => {
                // The waiter may have given up already.
                let _ = tx.send(());
                true
            }
            None => {
                debug!("Run completion already fired");
                false
            }
        }
    }
}

/// Waiting side of the one-shot flag.
#[derive(Debug)]
pub struct RunCompleted {
    rx: oneshot::Receiver<()>,
}

impl RunCompleted {
    /// Wait for the flag with a single overall deadline.
    pub async fn wait(self, deadline: Duration) -> Result<(), WaitError> {
        match timeout(deadline, self.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::Timeout),
        }
    }
}
