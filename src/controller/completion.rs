// One-shot completion notification
//
// The worker owns the sending half and consumes it when the job ends, so a job
// can be reported at most once. Any number of observers share the receiving
// half and all see the same outcome.

use crate::models::JobOutcome;
use tokio::sync::{Mutex, OnceCell, oneshot};

/// Create a linked sender/observer pair for one job.
pub fn completion_channel() -> (CompletionSender, Completion) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSender { tx },
        Completion {
            rx: Mutex::new(rx),
            outcome: OnceCell::new(),
        },
    )
}

/// Sending half, held by the job worker.
#[derive(Debug)]
pub struct CompletionSender {
    tx: oneshot::Sender<JobOutcome>,
}

impl CompletionSender {
    /// Deliver the outcome. Consumes the sender, so this happens at most once.
    ///
    /// Returns `false` when every observer is already gone.
    pub fn send(self, outcome: JobOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

/// Observer side, shared (usually in an `Arc`) by everyone waiting for the job.
#[derive(Debug)]
pub struct Completion {
    rx: Mutex<oneshot::Receiver<JobOutcome>>,
    outcome: OnceCell<JobOutcome>,
}

impl Completion {
    /// Wait for the outcome.
    ///
    /// The first caller receives it from the channel; concurrent and later
    /// callers get the cached copy. Cancelling a wait does not lose the outcome.
    pub async fn wait(&self) -> JobOutcome {
        self.outcome
            .get_or_init(|| async {
                let mut rx = self.rx.lock().await;
                match (&mut *rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => JobOutcome::failed("job worker stopped without reporting an outcome"),
                }
            })
            .await
            .clone()
    }

    /// The outcome, if an observer has already received it.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.outcome.get().cloned()
    }
}
