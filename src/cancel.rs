use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
};

use crate::error::{PipelineError, Result, Stage};

/// Shared flag polled by long-running stages between their phases.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self, stage: Stage, circuit: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled {
                stage,
                circuit: circuit.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// A stage running on the rayon pool.
pub struct BackgroundTask<T> {
    stage: Stage,
    circuit: String,
    token: CancellationToken,
    receiver: mpsc::Receiver<Result<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    pub fn spawn<F>(stage: Stage, circuit: &str, f: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
    {
        let token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel();
        let task_token = token.clone();
        let task_circuit = circuit.to_string();
        rayon::spawn(move || {
            // a panic inside a rayon job would abort the process
            let result = catch_unwind(AssertUnwindSafe(|| f(&task_token))).unwrap_or_else(|_| {
                Err(PipelineError::Backend {
                    stage,
                    circuit: task_circuit,
                    message: "stage panicked".to_string(),
                })
            });
            // the receiver may already be gone
            let _ = sender.send(result);
        });
        Self {
            stage,
            circuit: circuit.to_string(),
            token,
            receiver,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Blocks until the stage finishes, fails or observes the cancellation.
    pub fn join(self) -> Result<T> {
        self.receiver.recv().unwrap_or_else(|_| {
            Err(PipelineError::Backend {
                stage: self.stage,
                circuit: self.circuit.clone(),
                message: "background task terminated without a result".to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn test_token() {
        let token = CancellationToken::new();
        assert!(token.check(Stage::Setup, "a_square").is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token
            .check(Stage::Setup, "a_square")
            .unwrap_err()
            .is_cancelled());
    }

    #[test]
    fn test_background_task() {
        let task = BackgroundTask::spawn(Stage::Compilation, "c", |_| Ok(21 * 2));
        assert_eq!(task.join().unwrap(), 42);
    }

    #[test]
    fn test_background_task_cancel() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let task = BackgroundTask::spawn(Stage::Setup, "c", move |token| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            token.check(Stage::Setup, "c")?;
            Ok(())
        });
        started_rx.recv().unwrap();
        task.cancel();
        release_tx.send(()).unwrap();
        let err = task.join().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), Some(Stage::Setup));
    }

    #[test]
    fn test_background_task_panic() {
        let task: BackgroundTask<()> =
            BackgroundTask::spawn(Stage::Setup, "c", |_| panic!("boom"));
        assert!(matches!(task.join(), Err(PipelineError::Backend { .. })));
    }
}
