//! Cooperative driver for staged case bodies.
//!
//! A case body is an `async` block that calls `cx.checkpoint().await` at each
//! point where the deploy may happen. The driver polls the body until the next
//! checkpoint fires (or the body completes) and hands control back to the
//! caller. Between checkpoints the body may await real I/O; the driver keeps
//! polling through those suspensions.

use crate::{BoxError, CaseFailure, EpochStatus};
use std::future::{Future, poll_fn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

pub type CaseFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>>>>;

/// Handle passed into every case body.
#[derive(Clone, Debug)]
pub struct StageContext {
    signal: Arc<AtomicBool>,
    epoch: EpochStatus,
}

impl StageContext {
    pub fn new(epoch: EpochStatus) -> Self {
        Self {
            signal: Arc::new(AtomicBool::new(false)),
            epoch,
        }
    }

    /// Suspension point. The deploy may run before this future resolves.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            signal: Arc::clone(&self.signal),
            yielded: false,
        }
    }

    pub fn epoch(&self) -> &EpochStatus {
        &self.epoch
    }

    fn take_signal(&self) -> bool {
        self.signal.swap(false, Ordering::SeqCst)
    }
}

#[must_use = "checkpoints do nothing unless awaited"]
#[derive(Debug)]
pub struct Checkpoint {
    signal: Arc<AtomicBool>,
    yielded: bool,
}

impl Future for Checkpoint {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        self.signal.store(true, Ordering::SeqCst);
        Poll::Pending
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    Checkpoint,
    Completed,
}

enum Step {
    Paused,
    Finished(Result<(), BoxError>),
    Panicked(String),
}

/// One live run of a case body.
pub struct StagedExecution {
    context: StageContext,
    future: Option<CaseFuture>,
}

impl StagedExecution {
    pub fn start(context: StageContext, future: CaseFuture) -> Self {
        Self {
            context,
            future: Some(future),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.future.is_none()
    }

    /// Runs the body up to its next checkpoint or to completion. Advancing a
    /// finished execution reports `Completed` again.
    pub async fn advance(&mut self) -> Result<Advance, CaseFailure> {
        let Some(future) = self.future.as_mut() else {
            return Ok(Advance::Completed);
        };
        let context = &self.context;
        let step = poll_fn(|cx| {
            match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
                Ok(Poll::Ready(result)) => Poll::Ready(Step::Finished(result)),
                Ok(Poll::Pending) if context.take_signal() => Poll::Ready(Step::Paused),
                Ok(Poll::Pending) => Poll::Pending,
                Err(payload) => Poll::Ready(Step::Panicked(panic_message(payload))),
            }
        })
        .await;

        match step {
            Step::Paused => Ok(Advance::Checkpoint),
            Step::Finished(Ok(())) => {
                self.future = None;
                Ok(Advance::Completed)
            }
            Step::Finished(Err(error)) => {
                self.future = None;
                Err(CaseFailure::from_body_error(error))
            }
            Step::Panicked(message) => {
                self.future = None;
                Err(CaseFailure::Panicked(message))
            }
        }
    }

    /// Drives to completion, returning how many checkpoints were crossed.
    pub async fn finish(&mut self) -> Result<u32, CaseFailure> {
        let mut crossed = 0;
        while self.advance().await? == Advance::Checkpoint {
            crossed += 1;
        }
        Ok(crossed)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EpochState;
    use std::sync::Mutex;

    fn recording_execution(log: Arc<Mutex<Vec<&'static str>>>) -> StagedExecution {
        let context = StageContext::new(EpochState::new().status());
        let cx = context.clone();
        StagedExecution::start(
            context,
            Box::pin(async move {
                log.lock().expect("log mutex").push("a");
                cx.checkpoint().await;
                log.lock().expect("log mutex").push("b");
                tokio::task::yield_now().await;
                cx.checkpoint().await;
                log.lock().expect("log mutex").push("c");
                Ok::<(), BoxError>(())
            }),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn advance_stops_at_each_checkpoint_and_polls_through_real_awaits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut execution = recording_execution(Arc::clone(&log));

        assert_eq!(execution.advance().await, Ok(Advance::Checkpoint));
        assert_eq!(log.lock().expect("log mutex").as_slice(), &["a"]);
        assert_eq!(execution.advance().await, Ok(Advance::Checkpoint));
        assert_eq!(log.lock().expect("log mutex").as_slice(), &["a", "b"]);
        assert!(!execution.is_finished());
        assert_eq!(execution.advance().await, Ok(Advance::Completed));
        assert!(execution.is_finished());
        assert_eq!(execution.advance().await, Ok(Advance::Completed));
        assert_eq!(log.lock().expect("log mutex").as_slice(), &["a", "b", "c"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn finish_expected_crossed_count() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut execution = recording_execution(log);
        assert_eq!(execution.finish().await, Ok(2));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn advance_body_error_expected_failed_and_finished() {
        let context = StageContext::new(EpochState::new().status());
        let mut execution = StagedExecution::start(
            context,
            Box::pin(async { Err::<(), BoxError>("attr mismatch".into()) }),
        );
        assert_eq!(
            execution.advance().await,
            Err(CaseFailure::Failed("attr mismatch".to_string()))
        );
        assert!(execution.is_finished());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn advance_panic_expected_panicked_failure() {
        let context = StageContext::new(EpochState::new().status());
        let cx = context.clone();
        let mut execution = StagedExecution::start(
            context,
            Box::pin(async move {
                cx.checkpoint().await;
                let attr = 2;
                assert_eq!(attr, 555, "attr should have been bumped");
                Ok::<(), BoxError>(())
            }),
        );
        assert_eq!(execution.advance().await, Ok(Advance::Checkpoint));
        let failure = execution.advance().await.expect_err("panic should surface");
        assert!(matches!(failure, CaseFailure::Panicked(ref message) if message.contains("attr should have been bumped")));
    }
}
