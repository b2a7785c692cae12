//! The UI-bound scheduler.
//!
//! One dedicated OS thread drives a current-thread runtime with a
//! [`LocalSet`]. Jobs submitted through [`UiScheduler::invoke`] run to
//! completion there one at a time; futures submitted through
//! [`UiScheduler::run_pinned`] become local tasks, so every poll (and every
//! resumption after a suspension point) happens on that same thread.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::thread::{self, JoinHandle, ThreadId};

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("UI scheduler has stopped")]
    Stopped,
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("tool body suspended on the UI thread; UI-only tools must complete synchronously")]
    Suspended,
}

/// Handle to the UI thread. Dropping it stops the thread after queued jobs.
#[derive(Debug)]
pub struct UiScheduler {
    tx: Option<mpsc::UnboundedSender<Job>>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl UiScheduler {
    /// Spawn the UI thread.
    pub fn start() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let handle = thread::Builder::new()
            .name("steward-ui".to_string())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    while let Some(job) = rx.recv().await {
                        job();
                    }
                });
                tracing::debug!("UI scheduler stopped");
            })?;

        Ok(Self {
            tx: Some(tx),
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `f` on the UI thread and wait for its result.
    ///
    /// `f` runs as a single job: no other UI work interleaves with it.
    pub async fn invoke<F, R>(&self, f: F) -> Result<R, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            let _ = done_tx.send(result);
        }))?;
        done_rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Run the future built by `make` as a task pinned to the UI thread.
    ///
    /// The future itself need not be `Send`; it is created and polled only on
    /// the UI thread.
    pub async fn run_pinned<F, Fut, R>(&self, make: F) -> Result<R, SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = R> + 'static,
        R: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(Box::new(move || {
            tokio::task::spawn_local(async move {
                let result = match std::panic::catch_unwind(AssertUnwindSafe(make)) {
                    Ok(fut) => AssertUnwindSafe(fut)
                        .catch_unwind()
                        .await
                        .map_err(panic_message),
                    Err(payload) => Err(panic_message(payload)),
                };
                let _ = done_tx.send(result);
            });
        }))?;
        done_rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    fn submit(&self, job: Job) -> Result<(), SchedulerError> {
        self.tx
            .as_ref()
            .ok_or(SchedulerError::Stopped)?
            .send(job)
            .map_err(|_| SchedulerError::Stopped)
    }
}

impl Drop for UiScheduler {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take()
            && !self.is_ui_thread()
            && handle.join().is_err()
        {
            tracing::warn!("UI scheduler thread panicked");
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> SchedulerError {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    SchedulerError::Panicked(message)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::{SchedulerError, UiScheduler};

    #[tokio::test]
    async fn invoke_runs_on_the_ui_thread() {
        let scheduler = Arc::new(UiScheduler::start().unwrap());
        assert!(!scheduler.is_ui_thread());
        let probe = Arc::clone(&scheduler);
        assert!(scheduler.invoke(move || probe.is_ui_thread()).await.unwrap());
    }

    #[tokio::test]
    async fn invoke_captures_panics() {
        let scheduler = UiScheduler::start().unwrap();
        let err = scheduler
            .invoke(|| -> u32 { panic!("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::Panicked("boom".to_string()));
        // The thread survives a panicking job.
        assert_eq!(scheduler.invoke(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn pinned_future_resumes_on_the_ui_thread() {
        let scheduler = Arc::new(UiScheduler::start().unwrap());
        let probe = Arc::clone(&scheduler);
        let all_on_ui = scheduler
            .run_pinned(move || async move {
                // Rc is !Send; holding it across an await only compiles for local tasks.
                let marker = Rc::new(());
                let before = probe.is_ui_thread();
                tokio::time::sleep(Duration::from_millis(5)).await;
                let after = probe.is_ui_thread();
                drop(marker);
                before && after
            })
            .await
            .unwrap();
        assert!(all_on_ui);
    }

    #[tokio::test]
    async fn pinned_tasks_interleave_at_suspension_points() {
        let scheduler = Arc::new(UiScheduler::start().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));

        let slow_counter = Arc::clone(&counter);
        let slow = scheduler.run_pinned(move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow_counter.load(Ordering::SeqCst)
        });
        let quick_counter = Arc::clone(&counter);
        let quick = scheduler.invoke(move || quick_counter.fetch_add(1, Ordering::SeqCst));

        let (seen_by_slow, _) = tokio::join!(slow, quick);
        assert_eq!(seen_by_slow.unwrap(), 1);
    }

    #[tokio::test]
    async fn pinned_panics_are_captured() {
        let scheduler = UiScheduler::start().unwrap();
        let err = scheduler
            .run_pinned(|| async { panic!("pinned boom") })
            .await
            .map(|()| ())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Panicked(msg) if msg == "pinned boom"));
    }
}
