//! Single-flight command execution.
//!
//! [`ExecutionCoordinator`] is the only entry point that starts a run. It
//! claims the [`ExecutionSlot`], hands the command to the [`CommandRunner`] on a
//! blocking worker, and drives the completion sequence:
//!
//! ```text
//! Running -> Completing -> notify observers -> clear history -> Idle
//! ```
//!
//! The slot is released last, so a run started right after completion never
//! sees the previous transcript.
//!
//! Each run carries a [`StopSignal`]. [`ExecutionCoordinator::stop`] raises it
//! before asking the runner to stop, so a stop issued before the runner has
//! started its process still cancels the run.

use std::sync::{Arc, Mutex};

use tokio::{runtime::Handle, task::JoinError};
use tracing::{debug, error, info, instrument};
use waka_model::{CommandLine, ExecStatus, RunState};

use crate::{
    broadcast::LogBroadcast,
    completion::CompletionRegistry,
    error::CoreError,
    runner::{CommandRunner, RunnerError, StopSignal},
    slot::ExecutionSlot,
    sync::lock,
};

/// Cheap to clone; every clone drives the same slot and registries.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    slot: ExecutionSlot,
    /// Stop signal of the run holding the slot; `None` outside `Running`.
    current: Mutex<Option<StopSignal>>,
    runner: Arc<dyn CommandRunner>,
    logs: Arc<LogBroadcast>,
    completion: Arc<CompletionRegistry>,
}

impl ExecutionCoordinator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        logs: Arc<LogBroadcast>,
        completion: Arc<CompletionRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: ExecutionSlot::new(),
                current: Mutex::new(None),
                runner,
                logs,
                completion,
            }),
        }
    }

    /// Validate `command`, claim the slot and schedule the run.
    ///
    /// Returns as soon as the run is scheduled. Must be called from within a
    /// tokio runtime.
    #[instrument(level = "debug", skip(self))]
    pub fn execute(&self, command: &str) -> Result<(), CoreError> {
        let command = CommandLine::new(command)?;

        let signal = StopSignal::new();
        {
            // claim and publish the signal together so `stop` never sees one without the other
            let mut current = lock(&self.inner.current);
            if !self.inner.slot.try_claim() {
                debug!("execution rejected: slot busy");
                return Err(CoreError::Busy);
            }
            *current = Some(signal.clone());
        }

        let handle = match Handle::try_current() {
            Ok(h) => h,
            Err(e) => {
                lock(&self.inner.current).take();
                self.inner.slot.release();
                return Err(CoreError::Runtime(e.to_string()));
            }
        };

        info!(%command, "execution started");
        let inner = Arc::clone(&self.inner);
        let runner = Arc::clone(&self.inner.runner);
        handle.spawn(async move {
            let joined = tokio::task::spawn_blocking(move || {
                let result = runner.run(&command, &signal);
                (command, result)
            })
            .await;
            inner.complete(joined);
        });
        Ok(())
    }

    /// Ask the runner to cancel the active run. No-op unless a run is active.
    pub fn stop(&self) {
        // Held across `runner.stop()`: the run cannot complete and be replaced meanwhile.
        let current = lock(&self.inner.current);
        match current.as_ref() {
            Some(signal) => {
                info!("stop requested");
                signal.raise();
                self.inner.runner.stop();
            }
            None => debug!(state = ?self.inner.slot.state(), "stop ignored: no active run"),
        }
    }

    pub fn state(&self) -> RunState {
        self.inner.slot.state()
    }

    pub fn logs(&self) -> &Arc<LogBroadcast> {
        &self.inner.logs
    }

    pub fn completion(&self) -> &Arc<CompletionRegistry> {
        &self.inner.completion
    }
}

impl Inner {
    fn complete(&self, joined: Result<(CommandLine, Result<ExecStatus, RunnerError>), JoinError>) {
        {
            let mut current = lock(&self.current);
            current.take();
            self.slot.begin_completion();
        }

        let status = match joined {
            Ok((command, Ok(status))) => {
                info!(%command, %status, "execution finished");
                status
            }
            Ok((command, Err(e))) => {
                error!(%command, error = %e, "execution failed");
                ExecStatus::FAILURE
            }
            Err(e) => {
                error!(error = %e, "execution worker aborted");
                ExecStatus::FAILURE
            }
        };

        let notified = self.completion.notify(status);
        debug!(%status, notified, "completion delivered");
        self.logs.clear();
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, RecordingConnection};
    use crate::connection::{CloseReason, Connection};
    use std::{
        sync::{
            Condvar, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    #[derive(Clone, Copy)]
    enum Outcome {
        Exit(i32),
        Fail,
        Panic,
    }

    /// Runner that blocks until `release` or `stop` is called.
    struct GatedRunner {
        outcome: Outcome,
        open: Mutex<bool>,
        cv: Condvar,
        stopped: AtomicUsize,
        runs: AtomicUsize,
        logs: Arc<LogBroadcast>,
    }

    impl GatedRunner {
        fn new(outcome: Outcome, logs: Arc<LogBroadcast>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                open: Mutex::new(false),
                cv: Condvar::new(),
                stopped: AtomicUsize::new(0),
                runs: AtomicUsize::new(0),
                logs,
            })
        }

        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.cv.notify_all();
        }
    }

    impl CommandRunner for GatedRunner {
        fn run(&self, command: &CommandLine, _signal: &StopSignal) -> Result<ExecStatus, RunnerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.logs.publish(format!("running {command}"));

            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cv.wait(open).unwrap();
            }
            drop(open);

            if self.stopped.load(Ordering::SeqCst) > 0 {
                return Ok(ExecStatus::CANCELLED);
            }
            match self.outcome {
                Outcome::Exit(code) => Ok(ExecStatus::new(code)),
                Outcome::Fail => Err(RunnerError::Other("boom".into())),
                Outcome::Panic => panic!("runner exploded"),
            }
        }

        fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            self.release();
        }
    }

    fn setup(outcome: Outcome) -> (ExecutionCoordinator, Arc<GatedRunner>) {
        let logs = Arc::new(LogBroadcast::new());
        let runner = GatedRunner::new(outcome, Arc::clone(&logs));
        let coordinator = ExecutionCoordinator::new(
            runner.clone(),
            logs,
            Arc::new(CompletionRegistry::new()),
        );
        (coordinator, runner)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn run_to_completion(outcome: Outcome) -> (ExecutionCoordinator, Arc<RecordingConnection>) {
        let (coordinator, runner) = setup(outcome);
        let observer = RecordingConnection::new();
        coordinator.completion().add_observer(observer.clone());

        coordinator.execute("echo hi").unwrap();
        wait_until(|| runner.runs.load(Ordering::SeqCst) == 1).await;
        runner.release();
        wait_until(|| coordinator.state().is_idle()).await;
        (coordinator, observer)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_command_is_rejected_without_claiming() {
        let (coordinator, runner) = setup(Outcome::Exit(0));

        assert!(matches!(coordinator.execute(""), Err(CoreError::Validation(_))));
        assert!(matches!(coordinator.execute(" \t\n"), Err(CoreError::Validation(_))));
        assert_eq!(coordinator.state(), RunState::Idle);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_execute_admits_exactly_one() {
        let (coordinator, runner) = setup(Outcome::Exit(0));

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let c = coordinator.clone();
                tokio::spawn(async move { c.execute("sleep 1") })
            })
            .collect();

        let mut accepted = 0;
        let mut busy = 0;
        for a in attempts {
            match a.await.unwrap() {
                Ok(()) => accepted += 1,
                Err(CoreError::Busy) => busy += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(busy, 15);

        wait_until(|| runner.runs.load(Ordering::SeqCst) == 1).await;
        runner.release();
        wait_until(|| coordinator.state().is_idle()).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completion_notifies_then_clears_and_frees_slot() {
        let (coordinator, observer) = run_to_completion(Outcome::Exit(7)).await;

        assert_eq!(
            observer.events(),
            vec![Event::Close(CloseReason::Completed(ExecStatus::new(7)))]
        );
        assert_eq!(coordinator.logs().history_len(), 0);
        assert_eq!(coordinator.completion().observer_count(), 0);
        assert_eq!(coordinator.state(), RunState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runner_error_completes_with_failure() {
        let (coordinator, observer) = run_to_completion(Outcome::Fail).await;
        assert_eq!(
            observer.events(),
            vec![Event::Close(CloseReason::Completed(ExecStatus::FAILURE))]
        );
        assert!(coordinator.execute("echo again").is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runner_panic_completes_with_failure() {
        let (coordinator, observer) = run_to_completion(Outcome::Panic).await;
        assert_eq!(
            observer.events(),
            vec![Event::Close(CloseReason::Completed(ExecStatus::FAILURE))]
        );
        assert_eq!(coordinator.state(), RunState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn late_subscriber_sees_current_run_transcript() {
        let (coordinator, runner) = setup(Outcome::Exit(0));
        coordinator.execute("echo hi").unwrap();
        wait_until(|| runner.runs.load(Ordering::SeqCst) == 1).await;

        let late = RecordingConnection::new();
        coordinator.logs().subscribe(late.clone());
        coordinator.completion().add_observer(late.clone());
        runner.release();
        wait_until(|| coordinator.state().is_idle()).await;

        assert_eq!(
            late.events(),
            vec![
                Event::Text("running echo hi".into()),
                Event::Close(CloseReason::Completed(ExecStatus::SUCCESS)),
            ]
        );
        assert!(!late.is_open());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_reaches_runner_only_while_running() {
        let (coordinator, runner) = setup(Outcome::Exit(0));
        coordinator.stop();
        assert_eq!(runner.stopped.load(Ordering::SeqCst), 0);

        let observer = RecordingConnection::new();
        coordinator.completion().add_observer(observer.clone());
        coordinator.execute("sleep 60").unwrap();
        wait_until(|| runner.runs.load(Ordering::SeqCst) == 1).await;

        coordinator.stop();
        wait_until(|| coordinator.state().is_idle()).await;

        assert_eq!(runner.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.events(),
            vec![Event::Close(CloseReason::Completed(ExecStatus::CANCELLED))]
        );
    }

    /// Only honours the stop signal, and only once it has "started" its work,
    /// like a runner whose `stop` is a no-op until its process exists.
    struct LateRegisteringRunner {
        started: AtomicUsize,
        direct_stops: AtomicUsize,
    }

    impl CommandRunner for LateRegisteringRunner {
        fn run(&self, _command: &CommandLine, signal: &StopSignal) -> Result<ExecStatus, RunnerError> {
            std::thread::sleep(Duration::from_millis(50));
            self.started.fetch_add(1, Ordering::SeqCst);

            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while std::time::Instant::now() < deadline {
                if signal.is_raised() {
                    return Ok(ExecStatus::CANCELLED);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(ExecStatus::SUCCESS)
        }

        fn stop(&self) {
            self.direct_stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_right_after_execute_cancels_the_run() {
        let runner = Arc::new(LateRegisteringRunner {
            started: AtomicUsize::new(0),
            direct_stops: AtomicUsize::new(0),
        });
        let coordinator = ExecutionCoordinator::new(
            runner.clone(),
            Arc::new(LogBroadcast::new()),
            Arc::new(CompletionRegistry::new()),
        );

        for _ in 0..5 {
            let observer = RecordingConnection::new();
            coordinator.completion().add_observer(observer.clone());

            coordinator.execute("sleep 2").unwrap();
            assert_eq!(coordinator.state(), RunState::Running);
            coordinator.stop();
            wait_until(|| coordinator.state().is_idle()).await;

            assert_eq!(
                observer.events(),
                vec![Event::Close(CloseReason::Completed(ExecStatus::CANCELLED))]
            );
        }
        assert_eq!(runner.started.load(Ordering::SeqCst), 5);
        assert_eq!(runner.direct_stops.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_after_completion_is_ignored() {
        let (coordinator, runner) = setup(Outcome::Exit(0));
        coordinator.execute("echo hi").unwrap();
        wait_until(|| runner.runs.load(Ordering::SeqCst) == 1).await;
        runner.release();
        wait_until(|| coordinator.state().is_idle()).await;

        coordinator.stop();
        assert_eq!(runner.stopped.load(Ordering::SeqCst), 0);
        assert!(lock(&coordinator.inner.current).is_none());
    }

    #[test]
    fn execute_outside_runtime_releases_slot() {
        let (coordinator, _runner) = setup(Outcome::Exit(0));
        assert!(matches!(coordinator.execute("echo hi"), Err(CoreError::Runtime(_))));
        assert_eq!(coordinator.state(), RunState::Idle);
    }
}
