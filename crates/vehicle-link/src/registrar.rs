//! Background REGISTER retry loop.
//!
//! # Design
//!
//! The remote may not be listening yet when the AP comes up, so REGISTER is
//! retried with a fixed back-off until it is acknowledged. There is no
//! attempt limit; the loop ends on success or when cancelled through a
//! `watch` channel. At most one loop runs per link.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::arbitration::{Arbiter, RegistrationState};
use crate::codec::CommandRecord;
use crate::correlator::Correlator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationResult {
    Registered,
    /// Already registered when the loop started; nothing was sent.
    AlreadyRegistered,
    Cancelled,
}

/// Summary of one loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub attempts: u32,
    pub backoff_sleeps: u32,
    pub result: RegistrationResult,
}

/// One run of the retry loop, with everything it needs captured.
pub struct RegistrationLoop {
    pub(crate) correlator: Arc<Correlator>,
    pub(crate) arbiter: Arc<Arbiter>,
    pub(crate) request: CommandRecord,
    pub(crate) timeout: Duration,
    pub(crate) backoff: Duration,
}

impl RegistrationLoop {
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> RegistrationOutcome {
        let mut attempts = 0u32;
        let mut backoff_sleeps = 0u32;
        let finish = |attempts, backoff_sleeps, result| RegistrationOutcome {
            attempts,
            backoff_sleeps,
            result,
        };

        loop {
            if *cancel.borrow() {
                self.arbiter.registration_failed();
                return finish(attempts, backoff_sleeps, RegistrationResult::Cancelled);
            }
            match self.arbiter.state() {
                RegistrationState::Registered { .. } => {
                    let result = if attempts == 0 {
                        RegistrationResult::AlreadyRegistered
                    } else {
                        RegistrationResult::Registered
                    };
                    return finish(attempts, backoff_sleeps, result);
                }
                RegistrationState::Unregistered => {
                    self.arbiter.begin_registration();
                }
                RegistrationState::Registering => {}
            }

            attempts += 1;
            let sent = tokio::select! {
                biased;
                _ = cancel.changed() => {
                    self.arbiter.registration_failed();
                    tracing::debug!(attempts, "registration cancelled mid-request");
                    return finish(attempts, backoff_sleeps, RegistrationResult::Cancelled);
                }
                sent = self.correlator.exchange(&self.request, self.timeout) => sent,
            };

            match sent {
                Ok(_) => {
                    tracing::info!(
                        attempts,
                        state = ?self.arbiter.state(),
                        "register acknowledged"
                    );
                    return finish(attempts, backoff_sleeps, RegistrationResult::Registered);
                }
                Err(err) => {
                    self.arbiter.registration_failed();
                    tracing::debug!(attempts, error = %err, "register attempt failed, backing off");
                }
            }

            backoff_sleeps += 1;
            tokio::select! {
                biased;
                _ = cancel.changed() => {
                    self.arbiter.registration_failed();
                    return finish(attempts, backoff_sleeps, RegistrationResult::Cancelled);
                }
                () = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}

/// One spawned loop: its handle, its cancel signal, and where it publishes
/// its outcome.
struct ActiveRun {
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
    outcome: watch::Receiver<Option<RegistrationOutcome>>,
}

/// Owns the at-most-one registration task.
///
/// The latest run stays recorded until the next trigger replaces it, so
/// waiting on it (or abandoning that wait) never frees the slot for a second
/// loop while the first is still backing off.
pub struct Registrar {
    current: Mutex<Option<ActiveRun>>,
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("running", &self.is_running())
            .finish()
    }
}

impl Registrar {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Spawn `run` unless a loop is already running or the arbiter is not
    /// `Unregistered`. Returns `false` without spawning when called outside
    /// a Tokio runtime.
    pub fn trigger(&self, run: RegistrationLoop) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("registration requested outside a tokio runtime");
            return false;
        };
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::debug!("registration loop already running");
            return false;
        }
        let state = run.arbiter.state();
        if state != RegistrationState::Unregistered {
            tracing::debug!(?state, "registration not needed");
            return false;
        }
        let (cancel, cancel_rx) = watch::channel(false);
        let (done, outcome) = watch::channel(None);
        let handle = runtime.spawn(async move {
            let result = run.run(cancel_rx).await;
            done.send_replace(Some(result));
        });
        *current = Some(ActiveRun {
            handle,
            cancel,
            outcome,
        });
        true
    }

    /// Wait for the latest loop to finish and return its outcome.
    ///
    /// `None` when no loop was ever started or the task died.
    pub async fn wait(&self) -> Option<RegistrationOutcome> {
        let mut outcome = self.current.lock().as_ref()?.outcome.clone();
        match outcome.wait_for(Option::is_some).await {
            Ok(done) => *done,
            Err(_) => {
                tracing::error!("registration task ended without an outcome");
                None
            }
        }
    }

    pub fn cancel(&self) {
        if let Some(run) = self.current.lock().as_ref() {
            run.cancel.send_replace(true);
        }
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn shutdown(&self) -> Option<RegistrationOutcome> {
        self.cancel();
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Body, Header};
    use crate::error::TransportError;
    use crate::gate::Transport;
    use crate::hal::RecordingHal;

    const HEADER: Header = Header {
        category: 8,
        major: 1,
        minor: 0,
    };

    struct Silent;

    impl Transport for Silent {
        fn send(&self, _frame: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn registration(correlator: &Arc<Correlator>, arbiter: &Arc<Arbiter>) -> RegistrationLoop {
        RegistrationLoop {
            correlator: Arc::clone(correlator),
            arbiter: Arc::clone(arbiter),
            request: CommandRecord::request(
                HEADER,
                0,
                Body::RegisterRequest { partition_id: 0xff },
            ),
            timeout: Duration::from_millis(1000),
            backoff: Duration::from_millis(50),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_keeps_retrying_until_cancelled() {
        let correlator = Arc::new(Correlator::new());
        correlator.bind(Arc::new(Silent));
        let arbiter = Arc::new(Arbiter::new(Arc::new(RecordingHal::new()), HEADER.category));
        let registrar = Registrar::new();

        assert!(registrar.trigger(registration(&correlator, &arbiter)));
        assert!(!registrar.trigger(registration(&correlator, &arbiter)));

        tokio::time::sleep(Duration::from_millis(3200)).await;
        let outcome = registrar.shutdown().await.expect("outcome");
        assert_eq!(outcome.result, RegistrationResult::Cancelled);
        assert!(outcome.attempts >= 3, "attempts = {}", outcome.attempts);
        assert_eq!(arbiter.state(), RegistrationState::Unregistered);
        assert!(!registrar.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn unbound_channel_backs_off_between_attempts() {
        let correlator = Arc::new(Correlator::new());
        let arbiter = Arc::new(Arbiter::new(Arc::new(RecordingHal::new()), HEADER.category));
        let registrar = Registrar::new();

        registrar.trigger(registration(&correlator, &arbiter));
        tokio::time::sleep(Duration::from_millis(175)).await;
        let outcome = registrar.shutdown().await.expect("outcome");
        assert_eq!(outcome.result, RegistrationResult::Cancelled);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.backoff_sleeps, 4);
    }

    #[tokio::test]
    async fn trigger_is_noop_when_registering() {
        let correlator = Arc::new(Correlator::new());
        let arbiter = Arc::new(Arbiter::new(Arc::new(RecordingHal::new()), HEADER.category));
        assert!(arbiter.begin_registration());
        let registrar = Registrar::new();
        assert!(!registrar.trigger(registration(&correlator, &arbiter)));
        assert!(registrar.wait().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_keeps_the_loop_guarded() {
        let correlator = Arc::new(Correlator::new());
        let arbiter = Arc::new(Arbiter::new(Arc::new(RecordingHal::new()), HEADER.category));
        let registrar = Registrar::new();

        assert!(registrar.trigger(registration(&correlator, &arbiter)));
        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), registrar.wait()).await;
        assert!(abandoned.is_err());
        assert!(registrar.is_running());
        assert!(!registrar.trigger(registration(&correlator, &arbiter)));

        let outcome = registrar.shutdown().await.expect("outcome");
        assert_eq!(outcome.result, RegistrationResult::Cancelled);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(registrar.wait().await, Some(outcome));
    }

    #[test]
    fn trigger_outside_runtime_is_refused() {
        let correlator = Arc::new(Correlator::new());
        let arbiter = Arc::new(Arbiter::new(Arc::new(RecordingHal::new()), HEADER.category));
        let registrar = Registrar::new();
        assert!(!registrar.trigger(registration(&correlator, &arbiter)));
        assert!(!registrar.is_running());
        assert_eq!(arbiter.state(), RegistrationState::Unregistered);
    }
}
