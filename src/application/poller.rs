use super::guard::EventSink;
use crate::config::PollPolicy;
use crate::domain::ports::StatusFetcherRef;
use crate::domain::session::{PollEvent, PollSession, PollState, SubjectId};
use crate::domain::status::Classify;
use crate::error::{Result, WatchError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type PollEvents<P> = mpsc::UnboundedReceiver<PollEvent<P>>;

struct ActiveSession<P> {
    sink: Arc<EventSink<PollEvent<P>>>,
    cancel: CancellationToken,
    task: JoinHandle<PollSession<P>>,
}

/// Drives one remote operation at a time to a terminal state.
///
/// Each call to [`BoundedPoller::start`] creates a fresh [`PollSession`] owned
/// by a spawned task. The poller keeps the task handle, its cancellation token
/// and the armed flag, and releases all three on [`BoundedPoller::stop`] or drop.
pub struct BoundedPoller<P> {
    fetcher: StatusFetcherRef<P>,
    policy: PollPolicy,
    active: Option<ActiveSession<P>>,
}

impl<P> BoundedPoller<P>
where
    P: Classify + Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: StatusFetcherRef<P>, policy: PollPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            fetcher,
            policy,
            active: None,
        })
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// True while a session is running and has not been stopped.
    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.sink.is_armed())
    }

    /// Begins observing `subject`. Fails with [`WatchError::AlreadyActive`]
    /// while a previous session is still checking.
    pub fn start(&mut self, subject: SubjectId) -> Result<PollEvents<P>> {
        if self.is_active() {
            return Err(WatchError::AlreadyActive);
        }
        if let Some(previous) = self.active.take() {
            previous.cancel.cancel();
        }

        let (sink, events) = EventSink::new();
        let cancel = CancellationToken::new();
        let session = PollSession::new(subject, &self.policy);
        let task = tokio::spawn(run_session(
            session,
            Arc::clone(&self.fetcher),
            Arc::clone(&sink),
            cancel.clone(),
            self.policy.interval(),
        ));

        self.active = Some(ActiveSession { sink, cancel, task });
        Ok(events)
    }

    /// Stops the current session. Idempotent. A fetch still in flight is
    /// dropped and its result never reaches the session.
    pub fn stop(&mut self) {
        if let Some(active) = &self.active {
            if active.sink.disarm() {
                debug!("poll session stopped");
            }
            active.cancel.cancel();
        }
    }

    /// Waits for the current session's task and hands back its final state.
    pub async fn finish(&mut self) -> Option<PollSession<P>> {
        let active = self.active.take()?;
        match active.task.await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "poll task did not complete");
                None
            }
        }
    }
}

impl<P> Drop for BoundedPoller<P> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.sink.disarm();
            active.cancel.cancel();
        }
    }
}

/// Fetches, classifies and waits until the session reaches a terminal state.
///
/// The attempt cap is checked before the cadence wait, so a session that is
/// still pending after its last allowed fetch times out immediately rather
/// than one interval later. The timeout is therefore reported about
/// `(max_attempts - 1) * interval` after start.
async fn run_session<P>(
    mut session: PollSession<P>,
    fetcher: StatusFetcherRef<P>,
    sink: Arc<EventSink<PollEvent<P>>>,
    cancel: CancellationToken,
    interval: Duration,
) -> PollSession<P>
where
    P: Classify + Clone + Send + Sync + 'static,
{
    info!(
        subject = %session.subject(),
        max_attempts = session.max_attempts(),
        interval_ms = session.interval_ms(),
        "poll session started"
    );
    sink.emit(PollEvent::from_session(&session));

    loop {
        if session.check_exhausted() {
            warn!(
                subject = %session.subject(),
                attempts = session.attempt_count(),
                "poll attempts exhausted"
            );
            break;
        }

        // Every attempt after the first waits for the cadence; the previous
        // fetch has already settled here, so requests never overlap.
        if session.attempt_count() > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return session,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return session,
            fetched = fetcher.fetch_status(session.subject()) => fetched,
        };

        let Some(state) = sink.guarded(|| session.record(fetched)) else {
            debug!(subject = %session.subject(), "discarding fetch that settled after stop");
            return session;
        };

        match state {
            PollState::Checking => {
                debug!(
                    subject = %session.subject(),
                    attempt = session.attempt_count(),
                    "operation still pending"
                );
                sink.emit(PollEvent::from_session(&session));
            }
            PollState::Errored => {
                warn!(
                    subject = %session.subject(),
                    error = ?session.last_error(),
                    "status fetch failed, ending session"
                );
                break;
            }
            _ => break,
        }
    }

    info!(
        subject = %session.subject(),
        state = ?session.state(),
        attempts = session.attempt_count(),
        "poll session finished"
    );
    sink.emit_final(PollEvent::from_session(&session));
    session
}
