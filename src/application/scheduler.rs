use super::guard::EventSink;
use crate::config::RefreshPolicy;
use crate::domain::command::{ApplyCommand, Command, CommandName};
use crate::domain::ports::{CommandIssuerRef, SnapshotFetcherRef};
use crate::domain::session::{CommandResolution, RefreshEvent, RefreshSession};
use crate::error::{Result, WatchError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type RefreshEvents<S> = mpsc::UnboundedReceiver<RefreshEvent<S>>;

struct ActiveTimer<S> {
    sink: Arc<EventSink<RefreshEvent<S>>>,
    cancel: CancellationToken,
    refresh_now: Arc<Notify>,
}

/// Keeps a continuously observed view fresh on a fixed cadence.
///
/// Fetch failures are reported as events and never disarm the timer. Operator
/// commands go through [`RefreshScheduler::issue_command`], which applies any
/// known local effect immediately and rolls it back if the backend refuses.
pub struct RefreshScheduler<S> {
    fetcher: SnapshotFetcherRef<S>,
    issuer: CommandIssuerRef<S>,
    policy: RefreshPolicy,
    session: Arc<Mutex<RefreshSession<S>>>,
    timer: Option<ActiveTimer<S>>,
}

fn lock<S>(session: &Mutex<RefreshSession<S>>) -> MutexGuard<'_, RefreshSession<S>> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> RefreshScheduler<S>
where
    S: ApplyCommand + Clone + Send + Sync + 'static,
{
    pub fn new(
        fetcher: SnapshotFetcherRef<S>,
        issuer: CommandIssuerRef<S>,
        policy: RefreshPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            fetcher,
            issuer,
            session: Arc::new(Mutex::new(RefreshSession::new(&policy))),
            policy,
            timer: None,
        })
    }

    pub fn is_active(&self) -> bool {
        lock(&self.session).is_active()
    }

    pub fn last_snapshot(&self) -> Option<S> {
        lock(&self.session).last_snapshot().cloned()
    }

    /// The snapshot with any optimistic command effect layered on top.
    pub fn view(&self) -> Option<S> {
        lock(&self.session).view().cloned()
    }

    pub fn pending_command(&self) -> Option<CommandName> {
        lock(&self.session).pending_command()
    }

    /// Arms the recurring timer. The first fetch happens immediately.
    pub fn start(&mut self) -> Result<RefreshEvents<S>> {
        {
            let mut session = lock(&self.session);
            if session.is_active() {
                return Err(WatchError::AlreadyActive);
            }
            session.set_active(true);
        }

        // Each armed timer gets its own wake-up, so a refresh requested for
        // one run can never leak into the next.
        let (sink, events) = EventSink::new();
        let cancel = CancellationToken::new();
        let refresh_now = Arc::new(Notify::new());
        tokio::spawn(run_timer(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.session),
            Arc::clone(&sink),
            Arc::clone(&refresh_now),
            cancel.clone(),
            self.policy.interval(),
        ));
        info!(interval_ms = self.policy.interval_ms, "refresh timer armed");

        self.timer = Some(ActiveTimer {
            sink,
            cancel,
            refresh_now,
        });
        Ok(events)
    }

    /// Disarms the timer. Calling it while inactive does nothing.
    pub fn stop(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        timer.sink.disarm();
        timer.cancel.cancel();
        lock(&self.session).set_active(false);
        info!("refresh timer disarmed");
    }

    /// Sends `command` to the backend.
    ///
    /// While the call is outstanding the command is recorded as pending and
    /// its local effect, if the snapshot type knows one, is shown. On success
    /// the effect is kept or, when there is none, an out-of-cycle refresh is
    /// requested. On failure the view returns to the last fetched snapshot and
    /// the error is returned as [`WatchError::CommandRejected`]. Dropping the
    /// returned future before the backend answers rolls the command back too.
    pub async fn issue_command(&self, command: Command) -> Result<CommandResolution> {
        let sink = self.timer.as_ref().map(|t| t.sink.as_ref());
        let name = command.name;

        update(&self.session, sink, |session| {
            session.begin_command(&command)?;
            let event = RefreshEvent::CommandPending {
                command: name,
                payload: session.view().cloned(),
            };
            Ok(((), event))
        })?;
        let mut in_flight = InFlight {
            session: &self.session,
            sink,
            command: name,
            settled: false,
        };
        debug!(command = %name, "command issued");

        let rejection = match self.issuer.issue_command(&command).await {
            Ok(outcome) if outcome.ok => {
                in_flight.settled = true;
                let resolution = update(&self.session, sink, |session| {
                    let resolution = session.complete_command(outcome);
                    let event = RefreshEvent::CommandApplied {
                        command: name,
                        payload: session.view().cloned(),
                    };
                    Ok((resolution, event))
                })?;
                info!(command = %name, ?resolution, "command accepted");
                let armed = self.timer.as_ref().filter(|t| t.sink.is_armed());
                if let (CommandResolution::NeedsRefresh, Some(timer)) = (resolution, armed) {
                    timer.refresh_now.notify_one();
                }
                return Ok(resolution);
            }
            Ok(_) => WatchError::CommandRejected(format!("{name} refused by backend")),
            Err(e) => WatchError::CommandRejected(format!("{name}: {e}")),
        };

        warn!(command = %name, error = %rejection, "rolling back command");
        in_flight.roll_back(rejection.to_string());
        Err(rejection)
    }
}

/// Applies `f` to the session, publishing its event while the timer is
/// armed. The session is updated either way.
fn update<S, T>(
    session: &Mutex<RefreshSession<S>>,
    sink: Option<&EventSink<RefreshEvent<S>>>,
    f: impl FnOnce(&mut RefreshSession<S>) -> Result<(T, RefreshEvent<S>)>,
) -> Result<T> {
    // Lock order is sink then session, the same as the timer task.
    let apply = || match f(&mut lock(session)) {
        Ok((output, event)) => (Ok(output), Some(event)),
        Err(e) => (Err(e), None),
    };
    match sink {
        Some(sink) => sink.publish(apply),
        None => apply().0,
    }
}

/// A command between `begin_command` and the backend's answer. Unless it is
/// settled, dropping it rolls the command back so the session never keeps a
/// pending command nobody will complete.
struct InFlight<'a, S: ApplyCommand + Clone> {
    session: &'a Mutex<RefreshSession<S>>,
    sink: Option<&'a EventSink<RefreshEvent<S>>>,
    command: CommandName,
    settled: bool,
}

impl<S: ApplyCommand + Clone> InFlight<'_, S> {
    fn roll_back(&mut self, error: String) {
        self.settled = true;
        let command = self.command;
        let _ = update(self.session, self.sink, |session| {
            session.fail_command();
            let event = RefreshEvent::CommandRolledBack {
                command,
                error,
                payload: session.view().cloned(),
            };
            Ok(((), event))
        });
    }
}

impl<S: ApplyCommand + Clone> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(command = %self.command, "command abandoned before the backend answered");
            self.roll_back(format!("{} abandoned before the backend answered", self.command));
        }
    }
}

impl<S> Drop for RefreshScheduler<S> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.sink.disarm();
            timer.cancel.cancel();
        }
    }
}

async fn run_timer<S>(
    fetcher: SnapshotFetcherRef<S>,
    session: Arc<Mutex<RefreshSession<S>>>,
    sink: Arc<EventSink<RefreshEvent<S>>>,
    refresh_now: Arc<Notify>,
    cancel: CancellationToken,
    interval: Duration,
) where
    S: ApplyCommand + Clone + Send + Sync + 'static,
{
    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fetched = fetcher.fetch_snapshot() => fetched,
        };

        let armed = match fetched {
            Ok(snapshot) => sink.emit_with(|| {
                lock(&session).record_snapshot(snapshot.clone());
                RefreshEvent::Snapshot { payload: snapshot }
            }),
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed, keeping last snapshot");
                sink.emit(RefreshEvent::FetchFailed {
                    error: e.to_string(),
                })
            }
        };
        if !armed {
            debug!("discarding snapshot fetch that settled after stop");
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = refresh_now.notified() => debug!("out-of-cycle refresh"),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::CommandOutcome;
    use crate::domain::health::HealthSnapshot;
    use crate::domain::ports::{CommandIssuer, SnapshotFetcher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Counter {
        calls: AtomicU32,
        healing: AtomicBool,
    }

    #[async_trait]
    impl SnapshotFetcher<HealthSnapshot> for Counter {
        async fn fetch_snapshot(&self) -> Result<HealthSnapshot> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(HealthSnapshot {
                auto_healing_enabled: self.healing.load(Ordering::SeqCst),
                open_issues: call,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl CommandIssuer<HealthSnapshot> for Counter {
        async fn issue_command(
            &self,
            command: &Command,
        ) -> Result<CommandOutcome<HealthSnapshot>> {
            match command.name {
                CommandName::EnableHealing => {
                    self.healing.store(true, Ordering::SeqCst);
                    Ok(CommandOutcome::accepted())
                }
                CommandName::DisableHealing => Err(WatchError::Network("timeout".into())),
                CommandName::TriggerHealing => Ok(CommandOutcome::accepted()),
                CommandName::RunFullCycle => Ok(CommandOutcome::rejected()),
            }
        }
    }

    fn scheduler() -> (RefreshScheduler<HealthSnapshot>, Arc<Counter>) {
        let backend = Arc::new(Counter {
            calls: AtomicU32::new(0),
            healing: AtomicBool::new(false),
        });
        let scheduler = RefreshScheduler::<HealthSnapshot>::new(
            backend.clone(),
            backend.clone(),
            RefreshPolicy { interval_ms: 30_000 },
        )
        .unwrap();
        (scheduler, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_on_cadence() {
        let (mut scheduler, backend) = scheduler();
        let mut events = scheduler.start().unwrap();

        assert!(matches!(events.recv().await, Some(RefreshEvent::Snapshot { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30_001)).await;
        assert!(matches!(events.recv().await, Some(RefreshEvent::Snapshot { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.last_snapshot().unwrap().open_issues, 2);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_rejected_and_stop_idempotent() {
        let (mut scheduler, _backend) = scheduler();
        let _events = scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(WatchError::AlreadyActive)));
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_active());
        let _events = scheduler.start().unwrap();
        assert!(scheduler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_applies_optimistically() {
        let (mut scheduler, _backend) = scheduler();
        let mut events = scheduler.start().unwrap();
        events.recv().await.unwrap();

        let resolution = scheduler
            .issue_command(Command::new(CommandName::EnableHealing))
            .await
            .unwrap();
        assert_eq!(resolution, CommandResolution::Applied);
        assert!(scheduler.view().unwrap().auto_healing_enabled);
        assert!(!scheduler.last_snapshot().unwrap().auto_healing_enabled);
        assert_eq!(scheduler.pending_command(), None);

        assert!(matches!(
            events.recv().await,
            Some(RefreshEvent::CommandPending { payload: Some(p), .. }) if p.auto_healing_enabled
        ));
        assert!(matches!(
            events.recv().await,
            Some(RefreshEvent::CommandApplied { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_rolls_back() {
        let (mut scheduler, _backend) = scheduler();
        let mut events = scheduler.start().unwrap();
        events.recv().await.unwrap();
        let before = scheduler.last_snapshot();

        let err = scheduler
            .issue_command(Command::new(CommandName::DisableHealing))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::CommandRejected(_)));
        assert_eq!(scheduler.last_snapshot(), before);
        assert_eq!(scheduler.view(), before);
        assert_eq!(scheduler.pending_command(), None);

        events.recv().await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(RefreshEvent::CommandRolledBack { command: CommandName::DisableHealing, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_command_is_rejected() {
        let (scheduler, _backend) = scheduler();
        let err = scheduler
            .issue_command(Command::new(CommandName::RunFullCycle))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::CommandRejected(msg) if msg.contains("run_full_cycle")));
        assert_eq!(scheduler.pending_command(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_requests_immediate_refresh() {
        let (mut scheduler, backend) = scheduler();
        let mut events = scheduler.start().unwrap();
        events.recv().await.unwrap();

        let resolution = scheduler
            .issue_command(Command::new(CommandName::TriggerHealing))
            .await
            .unwrap();
        assert_eq!(resolution, CommandResolution::NeedsRefresh);

        // Pending, applied, then the out-of-cycle snapshot well before the cadence.
        events.recv().await.unwrap();
        events.recv().await.unwrap();
        let started = tokio::time::Instant::now();
        assert!(matches!(events.recv().await, Some(RefreshEvent::Snapshot { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
