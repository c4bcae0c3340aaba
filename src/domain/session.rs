use super::command::{ApplyCommand, Command, CommandName, CommandOutcome};
use super::status::{Classify, OperationState};
use crate::config::{PollPolicy, RefreshPolicy};
use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of the remote operation being observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Checking,
    Resolved,
    Expired,
    TimedOut,
    Errored,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Checking)
    }
}

/// State of one bounded polling run against a single subject.
///
/// Once `state` is terminal every mutating method is a no-op.
#[derive(Debug)]
pub struct PollSession<P> {
    subject: SubjectId,
    attempt_count: u32,
    max_attempts: u32,
    interval_ms: u64,
    state: PollState,
    last_payload: Option<P>,
    last_error: Option<WatchError>,
}

impl<P: Classify> PollSession<P> {
    pub fn new(subject: SubjectId, policy: &PollPolicy) -> Self {
        Self {
            subject,
            attempt_count: 0,
            max_attempts: policy.max_attempts,
            interval_ms: policy.interval_ms,
            state: PollState::Checking,
            last_payload: None,
            last_error: None,
        }
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_payload(&self) -> Option<&P> {
        self.last_payload.as_ref()
    }

    pub fn last_error(&self) -> Option<&WatchError> {
        self.last_error.as_ref()
    }

    /// Moves to `TimedOut` if no attempts remain. Returns true on transition.
    pub fn check_exhausted(&mut self) -> bool {
        if self.state.is_terminal() || self.attempt_count < self.max_attempts {
            return false;
        }
        self.state = PollState::TimedOut;
        true
    }

    /// Applies the outcome of one status fetch and returns the resulting state.
    pub fn record(&mut self, fetched: Result<P>) -> PollState {
        if self.state.is_terminal() {
            return self.state;
        }
        match fetched {
            Err(e) => {
                self.last_error = Some(e);
                self.state = PollState::Errored;
            }
            Ok(payload) => {
                self.attempt_count += 1;
                self.state = match payload.classify() {
                    OperationState::Completed => PollState::Resolved,
                    OperationState::Invalidated => PollState::Expired,
                    OperationState::Pending => PollState::Checking,
                };
                self.last_payload = Some(payload);
            }
        }
        self.state
    }

    /// Converts a finished session into the caller-facing result.
    pub fn into_outcome(self) -> Result<P> {
        match self.state {
            PollState::Resolved => self.last_payload.ok_or(WatchError::Stopped),
            PollState::Expired => Err(WatchError::SubjectExpired(self.subject.to_string())),
            PollState::TimedOut => Err(WatchError::ExhaustedRetries {
                attempts: self.attempt_count,
            }),
            PollState::Errored => Err(self.last_error.unwrap_or(WatchError::Stopped)),
            PollState::Checking => Err(WatchError::Stopped),
        }
    }
}

/// Emitted by the bounded poller on start, on each pending response, and on
/// the terminal transition.
#[derive(Debug, Clone, Serialize)]
pub struct PollEvent<P> {
    pub subject: SubjectId,
    pub state: PollState,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<P>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<P: Classify + Clone> PollEvent<P> {
    pub fn from_session(session: &PollSession<P>) -> Self {
        Self {
            subject: session.subject.clone(),
            state: session.state,
            attempt: session.attempt_count,
            payload: session.last_payload.clone(),
            error: session.last_error.as_ref().map(ToString::to_string),
        }
    }
}

/// Local view adjustment made while a command is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub enum Optimistic<S> {
    /// Applied locally, backend has not answered yet.
    Pending(S),
    /// Backend accepted; shown until the next refresh replaces it.
    Applied(S),
    /// Backend rejected; the view is back to the last fetched snapshot.
    RolledBack,
}

/// How a successful command should be reflected locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResolution {
    /// The backend returned authoritative state, now stored as the snapshot.
    Authoritative,
    /// The optimistic view was confirmed.
    Applied,
    /// No local effect is known; authoritative state must be pulled.
    NeedsRefresh,
}

/// State owned by one periodic refresh scheduler.
#[derive(Debug)]
pub struct RefreshSession<S> {
    interval_ms: u64,
    active: bool,
    last_snapshot: Option<S>,
    pending_command: Option<CommandName>,
    optimistic: Option<Optimistic<S>>,
}

impl<S: ApplyCommand + Clone> RefreshSession<S> {
    pub fn new(policy: &RefreshPolicy) -> Self {
        Self {
            interval_ms: policy.interval_ms,
            active: false,
            last_snapshot: None,
            pending_command: None,
            optimistic: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn last_snapshot(&self) -> Option<&S> {
        self.last_snapshot.as_ref()
    }

    pub fn pending_command(&self) -> Option<CommandName> {
        self.pending_command
    }

    pub fn optimistic(&self) -> Option<&Optimistic<S>> {
        self.optimistic.as_ref()
    }

    /// What a view should render right now.
    pub fn view(&self) -> Option<&S> {
        match &self.optimistic {
            Some(Optimistic::Pending(s)) | Some(Optimistic::Applied(s)) => Some(s),
            Some(Optimistic::RolledBack) | None => self.last_snapshot.as_ref(),
        }
    }

    pub fn record_snapshot(&mut self, snapshot: S) {
        self.last_snapshot = Some(snapshot);
        // A pending overlay survives: the backend may not have seen the command yet.
        if !matches!(self.optimistic, Some(Optimistic::Pending(_))) {
            self.optimistic = None;
        }
    }

    /// Marks `command` as in flight and applies its local effect, if any.
    pub fn begin_command(&mut self, command: &Command) -> Result<()> {
        if let Some(pending) = self.pending_command {
            return Err(WatchError::CommandInFlight(pending.to_string()));
        }
        self.pending_command = Some(command.name);
        self.optimistic = self
            .last_snapshot
            .as_ref()
            .and_then(|s| s.apply_command(command))
            .map(Optimistic::Pending);
        Ok(())
    }

    pub fn complete_command(&mut self, outcome: CommandOutcome<S>) -> CommandResolution {
        self.pending_command = None;
        if let Some(state) = outcome.new_state {
            self.last_snapshot = Some(state);
            self.optimistic = None;
            return CommandResolution::Authoritative;
        }
        match self.optimistic.take() {
            Some(Optimistic::Pending(view)) => {
                self.optimistic = Some(Optimistic::Applied(view));
                CommandResolution::Applied
            }
            _ => CommandResolution::NeedsRefresh,
        }
    }

    /// Clears the in-flight command and discards any optimistic view.
    /// `last_snapshot` is left untouched.
    pub fn fail_command(&mut self) {
        self.pending_command = None;
        self.optimistic = Some(Optimistic::RolledBack);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshEvent<S> {
    Snapshot {
        payload: S,
    },
    FetchFailed {
        error: String,
    },
    CommandPending {
        command: CommandName,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<S>,
    },
    CommandApplied {
        command: CommandName,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<S>,
    },
    CommandRolledBack {
        command: CommandName,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<S>,
    },
}
