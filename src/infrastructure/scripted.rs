use crate::domain::command::{Command, CommandName, CommandOutcome};
use crate::domain::ports::{CommandIssuer, SnapshotFetcher, StatusFetcher};
use crate::domain::session::SubjectId;
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One canned backend reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep<T> {
    Respond(T),
    NetworkError(String),
    DecodeError(String),
}

impl<T> ScriptStep<T> {
    fn into_result(self) -> Result<T> {
        match self {
            ScriptStep::Respond(value) => Ok(value),
            ScriptStep::NetworkError(msg) => Err(WatchError::Network(msg)),
            ScriptStep::DecodeError(msg) => Err(WatchError::Decode(msg)),
        }
    }
}

struct ScriptState<T> {
    steps: VecDeque<ScriptStep<T>>,
    last: Option<T>,
    calls: u32,
}

/// Replays a fixed sequence of replies, then keeps repeating the last
/// successful one. With nothing to repeat it reports a network failure.
///
/// Cloning shares the underlying script, so a test can keep a handle for
/// inspecting call counts after passing a clone to a poller.
#[derive(Clone)]
pub struct Script<T> {
    state: Arc<Mutex<ScriptState<T>>>,
    latency: Duration,
}

impl<T: Clone> Script<T> {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep<T>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                steps: steps.into_iter().collect(),
                last: None,
                calls: 0,
            })),
            latency: Duration::ZERO,
        }
    }

    /// Replies that always succeed with the given values.
    pub fn responding(values: impl IntoIterator<Item = T>) -> Self {
        Self::new(values.into_iter().map(ScriptStep::Respond))
    }

    /// Delays every reply, to simulate a slow backend.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn calls(&self) -> u32 {
        self.state.lock().await.calls
    }

    async fn next(&self) -> Result<T> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = self.state.lock().await;
        state.calls += 1;
        match state.steps.pop_front() {
            Some(step) => {
                let result = step.into_result();
                if let Ok(value) = &result {
                    state.last = Some(value.clone());
                }
                result
            }
            None => state
                .last
                .clone()
                .ok_or_else(|| WatchError::Network("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl<P> StatusFetcher<P> for Script<P>
where
    P: Clone + Send + Sync,
{
    async fn fetch_status(&self, _subject: &SubjectId) -> Result<P> {
        self.next().await
    }
}

#[async_trait]
impl<S> SnapshotFetcher<S> for Script<S>
where
    S: Clone + Send + Sync,
{
    async fn fetch_snapshot(&self) -> Result<S> {
        self.next().await
    }
}

/// Reply for one command name in a [`ScriptedCommandIssuer`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandReply<S> {
    pub command: CommandName,
    pub reply: ScriptStep<CommandOutcome<S>>,
}

/// Answers commands from a fixed table; unlisted commands are accepted with
/// no new state. Issued commands are recorded in order.
#[derive(Clone)]
pub struct ScriptedCommandIssuer<S> {
    replies: Arc<Vec<CommandReply<S>>>,
    issued: Arc<Mutex<Vec<Command>>>,
    latency: Duration,
}

impl<S: Clone> ScriptedCommandIssuer<S> {
    pub fn new(replies: Vec<CommandReply<S>>) -> Self {
        Self {
            replies: Arc::new(replies),
            issued: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    /// Delays every reply. The command is recorded as issued immediately.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn issued(&self) -> Vec<Command> {
        self.issued.lock().await.clone()
    }
}

#[async_trait]
impl<S> CommandIssuer<S> for ScriptedCommandIssuer<S>
where
    S: Clone + Send + Sync,
{
    async fn issue_command(&self, command: &Command) -> Result<CommandOutcome<S>> {
        self.issued.lock().await.push(command.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.replies.iter().find(|r| r.command == command.name) {
            Some(reply) => reply.reply.clone().into_result(),
            None => Ok(CommandOutcome::accepted()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::health::HealthSnapshot;
    use crate::domain::status::{CheckoutSession, CheckoutStatus};

    #[tokio::test]
    async fn test_script_replays_then_repeats_last() {
        let script = Script::new(vec![
            ScriptStep::Respond(CheckoutSession::new("cs_1", CheckoutStatus::Pending)),
            ScriptStep::NetworkError("reset".to_string()),
        ]);
        let subject = SubjectId::new("cs_1");

        let first = script.fetch_status(&subject).await.unwrap();
        assert_eq!(first.status, CheckoutStatus::Pending);
        assert!(matches!(
            script.fetch_status(&subject).await,
            Err(WatchError::Network(_))
        ));
        let repeated = script.fetch_status(&subject).await.unwrap();
        assert_eq!(repeated, first);
        assert_eq!(script.calls().await, 3);
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let script: Script<HealthSnapshot> = Script::new(Vec::new());
        assert!(matches!(
            script.fetch_snapshot().await,
            Err(WatchError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_step_deserialization() {
        let json = r#"[{"respond":{"id":"cs_1","status":"paid"}},{"decode_error":"bad"}]"#;
        let steps: Vec<ScriptStep<CheckoutSession>> = serde_json::from_str(json).unwrap();
        assert_eq!(
            steps[0],
            ScriptStep::Respond(CheckoutSession::new("cs_1", CheckoutStatus::Paid))
        );
        assert_eq!(steps[1], ScriptStep::DecodeError("bad".to_string()));
    }

    #[tokio::test]
    async fn test_command_issuer_table() {
        let issuer = ScriptedCommandIssuer::<HealthSnapshot>::new(vec![CommandReply {
            command: CommandName::DisableHealing,
            reply: ScriptStep::Respond(CommandOutcome::rejected()),
        }]);

        let accepted = issuer
            .issue_command(&Command::new(CommandName::EnableHealing))
            .await
            .unwrap();
        assert!(accepted.ok);
        let rejected = issuer
            .issue_command(&Command::new(CommandName::DisableHealing))
            .await
            .unwrap();
        assert!(!rejected.ok);

        let issued: Vec<_> = issuer.issued().await.into_iter().map(|c| c.name).collect();
        assert_eq!(
            issued,
            vec![CommandName::EnableHealing, CommandName::DisableHealing]
        );
    }
}
