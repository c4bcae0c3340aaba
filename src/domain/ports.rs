use super::command::{Command, CommandOutcome};
use super::session::SubjectId;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Queries the status of one convergent remote operation.
#[async_trait]
pub trait StatusFetcher<P>: Send + Sync {
    async fn fetch_status(&self, subject: &SubjectId) -> Result<P>;
}

/// Reads the current state of a continuously observed system.
#[async_trait]
pub trait SnapshotFetcher<S>: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<S>;
}

/// Sends operator commands to the backend that owns the observed state.
#[async_trait]
pub trait CommandIssuer<S>: Send + Sync {
    async fn issue_command(&self, command: &Command) -> Result<CommandOutcome<S>>;
}

pub type StatusFetcherRef<P> = Arc<dyn StatusFetcher<P>>;
pub type SnapshotFetcherRef<S> = Arc<dyn SnapshotFetcher<S>>;
pub type CommandIssuerRef<S> = Arc<dyn CommandIssuer<S>>;
