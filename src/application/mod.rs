//! Application layer: the two polling primitives.
//!
//! `BoundedPoller` drives a single remote operation to a terminal state under
//! a fixed cadence and attempt cap. `RefreshScheduler` keeps a long-lived
//! status view fresh and routes operator commands with optimistic updates.
//! Both run their loop on a spawned `tokio` task that owns the session's timer,
//! so at most one fetch per session is ever in flight.

pub(crate) mod guard;
pub mod poller;
pub mod scheduler;
