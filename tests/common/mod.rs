#![allow(dead_code)]

use opwatch::domain::health::HealthSnapshot;
use opwatch::domain::session::{PollEvent, RefreshEvent};
use opwatch::domain::status::{CheckoutSession, CheckoutStatus};
use opwatch::infrastructure::scripted::{Script, ScriptStep};
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn checkout(status: CheckoutStatus) -> CheckoutSession {
    CheckoutSession::new("cs_test", status)
}

/// A checkout script answering with the given statuses in order.
pub fn checkout_script(statuses: &[CheckoutStatus]) -> Script<CheckoutSession> {
    Script::responding(statuses.iter().copied().map(checkout))
}

/// `n` pending replies followed by a permanently paid one.
pub fn paid_after(n: usize) -> Script<CheckoutSession> {
    let mut statuses = vec![CheckoutStatus::Pending; n];
    statuses.push(CheckoutStatus::Paid);
    checkout_script(&statuses)
}

pub fn health(open_issues: u32) -> HealthSnapshot {
    HealthSnapshot {
        auto_healing_enabled: true,
        open_issues,
        ..Default::default()
    }
}

pub fn health_script(steps: Vec<ScriptStep<HealthSnapshot>>) -> Script<HealthSnapshot> {
    Script::new(steps)
}

/// Drains a poll stream until the session closes it.
pub async fn collect_poll<P>(events: &mut UnboundedReceiver<PollEvent<P>>) -> Vec<PollEvent<P>> {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    collected
}

pub async fn next_refresh<S>(events: &mut UnboundedReceiver<RefreshEvent<S>>) -> RefreshEvent<S> {
    events.recv().await.expect("refresh stream closed")
}

pub fn write_fixture(dir: &Path, name: &str, json: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(json.as_bytes()).unwrap();
    path
}
