use crate::domain::health::HealthSnapshot;
use crate::error::Result;
use crate::infrastructure::scripted::{CommandReply, Script, ScriptStep, ScriptedCommandIssuer};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::time::Duration;

/// Canned replies for a convergent operation, e.g. one checkout session.
#[derive(Debug, Deserialize)]
pub struct PollFixture<P> {
    pub responses: Vec<ScriptStep<P>>,
    #[serde(default)]
    pub latency_ms: u64,
}

impl<P: Clone> PollFixture<P> {
    pub fn into_script(self) -> Script<P> {
        Script::new(self.responses).with_latency(Duration::from_millis(self.latency_ms))
    }
}

/// Canned readings and command replies for the healing dashboard.
#[derive(Debug, Deserialize)]
pub struct HealthFixture {
    pub snapshots: Vec<ScriptStep<HealthSnapshot>>,
    #[serde(default)]
    pub commands: Vec<CommandReply<HealthSnapshot>>,
    #[serde(default)]
    pub latency_ms: u64,
}

impl HealthFixture {
    pub fn into_backend(self) -> (Script<HealthSnapshot>, ScriptedCommandIssuer<HealthSnapshot>) {
        let script =
            Script::new(self.snapshots).with_latency(Duration::from_millis(self.latency_ms));
        (script, ScriptedCommandIssuer::new(self.commands))
    }
}

/// Reads a JSON fixture from any `Read` source (e.g., File, Stdin).
pub fn read_fixture<T: DeserializeOwned, R: Read>(source: R) -> Result<T> {
    Ok(serde_json::from_reader(source)?)
}
