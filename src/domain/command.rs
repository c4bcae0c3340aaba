use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator actions understood by the remediation backend.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    EnableHealing,
    DisableHealing,
    /// One manual remediation pass.
    TriggerHealing,
    RunFullCycle,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::EnableHealing => "enable_healing",
            CommandName::DisableHealing => "disable_healing",
            CommandName::TriggerHealing => "trigger_healing",
            CommandName::RunFullCycle => "run_full_cycle",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enable_healing" => Ok(CommandName::EnableHealing),
            "disable_healing" => Ok(CommandName::DisableHealing),
            "trigger_healing" => Ok(CommandName::TriggerHealing),
            "run_full_cycle" => Ok(CommandName::RunFullCycle),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Command {
    pub name: CommandName,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Command {
    pub fn new(name: CommandName) -> Self {
        Self {
            name,
            args: serde_json::Value::Null,
        }
    }

    pub fn with_args(name: CommandName, args: serde_json::Value) -> Self {
        Self { name, args }
    }
}

/// Backend acknowledgement of a command. `new_state` is set when the backend
/// returns the authoritative state along with the acknowledgement.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CommandOutcome<S> {
    pub ok: bool,
    #[serde(default = "Option::default")]
    pub new_state: Option<S>,
}

impl<S> CommandOutcome<S> {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            new_state: None,
        }
    }

    pub fn rejected() -> Self {
        Self {
            ok: false,
            new_state: None,
        }
    }
}

/// Local effect of a command on a snapshot, applied before the backend confirms.
///
/// Returning `None` means the command has no known local effect and the
/// scheduler should pull authoritative state instead.
pub trait ApplyCommand: Sized {
    fn apply_command(&self, command: &Command) -> Option<Self>;
}
