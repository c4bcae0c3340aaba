use super::command::{ApplyCommand, Command, CommandName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
}

/// One reading of the system-healing dashboard.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct HealthSnapshot {
    pub auto_healing_enabled: bool,
    #[serde(default)]
    pub open_issues: u32,
    #[serde(default)]
    pub healed_last_24h: u32,
    #[serde(default)]
    pub last_cycle_at: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceHealth>,
}

impl ApplyCommand for HealthSnapshot {
    fn apply_command(&self, command: &Command) -> Option<Self> {
        let enabled = match command.name {
            CommandName::EnableHealing => true,
            CommandName::DisableHealing => false,
            // Remediation passes change issue counts we cannot predict locally.
            CommandName::TriggerHealing | CommandName::RunFullCycle => return None,
        };
        Some(Self {
            auto_healing_enabled: enabled,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> HealthSnapshot {
        HealthSnapshot {
            auto_healing_enabled: false,
            open_issues: 3,
            healed_last_24h: 7,
            last_cycle_at: Some("2024-05-01T10:00:00Z".to_string()),
            services: vec![
                ServiceHealth {
                    name: "api".to_string(),
                    status: ServiceStatus::Healthy,
                },
                ServiceHealth {
                    name: "queue".to_string(),
                    status: ServiceStatus::Degraded,
                },
            ],
        }
    }

    #[test]
    fn test_enable_flips_flag_only() {
        let before = snapshot();
        let after = before
            .apply_command(&Command::new(CommandName::EnableHealing))
            .unwrap();
        assert!(after.auto_healing_enabled);
        assert_eq!(after.open_issues, before.open_issues);
        assert_eq!(after.services, before.services);
    }

    #[test]
    fn test_disable_flips_flag() {
        let mut before = snapshot();
        before.auto_healing_enabled = true;
        let after = before
            .apply_command(&Command::new(CommandName::DisableHealing))
            .unwrap();
        assert!(!after.auto_healing_enabled);
    }

    #[test]
    fn test_remediation_has_no_local_effect() {
        let before = snapshot();
        assert!(before
            .apply_command(&Command::new(CommandName::TriggerHealing))
            .is_none());
        assert!(before
            .apply_command(&Command::new(CommandName::RunFullCycle))
            .is_none());
    }
}
