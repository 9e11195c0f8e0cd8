//! Agent roles.

use std::collections::HashMap;
use std::time::Duration;

use orch_ai::ModelRef;

/// The fixed set of agent roles the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Produces the specification from the original request.
    Architect,
    /// Produces implementation tasks.
    Sculptor,
    /// Produces test tasks.
    Sentinel,
    /// Runs a single implementation or fix sub-ticket.
    Craftsman,
    /// Runs a single test sub-ticket.
    Validator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Architect,
        AgentRole::Sculptor,
        AgentRole::Sentinel,
        AgentRole::Craftsman,
        AgentRole::Validator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Architect => "architect",
            AgentRole::Sculptor => "sculptor",
            AgentRole::Sentinel => "sentinel",
            AgentRole::Craftsman => "craftsman",
            AgentRole::Validator => "validator",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-role configuration: which model to use by default and how long a
/// single execution of that role may run before it is considered hung.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: ModelRef,
    pub timeout: Duration,
}

/// The full role -> config map, resolved once from configuration at
/// service start.
#[derive(Debug, Clone, Default)]
pub struct AgentRoster {
    configs: HashMap<String, AgentConfig>,
}

impl AgentRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, role: AgentRole, config: AgentConfig) {
        self.configs.insert(role.as_str().to_string(), config);
    }

    pub fn get(&self, role: AgentRole) -> Option<&AgentConfig> {
        self.configs.get(role.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_returns_configured_role() {
        let mut roster = AgentRoster::new();
        roster.set(
            AgentRole::Architect,
            AgentConfig {
                model: ModelRef { provider_id: "a".into(), model_id: "m".into() },
                timeout: Duration::from_secs(300),
            },
        );
        assert!(roster.get(AgentRole::Architect).is_some());
        assert!(roster.get(AgentRole::Sculptor).is_none());
    }
}
