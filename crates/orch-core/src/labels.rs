//! Label vocabulary, kept prefix-agnostic so a deployment can namespace it.
//!
//! Every label the system reads or writes is computed through a
//! [`LabelScheme`] so that a single configured prefix
//! (`tracker.labelPrefix`) changes every label the system touches, without
//! scattering string literals across the stage implementations.

use std::fmt;
use std::str::FromStr;

/// The single state label that may be present on a master ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterState {
    Planning,
    AwaitingApproval,
    Approved,
    Rejected,
    Implementing,
    Testing,
    Completing,
    Completed,
    PrCreated,
    Failed,
}

impl MasterState {
    pub const ALL: [MasterState; 10] = [
        MasterState::Planning,
        MasterState::AwaitingApproval,
        MasterState::Approved,
        MasterState::Rejected,
        MasterState::Implementing,
        MasterState::Testing,
        MasterState::Completing,
        MasterState::Completed,
        MasterState::PrCreated,
        MasterState::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MasterState::Planning => "planning",
            MasterState::AwaitingApproval => "awaiting-approval",
            MasterState::Approved => "approved",
            MasterState::Rejected => "rejected",
            MasterState::Implementing => "implementing",
            MasterState::Testing => "testing",
            MasterState::Completing => "completing",
            MasterState::Completed => "completed",
            MasterState::PrCreated => "pr-created",
            MasterState::Failed => "failed",
        }
    }

    /// Resumable states.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            MasterState::Planning
                | MasterState::AwaitingApproval
                | MasterState::Approved
                | MasterState::Implementing
                | MasterState::Testing
                | MasterState::Completing
        )
    }

    /// Terminal states: completed, pr-created, failed, rejected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MasterState::Completed
                | MasterState::PrCreated
                | MasterState::Failed
                | MasterState::Rejected
        )
    }
}

impl fmt::Display for MasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MasterState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MasterState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or(())
    }
}

/// Sub-ticket role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Implementation,
    Test,
    FixAttempt,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Implementation => "implementation",
            Role::Test => "test",
            Role::FixAttempt => "fix-attempt",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-ticket state progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubState {
    Pending,
    InProgress,
    AgentComplete,
    Failed,
    TestFailed,
    MaxAttemptsReached,
}

impl SubState {
    pub const ALL: [SubState; 6] = [
        SubState::Pending,
        SubState::InProgress,
        SubState::AgentComplete,
        SubState::Failed,
        SubState::TestFailed,
        SubState::MaxAttemptsReached,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubState::Pending => "pending",
            SubState::InProgress => "in-progress",
            SubState::AgentComplete => "agent-complete",
            SubState::Failed => "failed",
            SubState::TestFailed => "test-failed",
            SubState::MaxAttemptsReached => "max-attempts-reached",
        }
    }
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-level labels.
pub const SERVICE_QUEUE: &str = "queue";
pub const SERVICE_PROCESSING: &str = "processing";
pub const SERVICE_ORCHESTRATED: &str = "orchestrated";
pub const SUB_ISSUE: &str = "sub-issue";

/// Computes the concrete label string for every label kind the system
/// uses, applying the configured prefix.
#[derive(Debug, Clone)]
pub struct LabelScheme {
    prefix: String,
}

impl LabelScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn apply(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn state(&self, state: MasterState) -> String {
        self.apply(state.as_str())
    }

    pub fn sub_state(&self, state: SubState) -> String {
        self.apply(state.as_str())
    }

    pub fn role(&self, role: Role) -> String {
        self.apply(role.as_str())
    }

    pub fn sub_issue(&self) -> String {
        self.apply(SUB_ISSUE)
    }

    pub fn master_ref(&self, master_id: u64) -> String {
        self.apply(&format!("master-{master_id}"))
    }

    pub fn test_ref(&self, test_id: u64) -> String {
        self.apply(&format!("test-{test_id}"))
    }

    pub fn attempt(&self, k: u32) -> String {
        self.apply(&format!("attempt-{k}"))
    }

    pub fn queue(&self) -> String {
        self.apply(SERVICE_QUEUE)
    }

    pub fn processing(&self) -> String {
        self.apply(SERVICE_PROCESSING)
    }

    pub fn orchestrated(&self) -> String {
        self.apply(SERVICE_ORCHESTRATED)
    }

    /// Parse `master-<N>` back into `N`, stripping the configured prefix.
    pub fn parse_master_ref(&self, label: &str) -> Option<u64> {
        label
            .strip_prefix(&self.prefix)?
            .strip_prefix("master-")?
            .parse()
            .ok()
    }

    /// Parse `test-<N>` back into `N`, stripping the configured prefix.
    pub fn parse_test_ref(&self, label: &str) -> Option<u64> {
        label
            .strip_prefix(&self.prefix)?
            .strip_prefix("test-")?
            .parse()
            .ok()
    }

    /// Parse `attempt-<k>` back into `k`, stripping the configured prefix.
    pub fn parse_attempt(&self, label: &str) -> Option<u32> {
        label
            .strip_prefix(&self.prefix)?
            .strip_prefix("attempt-")?
            .parse()
            .ok()
    }
}

impl Default for LabelScheme {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_prefix_consistently() {
        let scheme = LabelScheme::new("orch/");
        assert_eq!(scheme.state(MasterState::Planning), "orch/planning");
        assert_eq!(scheme.role(Role::Test), "orch/test");
        assert_eq!(scheme.master_ref(42), "orch/master-42");
    }

    #[test]
    fn round_trips_dynamic_labels() {
        let scheme = LabelScheme::new("orch/");
        assert_eq!(scheme.parse_master_ref("orch/master-42"), Some(42));
        assert_eq!(scheme.parse_test_ref("orch/test-7"), Some(7));
        assert_eq!(scheme.parse_attempt("orch/attempt-3"), Some(3));
        assert_eq!(scheme.parse_master_ref("orch/planning"), None);
    }

    #[test]
    fn resumable_and_terminal_partition_all_states() {
        for state in MasterState::ALL {
            assert_ne!(state.is_resumable(), state.is_terminal() && state.is_resumable());
        }
        assert!(MasterState::Planning.is_resumable());
        assert!(!MasterState::Planning.is_terminal());
        assert!(MasterState::Completed.is_terminal());
        assert!(!MasterState::Completed.is_resumable());
        assert!(MasterState::Failed.is_terminal());
        assert!(MasterState::Rejected.is_terminal());
    }
}
