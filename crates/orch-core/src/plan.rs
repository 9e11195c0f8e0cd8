//! Plan data model: the specification plus the implementation
//! and test task lists produced by the Planning Stage.

use serde::{Deserialize, Serialize};

/// A stable task identifier assigned by the planning agents, distinct from
/// the sub-ticket number it is later pinned to.
pub type TaskId = String;

/// The specification produced by the Architect agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    pub requirements: String,
    pub acceptance_criteria: String,
    pub technical_approach: String,
    #[serde(default)]
    pub edge_cases: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub complexity: Option<String>,
}

/// An implementation task produced by the Sculptor agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationTask {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub complexity: Option<String>,
    /// Filled in once the sub-ticket is created.
    #[serde(default)]
    pub sub_ticket: Option<u64>,
}

/// A test task produced by the Sentinel agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestTask {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub test_scenarios: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub sub_ticket: Option<u64>,
}

/// The full plan for a master ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub specification: Specification,
    pub implementation_tasks: Vec<ImplementationTask>,
    pub test_tasks: Vec<TestTask>,
}

impl Plan {
    pub fn task_count(&self) -> usize {
        self.implementation_tasks.len() + self.test_tasks.len()
    }

    pub fn implementation_task(&self, id: &str) -> Option<&ImplementationTask> {
        self.implementation_tasks.iter().find(|t| t.id == id)
    }

    pub fn test_task(&self, id: &str) -> Option<&TestTask> {
        self.test_tasks.iter().find(|t| t.id == id)
    }
}
