//! Dependency Resolver: batches a task list into topological
//! waves by repeated Kahn-style extraction of dependency-free tasks.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// A task id paired with its (possibly empty) prerequisite ids.
#[derive(Debug, Clone)]
pub struct TaskDeps<Id> {
    pub id: Id,
    pub depends_on: Vec<Id>,
}

/// Errors the resolver can return.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DependencyError<Id: std::fmt::Debug + PartialEq + Eq> {
    #[error("task depends on unknown id {0:?}")]
    InvalidDependency(Id),
    #[error("cyclic dependency among {0:?}")]
    CyclicDependency(Vec<Id>),
}

/// Resolve a task list into batches such that:
/// - every task appears in exactly one batch,
/// - batch `i` depends only on batches `< i`,
/// - within a batch, tasks are sorted by id for determinism.
///
/// Implementation: repeated extraction of tasks whose dependencies are all
/// already in a prior batch (Kahn's algorithm, run to a fixpoint per wave
/// rather than one node at a time, so each wave is maximal).
pub fn resolve_batches<Id>(tasks: &[TaskDeps<Id>]) -> Result<Vec<Vec<Id>>, DependencyError<Id>>
where
    Id: Clone + Ord + std::fmt::Debug,
{
    let known: BTreeSet<Id> = tasks.iter().map(|t| t.id.clone()).collect();

    for task in tasks {
        for dep in &task.depends_on {
            if !known.contains(dep) {
                return Err(DependencyError::InvalidDependency(dep.clone()));
            }
        }
    }

    let mut remaining: BTreeMap<Id, Vec<Id>> = tasks
        .iter()
        .map(|t| (t.id.clone(), t.depends_on.clone()))
        .collect();
    let mut done: BTreeSet<Id> = BTreeSet::new();
    let mut batches: Vec<Vec<Id>> = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<Id> = remaining
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| done.contains(d)))
            .map(|(id, _)| id.clone())
            .collect();

        if ready.is_empty() {
            let stuck: Vec<Id> = remaining.keys().cloned().collect();
            return Err(DependencyError::CyclicDependency(stuck));
        }

        ready.sort();
        for id in &ready {
            remaining.remove(id);
            done.insert(id.clone());
        }
        batches.push(ready);
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(id: u32, on: &[u32]) -> TaskDeps<u32> {
        TaskDeps {
            id,
            depends_on: on.to_vec(),
        }
    }

    #[test]
    fn no_dependencies_single_batch_sorted() {
        let tasks = vec![deps(3, &[]), deps(1, &[]), deps(2, &[])];
        let batches = resolve_batches(&tasks).unwrap();
        assert_eq!(batches, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn chain_produces_one_batch_per_link() {
        let tasks = vec![deps(1, &[]), deps(2, &[1]), deps(3, &[2])];
        let batches = resolve_batches(&tasks).unwrap();
        assert_eq!(batches, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn diamond_dependency_batches_correctly() {
        // 1 -> (2, 3) -> 4
        let tasks = vec![
            deps(1, &[]),
            deps(2, &[1]),
            deps(3, &[1]),
            deps(4, &[2, 3]),
        ];
        let batches = resolve_batches(&tasks).unwrap();
        assert_eq!(batches, vec![vec![1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn cycle_detection() {
        let tasks = vec![deps(1, &[2]), deps(2, &[1])];
        let err = resolve_batches(&tasks).unwrap_err();
        match err {
            DependencyError::CyclicDependency(mut stuck) => {
                stuck.sort();
                assert_eq!(stuck, vec![1, 2]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let tasks = vec![deps(1, &[99])];
        let err = resolve_batches(&tasks).unwrap_err();
        assert_eq!(err, DependencyError::InvalidDependency(99));
    }

    #[test]
    fn every_task_appears_exactly_once() {
        let tasks = vec![
            deps(5, &[]),
            deps(1, &[]),
            deps(4, &[1, 5]),
            deps(2, &[1]),
            deps(3, &[2, 5]),
        ];
        let batches = resolve_batches(&tasks).unwrap();
        let mut seen: Vec<u32> = batches.into_iter().flatten().collect();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}
