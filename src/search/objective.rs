//! Objective capability interface
//!
//! Mutation and fitness are domain-supplied: the executor core never knows
//! what a key means. Problem definitions arrive as provisioned packages and
//! are turned into an `Objective` by an `ObjectiveFactory` wired in at
//! startup.

use std::path::Path;

use serde_json::Value;

use crate::error::Result;
use crate::types::TaskDescriptor;

// ─────────────────────────────────────────────────────────────────
// Objective
// ─────────────────────────────────────────────────────────────────

/// Domain-supplied search capabilities for one task.
///
/// Both operations may fail; a failure aborts the search and fails the task
/// without touching any other worker.
pub trait Objective: Send + Sync {
    /// Produce a candidate key derived from `key`
    fn mutate(&self, key: &Value) -> Result<Value>;

    /// Score a key; higher is better
    fn fitness(&self, key: &Value) -> Result<f64>;
}

/// Builds an `Objective` for a task, given the descriptor and the local
/// problem definition directory (when the task referenced a package).
pub trait ObjectiveFactory: Send + Sync {
    fn build(
        &self,
        descriptor: &TaskDescriptor,
        problem_path: Option<&Path>,
    ) -> Result<Box<dyn Objective>>;
}

// ─────────────────────────────────────────────────────────────────
// Function Adapter
// ─────────────────────────────────────────────────────────────────

/// Adapts a pair of plain closures into an `Objective`.
pub struct FnObjective<M, F> {
    mutate_fn: M,
    fitness_fn: F,
}

impl<M, F> FnObjective<M, F>
where
    M: Fn(&Value) -> Value + Send + Sync,
    F: Fn(&Value) -> f64 + Send + Sync,
{
    pub fn new(mutate_fn: M, fitness_fn: F) -> Self {
        Self { mutate_fn, fitness_fn }
    }
}

impl<M, F> Objective for FnObjective<M, F>
where
    M: Fn(&Value) -> Value + Send + Sync,
    F: Fn(&Value) -> f64 + Send + Sync,
{
    fn mutate(&self, key: &Value) -> Result<Value> {
        Ok((self.mutate_fn)(key))
    }

    fn fitness(&self, key: &Value) -> Result<f64> {
        Ok((self.fitness_fn)(key))
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock Objective
// ─────────────────────────────────────────────────────────────────

/// Deterministic placeholder objective: identity mutation, constant fitness.
///
/// Registered as the fallback factory so the executor runs end-to-end
/// without a domain library, and used throughout the test suite.
#[derive(Debug, Clone, Default)]
pub struct MockObjective {
    fitness_value: f64,
}

impl MockObjective {
    pub fn new(fitness_value: f64) -> Self {
        Self { fitness_value }
    }
}

impl Objective for MockObjective {
    fn mutate(&self, key: &Value) -> Result<Value> {
        Ok(key.clone())
    }

    fn fitness(&self, _key: &Value) -> Result<f64> {
        Ok(self.fitness_value)
    }
}

/// Factory producing `MockObjective`s regardless of task or package.
#[derive(Debug, Clone, Default)]
pub struct MockObjectiveFactory {
    fitness_value: f64,
}

impl MockObjectiveFactory {
    pub fn new(fitness_value: f64) -> Self {
        Self { fitness_value }
    }
}

impl ObjectiveFactory for MockObjectiveFactory {
    fn build(
        &self,
        _descriptor: &TaskDescriptor,
        _problem_path: Option<&Path>,
    ) -> Result<Box<dyn Objective>> {
        Ok(Box::new(MockObjective::new(self.fitness_value)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mock_objective_identity_mutation() {
        let objective = MockObjective::new(3.0);
        let key = json!({"route": [1, 2, 3]});

        assert_eq!(objective.mutate(&key).unwrap(), key);
        assert_eq!(objective.fitness(&key).unwrap(), 3.0);
    }

    #[test]
    fn test_fn_objective_adapts_closures() {
        let objective = FnObjective::new(
            |key: &Value| json!(key.as_i64().unwrap() + 1),
            |key: &Value| key.as_i64().unwrap() as f64 * 2.0,
        );

        assert_eq!(objective.mutate(&json!(1)).unwrap(), json!(2));
        assert_eq!(objective.fitness(&json!(4)).unwrap(), 8.0);
    }

    #[test]
    fn test_mock_factory_builds_for_any_task() {
        let factory = MockObjectiveFactory::new(1.5);
        let descriptor = TaskDescriptor::parse(
            "task-1",
            r#"{"uid":"u","location":"K0","temperature":1,"cooling_rate":1,"num_mutations":1}"#,
        )
        .unwrap();

        let objective = factory.build(&descriptor, None).unwrap();
        assert_eq!(objective.fitness(&json!("K0")).unwrap(), 1.5);
    }
}
