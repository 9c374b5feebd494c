//! Task descriptor and payload parsing
//!
//! A task launch carries a JSON payload describing one annealing search:
//! the starting key, the temperature schedule, and optionally a problem
//! definition package to provision before the search starts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Wire Payload
// ─────────────────────────────────────────────────────────────────

/// Reference to an externally hosted problem definition package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    /// Package name, used as the cache directory key
    pub name: String,

    /// Source URL (git scheme or http(s) gzip-tar archive)
    pub url: String,
}

/// Task payload as sent by the scheduler (see the launch message data field)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Echo token, returned untouched in the result payload
    pub uid: String,

    /// Initial search key (opaque, domain-defined)
    pub location: Value,

    /// Initial annealing temperature
    pub temperature: f64,

    /// Amount subtracted from the temperature each round
    pub cooling_rate: f64,

    /// Mutation attempts per round
    pub num_mutations: u32,

    /// Optional problem definition package to provision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageRef>,
}

// ─────────────────────────────────────────────────────────────────
// Task Descriptor
// ─────────────────────────────────────────────────────────────────

/// Validated, immutable description of one search task.
///
/// Owned by the task worker for its lifetime.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    /// Opaque unique task id assigned by the scheduler
    pub task_id: String,

    /// Echo token
    pub uid: String,

    /// Initial search key
    pub location: Value,

    /// Initial annealing temperature (>= 0)
    pub temperature: f64,

    /// Cooling rate (> 0)
    pub cooling_rate: f64,

    /// Mutation attempts per round (> 0)
    pub num_mutations: u32,

    /// Optional problem definition package
    pub package: Option<PackageRef>,
}

impl TaskDescriptor {
    /// Decode and validate a task payload.
    ///
    /// Any decode or constraint failure maps to a `PayloadDecode` error for
    /// this task id; the caller reports it as a FAILED status without
    /// starting a search.
    pub fn parse(task_id: impl Into<String>, data: &str) -> Result<Self> {
        let task_id = task_id.into();

        let payload: TaskPayload = serde_json::from_str(data)
            .map_err(|e| Error::payload_decode(task_id.clone(), e.to_string()))?;

        let descriptor = Self {
            task_id,
            uid: payload.uid,
            location: payload.location,
            temperature: payload.temperature,
            cooling_rate: payload.cooling_rate,
            num_mutations: payload.num_mutations,
            package: payload.package,
        };

        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Validate field constraints
    fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(Error::payload_decode(
                self.task_id.clone(),
                format!("temperature must be finite and >= 0, got {}", self.temperature),
            ));
        }
        if !self.cooling_rate.is_finite() || self.cooling_rate <= 0.0 {
            return Err(Error::payload_decode(
                self.task_id.clone(),
                format!("cooling_rate must be finite and > 0, got {}", self.cooling_rate),
            ));
        }
        if self.num_mutations == 0 {
            return Err(Error::payload_decode(
                self.task_id.clone(),
                "num_mutations must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Expected number of annealing rounds for this schedule
    pub fn expected_rounds(&self) -> u64 {
        (self.temperature / self.cooling_rate).floor() as u64 + 1
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_json() -> String {
        json!({
            "uid": "u1",
            "location": "K0",
            "temperature": 2.0,
            "cooling_rate": 1.0,
            "num_mutations": 1
        })
        .to_string()
    }

    #[test]
    fn test_parse_valid_payload() {
        let desc = TaskDescriptor::parse("task-1", &payload_json()).unwrap();
        assert_eq!(desc.task_id, "task-1");
        assert_eq!(desc.uid, "u1");
        assert_eq!(desc.location, json!("K0"));
        assert_eq!(desc.temperature, 2.0);
        assert_eq!(desc.cooling_rate, 1.0);
        assert_eq!(desc.num_mutations, 1);
        assert!(desc.package.is_none());
    }

    #[test]
    fn test_parse_with_package() {
        let data = json!({
            "uid": "u1",
            "location": {"x": 1},
            "temperature": 10.0,
            "cooling_rate": 0.5,
            "num_mutations": 16,
            "package": {"name": "tsp", "url": "git://example.com/tsp.git"}
        })
        .to_string();

        let desc = TaskDescriptor::parse("task-2", &data).unwrap();
        let pkg = desc.package.unwrap();
        assert_eq!(pkg.name, "tsp");
        assert_eq!(pkg.url, "git://example.com/tsp.git");
    }

    #[test]
    fn test_parse_missing_field() {
        let data = json!({
            "uid": "u1",
            "location": "K0",
            "temperature": 2.0,
            "cooling_rate": 1.0
        })
        .to_string();

        let err = TaskDescriptor::parse("task-1", &data).unwrap_err();
        match err {
            Error::PayloadDecode { task_id, message } => {
                assert_eq!(task_id, "task-1");
                assert!(message.contains("num_mutations"));
            }
            other => panic!("Expected PayloadDecode, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = TaskDescriptor::parse("task-1", "{not json").unwrap_err();
        assert!(matches!(err, Error::PayloadDecode { .. }));
    }

    #[test]
    fn test_validate_negative_temperature() {
        let data = json!({
            "uid": "u1",
            "location": "K0",
            "temperature": -1.0,
            "cooling_rate": 1.0,
            "num_mutations": 1
        })
        .to_string();

        assert!(TaskDescriptor::parse("task-1", &data).is_err());
    }

    #[test]
    fn test_validate_zero_cooling_rate() {
        let data = json!({
            "uid": "u1",
            "location": "K0",
            "temperature": 1.0,
            "cooling_rate": 0.0,
            "num_mutations": 1
        })
        .to_string();

        assert!(TaskDescriptor::parse("task-1", &data).is_err());
    }

    #[test]
    fn test_validate_zero_mutations() {
        let data = json!({
            "uid": "u1",
            "location": "K0",
            "temperature": 1.0,
            "cooling_rate": 1.0,
            "num_mutations": 0
        })
        .to_string();

        assert!(TaskDescriptor::parse("task-1", &data).is_err());
    }

    #[test]
    fn test_expected_rounds() {
        let desc = TaskDescriptor::parse("task-1", &payload_json()).unwrap();
        // T = 2, 1, 0 with cooling rate 1
        assert_eq!(desc.expected_rounds(), 3);
    }
}
