//! Technician capacity.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::normalize_category;

/// Open problems a technician may hold before it stops being available.
pub const DEFAULT_CAPACITY: u32 = 3;

/// Errors from parsing a capacity override list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityParseError {
    /// An entry is not of the form `specialty=capacity`.
    #[error("invalid capacity override '{0}', expected specialty=capacity")]
    Malformed(String),

    /// The capacity is not a positive integer.
    #[error("invalid capacity '{value}' for specialty '{specialty}'")]
    InvalidCapacity { specialty: String, value: String },
}

/// Workload capacity, globally and per specialty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityPolicy {
    default_capacity: u32,
    overrides: BTreeMap<String, u32>,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CapacityPolicy {
    /// A policy with the same capacity for every specialty.
    ///
    /// A capacity of zero would make every technician permanently
    /// unavailable, so it is raised to one.
    pub fn new(default_capacity: u32) -> Self {
        Self {
            default_capacity: default_capacity.max(1),
            overrides: BTreeMap::new(),
        }
    }

    /// Set the capacity for one specialty.
    #[must_use]
    pub fn with_override(mut self, specialty: &str, capacity: u32) -> Self {
        self.overrides
            .insert(normalize_category(specialty), capacity.max(1));
        self
    }

    /// Parse overrides of the form `electrical=5,plumbing=2`.
    ///
    /// Empty input yields no overrides.
    pub fn with_overrides_from_str(mut self, raw: &str) -> Result<Self, CapacityParseError> {
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((specialty, value)) = entry.split_once('=') else {
                return Err(CapacityParseError::Malformed(entry.to_string()));
            };

            let specialty = normalize_category(specialty);
            if specialty.is_empty() {
                return Err(CapacityParseError::Malformed(entry.to_string()));
            }

            let capacity = value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|c| *c > 0)
                .ok_or_else(|| CapacityParseError::InvalidCapacity {
                    specialty: specialty.clone(),
                    value: value.trim().to_string(),
                })?;

            self.overrides.insert(specialty, capacity);
        }

        Ok(self)
    }

    pub fn default_capacity(&self) -> u32 {
        self.default_capacity
    }

    /// Capacity for a specialty, falling back to the default.
    pub fn capacity_for(&self, specialty: &str) -> u32 {
        self.overrides
            .get(&normalize_category(specialty))
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Whether a technician of this specialty can take another problem.
    pub fn is_available(&self, specialty: &str, workload: usize) -> bool {
        workload < self.capacity_for(specialty) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, true)]
    #[case(1, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(7, false)]
    fn test_default_capacity_is_three(#[case] workload: usize, #[case] available: bool) {
        let policy = CapacityPolicy::default();
        assert_eq!(policy.is_available("plumbing", workload), available);
    }

    #[test]
    fn test_overrides_parse() {
        let policy = CapacityPolicy::default()
            .with_overrides_from_str(" Electrical=5 , plumbing=2,")
            .unwrap();

        assert_eq!(policy.capacity_for("electrical"), 5);
        assert_eq!(policy.capacity_for("ELECTRICAL"), 5);
        assert_eq!(policy.capacity_for("plumbing"), 2);
        assert_eq!(policy.capacity_for("hvac"), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_overrides_reject_garbage() {
        let err = CapacityPolicy::default()
            .with_overrides_from_str("electrical")
            .unwrap_err();
        assert_eq!(err, CapacityParseError::Malformed("electrical".to_string()));

        let err = CapacityPolicy::default()
            .with_overrides_from_str("electrical=0")
            .unwrap_err();
        assert!(matches!(err, CapacityParseError::InvalidCapacity { .. }));

        let err = CapacityPolicy::default()
            .with_overrides_from_str("=4")
            .unwrap_err();
        assert!(matches!(err, CapacityParseError::Malformed(_)));
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let policy = CapacityPolicy::new(0).with_override("hvac", 0);
        assert_eq!(policy.default_capacity(), 1);
        assert_eq!(policy.capacity_for("hvac"), 1);
        assert!(policy.is_available("hvac", 0));
    }
}
