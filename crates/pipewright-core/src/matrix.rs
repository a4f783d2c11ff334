//! Matrix expansion.
//!
//! A pure function from a [`MatrixSpec`] to concrete combinations. The
//! cross product keeps axis declaration order, first axis varying slowest,
//! and never grows from `include` records: a record only attaches metadata
//! to the combinations whose axis values it matches.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::domain::{JobDefinition, MatrixSpec};

/// One concrete matrix assignment plus include metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatrixCombination {
    /// Axis assignment in axis declaration order.
    pub values: Vec<(String, String)>,
    /// Extra keys attached by matching include records.
    pub metadata: BTreeMap<String, String>,
}

impl MatrixCombination {
    /// Axis value first, then include metadata.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.metadata.get(key).map(String::as_str))
    }

    /// `"windows-latest, stable"`; empty for a job without a matrix.
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Every key visible to `${{ matrix.* }}`.
    pub fn all(&self) -> BTreeMap<String, String> {
        let mut all = self.metadata.clone();
        for (k, v) in &self.values {
            all.insert(k.clone(), v.clone());
        }
        all
    }

    fn matches(&self, record: &BTreeMap<String, String>, spec: &MatrixSpec) -> bool {
        record
            .iter()
            .filter(|(k, _)| spec.has_axis(k))
            .all(|(k, v)| self.get(k) == Some(v.as_str()))
    }
}

/// Result of expanding one matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatrixExpansion {
    pub combinations: Vec<MatrixCombination>,
    /// Indices of include records that matched no combination.
    pub unmatched_includes: Vec<usize>,
}

impl MatrixExpansion {
    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }
}

/// Expand `spec` into its cross product and apply include records.
///
/// Duplicate values within an axis are collapsed, so every combination has a
/// unique assignment. An axis with no values yields no combinations.
pub fn expand(spec: &MatrixSpec) -> MatrixExpansion {
    let mut combinations = vec![MatrixCombination::default()];
    for axis in &spec.axes {
        let mut seen = Vec::with_capacity(axis.values.len());
        for value in &axis.values {
            if !seen.contains(&value) {
                seen.push(value);
            }
        }

        let mut next = Vec::with_capacity(combinations.len() * seen.len());
        for base in &combinations {
            for value in &seen {
                let mut combination = base.clone();
                combination.values.push((axis.name.clone(), (*value).clone()));
                next.push(combination);
            }
        }
        combinations = next;
    }

    let mut unmatched_includes = Vec::new();
    for (index, record) in spec.include.iter().enumerate() {
        let mut matched = false;
        for combination in combinations.iter_mut() {
            if combination.matches(record, spec) {
                matched = true;
                for (k, v) in record.iter().filter(|(k, _)| !spec.has_axis(k)) {
                    combination.metadata.insert(k.clone(), v.clone());
                }
            }
        }
        if !matched {
            warn!(include = index, "Matrix include record matches no combination");
            unmatched_includes.push(index);
        }
    }

    MatrixExpansion {
        combinations,
        unmatched_includes,
    }
}

/// Expand a job: a job without a matrix runs exactly once.
pub fn expand_job(job: &JobDefinition) -> MatrixExpansion {
    match &job.strategy.matrix {
        Some(spec) => expand(spec),
        None => MatrixExpansion {
            combinations: vec![MatrixCombination::default()],
            unmatched_includes: Vec::new(),
        },
    }
}
