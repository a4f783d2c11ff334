//! Pipeline definition model.
//!
//! These types mirror the definition file one-to-one and carry no behavior
//! beyond deserialization; trigger evaluation, matrix expansion, caching and
//! deploy planning live in their own modules and take these as input.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use super::condition::Condition;
use super::error::PipewrightError;
use super::ordered::{scalar_map, OrderedMap, Scalar};

// ---------------------------------------------------------------------------
// Events and triggers
// ---------------------------------------------------------------------------

/// Repository event kinds a pipeline can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Push => "push",
            EventType::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = PipewrightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventType::Push),
            "pull_request" | "pull-request" => Ok(EventType::PullRequest),
            other => Err(PipewrightError::InvalidDefinition(format!(
                "unknown event type `{}`",
                other
            ))),
        }
    }
}

/// An incoming repository event.
///
/// For pull requests `branch` is the branch the request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventType,
    pub branch: String,
}

impl Event {
    pub fn new(kind: EventType, branch: impl Into<String>) -> Self {
        Self {
            kind,
            branch: branch.into(),
        }
    }
}

/// Branch filter for one event type. Names match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFilter {
    #[serde(default)]
    pub branches: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pipeline and jobs
// ---------------------------------------------------------------------------

/// A complete pipeline definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(rename = "on", default)]
    pub triggers: BTreeMap<EventType, TriggerFilter>,

    /// Environment shared by every job.
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Jobs in declaration order.
    pub jobs: OrderedMap<JobDefinition>,
}

/// One job definition, before matrix expansion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    /// Execution-environment label; may reference `${{ matrix.* }}`.
    pub runs_on: String,

    #[serde(default)]
    pub strategy: Strategy,

    /// Failures of this job do not fail the run.
    #[serde(default)]
    pub continue_on_error: bool,

    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    pub cache: Option<CacheSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Publish step that runs after every step succeeded.
    pub deploy: Option<DeploySpec>,
}

/// Matrix and sibling-failure policy of a job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Strategy {
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,

    /// Upper bound on concurrently running instances of this job.
    pub max_parallel: Option<usize>,

    pub matrix: Option<MatrixSpec>,
}

fn default_fail_fast() -> bool {
    true
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            fail_fast: default_fail_fast(),
            max_parallel: None,
            matrix: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// One matrix axis with its candidate values in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

/// Matrix declaration: ordered axes plus `include` records.
///
/// In the definition file every key except `include` is an axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatrixSpec {
    pub axes: Vec<Axis>,
    pub include: Vec<BTreeMap<String, String>>,
}

impl MatrixSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: append an axis.
    pub fn axis<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes.push(Axis {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Builder: append an include record.
    pub fn include<I, K, V>(mut self, record: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.include
            .push(record.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn has_axis(&self, name: &str) -> bool {
        self.axes.iter().any(|a| a.name == name)
    }
}

struct MatrixVisitor;

impl<'de> Visitor<'de> for MatrixVisitor {
    type Value = MatrixSpec;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a matrix of axis lists and an optional include list")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut spec = MatrixSpec::new();
        while let Some(key) = access.next_key::<String>()? {
            if key == "include" {
                let records: Vec<BTreeMap<String, Scalar>> = access.next_value()?;
                spec.include = records
                    .into_iter()
                    .map(|r| r.into_iter().map(|(k, v)| (k, v.0)).collect())
                    .collect();
            } else {
                if spec.has_axis(&key) {
                    return Err(serde::de::Error::custom(format!("duplicate axis `{}`", key)));
                }
                let values: Vec<Scalar> = access.next_value()?;
                spec.axes.push(Axis {
                    name: key,
                    values: values.into_iter().map(|v| v.0).collect(),
                });
            }
        }
        Ok(spec)
    }
}

impl<'de> Deserialize<'de> for MatrixSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MatrixVisitor)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Named action with options (`uses:` / `with:`).
    Action {
        uses: String,
        with: BTreeMap<String, String>,
    },
    /// Shell command (`run:`).
    Command { run: String },
}

/// One step of a job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawStep")]
pub struct Step {
    pub name: Option<String>,
    pub condition: Option<Condition>,
    pub kind: StepKind,
    pub env: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    name: Option<String>,
    #[serde(rename = "if")]
    condition: Option<String>,
    uses: Option<String>,
    #[serde(default, deserialize_with = "scalar_map")]
    with: BTreeMap<String, String>,
    run: Option<String>,
    #[serde(default, deserialize_with = "scalar_map")]
    env: BTreeMap<String, String>,
}

impl TryFrom<RawStep> for Step {
    type Error = PipewrightError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let kind = match (raw.uses, raw.run) {
            (Some(uses), None) => StepKind::Action {
                uses,
                with: raw.with,
            },
            (None, Some(run)) => {
                if !raw.with.is_empty() {
                    return Err(PipewrightError::InvalidStep(
                        "`with` is only valid on `uses` steps".to_string(),
                    ));
                }
                StepKind::Command { run }
            }
            (Some(_), Some(_)) => {
                return Err(PipewrightError::InvalidStep(
                    "a step has either `uses` or `run`, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(PipewrightError::InvalidStep(
                    "a step needs `uses` or `run`".to_string(),
                ))
            }
        };
        let condition = raw.condition.as_deref().map(str::parse).transpose()?;
        Ok(Step {
            name: raw.name,
            condition,
            kind,
            env: raw.env,
        })
    }
}

impl Step {
    /// Shell command step.
    pub fn command(run: impl Into<String>) -> Self {
        Step {
            name: None,
            condition: None,
            kind: StepKind::Command { run: run.into() },
            env: BTreeMap::new(),
        }
    }

    /// Action step.
    pub fn action<I, K, V>(uses: impl Into<String>, with: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Step {
            name: None,
            condition: None,
            kind: StepKind::Action {
                uses: uses.into(),
                with: with.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            },
            env: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Name shown in logs and reports.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.kind {
            StepKind::Action { uses, .. } => uses.clone(),
            StepKind::Command { run } => {
                let first = run.lines().next().unwrap_or_default().trim();
                format!("Run {}", first)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cache and deploy
// ---------------------------------------------------------------------------

/// Cache declaration of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheSpec {
    /// Directory, relative to the job workspace, that is restored and saved.
    pub path: String,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Files, relative to the source directory, whose content keys the cache.
    #[serde(default)]
    pub fingerprints: Vec<String>,
}

fn default_key_prefix() -> String {
    "cache".to_string()
}

/// Artifact publish declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploySpec {
    /// Generated directory, relative to the job workspace.
    pub source: String,

    /// Deploy location, relative to the deploy root.
    pub target: String,

    /// Delete target files that the source no longer has.
    #[serde(default)]
    pub clean: bool,

    /// Paths (or glob patterns) that `clean` never deletes.
    #[serde(default)]
    pub clean_exclude: BTreeSet<String>,

    /// Collapse the target history to a single commit.
    #[serde(default)]
    pub single_commit: bool,

    pub message: Option<String>,
}

impl DeploySpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            clean: false,
            clean_exclude: BTreeSet::new(),
            single_commit: false,
            message: None,
        }
    }
}
