//! Explicit per-job context.
//!
//! Every component call that needs to know "which job is this" receives a
//! [`JobContext`]; nothing is global, so concurrently running job instances
//! never observe each other's state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::{ExpressionContext, JobDefinition, Reference, Step};
use crate::matrix::MatrixCombination;

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("expression regex is valid")
    })
}

/// Substitute `${{ ref }}` occurrences. Unknown references become empty.
pub fn interpolate(input: &str, ctx: &dyn ExpressionContext) -> String {
    expression_regex()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            Reference::parse(&caps[1])
                .and_then(|r| ctx.resolve(&r))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Scheduling and caching identity of a job instance: job name plus its
/// concrete matrix assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId {
    pub job: String,
    pub assignment: Vec<(String, String)>,
}

impl JobId {
    pub fn new(job: impl Into<String>, combination: &MatrixCombination) -> Self {
        Self {
            job: job.into(),
            assignment: combination.values.clone(),
        }
    }

    /// Stable SHA-256 over the job name and assignment.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.job.as_bytes());
        for (k, v) in &self.assignment {
            hasher.update(b"\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Filesystem-safe directory name, unique per identity.
    pub fn slug(&self) -> String {
        let mut readable: String = std::iter::once(self.job.as_str())
            .chain(self.assignment.iter().map(|(_, v)| v.as_str()))
            .collect::<Vec<_>>()
            .join("-")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
            .collect();
        readable.truncate(64);
        format!("{}-{}", readable, &self.digest()[..8])
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.assignment.is_empty() {
            return f.write_str(&self.job);
        }
        let values: Vec<_> = self.assignment.iter().map(|(_, v)| v.as_str()).collect();
        write!(f, "{} ({})", self.job, values.join(", "))
    }
}

/// Everything a job instance's steps can see.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    /// Interpolated `runs-on` label.
    pub platform: String,
    pub combination: MatrixCombination,
    /// Merged pipeline and job env, interpolated, plus built-in variables.
    pub env: BTreeMap<String, String>,
}

struct Partial<'a> {
    platform: &'a str,
    combination: &'a MatrixCombination,
    env: &'a BTreeMap<String, String>,
}

impl ExpressionContext for Partial<'_> {
    fn resolve(&self, reference: &Reference) -> Option<String> {
        match reference {
            Reference::Matrix(key) => self.combination.get(key).map(str::to_string),
            Reference::RunnerOs => Some(self.platform.to_string()),
            Reference::Env(key) => self.env.get(key).cloned(),
        }
    }
}

impl JobContext {
    pub fn new(
        pipeline_env: &BTreeMap<String, String>,
        job_name: &str,
        job: &JobDefinition,
        combination: MatrixCombination,
    ) -> Self {
        let empty = BTreeMap::new();
        let platform = interpolate(
            &job.runs_on,
            &Partial {
                platform: "",
                combination: &combination,
                env: &empty,
            },
        );

        let mut raw = pipeline_env.clone();
        raw.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let partial = Partial {
            platform: &platform,
            combination: &combination,
            env: &raw,
        };
        let mut env: BTreeMap<String, String> = raw
            .iter()
            .map(|(k, v)| (k.clone(), interpolate(v, &partial)))
            .collect();

        let id = JobId::new(job_name, &combination);
        env.insert("PIPEWRIGHT_JOB".to_string(), id.to_string());
        env.insert("PIPEWRIGHT_RUNNER_OS".to_string(), platform.clone());
        for (key, value) in combination.all() {
            env.insert(format!("MATRIX_{}", env_key(&key)), value);
        }

        Self {
            id,
            platform,
            combination,
            env,
        }
    }

    pub fn interpolate(&self, input: &str) -> String {
        interpolate(input, self)
    }

    /// Job env overlaid with the step's own (interpolated) env.
    pub fn step_env(&self, step: &Step) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        for (k, v) in &step.env {
            env.insert(k.clone(), self.interpolate(v));
        }
        env
    }
}

impl ExpressionContext for JobContext {
    fn resolve(&self, reference: &Reference) -> Option<String> {
        match reference {
            Reference::Matrix(key) => self.combination.get(key).map(str::to_string),
            Reference::RunnerOs => Some(self.platform.clone()),
            Reference::Env(key) => self.env.get(key).cloned(),
        }
    }
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
