//! Loading and validating pipeline definitions.

use std::collections::BTreeSet;
use std::path::Path;

use pipewright_state::validate_relative;
use tracing::{debug, warn};

use crate::deploy::ExclusionSet;
use crate::domain::{PipelineDefinition, PipewrightError, Result};
use crate::matrix;

/// On-disk definition formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Ok(DefinitionFormat::Yaml),
            Some("json") => Ok(DefinitionFormat::Json),
            _ => Err(PipewrightError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Parse and validate a definition from text.
pub fn parse_definition(text: &str, format: DefinitionFormat) -> Result<PipelineDefinition> {
    let definition: PipelineDefinition = match format {
        DefinitionFormat::Yaml => serde_yml::from_str(text)?,
        DefinitionFormat::Json => serde_json::from_str(text)?,
    };
    validate(&definition)?;
    Ok(definition)
}

/// Read, parse and validate a definition file.
pub fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    let format = DefinitionFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    let definition = parse_definition(&text, format)?;
    debug!(
        pipeline = %definition.name,
        jobs = definition.jobs.len(),
        path = %path.display(),
        "Loaded pipeline definition"
    );
    Ok(definition)
}

fn invalid(message: String) -> PipewrightError {
    PipewrightError::InvalidDefinition(message)
}

/// Cache and deploy paths are joined onto a workspace or deploy root and
/// must stay beneath it.
fn check_contained(job: &str, field: &str, path: &str) -> Result<()> {
    validate_relative(path.trim()).map_err(|_| {
        invalid(format!(
            "job `{}`: {} `{}` must be a relative path without `..`",
            job, field, path
        ))
    })
}

/// Structural checks that serde cannot express.
///
/// Step shape and `if:` syntax are already enforced while parsing.
pub fn validate(definition: &PipelineDefinition) -> Result<()> {
    if definition.name.trim().is_empty() {
        return Err(invalid("pipeline name is empty".to_string()));
    }
    if definition.jobs.is_empty() {
        return Err(invalid("pipeline has no jobs".to_string()));
    }
    if definition.triggers.is_empty() {
        warn!(pipeline = %definition.name, "Pipeline declares no triggers and will never run");
    }

    for (name, job) in definition.jobs.iter() {
        if name.trim().is_empty() {
            return Err(invalid("job name is empty".to_string()));
        }
        if job.runs_on.trim().is_empty() {
            return Err(invalid(format!("job `{}` has an empty runs-on", name)));
        }
        if job.strategy.max_parallel == Some(0) {
            return Err(invalid(format!("job `{}` has max-parallel 0", name)));
        }

        if let Some(spec) = &job.strategy.matrix {
            for axis in &spec.axes {
                let distinct: BTreeSet<_> = axis.values.iter().collect();
                if distinct.len() != axis.values.len() {
                    return Err(invalid(format!(
                        "job `{}`: matrix axis `{}` repeats a value",
                        name, axis.name
                    )));
                }
            }
            if matrix::expand(spec).is_empty() {
                warn!(job = %name, "Matrix expands to no combinations");
            }
        }

        if let Some(cache) = &job.cache {
            if cache.path.trim().is_empty() {
                return Err(invalid(format!("job `{}`: cache path is empty", name)));
            }
            check_contained(name, "cache path", &cache.path)?;
        }

        if let Some(deploy) = &job.deploy {
            if deploy.source.trim().is_empty() || deploy.target.trim().is_empty() {
                return Err(invalid(format!(
                    "job `{}`: deploy source and target are required",
                    name
                )));
            }
            check_contained(name, "deploy source", &deploy.source)?;
            check_contained(name, "deploy target", &deploy.target)?;
            ExclusionSet::new(&deploy.clean_exclude)?;
        }
    }
    Ok(())
}
