//! Scripted command executor for deterministic runner tests.
//!
//! Commands are matched by substring. Unmatched commands succeed.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RunnerResult;
use crate::runner::{CommandExecutor, CommandOutput, CommandRequest};

#[derive(Debug, Clone)]
enum Effect {
    Exit(i32),
    Delay(Duration),
    Write { path: PathBuf, content: String },
}

/// Records every request and plays back scripted effects.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Vec<(String, Effect)>,
    calls: Mutex<Vec<CommandRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit with `code`.
    pub fn fail_on(mut self, pattern: impl Into<String>, code: i32) -> Self {
        self.rules.push((pattern.into(), Effect::Exit(code)));
        self
    }

    /// Commands containing `pattern` take `delay` before finishing.
    pub fn delay_on(mut self, pattern: impl Into<String>, delay: Duration) -> Self {
        self.rules.push((pattern.into(), Effect::Delay(delay)));
        self
    }

    /// Commands containing `pattern` write `content` to `path` (relative to
    /// the working directory), the way a build produces output.
    pub fn write_on(
        mut self,
        pattern: impl Into<String>,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> Self {
        self.rules.push((
            pattern.into(),
            Effect::Write {
                path: path.into(),
                content: content.into(),
            },
        ));
        self
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, request: &CommandRequest) -> RunnerResult<CommandOutput> {
        self.calls.lock().unwrap().push(request.clone());

        let mut output = CommandOutput::default();
        for (pattern, effect) in &self.rules {
            if !request.command.contains(pattern.as_str()) {
                continue;
            }
            match effect {
                Effect::Exit(code) => {
                    if output.exit_code == 0 {
                        output.exit_code = *code;
                        output.stderr = format!("scripted failure: {}", pattern);
                    }
                }
                Effect::Delay(delay) => tokio::time::sleep(*delay).await,
                Effect::Write { path, content } => {
                    let file = request.working_dir.join(path);
                    if let Some(dir) = file.parent() {
                        tokio::fs::create_dir_all(dir).await?;
                    }
                    tokio::fs::write(file, content).await?;
                }
            }
        }
        Ok(output)
    }
}
