//! Built-in actions for `uses:` steps.
//!
//! - `checkout`: copy the source directory into the job workspace
//! - `toolchain`: install a toolchain channel and, optionally, a target triple

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use pipewright_state::{fs_target, tree};
use tracing::info;

use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandExecutor, CommandOutput, CommandRequest};

/// Directories `checkout` never copies. The engine's own cache store and
/// deploy roots live under [`fs_target::META_DIR`] by default.
pub const CHECKOUT_SKIP: &[&str] = &[".git", "target", fs_target::META_DIR];

/// Everything an action may touch.
pub struct ActionInvocation<'a> {
    /// Interpolated `with:` options.
    pub with: &'a BTreeMap<String, String>,
    pub env: &'a BTreeMap<String, String>,
    pub workspace: &'a Path,
    pub source_dir: &'a Path,
    pub executor: &'a dyn CommandExecutor,
}

impl ActionInvocation<'_> {
    /// A non-empty `with:` option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.with
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    async fn shell(&self, command: String) -> RunnerResult<CommandOutput> {
        let request = CommandRequest {
            command,
            working_dir: self.workspace.to_path_buf(),
            env: self.env.clone(),
        };
        self.executor.execute(&request).await
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, invocation: &ActionInvocation<'_>) -> RunnerResult<CommandOutput>;
}

/// Copies the source tree into the workspace.
#[derive(Debug, Default)]
pub struct Checkout;

#[async_trait]
impl Action for Checkout {
    async fn run(&self, invocation: &ActionInvocation<'_>) -> RunnerResult<CommandOutput> {
        let source = invocation.source_dir.to_path_buf();
        let workspace = invocation.workspace.to_path_buf();
        if !source.is_dir() {
            return Err(RunnerError::Action {
                action: "checkout".to_string(),
                reason: format!("source directory {} does not exist", source.display()),
            });
        }
        let copied = tokio::task::spawn_blocking(move || {
            tree::copy_dir(&source, &workspace, CHECKOUT_SKIP)
        })
        .await??;
        info!(files = copied, "Checked out sources");
        Ok(CommandOutput::ok(format!("checked out {} files", copied)))
    }
}

/// Provisions a toolchain through `rustup` via the command executor.
#[derive(Debug, Default)]
pub struct Toolchain;

#[async_trait]
impl Action for Toolchain {
    async fn run(&self, invocation: &ActionInvocation<'_>) -> RunnerResult<CommandOutput> {
        let channel = invocation.option("toolchain").unwrap_or("stable");
        let install = invocation
            .shell(format!(
                "rustup toolchain install {} --profile minimal",
                channel
            ))
            .await?;
        if !install.success() {
            return Ok(install);
        }

        match invocation.option("target") {
            Some(target) => {
                invocation
                    .shell(format!(
                        "rustup target add --toolchain {} {}",
                        channel, target
                    ))
                    .await
            }
            None => Ok(install),
        }
    }
}

/// Name -> action lookup for `uses:` steps.
#[derive(Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn get(&self, name: &str) -> RunnerResult<Arc<dyn Action>> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| RunnerError::UnknownAction(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ActionRegistry {
    /// `checkout` and `toolchain`.
    fn default() -> Self {
        Self::empty()
            .register("checkout", Arc::new(Checkout))
            .register("toolchain", Arc::new(Toolchain))
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
