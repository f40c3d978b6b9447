use crate::compiler::{CompileOutcome, Compiler};
use crate::error::Result;
use crate::language::LanguageProfile;
use crate::runner::{RunLimits, RunOutcome, Runner};
use crate::workspace::Workspace;
use crate::RuntimeConfig;

/// The {compile, run} capability set the evaluation pipeline drives.
#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn compile(&self, workspace: &Workspace, profile: &LanguageProfile) -> CompileOutcome;

    async fn run(
        &self,
        workspace: &Workspace,
        profile: &LanguageProfile,
        input: &str,
        limits: RunLimits,
    ) -> Result<RunOutcome>;
}

/// Backend that spawns real child processes on the host.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    compiler: Compiler,
    runner: Runner,
}

impl ProcessBackend {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            compiler: Compiler::new(config.compile_timeout, config.max_output_bytes),
            runner: Runner::new(config.run_grace, config.max_output_bytes),
        }
    }
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn compile(&self, workspace: &Workspace, profile: &LanguageProfile) -> CompileOutcome {
        self.compiler.compile(workspace, profile).await
    }

    async fn run(
        &self,
        workspace: &Workspace,
        profile: &LanguageProfile,
        input: &str,
        limits: RunLimits,
    ) -> Result<RunOutcome> {
        self.runner.run(workspace, profile, input, limits).await
    }
}
