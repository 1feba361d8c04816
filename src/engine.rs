mod local_runner;
mod runner;
mod scratch;

pub use local_runner::LocalRunner;
pub use runner::{ProcessOutput, ProcessRunner, RunOutcome};
pub use scratch::{ScratchDirs, base_name};

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::extractor::{Inputs, TestCase};
use crate::languages::LanguageRegistry;

pub const UNSUPPORTED_EXTENSION: &str = "Unsupported file extension";
pub const TIMEOUT_SENTINEL: &str = "Time Limit Exceeded";

/// Result of running one test case, as shown next to the case
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub input: Inputs,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Pending,
    InputWritten,
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// How a case settled, before it is rendered into result text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Completed(String),
    Failed(String),
    TimedOut,
    Unsupported,
}

impl CaseOutcome {
    pub fn state(&self) -> CaseState {
        match self {
            Self::Completed(_) => CaseState::Completed,
            Self::Failed(_) | Self::Unsupported => CaseState::Failed,
            Self::TimedOut => CaseState::TimedOut,
        }
    }

    pub fn into_output(self) -> String {
        match self {
            Self::Completed(stdout) => stdout,
            Self::Failed(message) => format!("Error: {message}"),
            Self::TimedOut => TIMEOUT_SENTINEL.to_string(),
            Self::Unsupported => UNSUPPORTED_EXTENSION.to_string(),
        }
    }

    fn from_run(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Terminated => Self::TimedOut,
            RunOutcome::CompileFailed(output) => {
                let message = first_non_empty(&output.stderr, &output.stdout)
                    .unwrap_or_else(|| format!("Compilation exited with code: {:?}", output.code));
                Self::Failed(message)
            }
            RunOutcome::Finished(output) => {
                let stderr = output.stderr.trim();
                if output.code == Some(0) && stderr.is_empty() {
                    Self::Completed(output.stdout.trim_end().to_string())
                } else if !stderr.is_empty() {
                    Self::Failed(stderr.to_string())
                } else {
                    match output.code {
                        Some(code) => Self::Failed(format!("Process exited with code: {code}")),
                        None => Self::Failed("Process was killed by a signal".to_string()),
                    }
                }
            }
        }
    }
}

fn first_non_empty(a: &str, b: &str) -> Option<String> {
    [a.trim(), b.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Source of the external termination signal for each case
///
/// The engine never times a case itself; the token handed out for a case is
/// the only way a running process gets killed.
pub trait TerminationPolicy: Send + Sync {
    fn token_for(&self, case_index: usize) -> CancellationToken;
}

/// Cancelling the token terminates the running case and every later one
impl TerminationPolicy for CancellationToken {
    fn token_for(&self, _case_index: usize) -> CancellationToken {
        self.child_token()
    }
}

/// Host-side wall clock: terminates each case `limit` after it starts
pub struct Deadline {
    limit: Duration,
    parent: CancellationToken,
}

impl Deadline {
    pub fn new(limit: Duration, parent: CancellationToken) -> Self {
        Self { limit, parent }
    }
}

impl TerminationPolicy for Deadline {
    fn token_for(&self, case_index: usize) -> CancellationToken {
        let token = self.parent.child_token();
        let timer = token.clone();
        let limit = self.limit;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    log::warn!("Test case {case_index} exceeded {limit:?}, terminating");
                    timer.cancel();
                }
                _ = timer.cancelled() => {}
            }
        });
        token
    }
}

/// Runs test cases of a source file one after another through its toolchain
pub struct Engine<R = LocalRunner> {
    registry: LanguageRegistry,
    scratch: ScratchDirs,
    runner: R,
}

impl Engine<LocalRunner> {
    pub fn local(registry: LanguageRegistry, workspace_root: impl AsRef<Path>) -> Self {
        Self::new(registry, workspace_root, LocalRunner)
    }
}

impl<R: ProcessRunner> Engine<R> {
    pub fn new(registry: LanguageRegistry, workspace_root: impl AsRef<Path>, runner: R) -> Self {
        Self {
            registry,
            scratch: ScratchDirs::new(workspace_root),
            runner,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs every case in order; a case starts only after the previous one settled
    ///
    /// Per-case failures become result text. Only failing to create the
    /// scratch directories aborts the batch.
    pub async fn run_all(
        &self,
        source: &Path,
        cases: &[TestCase],
        policy: &dyn TerminationPolicy,
    ) -> Result<Vec<ExecutionResult>> {
        self.scratch.ensure().await?;
        log::info!("Running {} test cases for {}", cases.len(), source.display());

        let mut results = Vec::with_capacity(cases.len());
        for (idx, case) in cases.iter().enumerate() {
            let case_idx = idx + 1;
            let token = policy.token_for(case_idx);
            let result = match self.run_case(source, case_idx, case, token.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Test case {case_idx} of {} failed: {e:#}", source.display());
                    ExecutionResult {
                        input: case.input.clone(),
                        output: CaseOutcome::Failed(format!("{e:#}")).into_output(),
                    }
                }
            };
            // Settles any timer still attached to this case
            token.cancel();
            results.push(result);
        }

        Ok(results)
    }

    /// Runs one case, `case_idx` being its 1-based position in the file's list
    pub async fn run_case(
        &self,
        source: &Path,
        case_idx: usize,
        case: &TestCase,
        terminate: CancellationToken,
    ) -> Result<ExecutionResult> {
        // Toolchains run in the source's directory, so `%FILE%` must not be relative
        let source = std::path::absolute(source)?;
        let source = source.as_path();
        let base = base_name(source);
        log::debug!("{base} case {case_idx}: {:?}", CaseState::Pending);

        let input_path = self.scratch.input_path(&base, case_idx);
        self.scratch.ensure().await?;
        tokio::fs::write(&input_path, &case.input_format).await?;
        log::debug!("{base} case {case_idx}: {:?}", CaseState::InputWritten);

        let outcome = self.execute(source, &input_path, terminate).await;
        log::debug!("{base} case {case_idx}: {:?}", outcome.state());

        let output = outcome.into_output();
        tokio::fs::write(self.scratch.output_path(&base, case_idx), &output).await?;

        Ok(ExecutionResult {
            input: case.input.clone(),
            output,
        })
    }

    async fn execute(
        &self,
        source: &Path,
        input_path: &Path,
        terminate: CancellationToken,
    ) -> CaseOutcome {
        let tag = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let Some(plan) = self.registry.build_run_command(source, &tag) else {
            log::warn!("Unsupported file extension: {tag}");
            return CaseOutcome::Unsupported;
        };

        if terminate.is_cancelled() {
            return CaseOutcome::TimedOut;
        }

        let work_dir = work_dir_of(source);
        log::debug!("{:?}: {:?} in {}", CaseState::Running, plan.run, work_dir.display());
        match self.runner.run(&plan, input_path, &work_dir, terminate).await {
            Ok(outcome) => CaseOutcome::from_run(outcome),
            Err(e) => CaseOutcome::Failed(format!("{e:#}")),
        }
    }
}

fn work_dir_of(source: &Path) -> PathBuf {
    match source.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
