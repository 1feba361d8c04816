use std::future::Future;
use std::path::Path;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::languages::RunPlan;

/// Captured result of one finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run step exited on its own
    Finished(ProcessOutput),
    /// A compile step exited non-zero; the run step never started
    CompileFailed(ProcessOutput),
    /// The termination token fired and the process group was killed
    Terminated,
}

/// Trait for executing a resolved toolchain plan
///
/// Implementations run the compile steps, then the run step with `stdin`
/// redirected from the given file, and must not return before every process
/// they spawned has exited.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        plan: &RunPlan,
        stdin: &Path,
        work_dir: &Path,
        terminate: CancellationToken,
    ) -> impl Future<Output = Result<RunOutcome>> + Send;
}
