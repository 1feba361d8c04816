use std::fs;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::languages::RunPlan;

use super::{ProcessOutput, ProcessRunner, RunOutcome};

/// Runs toolchain commands as ordinary child processes of this one
///
/// Every process is started in its own process group so that a termination
/// reaches interpreters, shells and whatever they spawned. No resource limits
/// are applied besides the termination token.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRunner;

impl ProcessRunner for LocalRunner {
    async fn run(
        &self,
        plan: &RunPlan,
        stdin: &Path,
        work_dir: &Path,
        terminate: CancellationToken,
    ) -> Result<RunOutcome> {
        for step in &plan.compile {
            match run_step(step, Stdio::null(), work_dir, &terminate).await? {
                None => return Ok(RunOutcome::Terminated),
                Some(output) if output.code != Some(0) => {
                    log::info!("Compile step {:?} failed with {:?}", step, output.code);
                    return Ok(RunOutcome::CompileFailed(output));
                }
                Some(_) => {}
            }
        }

        let input = fs::File::open(stdin)
            .with_context(|| format!("Failed to open input file {}", stdin.display()))?;
        match run_step(&plan.run, Stdio::from(input), work_dir, &terminate).await? {
            Some(output) => Ok(RunOutcome::Finished(output)),
            None => Ok(RunOutcome::Terminated),
        }
    }
}

/// Runs one command to completion, or kills it when `terminate` fires
///
/// Returns `None` if the process was terminated.
async fn run_step(
    command: &[String],
    stdin: Stdio,
    work_dir: &Path,
    terminate: &CancellationToken,
) -> Result<Option<ProcessOutput>> {
    let Some((program, args)) = command.split_first() else {
        bail!("Empty command");
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(work_dir)
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to start `{program}`"))?;
    let pid = child.id();
    log::debug!("Spawned `{program}` as {pid:?}");

    let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = terminate.cancelled() => None,
    };

    let Some(status) = status else {
        kill_process_group(&mut child, pid).await;
        stdout_task.abort();
        stderr_task.abort();
        return Ok(None);
    };
    let status = status?;

    // Whatever the leader left running in its group dies with it
    if signal_group(pid) {
        log::debug!("Killed processes left behind by {pid:?}");
    }

    // Pipes may still be held by a process that left the group
    let pipes = async { anyhow::Ok((stdout_task.await??, stderr_task.await??)) };
    let (stdout, stderr) = tokio::select! {
        pipes = pipes => pipes?,
        _ = terminate.cancelled() => {
            log::info!("Terminated {pid:?} while its output was still open");
            return Ok(None);
        }
    };

    Ok(Some(ProcessOutput {
        code: status.code(),
        stdout,
        stderr,
    }))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Sends SIGKILL to the process group led by `pid`
///
/// Returns whether any process received it.
fn signal_group(pid: Option<u32>) -> bool {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: killpg only sends a signal; the group was created for this child
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::warn!("killpg({pid}) failed: {err}");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    false
}

/// Kills the whole group led by `pid` and reaps the leader
async fn kill_process_group(child: &mut Child, pid: Option<u32>) {
    signal_group(pid);
    if let Err(e) = child.start_kill() {
        log::debug!("Process already gone: {e}");
    }
    match child.wait().await {
        Ok(status) => log::info!("Terminated process {pid:?} ({status})"),
        Err(e) => log::warn!("Failed to reap terminated process {pid:?}: {e}"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_step(
            &sh("echo out; echo err >&2; exit 4"),
            Stdio::null(),
            dir.path(),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(output.code, Some(4));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_stdin_comes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, "3\n4\n").unwrap();

        let plan = RunPlan {
            compile: vec![],
            run: sh("read a; read b; echo $((a + b))"),
        };
        let outcome = LocalRunner
            .run(&plan, &input, dir.path(), CancellationToken::new())
            .await
            .unwrap();
        match outcome {
            RunOutcome::Finished(output) => assert_eq!(output.stdout.trim_end(), "7"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_compile_skips_run() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let input = dir.path().join("in.txt");
        fs::write(&input, "").unwrap();

        let plan = RunPlan {
            compile: vec![sh("echo broken >&2; exit 1")],
            run: sh(&format!("touch {}", marker.display())),
        };
        let outcome = LocalRunner
            .run(&plan, &input, dir.path(), CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::CompileFailed(ref o) if o.stderr == "broken\n"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_termination_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_step(&sh("sleep 30"), Stdio::null(), dir.path(), &token)
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_background_process_is_killed_with_leader() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let script = format!("sleep 30 &\necho $! > {}\necho done", pid_file.display());

        let started = std::time::Instant::now();
        let output = run_step(&sh(&script), Stdio::null(), dir.path(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(output.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(10));
        let pid: u32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(!is_running(pid), "background process {pid} outlived its case");
    }

    /// Zombies left for init to reap count as gone
    fn is_running(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_step(
            &["definitely-not-a-real-program-xyz".to_string()],
            Stdio::null(),
            dir.path(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("definitely-not-a-real-program-xyz"));
    }
}
