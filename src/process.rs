//! External tool invocation with a hard wall clock.
//!
//! `yt-dlp`, `ffmpeg` and `ffprobe` are all driven through
//! [`run_with_timeout`]. Children are spawned with `kill_on_drop`, so a
//! timed-out or aborted call never leaves a process behind.

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{0} not found. Is it installed and on PATH?")]
    NotInstalled(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

/// Run `cmd` to completion, capturing stdout and stderr.
///
/// A non-zero exit is not an error here; callers inspect `Output::status`.
pub async fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<Output, RunError> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            RunError::NotInstalled(program.clone())
        } else {
            RunError::Spawn {
                program: program.clone(),
                source,
            }
        }
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| RunError::Spawn { program, source }),
        Err(_) => {
            tracing::warn!(target: "process", program = %program, timeout_secs = timeout.as_secs(), "killed after timeout");
            Err(RunError::TimedOut { program, timeout })
        }
    }
}

/// First line of `<program> <version_arg>` if the tool runs successfully.
pub async fn tool_version(program: &str, version_arg: &str) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.arg(version_arg);
    let output = run_with_timeout(cmd, Duration::from_secs(10)).await.ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
}
