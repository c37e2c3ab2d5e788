//! External command invocation primitives.
//!
//! Three entry points with distinct wait/output contracts:
//! - [`run`]: fire-and-wait, exit code only
//! - [`capture`]: wait with timeout, return stdout or nothing
//! - [`shell`]: wait with timeout, stream stdout/stderr to the log
//!
//! Every invocation is timeout-bounded; an expired timeout force-kills
//! the child so a wedged command can never block the orchestrator.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Exit code reported when a child could not be started or its exit
/// status could not be read back.
pub const EXIT_HOST_FAILURE: i32 = -1;

/// Exit code reported by [`shell`] when the child could not be started.
pub const EXIT_SHELL_FAILURE: i32 = -2;

fn command(cmd: &str, args: &[&str], dir: Option<&Path>) -> Command {
    let mut c = Command::new(cmd);
    c.args(args);
    if let Some(dir) = dir {
        c.current_dir(dir);
    }
    c
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("failed to kill timed-out child: {e}");
    }
}

/// Start a process and wait for its exit code.
///
/// - `wait_ms == 0`: return 0 immediately after spawning (fire-and-forget).
/// - `wait_ms < 0`: wait indefinitely.
/// - `wait_ms > 0`: wait up to `wait_ms`, force-kill on timeout.
///
/// Returns [`EXIT_HOST_FAILURE`] when the process cannot be started or
/// its status cannot be determined.
pub async fn run(cmd: &str, args: &[&str], dir: Option<&Path>, wait_ms: i64) -> i32 {
    debug!("run {cmd} {}", args.join(" "));

    let mut child = match command(cmd, args, dir).spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("{cmd}: {e}");
            return EXIT_HOST_FAILURE;
        }
    };

    if wait_ms == 0 {
        return 0;
    }

    let status = if wait_ms < 0 {
        child.wait().await
    } else {
        match tokio::time::timeout(Duration::from_millis(wait_ms as u64), child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!("{cmd} timed out after {wait_ms}ms, killing");
                kill(&mut child).await;
                child.wait().await
            }
        }
    };

    match status {
        Ok(s) => s.code().unwrap_or(EXIT_HOST_FAILURE),
        Err(e) => {
            warn!("{cmd}: {e}");
            EXIT_HOST_FAILURE
        }
    }
}

/// Start a process with stdout redirected and return the captured text.
///
/// Returns `None` when the process cannot be started or does not exit
/// within `timeout_ms` (the child is force-killed in that case). The
/// captured stdout is returned even for a non-zero exit.
pub async fn capture(cmd: &str, args: &[&str], dir: Option<&Path>, timeout_ms: u64) -> Option<String> {
    debug!("capture {cmd} {}", args.join(" "));

    let child = command(cmd, args, dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            warn!("{cmd}: {e}");
            return None;
        }
    };

    // Drain stdout concurrently so the child cannot block on a full pipe.
    let reader = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf).await;
            buf
        })
    });

    match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
        Ok(Ok(_status)) => match reader {
            Some(handle) => handle
                .await
                .ok()
                .map(|buf| String::from_utf8_lossy(&buf).to_string()),
            None => Some(String::new()),
        },
        Ok(Err(e)) => {
            warn!("{cmd}: {e}");
            None
        }
        Err(_) => {
            warn!("{cmd} timed out after {timeout_ms}ms, killing");
            kill(&mut child).await;
            None
        }
    }
}

/// Start a process with stdout and stderr streamed line-by-line to the
/// log as they arrive, and return the exit code.
///
/// Force-kills on timeout. Returns [`EXIT_SHELL_FAILURE`] when the
/// process cannot be started.
pub async fn shell(cmd: &str, args: &[&str], dir: Option<&Path>, timeout_ms: u64) -> i32 {
    debug!("shell {cmd} {}", args.join(" "));

    let child = command(cmd, args, dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            warn!("{cmd}: {e}");
            return EXIT_SHELL_FAILURE;
        }
    };

    let tag = cmd.to_string();
    if let Some(stdout) = child.stdout.take() {
        let tag = tag.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!("[{tag}] {line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!("[{tag}] {line}");
            }
        });
    }

    let status = match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("{cmd} timed out after {timeout_ms}ms, killing");
            kill(&mut child).await;
            child.wait().await
        }
    };

    match status {
        Ok(s) => s.code().unwrap_or(EXIT_HOST_FAILURE),
        Err(e) => {
            warn!("{cmd}: {e}");
            EXIT_HOST_FAILURE
        }
    }
}
