use std::{
    io::{Read, Write},
    process::{Command, ExitStatus, Stdio},
    sync::mpsc,
    time::{Duration, Instant},
};

use crate::PlatformError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
}

/// Runs an external tool, killing it once `timeout` elapses.
///
/// Leave `capture_stdout` off for tools that fork a background owner (e.g.
/// `xclip` writing a selection): the child inherits the pipe and reading it
/// would block until that owner exits.
pub fn run_tool(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    capture_stdout: bool,
    timeout: Duration,
) -> Result<ToolOutput, PlatformError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(if capture_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| {
        PlatformError::new(
            "E_TOOL_SPAWN",
            format!("failed to start {program}: {e}"),
        )
    })?;

    let reader = child.stdout.take().map(|mut out| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PlatformError::new(
                    "E_TOOL_STDIN",
                    format!("{program} stdin write failed: {e}"),
                ));
            }
        }
    }

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PlatformError::new(
                    "E_TOOL_TIMEOUT",
                    format!("{program} timed out after {}ms", timeout.as_millis()),
                ));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(PlatformError::new(
                    "E_TOOL_WAIT",
                    format!("{program} wait failed: {e}"),
                ))
            }
        }
    };

    let stdout = reader
        .and_then(|h| h.join().ok())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    Ok(ToolOutput { status, stdout })
}

/// Runs `f` on a helper thread and gives up after `timeout`.
///
/// A call that hangs keeps its thread; only the caller is released.
pub fn call_with_timeout<T, F>(name: &str, timeout: Duration, f: F) -> Result<T, PlatformError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name(format!("rephrase-{name}"))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| PlatformError::new("E_THREAD_SPAWN", format!("{name}: {e}")))?;
    rx.recv_timeout(timeout).map_err(|e| match e {
        mpsc::RecvTimeoutError::Timeout => PlatformError::new(
            "E_CALL_TIMEOUT",
            format!("{name} timed out after {}ms", timeout.as_millis()),
        ),
        mpsc::RecvTimeoutError::Disconnected => {
            PlatformError::new("E_CALL_PANICKED", format!("{name} worker exited without a result"))
        }
    })
}
