use std::io::Read;
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::app::error::AppError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Prefixes `-t <key>` when the command is bound to one target.
pub fn hdc_args(target: Option<&str>, args: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + 2);
    if let Some(key) = target.map(str::trim).filter(|key| !key.is_empty()) {
        out.push("-t".to_string());
        out.push(key.to_string());
    }
    out.extend(args.iter().map(|arg| arg.to_string()));
    out
}

pub fn run_hdc(
    program: &str,
    target: Option<&str>,
    args: &[&str],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let args = hdc_args(target, args);
    debug!(trace_id = %trace_id, program = %program, args = ?args, "running hdc");
    run_command_with_timeout(program, &args, timeout, trace_id)
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

fn join_lossy(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).to_string()
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::dependency(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Pipes are drained on their own threads while the child runs.
    let stdout: ChildStdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr: ChildStderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::dependency(
                        format!("{program} timed out after {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll {program}: {err}"),
                    trace_id,
                ));
            }
        }
    };

    Ok(CommandOutput {
        stdout: join_lossy(stdout_handle),
        stderr: join_lossy(stderr_handle),
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdc_args_prefixes_target() {
        assert_eq!(
            hdc_args(Some("FMR0223C13000649"), &["shell", "uname -a"]),
            vec!["-t", "FMR0223C13000649", "shell", "uname -a"]
        );
        assert_eq!(hdc_args(Some("  "), &["list", "targets"]), vec!["list", "targets"]);
        assert_eq!(hdc_args(None, &["kill"]), vec!["kill"]);
    }

    #[test]
    fn missing_program_is_a_dependency_error() {
        let err = run_command_with_timeout(
            "/this/path/should/not/exist/hdc",
            &[],
            Duration::from_secs(1),
            "trace-missing",
        )
        .expect_err("spawn should fail");
        assert_eq!(err.code, "ERR_DEPENDENCY");
        assert_eq!(err.trace_id, "trace-missing");
    }

    #[cfg(unix)]
    #[test]
    fn large_output_does_not_deadlock() {
        let args = vec![
            "-c".to_string(),
            "i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done".to_string(),
        ];
        let output = run_command_with_timeout("sh", &args, Duration::from_secs(20), "trace-large")
            .expect("large-output command should finish");
        assert!(output.success());
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = run_command_with_timeout("sh", &args, Duration::from_millis(200), "trace-slow")
            .expect_err("should time out");
        assert!(err.error.contains("timed out"));
    }
}
