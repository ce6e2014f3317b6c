use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::collector::LogCollector;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of one command execution.
///
/// A non-zero exit is a normal result, not an error; a timeout is a third,
/// distinct state so callers can tell "ran and failed" from "never
/// finished".
#[derive(Debug)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// `None` on success; otherwise the text a caller should treat as the
    /// failure description. Timeouts carry an explicit marker so downstream
    /// classification can tell them apart from application failures.
    pub fn failure_output(&self) -> Option<String> {
        if self.success() {
            return None;
        }
        if self.timed_out {
            let trimmed = self.output.trim_end();
            if trimmed.is_empty() {
                Some("Execution timed out".to_string())
            } else {
                Some(format!("{trimmed}\nExecution timed out"))
            }
        } else {
            Some(self.output.clone())
        }
    }
}

/// Known-benign failure matching: case-insensitive substring search over the
/// failure text. Good errors never abort a command sequence.
pub fn is_good_error(failure: &str, good_errors: &[String]) -> bool {
    let failure = failure.to_lowercase();
    good_errors
        .iter()
        .any(|good| failure.contains(&good.to_lowercase()))
}

/// Run `command` through `sh -c`, bounded by `timeout`.
///
/// Output is the combined stdout/stderr text. On timeout the child is
/// killed and whatever the readers had already buffered is still returned.
/// Every invocation is mirrored to `logs` as a command/response pair.
pub fn exec_command(
    command: &str,
    timeout: Duration,
    input: Option<&[u8]>,
    logs: &LogCollector,
) -> CommandOutput {
    logs.log_command(command);

    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let result = CommandOutput {
                output: format!("Command error: {e}"),
                exit_code: -1,
                timed_out: false,
            };
            logs.log_output(&format!("Logs:\n{}\nExit code: {}", result.output, -1));
            return result;
        }
    };

    if let Some(data) = input {
        if let Some(mut stdin) = child.stdin.take() {
            let data = data.to_vec();
            // Writer runs on its own thread so a full pipe can't deadlock
            // against the readers below.
            std::thread::spawn(move || {
                let _ = stdin.write_all(&data);
            });
        }
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = spawn_reader(stdout);
    let stderr_reader = spawn_reader(stderr);

    let (exit_code, timed_out) = wait_with_deadline(&mut child, timeout);

    let stdout_text = stdout_reader.join().unwrap_or_default();
    let stderr_text = stderr_reader.join().unwrap_or_default();
    let output = format!("{stdout_text}\n{stderr_text}");

    if timed_out {
        logs.log_output(&format!(
            "Logs:\n{output}\nExecution timed out after {}s",
            timeout.as_secs()
        ));
    } else {
        logs.log_output(&format!("Logs:\n{output}\nExit code: {exit_code}"));
    }

    CommandOutput {
        output,
        exit_code,
        timed_out,
    }
}

/// Run commands in order, short-circuiting at the first failure whose output
/// is not covered by `good_errors`. Returns that failure output; commands
/// after the failing one are never run.
pub fn exec_commands(
    commands: &[String],
    timeout: Duration,
    good_errors: &[String],
    logs: &LogCollector,
) -> Option<String> {
    for command in commands {
        let result = exec_command(command, timeout, None, logs);
        if let Some(failure) = result.failure_output() {
            if !is_good_error(&failure, good_errors) {
                return Some(failure);
            }
        }
    }
    None
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> (i32, bool) {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return (status.code().unwrap_or(-1), false),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return (-1, true);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return (-1, false);
            }
        }
    }
}
