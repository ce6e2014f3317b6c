use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::LogCollector;
use crate::error::{Error, Result};
use crate::poll::wait_until;
use crate::shell::{self, is_good_error, CommandOutput};
use crate::utils::shell::quote_path;

/// Connection attempts are expensive, so reachability polling uses a period
/// well above the default.
const REACHABILITY_PERIOD: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
}

/// One authenticated SSH session per backend instance, multiplexed over an
/// OpenSSH control master. Commands and file transfers ride the same master
/// connection; `connect` is lazy and idempotent, and a reconnect request
/// tears the master down first (the backend may have power-cycled the
/// target). The master is closed on every exit path via `Drop`.
pub struct SshSession {
    credentials: Credentials,
    control_path: PathBuf,
    connected: bool,
}

impl SshSession {
    pub fn new(credentials: Credentials) -> Self {
        let control_path = std::env::temp_dir().join(format!(
            "shipcheck-{}-{}-{}.ctl",
            std::process::id(),
            credentials.host,
            credentials.port
        ));
        Self {
            credentials,
            control_path,
            connected: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.credentials.host
    }

    fn target(&self) -> String {
        format!("{}@{}", self.credentials.user, self.credentials.host)
    }

    fn base_options(&self, connect_timeout: Duration) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];

        if let Some(identity_file) = &self.credentials.identity_file {
            opts.push("-i".to_string());
            opts.push(shellexpand::tilde(identity_file).to_string());
        }

        if self.credentials.port != 22 {
            opts.push("-p".to_string());
            opts.push(self.credentials.port.to_string());
        }

        opts
    }

    /// Shell invocation for one remote command over the established master.
    /// A pty (`-tt`) folds remote stderr into the captured stream, which is
    /// what command execution wants; transfers pass `pty = false` to keep
    /// the byte stream clean.
    fn remote_invocation(&self, remote_command: &str, pty: bool) -> String {
        let mut parts = vec!["ssh".to_string()];
        if pty {
            parts.push("-tt".to_string());
        }
        parts.extend(self.base_options(CONNECT_ATTEMPT_TIMEOUT));
        parts.push(self.target());
        parts.push(quote_path(remote_command));
        parts.join(" ")
    }

    /// Establish the control master. A second call is a no-op while a live
    /// master exists, unless `reconnect` asks for a teardown first.
    pub fn connect(&mut self, timeout: Duration, reconnect: bool, logs: &LogCollector) -> Result<()> {
        if self.connected {
            if !reconnect {
                return Ok(());
            }
            self.disconnect(logs);
        }

        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.base_options(timeout));
        parts.extend([
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            "ControlPersist=600".to_string(),
        ]);
        parts.push(self.target());
        parts.push("true".to_string());

        let result = shell::exec_command(&parts.join(" "), timeout, None, logs);
        if result.success() {
            self.connected = true;
            Ok(())
        } else {
            Err(Error::ssh(format!(
                "Impossible to connect to {}: {}",
                self.target(),
                result.failure_output().unwrap_or_default().trim()
            )))
        }
    }

    /// Poll `connect` until the host accepts the session or `timeout`
    /// elapses. Expected connection refusals while the host boots are kept
    /// out of the per-target log by a scoped suppression guard; only the
    /// final verdict is recorded.
    pub fn wait_reachable(
        &mut self,
        timeout: Duration,
        reconnect: bool,
        logs: &LogCollector,
    ) -> bool {
        let connected = {
            let _quiet = logs.suppress();
            let mut first_attempt = true;
            wait_until(
                || {
                    let teardown = reconnect && std::mem::take(&mut first_attempt);
                    self.connect(CONNECT_ATTEMPT_TIMEOUT.min(timeout), teardown, logs)
                        .map(|_| true)
                },
                &true,
                timeout,
                REACHABILITY_PERIOD,
                "Impossible to connect to virtual machine",
                logs,
            )
        };

        if connected {
            logs.log(format!("SSH session to {} established.", self.target()));
        } else {
            logs.log("Impossible to connect to virtual machine: timeout");
        }
        connected
    }

    fn exec_remote(
        &mut self,
        command: &str,
        pty: bool,
        timeout: Duration,
        input: Option<&[u8]>,
        logs: &LogCollector,
    ) -> Result<CommandOutput> {
        self.connect(CONNECT_ATTEMPT_TIMEOUT, false, logs)?;
        let invocation = self.remote_invocation(command, pty);
        Ok(shell::exec_command(&invocation, timeout, input, logs))
    }

    /// Execute one command on the remote host. `None` means success; `Some`
    /// carries the failure output (timeouts included, with their marker).
    /// The executor's timeout bounds the exit-status wait, and buffered
    /// output is drained even when that wait expires.
    pub fn run_command(
        &mut self,
        command: &str,
        timeout: Duration,
        input: Option<&[u8]>,
        logs: &LogCollector,
    ) -> Option<String> {
        match self.exec_remote(command, true, timeout, input, logs) {
            Ok(result) => result.failure_output(),
            Err(e) => {
                logs.log(e.to_string());
                Some(e.to_string())
            }
        }
    }

    /// Execute commands in order. The first failure whose output does not
    /// case-insensitively contain a `good_errors` substring short-circuits
    /// the sequence and is returned; commands after it never run.
    pub fn run_commands(
        &mut self,
        commands: &[String],
        timeout: Duration,
        good_errors: &[String],
        logs: &LogCollector,
    ) -> Option<String> {
        for command in commands {
            if let Some(failure) = self.run_command(command, timeout, None, logs) {
                if !is_good_error(&failure, good_errors) {
                    return Some(failure);
                }
            }
        }
        None
    }

    /// Upload a local file by piping it into `cat` on the remote side.
    pub fn put(
        &mut self,
        local: &Path,
        remote: &str,
        timeout: Duration,
        logs: &LogCollector,
    ) -> Result<()> {
        let data = std::fs::read(local)?;
        let result = self.exec_remote(
            &format!("cat > {}", quote_path(remote)),
            false,
            timeout,
            Some(&data),
            logs,
        )?;
        match result.failure_output() {
            None => Ok(()),
            Some(failure) => Err(Error::ssh(format!(
                "Impossible to upload {} to {remote}: {failure}",
                local.display()
            ))),
        }
    }

    /// Upload a script and mark it executable.
    pub fn put_executable(
        &mut self,
        local: &Path,
        remote: &str,
        timeout: Duration,
        logs: &LogCollector,
    ) -> Result<()> {
        self.put(local, remote, timeout, logs)?;
        let result = self.exec_remote(
            &format!("chmod 755 {}", quote_path(remote)),
            false,
            timeout,
            None,
            logs,
        )?;
        match result.failure_output() {
            None => Ok(()),
            Some(failure) => Err(Error::ssh(format!(
                "Impossible to chmod {remote}: {failure}"
            ))),
        }
    }

    /// Download a remote file. Remote stdout is redirected straight into the
    /// local file so the transfer never passes through the text capture.
    pub fn get(
        &mut self,
        remote: &str,
        local: &Path,
        timeout: Duration,
        logs: &LogCollector,
    ) -> Result<()> {
        self.connect(CONNECT_ATTEMPT_TIMEOUT, false, logs)?;
        let invocation = format!(
            "{} > {}",
            self.remote_invocation(&format!("cat {}", quote_path(remote)), false),
            quote_path(&local.display().to_string())
        );
        let result = shell::exec_command(&invocation, timeout, None, logs);
        match result.failure_output() {
            None => Ok(()),
            Some(failure) => Err(Error::ssh(format!(
                "Impossible to download {remote}: {failure}"
            ))),
        }
    }

    /// Close the control master. Safe to call repeatedly.
    pub fn disconnect(&mut self, logs: &LogCollector) {
        if self.connected || self.control_path.exists() {
            let mut parts = vec!["ssh".to_string()];
            parts.extend(self.base_options(DISCONNECT_TIMEOUT));
            parts.extend(["-O".to_string(), "exit".to_string()]);
            parts.push(self.target());

            let _quiet = logs.suppress();
            shell::exec_command(&parts.join(" "), DISCONNECT_TIMEOUT, None, logs);
        }
        self.connected = false;
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.disconnect(&LogCollector::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SshSession {
        SshSession::new(Credentials {
            host: "build-vm".to_string(),
            user: "checker".to_string(),
            port: 10022,
            identity_file: Some("/tmp/checker_key".to_string()),
        })
    }

    #[test]
    fn remote_invocation_includes_identity_port_and_control_path() {
        let session = session();
        let invocation = session.remote_invocation("uname -a", true);
        assert!(invocation.starts_with("ssh -tt"));
        assert!(invocation.contains("-i /tmp/checker_key"));
        assert!(invocation.contains("-p 10022"));
        assert!(invocation.contains("ControlPath="));
        assert!(invocation.contains("checker@build-vm"));
        assert!(invocation.ends_with("'uname -a'"));
    }

    #[test]
    fn transfers_do_not_request_a_pty() {
        let session = session();
        let invocation = session.remote_invocation("cat > '/opt/x'", false);
        assert!(!invocation.contains("-tt"));
    }

    #[test]
    fn default_port_is_omitted() {
        let session = SshSession::new(Credentials {
            host: "h".to_string(),
            user: "u".to_string(),
            port: 22,
            identity_file: None,
        });
        let invocation = session.remote_invocation("true", false);
        assert!(!invocation.contains("-p "));
        assert!(!invocation.contains("-i "));
    }

    #[test]
    fn unreachable_host_reports_failure_output() {
        let logs = LogCollector::new();
        let mut session = SshSession::new(Credentials {
            host: "256.256.256.256".to_string(),
            user: "nobody".to_string(),
            port: 22,
            identity_file: None,
        });
        let failure = session.run_command("true", Duration::from_secs(10), None, &logs);
        assert!(failure.is_some());
    }
}
