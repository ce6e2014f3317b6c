use std::collections::BTreeMap;
use std::time::Duration;

use crate::collector::LogCollector;
use crate::config::{CheckerConfig, VmParams};
use crate::poll::wait_until;
use crate::shell;
use crate::ssh::{Credentials, SshSession};
use crate::utils::shell::quote_path;

const RESTORE_TIMEOUT: Duration = Duration::from_secs(60);
const START_TIMEOUT: Duration = Duration::from_secs(60 * 5);
const PREPARE_TIMEOUT: Duration = Duration::from_secs(60 * 5);
const RUN_TIMEOUT: Duration = Duration::from_secs(60 * 5);
const POWEROFF_TIMEOUT: Duration = Duration::from_secs(60);
const POWEROFF_PERIOD: Duration = Duration::from_secs(1);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(120);

/// One virtual-machine build target from the matrix.
#[derive(Debug, Clone)]
pub struct VirtualBoxTarget {
    pub os_name: String,
    pub build_name: String,
    pub vm_name: String,
    pub credentials: Credentials,
    pub remote_dir: String,
    pub skip_prepare: bool,
    pub prepare_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
    pub skip: bool,
}

impl VirtualBoxTarget {
    pub fn describe(&self) -> String {
        self.vm_name.clone()
    }

    /// One target per configured VM for the platform.
    pub fn expand(
        params: &BTreeMap<&str, &BTreeMap<String, VmParams>>,
        os_name: &str,
        build_name: &str,
    ) -> Vec<VirtualBoxTarget> {
        let Some(vms) = params.get(os_name) else {
            return Vec::new();
        };

        vms.iter()
            .map(|(vm_name, vm)| VirtualBoxTarget {
                os_name: os_name.to_string(),
                build_name: build_name.to_string(),
                vm_name: vm_name.clone(),
                credentials: Credentials {
                    host: vm.host.clone(),
                    user: vm.user.clone(),
                    port: vm.port,
                    identity_file: vm.identity_file.clone(),
                },
                remote_dir: vm.remote_dir.clone(),
                skip_prepare: vm.skip_prepare,
                prepare_timeout: vm.prepare_timeout.map(Duration::from_secs),
                run_timeout: vm.run_timeout.map(Duration::from_secs),
                skip: vm.skip.iter().any(|name| name == build_name),
            })
            .collect()
    }
}

/// Drives one VM target through the deploy lifecycle over `VBoxManage` and
/// an SSH session: restore the snapshot, start headless, optionally prepare
/// the OS once, run the install and smoke scripts, pull the artifact back.
pub struct VirtualBoxBuilder<'a> {
    target: &'a VirtualBoxTarget,
    config: &'a CheckerConfig,
    session: SshSession,
    logs: LogCollector,
}

impl<'a> VirtualBoxBuilder<'a> {
    pub fn new(target: &'a VirtualBoxTarget, config: &'a CheckerConfig, logs: &LogCollector) -> Self {
        Self {
            target,
            config,
            session: SshSession::new(target.credentials.clone()),
            logs: logs.clone(),
        }
    }

    /// Power the VM off and roll back to the current snapshot. Both "not
    /// currently running" and "does not have any snapshots" are benign: the
    /// machine may already be off, or never snapshotted yet.
    pub fn restore(&self) -> bool {
        let vm_name = &self.target.vm_name;
        let commands = [
            format!("VBoxManage controlvm {vm_name} poweroff"),
            "sleep 3".to_string(),
            format!("VBoxManage snapshot {vm_name} restorecurrent"),
        ];
        let good_errors = [
            "not currently running".to_string(),
            "does not have any snapshots".to_string(),
        ];

        match shell::exec_commands(&commands, RESTORE_TIMEOUT, &good_errors, &self.logs) {
            Some(failure) => {
                self.logs
                    .log(format!("Impossible to restore virtual machine: {failure}"));
                false
            }
            None => true,
        }
    }

    /// Ensure a `base` snapshot exists, boot headless, and wait for SSH.
    /// The reconnect is required: the previous lifecycle step may have
    /// power-cycled the machine under an established master.
    pub fn start(&mut self) -> bool {
        let vm_name = &self.target.vm_name;
        let commands = [
            format!(
                "VBoxManage snapshot {vm_name} showvminfo base || VBoxManage snapshot {vm_name} take base"
            ),
            format!("VBoxManage startvm --type headless {vm_name}"),
        ];

        if let Some(failure) = shell::exec_commands(&commands, START_TIMEOUT, &[], &self.logs) {
            self.logs
                .log(format!("Impossible to start virtual machine: {failure}"));
            return false;
        }

        self.session.wait_reachable(START_TIMEOUT, true, &self.logs)
    }

    /// One-time OS preparation: run the platform prepare script, which ends
    /// by shutting the machine down, then replace the `base` snapshot with
    /// the prepared state and boot again.
    pub fn prepare(&mut self) -> bool {
        if self.target.skip_prepare {
            return true;
        }
        let timeout = self.target.prepare_timeout.unwrap_or(PREPARE_TIMEOUT);

        let vm_name = self.target.vm_name.clone();
        let remote_dir = self.target.remote_dir.clone();
        let prepare_script = self
            .config
            .prepare_dir_path()
            .join(format!("{}.sh", self.target.os_name));

        if let Some(failure) =
            self.session
                .run_commands(&[format!("mkdir -p {}", quote_path(&remote_dir))], timeout, &[], &self.logs)
        {
            self.logs
                .log(format!("Impossible to prepare virtual machine: {failure}"));
            return false;
        }

        let remote_prepare = format!("{remote_dir}/prepare.sh");
        if let Err(e) = self
            .session
            .put_executable(&prepare_script, &remote_prepare, timeout, &self.logs)
        {
            self.logs
                .log(format!("Impossible to prepare virtual machine: {e}"));
            return false;
        }

        // The script is expected to end in a shutdown, which kills the SSH
        // channel; that failure text is benign.
        if let Some(failure) = self.session.run_commands(
            &[remote_prepare],
            timeout,
            &["shutdown".to_string()],
            &self.logs,
        ) {
            self.logs
                .log(format!("Impossible to prepare virtual machine: {failure}"));
            return false;
        }

        let powered_off = {
            let logs = self.logs.clone();
            wait_until(
                || {
                    Ok(shell::exec_command(
                        &format!("VBoxManage showvminfo {vm_name} | grep \"powered off\""),
                        POWEROFF_TIMEOUT,
                        None,
                        &logs,
                    )
                    .success())
                },
                &true,
                POWEROFF_TIMEOUT,
                POWEROFF_PERIOD,
                &format!("Impossible to shutdown {vm_name}"),
                &self.logs,
            )
        };
        if !powered_off {
            return false;
        }

        let commands = [
            "sleep 3".to_string(),
            format!("VBoxManage snapshot {vm_name} delete base"),
            "sleep 3".to_string(),
        ];
        if let Some(failure) = shell::exec_commands(&commands, SNAPSHOT_TIMEOUT, &[], &self.logs) {
            self.logs
                .log(format!("Impossible to prepare virtual machine: {failure}"));
            return false;
        }

        self.start()
    }

    /// Push the install and smoke scripts, run them in order, and pull the
    /// result artifact back into the local tests directory.
    pub fn run(&mut self) -> bool {
        let timeout = self.target.run_timeout.unwrap_or(RUN_TIMEOUT);

        let remote_dir = self.target.remote_dir.clone();
        let remote_results_dir = format!("{remote_dir}/results");
        let results_file = format!("{}_{}.json", self.target.vm_name, self.target.build_name);
        let remote_results_file = format!("{remote_results_dir}/{results_file}");

        if let Some(failure) = self.session.run_commands(
            &[format!("mkdir -p {}", quote_path(&remote_results_dir))],
            timeout,
            &[],
            &self.logs,
        ) {
            self.logs.log(format!(
                "Impossible to run product check on virtual machine: {failure}"
            ));
            return false;
        }

        let install_script = self.config.install_dir_path().join(format!(
            "{}_{}.sh",
            self.target.os_name, self.target.build_name
        ));
        let uploads = [
            (install_script, format!("{remote_dir}/install.sh")),
            (
                self.config.smoke_script_path(),
                format!("{remote_dir}/{}", self.config.smoke_script_name),
            ),
        ];
        for (local, remote) in &uploads {
            if let Err(e) = self.session.put_executable(local, remote, timeout, &self.logs) {
                self.logs.log(format!(
                    "Impossible to run product check on virtual machine: {e}"
                ));
                return false;
            }
        }

        let commands = [
            format!("{remote_dir}/install.sh"),
            format!(
                "cd {} && export RESULTS_FILE={} && export PRODUCT_VERSION={} && ./{}",
                quote_path(&remote_dir),
                quote_path(&remote_results_file),
                crate::utils::shell::quote_arg(crate::backend::product_version(
                    &self.target.build_name
                )),
                self.config.smoke_script_name,
            ),
        ];
        if let Some(failure) = self.session.run_commands(&commands, timeout, &[], &self.logs) {
            self.logs.log(format!(
                "Impossible to run product check on virtual machine: {failure}"
            ));
            return false;
        }

        let local_results = self.config.tests_dir_path().join(&results_file);
        if let Err(e) = self
            .session
            .get(&remote_results_file, &local_results, timeout, &self.logs)
        {
            self.logs.log(format!(
                "Impossible to run product check on virtual machine: {e}"
            ));
            return false;
        }

        true
    }

    pub fn deploy(&mut self) -> bool {
        let mut is_success = self.restore();
        if is_success {
            is_success = self.start();
        }
        if is_success {
            is_success = self.prepare();
        }
        if is_success {
            is_success = self.run();
        }
        self.restore();
        is_success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_params(skip: &[&str]) -> VmParams {
        VmParams {
            user: "checker".to_string(),
            host: "127.0.0.1".to_string(),
            port: 10022,
            identity_file: None,
            remote_dir: "/opt/product".to_string(),
            skip_prepare: true,
            prepare_timeout: Some(30),
            run_timeout: None,
            skip: skip.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn expand_yields_one_target_per_vm() {
        let mut vms = BTreeMap::new();
        vms.insert("freebsd_13".to_string(), vm_params(&[]));
        vms.insert("freebsd_14".to_string(), vm_params(&["nightly_2.5"]));
        let mut config = BTreeMap::new();
        config.insert("freebsd", &vms);

        let targets = VirtualBoxTarget::expand(&config, "freebsd", "nightly_2.5");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].vm_name, "freebsd_13");
        assert_eq!(targets[0].describe(), "freebsd_13");
        assert!(!targets[0].skip);
        assert!(targets[1].skip);
        assert_eq!(targets[0].prepare_timeout, Some(Duration::from_secs(30)));
        assert_eq!(targets[0].run_timeout, None);
        assert_eq!(targets[0].credentials.user, "checker");
    }

    #[test]
    fn expand_unknown_platform_is_empty() {
        let config = BTreeMap::new();
        assert!(VirtualBoxTarget::expand(&config, "freebsd", "manual_2.4").is_empty());
    }
}
