use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;

use crate::collector::LogCollector;
use crate::config::{CheckerConfig, DockerParams};
use crate::shell;
use crate::utils::scripts::{best_prepare_script, identity_tokens};
use crate::utils::shell::quote_arg;

const REMOVE_TIMEOUT: Duration = Duration::from_secs(60);
const BUILD_TIMEOUT: Duration = Duration::from_secs(60 * 15);
const START_TIMEOUT: Duration = Duration::from_secs(60);
const WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const LOGS_TIMEOUT: Duration = Duration::from_secs(60);

const GENERIC_PREPARE_SCRIPT: &str = "default.sh";

/// One container build target from the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerTarget {
    pub os_name: String,
    pub build_name: String,
    pub image: String,
    pub image_version: String,
    pub skip: bool,
    pub use_cache: bool,
}

impl DockerTarget {
    pub fn describe(&self) -> String {
        format!("{}_{}", self.os_name, self.image_version)
    }

    /// Cross-produce a platform against every configured image version.
    pub fn expand(
        params: &BTreeMap<&str, &DockerParams>,
        os_name: &str,
        build_name: &str,
        default_use_cache: bool,
    ) -> Vec<DockerTarget> {
        let Some(params) = params.get(os_name) else {
            return Vec::new();
        };

        params
            .versions
            .iter()
            .map(|version| DockerTarget {
                os_name: os_name.to_string(),
                build_name: build_name.to_string(),
                image: params.image.clone().unwrap_or_else(|| os_name.to_string()),
                image_version: version.clone(),
                skip: resolve_skip(params, version, build_name),
                use_cache: params.use_cache.unwrap_or(default_use_cache),
            })
            .collect()
    }

    /// The container-execution-environment special case: instead of
    /// cross-producing, extract the single image the feed's own commands
    /// pull or run. Avoids nesting a container backend inside a container.
    pub fn from_feed_commands(
        params: &BTreeMap<&str, &DockerParams>,
        os_name: &str,
        build_name: &str,
        commands: &[String],
        default_use_cache: bool,
    ) -> Vec<DockerTarget> {
        let Some(params) = params.get(os_name) else {
            return Vec::new();
        };
        let Ok(pattern) = Regex::new(r"(?i)docker (pull|run).* ([\w/]+)(:([\w.]+))?") else {
            return Vec::new();
        };

        for command in commands {
            if let Some(captures) = pattern.captures(command) {
                let image = captures.get(2).map_or("", |m| m.as_str()).to_string();
                let version = captures
                    .get(4)
                    .map_or("latest", |m| m.as_str())
                    .to_string();
                return vec![DockerTarget {
                    os_name: os_name.to_string(),
                    build_name: build_name.to_string(),
                    image,
                    skip: resolve_skip(params, &version, build_name),
                    image_version: version,
                    use_cache: params.use_cache.unwrap_or(default_use_cache),
                }];
            }
        }

        Vec::new()
    }
}

/// A build is skipped when its name is listed for the whole platform, or
/// when an image-version override lists one of its name suffixes.
fn resolve_skip(params: &DockerParams, image_version: &str, build_name: &str) -> bool {
    if params.skip.iter().any(|name| name == build_name) {
        return true;
    }
    params
        .skip_versions
        .get(image_version)
        .map(|suffixes| suffixes.iter().any(|suffix| build_name.ends_with(suffix)))
        .unwrap_or(false)
}

/// Drives one container target through the deploy lifecycle over the
/// `docker` CLI: remove stale state, build the image, run it to completion,
/// then best-effort remove again.
pub struct DockerBuilder<'a> {
    target: &'a DockerTarget,
    config: &'a CheckerConfig,
    logs: LogCollector,
}

impl<'a> DockerBuilder<'a> {
    pub fn new(target: &'a DockerTarget, config: &'a CheckerConfig, logs: &LogCollector) -> Self {
        Self {
            target,
            config,
            logs: logs.clone(),
        }
    }

    /// Force-remove any stale container with our name and prune leftovers.
    /// Not-found is success: a previous run may have crashed before cleanup.
    pub fn remove(&self) -> bool {
        let name = &self.config.container_name;
        let commands = [
            format!("docker rm -f {}", quote_arg(name)),
            "docker container prune -f".to_string(),
            "docker image prune -f".to_string(),
        ];
        let good_errors = ["No such container".to_string()];

        match shell::exec_commands(&commands, REMOVE_TIMEOUT, &good_errors, &self.logs) {
            Some(failure) => {
                self.logs
                    .log(format!("Impossible to remove container: {failure}"));
                false
            }
            None => {
                self.logs.log(format!("Container {name} removed."));
                true
            }
        }
    }

    /// The preparation script baked into the image: the most specific
    /// eligible candidate, or the generic fallback. Returned relative to
    /// the build context so the Dockerfile can COPY it.
    fn prepare_script_arg(&self) -> String {
        let prepare_dir = self.config.prepare_dir_path();
        let target_tokens = identity_tokens(&[
            self.target.os_name.as_str(),
            self.target.image_version.as_str(),
            self.target.build_name.as_str(),
        ]);
        let image_tokens = identity_tokens(&[
            self.target.image.as_str(),
            self.target.image_version.as_str(),
        ]);

        let script = best_prepare_script(&prepare_dir, &target_tokens, &image_tokens)
            .unwrap_or_else(|| prepare_dir.join(GENERIC_PREPARE_SCRIPT));

        script
            .strip_prefix(&self.config.scripts_dir_path)
            .map(|rel| rel.to_path_buf())
            .unwrap_or(script)
            .to_string_lossy()
            .into_owned()
    }

    pub fn build(&self) -> bool {
        let mut command = format!(
            "docker build {} -t {}",
            quote_arg(&self.config.scripts_dir_path),
            quote_arg(&self.config.container_name),
        );
        let build_args = [
            ("IMAGE", self.target.image.as_str()),
            ("VERSION", self.target.image_version.as_str()),
            ("OS_NAME", self.target.os_name.as_str()),
            ("BUILD_NAME", self.target.build_name.as_str()),
            (
                "PRODUCT_VERSION",
                crate::backend::product_version(&self.target.build_name),
            ),
        ];
        for (key, value) in build_args {
            command.push_str(&format!(" --build-arg {key}={}", quote_arg(value)));
        }
        command.push_str(&format!(
            " --build-arg PREPARE_SCRIPT={}",
            quote_arg(&self.prepare_script_arg())
        ));
        if !self.target.use_cache {
            command.push_str(" --no-cache");
        }

        let result = shell::exec_command(&command, BUILD_TIMEOUT, None, &self.logs);
        if result.timed_out {
            self.logs.log("Timeout of building container!");
            false
        } else if !result.success() {
            self.logs.log("Impossible to build container!");
            false
        } else {
            true
        }
    }

    pub fn run(&self) -> bool {
        let name = quote_arg(&self.config.container_name);
        let port = self.config.publish_port;
        let tests_dir = self.config.tests_dir_path();
        let tests_dir = std::fs::canonicalize(&tests_dir).unwrap_or(tests_dir);

        let start = shell::exec_command(
            &format!(
                "docker run -d --name {name} -p {port}:{port} -v {}:{} {name}",
                quote_arg(&tests_dir.to_string_lossy()),
                quote_arg(&self.config.container_results_dir),
            ),
            START_TIMEOUT,
            None,
            &self.logs,
        );
        if let Some(failure) = start.failure_output() {
            self.logs
                .log(format!("Impossible to run container: {failure}"));
            return false;
        }

        // `docker wait` prints the container's exit status; its own timeout
        // is the synthetic "never finished" signal, distinct from a non-zero
        // application exit.
        let wait = shell::exec_command(&format!("docker wait {name}"), WAIT_TIMEOUT, None, &self.logs);
        let result = if wait.timed_out {
            self.logs.log("Timeout of product script execution");
            false
        } else {
            match wait.output.split_whitespace().next() {
                Some(code) if code == "0" => true,
                Some(code) => {
                    self.logs.log(format!("Error code: {code}"));
                    false
                }
                None => {
                    self.logs.log("Impossible to read container exit status");
                    false
                }
            }
        };

        self.logs.log("Runtime logs:");
        shell::exec_command(&format!("docker logs {name}"), LOGS_TIMEOUT, None, &self.logs);

        result
    }

    pub fn deploy(&self) -> bool {
        let mut is_success = self.remove();
        if is_success {
            is_success = self.build();
        }
        if is_success {
            is_success = self.run();
        }
        self.remove();
        is_success
    }
}
