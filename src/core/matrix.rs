use std::collections::BTreeMap;
use std::path::Path;

use crate::backend::Backend;
use crate::config::CheckerConfig;
use crate::docker::DockerTarget;
use crate::error::{Error, Result};
use crate::virtualbox::VirtualBoxTarget;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const FEED_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// The shared default header every generated install script starts with.
const DEFAULT_INSTALL_SCRIPT: &str = "default.sh";

/// Instruction feed shape: `{platform: {platform_build: [commands]}}`.
pub type InstructionFeed = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// The assembled run plan: one backend-bound target per matrix entry, plus
/// every `(platform, build)` pair the feed named — including pairs no
/// configured backend covers, which gap-filling later surfaces as NO TEST.
#[derive(Debug)]
pub struct BuildMatrix {
    pub targets: Vec<Backend>,
    pub all_builds: Vec<(String, String)>,
}

/// Fetch the instruction feed. Bad auth and an unparsable body are fatal
/// configuration errors, not retryable conditions.
pub fn fetch_instructions(config: &CheckerConfig) -> Result<InstructionFeed> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(format!("shipcheck/{VERSION}"))
        .timeout(FEED_TIMEOUT)
        .build()
        .map_err(|e| Error::Feed(e.to_string()))?;

    let mut request = client.get(&config.commands_url);
    if let Some(user) = &config.commands_url_user {
        request = request.basic_auth(user, config.commands_url_pass.as_deref());
    }

    let response = request
        .send()
        .map_err(|e| Error::Feed(format!("Cannot fetch {}: {e}", config.commands_url)))?;

    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::config(format!(
            "Instruction feed rejected credentials: {}",
            config.commands_url
        )));
    }
    if !response.status().is_success() {
        return Err(Error::Feed(format!(
            "Instruction feed returned {} for {}",
            response.status(),
            config.commands_url
        )));
    }

    response
        .json::<InstructionFeed>()
        .map_err(|e| Error::config(format!("Unparsable instruction feed: {e}")))
}

/// Fetch the feed and assemble the full matrix, regenerating the install
/// scripts as a side effect.
pub fn assemble(config: &CheckerConfig) -> Result<BuildMatrix> {
    let feed = fetch_instructions(config)?;
    log_status!("matrix", "Fetched {} platforms from instruction feed", feed.len());
    assemble_from_feed(config, &feed)
}

/// Expand the feed against the configured backends.
///
/// Platforms whose name contains `docker` are the container-execution
/// environment: they contribute exactly one image extracted from their own
/// commands, and their commands are not templated into an install script.
/// Everything else cross-produces with every configured image version and
/// VM. Targets come back sorted by `(display key, build name)`.
pub fn assemble_from_feed(config: &CheckerConfig, feed: &InstructionFeed) -> Result<BuildMatrix> {
    let docker_params = config.docker_params();
    let virtual_box_params = config.virtual_box_params();

    let install_dir = config.install_dir_path();
    remove_stale_install_scripts(&install_dir)?;
    let default_script = std::fs::read_to_string(install_dir.join(DEFAULT_INSTALL_SCRIPT))
        .map_err(|e| {
            Error::config(format!(
                "Missing default install script in {}: {e}",
                install_dir.display()
            ))
        })?;

    let mut targets = Vec::new();
    let mut all_builds = Vec::new();

    for (os_name, builds) in feed {
        for (build_key, commands) in builds {
            // The feed prefixes build names with the platform
            // (ubuntu_manual_2.4); strip it back off.
            let build_name = strip_platform_prefix(build_key);

            all_builds.push((os_name.clone(), build_name.to_string()));

            let mut script_commands: &[String] = commands;
            if os_name.contains("docker") {
                targets.extend(
                    DockerTarget::from_feed_commands(
                        &docker_params,
                        os_name,
                        build_name,
                        commands,
                        config.default_use_cache,
                    )
                    .into_iter()
                    .map(Backend::Docker),
                );
                script_commands = &[];
            } else {
                targets.extend(
                    DockerTarget::expand(
                        &docker_params,
                        os_name,
                        build_name,
                        config.default_use_cache,
                    )
                    .into_iter()
                    .map(Backend::Docker),
                );
                targets.extend(
                    VirtualBoxTarget::expand(&virtual_box_params, os_name, build_name)
                        .into_iter()
                        .map(Backend::VirtualBox),
                );
            }

            write_install_script(
                &install_dir,
                os_name,
                build_name,
                &default_script,
                script_commands,
            )?;
        }
    }

    targets.sort_by_key(|target| target.sort_key());

    Ok(BuildMatrix {
        targets,
        all_builds,
    })
}

fn strip_platform_prefix(build_key: &str) -> &str {
    build_key
        .split_once('_')
        .map(|(_, rest)| rest)
        .unwrap_or("")
}

/// Generated scripts from a previous run are stale; the shared default
/// header never is.
fn remove_stale_install_scripts(install_dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(install_dir)? {
        let path = entry?.path();
        if path.is_file() && path.file_name() != Some(std::ffi::OsStr::new(DEFAULT_INSTALL_SCRIPT)) {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

fn write_install_script(
    install_dir: &Path,
    os_name: &str,
    build_name: &str,
    default_script: &str,
    commands: &[String],
) -> Result<()> {
    let path = install_dir.join(format!("{os_name}_{build_name}.sh"));
    let mut script = String::from(default_script);
    script.push_str(&commands.join("\n"));
    script.push('\n');
    std::fs::write(path, script)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_install_dir(dir: &Path, os_params_json: &str) -> CheckerConfig {
        let json = format!(
            r#"{{
                "commands_url": "https://feed.example/",
                "scripts_dir_path": "{}",
                "install_dir_name": "install",
                "os_params": {os_params_json}
            }}"#,
            dir.display()
        );
        let config: CheckerConfig = serde_json::from_str(&json).unwrap();
        std::fs::create_dir_all(config.install_dir_path()).unwrap();
        std::fs::write(
            config.install_dir_path().join(DEFAULT_INSTALL_SCRIPT),
            "#!/bin/sh\nset -e\n",
        )
        .unwrap();
        config
    }

    fn feed(entries: &[(&str, &str, &[&str])]) -> InstructionFeed {
        let mut feed = InstructionFeed::new();
        for (platform, build_key, commands) in entries {
            feed.entry(platform.to_string()).or_default().insert(
                build_key.to_string(),
                commands.iter().map(|c| c.to_string()).collect(),
            );
        }
        feed
    }

    #[test]
    fn expands_platforms_against_configured_backends() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_install_dir(
            dir.path(),
            r#"{
                "ubuntu": {
                    "docker": {"versions": ["20.04", "22.04"]},
                    "virtual_box": {"ubuntu_vm": {}}
                }
            }"#,
        );

        let feed = feed(&[(
            "ubuntu",
            "ubuntu_manual_2.4",
            &["apt-get install product"],
        )]);
        let matrix = assemble_from_feed(&config, &feed).unwrap();

        assert_eq!(matrix.targets.len(), 3);
        assert_eq!(
            matrix.all_builds,
            vec![("ubuntu".to_string(), "manual_2.4".to_string())]
        );

        let script = std::fs::read_to_string(
            config.install_dir_path().join("ubuntu_manual_2.4.sh"),
        )
        .unwrap();
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("apt-get install product"));
    }

    #[test]
    fn docker_platform_extracts_image_instead_of_cross_producing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_install_dir(
            dir.path(),
            r#"{
                "docker": {
                    "docker": {"versions": ["ignored"]},
                    "virtual_box": {"never_used": {}}
                }
            }"#,
        );

        let feed = feed(&[(
            "docker",
            "docker_latest",
            &["docker run registry/product:2.4"],
        )]);
        let matrix = assemble_from_feed(&config, &feed).unwrap();

        assert_eq!(matrix.targets.len(), 1);
        match &matrix.targets[0] {
            Backend::Docker(target) => {
                assert_eq!(target.image, "registry/product");
                assert_eq!(target.image_version, "2.4");
            }
            other => panic!("expected a docker target, got {other:?}"),
        }

        // The feed's own commands are not templated into the script.
        let script =
            std::fs::read_to_string(config.install_dir_path().join("docker_latest.sh")).unwrap();
        assert!(!script.contains("docker run"));
    }

    #[test]
    fn targets_are_sorted_by_display_key_and_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_install_dir(
            dir.path(),
            r#"{
                "ubuntu": {"docker": {"versions": ["22.04", "20.04"]}},
                "centos": {"docker": {"versions": ["7"]}}
            }"#,
        );

        let feed = feed(&[
            ("ubuntu", "ubuntu_manual_2.4", &[] as &[&str]),
            ("ubuntu", "ubuntu_nightly_2.5", &[]),
            ("centos", "centos_manual_2.4", &[]),
        ]);
        let matrix = assemble_from_feed(&config, &feed).unwrap();

        let keys: Vec<String> = matrix.targets.iter().map(|t| t.sort_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys[0], "centos_7_manual_2.4");
    }

    #[test]
    fn stale_generated_scripts_are_removed_and_default_kept() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_install_dir(dir.path(), r#"{"ubuntu": {}}"#);
        let stale = config.install_dir_path().join("gone_manual_1.0.sh");
        std::fs::write(&stale, "old").unwrap();

        let feed = feed(&[("ubuntu", "ubuntu_manual_2.4", &[] as &[&str])]);
        assemble_from_feed(&config, &feed).unwrap();

        assert!(!stale.exists());
        assert!(config
            .install_dir_path()
            .join(DEFAULT_INSTALL_SCRIPT)
            .exists());
    }

    #[test]
    fn missing_default_script_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_install_dir(dir.path(), r#"{"ubuntu": {}}"#);
        std::fs::remove_file(config.install_dir_path().join(DEFAULT_INSTALL_SCRIPT)).unwrap();

        let feed = feed(&[("ubuntu", "ubuntu_manual_2.4", &[] as &[&str])]);
        let err = assemble_from_feed(&config, &feed).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
