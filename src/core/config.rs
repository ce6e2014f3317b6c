use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Checker configuration, loaded from a single JSON file.
///
/// Everything except `commands_url` and `os_params` has a default, so a
/// minimal config names the instruction feed and the platforms to check.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    /// Instruction feed endpoint returning `{platform: {build: [commands]}}`.
    pub commands_url: String,
    #[serde(default)]
    pub commands_url_user: Option<String>,
    #[serde(default)]
    pub commands_url_pass: Option<String>,

    #[serde(default = "default_scripts_dir_path")]
    pub scripts_dir_path: String,
    #[serde(default = "default_prepare_dir_name")]
    pub prepare_dir_name: String,
    #[serde(default = "default_install_dir_name")]
    pub install_dir_name: String,
    #[serde(default = "default_local_dir_path")]
    pub local_dir_path: String,
    #[serde(default = "default_remote_dir_path")]
    pub remote_dir_path: String,
    #[serde(default = "default_archive_dir_path")]
    pub archive_dir_path: String,
    /// Scratch directory for unpacking remote archives during sync.
    #[serde(default = "default_temp_dir_path")]
    pub temp_dir_path: String,
    #[serde(default = "default_logs_dir_name")]
    pub logs_dir_name: String,
    #[serde(default = "default_tests_dir_name")]
    pub tests_dir_name: String,
    #[serde(default = "default_results_file_name")]
    pub results_file_name: String,

    /// Product smoke script, pushed to each VM; writes the result artifact
    /// (RESULTS_FILE / PRODUCT_VERSION contract).
    #[serde(default = "default_smoke_script_name")]
    pub smoke_script_name: String,

    /// Name under which containers are built and run.
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Port published from the container to the host.
    #[serde(default = "default_publish_port")]
    pub publish_port: u16,
    /// Directory inside the container where the results bind mount lands.
    #[serde(default = "default_container_results_dir")]
    pub container_results_dir: String,

    #[serde(default)]
    pub default_use_cache: bool,

    /// Per-platform backend parameters. At least one platform is required.
    pub os_params: BTreeMap<String, OsParams>,

    #[serde(default)]
    pub send_to_remote: Option<SyncRemote>,
    #[serde(default)]
    pub use_remote_results: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsParams {
    #[serde(default)]
    pub docker: Option<DockerParams>,
    #[serde(default)]
    pub virtual_box: Option<BTreeMap<String, VmParams>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerParams {
    /// Base image; the platform name is used when omitted.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_image_versions")]
    pub versions: Vec<String>,
    /// Build names never attempted on this platform.
    #[serde(default)]
    pub skip: Vec<String>,
    /// Image-version-specific overrides: build-name suffixes to skip.
    #[serde(default)]
    pub skip_versions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub use_cache: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmParams {
    #[serde(default = "default_vm_user")]
    pub user: String,
    #[serde(default = "default_vm_host")]
    pub host: String,
    #[serde(default = "default_vm_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default = "default_vm_remote_dir")]
    pub remote_dir: String,
    #[serde(default)]
    pub skip_prepare: bool,
    /// Seconds; overrides the built-in prepare timeout.
    #[serde(default)]
    pub prepare_timeout: Option<u64>,
    /// Seconds; overrides the built-in run timeout.
    #[serde(default)]
    pub run_timeout: Option<u64>,
    #[serde(default)]
    pub skip: Vec<String>,
}

/// Destination for the results-archive push, plus the archive name other
/// checker instances will see.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRemote {
    pub host: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<String>,
    pub archive: String,
    #[serde(default = "default_sync_remote_dir")]
    pub remote_dir: String,
}

fn default_scripts_dir_path() -> String {
    "./scripts".to_string()
}

fn default_prepare_dir_name() -> String {
    "prepare".to_string()
}

fn default_install_dir_name() -> String {
    "install".to_string()
}

fn default_local_dir_path() -> String {
    "./local".to_string()
}

fn default_remote_dir_path() -> String {
    "./remote".to_string()
}

fn default_archive_dir_path() -> String {
    "./archive".to_string()
}

fn default_temp_dir_path() -> String {
    "./temp".to_string()
}

fn default_logs_dir_name() -> String {
    "logs".to_string()
}

fn default_tests_dir_name() -> String {
    "tests".to_string()
}

fn default_results_file_name() -> String {
    "results.json".to_string()
}

fn default_smoke_script_name() -> String {
    "smoke.sh".to_string()
}

fn default_container_name() -> String {
    "shipcheck_build".to_string()
}

fn default_publish_port() -> u16 {
    3301
}

fn default_container_results_dir() -> String {
    "/opt/product/results".to_string()
}

fn default_image_versions() -> Vec<String> {
    vec!["latest".to_string()]
}

fn default_vm_user() -> String {
    "root".to_string()
}

fn default_vm_host() -> String {
    "127.0.0.1".to_string()
}

fn default_vm_port() -> u16 {
    10022
}

fn default_vm_remote_dir() -> String {
    "/opt/product".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_sync_remote_dir() -> String {
    "/opt/shipcheck/remote".to_string()
}

impl CheckerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Cannot read config {}: {e}", path.display())))?;
        let config: CheckerConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("Invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.commands_url.is_empty() {
            return Err(Error::config("commands_url must not be empty"));
        }
        if self.os_params.is_empty() {
            return Err(Error::config("os_params must name at least one platform"));
        }
        if let Some(remote) = &self.send_to_remote {
            if remote.host.is_empty() || remote.user.is_empty() || remote.archive.is_empty() {
                return Err(Error::config(
                    "send_to_remote requires host, user and archive",
                ));
            }
        }
        Ok(())
    }

    pub fn prepare_dir_path(&self) -> PathBuf {
        Path::new(&self.scripts_dir_path).join(&self.prepare_dir_name)
    }

    pub fn install_dir_path(&self) -> PathBuf {
        Path::new(&self.scripts_dir_path).join(&self.install_dir_name)
    }

    pub fn logs_dir_path(&self) -> PathBuf {
        Path::new(&self.local_dir_path).join(&self.logs_dir_name)
    }

    pub fn tests_dir_path(&self) -> PathBuf {
        Path::new(&self.local_dir_path).join(&self.tests_dir_name)
    }

    pub fn results_file_path(&self) -> PathBuf {
        Path::new(&self.local_dir_path).join(&self.results_file_name)
    }

    pub fn smoke_script_path(&self) -> PathBuf {
        Path::new(&self.scripts_dir_path).join(&self.smoke_script_name)
    }

    /// Platforms that carry container parameters.
    pub fn docker_params(&self) -> BTreeMap<&str, &DockerParams> {
        self.os_params
            .iter()
            .filter_map(|(name, params)| params.docker.as_ref().map(|d| (name.as_str(), d)))
            .collect()
    }

    /// Platforms that carry VM parameters.
    pub fn virtual_box_params(&self) -> BTreeMap<&str, &BTreeMap<String, VmParams>> {
        self.os_params
            .iter()
            .filter_map(|(name, params)| params.virtual_box.as_ref().map(|v| (name.as_str(), v)))
            .collect()
    }
}
