use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::collector::LogCollector;
use crate::config::CheckerConfig;
use crate::error::Result;
use crate::matrix::BuildMatrix;
use crate::outcome::Outcome;
use crate::results::{ResultMap, ResultStore};

/// Drives the sorted build matrix sequentially: one backend deploy runs to
/// completion before the next begins. Cancellation is cooperative — the
/// flag is observed between matrix entries, and a command already in
/// flight finishes or times out on its own.
pub struct Tester<'a> {
    config: &'a CheckerConfig,
    cancel: Arc<AtomicBool>,
}

impl<'a> Tester<'a> {
    pub fn new(config: &'a CheckerConfig, cancel: Arc<AtomicBool>) -> Self {
        Self { config, cancel }
    }

    /// Run every matrix entry and persist the result set once, after the
    /// full matrix completes. Per-target logs are saved regardless of
    /// outcome so a failed run still leaves its diagnostics behind.
    pub fn run_matrix(&self, matrix: &BuildMatrix) -> Result<ResultMap> {
        let _ = std::fs::remove_dir_all(&self.config.local_dir_path);
        std::fs::create_dir_all(self.config.tests_dir_path())?;
        std::fs::create_dir_all(self.config.logs_dir_path())?;

        let mut results = ResultMap::new();
        let mut canceled = false;

        for target in &matrix.targets {
            let logs = LogCollector::new();
            let display = target.describe();
            let build_name = target.build_name().to_string();
            let started = Instant::now();

            let outcome = if canceled || self.cancel.load(Ordering::SeqCst) {
                canceled = true;
                Outcome::Canceled
            } else if target.skip() {
                Outcome::Skip
            } else {
                let deploy_ok = target.deploy(self.config, &logs);
                let artifact_path = self
                    .config
                    .tests_dir_path()
                    .join(format!("{display}_{build_name}.json"));
                let mut outcome = classify(deploy_ok, &artifact_path, &logs);
                // A flag raised while the deploy was in flight demotes the
                // target: the operator asked for the run to stop.
                if self.cancel.load(Ordering::SeqCst) {
                    canceled = true;
                    outcome = Outcome::Canceled;
                }
                outcome
            };

            if outcome != Outcome::Skip {
                let log_path = self
                    .config
                    .logs_dir_path()
                    .join(format!("{display}_{build_name}.log"));
                logs.save(&log_path)?;
            }

            log_status!(
                "check",
                "OS: {}. Build: {}. Elapsed time: {:.2}. {}",
                display,
                build_name,
                started.elapsed().as_secs_f64(),
                outcome
            );

            results
                .entry(display)
                .or_default()
                .insert(build_name, outcome);
        }

        ResultStore::new(self.config.results_file_path()).save(&results)?;
        Ok(results)
    }
}

/// Classify one deploy attempt.
///
/// A successful deploy without a readable, all-"OK" artifact is FAIL: the
/// product ran but its own checks did not pass. A failed deploy whose logs
/// carry a timeout marker is TIMEOUT — "never finished" must stay
/// distinguishable from "ran and failed".
pub fn classify(deploy_ok: bool, artifact_path: &Path, logs: &LogCollector) -> Outcome {
    if !deploy_ok {
        if logs.contains_ignore_case("timeout") || logs.contains_ignore_case("timed out") {
            return Outcome::Timeout;
        }
        return Outcome::Error;
    }

    if artifact_all_ok(artifact_path) {
        Outcome::Ok
    } else {
        Outcome::Fail
    }
}

/// Only the literal string "OK" counts as a passing sub-test.
fn artifact_all_ok(path: &Path) -> bool {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(subtests) = serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&raw) else {
        return false;
    };
    subtests.values().all(|value| value.as_str() == Some("OK"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::docker::DockerTarget;
    use crate::virtualbox::VirtualBoxTarget;

    fn test_config(dir: &Path) -> CheckerConfig {
        let json = format!(
            r#"{{
                "commands_url": "https://feed.example/",
                "local_dir_path": "{base}/local",
                "os_params": {{"ubuntu": {{}}}}
            }}"#,
            base = dir.display()
        );
        serde_json::from_str(&json).unwrap()
    }

    fn docker_target(skip: bool) -> Backend {
        Backend::Docker(DockerTarget {
            os_name: "ubuntu".to_string(),
            build_name: "manual_2.4".to_string(),
            image: "ubuntu".to_string(),
            image_version: "22.04".to_string(),
            skip,
            use_cache: false,
        })
    }

    fn vm_target(skip: bool) -> Backend {
        Backend::VirtualBox(VirtualBoxTarget {
            os_name: "freebsd".to_string(),
            build_name: "manual_2.4".to_string(),
            vm_name: "freebsd_13".to_string(),
            credentials: crate::ssh::Credentials {
                host: "127.0.0.1".to_string(),
                user: "checker".to_string(),
                port: 10022,
                identity_file: None,
            },
            remote_dir: "/opt/product".to_string(),
            skip_prepare: true,
            prepare_timeout: None,
            run_timeout: None,
            skip,
        })
    }

    fn write_artifact(dir: &Path, json: &str) -> std::path::PathBuf {
        let path = dir.join("ubuntu_22.04_manual_2.4.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn all_ok_artifact_classifies_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), r#"{"t1": "OK", "t2": "OK"}"#);
        assert_eq!(classify(true, &path, &LogCollector::new()), Outcome::Ok);
    }

    #[test]
    fn any_failing_subtest_classifies_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), r#"{"t1": "OK", "t2": "FAIL"}"#);
        assert_eq!(classify(true, &path, &LogCollector::new()), Outcome::Fail);
    }

    #[test]
    fn missing_or_unparsable_artifact_classifies_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert_eq!(classify(true, &missing, &LogCollector::new()), Outcome::Fail);

        let garbled = write_artifact(dir.path(), "not json");
        assert_eq!(classify(true, &garbled, &LogCollector::new()), Outcome::Fail);
    }

    #[test]
    fn failed_deploy_with_timeout_marker_classifies_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let logs = LogCollector::new();
        logs.log("Read Timed Out while waiting for container");
        assert_eq!(classify(false, &path, &logs), Outcome::Timeout);

        let plain = LogCollector::new();
        plain.log("install script exploded");
        assert_eq!(classify(false, &path, &plain), Outcome::Error);
    }

    #[test]
    fn skip_targets_are_recorded_without_invoking_any_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let matrix = BuildMatrix {
            targets: vec![docker_target(true), vm_target(true)],
            all_builds: Vec::new(),
        };

        let tester = Tester::new(&config, Arc::new(AtomicBool::new(false)));
        let results = tester.run_matrix(&matrix).unwrap();

        assert_eq!(results["ubuntu_22.04"]["manual_2.4"], Outcome::Skip);
        assert_eq!(results["freebsd_13"]["manual_2.4"], Outcome::Skip);

        // Skipped targets leave no per-target log behind.
        assert!(!config
            .logs_dir_path()
            .join("ubuntu_22.04_manual_2.4.log")
            .exists());

        // The result set is persisted once the matrix completes.
        let store = ResultStore::new(config.results_file_path());
        assert_eq!(store.load().unwrap(), results);
    }

    #[test]
    fn cancellation_marks_current_and_remaining_targets() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // Skip flags would normally short-circuit; a raised cancel flag must
        // win over them and never invoke a backend.
        let matrix = BuildMatrix {
            targets: vec![docker_target(true), vm_target(true)],
            all_builds: Vec::new(),
        };

        let tester = Tester::new(&config, Arc::new(AtomicBool::new(true)));
        let results = tester.run_matrix(&matrix).unwrap();

        assert_eq!(results["ubuntu_22.04"]["manual_2.4"], Outcome::Canceled);
        assert_eq!(results["freebsd_13"]["manual_2.4"], Outcome::Canceled);
    }
}
