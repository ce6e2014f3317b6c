use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::outcome::Outcome;

/// `platform key → (build name → outcome)`. Both levels are ordered so the
/// persisted JSON is deterministic and diffable across runs.
pub type ResultMap = BTreeMap<String, BTreeMap<String, Outcome>>;

/// The durable result set for one checker instance.
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ResultMap> {
        Self::load_file(&self.path)
    }

    pub fn load_file(path: &Path) -> Result<ResultMap> {
        let raw = std::fs::read_to_string(path)?;
        let results = serde_json::from_str(&raw)?;
        Ok(results)
    }

    /// Write the result set in one atomic step: serialize to a sibling temp
    /// file, then rename over the target. A crash mid-write can never leave
    /// a half-written file that looks like a completed run.
    pub fn save(&self, results: &ResultMap) -> Result<()> {
        let payload = serde_json::to_string_pretty(results)?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, payload)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Merge another instance's result file into this store under the
    /// priority rule.
    pub fn merge_file(&self, remote_path: &Path) -> Result<()> {
        let mut local = self.load()?;
        let remote = Self::load_file(remote_path)?;
        merge_into(&mut local, remote);
        self.save(&local)
    }
}

/// Reconcile `incoming` into `local` key-by-key: the incoming outcome wins
/// on higher or equal priority, so repeated application converges.
pub fn merge_into(local: &mut ResultMap, incoming: ResultMap) {
    for (platform, builds) in incoming {
        let local_builds = local.entry(platform).or_default();
        for (build_name, incoming_outcome) in builds {
            let merged = match local_builds.get(&build_name) {
                Some(local_outcome) => Outcome::merged(*local_outcome, incoming_outcome),
                None => incoming_outcome,
            };
            local_builds.insert(build_name, merged);
        }
    }
}

/// Insert a synthetic NO TEST entry for every matrix platform no existing
/// platform key covers. A platform dropped by the feed then still shows up
/// instead of silently vanishing. Existing entries are never touched.
pub fn fill_gaps(results: &mut ResultMap, all_builds: &[(String, String)]) {
    let known: Vec<String> = results.keys().cloned().collect();

    for (platform, build_name) in all_builds {
        if known.iter().any(|key| key.contains(platform.as_str())) {
            continue;
        }
        results
            .entry(platform.clone())
            .or_default()
            .insert(build_name.clone(), Outcome::NoTest);
    }
}

/// Go/no-go aggregate over the whole result set.
pub fn all_ok(results: &ResultMap) -> bool {
    results
        .values()
        .flat_map(|builds| builds.values())
        .all(|outcome| outcome.is_success())
}

/// Move the local results tree into a timestamped archive directory and
/// return the directory name handed to the notification boundary.
pub fn archive_results(local_dir: &Path, archive_dir: &Path) -> Result<String> {
    std::fs::create_dir_all(archive_dir)?;
    let dir_name = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let destination = archive_dir.join(&dir_name);
    std::fs::rename(local_dir, &destination).map_err(|e| {
        Error::Other(format!(
            "Impossible to archive {} to {}: {e}",
            local_dir.display(),
            destination.display()
        ))
    })?;
    Ok(dir_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_map(entries: &[(&str, &str, Outcome)]) -> ResultMap {
        let mut map = ResultMap::new();
        for (platform, build, outcome) in entries {
            map.entry(platform.to_string())
                .or_default()
                .insert(build.to_string(), *outcome);
        }
        map
    }

    #[test]
    fn merge_prefers_incoming_on_equal_or_higher_priority() {
        let mut local = result_map(&[
            ("ubuntu_22.04", "manual_2.4", Outcome::Ok),
            ("ubuntu_22.04", "nightly_2.5", Outcome::Fail),
        ]);
        let incoming = result_map(&[
            ("ubuntu_22.04", "manual_2.4", Outcome::Error),
            ("ubuntu_22.04", "nightly_2.5", Outcome::Ok),
            ("centos_7", "manual_2.4", Outcome::Timeout),
        ]);

        merge_into(&mut local, incoming);

        assert_eq!(local["ubuntu_22.04"]["manual_2.4"], Outcome::Error);
        assert_eq!(local["ubuntu_22.04"]["nightly_2.5"], Outcome::Fail);
        assert_eq!(local["centos_7"]["manual_2.4"], Outcome::Timeout);
    }

    #[test]
    fn merging_a_set_into_itself_changes_nothing() {
        let mut local = result_map(&[
            ("ubuntu_22.04", "manual_2.4", Outcome::Ok),
            ("centos_7", "nightly_2.5", Outcome::Skip),
        ]);
        let expected = local.clone();

        merge_into(&mut local, expected.clone());

        assert_eq!(local, expected);
    }

    #[test]
    fn gap_filling_adds_no_test_without_touching_existing_platforms() {
        let mut results = result_map(&[("ubuntu_22.04", "manual_2.4", Outcome::Fail)]);
        let all_builds = vec![
            ("ubuntu".to_string(), "manual_2.4".to_string()),
            ("macos".to_string(), "manual_2.4".to_string()),
            ("macos".to_string(), "nightly_2.5".to_string()),
        ];

        fill_gaps(&mut results, &all_builds);

        // `ubuntu` is covered by the `ubuntu_22.04` key as a substring.
        assert!(!results.contains_key("ubuntu"));
        assert_eq!(results["ubuntu_22.04"]["manual_2.4"], Outcome::Fail);
        assert_eq!(results["macos"]["manual_2.4"], Outcome::NoTest);
        assert_eq!(results["macos"]["nightly_2.5"], Outcome::NoTest);
    }

    #[test]
    fn all_ok_counts_only_success_outcomes() {
        let passing = result_map(&[
            ("ubuntu_22.04", "manual_2.4", Outcome::Ok),
            ("macos", "manual_2.4", Outcome::NoTest),
            ("centos_7", "manual_2.4", Outcome::Skip),
        ]);
        assert!(all_ok(&passing));

        let failing = result_map(&[
            ("ubuntu_22.04", "manual_2.4", Outcome::Ok),
            ("centos_7", "manual_2.4", Outcome::Timeout),
        ]);
        assert!(!all_ok(&failing));
    }

    #[test]
    fn save_and_load_round_trip_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results.json"));
        let results = result_map(&[("ubuntu_22.04", "manual_2.4", Outcome::Ok)]);

        store.save(&results).unwrap();

        assert!(!dir.path().join("results.json.tmp").exists());
        assert_eq!(store.load().unwrap(), results);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"OK\""));
    }

    #[test]
    fn merge_file_applies_priority_rule() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results.json"));
        store
            .save(&result_map(&[("ubuntu_22.04", "manual_2.4", Outcome::Ok)]))
            .unwrap();

        let remote_path = dir.path().join("remote.json");
        std::fs::write(
            &remote_path,
            r#"{"ubuntu_22.04": {"manual_2.4": "FAIL"}}"#,
        )
        .unwrap();

        store.merge_file(&remote_path).unwrap();
        assert_eq!(
            store.load().unwrap()["ubuntu_22.04"]["manual_2.4"],
            Outcome::Fail
        );
    }

    #[test]
    fn archive_moves_local_tree_into_timestamped_dir() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local");
        std::fs::create_dir_all(local.join("logs")).unwrap();
        std::fs::write(local.join("results.json"), "{}").unwrap();

        let archive_dir = dir.path().join("archive");
        let name = archive_results(&local, &archive_dir).unwrap();

        assert!(!local.exists());
        assert!(archive_dir.join(&name).join("results.json").exists());
        assert_eq!(name.len(), "20260101_000000".len());
    }
}
