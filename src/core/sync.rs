use std::path::Path;
use std::time::Duration;

use crate::collector::LogCollector;
use crate::config::{CheckerConfig, SyncRemote};
use crate::error::{Error, Result};
use crate::results::{self, ResultMap, ResultStore};
use crate::ssh::{Credentials, SshSession};
use crate::utils::archive;
use crate::utils::shell::quote_path;

const SEND_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Package the local results tree and push it to the configured remote
/// drop directory. Failures are logged and never fatal to the run; the
/// local archive is removed on every path.
pub fn send_results(config: &CheckerConfig, logs: &LogCollector) -> bool {
    let Some(remote) = &config.send_to_remote else {
        return true;
    };

    let zip_path = std::env::temp_dir().join(format!("{}.zip", remote.archive));
    let outcome = push_archive(config, remote, &zip_path, logs);
    let _ = std::fs::remove_file(&zip_path);

    match outcome {
        Ok(()) => {
            log_status!("sync", "Results sent to {}", remote.host);
            true
        }
        Err(e) => {
            logs.log(format!("Impossible to send results to remote server: {e}"));
            log_status!("sync", "Impossible to send results to remote server: {e}");
            false
        }
    }
}

fn push_archive(
    config: &CheckerConfig,
    remote: &SyncRemote,
    zip_path: &Path,
    logs: &LogCollector,
) -> Result<()> {
    archive::zip_dir(Path::new(&config.local_dir_path), zip_path)?;

    let mut session = SshSession::new(Credentials {
        host: remote.host.clone(),
        user: remote.user.clone(),
        port: remote.port,
        identity_file: remote.identity_file.clone(),
    });
    session.connect(SEND_TIMEOUT, false, logs)?;

    if let Some(failure) = session.run_command(
        &format!("mkdir -p {}", quote_path(&remote.remote_dir)),
        SEND_TIMEOUT,
        None,
        logs,
    ) {
        return Err(Error::ssh(failure));
    }

    session.put(
        zip_path,
        &format!("{}/{}.zip", remote.remote_dir, remote.archive),
        SEND_TIMEOUT,
        logs,
    )
}

/// Unpack every archive other instances dropped into the remote directory,
/// fold their logs and artifacts into the local tree, and merge their
/// result files under the priority rule.
pub fn use_remote_results(config: &CheckerConfig, logs: &LogCollector) -> Result<()> {
    let store = ResultStore::new(config.results_file_path());
    let scratch = Path::new(&config.temp_dir_path);
    let pattern = format!("{}/*.zip", config.remote_dir_path);

    for entry in glob::glob(&pattern).map_err(|e| Error::Other(e.to_string()))? {
        let archive_path = match entry {
            Ok(path) => path,
            Err(e) => {
                logs.log(format!("Unreadable remote archive: {e}"));
                continue;
            }
        };
        logs.log(format!("Merging results from {}", archive_path.display()));

        archive::unzip(&archive_path, scratch)?;

        move_files(
            &scratch.join(&config.logs_dir_name),
            &config.logs_dir_path(),
        )?;
        move_files(
            &scratch.join(&config.tests_dir_name),
            &config.tests_dir_path(),
        )?;

        store.merge_file(&scratch.join(&config.results_file_name))?;

        let _ = std::fs::remove_dir_all(scratch);
    }

    Ok(())
}

/// Move every file under `src` (recursively) into the flat `dest` dir.
fn move_files(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(src)? {
        let path = entry?.path();
        if path.is_dir() {
            move_files(&path, dest)?;
        } else if let Some(file_name) = path.file_name() {
            std::fs::rename(&path, dest.join(file_name))?;
        }
    }
    Ok(())
}

/// Full exchange: push our tree, fold in everything already fetched, then
/// surface matrix entries nothing attempted as NO TEST. Returns the
/// reconciled result set.
pub fn sync_results(
    config: &CheckerConfig,
    all_builds: &[(String, String)],
    logs: &LogCollector,
) -> Result<ResultMap> {
    send_results(config, logs);

    if config.use_remote_results {
        use_remote_results(config, logs)?;
    }

    let store = ResultStore::new(config.results_file_path());
    let mut merged = store.load()?;
    results::fill_gaps(&mut merged, all_builds);
    store.save(&merged)?;

    Ok(merged)
}
