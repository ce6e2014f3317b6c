use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shipcheck::collector::LogCollector;
use shipcheck::config::CheckerConfig;
use shipcheck::log_status;
use shipcheck::results::{self, ResultMap};
use shipcheck::tester::Tester;
use shipcheck::{matrix, sync, Error};

use super::CmdResult;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the checker config
    #[arg(short, long, default_value = "./config.json")]
    pub config: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub command: String,
    pub ok: bool,
    pub archive_dir: String,
    pub results: ResultMap,
}

/// The full pipeline: assemble the matrix, drive every target, exchange
/// result sets, archive the local tree. The exit code is the go/no-go
/// aggregate over the reconciled results.
pub fn run(args: &RunArgs) -> CmdResult<RunOutput> {
    let config = CheckerConfig::load(Path::new(&args.config))?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| Error::Other(format!("Cannot install interrupt handler: {e}")))?;

    let matrix = matrix::assemble(&config)?;
    log_status!("run", "{} matrix entries to check", matrix.targets.len());

    let tester = Tester::new(&config, cancel);
    tester.run_matrix(&matrix)?;

    let sync_logs = LogCollector::new();
    let merged = sync::sync_results(&config, &matrix.all_builds, &sync_logs)?;

    let ok = results::all_ok(&merged);
    let archive_dir = results::archive_results(
        Path::new(&config.local_dir_path),
        Path::new(&config.archive_dir_path),
    )?;
    log_status!("run", "Results archived to {archive_dir}");

    Ok((
        RunOutput {
            command: "run".to_string(),
            ok,
            archive_dir,
            results: merged,
        },
        if ok { 0 } else { 1 },
    ))
}
