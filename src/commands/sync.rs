use clap::Args;
use serde::Serialize;
use std::path::Path;

use shipcheck::collector::LogCollector;
use shipcheck::config::CheckerConfig;
use shipcheck::results::{self, ResultMap};
use shipcheck::{matrix, sync};

use super::CmdResult;

#[derive(Args)]
pub struct SyncArgs {
    /// Path to the checker config
    #[arg(short, long, default_value = "./config.json")]
    pub config: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutput {
    pub command: String,
    pub ok: bool,
    pub results: ResultMap,
}

/// Standalone result-set exchange for a run that already completed: push
/// the local tree, merge fetched archives, gap-fill against the matrix.
pub fn run(args: &SyncArgs) -> CmdResult<SyncOutput> {
    let config = CheckerConfig::load(Path::new(&args.config))?;
    let matrix = matrix::assemble(&config)?;

    let logs = LogCollector::new();
    let merged = sync::sync_results(&config, &matrix.all_builds, &logs)?;
    let ok = results::all_ok(&merged);

    Ok((
        SyncOutput {
            command: "sync".to_string(),
            ok,
            results: merged,
        },
        0,
    ))
}
