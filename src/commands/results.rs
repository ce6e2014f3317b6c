use clap::Args;
use serde::Serialize;

use shipcheck::config::CheckerConfig;
use shipcheck::results::{self, ResultMap, ResultStore};

use super::CmdResult;

#[derive(Args)]
pub struct ResultsArgs {
    /// Path to the checker config
    #[arg(short, long, default_value = "./config.json")]
    pub config: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsOutput {
    pub command: String,
    pub ok: bool,
    pub results: ResultMap,
}

/// Show the persisted result set; the exit code carries the go/no-go flag.
pub fn run(args: &ResultsArgs) -> CmdResult<ResultsOutput> {
    let config = CheckerConfig::load(std::path::Path::new(&args.config))?;
    let store = ResultStore::new(config.results_file_path());
    let results = store.load()?;
    let ok = results::all_ok(&results);

    Ok((
        ResultsOutput {
            command: "results".to_string(),
            ok,
            results,
        },
        if ok { 0 } else { 1 },
    ))
}
