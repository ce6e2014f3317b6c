use clap::Args;
use serde::Serialize;
use std::path::Path;

use shipcheck::config::CheckerConfig;
use shipcheck::matrix;

use super::CmdResult;

#[derive(Args)]
pub struct MatrixArgs {
    /// Path to the checker config
    #[arg(short, long, default_value = "./config.json")]
    pub config: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub platform: String,
    pub build: String,
    pub backend: String,
    pub display: String,
    pub skip: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixOutput {
    pub command: String,
    pub total: usize,
    pub skipped: usize,
    pub targets: Vec<TargetInfo>,
}

/// Assemble and show the matrix without deploying anything.
pub fn run(args: &MatrixArgs) -> CmdResult<MatrixOutput> {
    let config = CheckerConfig::load(Path::new(&args.config))?;
    let matrix = matrix::assemble(&config)?;

    let targets: Vec<TargetInfo> = matrix
        .targets
        .iter()
        .map(|target| TargetInfo {
            platform: target.platform().to_string(),
            build: target.build_name().to_string(),
            backend: target.kind().to_string(),
            display: target.describe(),
            skip: target.skip(),
        })
        .collect();
    let skipped = targets.iter().filter(|t| t.skip).count();

    Ok((
        MatrixOutput {
            command: "matrix".to_string(),
            total: targets.len(),
            skipped,
            targets,
        },
        0,
    ))
}
