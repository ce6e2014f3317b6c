pub mod matrix;
pub mod results;
pub mod run;
pub mod sync;

/// Every command returns its serializable output plus the process exit code.
pub type CmdResult<T> = shipcheck::Result<(T, i32)>;

pub fn run_json(command: crate::Commands) -> (shipcheck::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Run(args) => crate::output::map_cmd_result_to_json(run::run(&args)),
        crate::Commands::Matrix(args) => crate::output::map_cmd_result_to_json(matrix::run(&args)),
        crate::Commands::Sync(args) => crate::output::map_cmd_result_to_json(sync::run(&args)),
        crate::Commands::Results(args) => {
            crate::output::map_cmd_result_to_json(results::run(&args))
        }
    }
}
