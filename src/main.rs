//! Provides the main entry point to the `sess_planner` program.
use sess_planner::cli;
use sess_planner::error::EngineError;
use std::process::ExitCode;

/// The main entry point to the program.
fn main() -> ExitCode {
    human_panic::setup_panic!();

    if let Err(err) = cli::run_cli() {
        eprintln!("Error: {err:#}");
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<EngineError>())
            .map_or(1, EngineError::exit_code);
        return ExitCode::from(u8::try_from(code).unwrap_or(1));
    }

    ExitCode::SUCCESS
}
