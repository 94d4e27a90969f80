//! Coordinated planning and operation engine for shared energy storage investment.
#![warn(missing_docs)]

use dirs::config_dir;
use std::path::PathBuf;

pub mod admm;
pub mod benders;
pub mod cli;
pub mod consensus;
pub mod coupling;
pub mod error;
pub mod id;
pub mod index;
pub mod input;
pub mod log;
pub mod master;
pub mod network;
pub mod orchestrator;
pub mod parameters;
pub mod results;
pub mod settings;
pub mod units;

/// Get the config dir for the program.
///
/// In the unlikely event this path cannot be retrieved, the CWD will be returned.
pub fn get_config_dir() -> PathBuf {
    let Some(mut config_dir) = config_dir() else {
        return PathBuf::default();
    };

    config_dir.push("sess_planner");
    config_dir
}
