//! The command line interface for the planning engine.
use crate::coupling::NetworkModelBuilder;
use crate::log;
use crate::network::CaseData;
use crate::orchestrator::PlanningOrchestrator;
use crate::parameters::Parameters;
use crate::results::{create_output_directory, CsvResultsWriter};
use crate::settings::Settings;
use ::log::info;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// The command line interface for the planning engine.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Commands,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a planning case to convergence.
    Run {
        /// Path to the case directory.
        case_dir: PathBuf,
        /// Directory for output files.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Overwrite an existing output directory.
        #[arg(long)]
        overwrite: bool,
    },
    /// Inspect a case's resolved configuration.
    Case {
        /// The available case subcommands.
        #[command(subcommand)]
        subcommand: CaseSubcommands,
    },
}

/// Subcommands operating on a case directory without running a solve.
#[derive(Subcommand)]
enum CaseSubcommands {
    /// Load and validate a case, printing its resolved parameters.
    Info {
        /// Path to the case directory.
        case_dir: PathBuf,
    },
}

/// Parse CLI arguments and dispatch to the corresponding command.
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    execute_cli_command(cli.command)
}

fn execute_cli_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            case_dir,
            output_dir,
            overwrite,
        } => handle_run_command(&case_dir, output_dir.as_deref(), overwrite, None),
        Commands::Case {
            subcommand: CaseSubcommands::Info { case_dir },
        } => handle_case_info_command(&case_dir),
    }
}

/// Handle the `run` command: load the case, drive the planning engine to convergence, and write
/// results. `builder` is `None` in production (no concrete `NetworkModelBuilder` ships with this
/// crate; see §6 of the design notes) and is only ever `Some` from tests that supply a mock.
pub fn handle_run_command(
    case_dir: &Path,
    output_dir: Option<&Path>,
    overwrite: bool,
    builder: Option<&dyn NetworkModelBuilder>,
) -> Result<()> {
    let mut settings = Settings::load().context("Failed to load settings.")?;
    if overwrite {
        settings.overwrite = true;
    }

    let output_path = match output_dir {
        Some(p) => p.to_owned(),
        None => create_output_directory(case_dir, settings.overwrite)
            .context("Failed to create output directory.")?,
    };

    log::init(Some(settings.log_level.as_str()), Some(&output_path))
        .context("Failed to initialise logging.")?;

    let builder = builder.context(
        "no NetworkModelBuilder is wired into this build; link one in before invoking `run`",
    )?;
    let orchestrator = PlanningOrchestrator::load(case_dir, builder)
        .context("Failed to load case.")?;
    info!("Loaded case from {}", case_dir.display());
    info!("Output data will be written to {}", output_path.display());

    let writer = CsvResultsWriter::new(output_path);
    orchestrator.run(&writer)?;

    Ok(())
}

/// Handle the `case info` command: load and validate a case, printing its resolved parameters
/// without constructing or solving any subproblem.
fn handle_case_info_command(case_dir: &Path) -> Result<()> {
    let case = crate::network::load_case(case_dir).context("Failed to load case.")?;
    let params = Parameters::from_path(case_dir).context("Failed to load parameters.")?;
    print_case_summary(&case, &params);
    Ok(())
}

fn print_case_summary(case: &CaseData, params: &Parameters) {
    println!("years: {}", case.years.len());
    println!("days: {}", case.days.len());
    println!("instants per day: {}", case.num_instants);
    println!("discount factor: {}", case.discount_factor);
    println!("candidate sites: {}", case.active_dn_nodes.join(", "));
    println!("sess budget: {}", params.sess.budget);
    println!("benders max iterations: {}", params.benders.num_max_iters);
    println!("admm max iterations: {}", params.admm.num_max_iters);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_case_summary_does_not_panic() {
        use crate::network::{DayRow, InvestmentCost, NetworkData, YearRow};
        use crate::parameters::{
            AdmmParameters, BendersParameters, ObjType, PerRole, RelaxationFlags, SessParameters,
            SiteParameters,
        };
        use crate::units::Money;
        use std::collections::HashMap;
        use std::path::PathBuf;

        let case = CaseData {
            years: vec![YearRow {
                label: "2030".to_string(),
                weight_years: 1.0,
            }],
            days: vec![DayRow {
                label: "winter".to_string(),
                weight_days: 365.0,
            }],
            num_instants: 1,
            discount_factor: 0.0,
            active_dn_nodes: vec!["site-a".to_string()],
            investment_costs: HashMap::from([(
                "2030".to_string(),
                InvestmentCost {
                    power: Money(10.0),
                    energy: Money(5.0),
                },
            )]),
            tso_network: NetworkData {
                id: "transmission".to_string(),
                data_dir: PathBuf::new(),
            },
            dso_networks: vec![NetworkData {
                id: "site-a".to_string(),
                data_dir: PathBuf::new(),
            }],
        };
        let params = Parameters {
            obj_type: ObjType::Cost,
            relaxation: RelaxationFlags::default(),
            benders: BendersParameters {
                num_max_iters: 10,
                tol_abs: 1e-3,
                tol_rel: 1e-3,
            },
            admm: AdmmParameters {
                num_max_iters: 50,
                tol: 1e-6,
                rho_pf: PerRole { tso: 1.0, dso: 1.0 },
                rho_ess: PerRole { tso: 1.0, dso: 1.0 },
                adaptive_penalty: false,
                adaptive_penalty_factor: 0.0,
                symmetric_pf_dual_update: true,
            },
            sess: SessParameters {
                budget: 1000.0,
                max_capacity: 100.0,
                min_pe_factor: 0.1,
                max_pe_factor: 5.0,
                sites: vec![SiteParameters {
                    id: "site-a".to_string(),
                    t_cal: 10,
                    relative_init_soc: 0.5,
                    min_energy_stored: 0.1,
                    max_energy_stored: 0.9,
                }],
            },
            error_precision: 1e-6,
            admm_convergence_rel_tol: 1e-3,
        };

        print_case_summary(&case, &params);
    }
}
