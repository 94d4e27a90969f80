//! The `ResultsWriter` boundary (§6.4): consumes a completed [`BendersOutcome`] and the case it was
//! produced from. Opaque to the core — the coordination loops never call into this module.
//!
//! Grounded on the reference model's CSV-writing idiom (`input::read_csv`'s counterpart) and the
//! convention, shared with `output.rs`, of creating one results directory per run.
use crate::benders::BendersOutcome;
use crate::network::CaseData;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// The root folder name under which a case's results directory is created.
const RESULTS_DIRECTORY_ROOT: &str = "sess_planner_results";

/// Create a results directory for the given case, deriving its name from the case directory's own
/// name. Returns the existing directory if one is already there and `overwrite` was not requested.
pub fn create_output_directory(case_dir: &Path, overwrite: bool) -> Result<PathBuf> {
    let case_dir = case_dir
        .canonicalize()
        .context("Could not resolve path to case directory")?;
    let case_name = case_dir
        .file_name()
        .context("Case cannot be in root folder")?
        .to_str()
        .context("Invalid characters in case directory name")?;

    let path: PathBuf = [RESULTS_DIRECTORY_ROOT, case_name].iter().collect();
    if path.is_dir() {
        if overwrite {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Could not remove existing {}", path.display()))?;
        } else {
            return Ok(path);
        }
    }

    fs::create_dir_all(&path)
        .with_context(|| format!("Could not create {}", path.display()))?;
    Ok(path)
}

/// Receives a completed [`BendersOutcome`] and writes it out in whatever form the implementor
/// chooses. The core only ever calls [`ResultsWriter::write`]; it never inspects this trait's
/// implementors.
pub trait ResultsWriter {
    /// Persist the outcome of a planning run.
    fn write(&self, case: &CaseData, outcome: &BendersOutcome) -> Result<()>;
}

#[derive(Serialize)]
struct CandidateRow<'a> {
    site: &'a str,
    year: &'a str,
    s_rated: f64,
    e_rated: f64,
}

#[derive(Serialize)]
struct ConvergenceRow {
    iteration: u32,
    lower_bound: f64,
    upper_bound: f64,
    admm_iterations: u32,
}

/// Writes a run's best candidate allocation and outer-loop convergence trace as CSV files, the
/// tabular format the reference model uses for every output it produces.
pub struct CsvResultsWriter {
    output_dir: PathBuf,
}

impl CsvResultsWriter {
    /// Create a writer that places its files in `output_dir`, which must already exist.
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

impl ResultsWriter for CsvResultsWriter {
    fn write(&self, case: &CaseData, outcome: &BendersOutcome) -> Result<()> {
        self.write_candidate(case, outcome)
            .context("writing candidate.csv")?;
        self.write_convergence(outcome)
            .context("writing convergence.csv")?;
        Ok(())
    }
}

impl CsvResultsWriter {
    fn write_candidate(&self, case: &CaseData, outcome: &BendersOutcome) -> Result<()> {
        let path = self.output_dir.join("candidate.csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Error writing {}", path.display()))?;

        for (e, node_id) in case.active_dn_nodes.iter().enumerate() {
            for (y, year) in case.years.iter().enumerate() {
                writer.serialize(CandidateRow {
                    site: node_id,
                    year: &year.label,
                    s_rated: outcome.best_candidate.s_rated[e][y].0,
                    e_rated: outcome.best_candidate.e_rated[e][y].0,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn write_convergence(&self, outcome: &BendersOutcome) -> Result<()> {
        let path = self.output_dir.join("convergence.csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Error writing {}", path.display()))?;

        for record in &outcome.history {
            writer.serialize(ConvergenceRow {
                iteration: record.iteration,
                lower_bound: record.lower_bound.0,
                upper_bound: record.upper_bound.0,
                admm_iterations: record.admm_iterations,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benders::BendersIterationRecord;
    use crate::master::CandidateSolution;
    use crate::network::{InvestmentCost, NetworkData, YearRow};
    use crate::units::Money;
    use std::collections::HashMap;

    fn tiny_case(dir: &Path) -> CaseData {
        CaseData {
            years: vec![YearRow {
                label: "2030".to_string(),
                weight_years: 1.0,
            }],
            days: vec![crate::network::DayRow {
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
                data_dir: dir.to_path_buf(),
            },
            dso_networks: vec![NetworkData {
                id: "site-a".to_string(),
                data_dir: dir.to_path_buf(),
            }],
        }
    }

    #[test]
    fn test_create_output_directory_is_idempotent_without_overwrite() {
        let case_dir = tempfile::tempdir().unwrap();
        let first = create_output_directory(case_dir.path(), false).unwrap();
        let second = create_output_directory(case_dir.path(), false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_csv_writer_produces_both_files() {
        let case_dir = tempfile::tempdir().unwrap();
        let case = tiny_case(case_dir.path());
        let output_dir = tempfile::tempdir().unwrap();
        let writer = CsvResultsWriter::new(output_dir.path().to_path_buf());

        let outcome = BendersOutcome {
            converged: true,
            iterations: 1,
            best_candidate: CandidateSolution::zero(1, 1),
            lower_bound: Money(0.0),
            upper_bound: Money(10.0),
            history: vec![BendersIterationRecord {
                iteration: 1,
                lower_bound: Money(0.0),
                upper_bound: Money(10.0),
                admm_iterations: 5,
            }],
        };

        writer.write(&case, &outcome).unwrap();
        assert!(output_dir.path().join("candidate.csv").is_file());
        assert!(output_dir.path().join("convergence.csv").is_file());
    }
}
