//! [`PlanningOrchestrator`] (§4.6): owns the top-level control loop's lifetimes. Loads and
//! validates external data through the `NetworkLoader`/`NetworkModelBuilder` collaborators,
//! constructs the master problem, drives the Benders loop, and hands the result to a
//! `ResultsWriter`.
//!
//! Grounded on the teacher's `simulation::run` milestone-year loop, which plays the analogous
//! wiring role between loaded model data, the dispatch-optimisation solves, and `output.rs`.
use crate::benders::{BendersCoordinator, BendersOutcome};
use crate::coupling::{NetworkModelBuilder, SubproblemCoupling};
use crate::error::{EngineError, NonConvergenceKind};
use crate::id::HasID;
use crate::index::{Role, SiteIndex};
use crate::master::MasterProblem;
use crate::network::{self, CaseData};
use crate::parameters::Parameters;
use crate::results::ResultsWriter;
use anyhow::{Context, Result, ensure};
use log::info;
use std::path::Path;

/// Wires together one planning run: a loaded case, its resolved parameters, and the subproblem
/// couplings the rest of the core drives.
pub struct PlanningOrchestrator<'a> {
    case: CaseData,
    params: Parameters,
    builder: &'a dyn NetworkModelBuilder,
}

impl<'a> PlanningOrchestrator<'a> {
    /// Load a case from `case_dir` and validate it against the supplied parameters' site list.
    ///
    /// # Arguments
    ///
    /// * `case_dir` - Directory containing `case.toml`, `years.csv`, `days.csv`,
    ///   `investment_costs.csv`, `parameters.toml`, plus one subdirectory per network.
    /// * `builder` - The `NetworkModelBuilder` collaborator used to construct each network's
    ///   operational model.
    pub fn load<P: AsRef<Path>>(case_dir: P, builder: &'a dyn NetworkModelBuilder) -> Result<Self> {
        let case_dir = case_dir.as_ref();
        let case = network::load_case(case_dir)
            .map_err(|e| EngineError::DataFileError(e.to_string()))
            .context("loading case data")?;
        let params = Parameters::from_path(case_dir)
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))
            .context("loading parameters")?;

        Self::validate_site_alignment(&case, &params)?;

        Ok(Self {
            case,
            params,
            builder,
        })
    }

    /// Check that the case's active DN nodes and the parameter file's SESS sites name the same
    /// nodes in the same order. The master problem and every `SubproblemCoupling` consume both
    /// lists purely positionally, so a mismatch here would silently misattribute investment.
    fn validate_site_alignment(case: &CaseData, params: &Parameters) -> Result<()> {
        let site_ids: Vec<&str> = params.sess.sites.iter().map(HasID::get_id).collect();
        let node_ids: Vec<&str> = case.active_dn_nodes.iter().map(String::as_str).collect();
        ensure!(
            site_ids == node_ids,
            EngineError::InvalidConfiguration(format!(
                "parameters.toml sess.sites {site_ids:?} must match case.toml active_dn_nodes {node_ids:?} exactly, in order"
            ))
            .to_string()
        );
        Ok(())
    }

    /// Run the full planning pipeline: build the master problem and subproblem couplings, drive
    /// the Benders loop to convergence, then hand the result to `results_writer`.
    pub fn run(&self, results_writer: &dyn ResultsWriter) -> Result<BendersOutcome> {
        info!("Loaded case with {} candidate site(s)", self.case.active_dn_nodes.len());

        let mut master = MasterProblem::new(&self.case, &self.params)
            .context("building master problem")?;

        let all_sites: Vec<SiteIndex> = (0..self.case.active_dn_nodes.len()).map(SiteIndex).collect();
        let mut tso = SubproblemCoupling::new(
            Role::Tso,
            all_sites,
            self.case.years.len(),
            self.case.days.len(),
            self.case.num_instants,
            self.builder
                .build(&self.case.tso_network, Role::Tso, &self.params)
                .context("building TSO subproblem")?,
        );

        let mut dsos: Vec<SubproblemCoupling> = self
            .case
            .dso_networks
            .iter()
            .enumerate()
            .map(|(e, network)| {
                let model = self
                    .builder
                    .build(network, Role::Dso, &self.params)
                    .with_context(|| format!("building DSO subproblem for site '{}'", network.id))?;
                Ok(SubproblemCoupling::new(
                    Role::Dso,
                    vec![SiteIndex(e)],
                    self.case.years.len(),
                    self.case.days.len(),
                    self.case.num_instants,
                    model,
                ))
            })
            .collect::<Result<_>>()?;

        let coordinator = BendersCoordinator::new(&self.case, &self.params);
        let outcome = coordinator.run(&mut master, &mut tso, &mut dsos)?;

        info!(
            "Planning run finished: converged={}, iterations={}, upper_bound={:?}",
            outcome.converged, outcome.iterations, outcome.upper_bound
        );

        // §7: results are always produced from the last iterate, marked not-converged if needed,
        // so the writer runs even when the coordination loops never closed their gap.
        results_writer
            .write(&self.case, &outcome)
            .context("writing results")?;

        if !outcome.converged {
            return Err(EngineError::NonConvergence {
                kind: NonConvergenceKind::Benders,
            }
            .into());
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::{MockSubproblem, Subproblem};
    use crate::network::NetworkData;
    use std::fs;

    struct MockBuilder;

    impl NetworkModelBuilder for MockBuilder {
        fn build(
            &self,
            _network: &NetworkData,
            _role: Role,
            _params: &Parameters,
        ) -> Result<Box<dyn Subproblem>> {
            Ok(Box::new(MockSubproblem::new(100.0)))
        }
    }

    struct NullResultsWriter;

    impl ResultsWriter for NullResultsWriter {
        fn write(&self, _case: &CaseData, _outcome: &BendersOutcome) -> Result<()> {
            Ok(())
        }
    }

    fn write_case_files(dir: &Path) {
        fs::write(
            dir.join("case.toml"),
            r#"
num_instants = 1
discount_factor = 0.0
active_dn_nodes = ["site-a"]
"#,
        )
        .unwrap();
        fs::write(dir.join("years.csv"), "label,weight_years\n2030,1\n").unwrap();
        fs::write(dir.join("days.csv"), "label,weight_days\nwinter,365\n").unwrap();
        fs::write(
            dir.join("investment_costs.csv"),
            "year_label,power_cost,energy_cost\n2030,10.0,5.0\n",
        )
        .unwrap();
        fs::write(
            dir.join("parameters.toml"),
            r#"
[benders]
num_max_iters = 5
tol_abs = 1.0
tol_rel = 0.1

[admm]
num_max_iters = 50
tol = 1e-3

[sess]
budget = 1000.0
max_capacity = 100.0
min_pe_factor = 0.1
max_pe_factor = 5.0

[[sess.sites]]
id = "site-a"
t_cal = 10
relative_init_soc = 0.5
min_energy_stored = 0.1
max_energy_stored = 0.9
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_load_and_run_end_to_end_against_mock_subproblems() {
        let dir = tempfile::tempdir().unwrap();
        write_case_files(dir.path());

        let builder = MockBuilder;
        let orchestrator = PlanningOrchestrator::load(dir.path(), &builder).unwrap();
        let outcome = orchestrator.run(&NullResultsWriter).unwrap();

        assert!(outcome.iterations >= 1);
        assert!(outcome.upper_bound.0.is_finite());
    }

    #[test]
    fn test_load_rejects_site_order_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_case_files(dir.path());
        fs::write(
            dir.path().join("case.toml"),
            r#"
num_instants = 1
discount_factor = 0.0
active_dn_nodes = ["site-b"]
"#,
        )
        .unwrap();

        let builder = MockBuilder;
        assert!(PlanningOrchestrator::load(dir.path(), &builder).is_err());
    }
}
