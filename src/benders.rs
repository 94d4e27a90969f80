//! [`BendersCoordinator`] (§4.5): the outer loop that tightens the SESS investment master problem
//! using day-weighted TSO-side sensitivities read off a converged ADMM run.
use crate::admm::AdmmCoordinator;
use crate::consensus::ConsensusStore;
use crate::coupling::SubproblemCoupling;
use crate::index::Role;
use crate::master::{self, BendersCut, CandidateSolution, MasterProblem};
use crate::network::CaseData;
use crate::parameters::Parameters;
use crate::units::Money;
use anyhow::Result;
use log::{info, warn};

/// Bookkeeping recorded at the end of one outer iteration.
#[derive(Debug, Clone, Copy)]
pub struct BendersIterationRecord {
    pub iteration: u32,
    pub lower_bound: Money,
    pub upper_bound: Money,
    pub admm_iterations: u32,
}

/// Result of running the outer loop to either convergence or the iteration cap.
#[derive(Debug, Clone)]
pub struct BendersOutcome {
    pub converged: bool,
    pub iterations: u32,
    pub best_candidate: CandidateSolution,
    pub lower_bound: Money,
    pub upper_bound: Money,
    pub history: Vec<BendersIterationRecord>,
}

/// Coordinates the outer Benders loop against one case's master problem and subproblem couplings.
pub struct BendersCoordinator<'a> {
    case: &'a CaseData,
    params: &'a Parameters,
}

impl<'a> BendersCoordinator<'a> {
    pub fn new(case: &'a CaseData, params: &'a Parameters) -> Self {
        Self { case, params }
    }

    /// Run the outer loop. `tso` and every entry of `dsos` are reused across iterations; their
    /// capacity is re-fixed to each new candidate as the loop progresses.
    pub fn run(
        &self,
        master: &mut MasterProblem,
        tso: &mut SubproblemCoupling,
        dsos: &mut [SubproblemCoupling],
    ) -> Result<BendersOutcome> {
        let year_weights: Vec<f64> = self.case.years.iter().map(|y| y.weight_years).collect();
        let day_fractions: Vec<f64> = self.case.days.iter().map(|d| d.weight_days / 365.0).collect();

        let mut upper_bound = Money(f64::INFINITY);
        let mut best_candidate =
            CandidateSolution::zero(master.num_sites(), master.num_years());
        let mut lower_bound = Money(-master.initial_bound().0);
        let mut history = Vec::new();
        let mut iteration = 0;
        let mut converged = false;
        // §7: ADMM non-convergence is non-fatal; the outer loop continues using the last iterate,
        // but the overall run is reported as not converged even if the Benders gap later closes.
        let mut any_admm_non_convergence = false;

        while iteration < self.params.benders.num_max_iters {
            info!("Benders outer iteration {}", iteration + 1);
            let master_solution = master.solve()?;
            lower_bound = master_solution.lower_bound;
            let candidate = master_solution.candidate;

            tso.fix_capacity(&candidate)?;
            for dso in dsos.iter_mut() {
                dso.fix_capacity(&candidate)?;
            }

            tso.solve_baseline()?;
            for dso in dsos.iter_mut() {
                dso.solve_baseline()?;
            }
            let mut store = ConsensusStore::new();
            tso.pull_outputs(&mut store);
            for dso in dsos.iter_mut() {
                dso.pull_outputs(&mut store);
            }
            let initial_pf_magnitude = interface_power_rms(tso, &store);

            let mut admm = AdmmCoordinator::new(&self.params.admm);
            let admm_outcome = admm.run(
                &self.params.admm,
                &mut store,
                tso,
                dsos,
                initial_pf_magnitude,
                self.params.error_precision,
                self.params.admm_convergence_rel_tol,
            )?;
            if !admm_outcome.converged {
                warn!(
                    "ADMM did not converge within {} iterations during outer iteration {}; \
                     continuing with its last iterate",
                    admm_outcome.iterations,
                    iteration + 1
                );
                any_admm_non_convergence = true;
            }
            if admm_outcome.had_solver_failure {
                any_admm_non_convergence = true;
            }

            let recourse_cost =
                tso_recourse_cost(tso, &year_weights, &day_fractions, self.case.discount_factor);
            let investment_cost = Money(master_solution.lower_bound.0 - master_solution.alpha.0);
            let actual_upper_bound = Money(investment_cost.0 + recourse_cost);

            if actual_upper_bound.0 < upper_bound.0 {
                upper_bound = actual_upper_bound;
                best_candidate = candidate.clone();
            }

            iteration += 1;
            history.push(BendersIterationRecord {
                iteration,
                lower_bound,
                upper_bound,
                admm_iterations: admm_outcome.iterations,
            });

            let gap_abs = upper_bound.0 - lower_bound.0;
            let gap_rel = gap_abs / upper_bound.0.abs().max(1e-9);
            if gap_abs <= self.params.benders.tol_abs || gap_rel <= self.params.benders.tol_rel {
                info!(
                    "Benders converged after {} iterations (gap_abs={gap_abs}, gap_rel={gap_rel})",
                    iteration
                );
                converged = true;
                break;
            }

            let cut = build_cut(
                tso,
                &candidate,
                recourse_cost,
                master.num_sites(),
                master.num_years(),
                &year_weights,
                &day_fractions,
                self.case.discount_factor,
            );
            master.add_cut(cut);
        }

        if !converged {
            warn!("Benders did not converge within {iteration} iterations");
        }
        // §7: an ADMM run that never reached consensus taints every cut and the upper bound
        // derived from it, so the overall result is not-converged even if the gap closed.
        let converged = converged && !any_admm_non_convergence;

        Ok(BendersOutcome {
            converged,
            iterations: iteration,
            best_candidate,
            lower_bound,
            upper_bound,
            history,
        })
    }
}

/// RMS of the TSO's interface active/reactive power across every slot it owns, used to normalise
/// the ADMM consensus residual (§4.4.1).
fn interface_power_rms(tso: &SubproblemCoupling, store: &ConsensusStore) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for &site in tso.sites() {
        for &year in tso.years() {
            for &day in tso.days() {
                for instant in (0..tso.num_instants()).map(crate::index::InstantIndex) {
                    let record = store.read(Role::Tso, site, year, day, instant);
                    sum_sq += record.p_pf.powi(2) + record.q_pf.powi(2);
                    count += 1;
                }
            }
        }
    }
    if count == 0 {
        1.0
    } else {
        (sum_sq / count as f64).sqrt().max(1e-9)
    }
}

/// Day-weighted, discounted TSO operating cost for the candidate just evaluated. Per §4.5, only
/// the TSO's contribution feeds the upper bound and the cut coefficients.
fn tso_recourse_cost(
    tso: &SubproblemCoupling,
    year_weights: &[f64],
    day_fractions: &[f64],
    discount_factor: f64,
) -> f64 {
    tso.objective_by_day()
        .into_iter()
        .map(|((year, day), cost)| {
            master::annualization(year, year_weights, discount_factor) * day_fractions[day.get()] * cost.0
        })
        .sum()
}

fn build_cut(
    tso: &SubproblemCoupling,
    candidate: &CandidateSolution,
    recourse_cost: f64,
    num_sites: usize,
    num_years: usize,
    year_weights: &[f64],
    day_fractions: &[f64],
    discount_factor: f64,
) -> BendersCut {
    let sensitivities = tso.sensitivities();
    let mut sigma_s = vec![vec![0.0; num_years]; num_sites];
    let mut sigma_e = vec![vec![0.0; num_years]; num_sites];

    for ((site, year, day), sensitivity) in &sensitivities {
        let weight = day_fractions[day.get()] * master::annualization(*year, year_weights, discount_factor);
        sigma_s[site.get()][year.get()] += weight * sensitivity.d_power;
        sigma_e[site.get()][year.get()] += weight * sensitivity.d_energy;
    }

    BendersCut {
        upper_bound: Money(recourse_cost),
        sigma_s,
        sigma_e,
        s_hat: candidate.s_rated.clone(),
        e_hat: candidate.e_rated.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::MockSubproblem;
    use crate::index::{InstantIndex, SiteIndex};
    use crate::network::{InvestmentCost, NetworkData, YearRow};
    use crate::parameters::{
        AdmmParameters, BendersParameters, ObjType, PerRole, RelaxationFlags, SessParameters,
        SiteParameters,
    };
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn tiny_case() -> CaseData {
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
                data_dir: PathBuf::new(),
            },
            dso_networks: vec![NetworkData {
                id: "site-a".to_string(),
                data_dir: PathBuf::new(),
            }],
        }
    }

    fn tiny_params() -> Parameters {
        Parameters {
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
        }
    }

    #[test]
    fn test_benders_converges_within_iteration_cap() {
        let case = tiny_case();
        let params = tiny_params();
        let mut master = MasterProblem::new(&case, &params).unwrap();
        let site = SiteIndex(0);

        let mut tso = SubproblemCoupling::new(
            Role::Tso,
            vec![site],
            1,
            1,
            1,
            Box::new(MockSubproblem::new(100.0)),
        );
        let mut dsos = vec![SubproblemCoupling::new(
            Role::Dso,
            vec![site],
            1,
            1,
            1,
            Box::new(MockSubproblem::new(100.0)),
        )];

        let coordinator = BendersCoordinator::new(&case, &params);
        let outcome = coordinator.run(&mut master, &mut tso, &mut dsos).unwrap();

        assert!(outcome.iterations >= 1);
        assert!(outcome.upper_bound.0.is_finite());
        let _ = InstantIndex(0);
    }

    #[test]
    fn test_solver_failure_is_tolerated_and_reported_as_not_converged() {
        // Scenario F (§8): a DSO fails on its second solve call. The outer loop must still run to
        // completion, with no error propagated out of `run`, and the result marked not-converged.
        let case = tiny_case();
        let params = tiny_params();
        let mut master = MasterProblem::new(&case, &params).unwrap();
        let site = SiteIndex(0);

        let mut tso = SubproblemCoupling::new(
            Role::Tso,
            vec![site],
            1,
            1,
            1,
            Box::new(MockSubproblem::new(100.0)),
        );
        let mut dsos = vec![SubproblemCoupling::new(
            Role::Dso,
            vec![site],
            1,
            1,
            1,
            Box::new(MockSubproblem::new(100.0).failing_on_call(2)),
        )];

        let coordinator = BendersCoordinator::new(&case, &params);
        let outcome = coordinator.run(&mut master, &mut tso, &mut dsos).unwrap();

        assert!(!outcome.converged);
        assert!(outcome.upper_bound.0.is_finite());
    }
}
