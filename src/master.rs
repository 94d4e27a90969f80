//! [`MasterProblem`] (§4.2): the SESS capacity-investment LP, tightened each outer iteration by
//! appending Benders cuts produced from inner ADMM sensitivities.
//!
//! Built on `highs::RowProblem`, following the same column-then-row construction as the reference
//! model's investment-appraisal optimisation (`simulation::investment::appraisal::optimisation`).
use crate::index::{SiteIndex, YearIndex};
use crate::network::{CaseData, InvestmentCost};
use crate::parameters::Parameters;
use crate::units::{Dimensionless, Energy, Money, Power};
use anyhow::{Result, anyhow};
use highs::{HighsModelStatus, RowProblem as Problem, Sense};

/// A candidate SESS allocation: installed rated power and energy per site and year. This is the
/// coupling object the master hands to the operational layer, and the operational layer's
/// sensitivities are expressed with respect to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSolution {
    /// `s_rated[e][y]`, in the order of [`CaseData::active_dn_nodes`] and milestone years.
    pub s_rated: Vec<Vec<Power>>,
    /// `e_rated[e][y]`.
    pub e_rated: Vec<Vec<Energy>>,
}

impl CandidateSolution {
    /// A candidate with no SESS installed anywhere (the zero-budget / initial candidate).
    pub fn zero(num_sites: usize, num_years: usize) -> Self {
        Self {
            s_rated: vec![vec![Power(0.0); num_years]; num_sites],
            e_rated: vec![vec![Energy(0.0); num_years]; num_sites],
        }
    }
}

/// An affine lower bound on recourse cost produced from day-weighted TSO sensitivities (§3, §4.5).
///
/// `alpha >= ub + sum_{e,y} (sigma_s[e,y] * (s_rated[e,y] - s_hat[e,y])
///                          + sigma_e[e,y] * (e_rated[e,y] - e_hat[e,y]))`
#[derive(Debug, Clone)]
pub struct BendersCut {
    pub upper_bound: Money,
    pub sigma_s: Vec<Vec<f64>>,
    pub sigma_e: Vec<Vec<f64>>,
    pub s_hat: Vec<Vec<Power>>,
    pub e_hat: Vec<Vec<Energy>>,
}

impl BendersCut {
    /// Evaluate the cut's lower bound on recourse cost at an arbitrary candidate. Used by tests
    /// to check the cut-validity law from §8.
    pub fn evaluate_at(&self, candidate: &CandidateSolution) -> Money {
        let mut total = self.upper_bound.0;
        for (e, (sigma_s_row, sigma_e_row)) in self.sigma_s.iter().zip(self.sigma_e.iter()).enumerate() {
            for (y, (&sigma_s, &sigma_e)) in sigma_s_row.iter().zip(sigma_e_row.iter()).enumerate() {
                total += sigma_s * (candidate.s_rated[e][y].0 - self.s_hat[e][y].0);
                total += sigma_e * (candidate.e_rated[e][y].0 - self.e_hat[e][y].0);
            }
        }
        Money(total)
    }
}

/// The result of solving the master problem: a new candidate, the epigraph value `alpha`, and the
/// LP's objective value (the new Benders lower bound).
#[derive(Debug, Clone)]
pub struct MasterSolution {
    pub candidate: CandidateSolution,
    pub alpha: Money,
    pub lower_bound: Money,
}

/// Precomputed per-site, per-year layout of the calendar-life accounting (§4.2).
#[derive(Debug, Clone)]
struct CalendarLife {
    /// `contributors[e][x]` = the list of year indices `y` whose investment window covers `x`.
    contributors: Vec<Vec<Vec<usize>>>,
}

fn calendar_life_window(
    year: YearIndex,
    calendar_life_years: u32,
    year_weights: &[f64],
    num_years: usize,
) -> std::ops::Range<usize> {
    let w_y = year_weights[year.get()].max(f64::EPSILON);
    let window_len = (f64::from(calendar_life_years) / w_y).ceil().max(1.0) as usize;
    let end = (year.get() + window_len).min(num_years);
    year.get()..end
}

fn build_calendar_life(
    num_sites: usize,
    num_years: usize,
    year_weights: &[f64],
    calendar_life_per_site: &[u32],
) -> CalendarLife {
    let mut contributors = vec![vec![Vec::new(); num_years]; num_sites];
    for (e, life) in calendar_life_per_site.iter().enumerate() {
        for y in 0..num_years {
            let window = calendar_life_window(YearIndex(y), *life, year_weights, num_years);
            for x in window {
                contributors[e][x].push(y);
            }
        }
    }
    CalendarLife { contributors }
}

/// Cumulative real years elapsed between the start of the horizon and the given milestone year.
fn cumulative_years(year: YearIndex, year_weights: &[f64]) -> f64 {
    year_weights[..year.get()].iter().sum()
}

/// Discount factor applied to costs incurred in the given milestone year.
pub(crate) fn annualization(year: YearIndex, year_weights: &[f64], discount_factor: f64) -> f64 {
    1.0 / (1.0 + discount_factor).powf(cumulative_years(year, year_weights))
}

/// The SESS investment master problem.
pub struct MasterProblem {
    num_sites: usize,
    num_years: usize,
    year_weights: Vec<f64>,
    investment_costs: Vec<InvestmentCost>,
    discount_factor: f64,
    calendar_life: CalendarLife,
    min_pe_factor: Dimensionless,
    max_pe_factor: Dimensionless,
    max_capacity: Energy,
    budget: Money,
    cuts: Vec<BendersCut>,
}

impl MasterProblem {
    /// Build a master problem from case data and run parameters.
    pub fn new(case: &CaseData, params: &Parameters) -> Result<Self> {
        let num_sites = case.active_dn_nodes.len();
        let num_years = case.years.len();

        let mut investment_costs = Vec::with_capacity(num_years);
        for year in &case.years {
            investment_costs.push(case.investment_cost(&year.label)?);
        }
        let year_weights: Vec<f64> = case.years.iter().map(|y| y.weight_years).collect();

        let calendar_life_per_site: Vec<u32> = (0..num_sites)
            .map(|e| params.sess.sites[e].t_cal)
            .collect();
        let calendar_life =
            build_calendar_life(num_sites, num_years, &year_weights, &calendar_life_per_site);

        Ok(Self {
            num_sites,
            num_years,
            year_weights,
            investment_costs,
            discount_factor: case.discount_factor,
            calendar_life,
            min_pe_factor: params.min_pe_factor(),
            max_pe_factor: params.max_pe_factor(),
            max_capacity: params.max_capacity(),
            budget: params.budget(),
            cuts: Vec::new(),
        })
    }

    /// The initial, budget-scaled lower/upper bound from which the Benders loop starts (§4.5).
    pub fn initial_bound(&self) -> Money {
        Money(self.budget.0 * 1000.0)
    }

    /// Number of candidate sites.
    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    /// Number of milestone years.
    pub fn num_years(&self) -> usize {
        self.num_years
    }

    /// Append a Benders cut. Cuts are never retracted (§5, §8 invariant 4).
    pub fn add_cut(&mut self, cut: BendersCut) {
        self.cuts.push(cut);
    }

    /// Number of cuts appended so far.
    pub fn num_cuts(&self) -> usize {
        self.cuts.len()
    }

    /// Solve the master LP, returning a new candidate and the tightened lower bound.
    ///
    /// Columns are added in a fixed order (per `(site, year)`: `s_inv, e_inv, s_rated, e_rated`,
    /// then a trailing `alpha`), so the solution vector returned by `highs` can be read back
    /// positionally, the same way the reference investment-appraisal optimisation does.
    pub fn solve(&self) -> Result<MasterSolution> {
        let mut problem = Problem::default();
        let n = self.num_sites;
        let y = self.num_years;

        let mut s_inv: Vec<highs::Col> = Vec::with_capacity(n * y);
        let mut e_inv: Vec<highs::Col> = Vec::with_capacity(n * y);
        let mut s_rated: Vec<highs::Col> = Vec::with_capacity(n * y);
        let mut e_rated: Vec<highs::Col> = Vec::with_capacity(n * y);
        let mut obj_coeffs = vec![0.0; n * y * 4 + 1];

        for e in 0..n {
            for yi in 0..y {
                let year = YearIndex(yi);
                let disc = annualization(year, &self.year_weights, self.discount_factor);
                let cost = &self.investment_costs[yi];
                let base = (e * y + yi) * 4;

                s_inv.push(problem.add_column(disc * cost.power.0, 0.0..));
                e_inv.push(problem.add_column(disc * cost.energy.0, 0.0..));
                s_rated.push(problem.add_column(0.0, 0.0..));
                e_rated.push(problem.add_column(0.0, 0.0..self.max_capacity.0));

                obj_coeffs[base] = disc * cost.power.0;
                obj_coeffs[base + 1] = disc * cost.energy.0;
            }
        }

        let alpha = problem.add_column(1.0, -self.initial_bound().0..);
        obj_coeffs[n * y * 4] = 1.0;

        self.add_rated_accounting_rows(&mut problem, &s_inv, &s_rated, n, y);
        self.add_rated_accounting_rows(&mut problem, &e_inv, &e_rated, n, y);
        self.add_pe_ratio_rows(&mut problem, &s_rated, &e_rated, n, y);
        self.add_budget_row(&mut problem, &s_inv, &e_inv, n, y);
        self.add_cut_rows(&mut problem, &s_rated, &e_rated, alpha, n, y);

        let solved = problem
            .optimise(Sense::Minimise)
            .try_solve()
            .map_err(|status| anyhow!("Could not solve master problem: {status:?}"))?;
        if solved.status() != HighsModelStatus::Optimal {
            return Err(anyhow!(
                "Master problem did not solve to optimality: {:?}",
                solved.status()
            ));
        }
        let solution = solved.get_solution();
        let values = solution.columns();

        let mut candidate = CandidateSolution::zero(n, y);
        for e in 0..n {
            for yi in 0..y {
                let idx = e * y + yi;
                candidate.s_rated[e][yi] = Power(values[idx * 4 + 2]);
                candidate.e_rated[e][yi] = Energy(values[idx * 4 + 3]);
            }
        }
        let alpha_value = Money(values[n * y * 4]);
        let objective: f64 = values.iter().zip(obj_coeffs.iter()).map(|(v, c)| v * c).sum();

        Ok(MasterSolution {
            candidate,
            alpha: alpha_value,
            lower_bound: Money(objective),
        })
    }

    fn add_rated_accounting_rows(
        &self,
        problem: &mut Problem,
        inv_cols: &[highs::Col],
        rated_cols: &[highs::Col],
        n: usize,
        y: usize,
    ) {
        for e in 0..n {
            for x in 0..y {
                let mut coeffs = vec![(rated_cols[e * y + x], 1.0)];
                for &contributor_y in &self.calendar_life.contributors[e][x] {
                    coeffs.push((inv_cols[e * y + contributor_y], -1.0));
                }
                problem.add_row(0.0..=0.0, coeffs);
            }
        }
    }

    fn add_pe_ratio_rows(
        &self,
        problem: &mut Problem,
        s_rated: &[highs::Col],
        e_rated: &[highs::Col],
        n: usize,
        y: usize,
    ) {
        for e in 0..n {
            for yi in 0..y {
                let idx = e * y + yi;
                // s_rated - min_pe * e_rated >= 0
                problem.add_row(
                    0.0..,
                    vec![(s_rated[idx], 1.0), (e_rated[idx], -self.min_pe_factor.0)],
                );
                // max_pe * e_rated - s_rated >= 0
                problem.add_row(
                    0.0..,
                    vec![(e_rated[idx], self.max_pe_factor.0), (s_rated[idx], -1.0)],
                );
            }
        }
    }

    fn add_budget_row(
        &self,
        problem: &mut Problem,
        s_inv: &[highs::Col],
        e_inv: &[highs::Col],
        n: usize,
        y: usize,
    ) {
        let mut coeffs = Vec::with_capacity(n * y * 2);
        for e in 0..n {
            for yi in 0..y {
                let idx = e * y + yi;
                let year = YearIndex(yi);
                let disc = annualization(year, &self.year_weights, self.discount_factor);
                let cost = &self.investment_costs[yi];
                coeffs.push((s_inv[idx], disc * cost.power.0));
                coeffs.push((e_inv[idx], disc * cost.energy.0));
            }
        }
        problem.add_row(..=self.budget.0, coeffs);
    }

    fn add_cut_rows(
        &self,
        problem: &mut Problem,
        s_rated: &[highs::Col],
        e_rated: &[highs::Col],
        alpha: highs::Col,
        n: usize,
        y: usize,
    ) {
        for cut in &self.cuts {
            let mut coeffs = vec![(alpha, 1.0)];
            let mut rhs = cut.upper_bound.0;
            for e in 0..n {
                for yi in 0..y {
                    let idx = e * y + yi;
                    let sigma_s = cut.sigma_s[e][yi];
                    let sigma_e = cut.sigma_e[e][yi];
                    coeffs.push((s_rated[idx], -sigma_s));
                    coeffs.push((e_rated[idx], -sigma_e));
                    rhs -= sigma_s * cut.s_hat[e][yi].0 + sigma_e * cut.e_hat[e][yi].0;
                }
            }
            problem.add_row(rhs.., coeffs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_life_window_rollover() {
        // Scenario C (§8): |Y|=3, w_y=1, t_cal=2 for one site.
        let weights = vec![1.0, 1.0, 1.0];
        let w0 = calendar_life_window(YearIndex(0), 2, &weights, 3);
        let w1 = calendar_life_window(YearIndex(1), 2, &weights, 3);

        assert_eq!(w0, 0..2);
        assert_eq!(w1, 1..3);
    }

    #[test]
    fn test_calendar_life_window_bounded_by_horizon() {
        let weights = vec![1.0, 1.0];
        let window = calendar_life_window(YearIndex(1), 5, &weights, 2);
        assert_eq!(window, 1..2);
    }

    #[test]
    fn test_annualization_is_one_at_horizon_start() {
        let weights = vec![1.0, 1.0, 1.0];
        assert!((annualization(YearIndex(0), &weights, 0.05) - 1.0).abs() < 1e-12);
        assert!(annualization(YearIndex(2), &weights, 0.05) < 1.0);
    }

    #[test]
    fn test_cut_reduces_to_upper_bound_at_anchor_point() {
        let n = 1;
        let y = 1;
        let candidate = CandidateSolution {
            s_rated: vec![vec![Power(3.0)]],
            e_rated: vec![vec![Energy(5.0)]],
        };
        let cut = BendersCut {
            upper_bound: Money(42.0),
            sigma_s: vec![vec![-1.5]],
            sigma_e: vec![vec![-0.5]],
            s_hat: candidate.s_rated.clone(),
            e_hat: candidate.e_rated.clone(),
        };
        let _ = (n, y);

        assert_eq!(cut.evaluate_at(&candidate), Money(42.0));
    }

    #[test]
    fn test_cut_is_lower_bound_away_from_anchor() {
        let anchor = CandidateSolution {
            s_rated: vec![vec![Power(3.0)]],
            e_rated: vec![vec![Energy(5.0)]],
        };
        let cut = BendersCut {
            upper_bound: Money(42.0),
            sigma_s: vec![vec![2.0]],
            sigma_e: vec![vec![1.0]],
            s_hat: anchor.s_rated.clone(),
            e_hat: anchor.e_rated.clone(),
        };
        let moved = CandidateSolution {
            s_rated: vec![vec![Power(4.0)]],
            e_rated: vec![vec![Energy(6.0)]],
        };

        // sigma positive and moving up should raise the cut's bound above UB_k.
        assert!(cut.evaluate_at(&moved).0 > 42.0);
    }
}
