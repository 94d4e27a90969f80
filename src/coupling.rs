//! [`SubproblemCoupling`] (§4.3): the adapter between the core coordination loops and one
//! network's opaque operational model.
//!
//! Per the design notes (§9), the underlying optimisation-framework model is never named here.
//! Instead each network exposes a narrow [`Subproblem`] trait, which both isolates the modelling
//! framework choice and lets the coordination loops be exercised against [`MockSubproblem`]
//! without a real solver.
use crate::consensus::{ConsensusRecord, ConsensusStore, DualRecord};
use crate::index::{DayIndex, InstantIndex, Role, SiteIndex, YearIndex};
use crate::master::CandidateSolution;
use crate::network::NetworkData;
use crate::parameters::Parameters;
use crate::units::Money;
use anyhow::Result;
use std::collections::HashMap;

/// Outcome of a single solve of a network's operational model.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Failed(String),
}

/// The result of [`Subproblem::solve`]: status plus the resulting objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub objective: Money,
}

/// Local sensitivity of the subproblem's Lagrangian with respect to one site's rated capacity, at
/// one representative day, evaluated at the current solution (§4.5 step c).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sensitivity {
    pub d_power: f64,
    pub d_energy: f64,
}

/// Scaled-ADMM penalty weights bound into a network's model for the lifetime of one inner run.
#[derive(Debug, Clone, Copy)]
pub struct PenaltyWeights {
    pub rho_pf: f64,
    pub rho_ess: f64,
}

/// Request pushed into the subproblem for one ADMM iteration, at one consensus slot: the
/// counterpart's current value (averaged into the consensus target by the coordinator) and this
/// role's scaled dual.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterationInput {
    pub target: ConsensusRecord,
    pub dual: DualRecord,
}

/// The narrow interface a network's opaque operational model must provide.
///
/// An implementation is free to back this however it likes (an NLP built against a solver
/// library's own modelling API, a surrogate, or — in tests — [`MockSubproblem`]). The core never
/// inspects anything beyond what these methods expose.
pub trait Subproblem {
    /// Base MVA used to interpret the per-unit quantities this model exchanges.
    fn base_mva(&self) -> f64;

    /// Fix the SESS entities' installed capacity from a Benders candidate (§4.2, §4.3).
    fn fix_capacity(&mut self, candidate: &CandidateSolution) -> Result<()>;

    /// Switch the model into ADMM mode: bind the penalty weights and the initial interface power
    /// used to normalise the consensus residual (§4.4.1).
    fn bind_for_admm(&mut self, initial_pf_magnitude: f64, weights: PenaltyWeights) -> Result<()>;

    /// Push this iteration's consensus targets and duals for one (year, day, instant) slot.
    fn push_iteration_input(
        &mut self,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
        input: IterationInput,
    ) -> Result<()>;

    /// Solve the model for every (year, day) it covers in one call.
    fn solve(&mut self, warm_start: bool) -> Result<SolveOutcome>;

    /// Read back this model's expected interface voltage magnitude and consensus quantities for
    /// one (year, day, instant) slot, after a successful solve.
    fn pull_outputs(
        &self,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
    ) -> (f64, ConsensusRecord);

    /// Per-(year, day) objective contribution from the last solve (§4.5's UB formula sums these,
    /// weighted by day weight, over the TSO's contribution only).
    fn objective_by_day(&self) -> HashMap<(YearIndex, DayIndex), Money>;

    /// Local sensitivities of the Lagrangian with respect to each site's rated capacity, at each
    /// (year, day), evaluated at the last solve. Only meaningful for the TSO model (§4.5); DSO
    /// implementations may return an empty map.
    fn sensitivities(&self) -> HashMap<(SiteIndex, YearIndex, DayIndex), Sensitivity>;
}

/// The `NetworkModelBuilder` external collaborator (§6 item 2): given one network's opaque data
/// and the role it plays, produces the [`Subproblem`] that will back it for the lifetime of a
/// planning run. The core never implements this itself; it is supplied by whatever optimisation
/// framework the caller wires in (see [`crate::orchestrator::PlanningOrchestrator`]).
pub trait NetworkModelBuilder {
    /// Build the operational model for one network.
    fn build(
        &self,
        network: &NetworkData,
        role: Role,
        params: &Parameters,
    ) -> Result<Box<dyn Subproblem>>;
}

/// Adapter wrapping one network's [`Subproblem`], translating between the coordination loops'
/// [`ConsensusStore`]-shaped view and the model's per-slot calls.
pub struct SubproblemCoupling {
    role: Role,
    /// Sites this network has a boundary with: all active DN nodes for the TSO, just its own for
    /// a DSO.
    sites: Vec<SiteIndex>,
    years: Vec<YearIndex>,
    days: Vec<DayIndex>,
    num_instants: usize,
    model: Box<dyn Subproblem>,
}

impl SubproblemCoupling {
    pub fn new(
        role: Role,
        sites: Vec<SiteIndex>,
        num_years: usize,
        num_days: usize,
        num_instants: usize,
        model: Box<dyn Subproblem>,
    ) -> Self {
        Self {
            role,
            sites,
            years: (0..num_years).map(YearIndex).collect(),
            days: (0..num_days).map(DayIndex).collect(),
            num_instants,
            model,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn sites(&self) -> &[SiteIndex] {
        &self.sites
    }

    pub fn years(&self) -> &[YearIndex] {
        &self.years
    }

    pub fn days(&self) -> &[DayIndex] {
        &self.days
    }

    pub fn num_instants(&self) -> usize {
        self.num_instants
    }

    /// Fix SESS capacity from the current Benders candidate (§4.3).
    pub fn fix_capacity(&mut self, candidate: &CandidateSolution) -> Result<()> {
        self.model.fix_capacity(candidate)
    }

    /// Solve once with capacity fixed and no ADMM coupling, to obtain the baseline interface
    /// power used to normalise the ADMM residual (§4.4.1).
    pub fn solve_baseline(&mut self) -> Result<SolveOutcome> {
        self.model.solve(false)
    }

    /// Bind ADMM mode using the magnitude observed from a baseline solve.
    pub fn bind_for_admm(&mut self, initial_pf_magnitude: f64, weights: PenaltyWeights) -> Result<()> {
        self.model.bind_for_admm(initial_pf_magnitude, weights)
    }

    /// Push this role's consensus targets and its own scaled duals for every slot this network
    /// owns. `targets` supplies the (already-averaged) consensus value for each slot; duals are
    /// read from the store under this network's own role.
    pub fn push_iteration_inputs(
        &mut self,
        store: &ConsensusStore,
        targets: &HashMap<(SiteIndex, YearIndex, DayIndex, InstantIndex), ConsensusRecord>,
    ) -> Result<()> {
        for &site in &self.sites {
            for &year in &self.years {
                for &day in &self.days {
                    for instant in (0..self.num_instants).map(InstantIndex) {
                        let target = targets
                            .get(&(site, year, day, instant))
                            .copied()
                            .unwrap_or_default();
                        let dual = store.read_dual(self.role, site, year, day, instant);
                        self.model
                            .push_iteration_input(year, day, instant, IterationInput { target, dual })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Solve the bound model.
    pub fn solve(&mut self, warm_start: bool) -> Result<SolveOutcome> {
        self.model.solve(warm_start)
    }

    /// Pull this role's outputs back into the shared [`ConsensusStore`] for every slot this
    /// network owns. Voltage is only ever written by the TSO's coupling (§4.1).
    pub fn pull_outputs(&self, store: &mut ConsensusStore) {
        for &site in &self.sites {
            for &year in &self.years {
                for &day in &self.days {
                    for instant in (0..self.num_instants).map(InstantIndex) {
                        let (voltage, record) = self.model.pull_outputs(year, day, instant);
                        store.write(self.role, site, year, day, instant, record);
                        if self.role == Role::Tso {
                            store.write_voltage(site, year, day, instant, voltage);
                        }
                    }
                }
            }
        }
    }

    /// Day-weighted objective, used by the Benders coordinator's upper-bound computation. Callers
    /// are expected to apply the day weight and discount factor themselves; this only exposes the
    /// raw per-(year, day) contribution.
    pub fn objective_by_day(&self) -> HashMap<(YearIndex, DayIndex), Money> {
        self.model.objective_by_day()
    }

    /// Local sensitivities with respect to rated capacity at each site and (year, day), for cut
    /// generation.
    pub fn sensitivities(&self) -> HashMap<(SiteIndex, YearIndex, DayIndex), Sensitivity> {
        self.model.sensitivities()
    }
}

/// A trivial in-memory [`Subproblem`] used by unit and integration tests. Tracks a quadratic
/// proxy cost around a fixed target so that ADMM iteration on it actually converges.
#[cfg(any(test, feature = "test-support"))]
pub struct MockSubproblem {
    pub base_mva: f64,
    capacity: Option<CandidateSolution>,
    weights: Option<PenaltyWeights>,
    inputs: HashMap<(YearIndex, DayIndex, InstantIndex), IterationInput>,
    outputs: HashMap<(YearIndex, DayIndex, InstantIndex), (f64, ConsensusRecord)>,
    last_objective: HashMap<(YearIndex, DayIndex), Money>,
    solve_calls: u32,
    /// If set, the `solve` call with this 1-based call index reports [`SolveStatus::Failed`]
    /// instead of updating `outputs`, exercising the §7 solver-failure recovery path.
    fail_on_call: Option<u32>,
}

#[cfg(any(test, feature = "test-support"))]
impl MockSubproblem {
    pub fn new(base_mva: f64) -> Self {
        Self {
            base_mva,
            capacity: None,
            weights: None,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            last_objective: HashMap::new(),
            solve_calls: 0,
            fail_on_call: None,
        }
    }

    /// Make the `n`th call (1-based) to [`Subproblem::solve`] report a failure instead of solving,
    /// to exercise §7's solver-failure recovery path in tests.
    pub fn failing_on_call(mut self, n: u32) -> Self {
        self.fail_on_call = Some(n);
        self
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Subproblem for MockSubproblem {
    fn base_mva(&self) -> f64 {
        self.base_mva
    }

    fn fix_capacity(&mut self, candidate: &CandidateSolution) -> Result<()> {
        self.capacity = Some(candidate.clone());
        Ok(())
    }

    fn bind_for_admm(&mut self, _initial_pf_magnitude: f64, weights: PenaltyWeights) -> Result<()> {
        self.weights = Some(weights);
        Ok(())
    }

    fn push_iteration_input(
        &mut self,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
        input: IterationInput,
    ) -> Result<()> {
        self.inputs.insert((year, day, instant), input);
        Ok(())
    }

    fn solve(&mut self, _warm_start: bool) -> Result<SolveOutcome> {
        self.solve_calls += 1;
        if self.fail_on_call == Some(self.solve_calls) {
            // Leave `outputs` untouched: the coupling reuses last iteration's feasible values.
            return Ok(SolveOutcome {
                status: SolveStatus::Failed("injected test failure".to_string()),
                objective: Money(self.last_objective.values().map(|m| m.0).sum()),
            });
        }

        // The mock "solves" by moving halfway from its current output toward whatever target was
        // pushed for it, mimicking a convex local model settling toward the consensus value.
        for (&slot, input) in &self.inputs {
            let (_, current) = self
                .outputs
                .get(&slot)
                .copied()
                .unwrap_or((1.0, ConsensusRecord::default()));
            let next = ConsensusRecord {
                p_pf: (current.p_pf + input.target.p_pf) / 2.0,
                q_pf: (current.q_pf + input.target.q_pf) / 2.0,
                p_ess: (current.p_ess + input.target.p_ess) / 2.0,
                q_ess: (current.q_ess + input.target.q_ess) / 2.0,
            };
            self.outputs.insert(slot, (1.0, next));
            self.last_objective.insert(
                (slot.0, slot.1),
                Money(next.p_pf.powi(2) + next.q_pf.powi(2)),
            );
        }
        Ok(SolveOutcome {
            status: SolveStatus::Optimal,
            objective: Money(self.last_objective.values().map(|m| m.0).sum()),
        })
    }

    fn pull_outputs(
        &self,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
    ) -> (f64, ConsensusRecord) {
        self.outputs
            .get(&(year, day, instant))
            .copied()
            .unwrap_or((1.0, ConsensusRecord::default()))
    }

    fn objective_by_day(&self) -> HashMap<(YearIndex, DayIndex), Money> {
        self.last_objective.clone()
    }

    fn sensitivities(&self) -> HashMap<(SiteIndex, YearIndex, DayIndex), Sensitivity> {
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusStore;

    fn coupling(role: Role, sites: Vec<SiteIndex>) -> SubproblemCoupling {
        SubproblemCoupling::new(role, sites, 1, 1, 2, Box::new(MockSubproblem::new(100.0)))
    }

    #[test]
    fn test_push_then_solve_then_pull_round_trips_through_store() {
        let mut store = ConsensusStore::new();
        let site = SiteIndex(0);
        let mut targets = HashMap::new();
        targets.insert(
            (site, YearIndex(0), DayIndex(0), InstantIndex(0)),
            ConsensusRecord {
                p_pf: 2.0,
                ..Default::default()
            },
        );

        let mut tso = coupling(Role::Tso, vec![site]);
        tso.push_iteration_inputs(&store, &targets).unwrap();
        tso.solve(false).unwrap();
        tso.pull_outputs(&mut store);

        let result = store.read(Role::Tso, site, YearIndex(0), DayIndex(0), InstantIndex(0));
        // mock moves halfway from its zero-initialised output toward the target p_pf = 2.0
        assert!((result.p_pf - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_tso_coupling_writes_voltage() {
        let mut store = ConsensusStore::new();
        let site = SiteIndex(0);

        let mut dso = coupling(Role::Dso, vec![site]);
        dso.solve(false).unwrap();
        dso.pull_outputs(&mut store);

        // No voltage should have been written by a DSO's coupling.
        assert_eq!(
            store.read_voltage(site, YearIndex(0), DayIndex(0), InstantIndex(0)),
            0.0
        );
    }
}
