//! [`ConsensusStore`] (§4.1): the single mutable structure shared between the TSO and DSO
//! subproblem adapters during ADMM.
//!
//! Per the design notes (§9), the reference implementation's nested role→node→year→day→quantity→
//! instant mappings are flattened here into an [`IndexMap`] keyed by a small descriptor struct,
//! the same pattern the reference dispatch-optimisation model uses for its `VariableMap`
//! (`VariableMapKey` → `Col`). Ownership is exclusive to `ConsensusStore`; adapters only ever see
//! borrowed snapshots via `read`/`write`.
use crate::index::{DayIndex, InstantIndex, Role, SiteIndex, YearIndex};
use indexmap::IndexMap;

/// Identifies one (role, site, year, day, instant) slot in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsensusKey {
    pub role: Role,
    pub site: SiteIndex,
    pub year: YearIndex,
    pub day: DayIndex,
    pub instant: InstantIndex,
}

impl ConsensusKey {
    pub fn new(
        role: Role,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
    ) -> Self {
        Self {
            role,
            site,
            year,
            day,
            instant,
        }
    }
}

/// One operator's copy of the interface-PF and shared-ESS consensus quantities for a given slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConsensusRecord {
    pub p_pf: f64,
    pub q_pf: f64,
    pub p_ess: f64,
    pub q_ess: f64,
}

/// The scaled-dual (multiplier) pair for both couplings, for one role at one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DualRecord {
    pub lambda_pf_p: f64,
    pub lambda_pf_q: f64,
    pub lambda_ess_p: f64,
    pub lambda_ess_q: f64,
}

/// Holds the triple (current, previous-iteration, dual) for every consensus slot, plus the
/// TSO-owned interface voltage magnitude, which has no DSO copy and no dual.
///
/// Single-writer per ADMM phase (§4.1): within one ADMM iteration, only the role currently being
/// solved writes its own slots, per the ordering guarantees in §5.
#[derive(Debug, Clone, Default)]
pub struct ConsensusStore {
    current: IndexMap<ConsensusKey, ConsensusRecord>,
    previous: IndexMap<ConsensusKey, ConsensusRecord>,
    duals: IndexMap<ConsensusKey, DualRecord>,
    voltage: IndexMap<(SiteIndex, YearIndex, DayIndex, InstantIndex), f64>,
}

impl ConsensusStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every current value into `previous`, discarding the old previous state. Idempotent:
    /// calling this twice with no intervening write leaves `previous` unchanged the second time.
    pub fn snapshot_current_as_previous(&mut self) {
        self.previous = self.current.clone();
    }

    /// Read a role's current consensus record at the given slot, defaulting to zero if nothing
    /// has been written yet (the state before the first operational solve).
    pub fn read(
        &self,
        role: Role,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
    ) -> ConsensusRecord {
        let key = ConsensusKey::new(role, site, year, day, instant);
        self.current.get(&key).copied().unwrap_or_default()
    }

    /// Read a role's consensus record from the previous iteration's snapshot.
    pub fn read_previous(
        &self,
        role: Role,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
    ) -> ConsensusRecord {
        let key = ConsensusKey::new(role, site, year, day, instant);
        self.previous.get(&key).copied().unwrap_or_default()
    }

    /// Overwrite a role's current consensus record at the given slot.
    pub fn write(
        &mut self,
        role: Role,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
        value: ConsensusRecord,
    ) {
        let key = ConsensusKey::new(role, site, year, day, instant);
        self.current.insert(key, value);
    }

    /// Read a role's scaled dual at the given slot, defaulting to zero.
    pub fn read_dual(
        &self,
        role: Role,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
    ) -> DualRecord {
        let key = ConsensusKey::new(role, site, year, day, instant);
        self.duals.get(&key).copied().unwrap_or_default()
    }

    /// Overwrite a role's scaled dual at the given slot.
    pub fn write_dual(
        &mut self,
        role: Role,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
        value: DualRecord,
    ) {
        let key = ConsensusKey::new(role, site, year, day, instant);
        self.duals.insert(key, value);
    }

    /// Read the TSO-owned interface voltage magnitude, defaulting to zero.
    pub fn read_voltage(
        &self,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
    ) -> f64 {
        self.voltage
            .get(&(site, year, day, instant))
            .copied()
            .unwrap_or_default()
    }

    /// Write the TSO-owned interface voltage magnitude.
    pub fn write_voltage(
        &mut self,
        site: SiteIndex,
        year: YearIndex,
        day: DayIndex,
        instant: InstantIndex,
        value: f64,
    ) {
        self.voltage.insert((site, year, day, instant), value);
    }
}
