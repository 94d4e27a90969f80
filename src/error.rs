//! The structured error taxonomy the orchestrator uses to pick a process exit code.
//!
//! Everywhere else in the crate, errors propagate as `anyhow::Error` via `?`, same as the rest of
//! the codebase. `EngineError` exists only at the boundary the orchestrator reports through: it is
//! the thing [`crate::cli::run_cli`] downcasts an `anyhow::Error` chain against to choose an exit
//! code and a single-line diagnostic.
use crate::index::{DayIndex, YearIndex};

/// A role-qualified identifier for the subproblem a [`EngineError::SolverFailure`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SubproblemRole {
    /// The transmission system operator's subproblem.
    #[strum(to_string = "TSO")]
    Tso,
    /// A distribution system operator's subproblem, identified by its site.
    #[strum(to_string = "DSO[{0}]")]
    Dso(usize),
}

/// Which of the two coordination loops failed to converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum NonConvergenceKind {
    /// The inner ADMM loop did not reach consensus within its iteration budget.
    Admm,
    /// The outer Benders loop did not close its lower/upper bound gap within its iteration budget.
    Benders,
}

/// Error kinds recognised by the planning engine, per the error design in the specification.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A configuration value was missing, out of range, or internally inconsistent. Terminates
    /// before any solve is attempted.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A case data file could not be read or parsed. Terminates before any solve is attempted.
    #[error("data file error: {0}")]
    DataFileError(String),

    /// A subproblem solve failed for a particular role, year and day. Non-fatal: the coordinator
    /// logs this and proceeds with the last known feasible outputs for that subproblem.
    #[error("solver failure for {role} at year {year:?}, day {day:?}: {reason}")]
    SolverFailure {
        /// Which subproblem failed.
        role: SubproblemRole,
        /// The year of the representative-day solve that failed.
        year: YearIndex,
        /// The day of the representative-day solve that failed.
        day: DayIndex,
        /// The solver's reported status or failure reason.
        reason: String,
    },

    /// A coordination loop did not converge within its iteration budget. Non-fatal: results are
    /// produced from the last iterate and marked as not converged.
    #[error("{kind} did not converge within the iteration budget")]
    NonConvergence {
        /// Which loop failed to converge.
        kind: NonConvergenceKind,
    },
}

impl EngineError {
    /// The process exit code associated with this error kind, one per kind as required by the
    /// error handling design.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidConfiguration(_) => 2,
            EngineError::DataFileError(_) => 3,
            EngineError::SolverFailure { .. } => 4,
            EngineError::NonConvergence { .. } => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let errors = [
            EngineError::InvalidConfiguration("bad".into()),
            EngineError::DataFileError("missing".into()),
            EngineError::SolverFailure {
                role: SubproblemRole::Tso,
                year: YearIndex(0),
                day: DayIndex(0),
                reason: "infeasible".into(),
            },
            EngineError::NonConvergence {
                kind: NonConvergenceKind::Admm,
            },
        ];
        let codes: Vec<i32> = errors.iter().map(EngineError::exit_code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(codes.len(), sorted.len(), "exit codes must be distinct");
    }

    #[test]
    fn test_solver_failure_message_includes_role_and_indices() {
        let err = EngineError::SolverFailure {
            role: SubproblemRole::Dso(2),
            year: YearIndex(1),
            day: DayIndex(3),
            reason: "did not converge".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DSO[2]"));
        assert!(msg.contains("did not converge"));
    }
}
