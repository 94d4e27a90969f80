//! Defines [`Parameters`], the immutable bundle of tolerances, penalties, budgets and mode flags
//! read once from a case's `parameters.toml` file and threaded through every coordination
//! component, following the same file-backed, validate-after-deserialize pattern as the reference
//! model's `model::parameters::ModelParameters`. Keeping these as a single struct rather than as
//! module-level constants avoids the global state the design notes (§9) warn against.
use crate::id::define_id_getter;
use crate::input::read_toml;
use crate::units::{Dimensionless, Energy, Money, Years};
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::path::Path;

const PARAMETERS_FILE_NAME: &str = "parameters.toml";

fn default_error_precision() -> f64 {
    1e-6
}

fn default_admm_convergence_rel_tol() -> f64 {
    1e-3
}

/// Which operator's objective feeds the operational subproblems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum, Default)]
pub enum ObjType {
    /// Minimise total operating cost.
    #[default]
    #[string = "cost"]
    Cost,
    /// Minimise a congestion-management surrogate objective.
    #[string = "congestion_management"]
    CongestionManagement,
}

/// Boolean switches that change the operational subproblem's relaxation surface. The core treats
/// these as opaque flags threaded through to `NetworkModelBuilder`; it never inspects their
/// effect on the subproblem itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct RelaxationFlags {
    pub transf_reg: bool,
    pub es_reg: bool,
    pub fl_reg: bool,
    pub rg_curt: bool,
    pub l_curt: bool,
    pub relaxed_model: bool,
    pub ess_relax: bool,
    pub fl_relax: bool,
    pub enforce_vg: bool,
    pub slack_line_limits: bool,
    pub slack_voltage_limits: bool,
}

impl RelaxationFlags {
    /// Apply the forcing rule from the configuration design: `relaxed_model` forces on
    /// `ess_relax` and `fl_relax`.
    pub fn normalised(mut self) -> Self {
        if self.relaxed_model {
            self.ess_relax = true;
            self.fl_relax = true;
        }
        self
    }
}

/// A value that may differ between the TSO and a DSO (ADMM penalties).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PerRole<T> {
    pub tso: T,
    pub dso: T,
}

impl<T: Copy> PerRole<T> {
    /// Get the value for the given role.
    pub fn get(&self, role: crate::index::Role) -> T {
        match role {
            crate::index::Role::Tso => self.tso,
            crate::index::Role::Dso => self.dso,
        }
    }
}

fn default_rho() -> PerRole<f64> {
    PerRole { tso: 1.0, dso: 1.0 }
}

/// ADMM coordination parameters (§6.3).
#[derive(Debug, Clone, Deserialize)]
pub struct AdmmParameters {
    /// Maximum number of inner iterations before giving up.
    pub num_max_iters: u32,
    /// Consensus and stationary-residual tolerance.
    pub tol: f64,
    /// Per-role penalty on the interface power-flow coupling.
    #[serde(default = "default_rho")]
    pub rho_pf: PerRole<f64>,
    /// Per-role penalty on the shared-ESS dispatch coupling.
    #[serde(default = "default_rho")]
    pub rho_ess: PerRole<f64>,
    /// Whether to increment penalties multiplicatively each iteration.
    #[serde(default)]
    pub adaptive_penalty: bool,
    /// Multiplicative increment applied to both `rho_pf` and `rho_ess` each iteration when
    /// `adaptive_penalty` is set. Per the design notes (§9), both updates derive from the
    /// current `rho_pf` value.
    #[serde(default)]
    pub adaptive_penalty_factor: f64,
    /// Whether the PF dual update increments both `p` and `q` uniformly on both roles, or
    /// reproduces the source asymmetry (only `q` incremented for the TSO role). See the
    /// open question in §9; default is the uniform, symmetric behaviour.
    #[serde(default = "default_true")]
    pub symmetric_pf_dual_update: bool,
}

fn default_true() -> bool {
    true
}

/// Benders decomposition parameters (§6.3).
#[derive(Debug, Clone, Deserialize)]
pub struct BendersParameters {
    /// Maximum number of outer iterations before giving up.
    pub num_max_iters: u32,
    /// Absolute gap tolerance between upper and lower bound.
    pub tol_abs: f64,
    /// Relative gap tolerance between upper and lower bound.
    pub tol_rel: f64,
}

/// Per-site SESS physical and lifecycle parameters (§6.3).
#[derive(Debug, Clone, Deserialize)]
pub struct SiteParameters {
    /// Site identifier, matching an active DN node in the loaded network data.
    pub id: String,
    /// Calendar life of an investment at this site, in years.
    pub t_cal: u32,
    /// Initial state of charge as a fraction of installed energy capacity.
    pub relative_init_soc: f64,
    /// Minimum energy stored as a fraction of installed energy capacity.
    pub min_energy_stored: f64,
    /// Maximum energy stored as a fraction of installed energy capacity.
    pub max_energy_stored: f64,
}
define_id_getter!(SiteParameters);

/// SESS investment parameters shared across all sites (§6.3, §4.2).
#[derive(Debug, Clone, Deserialize)]
pub struct SessParameters {
    /// Total discounted investment budget.
    pub budget: f64,
    /// Maximum installable energy capacity at any one site.
    pub max_capacity: f64,
    /// Minimum power/energy ratio for an installed site with nonzero energy.
    pub min_pe_factor: f64,
    /// Maximum power/energy ratio for an installed site with nonzero energy.
    pub max_pe_factor: f64,
    /// Per-site lifecycle and operating-range parameters.
    pub sites: Vec<SiteParameters>,
}

/// The full, immutable parameter bundle for one planning run.
///
/// NOTE: if you add or change a field here, update a case's `parameters.toml` schema
/// documentation alongside it.
#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    /// Which operator's objective is used to compute the Benders upper bound and which
    /// objective the operational subproblems are built with.
    #[serde(default)]
    pub obj_type: ObjType,
    /// Relaxation switches passed through to `NetworkModelBuilder`.
    #[serde(default)]
    pub relaxation: RelaxationFlags,
    /// Benders outer-loop parameters.
    pub benders: BendersParameters,
    /// ADMM inner-loop parameters.
    pub admm: AdmmParameters,
    /// SESS investment parameters.
    pub sess: SessParameters,
    /// Rounding scale used to suppress solver noise in convergence checks.
    #[serde(default = "default_error_precision")]
    pub error_precision: f64,
    /// Relative tolerance used when comparing a residual sum to its threshold "within tolerance".
    #[serde(default = "default_admm_convergence_rel_tol")]
    pub admm_convergence_rel_tol: f64,
}

impl Parameters {
    /// Read parameters from the given case directory.
    ///
    /// # Arguments
    ///
    /// * `case_dir` - Folder containing the case's configuration files.
    pub fn from_path<P: AsRef<Path>>(case_dir: P) -> Result<Parameters> {
        let file_path = case_dir.as_ref().join(PARAMETERS_FILE_NAME);
        let mut params: Parameters = read_toml(&file_path)?;
        params.relaxation = params.relaxation.normalised();

        params
            .validate()
            .with_context(|| format!("Error reading {}", file_path.display()))?;

        Ok(params)
    }

    /// Validate parameters after reading the file.
    fn validate(&self) -> Result<()> {
        ensure!(
            self.sess.min_pe_factor > 0.0 && self.sess.min_pe_factor <= self.sess.max_pe_factor,
            "min_pe_factor must be positive and no greater than max_pe_factor"
        );
        ensure!(
            self.sess.budget >= 0.0,
            "sess.budget must be non-negative"
        );
        ensure!(
            self.sess.max_capacity >= 0.0,
            "sess.max_capacity must be non-negative"
        );
        for site in &self.sess.sites {
            ensure!(
                (0.0..=1.0).contains(&site.relative_init_soc),
                "relative_init_soc for site '{}' must be in [0, 1]",
                site.id
            );
            ensure!(
                site.min_energy_stored <= site.max_energy_stored,
                "min_energy_stored must be <= max_energy_stored for site '{}'",
                site.id
            );
        }
        ensure!(
            self.benders.num_max_iters > 0,
            "benders.num_max_iters cannot be zero"
        );
        ensure!(
            self.admm.num_max_iters > 0,
            "admm.num_max_iters cannot be zero"
        );
        ensure!(
            self.admm.tol >= 0.0 && self.admm.tol.is_finite(),
            "admm.tol must be a finite, non-negative number"
        );
        ensure!(
            self.error_precision > 0.0,
            "error_precision must be positive"
        );

        Ok(())
    }

    /// Budget expressed as [`Money`].
    pub fn budget(&self) -> Money {
        Money(self.sess.budget)
    }

    /// Maximum per-site capacity expressed as [`Energy`].
    pub fn max_capacity(&self) -> Energy {
        Energy(self.sess.max_capacity)
    }

    /// `min_pe_factor` as a [`Dimensionless`] ratio.
    pub fn min_pe_factor(&self) -> Dimensionless {
        Dimensionless(self.sess.min_pe_factor)
    }

    /// `max_pe_factor` as a [`Dimensionless`] ratio.
    pub fn max_pe_factor(&self) -> Dimensionless {
        Dimensionless(self.sess.max_pe_factor)
    }

    /// Calendar life of the given site as [`Years`].
    pub fn calendar_life(&self, site_index: usize) -> Years {
        Years(self.sess.sites[site_index].t_cal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const MINIMAL_TOML: &str = r#"
[benders]
num_max_iters = 20
tol_abs = 1.0
tol_rel = 0.01

[admm]
num_max_iters = 50
tol = 1e-4

[sess]
budget = 100.0
max_capacity = 10.0
min_pe_factor = 0.2
max_pe_factor = 2.0

[[sess.sites]]
id = "site-a"
t_cal = 10
relative_init_soc = 0.5
min_energy_stored = 0.1
max_energy_stored = 0.9
"#;

    fn write_params(dir: &Path, contents: &str) {
        let mut file = File::create(dir.join(PARAMETERS_FILE_NAME)).unwrap();
        writeln!(file, "{contents}").unwrap();
    }

    #[test]
    fn test_parameters_from_path_minimal() {
        let dir = tempdir().unwrap();
        write_params(dir.path(), MINIMAL_TOML);

        let params = Parameters::from_path(dir.path()).unwrap();
        assert_eq!(params.obj_type, ObjType::Cost);
        assert_eq!(params.sess.sites.len(), 1);
        assert_eq!(params.admm.rho_pf.tso, 1.0);
    }

    #[test]
    fn test_relaxed_model_forces_relax_flags() {
        let flags = RelaxationFlags {
            relaxed_model: true,
            ..Default::default()
        }
        .normalised();

        assert!(flags.ess_relax);
        assert!(flags.fl_relax);
    }

    #[test]
    fn test_from_path_normalises_relaxation_flags() {
        let dir = tempdir().unwrap();
        let toml = format!("{MINIMAL_TOML}\n[relaxation]\nrelaxed_model = true\n");
        write_params(dir.path(), &toml);

        let params = Parameters::from_path(dir.path()).unwrap();
        assert!(params.relaxation.ess_relax);
        assert!(params.relaxation.fl_relax);
    }

    #[rstest]
    #[case(0.2, 2.0, true)]
    #[case(0.0, 2.0, false)] // zero min_pe_factor is invalid
    #[case(3.0, 2.0, false)] // min > max is invalid
    fn test_validate_pe_factor_bounds(
        #[case] min_pe: f64,
        #[case] max_pe: f64,
        #[case] expected_valid: bool,
    ) {
        let dir = tempdir().unwrap();
        let toml = MINIMAL_TOML
            .replace("min_pe_factor = 0.2", &format!("min_pe_factor = {min_pe}"))
            .replace("max_pe_factor = 2.0", &format!("max_pe_factor = {max_pe}"));
        write_params(dir.path(), &toml);

        let result = Parameters::from_path(dir.path());
        assert_eq!(result.is_ok(), expected_valid);
    }

    #[test]
    fn test_missing_file_is_data_file_error() {
        let dir = tempdir().unwrap();
        assert!(Parameters::from_path(dir.path()).is_err());
    }
}
