//! The `NetworkLoader` boundary (§6.1): reads case-level indices (years, representative days,
//! investment costs, active DN nodes) from simple CSV/TOML files. Per-network electrical data
//! itself is out of scope for the core — it is handed opaquely to a `NetworkModelBuilder`/
//! [`crate::coupling::Subproblem`] factory, which this module never inspects.
//!
//! Grounded on the reference model's CSV-reading idiom (`input::read_csv`) and TOML-reading idiom
//! (`input::read_toml`).
use crate::id::{IDMap, define_id_getter};
use crate::input::{read_csv, read_toml};
use crate::units::Money;
use anyhow::{Result, ensure};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CASE_FILE_NAME: &str = "case.toml";

/// A row of `years.csv`: a milestone year label and the number of real years it represents.
#[derive(Debug, Clone, Deserialize)]
pub struct YearRow {
    pub label: String,
    pub weight_years: f64,
}

/// A row of `days.csv`: a representative day label and its weight in days/year.
#[derive(Debug, Clone, Deserialize)]
pub struct DayRow {
    pub label: String,
    pub weight_days: f64,
}

/// A row of `investment_costs.csv`: per-year unit cost of power and energy capacity.
#[derive(Debug, Clone, Deserialize)]
pub struct InvestmentCostRow {
    pub year_label: String,
    pub power_cost: f64,
    pub energy_cost: f64,
}

/// The per-year unit investment costs used by the master problem (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct InvestmentCost {
    /// Cost per unit of rated power.
    pub power: Money,
    /// Cost per unit of rated energy.
    pub energy: Money,
}

/// The top-level `case.toml` contents: everything the core needs that isn't a per-network payload.
#[derive(Debug, Clone, Deserialize)]
struct CaseFile {
    num_instants: usize,
    discount_factor: f64,
    active_dn_nodes: Vec<String>,
}

/// Opaque handle to one network's (TSO or DSO) electrical data and model-building entry point.
///
/// The core treats this as a capability token: it is threaded through to a
/// [`crate::coupling::Subproblem`] factory and never read directly.
#[derive(Debug, Clone)]
pub struct NetworkData {
    /// A human-readable identifier (e.g. the DN node name for a DSO, or "transmission" for TSO).
    pub id: String,
    /// Directory containing this network's model-building input files.
    pub data_dir: PathBuf,
}
define_id_getter!(NetworkData);

/// Case-level data produced by the `NetworkLoader` boundary.
#[derive(Debug, Clone)]
pub struct CaseData {
    /// Milestone years, in order, with their real-year weights.
    pub years: Vec<YearRow>,
    /// Representative days with their days/year weights.
    pub days: Vec<DayRow>,
    /// Number of intra-day instants, uniform across days.
    pub num_instants: usize,
    /// Annual discount rate used to annualise investment cost.
    pub discount_factor: f64,
    /// Active DN node IDs; one-to-one with candidate SESS sites and with DSOs.
    pub active_dn_nodes: Vec<String>,
    /// Per-year investment cost, keyed by year label.
    pub investment_costs: HashMap<String, InvestmentCost>,
    /// The TSO's network data.
    pub tso_network: NetworkData,
    /// Each DSO's network data, in the same order as `active_dn_nodes`.
    pub dso_networks: Vec<NetworkData>,
}

impl CaseData {
    /// Investment cost for the given year label.
    ///
    /// # Returns
    ///
    /// An error if no cost was supplied for that year.
    pub fn investment_cost(&self, year_label: &str) -> Result<InvestmentCost> {
        self.investment_costs.get_checked(year_label).copied()
    }
}

/// Read case-level data from a case directory.
///
/// # Arguments
///
/// * `case_dir` - Folder containing `case.toml`, `years.csv`, `days.csv` and
///   `investment_costs.csv`, plus one subdirectory per network named after its ID (or
///   `transmission` for the TSO).
pub fn load_case<P: AsRef<Path>>(case_dir: P) -> Result<CaseData> {
    let case_dir = case_dir.as_ref();

    let case_file: CaseFile = read_toml(&case_dir.join(CASE_FILE_NAME))?;
    ensure!(
        !case_file.active_dn_nodes.is_empty(),
        "case.toml must list at least one active DN node"
    );
    ensure!(
        case_file.num_instants > 0,
        "num_instants must be greater than zero"
    );

    let years: Vec<YearRow> = read_csv(&case_dir.join("years.csv"))?.collect();
    ensure!(!years.is_empty(), "years.csv must not be empty");

    let days: Vec<DayRow> = read_csv(&case_dir.join("days.csv"))?.collect();
    ensure!(!days.is_empty(), "days.csv must not be empty");
    let total_day_weight: f64 = days.iter().map(|d| d.weight_days).sum();
    ensure!(
        total_day_weight <= 365.0 + 1e-6,
        "representative day weights sum to {total_day_weight}, which exceeds 365"
    );

    let cost_rows: Vec<InvestmentCostRow> =
        read_csv(&case_dir.join("investment_costs.csv"))?.collect();
    let mut investment_costs = HashMap::new();
    for row in cost_rows {
        investment_costs.insert(
            row.year_label.clone(),
            InvestmentCost {
                power: Money(row.power_cost),
                energy: Money(row.energy_cost),
            },
        );
    }
    for year in &years {
        ensure!(
            investment_costs.contains_key(&year.label),
            "no investment cost supplied for milestone year '{}'",
            year.label
        );
    }

    let tso_network = NetworkData {
        id: "transmission".to_string(),
        data_dir: case_dir.join("transmission"),
    };
    let dso_networks = case_file
        .active_dn_nodes
        .iter()
        .map(|node_id| NetworkData {
            id: node_id.clone(),
            data_dir: case_dir.join(node_id),
        })
        .collect();

    Ok(CaseData {
        years,
        days,
        num_instants: case_file.num_instants,
        discount_factor: case_file.discount_factor,
        active_dn_nodes: case_file.active_dn_nodes,
        investment_costs,
        tso_network,
        dso_networks,
    })
}
