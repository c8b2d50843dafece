//! Result rows produced for one expert location.

use crate::errors::{ExpertError, Result};
use crate::location::ExpertLocation;
use loxi_gp::{Params, Predictions};
use loxi_store::{Cell, Row, Schema, Table};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Run details table base name
pub const RUN_DETAILS: &str = "run_details";
/// Predictions table base name
pub const PREDS: &str = "preds";
/// Expert locations table base name
pub const EXPERT_LOCS: &str = "expert_locs";
/// Configuration table base name
pub const OI_CONFIG: &str = "oi_config";

/// Column holding the element position of a hyperparameter
pub const DIM_COL: &str = "_dim_0";
/// Prefix of the prediction coordinate columns
pub const PRED_LOC_PREFIX: &str = "pred_loc_";

/// Outcome of an expert location
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Model fitted
    Ok,
    /// Not enough local observations, nothing fitted
    TooFewObs,
    /// Model construction, optimization or prediction failed
    FitFailed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RunStatus::Ok => "ok",
            RunStatus::TooFewObs => "too_few_obs",
            RunStatus::FitFailed => "fit_failed",
        };
        write!(f, "{s}")
    }
}

/// Run details of one expert location
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    /// Local observations
    pub num_obs: usize,
    /// Seconds spent on the location
    pub run_time: f64,
    /// Log marginal likelihood after optimization
    pub mll: f64,
    /// Whether the optimizer reported success
    pub optimise_success: bool,
    /// Model kind used
    pub model: String,
    /// Outcome
    pub status: RunStatus,
}

impl RunRecord {
    /// Record of a location skipped for lack of observations
    pub fn too_few_obs<S: Into<String>>(num_obs: usize, model: S) -> Self {
        RunRecord {
            num_obs,
            run_time: f64::NAN,
            mll: f64::NAN,
            optimise_success: false,
            model: model.into(),
            status: RunStatus::TooFewObs,
        }
    }

    /// Record of a location whose fit failed
    pub fn fit_failed<S: Into<String>>(num_obs: usize, run_time: f64, model: S) -> Self {
        RunRecord {
            num_obs,
            run_time,
            mll: f64::NAN,
            optimise_success: false,
            model: model.into(),
            status: RunStatus::FitFailed,
        }
    }

    /// Run details column names
    pub fn columns() -> Vec<&'static str> {
        vec![
            "num_obs",
            "run_time",
            "mll",
            "optimise_success",
            "model",
            "status",
        ]
    }

    /// One row table indexed by the location coordinates
    pub fn to_table(&self, location: &ExpertLocation) -> Result<Table> {
        let schema = Schema::new(location.coords_col().to_vec(), Self::columns());
        let row = Row::new(
            location.coords().to_vec(),
            vec![
                Cell::from(self.num_obs),
                Cell::from(self.run_time),
                Cell::from(self.mll),
                Cell::from(self.optimise_success),
                Cell::from(self.model.as_str()),
                Cell::from(self.status.to_string()),
            ],
        );
        Ok(Table::with_rows(schema, vec![row])?)
    }
}

/// Predictions table: one row per prediction location, indexed by the expert
/// location, with the prediction outputs then the `pred_loc_<coord>` columns.
pub fn predictions_table(
    location: &ExpertLocation,
    pred_coords: &Array2<f64>,
    predictions: &Predictions,
) -> Result<Table> {
    let m = pred_coords.nrows();
    if let Some((name, values)) = predictions.iter().find(|(_, v)| v.len() != m) {
        return Err(ExpertError::PreconditionError(format!(
            "prediction '{}' has {} values for {} locations",
            name,
            values.len(),
            m
        )));
    }
    let mut columns: Vec<String> = predictions.keys().cloned().collect();
    columns.extend(
        location
            .coords_col()
            .iter()
            .map(|c| format!("{PRED_LOC_PREFIX}{c}")),
    );
    let schema = Schema::new(location.coords_col().to_vec(), columns);
    let rows = (0..m)
        .map(|i| {
            let mut values: Vec<Cell> = predictions.values().map(|v| Cell::from(v[i])).collect();
            values.extend(pred_coords.row(i).iter().map(|&c| Cell::from(c)));
            Row::new(location.coords().to_vec(), values)
        })
        .collect();
    Ok(Table::with_rows(schema, rows)?)
}

/// One table per stored hyperparameter, with one row per element
pub fn parameter_tables<F>(
    location: &ExpertLocation,
    params: &Params,
    keep: F,
) -> Result<BTreeMap<String, Table>>
where
    F: Fn(&str) -> bool,
{
    let mut tables = BTreeMap::new();
    for (name, values) in params.iter().filter(|(name, _)| keep(name)) {
        let schema = Schema::new(
            location.coords_col().to_vec(),
            vec![DIM_COL.to_string(), name.clone()],
        );
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                Row::new(
                    location.coords().to_vec(),
                    vec![Cell::from(i), Cell::from(v)],
                )
            })
            .collect();
        tables.insert(name.clone(), Table::with_rows(schema, rows)?);
    }
    Ok(tables)
}
