//! Contract between the local experts engine and the models it fits.

use crate::errors::{GpError, Result};
use loxi_frame::Frame;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named hyperparameter values
pub type Params = BTreeMap<String, Array1<f64>>;

/// Named prediction outputs, each holding one value per prediction location
pub type Predictions = BTreeMap<String, Array1<f64>>;

/// Per-parameter bounds, keyed by parameter name
pub type Constraints = BTreeMap<String, ParamBounds>;

/// Training data given to a model for one expert location
#[derive(Clone, Copy, Debug)]
pub struct ModelData<'a> {
    /// Local window of observations
    pub data: &'a Frame,
    /// Observation column
    pub obs_col: &'a str,
    /// Coordinate columns
    pub coords_col: &'a [String],
    /// Coordinates of the expert location (in `coords_col` order)
    pub expert_loc: &'a [f64],
}

impl<'a> ModelData<'a> {
    /// Coordinates (n, d) and observations (n) of the rows where none of them is NaN
    pub fn training_data(&self) -> Result<(Array2<f64>, Array1<f64>)> {
        let coords = self.data.to_matrix(self.coords_col)?;
        let obs = self.data.column(self.obs_col)?;
        let keep: Vec<usize> = (0..obs.len())
            .filter(|&i| obs[i].is_finite() && coords.row(i).iter().all(|v| v.is_finite()))
            .collect();
        if keep.len() < obs.len() {
            log::debug!("Drop {} rows with missing values", obs.len() - keep.len());
        }
        if keep.is_empty() {
            return Err(GpError::DataError(format!(
                "no valid observation in column '{}'",
                self.obs_col
            )));
        }
        Ok((
            coords.select(ndarray::Axis(0), &keep),
            obs.select(ndarray::Axis(0), &keep),
        ))
    }
}

/// Bounds of a (possibly multi-dimensional) parameter.
///
/// A single value is applied to every dimension. When `scale` is set, bounds
/// are given in coordinate units and divided by the model `coords_scale`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamBounds {
    /// Lower bounds
    pub low: Option<Vec<f64>>,
    /// Upper bounds
    pub high: Option<Vec<f64>>,
    /// Whether bounds are divided by the coordinates scale
    pub scale: bool,
}

impl ParamBounds {
    /// Constructor
    pub fn new(low: Option<Vec<f64>>, high: Option<Vec<f64>>) -> Self {
        ParamBounds {
            low,
            high,
            scale: false,
        }
    }

    /// Set whether bounds are given in coordinate units
    pub fn scale(mut self, scale: bool) -> Self {
        self.scale = scale;
        self
    }

    /// Resolve the bounds for a `dim`-dimensional parameter given defaults
    pub(crate) fn resolve(
        &self,
        name: &str,
        dim: usize,
        default: (f64, f64),
        coords_scale: Option<&Array1<f64>>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let mut low = broadcast(name, self.low.as_deref(), dim, default.0)?;
        let mut high = broadcast(name, self.high.as_deref(), dim, default.1)?;
        if self.scale {
            let scale = coords_scale.ok_or_else(|| {
                GpError::InvalidValueError(format!(
                    "parameter '{name}' bounds cannot be scaled by coordinates"
                ))
            })?;
            low = low / scale;
            high = high / scale;
        }
        if low.iter().zip(high.iter()).any(|(l, h)| l > h) {
            return Err(GpError::InvalidValueError(format!(
                "parameter '{name}': low bounds {low} should be lower than high bounds {high}"
            )));
        }
        Ok((low, high))
    }
}

fn broadcast(name: &str, values: Option<&[f64]>, dim: usize, default: f64) -> Result<Array1<f64>> {
    match values {
        None => Ok(Array1::from_elem(dim, default)),
        Some([v]) => Ok(Array1::from_elem(dim, *v)),
        Some(v) if v.len() == dim => Ok(Array1::from_vec(v.to_vec())),
        Some(v) => Err(GpError::InvalidValueError(format!(
            "parameter '{name}' expects 1 or {dim} values, got {}",
            v.len()
        ))),
    }
}

/// Move `values` inside `[low + tol, high - tol]` when `move_within_tol`,
/// otherwise check they already lie within `[low, high]`.
pub(crate) fn fit_within(
    name: &str,
    values: &mut Array1<f64>,
    bounds: &(Array1<f64>, Array1<f64>),
    tol: f64,
    move_within_tol: bool,
) -> Result<()> {
    let (low, high) = bounds;
    for ((v, l), h) in values.iter_mut().zip(low.iter()).zip(high.iter()) {
        if move_within_tol {
            if *v > h - tol {
                *v = h - tol;
            }
            if *v < l + tol {
                *v = l + tol;
            }
        } else if *v < *l || *v > *h {
            return Err(GpError::InvalidValueError(format!(
                "parameter '{name}' value {v} outside of bounds [{l}, {h}]"
            )));
        }
    }
    Ok(())
}

/// Optimizer settings of a model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimParams {
    /// Max number of objective evaluations per optimization start
    pub max_eval: usize,
    /// Number of additional random starts
    pub n_start: usize,
    /// Relative tolerance on objective value
    pub ftol_rel: f64,
    /// Initial step size (in log10 space)
    pub rhobeg: f64,
    /// Seed of the random starts
    pub seed: u64,
}

impl Default for OptimParams {
    fn default() -> Self {
        OptimParams {
            max_eval: 200,
            n_start: 0,
            ftol_rel: 1e-4,
            rhobeg: 0.5,
            seed: 42,
        }
    }
}

/// A model trained on the local window of one expert location.
///
/// Failures of any method abort the current location only.
pub trait LocalModel {
    /// Names of the model hyperparameters
    fn param_names(&self) -> Vec<&'static str>;

    /// Bound hyperparameters, values lying outside are moved within when `move_within_tol`
    fn set_parameter_constraints(
        &mut self,
        constraints: &Constraints,
        tol: f64,
        move_within_tol: bool,
    ) -> Result<()>;

    /// Optimise hyperparameters, returns whether the optimization succeeded
    fn optimise_parameters(&mut self, optim: &OptimParams) -> Result<bool>;

    /// Objective value (log marginal likelihood) at current hyperparameters
    fn objective_function_value(&self) -> Result<f64>;

    /// Current hyperparameter values
    fn parameters(&self) -> Params;

    /// Set some hyperparameter values, names must be known by the model
    fn set_parameters(&mut self, params: &Params) -> Result<()>;

    /// Predict at given (m, d) coordinates, each output holds m values
    fn predict(&self, coords: &Array2<f64>) -> Result<Predictions>;
}
