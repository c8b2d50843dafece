//! Constant mean model, used as replacement when a window holds too few
//! observations for a gaussian process.

use crate::errors::{GpError, Result};
use crate::model::{fit_within, Constraints, LocalModel, ModelData, OptimParams, Params, Predictions};
use linfa::ParamGuard;
use ndarray::{arr1, Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Mean parameter name
pub const MEAN: &str = "mean";
/// Variance parameter name
pub const VARIANCE: &str = "variance";

/// A set of validated [`MeanModel`] init parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeanValidParams {
    /// Initial mean, sample mean if not given
    pub(crate) mean: Option<f64>,
    /// Initial variance, sample variance if not given
    pub(crate) variance: Option<f64>,
    /// Lower limit of the variance
    pub(crate) min_variance: f64,
}

impl Default for MeanValidParams {
    fn default() -> Self {
        MeanValidParams {
            mean: None,
            variance: None,
            min_variance: 1e-8,
        }
    }
}

/// The set of init parameters of a [`MeanModel`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeanParams(MeanValidParams);

impl MeanParams {
    /// Set initial mean.
    pub fn mean(mut self, mean: f64) -> Self {
        self.0.mean = Some(mean);
        self
    }

    /// Set initial variance.
    pub fn variance(mut self, variance: f64) -> Self {
        self.0.variance = Some(variance);
        self
    }

    /// Set the lower limit of the variance.
    pub fn min_variance(mut self, min_variance: f64) -> Self {
        self.0.min_variance = min_variance;
        self
    }
}

impl ParamGuard for MeanParams {
    type Checked = MeanValidParams;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if !(self.0.min_variance > 0.) {
            return Err(GpError::InvalidValueError(format!(
                "`min_variance` should be positive, got {}",
                self.0.min_variance
            )));
        }
        if let Some(v) = self.0.variance {
            if !(v > 0.) {
                return Err(GpError::InvalidValueError(format!(
                    "`variance` should be positive, got {v}"
                )));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// Observations modeled as `N(mean, variance)` independently of coordinates
#[derive(Clone, Debug)]
pub struct MeanModel {
    obs: Array1<f64>,
    mean: f64,
    variance: f64,
    min_variance: f64,
    bounds: BTreeMap<&'static str, (Array1<f64>, Array1<f64>)>,
}

impl MeanModel {
    /// Build a model on the local window given validated init parameters
    pub fn new(data: &ModelData, params: &MeanValidParams) -> Result<MeanModel> {
        let (_, obs) = data.training_data()?;
        let (mean, variance) = Self::moments(&obs, params.min_variance);
        Ok(MeanModel {
            mean: params.mean.unwrap_or(mean),
            variance: params.variance.unwrap_or(variance),
            obs,
            min_variance: params.min_variance,
            bounds: BTreeMap::new(),
        })
    }

    fn moments(obs: &Array1<f64>, min_variance: f64) -> (f64, f64) {
        let mean = obs.mean().unwrap_or(0.);
        let variance = obs.var(0.).max(min_variance);
        (mean, variance)
    }
}

impl LocalModel for MeanModel {
    fn param_names(&self) -> Vec<&'static str> {
        vec![MEAN, VARIANCE]
    }

    fn set_parameter_constraints(
        &mut self,
        constraints: &Constraints,
        tol: f64,
        move_within_tol: bool,
    ) -> Result<()> {
        for (name, bounds) in constraints.iter() {
            let (key, current, default) = match name.as_str() {
                MEAN => (MEAN, self.mean, (f64::MIN, f64::MAX)),
                VARIANCE => (VARIANCE, self.variance, (self.min_variance, f64::MAX)),
                other => return Err(GpError::UnknownParameter(other.to_string())),
            };
            let resolved = bounds.resolve(name, 1, default, None)?;
            let mut value = arr1(&[current]);
            fit_within(name, &mut value, &resolved, tol, move_within_tol)?;
            if key == MEAN {
                self.mean = value[0];
            } else {
                self.variance = value[0].max(self.min_variance);
            }
            self.bounds.insert(key, resolved);
        }
        Ok(())
    }

    fn optimise_parameters(&mut self, _optim: &OptimParams) -> Result<bool> {
        // maximum likelihood estimates are the sample moments
        let (mut mean, mut variance) = Self::moments(&self.obs, self.min_variance);
        if let Some((low, high)) = self.bounds.get(MEAN) {
            mean = mean.clamp(low[0], high[0]);
        }
        if let Some((low, high)) = self.bounds.get(VARIANCE) {
            variance = variance.clamp(low[0], high[0]);
        }
        self.mean = mean;
        self.variance = variance;
        Ok(true)
    }

    fn objective_function_value(&self) -> Result<f64> {
        let n = self.obs.len() as f64;
        let sq = self.obs.mapv(|v| (v - self.mean) * (v - self.mean)).sum();
        Ok(-0.5 * sq / self.variance - 0.5 * n * (2. * PI * self.variance).ln())
    }

    fn parameters(&self) -> Params {
        let mut params = Params::new();
        params.insert(MEAN.to_string(), arr1(&[self.mean]));
        params.insert(VARIANCE.to_string(), arr1(&[self.variance]));
        params
    }

    fn set_parameters(&mut self, params: &Params) -> Result<()> {
        for (name, values) in params.iter() {
            if values.len() != 1 || !values[0].is_finite() {
                return Err(GpError::InvalidValueError(format!(
                    "`{name}` expects one finite value, got {values}"
                )));
            }
            match name.as_str() {
                MEAN => self.mean = values[0],
                VARIANCE if values[0] > 0. => self.variance = values[0],
                VARIANCE => {
                    return Err(GpError::InvalidValueError(format!(
                        "`variance` should be positive, got {}",
                        values[0]
                    )))
                }
                other => return Err(GpError::UnknownParameter(other.to_string())),
            }
        }
        Ok(())
    }

    fn predict(&self, coords: &Array2<f64>) -> Result<Predictions> {
        let m = coords.nrows();
        let f_var = self.variance / self.obs.len() as f64;
        let mut out = Predictions::new();
        out.insert("f*".to_string(), Array1::from_elem(m, self.mean));
        out.insert("f*_var".to_string(), Array1::from_elem(m, f_var));
        out.insert(
            "y_var".to_string(),
            Array1::from_elem(m, self.variance + f_var),
        );
        out.insert("f_bar".to_string(), Array1::from_elem(m, self.mean));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamBounds;
    use approx::assert_abs_diff_eq;
    use loxi_frame::Frame;
    use ndarray::array;

    fn model(params: MeanParams) -> MeanModel {
        let df = Frame::new(vec!["x", "obs"], array![[0., 1.], [1., 2.], [2., 6.]]).unwrap();
        let coords_col = vec!["x".to_string()];
        let data = ModelData {
            data: &df,
            obs_col: "obs",
            coords_col: &coords_col,
            expert_loc: &[1.],
        };
        MeanModel::new(&data, &params.check().unwrap()).unwrap()
    }

    #[test]
    fn test_mean_model() {
        let mut m = model(MeanParams::default().mean(0.));
        assert_abs_diff_eq!(m.parameters()[MEAN][0], 0.);
        let before = m.objective_function_value().unwrap();
        assert!(m.optimise_parameters(&OptimParams::default()).unwrap());
        assert_abs_diff_eq!(m.parameters()[MEAN][0], 3.);
        assert_abs_diff_eq!(m.parameters()[VARIANCE][0], 14. / 3., epsilon = 1e-12);
        assert!(m.objective_function_value().unwrap() > before);

        let preds = m.predict(&array![[5.], [6.]]).unwrap();
        assert_abs_diff_eq!(preds["f*"], array![3., 3.]);
        assert_abs_diff_eq!(preds["f*_var"][0], 14. / 9., epsilon = 1e-12);
    }

    #[test]
    fn test_mean_constraints() {
        let mut m = model(MeanParams::default());
        let mut constraints = Constraints::new();
        constraints.insert(
            MEAN.to_string(),
            ParamBounds::new(Some(vec![0.]), Some(vec![2.])),
        );
        m.set_parameter_constraints(&constraints, 0., true).unwrap();
        assert_abs_diff_eq!(m.parameters()[MEAN][0], 2.);
        m.optimise_parameters(&OptimParams::default()).unwrap();
        assert_abs_diff_eq!(m.parameters()[MEAN][0], 2.);
        assert!(MeanParams::default().variance(0.).check().is_err());
    }
}
