//! Exact gaussian process regression on the local window of an expert.
//!
//! Coordinates are divided by `coords_scale`, observations are centered with
//! `obs_mean` and divided by `obs_scale` before fitting. Hyperparameters
//! (lengthscales, kernel variance and likelihood variance) live in that scaled
//! space and are optimised in log10 space with COBYLA by maximizing the log
//! marginal likelihood. Predictions are returned in original units.

use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::model::{
    fit_within, Constraints, LocalModel, ModelData, OptimParams, Params, Predictions,
};
use crate::optimization::{optimize_params, prepare_multistart, CobylaParams};
use crate::parameters::{GprValidParams, ObsMean};
use linfa_linalg::{cholesky::*, triangular::*};
use log::debug;
use ndarray::{arr1, Array1, Array2, Axis};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Instant;

/// Lengthscales parameter name
pub const LENGTHSCALES: &str = "lengthscales";
/// Kernel variance parameter name
pub const KERNEL_VARIANCE: &str = "kernel_variance";
/// Likelihood variance parameter name
pub const LIKELIHOOD_VARIANCE: &str = "likelihood_variance";

const DEFAULT_LENGTHSCALES_BOUNDS: (f64, f64) = (1e-4, 1e4);
const DEFAULT_KERNEL_VARIANCE_BOUNDS: (f64, f64) = (1e-6, 1e4);
const DEFAULT_LIKELIHOOD_VARIANCE_BOUNDS: (f64, f64) = (1e-8, 1e3);

type Bounds = (Array1<f64>, Array1<f64>);

/// Exact GP regression model
#[derive(Clone, Debug)]
pub struct Gpr {
    kernel: Kernel,
    /// Scaled training coordinates (n, d)
    x: Array2<f64>,
    /// Centered and scaled observations (n)
    y: Array1<f64>,
    coords_scale: Array1<f64>,
    obs_mean: f64,
    obs_scale: f64,
    lengthscales: Array1<f64>,
    kernel_variance: f64,
    likelihood_variance: f64,
    bounds: BTreeMap<&'static str, Bounds>,
}

fn broadcast(name: &str, values: Option<&[f64]>, dim: usize) -> Result<Array1<f64>> {
    match values {
        None => Ok(Array1::ones(dim)),
        Some([v]) => Ok(Array1::from_elem(dim, *v)),
        Some(v) if v.len() == dim => Ok(arr1(v)),
        Some(v) => Err(GpError::InvalidValueError(format!(
            "`{name}` expects 1 or {dim} values, got {}",
            v.len()
        ))),
    }
}

fn positive(name: &str, values: &Array1<f64>) -> Result<()> {
    if values.iter().any(|v| !(v.is_finite() && *v > 0.)) {
        return Err(GpError::InvalidValueError(format!(
            "`{name}` should be positive, got {values}"
        )));
    }
    Ok(())
}

impl Gpr {
    /// Build a model on the local window given validated init parameters
    pub fn new(data: &ModelData, params: &GprValidParams) -> Result<Gpr> {
        let (coords, obs) = data.training_data()?;
        let dim = coords.ncols();
        let coords_scale = broadcast("coords_scale", params.coords_scale(), dim)?;
        let lengthscales = broadcast(LENGTHSCALES, params.lengthscales(), dim)?;
        let obs_mean = match params.obs_mean() {
            ObsMean::Zero => 0.,
            ObsMean::Local => obs.mean().unwrap_or(0.),
            ObsMean::Value(v) => v,
        };
        let obs_scale = params.obs_scale();
        let x = coords / &coords_scale;
        let y = obs.mapv(|v| (v - obs_mean) / obs_scale);

        let mut bounds = BTreeMap::new();
        bounds.insert(
            LENGTHSCALES,
            (
                Array1::from_elem(dim, DEFAULT_LENGTHSCALES_BOUNDS.0),
                Array1::from_elem(dim, DEFAULT_LENGTHSCALES_BOUNDS.1),
            ),
        );
        bounds.insert(
            KERNEL_VARIANCE,
            (
                arr1(&[DEFAULT_KERNEL_VARIANCE_BOUNDS.0]),
                arr1(&[DEFAULT_KERNEL_VARIANCE_BOUNDS.1]),
            ),
        );
        bounds.insert(
            LIKELIHOOD_VARIANCE,
            (
                arr1(&[DEFAULT_LIKELIHOOD_VARIANCE_BOUNDS.0]),
                arr1(&[DEFAULT_LIKELIHOOD_VARIANCE_BOUNDS.1]),
            ),
        );

        Ok(Gpr {
            kernel: params.kernel(),
            x,
            y,
            coords_scale,
            obs_mean,
            obs_scale,
            lengthscales,
            kernel_variance: params.kernel_variance(),
            likelihood_variance: params.likelihood_variance(),
            bounds,
        })
    }

    /// Number of training observations
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    /// Kernel
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Cholesky factor of `K + likelihood_variance * I`
    fn cholesky_factor(
        &self,
        lengthscales: &Array1<f64>,
        kernel_variance: f64,
        likelihood_variance: f64,
    ) -> Result<Array2<f64>> {
        let mut k = self
            .kernel
            .matrix(&self.x, &self.x, lengthscales, kernel_variance);
        k.diag_mut().map_inplace(|v| *v += likelihood_variance);
        Ok(k.cholesky()?)
    }

    /// Log marginal likelihood of the scaled observations
    fn log_marginal_likelihood(
        &self,
        lengthscales: &Array1<f64>,
        kernel_variance: f64,
        likelihood_variance: f64,
    ) -> Result<f64> {
        let n_obs = self.y.len() as f64;
        let l = self.cholesky_factor(lengthscales, kernel_variance, likelihood_variance)?;
        let alpha = l.solve_triangular(&self.y.view().insert_axis(Axis(1)), UPLO::Lower)?;
        let data_fit = alpha.mapv(|v| v * v).sum();
        // log det(K) = 2 sum(log(diag(L)))
        let half_logdet = l.diag().mapv(f64::ln).sum();
        let mll = -0.5 * data_fit - half_logdet - 0.5 * n_obs * (2. * PI).ln();
        if mll.is_finite() {
            Ok(mll)
        } else {
            Err(GpError::LikelihoodComputationError(format!(
                "non finite likelihood {mll}"
            )))
        }
    }

    fn packed(&self) -> Array1<f64> {
        let mut p = self.lengthscales.to_vec();
        p.push(self.kernel_variance);
        p.push(self.likelihood_variance);
        Array1::from_vec(p)
    }

    fn packed_bounds(&self) -> Vec<(f64, f64)> {
        [LENGTHSCALES, KERNEL_VARIANCE, LIKELIHOOD_VARIANCE]
            .iter()
            .filter_map(|name| self.bounds.get(name))
            .flat_map(|(low, high)| {
                low.iter()
                    .zip(high.iter())
                    .map(|(l, h)| (*l, *h))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn unpack(p: &[f64], dim: usize) -> (Array1<f64>, f64, f64) {
        (arr1(&p[..dim]), p[dim], p[dim + 1])
    }
}

impl LocalModel for Gpr {
    fn param_names(&self) -> Vec<&'static str> {
        vec![LENGTHSCALES, KERNEL_VARIANCE, LIKELIHOOD_VARIANCE]
    }

    fn set_parameter_constraints(
        &mut self,
        constraints: &Constraints,
        tol: f64,
        move_within_tol: bool,
    ) -> Result<()> {
        for (name, bounds) in constraints.iter() {
            let dim = self.lengthscales.len();
            let (key, resolved) = match name.as_str() {
                LENGTHSCALES => (
                    LENGTHSCALES,
                    bounds.resolve(
                        name,
                        dim,
                        DEFAULT_LENGTHSCALES_BOUNDS,
                        Some(&self.coords_scale),
                    )?,
                ),
                KERNEL_VARIANCE => (
                    KERNEL_VARIANCE,
                    bounds.resolve(name, 1, DEFAULT_KERNEL_VARIANCE_BOUNDS, None)?,
                ),
                LIKELIHOOD_VARIANCE => (
                    LIKELIHOOD_VARIANCE,
                    bounds.resolve(name, 1, DEFAULT_LIKELIHOOD_VARIANCE_BOUNDS, None)?,
                ),
                other => return Err(GpError::UnknownParameter(other.to_string())),
            };
            if resolved.0.iter().any(|v| *v <= 0.) {
                return Err(GpError::InvalidValueError(format!(
                    "`{name}` low bounds should be positive, got {}",
                    resolved.0
                )));
            }
            match key {
                LENGTHSCALES => {
                    fit_within(name, &mut self.lengthscales, &resolved, tol, move_within_tol)?
                }
                KERNEL_VARIANCE => {
                    let mut v = arr1(&[self.kernel_variance]);
                    fit_within(name, &mut v, &resolved, tol, move_within_tol)?;
                    self.kernel_variance = v[0];
                }
                _ => {
                    let mut v = arr1(&[self.likelihood_variance]);
                    fit_within(name, &mut v, &resolved, tol, move_within_tol)?;
                    self.likelihood_variance = v[0];
                }
            }
            debug!("Constraint {} in [{}, {}]", name, resolved.0, resolved.1);
            self.bounds.insert(key, resolved);
        }
        Ok(())
    }

    fn optimise_parameters(&mut self, optim: &OptimParams) -> Result<bool> {
        let dim = self.lengthscales.len();
        let bounds = self.packed_bounds();
        // start from current values moved within bounds
        let param0 = Array1::from_iter(
            self.packed()
                .iter()
                .zip(bounds.iter())
                .map(|(v, (lo, up))| v.clamp(*lo, *up)),
        );
        let (param0s, log_bounds) = prepare_multistart(optim.n_start, &param0, &bounds, optim.seed);
        debug!("Optimize with multistart params = {param0s:?} and bounds = {log_bounds:?}");

        let base: f64 = 10.;
        let objfn = |x: &[f64], _params: &mut ()| -> f64 {
            if x.iter().any(|v| v.is_nan()) {
                // shortcut return worst value wrt to mll maximization
                return f64::INFINITY;
            }
            let p: Vec<f64> = x.iter().map(|v| base.powf(*v)).collect();
            let (ls, kv, lv) = Gpr::unpack(&p, dim);
            match self.log_marginal_likelihood(&ls, kv, lv) {
                Ok(mll) => -mll,
                Err(_) => f64::INFINITY,
            }
        };

        let now = Instant::now();
        let (success, fmin, opt) = (0..param0s.nrows())
            .into_par_iter()
            .map(|i| {
                optimize_params(
                    objfn,
                    &param0s.row(i).to_owned(),
                    &log_bounds,
                    CobylaParams::from(optim),
                )
            })
            .reduce(
                || (false, f64::INFINITY, param0s.row(0).to_owned()),
                |a, b| if b.1 < a.1 { b } else { a },
            );
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());

        if !fmin.is_finite() {
            return Ok(false);
        }
        let p: Vec<f64> = opt
            .iter()
            .zip(bounds.iter())
            .map(|(v, (lo, up))| base.powf(*v).clamp(*lo, *up))
            .collect();
        let (ls, kv, lv) = Gpr::unpack(&p, dim);
        self.lengthscales = ls;
        self.kernel_variance = kv;
        self.likelihood_variance = lv;
        Ok(success)
    }

    fn objective_function_value(&self) -> Result<f64> {
        self.log_marginal_likelihood(
            &self.lengthscales,
            self.kernel_variance,
            self.likelihood_variance,
        )
    }

    fn parameters(&self) -> Params {
        let mut params = Params::new();
        params.insert(LENGTHSCALES.to_string(), self.lengthscales.to_owned());
        params.insert(KERNEL_VARIANCE.to_string(), arr1(&[self.kernel_variance]));
        params.insert(
            LIKELIHOOD_VARIANCE.to_string(),
            arr1(&[self.likelihood_variance]),
        );
        params
    }

    fn set_parameters(&mut self, params: &Params) -> Result<()> {
        for (name, values) in params.iter() {
            let values = values.to_vec();
            match name.as_str() {
                LENGTHSCALES => {
                    let ls = broadcast(name, Some(&values[..]), self.lengthscales.len())?;
                    positive(name, &ls)?;
                    self.lengthscales = ls;
                }
                KERNEL_VARIANCE | LIKELIHOOD_VARIANCE => {
                    let v = broadcast(name, Some(&values[..]), 1)?;
                    positive(name, &v)?;
                    if name == KERNEL_VARIANCE {
                        self.kernel_variance = v[0];
                    } else {
                        self.likelihood_variance = v[0];
                    }
                }
                other => return Err(GpError::UnknownParameter(other.to_string())),
            }
        }
        Ok(())
    }

    fn predict(&self, coords: &Array2<f64>) -> Result<Predictions> {
        if coords.ncols() != self.x.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "prediction coordinates have {} columns, model has {}",
                coords.ncols(),
                self.x.ncols()
            )));
        }
        let xs = coords / &self.coords_scale;
        let l = self.cholesky_factor(
            &self.lengthscales,
            self.kernel_variance,
            self.likelihood_variance,
        )?;
        let kxs = self
            .kernel
            .matrix(&self.x, &xs, &self.lengthscales, self.kernel_variance);
        let alpha = l.solve_triangular(&self.y.view().insert_axis(Axis(1)), UPLO::Lower)?;
        let v = l.solve_triangular(&kxs, UPLO::Lower)?;

        let scale2 = self.obs_scale * self.obs_scale;
        let f_mean = v.t().dot(&alpha).remove_axis(Axis(1)) * self.obs_scale + self.obs_mean;
        let f_var = (self.kernel_variance - v.mapv(|e| e * e).sum_axis(Axis(0)))
            .mapv(|e| e.max(0.) * scale2);
        let y_var = &f_var + self.likelihood_variance * scale2;

        let mut out = Predictions::new();
        out.insert("f*".to_string(), f_mean);
        out.insert("f*_var".to_string(), f_var);
        out.insert("y_var".to_string(), y_var);
        out.insert(
            "f_bar".to_string(),
            Array1::from_elem(coords.nrows(), self.obs_mean),
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamBounds;
    use crate::parameters::GprParams;
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use loxi_frame::Frame;
    use ndarray::{array, Array};

    fn sine_frame(n: usize) -> Frame {
        let x = Array::linspace(0., 6., n);
        let obs = x.mapv(f64::sin);
        Frame::from_columns(vec![("x", x), ("obs", obs)]).unwrap()
    }

    fn build(df: &Frame, params: GprParams) -> Gpr {
        let coords_col = vec!["x".to_string()];
        let data = ModelData {
            data: df,
            obs_col: "obs",
            coords_col: &coords_col,
            expert_loc: &[3.],
        };
        Gpr::new(&data, &params.check().unwrap()).unwrap()
    }

    #[test]
    fn test_mll_single_point() {
        let df = Frame::new(vec!["x", "obs"], array![[0., 1.]]).unwrap();
        let gpr = build(&df, GprParams::default());
        // K = kernel_variance + likelihood_variance = 2
        let expected = -0.25 - 0.5 * 2f64.ln() - 0.5 * (2. * PI).ln();
        assert_abs_diff_eq!(
            gpr.objective_function_value().unwrap(),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_predict_interpolates() {
        let df = sine_frame(13);
        let gpr = build(&df, GprParams::default().likelihood_variance(1e-4));
        let preds = gpr.predict(&array![[1.5], [3.]]).unwrap();
        assert_abs_diff_eq!(preds["f*"][0], 1.5f64.sin(), epsilon = 1e-2);
        assert_abs_diff_eq!(preds["f*"][1], 3f64.sin(), epsilon = 1e-2);
        assert!(preds["f*_var"][0] < 1e-3);
        assert_abs_diff_eq!(
            preds["y_var"][0],
            preds["f*_var"][0] + 1e-4,
            epsilon = 1e-12
        );
        assert!(gpr.predict(&array![[1., 2.]]).is_err());
    }

    #[test]
    fn test_obs_mean_and_scale() {
        let df = sine_frame(13);
        let gpr = build(
            &df,
            GprParams::default()
                .obs_mean(ObsMean::Value(2.))
                .obs_scale(10.)
                .coords_scale(vec![2.]),
        );
        // far from data the posterior mean reverts to obs_mean
        let preds = gpr.predict(&array![[1000.]]).unwrap();
        assert_abs_diff_eq!(preds["f*"][0], 2., epsilon = 1e-9);
        assert_abs_diff_eq!(preds["f_bar"][0], 2.);
        assert_abs_diff_eq!(preds["f*_var"][0], 100., epsilon = 1e-9);
    }

    #[test]
    fn test_optimise_improves_likelihood() {
        let df = sine_frame(20);
        let mut gpr = build(&df, GprParams::new(Kernel::Matern52));
        let before = gpr.objective_function_value().unwrap();
        let success = gpr
            .optimise_parameters(&OptimParams {
                n_start: 2,
                ..OptimParams::default()
            })
            .unwrap();
        assert!(success);
        let after = gpr.objective_function_value().unwrap();
        assert!(after > before);
        assert!(gpr.parameters()[LIKELIHOOD_VARIANCE][0] < 1.);
    }

    #[test]
    fn test_constraints_bound_optimisation() {
        let df = sine_frame(20);
        let mut gpr = build(&df, GprParams::default().coords_scale(vec![2.]));
        let mut constraints = Constraints::new();
        constraints.insert(
            LENGTHSCALES.to_string(),
            ParamBounds::new(Some(vec![4.]), Some(vec![6.])).scale(true),
        );
        gpr.set_parameter_constraints(&constraints, 1e-8, true)
            .unwrap();
        // initial lengthscale 1 moved within [2, 3] in scaled space
        assert_abs_diff_eq!(gpr.parameters()[LENGTHSCALES][0], 2. + 1e-8);
        gpr.optimise_parameters(&OptimParams::default()).unwrap();
        let ls = gpr.parameters()[LENGTHSCALES][0];
        assert!((2. ..=3.).contains(&ls));

        let mut unknown = Constraints::new();
        unknown.insert("smoothness".to_string(), ParamBounds::default());
        assert!(matches!(
            gpr.set_parameter_constraints(&unknown, 1e-8, true),
            Err(GpError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_set_parameters() {
        let df = Frame::new(
            vec!["x", "y", "obs"],
            array![[0., 0., 1.], [1., 0., 2.], [0., 1., 3.]],
        )
        .unwrap();
        let coords_col = vec!["x".to_string(), "y".to_string()];
        let data = ModelData {
            data: &df,
            obs_col: "obs",
            coords_col: &coords_col,
            expert_loc: &[0., 0.],
        };
        let mut gpr = Gpr::new(&data, GprParams::default().check_ref().unwrap()).unwrap();
        let mut params = Params::new();
        params.insert(LENGTHSCALES.to_string(), array![2.]);
        params.insert(KERNEL_VARIANCE.to_string(), array![0.5]);
        gpr.set_parameters(&params).unwrap();
        assert_abs_diff_eq!(gpr.parameters()[LENGTHSCALES], array![2., 2.]);
        assert_abs_diff_eq!(gpr.parameters()[KERNEL_VARIANCE], array![0.5]);

        params.insert("mean".to_string(), array![0.]);
        assert!(gpr.set_parameters(&params).is_err());
        let mut bad = Params::new();
        bad.insert(LIKELIHOOD_VARIANCE.to_string(), array![-1.]);
        assert!(gpr.set_parameters(&bad).is_err());
    }

    #[test]
    fn test_no_valid_observation() {
        let df = Frame::new(vec!["x", "obs"], array![[0., f64::NAN]]).unwrap();
        let coords_col = vec!["x".to_string()];
        let data = ModelData {
            data: &df,
            obs_col: "obs",
            coords_col: &coords_col,
            expert_loc: &[0.],
        };
        assert!(matches!(
            Gpr::new(&data, &GprParams::default().check().unwrap()),
            Err(GpError::DataError(_))
        ));
    }
}
