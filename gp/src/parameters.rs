use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use linfa::ParamGuard;
use serde::{Deserialize, Serialize};

/// Mean removed from observations before fitting
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObsMean {
    /// No mean removed
    #[default]
    Zero,
    /// Mean of the local observations
    Local,
    /// Given constant
    Value(f64),
}

/// A set of validated [`Gpr`](crate::Gpr) init parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GprValidParams {
    /// Kernel
    pub(crate) kernel: Kernel,
    /// Coordinates are divided by this scale (one value or one per coordinate)
    pub(crate) coords_scale: Option<Vec<f64>>,
    /// Observations (minus mean) are divided by this scale
    pub(crate) obs_scale: f64,
    /// Mean removed from observations
    pub(crate) obs_mean: ObsMean,
    /// Initial lengthscales (one value or one per coordinate), in scaled coordinates
    pub(crate) lengthscales: Option<Vec<f64>>,
    /// Initial kernel variance
    pub(crate) kernel_variance: f64,
    /// Initial gaussian likelihood variance
    pub(crate) likelihood_variance: f64,
}

impl Default for GprValidParams {
    fn default() -> GprValidParams {
        GprValidParams {
            kernel: Kernel::default(),
            coords_scale: None,
            obs_scale: 1.,
            obs_mean: ObsMean::default(),
            lengthscales: None,
            kernel_variance: 1.,
            likelihood_variance: 1.,
        }
    }
}

impl GprValidParams {
    /// Get kernel
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Get coordinates scale
    pub fn coords_scale(&self) -> Option<&[f64]> {
        self.coords_scale.as_deref()
    }

    /// Get observations scale
    pub fn obs_scale(&self) -> f64 {
        self.obs_scale
    }

    /// Get observations mean option
    pub fn obs_mean(&self) -> ObsMean {
        self.obs_mean
    }

    /// Get initial lengthscales
    pub fn lengthscales(&self) -> Option<&[f64]> {
        self.lengthscales.as_deref()
    }

    /// Get initial kernel variance
    pub fn kernel_variance(&self) -> f64 {
        self.kernel_variance
    }

    /// Get initial likelihood variance
    pub fn likelihood_variance(&self) -> f64 {
        self.likelihood_variance
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
/// The set of init parameters that can be specified for a [`Gpr`](crate::Gpr) model.
pub struct GprParams(GprValidParams);

impl GprParams {
    /// A constructor for GPR parameters given a kernel
    pub fn new(kernel: Kernel) -> GprParams {
        Self(GprValidParams {
            kernel,
            ..Default::default()
        })
    }

    /// Set kernel.
    pub fn kernel(mut self, kernel: Kernel) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set coordinates scale.
    pub fn coords_scale(mut self, coords_scale: Vec<f64>) -> Self {
        self.0.coords_scale = Some(coords_scale);
        self
    }

    /// Set observations scale.
    pub fn obs_scale(mut self, obs_scale: f64) -> Self {
        self.0.obs_scale = obs_scale;
        self
    }

    /// Set the mean removed from observations.
    pub fn obs_mean(mut self, obs_mean: ObsMean) -> Self {
        self.0.obs_mean = obs_mean;
        self
    }

    /// Set initial lengthscales.
    pub fn lengthscales(mut self, lengthscales: Vec<f64>) -> Self {
        self.0.lengthscales = Some(lengthscales);
        self
    }

    /// Set initial kernel variance.
    pub fn kernel_variance(mut self, kernel_variance: f64) -> Self {
        self.0.kernel_variance = kernel_variance;
        self
    }

    /// Set initial likelihood variance.
    pub fn likelihood_variance(mut self, likelihood_variance: f64) -> Self {
        self.0.likelihood_variance = likelihood_variance;
        self
    }
}

fn check_positive(name: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() || values.iter().any(|v| !(v.is_finite() && *v > 0.)) {
        return Err(GpError::InvalidValueError(format!(
            "`{name}` should be made of positive values, got {values:?}"
        )));
    }
    Ok(())
}

impl ParamGuard for GprParams {
    type Checked = GprValidParams;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if let Some(scale) = self.0.coords_scale.as_deref() {
            check_positive("coords_scale", scale)?;
        }
        if let Some(ls) = self.0.lengthscales.as_deref() {
            check_positive("lengthscales", ls)?;
        }
        check_positive("obs_scale", &[self.0.obs_scale])?;
        check_positive("kernel_variance", &[self.0.kernel_variance])?;
        check_positive("likelihood_variance", &[self.0.likelihood_variance])?;
        if let ObsMean::Value(v) = self.0.obs_mean {
            if !v.is_finite() {
                return Err(GpError::InvalidValueError(format!(
                    "`obs_mean` should be finite, got {v}"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_json() {
        let params: GprParams = serde_json::from_str(
            r#"{"kernel": "Matern32", "coords_scale": [50000, 50000, 1], "obs_mean": "local",
                "likelihood_variance": 0.01}"#,
        )
        .unwrap();
        let valid = params.check().unwrap();
        assert_eq!(valid.kernel(), Kernel::Matern32);
        assert_eq!(valid.obs_mean(), ObsMean::Local);
        assert_eq!(valid.coords_scale(), Some(&[50000., 50000., 1.][..]));
        assert_eq!(valid.kernel_variance(), 1.);

        let params: GprParams = serde_json::from_str(r#"{"obs_mean": {"value": 2.5}}"#).unwrap();
        assert_eq!(params.check_ref().unwrap().obs_mean(), ObsMean::Value(2.5));
        assert!(serde_json::from_str::<GprParams>(r#"{"noise": 1}"#).is_err());
    }

    #[test]
    fn test_params_guard() {
        assert!(GprParams::default().check_ref().is_ok());
        assert!(GprParams::new(Kernel::Matern52)
            .lengthscales(vec![1., 0.])
            .check_ref()
            .is_err());
        assert!(GprParams::default()
            .likelihood_variance(-1.)
            .check()
            .is_err());
        assert!(GprParams::default()
            .coords_scale(vec![])
            .check_ref()
            .is_err());
    }
}
