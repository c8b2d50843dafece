//! Model choice per expert location and hyperparameters carried between locations.

use crate::config::ModelConfig;
use crate::errors::{ExpertError, Result};
use log::debug;
use loxi_gp::{Constraints, ModelBuilder, ModelKind, ModelRegistry, OptimParams, Params};
use std::fmt;

/// A model kind with its settings and validated builder
#[derive(Clone)]
pub struct ResolvedModel {
    /// Model kind
    pub kind: ModelKind,
    /// Hyperparameter bounds
    pub constraints: Constraints,
    /// Optimizer settings
    pub optim_kwargs: OptimParams,
    /// Builder holding the validated construction parameters
    pub builder: ModelBuilder,
}

impl fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("kind", &self.kind)
            .field("constraints", &self.constraints)
            .field("optim_kwargs", &self.optim_kwargs)
            .finish()
    }
}

fn resolve_model(
    registry: &ModelRegistry,
    kind: &ModelKind,
    init_params: &serde_json::Value,
    constraints: &Constraints,
    optim_kwargs: &OptimParams,
) -> Result<ResolvedModel> {
    let builder = registry
        .resolve(kind, init_params)
        .map_err(|e| ExpertError::ConfigError(format!("model {}: {}", kind, e)))?;
    Ok(ResolvedModel {
        kind: kind.clone(),
        constraints: constraints.clone(),
        optim_kwargs: optim_kwargs.clone(),
        builder,
    })
}

/// Choice between a primary model and a replacement one used for sparse
/// local windows.
#[derive(Clone, Debug)]
pub struct ModelSelectionPolicy {
    primary: ResolvedModel,
    replacement: Option<(usize, ResolvedModel)>,
}

impl ModelSelectionPolicy {
    /// Resolve the configured models against the registry
    pub fn new(config: &ModelConfig, registry: &ModelRegistry) -> Result<Self> {
        let primary = resolve_model(
            registry,
            &config.oi_model,
            &config.init_params,
            &config.constraints,
            &config.optim_kwargs,
        )?;
        let replacement = match (config.replacement_threshold, config.replacement_model.as_ref()) {
            (Some(threshold), Some(kind)) => Some((
                threshold,
                resolve_model(
                    registry,
                    kind,
                    &config.replacement_init_params,
                    &config.replacement_constraints,
                    &config.replacement_optim_kwargs,
                )?,
            )),
            (None, None) => None,
            _ => {
                return Err(ExpertError::ConfigError(
                    "replacement model and threshold must be given together".to_string(),
                ))
            }
        };
        Ok(ModelSelectionPolicy {
            primary,
            replacement,
        })
    }

    /// Model to fit on `n_obs` local observations: the replacement one iff
    /// configured and `n_obs` is strictly below its threshold.
    pub fn select(&self, n_obs: usize) -> &ResolvedModel {
        match &self.replacement {
            Some((threshold, model)) if n_obs < *threshold => {
                debug!("{} observations < {}, use {}", n_obs, threshold, model.kind);
                model
            }
            _ => &self.primary,
        }
    }

    /// Primary model
    pub fn primary(&self) -> &ResolvedModel {
        &self.primary
    }
}

/// Default weight of the previous values
pub const DEFAULT_RHO: f64 = 0.95;

/// Exponential smoothing of hyperparameters across successful fits:
/// `prev <- rho * prev + (1 - rho) * new`.
#[derive(Clone, Debug)]
pub struct HyperSmoother {
    rho: f64,
    values: Option<Params>,
}

impl Default for HyperSmoother {
    fn default() -> Self {
        HyperSmoother::new(DEFAULT_RHO)
    }
}

impl HyperSmoother {
    /// Constructor
    pub fn new(rho: f64) -> Self {
        HyperSmoother { rho, values: None }
    }

    /// Take the result of a fit into account.
    ///
    /// Failed fits are ignored, so are values holding NaN. The first accepted
    /// values are taken as is, a parameter whose shape changed is reset.
    pub fn update(&mut self, params: &Params, success: bool) {
        if !success {
            return;
        }
        let rho = self.rho;
        let values = self.values.get_or_insert_with(Params::new);
        for (name, new) in params.iter() {
            if new.iter().any(|v| v.is_nan()) {
                debug!("Skip smoothing of {} holding NaN", name);
                continue;
            }
            match values.get_mut(name) {
                Some(prev) if prev.len() == new.len() => {
                    prev.zip_mut_with(new, |p, &n| *p = rho * *p + (1. - rho) * n);
                }
                _ => {
                    values.insert(name.clone(), new.clone());
                }
            }
        }
    }

    /// Smoothed values, none before the first successful fit
    pub fn current(&self) -> Option<&Params> {
        self.values.as_ref().filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use serde_json::json;

    fn config() -> ModelConfig {
        ModelConfig {
            replacement_threshold: Some(10),
            replacement_model: Some(ModelKind::Mean),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_select() {
        let policy = ModelSelectionPolicy::new(&config(), &ModelRegistry::default()).unwrap();
        assert_eq!(policy.select(9).kind, ModelKind::Mean);
        assert_eq!(policy.select(10).kind, ModelKind::Gpr);
        assert_eq!(policy.select(11).kind, ModelKind::Gpr);

        let policy =
            ModelSelectionPolicy::new(&ModelConfig::default(), &ModelRegistry::default()).unwrap();
        assert_eq!(policy.select(0).kind, ModelKind::Gpr);
    }

    #[test]
    fn test_bad_models() {
        let registry = ModelRegistry::default();
        let unknown = ModelConfig {
            oi_model: ModelKind::from("Sparse"),
            ..ModelConfig::default()
        };
        assert!(matches!(
            ModelSelectionPolicy::new(&unknown, &registry),
            Err(ExpertError::ConfigError(_))
        ));
        let bad_init = ModelConfig {
            init_params: json!({"kernel_variance": -1.}),
            ..ModelConfig::default()
        };
        assert!(ModelSelectionPolicy::new(&bad_init, &registry).is_err());
        let partial = ModelConfig {
            replacement_threshold: Some(3),
            ..ModelConfig::default()
        };
        assert!(ModelSelectionPolicy::new(&partial, &registry).is_err());
    }

    #[test]
    fn test_smoother() {
        let mut smoother = HyperSmoother::new(0.5);
        assert!(smoother.current().is_none());

        let mut p = Params::new();
        p.insert("ls".to_string(), array![2., 4.]);
        smoother.update(&p, false);
        assert!(smoother.current().is_none());
        smoother.update(&p, true);
        assert_abs_diff_eq!(smoother.current().unwrap()["ls"], array![2., 4.]);

        p.insert("ls".to_string(), array![4., 8.]);
        p.insert("kv".to_string(), array![f64::NAN]);
        smoother.update(&p, true);
        let current = smoother.current().unwrap();
        assert_abs_diff_eq!(current["ls"], array![3., 6.]);
        assert!(!current.contains_key("kv"));

        p.insert("ls".to_string(), array![f64::NAN, 0.]);
        smoother.update(&p, true);
        assert_abs_diff_eq!(smoother.current().unwrap()["ls"], array![3., 6.]);
    }
}
