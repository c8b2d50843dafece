//! Local models fitted by the local experts engine.
//!
//! Every model implements the [`LocalModel`] contract: it is built on the
//! local window of one expert location, accepts parameter constraints,
//! optimises its hyperparameters, reports its objective value and predicts at
//! given coordinates. Models are resolved by [`ModelKind`] through a
//! [`ModelRegistry`], which validates their json init parameters once.
//!
//! Two models are provided:
//! * [`Gpr`]: exact gaussian process regression with squared exponential or
//!   matern kernels, ARD lengthscales and gaussian likelihood, its hyperparameters
//!   being optimised with COBYLA,
//! * [`MeanModel`]: constant mean model, usually chosen when a window holds
//!   too few observations.
//!
//! ```
//! use linfa::ParamGuard;
//! use loxi_frame::Frame;
//! use loxi_gp::{Gpr, GprParams, Kernel, LocalModel, ModelData, OptimParams};
//! use ndarray::array;
//!
//! let df = Frame::new(vec!["x", "obs"], array![[0., 0.], [1., 0.84], [2., 0.91], [3., 0.14]]).unwrap();
//! let coords_col = vec!["x".to_string()];
//! let data = ModelData { data: &df, obs_col: "obs", coords_col: &coords_col, expert_loc: &[1.5] };
//! let params = GprParams::new(Kernel::Matern52).likelihood_variance(0.01).check().unwrap();
//! let mut gpr = Gpr::new(&data, &params).unwrap();
//! gpr.optimise_parameters(&OptimParams::default()).unwrap();
//! let preds = gpr.predict(&array![[1.5]]).unwrap();
//! assert!(preds.contains_key("f*"));
//! ```
#![warn(missing_docs)]

mod errors;
mod gpr;
mod kernels;
mod mean;
mod model;
mod optimization;
mod parameters;
mod registry;

pub use errors::*;
pub use gpr::*;
pub use kernels::*;
pub use mean::*;
pub use model::*;
pub use parameters::*;
pub use registry::*;
