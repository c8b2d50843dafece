//! Local experts orchestration for optimal interpolation.
//!
//! The domain is covered by a set of expert locations. For each of them, the
//! engine selects a global window of observations from a [`DataSource`]
//! (cached while the window does not change), narrows it to a local window
//! around the location, fits a local model (see [`loxi_gp`]) and predicts at
//! nearby locations. Run details, predictions and hyperparameters are
//! appended to a [`TableStore`] in batches, so that an interrupted run can be
//! resumed: locations already recorded in the run details table are skipped.
//!
//! ```no_run
//! use loxi_experts::{LocalExpertConfig, LocalExpertOI, LocalRule, RunConfig};
//! use loxi_frame::{Comparator, Frame};
//! use loxi_gp::ModelKind;
//!
//! let config = LocalExpertConfig::default()
//!     .obs_col("obs")
//!     .coords_col(vec!["x", "y"])
//!     .local_select(vec![LocalRule::distance(vec!["x", "y"], Comparator::Le, 2.)])
//!     .model(ModelKind::Gpr, serde_json::json!({"likelihood_variance": 0.01}));
//! let oi = LocalExpertOI::new(config)
//!     .unwrap()
//!     .with_data_source(Frame::from_csv("obs.csv").unwrap())
//!     .with_expert_locations(Frame::from_csv("locs.csv").unwrap())
//!     .unwrap();
//! let summary = oi.run(&RunConfig::new("results").store_every(20)).unwrap();
//! println!("{summary}");
//! ```
//!
//! [`DataSource`]: loxi_frame::DataSource
//! [`TableStore`]: loxi_store::TableStore
#![warn(missing_docs)]

mod buffer;
mod cache;
mod config;
mod errors;
mod ledger;
mod location;
mod oi;
mod params;
mod policy;
mod prediction;
mod record;
mod rules;
mod window;

pub use buffer::*;
pub use cache::*;
pub use config::*;
pub use errors::*;
pub use ledger::*;
pub use location::*;
pub use oi::*;
pub use params::*;
pub use policy::*;
pub use prediction::*;
pub use record::*;
pub use rules::*;
pub use window::*;
