//! Optimal interpolation with local expert gaussian processes.
//!
//! `loxi` fits one local model per *expert location* on the observations
//! found in a window around it, and predicts at nearby locations. Results are
//! appended in batches to an on-disk table store so that long runs can be
//! interrupted and resumed.
//!
//! This crate re-exports the workspace crates:
//! * [`frame`]: numeric data frames, selection predicates and data sources,
//! * [`store`]: the append-only table store holding results,
//! * [`gp`]: local models (gaussian process regression, constant mean) and
//!   their registry,
//! * [`experts`]: configuration and orchestration of a run.
//!
//! A run is usually described with a json file holding the computation
//! description and the run settings:
//!
//! ```json
//! {
//!   "oi_config": {
//!     "data": {
//!       "data_source": "obs.csv",
//!       "obs_col": "obs",
//!       "coords_col": ["x", "y", "t"],
//!       "global_select": [{"loc_col": "t", "src_col": "t", "func": "add"}],
//!       "local_select": [
//!         {"col": "t", "comp": ">=", "val": -4},
//!         {"col": "t", "comp": "<=", "val": 4},
//!         {"col": ["x", "y"], "comp": "<=", "val": 300000}
//!       ]
//!     },
//!     "model": {"oi_model": "Gpr", "init_params": {"coords_scale": [50000, 50000, 1]}},
//!     "locations": {"file": "locs.csv"}
//!   },
//!   "run_kwargs": {"store_path": "results", "store_every": 20}
//! }
//! ```
//!
//! which is run with the `loxi` binary (`loxi --config run.json`) or
//! programmatically:
//!
//! ```no_run
//! use loxi::experts::{LocalExpertOI, OiConfigFile};
//!
//! let file = OiConfigFile::from_file("run.json").unwrap();
//! let summary = LocalExpertOI::new(file.oi_config)
//!     .unwrap()
//!     .run(&file.run_kwargs)
//!     .unwrap();
//! println!("{summary}");
//! ```
//!
//! Logging goes through the [`log`](https://docs.rs/log) facade, the binary
//! uses `env_logger` configured with the [`LOXI_LOG`] environment variable
//! (default `info`).
#![warn(missing_docs)]

pub use loxi_experts as experts;
pub use loxi_frame as frame;
pub use loxi_gp as gp;
pub use loxi_store as store;

/// Environment variable controlling the log level
pub const LOXI_LOG: &str = "LOXI_LOG";
