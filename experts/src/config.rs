//! Configuration of a local experts run.
//!
//! The whole configuration is (de)serializable from json. The part describing
//! *what* is computed ([`LocalExpertConfig`]) is persisted in the results store
//! and checked against subsequent runs, the part describing *how* the run goes
//! ([`RunConfig`]) may change between runs.

use crate::errors::{ExpertError, Result};
use crate::rules::{LocalRule, SelectionRule};
use log::debug;
use loxi_frame::{ColumnSpec, Predicate};
use loxi_gp::{Constraints, ModelKind, OptimParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top level keys never checked for compatibility
pub const ALWAYS_SKIPPED: [&str; 2] = ["run_kwargs", "comment"];

/// Observations and their selection
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Csv file of observations
    pub data_source: Option<PathBuf>,
    /// Observation column
    pub obs_col: String,
    /// Coordinate columns, shared by data, expert and prediction locations
    pub coords_col: Vec<String>,
    /// Rules selecting the global window
    pub global_select: Vec<SelectionRule>,
    /// Rules selecting the local window around an expert location
    pub local_select: Vec<LocalRule>,
    /// Columns derived after each global window load
    pub col_funcs: Vec<ColumnSpec>,
}

/// Hyperparameters to persist
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamsToStore {
    /// Every model hyperparameter (`"all"`)
    All(AllParams),
    /// The given ones only
    Names(Vec<String>),
}

/// Marker for `"all"`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllParams {
    /// all
    All,
}

impl Default for ParamsToStore {
    fn default() -> Self {
        ParamsToStore::All(AllParams::All)
    }
}

impl ParamsToStore {
    /// Whether the named hyperparameter is persisted
    pub fn contains(&self, name: &str) -> bool {
        match self {
            ParamsToStore::All(_) => true,
            ParamsToStore::Names(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Shift applied to an expert location coordinate before looking up
/// previously stored hyperparameters: `value * scale + offset`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexAdjust {
    /// Multiplicative factor
    pub scale: f64,
    /// Additive offset
    pub offset: f64,
}

impl Default for IndexAdjust {
    fn default() -> Self {
        IndexAdjust {
            scale: 1.,
            offset: 0.,
        }
    }
}

impl IndexAdjust {
    /// Adjusted value
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }
}

/// Hyperparameters loaded from a previous results store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadParamsConfig {
    /// Results store to read from
    pub file: PathBuf,
    /// Hyperparameters to load, all the model ones when unset
    pub param_names: Option<Vec<String>>,
    /// Coordinate adjustments by column
    pub index_adjust: BTreeMap<String, IndexAdjust>,
    /// Suffix of the hyperparameter tables
    pub table_suffix: String,
}

/// Local model choice and settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Primary model kind
    pub oi_model: ModelKind,
    /// Primary model construction parameters
    pub init_params: Value,
    /// Primary model hyperparameter bounds
    pub constraints: Constraints,
    /// Primary model optimizer settings
    pub optim_kwargs: OptimParams,
    /// Hyperparameters loaded from a previous run
    pub load_params: Option<LoadParamsConfig>,
    /// Hyperparameters to persist
    pub params_to_store: ParamsToStore,
    /// Start each fit from the smoothed hyperparameters of previous successful fits
    pub use_prev_params: bool,
    /// Tolerance used to move initial values within constraints
    pub constraint_tol: f64,
    /// Whether initial values outside constraints are moved within
    pub move_within_tol: bool,
    /// The replacement model is used below this number of local observations
    pub replacement_threshold: Option<usize>,
    /// Replacement model kind
    pub replacement_model: Option<ModelKind>,
    /// Replacement model construction parameters
    pub replacement_init_params: Value,
    /// Replacement model hyperparameter bounds
    pub replacement_constraints: Constraints,
    /// Replacement model optimizer settings
    pub replacement_optim_kwargs: OptimParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            oi_model: ModelKind::Gpr,
            init_params: Value::Null,
            constraints: Constraints::new(),
            optim_kwargs: OptimParams::default(),
            load_params: None,
            params_to_store: ParamsToStore::default(),
            use_prev_params: false,
            constraint_tol: 1e-8,
            move_within_tol: true,
            replacement_threshold: None,
            replacement_model: None,
            replacement_init_params: Value::Null,
            replacement_constraints: Constraints::new(),
            replacement_optim_kwargs: OptimParams::default(),
        }
    }
}

/// Expert locations source and preparation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpertLocsConfig {
    /// Csv file of locations
    pub file: Option<PathBuf>,
    /// Locations are replicated once per value, the value being set in the column
    pub add_data_to_col: BTreeMap<String, Vec<f64>>,
    /// Derived columns
    pub col_funcs: Vec<ColumnSpec>,
    /// Row selection
    pub row_select: Vec<Predicate>,
    /// Processing order
    pub sort_by: Vec<String>,
    /// Non coordinate columns to keep, all when unset
    pub keep_cols: Option<Vec<String>>,
}

/// How prediction locations are generated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    /// Predict at the expert location only
    #[default]
    ExpertLoc,
    /// Predict at the rows of a frame close enough to the expert location
    FromDataframe,
}

/// Prediction locations settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictionLocsConfig {
    /// Generation method
    pub method: PredictionMethod,
    /// Csv file of candidate locations (`from_dataframe`)
    pub df_file: Option<PathBuf>,
    /// Max euclidean distance from the expert location (`from_dataframe`)
    pub max_dist: Option<f64>,
}

/// Description of the computation, persisted with the results
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalExpertConfig {
    /// Data settings
    pub data: DataConfig,
    /// Model settings
    pub model: ModelConfig,
    /// Expert locations settings
    pub locations: ExpertLocsConfig,
    /// Prediction locations settings
    pub pred_loc: PredictionLocsConfig,
    /// Free text, not checked for compatibility
    pub comment: Option<String>,
}

impl LocalExpertConfig {
    /// Read a json file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Set the observation column
    pub fn obs_col<S: Into<String>>(mut self, obs_col: S) -> Self {
        self.data.obs_col = obs_col.into();
        self
    }

    /// Set the coordinate columns
    pub fn coords_col<S: Into<String>>(mut self, coords_col: Vec<S>) -> Self {
        self.data.coords_col = coords_col.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Set the global selection rules
    pub fn global_select(mut self, rules: Vec<SelectionRule>) -> Self {
        self.data.global_select = rules;
        self
    }

    /// Set the local selection rules
    pub fn local_select(mut self, rules: Vec<LocalRule>) -> Self {
        self.data.local_select = rules;
        self
    }

    /// Set the primary model kind and its construction parameters
    pub fn model(mut self, kind: ModelKind, init_params: Value) -> Self {
        self.model.oi_model = kind;
        self.model.init_params = init_params;
        self
    }

    /// Set the primary model optimizer settings
    pub fn optim_kwargs(mut self, optim_kwargs: OptimParams) -> Self {
        self.model.optim_kwargs = optim_kwargs;
        self
    }

    /// Set the primary model constraints
    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.model.constraints = constraints;
        self
    }

    /// Set the replacement model used below `threshold` local observations
    pub fn replacement(mut self, threshold: usize, kind: ModelKind, init_params: Value) -> Self {
        self.model.replacement_threshold = Some(threshold);
        self.model.replacement_model = Some(kind);
        self.model.replacement_init_params = init_params;
        self
    }

    /// Set the expert locations settings
    pub fn locations(mut self, locations: ExpertLocsConfig) -> Self {
        self.locations = locations;
        self
    }

    /// Set the prediction locations settings
    pub fn pred_loc(mut self, pred_loc: PredictionLocsConfig) -> Self {
        self.pred_loc = pred_loc;
        self
    }

    /// Set the comment
    pub fn comment<S: Into<String>>(mut self, comment: S) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Validate settings that do not depend on data
    pub fn check(&self) -> Result<()> {
        if self.data.obs_col.is_empty() {
            return Err(ExpertError::ConfigError(
                "observation column is not specified".to_string(),
            ));
        }
        if self.data.coords_col.is_empty() {
            return Err(ExpertError::ConfigError(
                "coordinate columns are not specified".to_string(),
            ));
        }
        if self.model.replacement_threshold.is_some() != self.model.replacement_model.is_some() {
            return Err(ExpertError::ConfigError(
                "replacement model and threshold must be given together".to_string(),
            ));
        }
        if self.pred_loc.method == PredictionMethod::FromDataframe
            && self.pred_loc.max_dist.map_or(false, |d| !(d >= 0.))
        {
            return Err(ExpertError::ConfigError(
                "prediction max_dist should be non negative".to_string(),
            ));
        }
        if !(self.model.constraint_tol >= 0.) {
            return Err(ExpertError::ConfigError(
                "constraint_tol should be non negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings of one run, free to change between runs on the same store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Results store directory
    pub store_path: PathBuf,
    /// Buffered locations before writing results
    pub store_every: usize,
    /// Whether the configuration is checked against the one of the store
    pub check_config_compatible: bool,
    /// Dotted configuration paths ignored by the check
    pub skip_valid_checks_on: Vec<String>,
    /// Whether hyperparameters are optimised
    pub optimise: bool,
    /// Whether predictions are computed
    pub predict: bool,
    /// Minimum number of local observations to fit a model
    pub min_obs: usize,
    /// Suffix appended to every result table name
    pub table_suffix: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            store_path: PathBuf::from("results"),
            store_every: 10,
            check_config_compatible: true,
            skip_valid_checks_on: vec![],
            optimise: true,
            predict: true,
            min_obs: 3,
            table_suffix: String::new(),
        }
    }
}

impl RunConfig {
    /// Constructor
    pub fn new<P: Into<PathBuf>>(store_path: P) -> Self {
        RunConfig {
            store_path: store_path.into(),
            ..RunConfig::default()
        }
    }

    /// Set the number of buffered locations
    pub fn store_every(mut self, store_every: usize) -> Self {
        self.store_every = store_every;
        self
    }

    /// Set whether the configuration is checked
    pub fn check_config_compatible(mut self, check: bool) -> Self {
        self.check_config_compatible = check;
        self
    }

    /// Set the configuration paths ignored by the check
    pub fn skip_valid_checks_on<S: Into<String>>(mut self, paths: Vec<S>) -> Self {
        self.skip_valid_checks_on = paths.into_iter().map(|p| p.into()).collect();
        self
    }

    /// Set whether hyperparameters are optimised
    pub fn optimise(mut self, optimise: bool) -> Self {
        self.optimise = optimise;
        self
    }

    /// Set whether predictions are computed
    pub fn predict(mut self, predict: bool) -> Self {
        self.predict = predict;
        self
    }

    /// Set the minimum number of local observations
    pub fn min_obs(mut self, min_obs: usize) -> Self {
        self.min_obs = min_obs;
        self
    }

    /// Set the result table suffix
    pub fn table_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.table_suffix = suffix.into();
        self
    }

    /// Result table name
    pub fn table_name(&self, base: &str) -> String {
        format!("{}{}", base, self.table_suffix)
    }
}

/// Json file layout: `{"oi_config": {...}, "run_kwargs": {...}}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OiConfigFile {
    /// Computation description
    pub oi_config: LocalExpertConfig,
    /// Run settings
    pub run_kwargs: RunConfig,
}

impl OiConfigFile {
    /// Read a json file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

fn remove_path(value: &mut Value, path: &str) {
    let mut keys: Vec<&str> = path.split('.').collect();
    let last = match keys.pop() {
        Some(last) => last,
        None => return,
    };
    let mut current = value;
    for key in keys {
        current = match current.get_mut(key) {
            Some(v) => v,
            None => return,
        };
    }
    if let Some(obj) = current.as_object_mut() {
        obj.remove(last);
    }
}

fn first_difference(prev: &Value, current: &Value, path: &str) -> Option<(String, String)> {
    let join = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", path, key)
        }
    };
    match (prev, current) {
        (Value::Object(p), Value::Object(c)) => {
            for (key, pv) in p.iter() {
                match c.get(key) {
                    Some(cv) => {
                        if let Some(diff) = first_difference(pv, cv, &join(key)) {
                            return Some(diff);
                        }
                    }
                    None => return Some((join(key), "missing in current configuration".to_string())),
                }
            }
            c.keys()
                .find(|key| !p.contains_key(*key))
                .map(|key| (join(key), "missing in previous configuration".to_string()))
        }
        (Value::Number(p), Value::Number(c)) => match (p.as_f64(), c.as_f64()) {
            (Some(a), Some(b)) if (a - b).abs() <= 1e-12 * a.abs().max(b.abs()) => None,
            _ => Some((path.to_string(), format!("{} != {}", p, c))),
        },
        (p, c) if p == c => None,
        (p, c) => Some((path.to_string(), format!("{} != {}", p, c))),
    }
}

/// Check that the current configuration matches the previous one, ignoring the
/// always skipped top level keys and the `skip` dotted paths.
pub fn check_compatible(prev: &Value, current: &Value, skip: &[String]) -> Result<()> {
    let mut prev = prev.clone();
    let mut current = current.clone();
    for path in ALWAYS_SKIPPED.iter().copied().chain(skip.iter().map(|s| s.as_str())) {
        debug!("Skip configuration check on {}", path);
        remove_path(&mut prev, path);
        remove_path(&mut current, path);
    }
    match first_difference(&prev, &current, "") {
        None => Ok(()),
        Some((path, reason)) => Err(ExpertError::IncompatibleConfig { path, reason }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let run: RunConfig = serde_json::from_str(r#"{"store_path": "res"}"#).unwrap();
        assert_eq!(run.store_every, 10);
        assert!(run.check_config_compatible);
        assert!(run.optimise && run.predict);
        assert_eq!(run.min_obs, 3);
        assert_eq!(run.table_name("preds"), "preds");
        assert_eq!(run.table_suffix("_v2").table_name("preds"), "preds_v2");

        let model: ModelConfig = serde_json::from_str(r#"{"oi_model": "GPR"}"#).unwrap();
        assert_eq!(model.oi_model, ModelKind::Gpr);
        assert!(model.params_to_store.contains("lengthscales"));
    }

    #[test]
    fn test_params_to_store() {
        let all: ParamsToStore = serde_json::from_str(r#""all""#).unwrap();
        assert_eq!(all, ParamsToStore::default());
        let some: ParamsToStore = serde_json::from_str(r#"["mean"]"#).unwrap();
        assert!(some.contains("mean"));
        assert!(!some.contains("variance"));
        assert!(serde_json::from_str::<ParamsToStore>(r#""some""#).is_err());
    }

    #[test]
    fn test_unknown_key() {
        assert!(serde_json::from_str::<RunConfig>(r#"{"store_evry": 3}"#).is_err());
    }

    #[test]
    fn test_config_file() {
        let file: OiConfigFile = serde_json::from_value(json!({
            "oi_config": {
                "data": {
                    "obs_col": "obs",
                    "coords_col": ["x", "y", "t"],
                    "global_select": [
                        {"col": "lat", "comp": ">=", "val": 60},
                        {"loc_col": "t", "src_col": "t", "func": "add"}
                    ],
                    "local_select": [
                        {"col": "t", "comp": "<=", "val": 4},
                        {"col": ["x", "y"], "comp": "<=", "val": 300000}
                    ]
                },
                "model": {
                    "oi_model": "Gpr",
                    "init_params": {"coords_scale": [50000, 50000, 1]},
                    "constraints": {"lengthscales": {"low": [1e-8], "high": [600000, 600000, 9]}}
                },
                "locations": {"file": "locs.csv", "sort_by": ["t"]},
                "pred_loc": {"method": "from_dataframe", "df_file": "grid.csv", "max_dist": 200000}
            },
            "run_kwargs": {"store_path": "results", "store_every": 5}
        }))
        .unwrap();
        assert_eq!(file.oi_config.data.global_select.len(), 2);
        assert_eq!(file.oi_config.pred_loc.method, PredictionMethod::FromDataframe);
        assert_eq!(file.run_kwargs.store_every, 5);
        file.oi_config.check().unwrap();
    }

    #[test]
    fn test_check() {
        let config = LocalExpertConfig::default()
            .obs_col("obs")
            .coords_col(vec!["x"]);
        config.check().unwrap();
        let mut bad = config.clone();
        bad.model.replacement_threshold = Some(3);
        assert!(matches!(bad.check(), Err(ExpertError::ConfigError(_))));
        assert!(LocalExpertConfig::default().check().is_err());
    }

    #[test]
    fn test_check_compatible() {
        let prev = json!({
            "data": {"obs_col": "obs", "coords_col": ["x", "t"]},
            "model": {"oi_model": "Gpr", "init_params": {"obs_mean": "local"}},
            "comment": "first",
            "run_kwargs": {"store_every": 10}
        });
        let mut current = prev.clone();
        current["comment"] = json!("second");
        current["run_kwargs"]["store_every"] = json!(2);
        check_compatible(&prev, &current, &[]).unwrap();

        current["model"]["init_params"]["obs_mean"] = json!("zero");
        match check_compatible(&prev, &current, &[]) {
            Err(ExpertError::IncompatibleConfig { path, .. }) => {
                assert_eq!(path, "model.init_params.obs_mean")
            }
            other => panic!("unexpected {:?}", other),
        }
        check_compatible(&prev, &current, &["model.init_params".to_string()]).unwrap();

        current["data"]["obs_col"] = json!("sla");
        assert!(check_compatible(&prev, &current, &["model".to_string()]).is_err());
    }
}
