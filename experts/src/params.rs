//! Hyperparameters loaded from the results of a previous run.

use crate::config::LoadParamsConfig;
use crate::errors::{ExpertError, Result};
use crate::location::ExpertLocation;
use crate::record::DIM_COL;
use log::{debug, warn};
use loxi_frame::{Comparator, Predicate};
use loxi_gp::Params;
use loxi_store::TableStore;
use ndarray::Array1;

/// Reader of stored hyperparameter tables
#[derive(Clone, Debug)]
pub struct ParamsLoader {
    config: LoadParamsConfig,
    store: Option<TableStore>,
}

impl ParamsLoader {
    /// Constructor, a missing store gives a loader returning no value
    pub fn new(config: &LoadParamsConfig) -> Result<Self> {
        let store = if TableStore::exists(&config.file) {
            Some(TableStore::open(&config.file)?)
        } else {
            warn!(
                "No results store at {:?}, hyperparameters will not be loaded",
                config.file
            );
            None
        };
        Ok(ParamsLoader {
            config: config.clone(),
            store,
        })
    }

    /// Hyperparameters stored for `location` (after index adjustment).
    ///
    /// Unknown names are configuration errors. Missing tables or rows give no
    /// value, values holding NaN are dropped.
    pub fn load(&self, location: &ExpertLocation, model_params: &[&str]) -> Result<Params> {
        let mut params = Params::new();
        let store = match self.store.as_ref() {
            Some(store) => store,
            None => return Ok(params),
        };
        let names: Vec<String> = match self.config.param_names.as_ref() {
            Some(names) => {
                if let Some(unknown) = names.iter().find(|n| !model_params.contains(&n.as_str())) {
                    return Err(ExpertError::ConfigError(format!(
                        "cannot load '{}', model parameters are {:?}",
                        unknown, model_params
                    )));
                }
                names.clone()
            }
            None => model_params.iter().map(|n| n.to_string()).collect(),
        };
        let predicates: Vec<Predicate> = location
            .coords_col()
            .iter()
            .zip(location.coords().iter())
            .map(|(col, &v)| {
                let v = match self.config.index_adjust.get(col) {
                    Some(adjust) => adjust.apply(v),
                    None => v,
                };
                Predicate::new(col.as_str(), Comparator::Eq, v)
            })
            .collect();
        for name in names {
            let table_name = format!("{}{}", name, self.config.table_suffix);
            if !store.has_table(&table_name) {
                debug!("No stored values for '{}'", name);
                continue;
            }
            let table = store.select(&table_name, &predicates)?;
            if table.is_empty() {
                continue;
            }
            let mut values = Vec::with_capacity(table.len());
            for i in 0..table.len() {
                let dim = table.cell(i, DIM_COL)?.as_f64().unwrap_or(i as f64);
                let value = table.cell(i, &name)?.as_f64().unwrap_or(f64::NAN);
                values.push((dim, value));
            }
            values.sort_by(|a, b| a.0.total_cmp(&b.0));
            let values: Array1<f64> = values.into_iter().map(|(_, v)| v).collect();
            if values.iter().any(|v| v.is_nan()) {
                warn!(
                    "Stored '{}' holds NaN at {}, not loaded",
                    name,
                    location.key()
                );
                continue;
            }
            params.insert(name, values);
        }
        Ok(params)
    }
}
