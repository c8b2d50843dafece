//! Local experts optimal interpolation: one model fitted per expert location.

use crate::buffer::{FlushReport, ResultBuffer};
use crate::cache::GlobalDataCache;
use crate::config::{check_compatible, LocalExpertConfig, RunConfig};
use crate::errors::{ExpertError, Result};
use crate::ledger::RunLedger;
use crate::location::{ExpertLocation, ExpertLocations};
use crate::params::ParamsLoader;
use crate::policy::{HyperSmoother, ModelSelectionPolicy, ResolvedModel};
use crate::prediction::PredictionLocations;
use crate::record::{
    parameter_tables, predictions_table, RunRecord, RunStatus, EXPERT_LOCS, OI_CONFIG, PREDS,
    RUN_DETAILS,
};
use crate::rules::compile_predicates;
use crate::window::select_local;
use log::{debug, error, info, warn};
use loxi_frame::{ColumnFunc, CsvSource, DataSource, Frame};
use loxi_gp::{ModelData, ModelKind, ModelRegistry, Params, Predictions};
use loxi_store::{Cell, IndexKey, Row, Schema, Table, TableStore};
use ndarray::Array2;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

/// Counters of a run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Expert locations
    pub total: usize,
    /// Locations not processed by previous runs
    pub pending: usize,
    /// Locations processed by this run
    pub processed: usize,
    /// Locations with a fitted model
    pub fitted: usize,
    /// Locations skipped for lack of observations
    pub too_few_obs: usize,
    /// Locations whose fit failed
    pub fit_failed: usize,
    /// Global data loads
    pub cache_refreshes: usize,
    /// Result flushes
    pub flushes: usize,
    /// Locations recorded as processed but with some results not written
    pub unflushed: BTreeSet<IndexKey>,
    /// Locations processed but not recorded in the run details table.
    ///
    /// Their other results are already written: the next run processes them
    /// again and appends a second copy of those rows.
    pub unrecorded: BTreeSet<IndexKey>,
}

impl RunSummary {
    fn absorb(&mut self, report: FlushReport, ledger_table: &str) {
        self.flushes += 1;
        for failure in report.failures {
            if failure.table == ledger_table {
                self.unrecorded.extend(failure.keys);
            } else {
                self.unflushed.extend(failure.keys);
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} locations processed out of {} pending ({} total): {} fitted, {} with too few observations, {} failed",
            self.processed, self.pending, self.total, self.fitted, self.too_few_obs, self.fit_failed
        )?;
        if !self.unflushed.is_empty() || !self.unrecorded.is_empty() {
            write!(
                f,
                " ({} unflushed, {} unrecorded)",
                self.unflushed.len(),
                self.unrecorded.len()
            )?;
        }
        Ok(())
    }
}

/// State of a run, threaded through the per location step
struct RunSession<'a> {
    store: &'a TableStore,
    run: &'a RunConfig,
    policy: ModelSelectionPolicy,
    loader: Option<ParamsLoader>,
    cache: GlobalDataCache,
    buffer: ResultBuffer,
    smoothers: BTreeMap<ModelKind, HyperSmoother>,
    ledger: RunLedger,
    summary: RunSummary,
}

impl<'a> RunSession<'a> {
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let report = self.buffer.flush(self.store);
        self.summary
            .absorb(report, &self.run.table_name(RUN_DETAILS));
    }

    fn finish(mut self) -> RunSummary {
        self.flush();
        self.summary.cache_refreshes = self.cache.refreshes();
        self.summary
    }
}

struct Fit {
    success: bool,
    mll: f64,
    params: Params,
    predictions: Option<(Array2<f64>, Predictions)>,
}

/// Local experts engine.
///
/// ```no_run
/// use loxi_experts::{LocalExpertConfig, LocalExpertOI, RunConfig};
///
/// let config = LocalExpertConfig::from_file("oi_config.json").unwrap();
/// let summary = LocalExpertOI::new(config)
///     .unwrap()
///     .run(&RunConfig::new("results"))
///     .unwrap();
/// println!("{summary}");
/// ```
pub struct LocalExpertOI {
    config: LocalExpertConfig,
    registry: ModelRegistry,
    data_source: Option<Box<dyn DataSource>>,
    locations: Option<ExpertLocations>,
    pred_locs: PredictionLocations,
    col_funcs: Vec<ColumnFunc>,
}

impl fmt::Debug for LocalExpertOI {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LocalExpertOI")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("locations", &self.locations.as_ref().map(|l| l.len()))
            .field("col_funcs", &self.col_funcs)
            .finish()
    }
}

impl LocalExpertOI {
    /// Engine for the given configuration, reading the files it references
    pub fn new(config: LocalExpertConfig) -> Result<Self> {
        config.check()?;
        let data_source = config
            .data
            .data_source
            .as_ref()
            .map(|path| Box::new(CsvSource::new(path)) as Box<dyn DataSource>);
        let locations = match config.locations.file {
            Some(_) => Some(ExpertLocations::from_config(
                &config.locations,
                &config.data.coords_col,
            )?),
            None => None,
        };
        let pred_locs = PredictionLocations::from_config(&config.pred_loc)?;
        let col_funcs = config
            .data
            .col_funcs
            .iter()
            .cloned()
            .map(ColumnFunc::from)
            .collect();
        Ok(LocalExpertOI {
            config,
            registry: ModelRegistry::default(),
            data_source,
            locations,
            pred_locs,
            col_funcs,
        })
    }

    /// Set the observations source
    pub fn with_data_source<D: DataSource + 'static>(mut self, source: D) -> Self {
        self.data_source = Some(Box::new(source));
        self
    }

    /// Set the expert locations, prepared as configured
    pub fn with_expert_locations(mut self, frame: Frame) -> Result<Self> {
        self.locations = Some(ExpertLocations::prepare(
            frame,
            &self.config.locations,
            &self.config.data.coords_col,
        )?);
        Ok(self)
    }

    /// Set the prediction locations
    pub fn with_prediction_locations(mut self, pred_locs: PredictionLocations) -> Self {
        self.pred_locs = pred_locs;
        self
    }

    /// Add a column derived after each global data load
    pub fn with_column_func(mut self, func: ColumnFunc) -> Self {
        self.col_funcs.push(func);
        self
    }

    /// Set the model registry
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Configuration
    pub fn config(&self) -> &LocalExpertConfig {
        &self.config
    }

    /// Expert locations if set
    pub fn locations(&self) -> Option<&ExpertLocations> {
        self.locations.as_ref()
    }

    fn check_source(&self, source: &dyn DataSource) -> Result<()> {
        let available = source.columns()?;
        let derived: Vec<&str> = self.col_funcs.iter().map(|f| f.name()).collect();
        let missing: Vec<&String> = std::iter::once(&self.config.data.obs_col)
            .chain(self.config.data.coords_col.iter())
            .filter(|c| !available.contains(*c) && !derived.contains(&c.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(ExpertError::PreconditionError(format!(
                "data source misses columns {:?}, available {:?}",
                missing, available
            )));
        }
        Ok(())
    }

    fn persisted_config(&self, run: &RunConfig) -> Result<Value> {
        let mut config = serde_json::to_value(&self.config)?;
        if let Some(obj) = config.as_object_mut() {
            obj.insert("run_kwargs".to_string(), serde_json::to_value(run)?);
        }
        Ok(config)
    }

    /// Check the configuration against the store one, or persist it with the
    /// expert locations on first use of the store
    fn persist_config(
        &self,
        store: &TableStore,
        run: &RunConfig,
        locations: &ExpertLocations,
    ) -> Result<()> {
        let current = self.persisted_config(run)?;
        let table = run.table_name(OI_CONFIG);
        match store.get_attr::<Value>(&table, OI_CONFIG)? {
            Some(previous) => {
                if run.check_config_compatible {
                    check_compatible(&previous, &current, &run.skip_valid_checks_on)?;
                    debug!("Configuration compatible with the store one");
                } else {
                    warn!("Configuration compatibility with the store is not checked");
                }
            }
            None => {
                let config_table = Table::with_rows(
                    Schema::new(vec!["idx"], vec!["config"]),
                    vec![Row::new(vec![0.], vec![Cell::from(current.to_string())])],
                )?;
                store.append(&table, &config_table)?;
                store.set_attr(&table, OI_CONFIG, &current)?;

                let coords_col = locations.coords_col();
                let aux: Vec<String> = locations
                    .frame()
                    .columns()
                    .iter()
                    .filter(|c| !coords_col.contains(c))
                    .cloned()
                    .collect();
                let rows = locations
                    .iter()
                    .map(|loc| {
                        Row::new(
                            loc.coords().to_vec(),
                            loc.aux().iter().map(|(_, v)| Cell::from(*v)).collect(),
                        )
                    })
                    .collect();
                let locs_table = Table::with_rows(Schema::new(coords_col.to_vec(), aux), rows)?;
                store.append(&run.table_name(EXPERT_LOCS), &locs_table)?;
                info!("Configuration and {} expert locations stored", locations.len());
            }
        }
        Ok(())
    }

    /// Process every expert location not yet recorded in the store.
    ///
    /// Results are appended every `store_every` locations and at the end.
    /// A failing model only marks its location as failed, configuration or
    /// data source errors abort the run after writing what was computed.
    pub fn run(&self, run: &RunConfig) -> Result<RunSummary> {
        let locations = self.locations.as_ref().ok_or_else(|| {
            ExpertError::PreconditionError("expert locations are not set".to_string())
        })?;
        let source = self.data_source.as_deref().ok_or_else(|| {
            ExpertError::PreconditionError("data source is not set".to_string())
        })?;
        if run.store_every == 0 {
            return Err(ExpertError::ConfigError(
                "store_every should be at least 1".to_string(),
            ));
        }
        self.check_source(source)?;
        let policy = ModelSelectionPolicy::new(&self.config.model, &self.registry)?;
        let loader = self
            .config
            .model
            .load_params
            .as_ref()
            .map(ParamsLoader::new)
            .transpose()?;

        let store = TableStore::open(&run.store_path)?;
        self.persist_config(&store, run, locations)?;
        let ledger = RunLedger::from_store(&store, &run.table_name(RUN_DETAILS))?;
        let pending = ledger.pending(locations);
        info!(
            "{} expert locations, {} to process, results in {:?}",
            locations.len(),
            pending.len(),
            run.store_path
        );

        let mut session = RunSession {
            store: &store,
            run,
            policy,
            loader,
            cache: GlobalDataCache::new(),
            buffer: ResultBuffer::new(run.store_every, run.table_name(RUN_DETAILS)),
            smoothers: BTreeMap::new(),
            ledger,
            summary: RunSummary {
                total: locations.len(),
                pending: pending.len(),
                ..RunSummary::default()
            },
        };
        for (i, location) in pending.iter().enumerate() {
            debug!("Location {} ({}/{})", location.key(), i + 1, pending.len());
            if let Err(err) = self.process_location(&mut session, source, location) {
                error!("Run aborted at location {}: {}", location.key(), err);
                let summary = session.finish();
                info!("{}", summary);
                return Err(err);
            }
            if session.buffer.should_flush() {
                session.flush();
            }
        }
        let summary = session.finish();
        info!("{}", summary);
        Ok(summary)
    }

    fn process_location(
        &self,
        session: &mut RunSession,
        source: &dyn DataSource,
        location: &ExpertLocation,
    ) -> Result<()> {
        let start = Instant::now();
        let data_config = &self.config.data;
        let predicates =
            compile_predicates(&data_config.global_select, &data_config.local_select, location)?;
        let (global, _) = session
            .cache
            .refresh_if_needed(predicates, source, &self.col_funcs)?;
        let local = select_local(global, location, &data_config.local_select)?;
        let n_obs = local.nrows();
        let key = location.key();
        let run = session.run;

        let mut results = BTreeMap::new();
        let model = session.policy.select(n_obs).clone();
        let record = if n_obs < run.min_obs {
            info!(
                "Location {}: {} observations < {}, skipped",
                key, n_obs, run.min_obs
            );
            session.summary.too_few_obs += 1;
            RunRecord::too_few_obs(n_obs, model.kind.to_string())
        } else {
            let fitted = self
                .fit(session, &model, &local, location)
                .and_then(|fit| {
                    let tables = self.result_tables(run, location, &fit)?;
                    Ok((fit, tables))
                });
            match fitted {
                Ok((fit, tables)) => {
                    results.extend(tables);
                    session
                        .smoothers
                        .entry(model.kind.clone())
                        .or_default()
                        .update(&fit.params, fit.success);
                    session.summary.fitted += 1;
                    let record = RunRecord {
                        num_obs: n_obs,
                        run_time: start.elapsed().as_secs_f64(),
                        mll: fit.mll,
                        optimise_success: fit.success,
                        model: model.kind.to_string(),
                        status: RunStatus::Ok,
                    };
                    info!(
                        "Location {}: {} fitted on {} observations, mll {:.4} ({:.3}s)",
                        key, record.model, n_obs, record.mll, record.run_time
                    );
                    record
                }
                Err(err) => {
                    warn!("Location {}: {} fit failed: {}", key, model.kind, err);
                    session.summary.fit_failed += 1;
                    RunRecord::fit_failed(n_obs, start.elapsed().as_secs_f64(), model.kind.to_string())
                }
            }
        };
        results.insert(run.table_name(RUN_DETAILS), record.to_table(location)?);
        session.buffer.add(&key, results);
        session.ledger.record(key);
        session.summary.processed += 1;
        Ok(())
    }

    fn fit(
        &self,
        session: &RunSession,
        model: &ResolvedModel,
        local: &Frame,
        location: &ExpertLocation,
    ) -> Result<Fit> {
        let model_config = &self.config.model;
        let data = ModelData {
            data: local,
            obs_col: &self.config.data.obs_col,
            coords_col: &self.config.data.coords_col,
            expert_loc: location.coords(),
        };
        let mut local_model = (model.builder)(&data)?;
        let names = local_model.param_names();

        if model_config.use_prev_params {
            if let Some(previous) = session
                .smoothers
                .get(&model.kind)
                .and_then(|s| s.current())
            {
                let previous: Params = previous
                    .iter()
                    .filter(|(name, _)| names.contains(&name.as_str()))
                    .map(|(name, v)| (name.clone(), v.clone()))
                    .collect();
                local_model.set_parameters(&previous)?;
            }
        }
        if let Some(loader) = session.loader.as_ref() {
            let loaded = loader.load(location, &names)?;
            if !loaded.is_empty() {
                debug!("Loaded {:?}", loaded.keys().collect::<Vec<_>>());
                local_model.set_parameters(&loaded)?;
            }
        }
        if !model.constraints.is_empty() {
            local_model.set_parameter_constraints(
                &model.constraints,
                model_config.constraint_tol,
                model_config.move_within_tol,
            )?;
        }

        let success = if session.run.optimise {
            local_model.optimise_parameters(&model.optim_kwargs)?
        } else {
            false
        };
        let mll = local_model.objective_function_value()?;
        let params = local_model.parameters();
        let predictions = if session.run.predict {
            let coords = self.pred_locs.generate(location)?;
            if coords.nrows() == 0 {
                debug!("No prediction location for {}", location.key());
                None
            } else {
                let predictions = local_model.predict(&coords)?;
                Some((coords, predictions))
            }
        } else {
            None
        };
        Ok(Fit {
            success,
            mll,
            params,
            predictions,
        })
    }

    fn result_tables(
        &self,
        run: &RunConfig,
        location: &ExpertLocation,
        fit: &Fit,
    ) -> Result<BTreeMap<String, Table>> {
        let to_store = &self.config.model.params_to_store;
        let mut tables: BTreeMap<String, Table> =
            parameter_tables(location, &fit.params, |name| to_store.contains(name))?
                .into_iter()
                .map(|(name, table)| (run.table_name(&name), table))
                .collect();
        if let Some((coords, predictions)) = fit.predictions.as_ref() {
            tables.insert(
                run.table_name(PREDS),
                predictions_table(location, coords, predictions)?,
            );
        }
        Ok(tables)
    }
}
