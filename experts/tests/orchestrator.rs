use loxi_experts::{
    DynamicRule, ExpertError, ExpertLocsConfig, LocalExpertConfig, LocalExpertOI, LocalRule,
    PredictionLocations, RunConfig, RunRecord, SelectionRule, Transform,
};
use loxi_frame::{Comparator, DataSource, Frame, FrameError, Predicate};
use loxi_gp::{
    GpError, LocalModel, ModelBuilder, ModelData, ModelKind, ModelRegistry, OptimParams,
};
use loxi_store::{Cell, IndexKey, Row, Schema, Table, TableStore};
use ndarray::{array, Array2};
use serde_json::{json, Value};
use serial_test::serial;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_log() {
    let env = env_logger::Env::new().filter_or("LOXI_LOG", "info");
    let mut builder = env_logger::Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();
}

/// Observations on a 5x5 grid at t = 0, 10, 20 plus an isolated one
fn observations() -> Frame {
    let mut values = vec![];
    for t in [0., 10., 20.] {
        for i in 0..5 {
            for j in 0..5 {
                let (x, y) = (i as f64, j as f64);
                values.extend([x, y, t, (0.7 * x).sin() + (0.5 * y).cos() + 0.01 * t]);
            }
        }
    }
    values.extend([50., 50., 0., 1.]);
    let n = values.len() / 4;
    Frame::new(
        vec!["x", "y", "t", "obs"],
        Array2::from_shape_vec((n, 4), values).unwrap(),
    )
    .unwrap()
}

/// 10 locations, unsorted: 3 per date on the grid and an isolated one
fn locations() -> Frame {
    Frame::new(
        vec!["x", "y", "t"],
        array![
            [1., 1., 20.],
            [1., 1., 0.],
            [2., 2., 10.],
            [50., 50., 0.],
            [2., 2., 0.],
            [3., 3., 20.],
            [1., 1., 10.],
            [3., 3., 0.],
            [2., 2., 20.],
            [3., 3., 10.]
        ],
    )
    .unwrap()
}

struct CountingSource {
    frame: Frame,
    calls: Arc<AtomicUsize>,
    fail_from: Option<usize>,
}

impl CountingSource {
    fn new(calls: Arc<AtomicUsize>, fail_from: Option<usize>) -> Self {
        CountingSource {
            frame: observations(),
            calls,
            fail_from,
        }
    }
}

impl DataSource for CountingSource {
    fn select(&self, predicates: &[Predicate]) -> loxi_frame::Result<Frame> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.fail_from, Some(n) if call >= n) {
            return Err(FrameError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "source offline",
            )));
        }
        self.frame.filter(predicates)
    }

    fn columns(&self) -> loxi_frame::Result<Vec<String>> {
        Ok(self.frame.columns().to_vec())
    }
}

fn config() -> LocalExpertConfig {
    LocalExpertConfig::default()
        .obs_col("obs")
        .coords_col(vec!["x", "y", "t"])
        .global_select(vec![SelectionRule::from(DynamicRule {
            loc_col: "t".to_string(),
            src_col: "t".to_string(),
            func: Transform::Add,
        })])
        .local_select(vec![
            LocalRule::new("t", Comparator::Ge, -1.),
            LocalRule::new("t", Comparator::Le, 1.),
            LocalRule::distance(vec!["x", "y"], Comparator::Le, 1.5),
        ])
        .model(ModelKind::Gpr, json!({"likelihood_variance": 0.01}))
        .optim_kwargs(OptimParams {
            max_eval: 50,
            ..OptimParams::default()
        })
        .locations(ExpertLocsConfig {
            sort_by: vec!["t".to_string()],
            ..ExpertLocsConfig::default()
        })
}

fn engine(config: LocalExpertConfig, source: CountingSource) -> LocalExpertOI {
    LocalExpertOI::new(config)
        .unwrap()
        .with_data_source(source)
        .with_expert_locations(locations())
        .unwrap()
}

fn fresh(path: &str) -> String {
    let _ = std::fs::remove_dir_all(path);
    path.to_string()
}

fn row_of(table: &Table, loc: &[f64]) -> usize {
    let key = IndexKey::new(loc);
    table
        .index_keys()
        .iter()
        .position(|k| *k == key)
        .expect("location recorded")
}

fn snapshot(store: &TableStore) -> BTreeMap<String, String> {
    store
        .tables()
        .unwrap()
        .into_iter()
        .map(|name| {
            let table = store.read(&name).unwrap();
            (name, format!("{:?}", table))
        })
        .collect()
}

#[test]
#[serial]
fn test_end_to_end() {
    init_log();
    let path = fresh("target/tests/oi/end_to_end");
    let calls = Arc::new(AtomicUsize::new(0));
    let oi = engine(config(), CountingSource::new(calls.clone(), None));
    let summary = oi.run(&RunConfig::new(&path).store_every(4)).unwrap();

    assert_eq!(summary.total, 10);
    assert_eq!(summary.pending, 10);
    assert_eq!(summary.processed, 10);
    assert_eq!(summary.fitted, 9);
    assert_eq!(summary.too_few_obs, 1);
    assert_eq!(summary.fit_failed, 0);
    // locations are sorted by date: one global load per date
    assert_eq!(summary.cache_refreshes, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(summary.flushes, 3);
    assert!(summary.unflushed.is_empty() && summary.unrecorded.is_empty());

    let store = TableStore::open(&path).unwrap();
    let run_details = store.read("run_details").unwrap();
    assert_eq!(run_details.len(), 10);
    assert_eq!(store.read("preds").unwrap().len(), 9);
    assert_eq!(store.read("lengthscales").unwrap().len(), 27);
    assert_eq!(store.read("kernel_variance").unwrap().len(), 9);
    assert_eq!(store.read("expert_locs").unwrap().len(), 10);
    assert_eq!(store.read("oi_config").unwrap().len(), 1);

    let i = row_of(&run_details, &[50., 50., 0.]);
    assert_eq!(run_details.cell(i, "num_obs").unwrap(), &Cell::Int(1));
    assert_eq!(
        run_details.cell(i, "status").unwrap().as_str(),
        Some("too_few_obs")
    );
    assert!(run_details.cell(i, "mll").unwrap().as_f64().unwrap().is_nan());
    assert_eq!(
        run_details.cell(i, "optimise_success").unwrap(),
        &Cell::Bool(false)
    );

    let i = row_of(&run_details, &[2., 2., 10.]);
    assert_eq!(run_details.cell(i, "num_obs").unwrap(), &Cell::Int(9));
    assert_eq!(run_details.cell(i, "status").unwrap().as_str(), Some("ok"));
    assert_eq!(run_details.cell(i, "model").unwrap().as_str(), Some("Gpr"));
    assert!(run_details.cell(i, "mll").unwrap().as_f64().unwrap().is_finite());

    let preds = store.read("preds").unwrap();
    let i = row_of(&preds, &[3., 3., 20.]);
    assert_eq!(preds.cell(i, "pred_loc_x").unwrap(), &Cell::Float(3.));
    assert_eq!(preds.cell(i, "pred_loc_t").unwrap(), &Cell::Float(20.));
    let fstar = preds.cell(i, "f*").unwrap().as_f64().unwrap();
    let expected = (0.7 * 3f64).sin() + (0.5 * 3f64).cos() + 0.2;
    assert!((fstar - expected).abs() < 0.5, "f* = {fstar}, obs = {expected}");
    assert!(preds.cell(i, "f*_var").unwrap().as_f64().unwrap() >= 0.);
}

#[test]
#[serial]
fn test_rerun_is_idempotent() {
    init_log();
    let path = fresh("target/tests/oi/rerun");
    let calls = Arc::new(AtomicUsize::new(0));
    let run = RunConfig::new(&path).store_every(3);

    let first = engine(config(), CountingSource::new(calls.clone(), None))
        .run(&run)
        .unwrap();
    assert_eq!(first.processed, 10);
    let store = TableStore::open(&path).unwrap();
    let tables = snapshot(&store);

    for _ in 0..2 {
        let again = engine(config(), CountingSource::new(calls.clone(), None))
            .run(&run)
            .unwrap();
        assert_eq!(again.total, 10);
        assert_eq!(again.pending, 0);
        assert_eq!(again.processed, 0);
        assert_eq!(again.flushes, 0);
        assert_eq!(snapshot(&store), tables);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
#[serial]
fn test_resume_after_abort() {
    init_log();
    let path = fresh("target/tests/oi/resume");
    let run = RunConfig::new(&path).store_every(1);

    // the source goes offline when loading the third date
    let calls = Arc::new(AtomicUsize::new(0));
    let aborted = engine(config(), CountingSource::new(calls, Some(2))).run(&run);
    assert!(matches!(aborted, Err(ExpertError::FrameError(FrameError::IoError(_)))));

    let store = TableStore::open(&path).unwrap();
    assert_eq!(store.read("run_details").unwrap().len(), 7);

    let calls = Arc::new(AtomicUsize::new(0));
    let summary = engine(config(), CountingSource::new(calls, None))
        .run(&run)
        .unwrap();
    assert_eq!(summary.pending, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.cache_refreshes, 1);

    let keys = store.read("run_details").unwrap().index_keys();
    assert_eq!(keys.len(), 10);
    assert_eq!(keys.into_iter().collect::<HashSet<_>>().len(), 10);
    assert_eq!(store.read("preds").unwrap().len(), 9);
}

#[test]
#[serial]
fn test_unrecorded_locations_are_rewritten() {
    init_log();
    let path = fresh("target/tests/oi/unrecorded");
    let run = RunConfig::new(&path).store_every(20);

    // a foreign run details row storing `num_obs` as text makes every later
    // append to the table fail
    let store = TableStore::open(&path).unwrap();
    let schema = Schema::new(vec!["x", "y", "t"], RunRecord::columns());
    let foreign = Row::new(
        vec![99., 99., 99.],
        vec![
            Cell::from("many"),
            Cell::from(0.),
            Cell::from(0.),
            Cell::from(true),
            Cell::from("Gpr"),
            Cell::from("ok"),
        ],
    );
    store
        .append("run_details", &Table::with_rows(schema, vec![foreign]).unwrap())
        .unwrap();

    for n in 1..=2 {
        let calls = Arc::new(AtomicUsize::new(0));
        let summary = engine(config(), CountingSource::new(calls, None))
            .run(&run)
            .unwrap();
        assert_eq!(summary.pending, 10);
        assert_eq!(summary.processed, 10);
        assert_eq!(summary.unrecorded.len(), 10);
        assert!(summary.unflushed.is_empty());
        assert_eq!(store.read("run_details").unwrap().len(), 1);
        assert_eq!(store.read("preds").unwrap().len(), 9 * n);
    }
}

#[test]
#[serial]
fn test_failing_model_is_isolated() {
    init_log();
    let path = fresh("target/tests/oi/failing");
    let mut registry = ModelRegistry::default();
    registry.register(
        ModelKind::from("Flaky"),
        Arc::new(|init: &Value| -> loxi_gp::Result<ModelBuilder> {
            let gpr = ModelRegistry::default().resolve(&ModelKind::Gpr, init)?;
            Ok(Arc::new(move |data: &ModelData| -> loxi_gp::Result<Box<dyn LocalModel>> {
                if data.expert_loc[0] == 2. {
                    Err(GpError::DataError("flaky model".to_string()))
                } else {
                    gpr(data)
                }
            }) as ModelBuilder)
        }),
    );
    let config = config().model(ModelKind::from("Flaky"), json!({"likelihood_variance": 0.01}));
    let oi = engine(config, CountingSource::new(Arc::new(AtomicUsize::new(0)), None))
        .with_registry(registry);
    let summary = oi.run(&RunConfig::new(&path)).unwrap();

    assert_eq!(summary.processed, 10);
    assert_eq!(summary.fitted, 6);
    assert_eq!(summary.fit_failed, 3);
    assert_eq!(summary.too_few_obs, 1);

    let store = TableStore::open(&path).unwrap();
    let run_details = store.read("run_details").unwrap();
    assert_eq!(run_details.len(), 10);
    let i = row_of(&run_details, &[2., 2., 0.]);
    assert_eq!(
        run_details.cell(i, "status").unwrap().as_str(),
        Some("fit_failed")
    );
    assert_eq!(run_details.cell(i, "model").unwrap().as_str(), Some("Flaky"));
    assert_eq!(store.read("preds").unwrap().len(), 6);
}

#[test]
#[serial]
fn test_incompatible_config() {
    init_log();
    let path = fresh("target/tests/oi/incompatible");
    let source = || CountingSource::new(Arc::new(AtomicUsize::new(0)), None);
    engine(config().comment("first"), source())
        .run(&RunConfig::new(&path))
        .unwrap();

    // comment and run settings are free to change
    engine(config().comment("second"), source())
        .run(&RunConfig::new(&path).store_every(2).min_obs(5))
        .unwrap();

    let changed = config().model(ModelKind::Gpr, json!({"likelihood_variance": 0.1}));
    match engine(changed.clone(), source()).run(&RunConfig::new(&path)) {
        Err(ExpertError::IncompatibleConfig { path, .. }) => {
            assert_eq!(path, "model.init_params.likelihood_variance")
        }
        other => panic!("unexpected {:?}", other),
    }
    let skipped = RunConfig::new(&path).skip_valid_checks_on(vec!["model.init_params"]);
    assert_eq!(engine(changed.clone(), source()).run(&skipped).unwrap().pending, 0);
    let unchecked = RunConfig::new(&path).check_config_compatible(false);
    assert!(engine(changed, source()).run(&unchecked).is_ok());
}

#[test]
#[serial]
fn test_replacement_model() {
    init_log();
    let path = fresh("target/tests/oi/replacement");
    let config = config().replacement(10, ModelKind::Mean, Value::Null);
    let summary = engine(config, CountingSource::new(Arc::new(AtomicUsize::new(0)), None))
        .run(&RunConfig::new(&path))
        .unwrap();
    assert_eq!(summary.fitted, 9);

    let store = TableStore::open(&path).unwrap();
    let run_details = store.read("run_details").unwrap();
    let i = row_of(&run_details, &[1., 1., 10.]);
    assert_eq!(run_details.cell(i, "model").unwrap().as_str(), Some("Mean"));
    assert_eq!(store.read("mean").unwrap().len(), 9);
    assert!(!store.has_table("lengthscales"));
}

#[test]
#[serial]
fn test_prediction_frame_and_suffix() {
    init_log();
    let path = fresh("target/tests/oi/pred_frame");
    let grid = Frame::new(vec!["x", "y"], array![[1., 1.], [1.5, 1.], [3., 3.]]).unwrap();
    let oi = engine(
        config(),
        CountingSource::new(Arc::new(AtomicUsize::new(0)), None),
    )
    .with_prediction_locations(PredictionLocations::FromFrame {
        frame: grid,
        max_dist: Some(1.),
    });
    let run = RunConfig::new(&path).table_suffix("_v1").optimise(false);
    let summary = oi.run(&run).unwrap();
    assert_eq!(summary.fitted, 9);

    let store = TableStore::open(&path).unwrap();
    assert!(!store.has_table("run_details"));
    let run_details = store.read("run_details_v1").unwrap();
    let i = row_of(&run_details, &[1., 1., 0.]);
    assert_eq!(
        run_details.cell(i, "optimise_success").unwrap(),
        &Cell::Bool(false)
    );
    // (1, 1) sees two grid points, (2, 2) none and (3, 3) one, for each date
    let preds = store.read("preds_v1").unwrap();
    assert_eq!(preds.len(), 9);
    let i = row_of(&preds, &[1., 1., 10.]);
    assert_eq!(preds.cell(i, "pred_loc_t").unwrap(), &Cell::Float(10.));
    assert_eq!(store.read("lengthscales_v1").unwrap().len(), 27);
}
