//! Buffering of per-location results before they are appended to the store.

use log::{debug, error, warn};
use loxi_store::{IndexKey, StoreError, Table, TableStore};
use std::collections::{BTreeMap, BTreeSet};

/// Results of one location for one table
#[derive(Clone, Debug)]
struct Fragment {
    key: IndexKey,
    table: Table,
}

/// A table append that failed during a flush
#[derive(Clone, Debug, PartialEq)]
pub struct FlushFailure {
    /// Table name
    pub table: String,
    /// Error message
    pub reason: String,
    /// Locations whose rows were not written
    pub keys: Vec<IndexKey>,
}

/// Overall result of a flush
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every table written
    Complete,
    /// Ledger written, some data tables failed
    LedgerOnly,
    /// Ledger not written: the locations will be processed again by the next run
    LedgerFailed,
}

/// Report of a flush
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushReport {
    /// Tables appended successfully
    pub written: Vec<String>,
    /// Failed appends
    pub failures: Vec<FlushFailure>,
    /// Number of locations flushed
    pub locations: usize,
    ledger_failed: bool,
}

impl FlushReport {
    /// Flush outcome
    pub fn outcome(&self) -> FlushOutcome {
        if self.ledger_failed {
            FlushOutcome::LedgerFailed
        } else if !self.failures.is_empty() {
            FlushOutcome::LedgerOnly
        } else {
            FlushOutcome::Complete
        }
    }

    /// Locations with at least one failed append
    pub fn failed_keys(&self) -> BTreeSet<IndexKey> {
        self.failures
            .iter()
            .flat_map(|f| f.keys.iter().cloned())
            .collect()
    }
}

/// Per-table lists of result rows, flushed every `store_every` locations.
///
/// The ledger table is always written last so that a location is recorded
/// as processed only once its other results had a chance to be written.
#[derive(Debug)]
pub struct ResultBuffer {
    store_every: usize,
    ledger_table: String,
    tables: BTreeMap<String, Vec<Fragment>>,
}

impl ResultBuffer {
    /// Constructor, `store_every` is at least 1
    pub fn new<S: Into<String>>(store_every: usize, ledger_table: S) -> Self {
        ResultBuffer {
            store_every: store_every.max(1),
            ledger_table: ledger_table.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Buffer the result tables of the location `key`
    pub fn add(&mut self, key: &IndexKey, tables: BTreeMap<String, Table>) {
        for (name, table) in tables {
            self.tables.entry(name).or_default().push(Fragment {
                key: key.clone(),
                table,
            });
        }
    }

    /// Whether a table holds `store_every` fragments or more
    pub fn should_flush(&self) -> bool {
        self.tables
            .values()
            .map(|f| f.len())
            .max()
            .map_or(false, |n| n >= self.store_every)
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|f| f.is_empty())
    }

    /// Append every buffered table to the store and clear the buffer.
    ///
    /// Append failures do not stop the flush, they are reported per location.
    pub fn flush(&mut self, store: &TableStore) -> FlushReport {
        let mut tables = std::mem::take(&mut self.tables);
        let mut report = FlushReport {
            locations: tables
                .get(&self.ledger_table)
                .map_or(0, |f| f.len()),
            ..FlushReport::default()
        };
        let ledger = tables.remove(&self.ledger_table);
        let ordered = tables
            .into_iter()
            .chain(ledger.map(|f| (self.ledger_table.clone(), f)));
        for (name, fragments) in ordered {
            if fragments.is_empty() {
                continue;
            }
            let mut ok = true;
            for group in group_by_schema(fragments) {
                for (keys, err) in append_group(store, &name, group) {
                    ok = false;
                    if name == self.ledger_table {
                        error!("Cannot record {} locations in '{}': {}", keys.len(), name, err);
                        report.ledger_failed = true;
                    } else {
                        warn!("Cannot write {} locations to '{}': {}", keys.len(), name, err);
                    }
                    report.failures.push(FlushFailure {
                        table: name.clone(),
                        reason: err.to_string(),
                        keys,
                    });
                }
            }
            if ok {
                report.written.push(name);
            }
        }
        debug!(
            "Flushed {} locations ({} tables written, {} failures)",
            report.locations,
            report.written.len(),
            report.failures.len()
        );
        report
    }
}

/// Append a group in one go, falling back to one append per fragment so that
/// a bad fragment does not take the others down. Returns the failures.
fn append_group(
    store: &TableStore,
    name: &str,
    group: Vec<Fragment>,
) -> Vec<(Vec<IndexKey>, StoreError)> {
    let tables: Vec<Table> = group.iter().map(|f| f.table.clone()).collect();
    let err = match Table::concat(&tables).and_then(|t| store.append(name, &t)) {
        Ok(()) => return vec![],
        Err(err) => err,
    };
    if group.len() == 1 {
        return vec![(vec![group[0].key.clone()], err)];
    }
    debug!("Append fragments of '{}' one by one after: {}", name, err);
    group
        .into_iter()
        .filter_map(|f| match store.append(name, &f.table) {
            Ok(()) => None,
            Err(err) => Some((vec![f.key], err)),
        })
        .collect()
}

fn group_by_schema(fragments: Vec<Fragment>) -> Vec<Vec<Fragment>> {
    let mut groups: Vec<Vec<Fragment>> = vec![];
    for fragment in fragments {
        match groups
            .iter_mut()
            .find(|g| g[0].table.schema() == fragment.table.schema())
        {
            Some(group) => group.push(fragment),
            None => groups.push(vec![fragment]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use loxi_store::{Cell, Row, Schema};
    use serial_test::serial;

    fn table(x: f64, column: &str, value: Cell) -> Table {
        Table::with_rows(
            Schema::new(vec!["x"], vec![column]),
            vec![Row::new(vec![x], vec![value])],
        )
        .unwrap()
    }

    fn results(x: f64, value: Cell) -> BTreeMap<String, Table> {
        let mut tables = BTreeMap::new();
        tables.insert("run_details".to_string(), table(x, "num_obs", Cell::from(5usize)));
        tables.insert("preds".to_string(), table(x, "f*", value));
        tables
    }

    #[test]
    fn test_should_flush() {
        let mut buffer = ResultBuffer::new(2, "run_details");
        assert!(buffer.is_empty());
        buffer.add(&IndexKey::new(&[0.]), results(0., Cell::from(1.)));
        assert!(!buffer.should_flush());
        buffer.add(&IndexKey::new(&[1.]), results(1., Cell::from(1.)));
        assert!(buffer.should_flush());
    }

    #[test]
    #[serial]
    fn test_flush() {
        let path = "target/tests/buffer/flush";
        let _ = std::fs::remove_dir_all(path);
        let store = TableStore::open(path).unwrap();
        let mut buffer = ResultBuffer::new(10, "run_details");
        buffer.add(&IndexKey::new(&[0.]), results(0., Cell::from(1.)));
        buffer.add(&IndexKey::new(&[1.]), results(1., Cell::from(2.)));

        let report = buffer.flush(&store);
        assert_eq!(report.outcome(), FlushOutcome::Complete);
        assert_eq!(report.locations, 2);
        assert_eq!(report.written, vec!["preds", "run_details"]);
        assert!(buffer.is_empty());
        assert_eq!(store.read("preds").unwrap().len(), 2);
        assert_eq!(store.read("run_details").unwrap().len(), 2);
    }

    #[test]
    #[serial]
    fn test_data_table_failure() {
        let path = "target/tests/buffer/failure";
        let _ = std::fs::remove_dir_all(path);
        let store = TableStore::open(path).unwrap();
        let mut buffer = ResultBuffer::new(10, "run_details");
        buffer.add(&IndexKey::new(&[0.]), results(0., Cell::from(1.)));
        buffer.flush(&store);

        // preds now holds floats, text cannot be appended
        buffer.add(&IndexKey::new(&[1.]), results(1., Cell::from("oops")));
        buffer.add(&IndexKey::new(&[2.]), results(2., Cell::from(3.)));
        let report = buffer.flush(&store);
        assert_eq!(report.outcome(), FlushOutcome::LedgerOnly);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].table, "preds");
        assert_eq!(
            report.failed_keys().into_iter().collect::<Vec<_>>(),
            vec![IndexKey::new(&[1.])]
        );
        assert_eq!(store.read("preds").unwrap().len(), 2);
        assert_eq!(store.read("run_details").unwrap().len(), 3);
    }

    #[test]
    #[serial]
    fn test_ledger_failure() {
        let path = "target/tests/buffer/ledger";
        let _ = std::fs::remove_dir_all(path);
        let store = TableStore::open(path).unwrap();
        let mut buffer = ResultBuffer::new(10, "run details");
        let mut tables = BTreeMap::new();
        tables.insert("run details".to_string(), table(0., "num_obs", Cell::from(5usize)));
        buffer.add(&IndexKey::new(&[0.]), tables);
        let report = buffer.flush(&store);
        assert_eq!(report.outcome(), FlushOutcome::LedgerFailed);
    }
}
