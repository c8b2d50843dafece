//! Record of the expert locations already processed in a results store.

use crate::errors::Result;
use crate::location::{ExpertLocation, ExpertLocations};
use log::{info, warn};
use loxi_store::{IndexKey, TableStore};
use std::collections::HashSet;
use std::path::Path;

/// Set of processed location keys, read from the run details table
#[derive(Clone, Debug, Default)]
pub struct RunLedger {
    done: HashSet<IndexKey>,
}

impl RunLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger of the store at `path`, empty when the store or the table is missing
    pub fn load<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        if !TableStore::exists(&path) {
            info!("No results store at {:?}, nothing processed yet", path.as_ref());
            return Ok(RunLedger::new());
        }
        Self::from_store(&TableStore::open(path)?, table)
    }

    /// Ledger of an opened store, empty when the table is missing
    pub fn from_store(store: &TableStore, table: &str) -> Result<Self> {
        if !store.has_table(table) {
            return Ok(RunLedger::new());
        }
        let done: HashSet<IndexKey> = store.read(table)?.index_keys().into_iter().collect();
        info!("{} locations already processed in '{}'", done.len(), table);
        Ok(RunLedger { done })
    }

    /// Locations not yet processed, in order and without duplicates
    pub fn pending(&self, locations: &ExpertLocations) -> Vec<ExpertLocation> {
        let mut seen = HashSet::new();
        let mut duplicates = 0;
        let pending: Vec<ExpertLocation> = locations
            .iter()
            .filter(|loc| {
                let key = loc.key();
                if !seen.insert(key.clone()) {
                    duplicates += 1;
                    return false;
                }
                !self.done.contains(&key)
            })
            .collect();
        if duplicates > 0 {
            warn!("{} duplicated expert locations ignored", duplicates);
        }
        pending
    }

    /// Mark a location as processed, returns whether it was not already
    pub fn record(&mut self, key: IndexKey) -> bool {
        self.done.insert(key)
    }

    /// Whether the location was processed
    pub fn contains(&self, key: &IndexKey) -> bool {
        self.done.contains(key)
    }

    /// Number of processed locations
    pub fn len(&self) -> usize {
        self.done.len()
    }

    /// Whether no location was processed
    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExpertError;
    use loxi_frame::Frame;
    use loxi_store::{Cell, Row, Schema, StoreError, Table};
    use ndarray::array;
    use serial_test::serial;

    fn locations() -> ExpertLocations {
        let df = Frame::new(
            vec!["x", "t"],
            array![[0., 0.], [1., 0.], [0., 0.], [2., 1.]],
        )
        .unwrap();
        ExpertLocations::new(df, &["x".to_string(), "t".to_string()]).unwrap()
    }

    #[test]
    #[serial]
    fn test_missing_store() {
        let path = "target/tests/ledger/missing";
        let _ = std::fs::remove_dir_all(path);
        let ledger = RunLedger::load(path, "run_details").unwrap();
        assert!(ledger.is_empty());
        assert!(!TableStore::exists(path));
        assert_eq!(ledger.pending(&locations()).len(), 3);
    }

    #[test]
    #[serial]
    fn test_pending() {
        let path = "target/tests/ledger/pending";
        let _ = std::fs::remove_dir_all(path);
        let store = TableStore::open(path).unwrap();
        let schema = Schema::new(vec!["x", "t"], vec!["num_obs"]);
        let table =
            Table::with_rows(schema, vec![Row::new(vec![1., 0.], vec![Cell::from(4usize)])])
                .unwrap();
        store.append("run_details", &table).unwrap();

        let mut ledger = RunLedger::load(path, "run_details").unwrap();
        assert_eq!(ledger.len(), 1);
        let pending: Vec<_> = ledger
            .pending(&locations())
            .iter()
            .map(|l| l.coords().to_vec())
            .collect();
        assert_eq!(pending, vec![vec![0., 0.], vec![2., 1.]]);

        assert!(ledger.record(IndexKey::new(&[2., 1.])));
        assert!(!ledger.record(IndexKey::new(&[2., 1.])));
        assert_eq!(ledger.pending(&locations()).len(), 1);

        assert!(RunLedger::from_store(&store, "other").unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn test_corrupted_table_is_reported() {
        let path = "target/tests/ledger/corrupted";
        let _ = std::fs::remove_dir_all(path);
        let store = TableStore::open(path).unwrap();
        let schema = Schema::new(vec!["x", "t"], vec!["num_obs"]);
        let table = Table::with_rows(
            schema,
            vec![
                Row::new(vec![1., 0.], vec![Cell::from(4usize)]),
                Row::new(vec![2., 1.], vec![Cell::from(5usize)]),
            ],
        )
        .unwrap();
        store.append("run_details", &table).unwrap();
        let data = store.root().join("run_details.bin");
        let bytes = std::fs::read(&data).unwrap();
        std::fs::write(&data, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(
            RunLedger::from_store(&store, "run_details"),
            Err(ExpertError::StoreError(StoreError::Corrupted { .. }))
        ));
        assert!(RunLedger::load(path, "run_details").is_err());
    }
}
