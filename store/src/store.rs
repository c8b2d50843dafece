use crate::errors::{Result, StoreError};
use crate::table::{Row, Schema, Table};
use log::{debug, info};
use loxi_frame::Predicate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

const META_EXT: &str = "meta.json";
const DATA_EXT: &str = "bin";
const ATTRS_EXT: &str = "attrs.json";

/// Table metadata persisted next to the table data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct TableMeta {
    schema: Schema,
    kinds: Option<Vec<String>>,
}

/// A directory of named, append-only tables.
///
/// Each table `name` is stored as three files:
/// * `name.meta.json`: schema and value kinds, fixed by the first append,
/// * `name.bin`: a sequence of bincode encoded row chunks, one per append,
/// * `name.attrs.json`: free json attributes attached to the table.
///
/// Appends never rewrite existing rows: a chunk is written with a single
/// write call at the end of the data file.
#[derive(Clone, Debug)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    /// Open the store at `root`, creating the directory if needed
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() && !root.is_dir() {
            return Err(StoreError::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        if !root.exists() {
            info!("Create table store in {}", root.display());
            fs::create_dir_all(&root)?;
        }
        Ok(TableStore { root })
    }

    /// Whether a store exists at `root`
    pub fn exists<P: AsRef<Path>>(root: P) -> bool {
        root.as_ref().is_dir()
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str, ext: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidTableName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.{ext}")))
    }

    /// Whether the table `name` exists
    pub fn has_table(&self, name: &str) -> bool {
        self.path(name, META_EXT).map_or(false, |p| p.is_file())
    }

    /// Names of the stored tables, sorted
    pub fn tables(&self) -> Result<Vec<String>> {
        let suffix = format!(".{META_EXT}");
        let mut names = vec![];
        for entry in fs::read_dir(&self.root)? {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_string_lossy().strip_suffix(&suffix) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn meta(&self, name: &str) -> Result<Option<TableMeta>> {
        let path = self.path(name, META_EXT)?;
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_meta(&self, name: &str, meta: &TableMeta) -> Result<()> {
        fs::write(
            self.path(name, META_EXT)?,
            serde_json::to_string_pretty(meta)?,
        )?;
        Ok(())
    }

    /// Schema of table `name`
    pub fn schema(&self, name: &str) -> Result<Schema> {
        self.meta(name)?
            .map(|m| m.schema)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    /// Append the rows of `table` to the stored table `name`, creating it if needed.
    ///
    /// The table schema (and value kinds) must match the stored ones.
    pub fn append(&self, name: &str, table: &Table) -> Result<()> {
        let mismatch = |reason: String| StoreError::SchemaMismatch {
            table: name.to_string(),
            reason,
        };
        let kinds = table.kinds().map_err(|e| mismatch(e.to_string()))?;
        let meta = match self.meta(name)? {
            Some(mut meta) => {
                if &meta.schema != table.schema() {
                    return Err(mismatch(format!(
                        "stored {:?}, appended {:?}",
                        meta.schema,
                        table.schema()
                    )));
                }
                match (&meta.kinds, &kinds) {
                    (Some(stored), Some(appended)) if stored != appended => {
                        return Err(mismatch(format!(
                            "stored kinds {:?}, appended {:?}",
                            stored, appended
                        )));
                    }
                    (None, Some(_)) => {
                        meta.kinds = kinds;
                        self.write_meta(name, &meta)?;
                    }
                    _ => (),
                }
                meta
            }
            None => {
                let meta = TableMeta {
                    schema: table.schema().clone(),
                    kinds,
                };
                self.write_meta(name, &meta)?;
                meta
            }
        };
        if table.is_empty() {
            return Ok(());
        }
        let bytes = bincode::serialize(table.rows())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name, DATA_EXT)?)?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        debug!(
            "Append {} rows to table '{}' ({} columns)",
            table.len(),
            name,
            meta.schema.columns.len()
        );
        Ok(())
    }

    /// Read the whole table `name`
    pub fn read(&self, name: &str) -> Result<Table> {
        let schema = self.schema(name)?;
        let path = self.path(name, DATA_EXT)?;
        let mut rows = vec![];
        if path.is_file() {
            let bytes = fs::read(path)?;
            let len = bytes.len() as u64;
            let mut cursor = Cursor::new(bytes);
            while cursor.position() < len {
                let chunk: Vec<Row> =
                    bincode::deserialize_from(&mut cursor).map_err(|e| StoreError::Corrupted {
                        table: name.to_string(),
                        reason: e.to_string(),
                    })?;
                rows.extend(chunk);
            }
        }
        Table::with_rows(schema, rows).map_err(|e| StoreError::Corrupted {
            table: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Rows of table `name` matching all predicates (on index or numeric columns)
    pub fn select(&self, name: &str, predicates: &[Predicate]) -> Result<Table> {
        self.read(name)?.filter(predicates)
    }

    fn attrs(&self, name: &str) -> Result<BTreeMap<String, serde_json::Value>> {
        let path = self.path(name, ATTRS_EXT)?;
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Attach the attribute `key` to the table `name`
    pub fn set_attr<T: Serialize>(&self, name: &str, key: &str, value: &T) -> Result<()> {
        let mut attrs = self.attrs(name)?;
        attrs.insert(key.to_string(), serde_json::to_value(value)?);
        fs::write(
            self.path(name, ATTRS_EXT)?,
            serde_json::to_string_pretty(&attrs)?,
        )?;
        Ok(())
    }

    /// Attribute `key` of table `name` if any
    pub fn get_attr<T: DeserializeOwned>(&self, name: &str, key: &str) -> Result<Option<T>> {
        match self.attrs(name)?.remove(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
