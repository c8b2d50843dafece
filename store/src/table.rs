use crate::errors::{Result, StoreError};
use loxi_frame::{Frame, Predicate};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stored value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// Floating point value
    Float(f64),
    /// Integer value
    Int(i64),
    /// Boolean flag
    Bool(bool),
    /// Free text
    Text(String),
}

impl Cell {
    /// Numeric view of the cell, text is not numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) => Some(*v),
            Cell::Int(v) => Some(*v as f64),
            Cell::Bool(v) => Some(if *v { 1. } else { 0. }),
            Cell::Text(_) => None,
        }
    }

    /// Boolean view of the cell
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the cell
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Cell::Float(_) => "float",
            Cell::Int(_) => "int",
            Cell::Bool(_) => "bool",
            Cell::Text(_) => "text",
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<usize> for Cell {
    fn from(v: usize) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Bool(v) => write!(f, "{}", v),
            Cell::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Table layout: index columns (numeric coordinates) followed by value columns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Index column names
    pub index: Vec<String>,
    /// Value column names
    pub columns: Vec<String>,
}

impl Schema {
    /// Constructor
    pub fn new<S: Into<String>, T: Into<String>>(index: Vec<S>, columns: Vec<T>) -> Self {
        Schema {
            index: index.into_iter().map(|s| s.into()).collect(),
            columns: columns.into_iter().map(|s| s.into()).collect(),
        }
    }
}

/// A table row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Index values
    pub index: Vec<f64>,
    /// Column values
    pub values: Vec<Cell>,
}

impl Row {
    /// Constructor
    pub fn new(index: Vec<f64>, values: Vec<Cell>) -> Self {
        Row { index, values }
    }

    /// Hashable key of the row index
    pub fn key(&self) -> IndexKey {
        IndexKey::new(&self.index)
    }
}

/// Exact, hashable identity of an index tuple.
///
/// Float values are compared bitwise, `-0.0` being identified with `0.0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey(Vec<u64>);

impl IndexKey {
    /// Key of the given index values
    pub fn new(values: &[f64]) -> Self {
        IndexKey(
            values
                .iter()
                .map(|v| if *v == 0. { 0f64.to_bits() } else { v.to_bits() })
                .collect(),
        )
    }

    /// Index values
    pub fn values(&self) -> Vec<f64> {
        self.0.iter().map(|b| f64::from_bits(*b)).collect()
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let values: Vec<String> = self.values().iter().map(|v| v.to_string()).collect();
        write!(f, "({})", values.join(", "))
    }
}

/// In-memory table, the unit of reading and appending
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    schema: Schema,
    rows: Vec<Row>,
}

impl Table {
    /// Empty table with given schema
    pub fn new(schema: Schema) -> Self {
        Table {
            schema,
            rows: vec![],
        }
    }

    /// Table from rows, each row is checked against the schema
    pub fn with_rows(schema: Schema, rows: Vec<Row>) -> Result<Self> {
        let mut table = Table::new(schema);
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    /// Table schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Table rows
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no row
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row
    pub fn push(&mut self, row: Row) -> Result<()> {
        if row.index.len() != self.schema.index.len() || row.values.len() != self.schema.columns.len()
        {
            return Err(StoreError::SchemaMismatch {
                table: String::new(),
                reason: format!(
                    "row has {} index and {} values, expected {} and {}",
                    row.index.len(),
                    row.values.len(),
                    self.schema.index.len(),
                    self.schema.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Vertical concatenation of tables sharing the same schema
    pub fn concat(tables: &[Table]) -> Result<Table> {
        let first = tables.first().ok_or_else(|| StoreError::SchemaMismatch {
            table: String::new(),
            reason: "no table to concatenate".to_string(),
        })?;
        let mut out = Table::new(first.schema.clone());
        for t in tables {
            if t.schema != first.schema {
                return Err(StoreError::SchemaMismatch {
                    table: String::new(),
                    reason: format!("{:?} vs {:?}", first.schema, t.schema),
                });
            }
            out.rows.extend(t.rows.iter().cloned());
        }
        Ok(out)
    }

    /// Index keys of all rows, in row order
    pub fn index_keys(&self) -> Vec<IndexKey> {
        self.rows.iter().map(|r| r.key()).collect()
    }

    /// Value of column `name` at row `i`
    pub fn cell(&self, i: usize, name: &str) -> Result<&Cell> {
        let j = self
            .schema
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| StoreError::ColumnNotFound(name.to_string()))?;
        Ok(&self.rows[i].values[j])
    }

    /// Numeric value of an index or value column at row `i` (NaN for text)
    fn numeric(&self, row: &Row, name: &str) -> Result<f64> {
        if let Some(k) = self.schema.index.iter().position(|c| c == name) {
            return Ok(row.index[k]);
        }
        let j = self
            .schema
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| StoreError::ColumnNotFound(name.to_string()))?;
        Ok(row.values[j].as_f64().unwrap_or(f64::NAN))
    }

    /// Rows matching all predicates on index or numeric value columns
    pub fn filter(&self, predicates: &[Predicate]) -> Result<Table> {
        let mut out = Table::new(self.schema.clone());
        'rows: for row in self.rows.iter() {
            for p in predicates {
                if !p.eval(self.numeric(row, &p.col)?) {
                    continue 'rows;
                }
            }
            out.rows.push(row.clone());
        }
        Ok(out)
    }

    /// Numeric frame made of index then value columns (text cells become NaN)
    pub fn to_frame(&self) -> Result<Frame> {
        let names: Vec<String> = self
            .schema
            .index
            .iter()
            .chain(self.schema.columns.iter())
            .cloned()
            .collect();
        let mut data = Array2::zeros((self.rows.len(), names.len()));
        for (i, row) in self.rows.iter().enumerate() {
            let values = row
                .index
                .iter()
                .copied()
                .chain(row.values.iter().map(|c| c.as_f64().unwrap_or(f64::NAN)));
            for (j, v) in values.enumerate() {
                data[[i, j]] = v;
            }
        }
        Frame::new(names, data).map_err(|e| StoreError::SchemaMismatch {
            table: String::new(),
            reason: e.to_string(),
        })
    }

    /// Cell kinds of the value columns, checked to be the same on every row
    pub(crate) fn kinds(&self) -> Result<Option<Vec<String>>> {
        let Some(first) = self.rows.first() else {
            return Ok(None);
        };
        for row in self.rows.iter().skip(1) {
            for ((a, b), name) in first
                .values
                .iter()
                .zip(row.values.iter())
                .zip(self.schema.columns.iter())
            {
                if a.kind() != b.kind() {
                    return Err(StoreError::SchemaMismatch {
                        table: String::new(),
                        reason: format!(
                            "column '{}' holds {} and {} values",
                            name,
                            a.kind(),
                            b.kind()
                        ),
                    });
                }
            }
        }
        Ok(Some(
            first.values.iter().map(|c| c.kind().to_string()).collect(),
        ))
    }
}
