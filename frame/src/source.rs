use crate::errors::{FrameError, Result};
use crate::frame::Frame;
use crate::predicate::Predicate;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A source of observations which can be queried with a conjunction of predicates.
///
/// Implementations are expected to be expensive to query: callers should cache
/// selections rather than reading the source for each request.
pub trait DataSource: Send + Sync {
    /// Rows matching all the given predicates
    fn select(&self, predicates: &[Predicate]) -> Result<Frame>;
    /// Available columns
    fn columns(&self) -> Result<Vec<String>>;
}

impl DataSource for Frame {
    fn select(&self, predicates: &[Predicate]) -> Result<Frame> {
        self.filter(predicates)
    }

    fn columns(&self) -> Result<Vec<String>> {
        Ok(Frame::columns(self).to_vec())
    }
}

/// A csv file read lazily on each selection.
#[derive(Clone, Debug)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    /// Constructor
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        CsvSource { path: path.into() }
    }
}

impl DataSource for CsvSource {
    fn select(&self, predicates: &[Predicate]) -> Result<Frame> {
        Frame::from_csv(&self.path)?.filter(predicates)
    }

    fn columns(&self) -> Result<Vec<String>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let columns = reader
            .headers()?
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        Ok(columns)
    }
}

type ColumnFn = dyn Fn(&Frame) -> Result<Array1<f64>> + Send + Sync;

/// A derived column computed from a frame and appended to it.
pub struct ColumnFunc {
    name: String,
    func: Box<ColumnFn>,
}

impl ColumnFunc {
    /// Constructor
    pub fn new<S, F>(name: S, func: F) -> Self
    where
        S: Into<String>,
        F: Fn(&Frame) -> Result<Array1<f64>> + Send + Sync + 'static,
    {
        ColumnFunc {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Name of the produced column
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compute the column and add it to the frame (replacing an existing one)
    pub fn apply(&self, frame: &mut Frame) -> Result<()> {
        let values = (self.func)(frame)?;
        frame.add_column(self.name.as_str(), values)
    }
}

impl fmt::Debug for ColumnFunc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ColumnFunc").field("name", &self.name).finish()
    }
}

/// Serializable affine column derivation: `name = source * scale + offset`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Produced column name
    pub name: String,
    /// Source column name
    pub source: String,
    /// Multiplicative factor
    #[serde(default = "one")]
    pub scale: f64,
    /// Additive offset
    #[serde(default)]
    pub offset: f64,
}

fn one() -> f64 {
    1.
}

impl From<ColumnSpec> for ColumnFunc {
    fn from(spec: ColumnSpec) -> ColumnFunc {
        let ColumnSpec {
            name,
            source,
            scale,
            offset,
        } = spec;
        ColumnFunc::new(name, move |df: &Frame| {
            if !df.has_column(&source) {
                return Err(FrameError::ColumnNotFound(source.to_string()));
            }
            Ok(df.column(&source)?.mapv(|v| v * scale + offset))
        })
    }
}
