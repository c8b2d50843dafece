use crate::errors::{FrameError, Result};
use crate::predicate::Predicate;
use log::debug;
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// A table of `f64` values with named columns.
///
/// Rows are positionally indexed: any selection returns a new frame whose rows
/// are numbered from zero. Time-like columns are expected to be already
/// encoded as numbers (e.g. days since an epoch).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameRepr", into = "FrameRepr")]
pub struct Frame {
    columns: Vec<String>,
    data: Array2<f64>,
}

#[derive(Clone, Serialize, Deserialize)]
struct FrameRepr {
    columns: Vec<String>,
    data: Array2<f64>,
}

impl From<Frame> for FrameRepr {
    fn from(frame: Frame) -> FrameRepr {
        FrameRepr {
            columns: frame.columns,
            data: frame.data,
        }
    }
}

impl TryFrom<FrameRepr> for Frame {
    type Error = FrameError;
    fn try_from(repr: FrameRepr) -> Result<Frame> {
        Frame::new(repr.columns, repr.data)
    }
}

impl Frame {
    /// Constructor given column names and a (nrows, ncols) data matrix
    pub fn new<S: Into<String>>(columns: Vec<S>, data: Array2<f64>) -> Result<Frame> {
        let columns: Vec<String> = columns.into_iter().map(|c| c.into()).collect();
        if columns.len() != data.ncols() {
            return Err(FrameError::ShapeError(format!(
                "{} column names given for data with {} columns",
                columns.len(),
                data.ncols()
            )));
        }
        let mut seen = HashSet::new();
        for c in columns.iter() {
            if !seen.insert(c.as_str()) {
                return Err(FrameError::DuplicateColumn(c.to_string()));
            }
        }
        Ok(Frame { columns, data })
    }

    /// An empty frame (no row) with given columns
    pub fn empty<S: Into<String>>(columns: Vec<S>) -> Result<Frame> {
        let ncols = columns.len();
        Frame::new(columns, Array2::zeros((0, ncols)))
    }

    /// Build a frame from (name, values) pairs, all values having the same length
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Array1<f64>)>) -> Result<Frame> {
        let nrows = columns.first().map_or(0, |(_, v)| v.len());
        let mut data = Array2::zeros((nrows, columns.len()));
        let mut names = Vec::with_capacity(columns.len());
        for (j, (name, values)) in columns.into_iter().enumerate() {
            let name = name.into();
            if values.len() != nrows {
                return Err(FrameError::ShapeError(format!(
                    "column '{}' has {} values, expected {}",
                    name,
                    values.len(),
                    nrows
                )));
            }
            data.column_mut(j).assign(&values);
            names.push(name);
        }
        Frame::new(names, data)
    }

    /// Read a frame from a csv file with a header line.
    ///
    /// Every value has to be numeric, empty and `nan` values are read as NaN.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Frame> {
        debug!("Reading csv file {:?}", path.as_ref());
        let mut reader = csv::Reader::from_path(path)?;
        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut values = Vec::new();
        let mut nrows = 0;
        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            for (raw, column) in record.iter().zip(columns.iter()) {
                let value = parse_value(raw).ok_or_else(|| FrameError::ParseError {
                    line,
                    column: column.to_string(),
                    value: raw.to_string(),
                })?;
                values.push(value);
            }
            nrows += 1;
        }
        let data = Array2::from_shape_vec((nrows, columns.len()), values)?;
        Frame::new(columns, data)
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Underlying (nrows, ncols) data
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Number of rows
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    /// Whether the frame has no row
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Whether the frame holds the given column
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Position of the given column
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))
    }

    /// View on a column values
    pub fn column(&self, name: &str) -> Result<ArrayView1<f64>> {
        Ok(self.data.column(self.column_index(name)?))
    }

    /// View on the i-th row
    pub fn row(&self, i: usize) -> ArrayView1<f64> {
        self.data.row(i)
    }

    /// Value at row `i` of column `name`
    pub fn value(&self, i: usize, name: &str) -> Result<f64> {
        let j = self.column_index(name)?;
        self.data
            .get((i, j))
            .copied()
            .ok_or_else(|| FrameError::ShapeError(format!("row {} out of bounds", i)))
    }

    /// Frame restricted to the given columns, in the given order
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Frame::new(
            names.iter().map(|n| n.as_ref().to_string()).collect(),
            self.data.select(Axis(1), &indices),
        )
    }

    /// Frame restricted to the given columns as a (nrows, names.len()) matrix
    pub fn to_matrix<S: AsRef<str>>(&self, names: &[S]) -> Result<Array2<f64>> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.data.select(Axis(1), &indices))
    }

    /// Frame made of the given rows, in the given order
    pub fn take(&self, indices: &[usize]) -> Frame {
        Frame {
            columns: self.columns.clone(),
            data: self.data.select(Axis(0), indices),
        }
    }

    /// Frame made of the rows where `mask` is true
    pub fn select_rows(&self, mask: &Array1<bool>) -> Frame {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(i, _)| i)
            .collect();
        self.take(&indices)
    }

    /// Row mask of the conjunction of the given predicates
    pub fn mask(&self, predicates: &[Predicate]) -> Result<Array1<bool>> {
        let mut mask = Array1::from_elem(self.nrows(), true);
        for p in predicates {
            let col = self.column(&p.col)?;
            Zip::from(&mut mask)
                .and(&col)
                .par_for_each(|keep, &v| *keep = *keep && p.eval(v));
        }
        Ok(mask)
    }

    /// Rows matching all predicates (an empty list keeps every row)
    pub fn filter(&self, predicates: &[Predicate]) -> Result<Frame> {
        if predicates.is_empty() {
            return Ok(self.clone());
        }
        Ok(self.select_rows(&self.mask(predicates)?))
    }

    /// Add a column, replacing its values if it already exists
    pub fn add_column<S: Into<String>>(&mut self, name: S, values: Array1<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.nrows() {
            return Err(FrameError::ShapeError(format!(
                "column '{}' has {} values, frame has {} rows",
                name,
                values.len(),
                self.nrows()
            )));
        }
        match self.column_index(&name) {
            Ok(j) => self.data.column_mut(j).assign(&values),
            Err(_) => {
                self.data = concatenate(
                    Axis(1),
                    &[self.data.view(), values.view().insert_axis(Axis(1))],
                )?;
                self.columns.push(name);
            }
        }
        Ok(())
    }

    /// Vertical concatenation of frames sharing the same columns
    pub fn concat(frames: &[Frame]) -> Result<Frame> {
        let first = frames
            .first()
            .ok_or_else(|| FrameError::ShapeError("no frame to concatenate".to_string()))?;
        let mut views = Vec::with_capacity(frames.len());
        for f in frames {
            if f.columns != first.columns {
                return Err(FrameError::ShapeError(format!(
                    "cannot concatenate frames with columns {:?} and {:?}",
                    first.columns, f.columns
                )));
            }
            views.push(f.data.view());
        }
        Frame::new(first.columns.clone(), concatenate(Axis(0), &views)?)
    }

    /// Stable sort of the rows by the given key columns (lexicographic)
    pub fn sort_by<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<()> {
        let key_cols = keys
            .iter()
            .map(|k| self.column_index(k.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let mut order: Vec<usize> = (0..self.nrows()).collect();
        order.sort_by(|&a, &b| {
            key_cols
                .iter()
                .map(|&j| self.data[[a, j]].total_cmp(&self.data[[b, j]]))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.data = self.data.select(Axis(0), &order);
        Ok(())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in self.data.rows() {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", line.join("\t"))?;
        }
        Ok(())
    }
}

fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        Some(f64::NAN)
    } else {
        raw.parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Comparator;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn xyt() -> Frame {
        Frame::new(
            vec!["x", "y", "t"],
            array![[0., 0., 2.], [1., 0., 1.], [2., 1., 1.], [3., 1., 0.]],
        )
        .unwrap()
    }

    #[test]
    fn test_new_checks_shape_and_names() {
        assert!(matches!(
            Frame::new(vec!["x"], array![[0., 1.]]),
            Err(FrameError::ShapeError(_))
        ));
        assert!(matches!(
            Frame::new(vec!["x", "x"], array![[0., 1.]]),
            Err(FrameError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_filter_conjunction() {
        let df = xyt();
        let out = df
            .filter(&[
                Predicate::new("t", Comparator::Le, 1.),
                Predicate::new("x", Comparator::Gt, 1.),
            ])
            .unwrap();
        assert_eq!(out.nrows(), 2);
        let expected = array![2., 3.];
        assert_abs_diff_eq!(out.column("x").unwrap(), expected.view());
        // source untouched
        assert_eq!(df.nrows(), 4);
        assert!(matches!(
            df.filter(&[Predicate::new("z", Comparator::Eq, 0.)]),
            Err(FrameError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_sort_is_stable() {
        let mut df = xyt();
        df.sort_by(&["t"]).unwrap();
        let expected = array![3., 1., 2., 0.];
        assert_abs_diff_eq!(df.column("x").unwrap(), expected.view());
        df.sort_by(&["y", "x"]).unwrap();
        let expected = array![0., 1., 2., 3.];
        assert_abs_diff_eq!(df.column("x").unwrap(), expected.view());
    }

    #[test]
    fn test_add_column_and_concat() {
        let mut df = xyt();
        df.add_column("z", array![1., 1., 1., 1.]).unwrap();
        assert_eq!(df.ncols(), 4);
        df.add_column("z", array![2., 2., 2., 2.]).unwrap();
        assert_eq!(df.ncols(), 4);
        assert_abs_diff_eq!(df.value(3, "z").unwrap(), 2.);

        let both = Frame::concat(&[df.clone(), df.take(&[0])]).unwrap();
        assert_eq!(both.nrows(), 5);
        assert!(Frame::concat(&[df, xyt()]).is_err());
    }

    #[test]
    fn test_from_csv() {
        let dir = "target/tests/frame";
        std::fs::create_dir_all(dir).unwrap();
        let path = format!("{dir}/obs.csv");
        std::fs::write(&path, "x, y,obs\n0,1,0.5\n1,2,\n2,3,nan\n").unwrap();
        let df = Frame::from_csv(&path).unwrap();
        assert_eq!(df.columns(), &["x", "y", "obs"]);
        assert_eq!(df.nrows(), 3);
        assert!(df.value(1, "obs").unwrap().is_nan());

        std::fs::write(&path, "x,y\n0,abc\n").unwrap();
        assert!(matches!(
            Frame::from_csv(&path),
            Err(FrameError::ParseError { .. })
        ));
    }

    #[test]
    fn test_serde_validates() {
        let json = serde_json::to_string(&xyt()).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, xyt());
        let bad = r#"{"columns": ["x"], "data": {"v": 1, "dim": [1, 2], "data": [0.0, 1.0]}}"#;
        assert!(serde_json::from_str::<Frame>(bad).is_err());
    }
}
