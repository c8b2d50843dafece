//! Expert locations: the points where a local model is fitted.

use crate::config::ExpertLocsConfig;
use crate::errors::{ExpertError, Result};
use log::{debug, info};
use loxi_frame::{ColumnFunc, Frame};
use loxi_store::IndexKey;
use ndarray::Array1;
use std::path::Path;

/// One expert location: coordinates plus auxiliary values.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpertLocation {
    coords_col: Vec<String>,
    coords: Vec<f64>,
    aux: Vec<(String, f64)>,
}

impl ExpertLocation {
    /// Constructor
    pub fn new(coords_col: Vec<String>, coords: Vec<f64>) -> Self {
        ExpertLocation {
            coords_col,
            coords,
            aux: vec![],
        }
    }

    /// Set auxiliary (non coordinate) values
    pub fn with_aux(mut self, aux: Vec<(String, f64)>) -> Self {
        self.aux = aux;
        self
    }

    /// Coordinate column names
    pub fn coords_col(&self) -> &[String] {
        &self.coords_col
    }

    /// Coordinate values, in `coords_col` order
    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    /// Auxiliary values
    pub fn aux(&self) -> &[(String, f64)] {
        &self.aux
    }

    /// Value of the given coordinate
    pub fn coord(&self, name: &str) -> Option<f64> {
        self.coords_col
            .iter()
            .position(|c| c == name)
            .map(|i| self.coords[i])
    }

    /// Value of the given coordinate or auxiliary column
    pub fn value(&self, name: &str) -> Option<f64> {
        self.coord(name).or_else(|| {
            self.aux
                .iter()
                .find(|(c, _)| c == name)
                .map(|(_, v)| *v)
        })
    }

    /// Index key identifying the location in result tables
    pub fn key(&self) -> IndexKey {
        IndexKey::new(&self.coords)
    }
}

/// Ordered collection of expert locations
#[derive(Clone, Debug)]
pub struct ExpertLocations {
    frame: Frame,
    coords_col: Vec<String>,
}

impl ExpertLocations {
    /// Wrap a frame of locations, every coordinate column must be present
    pub fn new(frame: Frame, coords_col: &[String]) -> Result<Self> {
        if coords_col.is_empty() {
            return Err(ExpertError::ConfigError(
                "coordinate columns are not specified".to_string(),
            ));
        }
        if let Some(missing) = coords_col.iter().find(|c| !frame.has_column(c)) {
            return Err(ExpertError::ConfigError(format!(
                "coordinate column '{}' missing from expert locations {:?}",
                missing,
                frame.columns()
            )));
        }
        Ok(ExpertLocations {
            frame,
            coords_col: coords_col.to_vec(),
        })
    }

    /// Read locations from the configured csv file
    pub fn from_config(config: &ExpertLocsConfig, coords_col: &[String]) -> Result<Self> {
        let file = config.file.as_ref().ok_or_else(|| {
            ExpertError::ConfigError("expert locations file is not specified".to_string())
        })?;
        Self::from_csv(file, config, coords_col)
    }

    /// Read locations from a csv file and prepare them
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        config: &ExpertLocsConfig,
        coords_col: &[String],
    ) -> Result<Self> {
        info!("Read expert locations from {:?}", path.as_ref());
        let frame = Frame::from_csv(path)?;
        Self::prepare(frame, config, coords_col)
    }

    /// Prepare an in-memory frame of locations.
    ///
    /// Steps are applied in order: data replication along `add_data_to_col`,
    /// derived columns, row selection, sorting and column projection.
    pub fn prepare(frame: Frame, config: &ExpertLocsConfig, coords_col: &[String]) -> Result<Self> {
        let mut frame = frame;
        for (col, values) in config.add_data_to_col.iter() {
            let copies = values
                .iter()
                .map(|&v| -> Result<Frame> {
                    let mut copy = frame.clone();
                    copy.add_column(col.as_str(), Array1::from_elem(frame.nrows(), v))?;
                    Ok(copy)
                })
                .collect::<Result<Vec<_>>>()?;
            frame = Frame::concat(&copies)?;
        }
        for spec in config.col_funcs.iter() {
            ColumnFunc::from(spec.clone()).apply(&mut frame)?;
        }
        if !config.row_select.is_empty() {
            frame = frame.filter(&config.row_select)?;
        }
        if !config.sort_by.is_empty() {
            frame.sort_by(&config.sort_by)?;
        }
        if let Some(keep) = config.keep_cols.as_ref() {
            let mut cols = coords_col.to_vec();
            cols.extend(keep.iter().filter(|c| !coords_col.contains(c)).cloned());
            frame = frame.select_columns(&cols)?;
        }
        debug!("{} expert locations", frame.nrows());
        Self::new(frame, coords_col)
    }

    /// Number of locations
    pub fn len(&self) -> usize {
        self.frame.nrows()
    }

    /// Whether there is no location
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Coordinate column names
    pub fn coords_col(&self) -> &[String] {
        &self.coords_col
    }

    /// Underlying frame
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// i-th location
    pub fn get(&self, i: usize) -> ExpertLocation {
        let row = self.frame.row(i);
        let mut coords = Vec::with_capacity(self.coords_col.len());
        let mut aux = vec![];
        for (j, name) in self.frame.columns().iter().enumerate() {
            if !self.coords_col.contains(name) {
                aux.push((name.clone(), row[j]));
            }
        }
        for name in self.coords_col.iter() {
            // presence checked at construction
            let j = self
                .frame
                .columns()
                .iter()
                .position(|c| c == name)
                .unwrap_or_default();
            coords.push(row[j]);
        }
        ExpertLocation::new(self.coords_col.clone(), coords).with_aux(aux)
    }

    /// Locations in order
    pub fn iter(&self) -> impl Iterator<Item = ExpertLocation> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}
