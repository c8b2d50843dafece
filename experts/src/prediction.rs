//! Prediction locations of an expert location.

use crate::config::{PredictionLocsConfig, PredictionMethod};
use crate::errors::{ExpertError, Result};
use crate::location::ExpertLocation;
use log::{debug, info};
use loxi_frame::Frame;
use ndarray::{Array1, Array2, Axis, Zip};

/// Generator of the coordinates where a fitted model predicts
#[derive(Clone, Debug, Default)]
pub enum PredictionLocations {
    /// The expert location itself
    #[default]
    ExpertLoc,
    /// Rows of a frame within `max_dist` (euclidean, coordinate units) of the
    /// expert location, coordinates missing from the frame are taken from the
    /// expert location
    FromFrame {
        /// Candidate locations
        frame: Frame,
        /// Max distance, unlimited when unset
        max_dist: Option<f64>,
    },
}

impl PredictionLocations {
    /// Build from configuration, reading the candidate locations file if any
    pub fn from_config(config: &PredictionLocsConfig) -> Result<Self> {
        match config.method {
            PredictionMethod::ExpertLoc => Ok(PredictionLocations::ExpertLoc),
            PredictionMethod::FromDataframe => {
                let file = config.df_file.as_ref().ok_or_else(|| {
                    ExpertError::ConfigError(
                        "prediction locations file is not specified".to_string(),
                    )
                })?;
                info!("Read prediction locations from {:?}", file);
                Ok(PredictionLocations::FromFrame {
                    frame: Frame::from_csv(file)?,
                    max_dist: config.max_dist,
                })
            }
        }
    }

    /// Prediction coordinates (m, d) for `location`, columns in `coords_col` order
    pub fn generate(&self, location: &ExpertLocation) -> Result<Array2<f64>> {
        let coords = Array1::from(location.coords().to_vec());
        match self {
            PredictionLocations::ExpertLoc => Ok(coords.insert_axis(Axis(0))),
            PredictionLocations::FromFrame { frame, max_dist } => {
                let n = frame.nrows();
                let mut out = Array2::<f64>::zeros((n, coords.len()));
                for (j, col) in location.coords_col().iter().enumerate() {
                    if frame.has_column(col) {
                        out.column_mut(j).assign(&frame.column(col)?);
                    } else {
                        out.column_mut(j).fill(coords[j]);
                    }
                }
                let Some(max_dist) = max_dist else {
                    return Ok(out);
                };
                let mut keep = Array1::from_elem(n, false);
                Zip::from(&mut keep)
                    .and(out.rows())
                    .par_for_each(|k, row| {
                        let d2: f64 = row
                            .iter()
                            .zip(coords.iter())
                            .map(|(a, b)| (a - b) * (a - b))
                            .sum();
                        *k = d2.sqrt() <= *max_dist;
                    });
                let indices: Vec<usize> = keep
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &k)| if k { Some(i) } else { None })
                    .collect();
                debug!("{} prediction locations within {}", indices.len(), max_dist);
                Ok(out.select(Axis(0), &indices))
            }
        }
    }
}
