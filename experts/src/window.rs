//! Local data window around an expert location.

use crate::errors::{ExpertError, Result};
use crate::location::ExpertLocation;
use crate::rules::{LocalCols, LocalRule};
use loxi_frame::Frame;
use ndarray::{Array1, Zip};

fn location_value(location: &ExpertLocation, col: &str) -> Result<f64> {
    location.value(col).ok_or_else(|| {
        ExpertError::ConfigError(format!(
            "local rule on '{}' which is not an expert location column",
            col
        ))
    })
}

/// Rows of `global` satisfying every local rule relative to `location`.
///
/// A single column rule compares the signed difference `data - location`,
/// a multi column rule compares the euclidean distance over its columns.
pub fn select_local(global: &Frame, location: &ExpertLocation, rules: &[LocalRule]) -> Result<Frame> {
    let mut mask = Array1::from_elem(global.nrows(), true);
    for rule in rules {
        match &rule.col {
            LocalCols::One(col) => {
                let center = location_value(location, col)?;
                let values = global.column(col)?;
                Zip::from(&mut mask)
                    .and(&values)
                    .par_for_each(|keep, &v| *keep = *keep && rule.comp.compare(v - center, rule.val));
            }
            LocalCols::Many(cols) => {
                let mut dist2 = Array1::<f64>::zeros(global.nrows());
                for col in cols {
                    let center = location_value(location, col)?;
                    let values = global.column(col)?;
                    Zip::from(&mut dist2)
                        .and(&values)
                        .par_for_each(|d, &v| *d += (v - center) * (v - center));
                }
                Zip::from(&mut mask)
                    .and(&dist2)
                    .par_for_each(|keep, &d| *keep = *keep && rule.comp.compare(d.sqrt(), rule.val));
            }
        }
    }
    Ok(global.select_rows(&mask))
}
