//! Cache of the global data window, reloaded only when its predicates change.

use crate::errors::Result;
use log::debug;
use loxi_frame::{ColumnFunc, DataSource, Frame, Predicate};

/// Whether `current` differs from `previous`.
///
/// Lists are compared by length then element-wise in order, a reordered list
/// is a different list. No previous list always requires a refresh.
pub fn needs_refresh(current: &[Predicate], previous: Option<&[Predicate]>) -> bool {
    match previous {
        None => true,
        Some(prev) => {
            prev.len() != current.len() || current.iter().zip(prev.iter()).any(|(c, p)| c != p)
        }
    }
}

#[derive(Debug)]
struct Window {
    predicates: Vec<Predicate>,
    data: Frame,
}

fn load_window(
    predicates: Vec<Predicate>,
    source: &dyn DataSource,
    col_funcs: &[ColumnFunc],
) -> Result<Window> {
    debug!(
        "Load global data with [{}]",
        predicates
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut data = source.select(&predicates)?;
    for func in col_funcs {
        func.apply(&mut data)?;
    }
    debug!("{} rows loaded", data.nrows());
    Ok(Window { predicates, data })
}

/// Global data subset held in memory between expert locations
#[derive(Debug, Default)]
pub struct GlobalDataCache {
    window: Option<Window>,
    refreshes: usize,
}

impl GlobalDataCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the data matching `predicates`, querying the source only when
    /// they differ from the ones of the cached window.
    ///
    /// Derived columns are computed on each reload. On failure the previous
    /// window is kept.
    pub fn refresh_if_needed(
        &mut self,
        predicates: Vec<Predicate>,
        source: &dyn DataSource,
        col_funcs: &[ColumnFunc],
    ) -> Result<(&Frame, bool)> {
        let (window, refresh) = match self.window.take() {
            Some(w) if !needs_refresh(&predicates, Some(&w.predicates)) => (w, false),
            previous => match load_window(predicates, source, col_funcs) {
                Ok(w) => {
                    self.refreshes += 1;
                    (w, true)
                }
                Err(err) => {
                    self.window = previous;
                    return Err(err);
                }
            },
        };
        let window = self.window.insert(window);
        Ok((&window.data, refresh))
    }

    /// Predicates of the cached window
    pub fn predicates(&self) -> Option<&[Predicate]> {
        self.window.as_ref().map(|w| w.predicates.as_slice())
    }

    /// Number of source queries performed so far
    pub fn refreshes(&self) -> usize {
        self.refreshes
    }
}
