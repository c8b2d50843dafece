//! Append-only store of named tables.
//!
//! Results of the local experts engine are written as [`Table`]s: rows indexed
//! by the expert location coordinates, holding typed [`Cell`] values. A
//! [`TableStore`] persists them in a directory, appending row chunks without
//! ever rewriting existing data, and keeps json attributes per table (used to
//! record the configuration of the first run).
#![warn(missing_docs)]

mod errors;
mod store;
mod table;

pub use errors::*;
pub use store::*;
pub use table::*;
