//! Numeric data frames used by the local experts engine.
//!
//! A [`Frame`] is a set of named `f64` columns stored as a row-major matrix.
//! Rows are selected with conjunctions of [`Predicate`] (`col <comp> val`),
//! observations are provided by a [`DataSource`] and derived columns are
//! computed with [`ColumnFunc`].
//!
//! ```
//! use loxi_frame::{Comparator, Frame, Predicate};
//! use ndarray::array;
//!
//! let df = Frame::new(vec!["t", "obs"], array![[0., 1.], [1., 2.], [2., 3.]]).unwrap();
//! let recent = df.filter(&[Predicate::new("t", Comparator::Ge, 1.)]).unwrap();
//! assert_eq!(recent.nrows(), 2);
//! ```
#![warn(missing_docs)]

mod errors;
mod frame;
mod predicate;
mod source;

pub use errors::*;
pub use frame::*;
pub use predicate::*;
pub use source::*;
