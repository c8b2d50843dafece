//! Primitive selection predicates `{col, comp, val}` applied row-wise.
use crate::errors::{FrameError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    /// Evaluate `lhs <comp> rhs`. Any comparison involving NaN is false except `!=`.
    #[inline]
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Lt => lhs < rhs,
            Comparator::Le => lhs <= rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Ge => lhs >= rhs,
            Comparator::Eq => lhs == rhs,
            Comparator::Ne => lhs != rhs,
        }
    }

    /// Operator symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Comparator {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Ge),
            "==" => Ok(Comparator::Eq),
            "!=" => Ok(Comparator::Ne),
            other => Err(FrameError::InvalidComparator(other.to_string())),
        }
    }
}

/// A static predicate on one column: `col <comp> val`.
///
/// Predicate lists are compared element-wise and in order, two lists holding
/// the same predicates in a different order are different lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    /// Column the predicate applies to
    pub col: String,
    /// Comparison operator
    pub comp: Comparator,
    /// Right hand side value
    pub val: f64,
}

impl Predicate {
    /// Constructor
    pub fn new<S: Into<String>>(col: S, comp: Comparator, val: f64) -> Self {
        Predicate {
            col: col.into(),
            comp,
            val,
        }
    }

    /// Evaluate the predicate against a column value
    #[inline]
    pub fn eval(&self, value: f64) -> bool {
        self.comp.compare(value, self.val)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.col, self.comp, self.val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparators() {
        assert!(Comparator::Lt.compare(1., 2.));
        assert!(!Comparator::Lt.compare(2., 2.));
        assert!(Comparator::Le.compare(2., 2.));
        assert!(Comparator::Ge.compare(2., 2.));
        assert!(!Comparator::Gt.compare(2., 2.));
        assert!(Comparator::Eq.compare(3., 3.));
        assert!(Comparator::Ne.compare(f64::NAN, 3.));
        assert!(!Comparator::Eq.compare(f64::NAN, f64::NAN));
    }

    #[test]
    fn test_comparator_from_str() {
        assert_eq!(Comparator::from_str(" <= ").unwrap(), Comparator::Le);
        assert!(matches!(
            Comparator::from_str("=<"),
            Err(FrameError::InvalidComparator(_))
        ));
    }

    #[test]
    fn test_predicate_json() {
        let p: Predicate = serde_json::from_str(r#"{"col": "lat", "comp": ">=", "val": 60}"#)
            .expect("predicate parsed");
        assert_eq!(p, Predicate::new("lat", Comparator::Ge, 60.));
        assert!(p.eval(65.));
        assert_eq!(p.to_string(), "lat >= 60");
        assert!(serde_json::from_str::<Predicate>(
            r#"{"col": "lat", "comp": ">=", "val": 60, "func": "add"}"#
        )
        .is_err());
    }
}
