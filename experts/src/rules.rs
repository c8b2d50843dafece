//! Declarative data selection rules and their resolution into predicates.

use crate::errors::{ExpertError, Result};
use crate::location::ExpertLocation;
use loxi_frame::{Comparator, Predicate};
use serde::{Deserialize, Serialize};

/// Function combining an expert location value with a local rule value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    /// `loc + val`
    Add,
    /// `loc - val`
    Subtract,
    /// `loc * val`
    Multiply,
    /// `loc`
    Location,
    /// `val`
    Value,
}

impl Transform {
    /// Apply the function to an expert location value and a local rule value
    pub fn apply(&self, loc: f64, val: f64) -> f64 {
        match self {
            Transform::Add => loc + val,
            Transform::Subtract => loc - val,
            Transform::Multiply => loc * val,
            Transform::Location => loc,
            Transform::Value => val,
        }
    }
}

/// A predicate whose value depends on the expert location.
///
/// For each local rule on `loc_col`, it resolves to
/// `src_col <local comp> func(location[loc_col], local val)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicRule {
    /// Expert location coordinate
    pub loc_col: String,
    /// Data column the resolved predicates apply to
    pub src_col: String,
    /// Combination of location and local rule values
    pub func: Transform,
}

/// A global data selection rule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionRule {
    /// Predicate used as is
    Static(Predicate),
    /// Predicate relative to the expert location
    Dynamic(DynamicRule),
}

impl From<Predicate> for SelectionRule {
    fn from(p: Predicate) -> Self {
        SelectionRule::Static(p)
    }
}

impl From<DynamicRule> for SelectionRule {
    fn from(r: DynamicRule) -> Self {
        SelectionRule::Dynamic(r)
    }
}

/// Column(s) of a local rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalCols {
    /// Signed difference along one coordinate
    One(String),
    /// Euclidean distance over several coordinates
    Many(Vec<String>),
}

/// A local window rule: `data[col] - location[col] <comp> val` for one
/// column, `||data[cols] - location[cols]|| <comp> val` for several.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalRule {
    /// Column(s) the rule applies to
    pub col: LocalCols,
    /// Comparison operator
    pub comp: Comparator,
    /// Inclusion distance
    pub val: f64,
}

impl LocalRule {
    /// Rule on the signed difference along one column
    pub fn new<S: Into<String>>(col: S, comp: Comparator, val: f64) -> Self {
        LocalRule {
            col: LocalCols::One(col.into()),
            comp,
            val,
        }
    }

    /// Rule on the euclidean distance over several columns
    pub fn distance<S: Into<String>>(cols: Vec<S>, comp: Comparator, val: f64) -> Self {
        LocalRule {
            col: LocalCols::Many(cols.into_iter().map(|c| c.into()).collect()),
            comp,
            val,
        }
    }
}

/// Resolve global rules against an expert location.
///
/// Static rules are kept in place, each dynamic rule expands to one predicate
/// per local rule on its `loc_col` (possibly none), in local rules order.
pub fn compile_predicates(
    global: &[SelectionRule],
    local: &[LocalRule],
    location: &ExpertLocation,
) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::with_capacity(global.len());
    for rule in global {
        match rule {
            SelectionRule::Static(p) => predicates.push(p.clone()),
            SelectionRule::Dynamic(d) => {
                let loc_value = location.coord(&d.loc_col).ok_or_else(|| {
                    ExpertError::ConfigError(format!(
                        "dynamic rule on '{}' which is not an expert location coordinate {:?}",
                        d.loc_col,
                        location.coords_col()
                    ))
                })?;
                for lr in local {
                    if matches!(&lr.col, LocalCols::One(c) if *c == d.loc_col) {
                        predicates.push(Predicate::new(
                            d.src_col.as_str(),
                            lr.comp,
                            d.func.apply(loc_value, lr.val),
                        ));
                    }
                }
            }
        }
    }
    Ok(predicates)
}
