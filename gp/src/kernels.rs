//! Stationary kernels of the reference gaussian process model.
//!
//! The following kernels are implemented:
//! * squared exponential,
//! * matern 3/2,
//! * matern 5/2.
//!
//! Each kernel is expressed as a function of the scaled distance
//! `r = ||(x - x') / lengthscales||` and multiplied by the kernel variance.

use ndarray::{Array1, Array2, ArrayBase, Data, Ix2, Zip};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Kernel (covariance function) of a [`Gpr`](crate::Gpr) model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[derive(Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Kernel {
    /// `exp(-r^2 / 2)`
    #[default]
    SquaredExponential,
    /// `(1 + sqrt(3) r) exp(-sqrt(3) r)`
    Matern32,
    /// `(1 + sqrt(5) r + 5/3 r^2) exp(-sqrt(5) r)`
    Matern52,
}

impl From<Kernel> for String {
    fn from(item: Kernel) -> String {
        item.to_string()
    }
}

impl TryFrom<String> for Kernel {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "SquaredExponential" | "RBF" => Ok(Kernel::SquaredExponential),
            "Matern32" => Ok(Kernel::Matern32),
            "Matern52" => Ok(Kernel::Matern52),
            _ => Err(format!("Bad string value for Kernel, got {s}")),
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Kernel::SquaredExponential => "SquaredExponential",
            Kernel::Matern32 => "Matern32",
            Kernel::Matern52 => "Matern52",
        };
        write!(f, "{name}")
    }
}

impl Kernel {
    /// Correlation value given the squared scaled distance `r2`
    #[inline]
    pub fn correlation(&self, r2: f64) -> f64 {
        match self {
            Kernel::SquaredExponential => (-0.5 * r2).exp(),
            Kernel::Matern32 => {
                let a = (3. * r2).sqrt();
                (1. + a) * (-a).exp()
            }
            Kernel::Matern52 => {
                let a = (5. * r2).sqrt();
                (1. + a + 5. / 3. * r2) * (-a).exp()
            }
        }
    }

    /// Covariance matrix `k(xa, xb)` of shape (xa.nrows(), xb.nrows())
    pub fn matrix(
        &self,
        xa: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        xb: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        lengthscales: &Array1<f64>,
        variance: f64,
    ) -> Array2<f64> {
        let xa = xa / lengthscales;
        let xb = xb / lengthscales;
        let mut k = Array2::zeros((xa.nrows(), xb.nrows()));
        Zip::from(k.rows_mut())
            .and(xa.rows())
            .par_for_each(|mut krow, a| {
                for (kij, b) in krow.iter_mut().zip(xb.rows()) {
                    let r2: f64 = a.iter().zip(b.iter()).map(|(u, v)| (u - v) * (u - v)).sum();
                    *kij = variance * self.correlation(r2);
                }
            });
        k
    }
}
