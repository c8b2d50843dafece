use crate::model::OptimParams;
use ndarray::{arr1, Array1, Array2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl From<&OptimParams> for CobylaParams {
    fn from(optim: &OptimParams) -> Self {
        CobylaParams {
            rhobeg: optim.rhobeg,
            ftol_rel: optim.ftol_rel,
            maxeval: optim.max_eval,
        }
    }
}

/// Starting points of the optimization in log10 space: the given guess
/// followed by `n_start` points drawn uniformly within bounds.
pub(crate) fn prepare_multistart(
    n_start: usize,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    seed: u64,
) -> (Array2<f64>, Vec<(f64, f64)>) {
    // Use log10 params as optimization parameter
    let bounds: Vec<(f64, f64)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    let mut param0s = Array2::zeros((n_start + 1, param0.len()));
    param0s.row_mut(0).assign(&param0.mapv(f64::log10));

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    for mut row in param0s.rows_mut().into_iter().skip(1) {
        for (v, (a, b)) in row.iter_mut().zip(bounds.iter()) {
            *v = if a < b { rng.gen_range(*a..*b) } else { *a };
        }
    }
    (param0s, bounds)
}

/// Minimize `objfn` from `param0` within bounds with cobyla.
///
/// Returns whether the optimizer reported a success, the best objective value
/// (infinity if not finite) and the corresponding point.
pub(crate) fn optimize_params<ObjF>(
    objfn: ObjF,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    cobyla: CobylaParams,
) -> (bool, f64, Array1<f64>)
where
    ObjF: Fn(&[f64], &mut ()) -> f64,
{
    use cobyla::{minimize, Func, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0 = param0.to_vec();

    match minimize(
        |x, u| objfn(x, u),
        &param0,
        bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let params_opt = arr1(&x_opt);
            let fval = if fval.is_finite() { fval } else { f64::INFINITY };
            (fval.is_finite(), fval, params_opt)
        }
        Err((status, x_opt, _)) => {
            log::warn!("ERROR Cobyla optimizer status={status:?}");
            (false, f64::INFINITY, arr1(&x_opt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_multistart_is_seeded_and_bounded() {
        let bounds = [(1e-2, 1e2), (1e-1, 1e1)];
        let (starts, log_bounds) = prepare_multistart(4, &array![1., 1.], &bounds, 42);
        assert_eq!(starts.dim(), (5, 2));
        let expected_first = array![0., 0.];
        assert_abs_diff_eq!(starts.row(0), expected_first.view());
        assert_abs_diff_eq!(log_bounds[0].0, -2.);
        for row in starts.rows() {
            assert!(row[0] >= -2. && row[0] <= 2.);
            assert!(row[1] >= -1. && row[1] <= 1.);
        }
        let (again, _) = prepare_multistart(4, &array![1., 1.], &bounds, 42);
        assert_eq!(starts, again);
    }

    #[test]
    fn test_optimize_quadratic() {
        let objfn = |x: &[f64], _: &mut ()| (x[0] - 0.5).powi(2) + (x[1] + 0.25).powi(2);
        let (success, fmin, xopt) = optimize_params(
            objfn,
            &array![0., 0.],
            &[(-1., 1.), (-1., 1.)],
            CobylaParams {
                rhobeg: 0.5,
                ftol_rel: 1e-8,
                maxeval: 500,
            },
        );
        assert!(success);
        assert_abs_diff_eq!(fmin, 0., epsilon = 1e-4);
        assert_abs_diff_eq!(xopt, array![0.5, -0.25], epsilon = 1e-2);
    }
}
