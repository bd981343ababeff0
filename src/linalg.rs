//! Projections onto the row space of a constraint Jacobian, and the norm
//! order used by convergence and reversibility checks.
//!
//! The four projectors compute the same linear map (orthogonal projection
//! onto the span of the Jacobian's rows); they differ only in numerical
//! route and cost. A singular system is reported as `None` and treated by
//! every caller as a failure of the current step, never a panic.

use nalgebra::{DMatrix, DVector};

/// Norm order used for constraint-value and reversibility distances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Norm {
    /// Euclidean norm.
    #[default]
    L2,
    /// Maximum absolute component.
    LInf,
}

impl Norm {
    /// Evaluates the norm of `v`.
    pub fn of(self, v: &DVector<f64>) -> f64 {
        match self {
            Norm::L2 => v.norm(),
            Norm::LInf => v.amax(),
        }
    }
}

/// Projects `v` onto the row space of `jac` by solving the normal equations
/// `(J J^T) w = J v` and returning `J^T w`.
pub fn row_space_project(v: &DVector<f64>, jac: &DMatrix<f64>) -> Option<DVector<f64>> {
    let rhs = jac * v;
    let gram = jac * jac.transpose();
    let w = gram.lu().solve(&rhs)?;
    Some(jac.transpose() * w)
}

/// Projects `v` onto the row space of `jac` via a thin QR factorization of
/// `J^T`, i.e. `Q (Q^T v)` with `Q` an orthonormal basis of the row space.
pub fn qr_project(v: &DVector<f64>, jac: &DMatrix<f64>) -> Option<DVector<f64>> {
    let qr = jac.transpose().qr();
    let q = qr.q();
    Some(&q * (q.transpose() * v))
}

/// Projects `v` onto the row space of `jac` through the least-squares
/// solution of `J^T w ~ v`.
pub fn lstsq_project(v: &DVector<f64>, jac: &DMatrix<f64>) -> Option<DVector<f64>> {
    let jt = jac.transpose();
    let w = jt.clone().svd(true, true).solve(v, 0.0).ok()?;
    Some(jt * w)
}

/// Closed-form projection for a single scalar constraint: with `g` the (only)
/// gradient row, returns `g_hat (g_hat . v)` for the normalized `g_hat`.
///
/// Callers must ensure `jac` has exactly one row.
pub fn gradient_project(v: &DVector<f64>, jac: &DMatrix<f64>) -> Option<DVector<f64>> {
    let g = jac.row(0).transpose();
    let norm = g.norm();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    let g_hat = g / norm;
    let coefficient = g_hat.dot(v);
    Some(g_hat * coefficient)
}
