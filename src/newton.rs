/*!
# Newton Projection Solver

Given a point `z` displaced off the manifold and a fixed matrix `Q` whose
columns span the normal directions at the *originating* point, the solver
finds coefficients `a` such that `z - Q a` lies on the manifold to within
tolerance. Each iteration re-evaluates the Jacobian at the current trial
point and solves the small `m x m` Gram system `(J Q) da = c(z - Q a)`.

The search directions never change: this is a Newton iteration on the
non-square constraint system restricted to the given normal subspace, not a
general nonlinear solve.
*/

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::linalg::Norm;
use crate::manifold::{DomainError, EvalCounts, Manifold};

/// Why a projection attempt failed. All variants degrade to a rejection of
/// the proposal that required the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProjectionError {
    /// A constraint or Jacobian evaluation left the numeric domain.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// The Gram matrix `J Q` is numerically singular.
    #[error("Gram matrix is numerically singular")]
    SingularSystem,
    /// The iteration cap was reached before the constraint norm fell below
    /// tolerance.
    #[error("Newton projection failed to converge within the iteration cap")]
    NonConvergence,
}

/// Convergence parameters for the projection solver, passed explicitly
/// rather than captured in closures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionConfig {
    /// Constraint-norm threshold below which the trial point counts as on
    /// the manifold.
    pub tol: f64,
    /// Cap on the number of Newton refinements.
    pub max_iters: usize,
    /// Norm order used for the convergence check.
    pub norm: Norm,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            tol: 1e-12,
            max_iters: 50,
            norm: Norm::L2,
        }
    }
}

/// Projects `z` back onto the manifold along the column span of
/// `normal_basis` (an `n x m` matrix, typically `J^T` at the step's starting
/// point).
///
/// Returns the coefficient vector `a` with `z - normal_basis * a` on the
/// manifold. Jacobian evaluations are accumulated into `counts`, also on the
/// failure paths, so callers can account for the cost of rejected proposals.
pub fn newton_project<M: Manifold + ?Sized>(
    manifold: &M,
    z: &DVector<f64>,
    normal_basis: &DMatrix<f64>,
    config: &ProjectionConfig,
    counts: &mut EvalCounts,
) -> Result<DVector<f64>, ProjectionError> {
    let mut a = DVector::<f64>::zeros(normal_basis.ncols());
    let mut value = manifold.constraint(z)?;
    let mut iterations = 0;

    loop {
        let residual = config.norm.of(&value);
        if !residual.is_finite() {
            return Err(ProjectionError::Domain(DomainError));
        }
        if residual < config.tol {
            break;
        }
        let trial = z - normal_basis * &a;
        let jac = manifold.jacobian(&trial)?;
        counts.jacobian += 1;

        let gram = &jac * normal_basis;
        let svd = gram.svd(true, true);
        let largest = svd.singular_values[0];
        let smallest = svd.singular_values[svd.singular_values.len() - 1];
        if !largest.is_finite() || smallest <= f64::EPSILON * largest {
            return Err(ProjectionError::SingularSystem);
        }
        let delta = svd
            .solve(&value, 0.0)
            .map_err(|_| ProjectionError::SingularSystem)?;
        a += delta;

        iterations += 1;
        if iterations > config.max_iters {
            return Err(ProjectionError::NonConvergence);
        }
        value = manifold.constraint(&(z - normal_basis * &a))?;
    }

    Ok(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Unit circle in the plane: c(p) = p0^2 + p1^2 - 1.
    struct UnitCircle;

    impl Manifold for UnitCircle {
        fn dimension(&self) -> usize {
            1
        }

        fn codimension(&self) -> usize {
            1
        }

        fn constraint(&self, x: &DVector<f64>) -> Result<DVector<f64>, DomainError> {
            Ok(DVector::from_element(1, x[0] * x[0] + x[1] * x[1] - 1.0))
        }

        fn jacobian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, DomainError> {
            Ok(DMatrix::from_row_slice(1, 2, &[2.0 * x[0], 2.0 * x[1]]))
        }

        fn log_density(&self, _x: &DVector<f64>) -> f64 {
            0.0
        }
    }

    struct Unevaluable;

    impl Manifold for Unevaluable {
        fn dimension(&self) -> usize {
            1
        }

        fn codimension(&self) -> usize {
            1
        }

        fn constraint(&self, _x: &DVector<f64>) -> Result<DVector<f64>, DomainError> {
            Err(DomainError)
        }

        fn jacobian(&self, _x: &DVector<f64>) -> Result<DMatrix<f64>, DomainError> {
            Err(DomainError)
        }

        fn log_density(&self, _x: &DVector<f64>) -> f64 {
            f64::NEG_INFINITY
        }
    }

    /// Constraint whose gradient vanishes identically, so the Gram matrix is
    /// singular on the first refinement.
    struct FlatGradient;

    impl Manifold for FlatGradient {
        fn dimension(&self) -> usize {
            1
        }

        fn codimension(&self) -> usize {
            1
        }

        fn constraint(&self, _x: &DVector<f64>) -> Result<DVector<f64>, DomainError> {
            Ok(DVector::from_element(1, 1.0))
        }

        fn jacobian(&self, _x: &DVector<f64>) -> Result<DMatrix<f64>, DomainError> {
            Ok(DMatrix::zeros(1, 2))
        }

        fn log_density(&self, _x: &DVector<f64>) -> f64 {
            0.0
        }
    }

    #[test]
    fn zero_displacement_is_identity() {
        let mut counts = EvalCounts::default();
        let z = DVector::from_column_slice(&[1.0, 0.0]);
        let q = UnitCircle.jacobian(&z).unwrap().transpose();
        let a = newton_project(
            &UnitCircle,
            &z,
            &q,
            &ProjectionConfig::default(),
            &mut counts,
        )
        .unwrap();
        assert_abs_diff_eq!(a[0], 0.0, epsilon = 1e-14);
        assert_eq!(counts.jacobian, 0);
    }

    #[test]
    fn projects_displaced_point_back_onto_circle() {
        let mut counts = EvalCounts::default();
        let origin = DVector::from_column_slice(&[1.0, 0.0]);
        let q = UnitCircle.jacobian(&origin).unwrap().transpose();
        let z = DVector::from_column_slice(&[1.1, 0.2]);
        let a = newton_project(
            &UnitCircle,
            &z,
            &q,
            &ProjectionConfig::default(),
            &mut counts,
        )
        .unwrap();
        let landed = &z - &q * a;
        assert!(UnitCircle.is_on_manifold(&landed, 1e-10));
        assert!(counts.jacobian >= 1);
    }

    #[test]
    fn domain_error_fails_with_zero_iterations() {
        let mut counts = EvalCounts::default();
        let z = DVector::from_column_slice(&[1.0, 0.0]);
        let q = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
        let err = newton_project(
            &Unevaluable,
            &z,
            &q,
            &ProjectionConfig::default(),
            &mut counts,
        )
        .unwrap_err();
        assert_eq!(err, ProjectionError::Domain(DomainError));
        assert_eq!(counts.jacobian, 0);
    }

    #[test]
    fn singular_gram_matrix_is_detected() {
        let mut counts = EvalCounts::default();
        let z = DVector::from_column_slice(&[1.0, 0.0]);
        let q = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
        let err = newton_project(
            &FlatGradient,
            &z,
            &q,
            &ProjectionConfig::default(),
            &mut counts,
        )
        .unwrap_err();
        assert_eq!(err, ProjectionError::SingularSystem);
    }

    #[test]
    fn iteration_cap_is_enforced() {
        let mut counts = EvalCounts::default();
        let origin = DVector::from_column_slice(&[1.0, 0.0]);
        let q = UnitCircle.jacobian(&origin).unwrap().transpose();
        let z = DVector::from_column_slice(&[1.5, 0.7]);
        let config = ProjectionConfig {
            max_iters: 0,
            ..ProjectionConfig::default()
        };
        let err = newton_project(&UnitCircle, &z, &q, &config, &mut counts).unwrap_err();
        assert_eq!(err, ProjectionError::NonConvergence);
    }
}
