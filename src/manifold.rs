/*!
# Manifold Capability Interface

An implicitly defined manifold is the zero-level set of a smooth constraint
function `c: R^n -> R^m` with `n = d + m`, where `d` is the dimension of the
manifold and `m` its codimension. Everything the samplers in this crate need
from a problem domain is captured by the [`Manifold`] trait: the constraint,
its Jacobian, and a log-density on the manifold with respect to the Hausdorff
measure.

Implementations are expected to be logically immutable after construction, so
one instance can be shared read-only across independently seeded chains. The
`Send + Sync` bound makes that explicit.

Evaluations that leave the numeric domain (overflow, non-finite intermediate
results) are reported as [`DomainError`] values rather than panics; every
caller in this crate converts them into a rejection of the current proposal.
*/

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// A constraint or Jacobian evaluation left the numeric domain.
///
/// For realistic targets this happens on a non-trivial fraction of proposals
/// (e.g. an exploding forward simulation), so it is an ordinary value on the
/// hot path, not an exceptional condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("constraint evaluation left the numeric domain (overflow or non-finite result)")]
pub struct DomainError;

/// Counts of the expensive evaluations performed during a run.
///
/// Threaded by mutable reference through the projection solver, the
/// integrator and the samplers, and returned alongside each chain. Purely
/// diagnostic: acceptance logic never reads these.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvalCounts {
    /// Number of Jacobian evaluations.
    pub jacobian: usize,
    /// Number of target log-density evaluations.
    pub density: usize,
}

/// An implicitly defined manifold together with a density on it.
///
/// The ambient space has dimension `n = dimension() + codimension()`. All
/// vectors handed to the evaluation methods have length `n`; `constraint`
/// returns an `m`-vector and `jacobian` an `m x n` matrix whose row space
/// spans the local normal directions.
pub trait Manifold: Send + Sync {
    /// Dimension `d` of the manifold.
    fn dimension(&self) -> usize;

    /// Codimension `m`, i.e. the number of scalar constraints.
    fn codimension(&self) -> usize;

    /// Dimension of the ambient space, `n = d + m`.
    fn ambient_dimension(&self) -> usize {
        self.dimension() + self.codimension()
    }

    /// Evaluates the constraint function at `x`.
    fn constraint(&self, x: &DVector<f64>) -> Result<DVector<f64>, DomainError>;

    /// Evaluates the `m x n` Jacobian of the constraint at `x`.
    fn jacobian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, DomainError>;

    /// Log-density on the manifold with respect to the Hausdorff measure,
    /// including the `-0.5 * log det(J J^T)` correction term.
    ///
    /// Returns `f64::NEG_INFINITY` (rather than an error) wherever the
    /// correction is undefined, so the Metropolis test rejects naturally.
    fn log_density(&self, x: &DVector<f64>) -> f64;

    /// Whether `x` satisfies every constraint to within `tol` (max-abs).
    fn is_on_manifold(&self, x: &DVector<f64>, tol: f64) -> bool {
        match self.constraint(x) {
            Ok(value) => value.amax() <= tol,
            Err(DomainError) => false,
        }
    }
}
