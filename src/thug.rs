/*!
# Tangential Hug (THUG)

A sampler for filamentary targets that never solves a nonlinear system:
instead of projecting onto the manifold it bounces. Each proposal draws an
ambient Gaussian velocity, optionally squeezes it towards the tangent space
by a factor `alpha`, then alternates half position steps with specular
reflections of the velocity off the local normal space:

```text
x <- x + (delta/2) v;   v <- v - 2 P(v);   x <- x + (delta/2) v
```

where `P` is a linear projector onto the row space of the constraint
Jacobian. After `B` bounces the squeeze is undone and the proposal is
accepted with the Gaussian-corrected Metropolis ratio

```text
log u <= log_pi(x_end) + log_phi(v_end) - log_pi(x0) - log_phi(v0s)
```

with `log_phi` the standard ambient normal log-density. The target
`log_pi` is supplied by the caller, typically an ABC-kernel smoothing of the
constraint (see [`crate::manifolds::abc_log_posterior`]).

All four projector methods compute the same subspace projection; they are
interchangeable policies, not different samplers. Any Jacobian or projection
failure inside a trajectory rejects that proposal and nothing else.

## Example

```rust
use manifold_mcmc::manifolds::BipManifold;
use manifold_mcmc::thug::TangentialHug;
use nalgebra::DVector;

let manifold = BipManifold::new(0.1, 1.0);
let log_pi = |x: &DVector<f64>| -0.5 * x.norm_squared();
let mut sampler =
    TangentialHug::new(&manifold, log_pi, &[0.0, 1.0, 0.0], 0.5, 5, 0.9).set_seed(42);
let output = sampler.run(100);
assert_eq!(output.samples.nrows(), 100);
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::crwm::ChainOutput;
use crate::linalg::{gradient_project, lstsq_project, qr_project, row_space_project};
use crate::manifold::{EvalCounts, Manifold};
use crate::stats::ChainTracker;

/// Policy for projecting a velocity onto the row space of the Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectorMethod {
    /// Orthonormal-basis projection via a thin QR factorization of `J^T`.
    #[default]
    Qr,
    /// Direct solve of the normal equations, `J^T (J J^T)^{-1} J v`.
    Linear,
    /// Least-squares solve of `J^T w ~ v`.
    LeastSquares,
    /// Closed form via the normalized gradient; single-constraint manifolds
    /// only.
    Gradient,
}

impl ProjectorMethod {
    /// Applies the projector. `None` signals a singular system; callers
    /// treat it as a failure of the current trajectory.
    pub fn project(self, v: &DVector<f64>, jac: &DMatrix<f64>) -> Option<DVector<f64>> {
        match self {
            ProjectorMethod::Qr => qr_project(v, jac),
            ProjectorMethod::Linear => row_space_project(v, jac),
            ProjectorMethod::LeastSquares => lstsq_project(v, jac),
            ProjectorMethod::Gradient => gradient_project(v, jac),
        }
    }
}

/// Log-density of the standard normal on the ambient space.
fn log_std_normal(v: &DVector<f64>) -> f64 {
    -0.5 * v.norm_squared() - 0.5 * v.len() as f64 * (2.0 * std::f64::consts::PI).ln()
}

/// Squeezes a freshly drawn velocity towards the tangent space:
/// `v - alpha * P(v)`. With `alpha = 0` this returns the draw unchanged.
fn squeeze(
    v0s: &DVector<f64>,
    jac: &DMatrix<f64>,
    alpha: f64,
    method: ProjectorMethod,
) -> Option<DVector<f64>> {
    Some(v0s - method.project(v0s, jac)? * alpha)
}

/// Undoes the squeeze at the end of a trajectory:
/// `v + alpha / (1 - alpha) * P(v)`.
fn unsqueeze(
    v: &DVector<f64>,
    jac: &DMatrix<f64>,
    alpha: f64,
    method: ProjectorMethod,
) -> Option<DVector<f64>> {
    Some(v + method.project(v, jac)? * (alpha / (1.0 - alpha)))
}

/// Tangential Hug sampler over a shared, read-only manifold, targeting a
/// caller-supplied log-density.
pub struct TangentialHug<'a, M: Manifold + ?Sized, F: Fn(&DVector<f64>) -> f64> {
    /// The manifold supplying constraint Jacobians for the reflections.
    pub manifold: &'a M,
    /// Target log-density (usually an ABC-smoothed filamentary posterior).
    pub log_target: F,
    /// Current state of the chain.
    pub position: DVector<f64>,
    /// Total integration horizon `T` per proposal.
    pub total_time: f64,
    /// Number of bounces `B` per proposal; the step size is `T / B`.
    pub n_bounces: usize,
    /// Squeeze strength in `[0, 1)`; larger pulls the initial velocity
    /// harder into the tangent space.
    pub alpha: f64,
    /// Projection policy used for the reflections.
    pub method: ProjectorMethod,
    /// When set, Jacobians containing non-finite entries fail the
    /// trajectory instead of propagating NaN through the chain.
    pub safe: bool,
    /// Seed of the chain's random source.
    pub seed: u64,
    /// The chain's random source.
    pub rng: SmallRng,
}

impl<'a, M: Manifold + ?Sized, F: Fn(&DVector<f64>) -> f64> TangentialHug<'a, M, F> {
    /// Creates a sampler starting at `initial_state`.
    ///
    /// # Panics
    ///
    /// Panics if `initial_state` does not have the manifold's ambient
    /// dimension, if `n_bounces` is zero, or if `alpha` lies outside
    /// `[0, 1)`. These are construction-time argument errors; after
    /// construction every numerical failure degrades to a rejection.
    pub fn new(
        manifold: &'a M,
        log_target: F,
        initial_state: &[f64],
        total_time: f64,
        n_bounces: usize,
        alpha: f64,
    ) -> Self {
        assert_eq!(
            initial_state.len(),
            manifold.ambient_dimension(),
            "initial state has wrong dimension"
        );
        assert!(n_bounces >= 1, "n_bounces must be at least 1");
        assert!(
            (0.0..1.0).contains(&alpha),
            "squeeze parameter alpha must lie in [0, 1)"
        );
        let seed = thread_rng().gen::<u64>();
        Self {
            manifold,
            log_target,
            position: DVector::from_column_slice(initial_state),
            total_time,
            n_bounces,
            alpha,
            method: ProjectorMethod::default(),
            safe: true,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Sets a new random seed for reproducibility.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Selects the projection policy.
    ///
    /// # Panics
    ///
    /// Panics if [`ProjectorMethod::Gradient`] is requested for a manifold
    /// with more than one constraint.
    pub fn with_projector(mut self, method: ProjectorMethod) -> Self {
        if method == ProjectorMethod::Gradient {
            assert_eq!(
                self.manifold.codimension(),
                1,
                "the gradient projector requires a single scalar constraint"
            );
        }
        self.method = method;
        self
    }

    /// Enables or disables the non-finite Jacobian guard (enabled by
    /// default).
    pub fn with_safety(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    /// Runs the chain for `n_iterations` iterations.
    pub fn run(&mut self, n_iterations: usize) -> ChainOutput {
        self.run_inner(n_iterations, None)
    }

    /// Like [`run`](Self::run), with a progress bar reporting the acceptance
    /// rate over a sliding window.
    pub fn run_progress(&mut self, n_iterations: usize) -> ChainOutput {
        let pb = ProgressBar::new(n_iterations as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb.set_prefix("THUG");
        self.run_inner(n_iterations, Some(pb))
    }

    fn run_inner(&mut self, n_iterations: usize, progress: Option<ProgressBar>) -> ChainOutput {
        let dim = self.manifold.ambient_dimension();
        let delta = self.total_time / self.n_bounces as f64;

        let mut counts = EvalCounts::default();
        let mut samples = DMatrix::<f64>::zeros(n_iterations, dim);
        let mut accepted = Vec::with_capacity(n_iterations);
        let mut tracker = ChainTracker::new(dim, self.position.as_slice());
        let mut x0 = self.position.clone();

        for i in 0..n_iterations {
            let v0s = DVector::from_iterator(
                dim,
                (0..dim).map(|_| self.rng.sample::<f64, _>(StandardNormal)),
            );
            let log_u = self.rng.gen::<f64>().ln();

            let mut accept = 0u8;
            if let Some((x_end, v_end)) = self.trajectory(&x0, &v0s, delta, &mut counts) {
                let log_ratio = (self.log_target)(&x_end) + log_std_normal(&v_end)
                    - (self.log_target)(&x0)
                    - log_std_normal(&v0s);
                counts.density += 2;
                if log_u <= log_ratio {
                    x0 = x_end;
                    accept = 1;
                }
            }

            samples.row_mut(i).copy_from_slice(x0.as_slice());
            accepted.push(accept);

            if let Some(pb) = &progress {
                tracker.step(x0.as_slice(), accept == 1);
                pb.inc(1);
                pb.set_message(format!("p(accept)~{:.2}", tracker.stats().p_accept));
            }
        }

        if let Some(pb) = &progress {
            pb.finish_with_message("Done!");
        }

        self.position = x0;
        ChainOutput {
            samples,
            accepted,
            evals: counts,
        }
    }

    /// One squeezed bounce trajectory. `None` rejects the proposal.
    fn trajectory(
        &self,
        x0: &DVector<f64>,
        v0s: &DVector<f64>,
        delta: f64,
        counts: &mut EvalCounts,
    ) -> Option<(DVector<f64>, DVector<f64>)> {
        let jac0 = self.eval_jacobian(x0, counts)?;
        let mut v = squeeze(v0s, &jac0, self.alpha, self.method)?;
        let mut x = x0.clone();

        for _ in 0..self.n_bounces {
            x += &v * (delta / 2.0);
            let jac = self.eval_jacobian(&x, counts)?;
            v -= self.method.project(&v, &jac)? * 2.0;
            x += &v * (delta / 2.0);
        }

        let jac_end = self.eval_jacobian(&x, counts)?;
        let v_end = unsqueeze(&v, &jac_end, self.alpha, self.method)?;
        Some((x, v_end))
    }

    fn eval_jacobian(&self, x: &DVector<f64>, counts: &mut EvalCounts) -> Option<DMatrix<f64>> {
        let jac = self.manifold.jacobian(x).ok()?;
        counts.jacobian += 1;
        if self.safe && jac.iter().any(|e| !e.is_finite()) {
            return None;
        }
        Some(jac)
    }
}
