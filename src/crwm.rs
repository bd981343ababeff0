/*!
# Constrained Random-Walk Metropolis (C-RWM)

A random-walk Metropolis sampler whose proposals are produced by the
constrained RATTLE integrator, so every proposed state lies on the manifold.
Per iteration the sampler draws an ambient Gaussian velocity scaled by the
step size `delta = T / B`, integrates `B` reversibility-checked RATTLE steps,
and applies a Metropolis test against the manifold log-density with the
kinetic-energy correction for the Gaussian momentum proposal:

```text
log u <= log_eta(x') - log_eta(x) - 0.5 ||v'||^2 + 0.5 ||v||^2
```

Every projection, Jacobian or reversibility failure inside a trajectory
degrades to a rejection of that proposal; the chain's current state is never
lost and the run never aborts mid-chain.

The chain records one row and one 0/1 accept flag per iteration, at the same
index: `accepted[i]` describes how `samples.row(i)` came about.

## Example

```rust
use manifold_mcmc::crwm::ConstrainedRwm;
use manifold_mcmc::manifolds::GeneralizedEllipse;

let circle = GeneralizedEllipse::unit_circle();
let mut sampler = ConstrainedRwm::new(&circle, &[1.0, 0.0], 0.5, 5).set_seed(42);
let output = sampler.run(100).unwrap();
assert_eq!(output.samples.nrows(), 100);
assert_eq!(output.accepted.len(), 100);
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::linalg::Norm;
use crate::manifold::{DomainError, EvalCounts, Manifold};
use crate::newton::ProjectionConfig;
use crate::rattle::constrained_leapfrog;
use crate::stats::ChainTracker;

/// The artifacts of one sampling run: the chain itself, the per-iteration
/// accept flags, and the evaluation counters accumulated along the way.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// One row per iteration, in ambient coordinates (`n_iterations x n`).
    pub samples: DMatrix<f64>,
    /// One 0/1 flag per iteration, aligned with the row of the same index.
    pub accepted: Vec<u8>,
    /// Jacobian and density evaluation totals for the whole run.
    pub evals: EvalCounts,
}

impl ChainOutput {
    /// Fraction of accepted proposals.
    pub fn acceptance_rate(&self) -> f64 {
        if self.accepted.is_empty() {
            return 0.0;
        }
        self.accepted.iter().map(|&a| a as usize).sum::<usize>() as f64
            / self.accepted.len() as f64
    }
}

/// Constrained random-walk Metropolis sampler over a shared, read-only
/// manifold. Independent chains should each own their own sampler (and seed)
/// while borrowing the same manifold.
#[derive(Debug, Clone)]
pub struct ConstrainedRwm<'a, M: Manifold + ?Sized> {
    /// The manifold being sampled.
    pub manifold: &'a M,
    /// Current state of the chain, always on the manifold (within tolerance).
    pub position: DVector<f64>,
    /// Total integration horizon `T` per proposal.
    pub total_time: f64,
    /// Number of RATTLE steps `B` per proposal; the step size is `T / B`.
    pub n_steps: usize,
    /// Convergence tolerance for the Newton projection.
    pub tol: f64,
    /// Reversibility tolerance for the backward-integration check.
    pub rev_tol: f64,
    /// Iteration cap for the Newton projection.
    pub max_iters: usize,
    /// Norm order for convergence and reversibility checks.
    pub norm: Norm,
    /// Seed of the chain's random source.
    pub seed: u64,
    /// The chain's random source.
    pub rng: SmallRng,
}

impl<'a, M: Manifold + ?Sized> ConstrainedRwm<'a, M> {
    /// Creates a sampler starting at `initial_state` with integration horizon
    /// `total_time` split into `n_steps` RATTLE steps per proposal.
    ///
    /// Tolerances default to `tol = 1e-12`, `rev_tol = 1e-8`, 50 Newton
    /// iterations and the Euclidean norm; adjust via the builder methods.
    ///
    /// # Panics
    ///
    /// Panics if `initial_state` does not have the manifold's ambient
    /// dimension or if `n_steps` is zero. These are construction-time
    /// argument errors; nothing after construction panics.
    pub fn new(manifold: &'a M, initial_state: &[f64], total_time: f64, n_steps: usize) -> Self {
        assert_eq!(
            initial_state.len(),
            manifold.ambient_dimension(),
            "initial state has wrong dimension"
        );
        assert!(n_steps >= 1, "n_steps must be at least 1");
        let seed = thread_rng().gen::<u64>();
        Self {
            manifold,
            position: DVector::from_column_slice(initial_state),
            total_time,
            n_steps,
            tol: 1e-12,
            rev_tol: 1e-8,
            max_iters: 50,
            norm: Norm::L2,
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

    /// Overrides the projection and reversibility tolerances.
    pub fn with_tolerances(mut self, tol: f64, rev_tol: f64) -> Self {
        self.tol = tol;
        self.rev_tol = rev_tol;
        self
    }

    /// Overrides the Newton iteration cap.
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Overrides the norm order.
    pub fn with_norm(mut self, norm: Norm) -> Self {
        self.norm = norm;
        self
    }

    /// Runs the chain for `n_iterations` iterations.
    ///
    /// The only error is an initial state at which the constraint Jacobian
    /// cannot be evaluated; once sampling has started, every numerical
    /// failure is absorbed as a rejection.
    pub fn run(&mut self, n_iterations: usize) -> Result<ChainOutput, DomainError> {
        self.run_inner(n_iterations, None)
    }

    /// Like [`run`](Self::run), with a progress bar reporting the acceptance
    /// rate over a sliding window.
    pub fn run_progress(&mut self, n_iterations: usize) -> Result<ChainOutput, DomainError> {
        let pb = ProgressBar::new(n_iterations as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb.set_prefix("C-RWM");
        self.run_inner(n_iterations, Some(pb))
    }

    fn run_inner(
        &mut self,
        n_iterations: usize,
        progress: Option<ProgressBar>,
    ) -> Result<ChainOutput, DomainError> {
        let dim = self.manifold.ambient_dimension();
        let delta = self.total_time / self.n_steps as f64;
        let config = ProjectionConfig {
            tol: self.tol,
            max_iters: self.max_iters,
            norm: self.norm,
        };

        let mut counts = EvalCounts::default();
        let mut samples = DMatrix::<f64>::zeros(n_iterations, dim);
        let mut accepted = Vec::with_capacity(n_iterations);
        let mut tracker = ChainTracker::new(dim, self.position.as_slice());

        let mut x = self.position.clone();
        let mut jac = self.manifold.jacobian(&x)?;
        counts.jacobian += 1;
        let mut log_density_x = self.manifold.log_density(&x);
        counts.density += 1;

        for i in 0..n_iterations {
            let v = DVector::from_iterator(
                dim,
                (0..dim).map(|_| delta * self.rng.sample::<f64, _>(StandardNormal)),
            );

            let mut accept = 0u8;
            if let Ok((x_p, v_p, jac_p)) = constrained_leapfrog(
                self.manifold,
                &x,
                &v,
                &jac,
                self.n_steps,
                &config,
                self.rev_tol,
                &mut counts,
            ) {
                let log_density_p = self.manifold.log_density(&x_p);
                counts.density += 1;
                let log_u = self.rng.gen::<f64>().ln();
                if log_u
                    <= log_density_p - log_density_x - 0.5 * v_p.norm_squared()
                        + 0.5 * v.norm_squared()
                {
                    x = x_p;
                    jac = jac_p;
                    log_density_x = log_density_p;
                    accept = 1;
                }
            }

            samples.row_mut(i).copy_from_slice(x.as_slice());
            accepted.push(accept);

            if let Some(pb) = &progress {
                tracker.step(x.as_slice(), accept == 1);
                pb.inc(1);
                pb.set_message(format!("p(accept)~{:.2}", tracker.stats().p_accept));
            }
        }

        if let Some(pb) = &progress {
            pb.finish_with_message("Done!");
        }

        self.position = x;
        Ok(ChainOutput {
            samples,
            accepted,
            evals: counts,
        })
    }
}
