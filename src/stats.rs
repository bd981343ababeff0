//! Running per-chain diagnostics: a sliding-window acceptance rate and
//! per-coordinate moments, plus a sample covariance helper for tests.

use nalgebra as na;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use std::collections::VecDeque;

/// Size of the sliding window used for the acceptance-rate estimate.
const ACCEPT_WINDOW: usize = 100;

/// Accumulates cheap statistics of a single chain as it is generated.
///
/// The tracker is fed the retained state and the accept flag of every
/// iteration; it keeps a windowed acceptance rate (for progress displays)
/// and running per-coordinate mean and second moment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTracker<T> {
    n_params: usize,
    n: u64,
    mean: Array1<f64>,
    mean_sq: Array1<f64>,
    accept_queue: VecDeque<bool>,
    _marker: std::marker::PhantomData<T>,
}

/// Snapshot of a [`ChainTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    /// Number of iterations observed.
    pub n: u64,
    /// Acceptance rate over the last [`ACCEPT_WINDOW`] iterations.
    pub p_accept: f64,
    /// Running per-coordinate mean.
    pub mean: Array1<f64>,
    /// Running per-coordinate sample variance.
    pub sm2: Array1<f64>,
}

impl<T: Copy + ToPrimitive> ChainTracker<T> {
    /// Creates a tracker for states of length `n_params`.
    pub fn new(n_params: usize, _initial_state: &[T]) -> Self {
        Self {
            n_params,
            n: 0,
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
            accept_queue: VecDeque::with_capacity(ACCEPT_WINDOW + 1),
            _marker: std::marker::PhantomData,
        }
    }

    /// Records one iteration's retained state and accept flag.
    pub fn step(&mut self, x: &[T], accepted: bool) {
        assert_eq!(x.len(), self.n_params, "state has wrong dimension");
        self.n += 1;

        self.accept_queue.push_back(accepted);
        if self.accept_queue.len() > ACCEPT_WINDOW {
            self.accept_queue.pop_front();
        }

        let n = self.n as f64;
        let x_arr: Array1<f64> = x.iter().map(|v| v.to_f64().unwrap()).collect();
        self.mean = (&self.mean * (n - 1.0) + &x_arr) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + &(&x_arr * &x_arr)) / n;
    }

    /// Running per-coordinate sample variance.
    pub fn sm2(&self) -> Array1<f64> {
        if self.n < 2 {
            return Array1::zeros(self.n_params);
        }
        let n = self.n as f64;
        (&self.mean_sq - &(&self.mean * &self.mean)) * n / (n - 1.0)
    }

    /// Takes a snapshot of the current statistics.
    pub fn stats(&self) -> ChainStats {
        let p_accept = if self.accept_queue.is_empty() {
            0.0
        } else {
            self.accept_queue.iter().filter(|&&a| a).count() as f64
                / self.accept_queue.len() as f64
        };
        ChainStats {
            n: self.n,
            p_accept,
            mean: self.mean.clone(),
            sm2: self.sm2(),
        }
    }
}

/// Sample covariance of the rows of `samples` (one observation per row).
pub fn cov(samples: &na::DMatrix<f64>) -> Result<na::DMatrix<f64>, &'static str> {
    let (n, d) = samples.shape();
    if n < 2 {
        return Err("need at least two observations to estimate a covariance");
    }
    let mean = samples.row_mean();
    let mut centered = samples.clone();
    for j in 0..d {
        let mu = mean[j];
        for i in 0..n {
            centered[(i, j)] -= mu;
        }
    }
    Ok(centered.transpose() * &centered / (n as f64 - 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn running_moments_match_closed_form() {
        let mut tracker = ChainTracker::new(1, &[0.0f64]);
        for x in [1.0, 2.0, 3.0, 4.0] {
            tracker.step(&[x], true);
        }
        let stats = tracker.stats();
        assert_abs_diff_eq!(stats.mean[0], 2.5, epsilon = 1e-12);
        // Sample variance of 1..4.
        assert_abs_diff_eq!(stats.sm2[0], 5.0 / 3.0, epsilon = 1e-12);
        assert_eq!(stats.n, 4);
    }

    #[test]
    fn acceptance_window_tracks_recent_flags() {
        let mut tracker = ChainTracker::new(1, &[0.0f64]);
        for _ in 0..50 {
            tracker.step(&[0.0], false);
        }
        for _ in 0..150 {
            tracker.step(&[0.0], true);
        }
        // The window only sees the last 100 iterations, all accepted.
        assert_abs_diff_eq!(tracker.stats().p_accept, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn covariance_of_known_data() {
        let samples = na::DMatrix::from_row_slice(4, 2, &[
            1.0, 2.0, //
            2.0, 4.0, //
            3.0, 6.0, //
            4.0, 8.0,
        ]);
        let cov = cov(&samples).unwrap();
        assert_abs_diff_eq!(cov[(0, 0)], 5.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(0, 1)], 10.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(1, 1)], 20.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn single_observation_is_rejected() {
        let samples = na::DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        assert!(cov(&samples).is_err());
    }
}
