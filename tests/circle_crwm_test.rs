//! End-to-end checks of the constrained random-walk Metropolis sampler on
//! the unit circle: manifold adherence, acceptance behavior, and the moments
//! of the uniform distribution on the circle.

use manifold_mcmc::crwm::ConstrainedRwm;
use manifold_mcmc::linalg::Norm;
use manifold_mcmc::manifolds::GeneralizedEllipse;
use manifold_mcmc::stats::cov;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn constraint_violation(samples: &nalgebra::DMatrix<f64>, i: usize) -> f64 {
        let row = samples.row(i);
        (row[0] * row[0] + row[1] * row[1] - 1.0).abs()
    }

    /// The headline scenario: every retained state lies on the circle.
    #[test]
    fn end_to_end_unit_circle() {
        let circle = GeneralizedEllipse::unit_circle();
        let mut sampler = ConstrainedRwm::new(&circle, &[1.0, 0.0], 0.5, 1)
            .with_tolerances(1e-10, 1e-8)
            .set_seed(1234);
        let output = sampler.run(1000).unwrap();

        assert_eq!(output.samples.shape(), (1000, 2));
        assert_eq!(output.accepted.len(), 1000);
        for i in 0..output.samples.nrows() {
            let violation = constraint_violation(&output.samples, i);
            assert!(
                violation < 1e-6,
                "sample {i} is off the manifold by {violation}"
            );
        }
    }

    /// The uniform distribution on the unit circle has zero mean and
    /// covariance I/2; a long chain should reproduce both.
    #[test]
    fn uniform_circle_moments() {
        let circle = GeneralizedEllipse::unit_circle();
        let mut sampler = ConstrainedRwm::new(&circle, &[1.0, 0.0], 1.0, 5)
            .with_tolerances(1e-10, 1e-8)
            .set_seed(42);
        let output = sampler.run(20_000).unwrap();

        let mean = output.samples.row_mean();
        assert_abs_diff_eq!(mean[0], 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(mean[1], 0.0, epsilon = 0.1);

        let sample_cov = cov(&output.samples).unwrap();
        assert_abs_diff_eq!(sample_cov[(0, 0)], 0.5, epsilon = 0.1);
        assert_abs_diff_eq!(sample_cov[(1, 1)], 0.5, epsilon = 0.1);
        assert_abs_diff_eq!(sample_cov[(0, 1)], 0.0, epsilon = 0.1);
    }

    /// Small steps on a uniform target are almost always accepted; larger
    /// steps are accepted less often.
    #[test]
    fn acceptance_rate_tracks_step_size() {
        let circle = GeneralizedEllipse::unit_circle();
        let mut small = ConstrainedRwm::new(&circle, &[1.0, 0.0], 0.1, 1).set_seed(7);
        let mut large = ConstrainedRwm::new(&circle, &[1.0, 0.0], 2.0, 1).set_seed(7);
        let small_rate = small.run(2000).unwrap().acceptance_rate();
        let large_rate = large.run(2000).unwrap().acceptance_rate();

        assert!(small_rate > 0.9, "small-step acceptance was {small_rate}");
        assert!(large_rate > 0.0, "large steps never moved");
        assert!(
            large_rate < small_rate,
            "expected acceptance to drop with step size ({large_rate} vs {small_rate})"
        );
    }

    /// The accept flag of iteration i describes the sample of iteration i.
    #[test]
    fn accept_flags_align_with_samples() {
        let circle = GeneralizedEllipse::unit_circle();
        let mut sampler = ConstrainedRwm::new(&circle, &[1.0, 0.0], 1.5, 2).set_seed(99);
        let output = sampler.run(500).unwrap();

        for i in 1..output.samples.nrows() {
            let moved = output.samples.row(i) != output.samples.row(i - 1);
            if output.accepted[i] == 1 {
                assert!(moved, "iteration {i} was flagged accepted but did not move");
            } else {
                assert!(!moved, "iteration {i} was flagged rejected but moved");
            }
        }
    }

    /// The max-norm configuration runs the same protocol.
    #[test]
    fn infinity_norm_chain_adheres() {
        let circle = GeneralizedEllipse::unit_circle();
        let mut sampler = ConstrainedRwm::new(&circle, &[1.0, 0.0], 0.5, 2)
            .with_norm(Norm::LInf)
            .with_tolerances(1e-10, 1e-8)
            .set_seed(5);
        let output = sampler.run(300).unwrap();
        for i in 0..output.samples.nrows() {
            assert!(constraint_violation(&output.samples, i) < 1e-6);
        }
    }
}
