//! A small demo: C-RWM on the unit circle and THUG on the toy inverse
//! problem, printing summary statistics for both chains.

use manifold_mcmc::crwm::ConstrainedRwm;
use manifold_mcmc::manifold::Manifold;
use manifold_mcmc::manifolds::{abc_log_posterior, BipManifold, GeneralizedEllipse};
use manifold_mcmc::stats::cov;
use manifold_mcmc::thug::{ProjectorMethod, TangentialHug};
use nalgebra::DVector;

fn main() {
    const ITERATIONS: usize = 20_000;
    const SEED: u64 = 42;

    // Uniform samples from the unit circle via C-RWM.
    let circle = GeneralizedEllipse::unit_circle();
    let mut crwm = ConstrainedRwm::new(&circle, &[1.0, 0.0], 1.0, 5)
        .with_tolerances(1e-10, 1e-8)
        .set_seed(SEED);
    let output = crwm
        .run_progress(ITERATIONS)
        .expect("initial state must be on the circle");

    let worst = (0..output.samples.nrows())
        .map(|i| {
            let row = output.samples.row(i);
            (row[0] * row[0] + row[1] * row[1] - 1.0).abs()
        })
        .fold(0.0f64, f64::max);
    println!(
        "C-RWM: {} samples, acceptance {:.3}, worst constraint violation {:.2e}",
        output.samples.nrows(),
        output.acceptance_rate(),
        worst
    );
    println!(
        "C-RWM: {} Jacobian and {} density evaluations",
        output.evals.jacobian, output.evals.density
    );
    if let Ok(sample_cov) = cov(&output.samples) {
        println!("C-RWM: sample covariance {:.3?}", sample_cov.as_slice());
    }

    // THUG on the toy inverse problem, targeting an ABC posterior.
    let manifold = BipManifold::new(0.1, 1.0);
    let log_pi = abc_log_posterior(
        &manifold,
        |x: &DVector<f64>| -0.5 * x.norm_squared(),
        1e-3,
    );
    let mut thug = TangentialHug::new(&manifold, log_pi, &[0.0, 1.0, 0.0], 0.1, 10, 0.9)
        .with_projector(ProjectorMethod::Qr)
        .set_seed(SEED);
    let output = thug.run_progress(ITERATIONS);

    let worst = (0..output.samples.nrows())
        .map(|i| {
            let row = output.samples.row(i).transpose();
            match manifold.constraint(&row) {
                Ok(value) => value.amax(),
                Err(_) => f64::INFINITY,
            }
        })
        .fold(0.0f64, f64::max);
    println!(
        "THUG:  {} samples, acceptance {:.3}, worst constraint distance {:.2e}",
        output.samples.nrows(),
        output.acceptance_rate(),
        worst
    );
    println!("THUG:  {} Jacobian evaluations", output.evals.jacobian);
}
