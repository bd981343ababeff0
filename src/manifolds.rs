/*!
# Concrete Manifolds

Ready-made implementations of the [`Manifold`](crate::manifold::Manifold)
capability for a few problem domains, plus the ABC-kernel smoothing used to
build THUG targets. Each type holds its problem parameters immutably, so one
instance can back any number of independently seeded chains.

- [`GeneralizedEllipse`]: the level set of a multivariate normal density,
  with the unit circle as a special case. Handy for tests and calibration.
- [`BipManifold`]: a three-dimensional toy Bayesian inverse problem with a
  single scalar constraint.
- [`LotkaVolterra`]: the data manifold of an Euler-Maruyama discretization
  of the Lotka-Volterra SDE, where constraint evaluations can genuinely
  overflow and surface as domain errors.
*/

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::manifold::{DomainError, Manifold};

/// The `level`-set of a multivariate normal density with mean `mu` and
/// covariance `sigma`, i.e. the ellipsoid
/// `(x - mu)^T Sigma^{-1} (x - mu) = gamma` with
/// `gamma = -n ln 2 pi - ln det Sigma - 2 ln level`.
///
/// The density on the contour is uniform (`log_density` is identically
/// zero), which makes this the standard calibration target for the
/// constrained samplers.
#[derive(Debug, Clone)]
pub struct GeneralizedEllipse {
    mu: DVector<f64>,
    sigma_inv: DMatrix<f64>,
    gamma: f64,
}

impl GeneralizedEllipse {
    /// Builds the ellipsoid for the given normal density and level value.
    ///
    /// # Panics
    ///
    /// Panics if `sigma` is not square of the same size as `mu`, is not
    /// positive definite, or if `level` is not strictly positive.
    pub fn new(mu: DVector<f64>, sigma: DMatrix<f64>, level: f64) -> Self {
        assert_eq!(sigma.nrows(), sigma.ncols(), "covariance must be square");
        assert_eq!(mu.len(), sigma.nrows(), "mean and covariance sizes differ");
        assert!(level > 0.0, "level-set value must be positive");
        let chol = Cholesky::new(sigma).expect("covariance must be positive definite");
        let log_det: f64 = chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>() * 2.0;
        let n = mu.len() as f64;
        let gamma = -n * (2.0 * std::f64::consts::PI).ln() - log_det - 2.0 * level.ln();
        Self {
            mu,
            sigma_inv: chol.inverse(),
            gamma,
        }
    }

    /// The unit circle `p0^2 + p1^2 = 1` as a level set of the standard
    /// bivariate normal.
    pub fn unit_circle() -> Self {
        let level = (-0.5f64).exp() / (2.0 * std::f64::consts::PI);
        Self::new(DVector::zeros(2), DMatrix::identity(2, 2), level)
    }
}

impl Manifold for GeneralizedEllipse {
    fn dimension(&self) -> usize {
        self.mu.len() - 1
    }

    fn codimension(&self) -> usize {
        1
    }

    fn constraint(&self, x: &DVector<f64>) -> Result<DVector<f64>, DomainError> {
        assert_eq!(x.len(), self.mu.len(), "point has wrong dimension");
        let diff = x - &self.mu;
        let value = diff.dot(&(&self.sigma_inv * &diff)) - self.gamma;
        if !value.is_finite() {
            return Err(DomainError);
        }
        Ok(DVector::from_element(1, value))
    }

    fn jacobian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, DomainError> {
        assert_eq!(x.len(), self.mu.len(), "point has wrong dimension");
        let grad = (&self.sigma_inv * (x - &self.mu)) * 2.0;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(DomainError);
        }
        Ok(DMatrix::from_row_slice(1, grad.len(), grad.as_slice()))
    }

    fn log_density(&self, _x: &DVector<f64>) -> f64 {
        0.0
    }
}

/// A toy Bayesian inverse problem on `R^3` with one constraint:
/// `xi_1^2 + 3 xi_0^2 (xi_0^2 - 1) + noise_scale * xi_2 = y_star`.
///
/// The first two coordinates are the parameters, the last is the lifted
/// observation noise, scaled by `noise_scale`. The manifold density is a
/// standard normal prior on all three coordinates with the Gram-matrix
/// correction of the lifted formulation.
#[derive(Debug, Clone, Copy)]
pub struct BipManifold {
    /// Scale applied to the noise coordinate in the constraint.
    pub noise_scale: f64,
    /// Observed data value identifying the manifold.
    pub y_star: f64,
}

impl BipManifold {
    /// Creates the manifold for the given noise scale and observation.
    pub fn new(noise_scale: f64, y_star: f64) -> Self {
        Self {
            noise_scale,
            y_star,
        }
    }
}

impl Manifold for BipManifold {
    fn dimension(&self) -> usize {
        2
    }

    fn codimension(&self) -> usize {
        1
    }

    fn constraint(&self, x: &DVector<f64>) -> Result<DVector<f64>, DomainError> {
        assert_eq!(x.len(), 3, "point has wrong dimension");
        let value =
            x[1] * x[1] + 3.0 * x[0] * x[0] * (x[0] * x[0] - 1.0) + self.noise_scale * x[2]
                - self.y_star;
        if !value.is_finite() {
            return Err(DomainError);
        }
        Ok(DVector::from_element(1, value))
    }

    fn jacobian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, DomainError> {
        assert_eq!(x.len(), 3, "point has wrong dimension");
        let row = [
            12.0 * x[0] * x[0] * x[0] - 6.0 * x[0],
            2.0 * x[1],
            self.noise_scale,
        ];
        if row.iter().any(|g| !g.is_finite()) {
            return Err(DomainError);
        }
        Ok(DMatrix::from_row_slice(1, 3, &row))
    }

    fn log_density(&self, x: &DVector<f64>) -> f64 {
        let jac = match self.jacobian(x) {
            Ok(jac) => jac,
            Err(DomainError) => return f64::NEG_INFINITY,
        };
        let gram = jac.row(0).norm_squared();
        let log_prior = -0.5 * (x[0] * x[0] + x[1] * x[1]) - 0.5 * x[2] * x[2];
        log_prior - 0.5 * (gram + self.noise_scale * self.noise_scale).ln()
    }
}

/// Data manifold of the Lotka-Volterra ABC problem.
///
/// The forward simulator is an Euler-Maruyama discretization of the
/// Lotka-Volterra SDE over `n_steps` time steps. The ambient point is
/// `u = [u1, u2]` where `u1` (length 4) parametrizes the growth/interaction
/// rates through a log-normal reparametrization `z = exp(u1 - 2)` and `u2`
/// (length `2 n_steps`) carries the lifted Brownian increments, interleaved
/// prey/predator. The constraint compares the simulated observation path
/// against `y_star`.
///
/// Exploding simulations (large rates drive the populations to overflow)
/// are reported as [`DomainError`] and end up as ordinary rejections.
#[derive(Debug, Clone)]
pub struct LotkaVolterra {
    /// Number of discretization steps in the forward simulator.
    pub n_steps: usize,
    /// Discretization step size (of the simulator, not the samplers).
    pub step_size: f64,
    /// Noise scale of the prey increments.
    pub prey_noise: f64,
    /// Noise scale of the predator increments.
    pub predator_noise: f64,
    /// Initial prey population.
    pub prey0: f64,
    /// Initial predator population.
    pub predator0: f64,
    /// Observed data path, interleaved `[r_1, f_1, r_2, f_2, ...]`.
    pub y_star: DVector<f64>,
}

impl LotkaVolterra {
    /// Creates the manifold for an observed path, with the conventional
    /// dynamics constants (unit step size and noise scales, both
    /// populations starting at 100). All fields are public for callers that
    /// need different dynamics.
    ///
    /// # Panics
    ///
    /// Panics if `y_star` is empty or of odd length.
    pub fn new(y_star: DVector<f64>) -> Self {
        assert!(
            !y_star.is_empty() && y_star.len() % 2 == 0,
            "observed path must interleave prey/predator pairs"
        );
        Self {
            n_steps: y_star.len() / 2,
            step_size: 1.0,
            prey_noise: 1.0,
            predator_noise: 1.0,
            prey0: 100.0,
            predator0: 100.0,
            y_star,
        }
    }

    /// Maps the parameter block `u1` to the rate vector `z`.
    fn rates(&self, u: &DVector<f64>) -> [f64; 4] {
        [
            (u[0] - 2.0).exp(),
            (u[1] - 2.0).exp(),
            (u[2] - 2.0).exp(),
            (u[3] - 2.0).exp(),
        ]
    }

    /// Integrates the population dynamics, returning the prey and predator
    /// paths including the initial condition (`n_steps + 1` entries each).
    fn populations(
        &self,
        z: &[f64; 4],
        u: &DVector<f64>,
    ) -> Result<(Vec<f64>, Vec<f64>), DomainError> {
        let delta = self.step_size;
        let sqrt_delta = delta.sqrt();
        let mut r = Vec::with_capacity(self.n_steps + 1);
        let mut f = Vec::with_capacity(self.n_steps + 1);
        r.push(self.prey0);
        f.push(self.predator0);
        for s in 1..=self.n_steps {
            let (rp, fp) = (r[s - 1], f[s - 1]);
            let noise_r = u[4 + 2 * (s - 1)];
            let noise_f = u[4 + 2 * (s - 1) + 1];
            let r_next = rp + delta * (z[0] * rp - z[1] * rp * fp) + sqrt_delta * self.prey_noise * noise_r;
            let f_next = fp + delta * (z[3] * rp * fp - z[2] * fp) + sqrt_delta * self.predator_noise * noise_f;
            if !r_next.is_finite() || !f_next.is_finite() {
                return Err(DomainError);
            }
            r.push(r_next);
            f.push(f_next);
        }
        Ok((r, f))
    }

    /// Runs the forward simulator, returning the interleaved observation
    /// path `[r_1, f_1, ..., r_Ns, f_Ns]`. Public so callers can generate
    /// observed data for a chosen parameter.
    pub fn simulate(&self, u: &DVector<f64>) -> Result<DVector<f64>, DomainError> {
        assert_eq!(u.len(), self.ambient_dimension(), "point has wrong dimension");
        let z = self.rates(u);
        let (r, f) = self.populations(&z, u)?;
        let mut x = DVector::<f64>::zeros(2 * self.n_steps);
        for s in 1..=self.n_steps {
            x[2 * (s - 1)] = r[s];
            x[2 * (s - 1) + 1] = f[s];
        }
        Ok(x)
    }
}

impl Manifold for LotkaVolterra {
    fn dimension(&self) -> usize {
        4
    }

    fn codimension(&self) -> usize {
        2 * self.n_steps
    }

    fn constraint(&self, x: &DVector<f64>) -> Result<DVector<f64>, DomainError> {
        Ok(self.simulate(x)? - &self.y_star)
    }

    fn jacobian(&self, u: &DVector<f64>) -> Result<DMatrix<f64>, DomainError> {
        assert_eq!(u.len(), self.ambient_dimension(), "point has wrong dimension");
        let n = self.ambient_dimension();
        let m = self.codimension();
        let delta = self.step_size;
        let sqrt_delta = delta.sqrt();
        let z = self.rates(u);
        let (r, f) = self.populations(&z, u)?;

        // Jacobian of the simulator with respect to [z, u2]; the prey row
        // 2s and predator row 2s+1 recurse on the two previous rows.
        let mut jf = DMatrix::<f64>::zeros(m, n);
        jf[(0, 0)] = delta * self.prey0;
        jf[(0, 1)] = -delta * self.prey0 * self.predator0;
        jf[(0, 4)] = sqrt_delta * self.prey_noise;
        jf[(1, 2)] = -delta * self.predator0;
        jf[(1, 3)] = delta * self.prey0 * self.predator0;
        jf[(1, 5)] = sqrt_delta * self.predator_noise;
        for s in 1..self.n_steps {
            for j in 0..n {
                let prev_r = jf[(2 * s - 2, j)];
                let prev_f = jf[(2 * s - 1, j)];
                jf[(2 * s, j)] = prev_r
                    + delta * (z[0] * prev_r - (z[1] * prev_r * f[s] + z[1] * r[s] * prev_f));
                jf[(2 * s + 1, j)] = prev_f
                    + delta * (z[3] * prev_r * f[s] + z[3] * r[s] * prev_f - z[2] * prev_f);
            }
            jf[(2 * s, 0)] += delta * r[s];
            jf[(2 * s, 1)] -= delta * r[s] * f[s];
            jf[(2 * s, 4 + 2 * s)] += sqrt_delta * self.prey_noise;
            jf[(2 * s + 1, 3)] += delta * r[s] * f[s];
            jf[(2 * s + 1, 2)] -= delta * f[s];
            jf[(2 * s + 1, 5 + 2 * s)] += sqrt_delta * self.predator_noise;
        }

        // Chain rule through the log-normal reparametrization: the first
        // four columns pick up dz/du1 = z.
        for j in 0..4 {
            for i in 0..m {
                jf[(i, j)] *= z[j];
            }
        }

        if jf.iter().any(|e| !e.is_finite()) {
            return Err(DomainError);
        }
        Ok(jf)
    }

    fn log_density(&self, u: &DVector<f64>) -> f64 {
        let jac = match self.jacobian(u) {
            Ok(jac) => jac,
            Err(DomainError) => return f64::NEG_INFINITY,
        };
        let gram = &jac * jac.transpose();
        let log_det = match Cholesky::new(gram) {
            Some(chol) => chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>() * 2.0,
            None => return f64::NEG_INFINITY,
        };
        -0.5 * u.norm_squared() - 0.5 * log_det
    }
}

/// Builds the log-density of an ABC posterior: the caller's log-prior plus a
/// Gaussian kernel of bandwidth `epsilon` around the constraint's zero
/// level. Returns negative infinity wherever the constraint cannot be
/// evaluated, so samplers reject such points naturally.
///
/// This is the usual THUG target for a filamentary distribution.
pub fn abc_log_posterior<'a, M, P>(
    manifold: &'a M,
    log_prior: P,
    epsilon: f64,
) -> impl Fn(&DVector<f64>) -> f64 + 'a
where
    M: Manifold + ?Sized,
    P: Fn(&DVector<f64>) -> f64 + 'a,
{
    move |x: &DVector<f64>| match manifold.constraint(x) {
        Ok(u) => {
            let m = u.len() as f64;
            log_prior(x) - u.norm_squared() / (2.0 * epsilon * epsilon)
                - m * epsilon.ln()
                - 0.5 * m * (2.0 * std::f64::consts::PI).ln()
        }
        Err(DomainError) => f64::NEG_INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Central-difference Jacobian used to validate the analytic ones.
    fn finite_difference_jacobian<M: Manifold>(
        manifold: &M,
        x: &DVector<f64>,
        h: f64,
    ) -> DMatrix<f64> {
        let n = manifold.ambient_dimension();
        let m = manifold.codimension();
        let mut jac = DMatrix::<f64>::zeros(m, n);
        for j in 0..n {
            let mut fwd = x.clone();
            let mut bwd = x.clone();
            fwd[j] += h;
            bwd[j] -= h;
            let df = (manifold.constraint(&fwd).unwrap() - manifold.constraint(&bwd).unwrap())
                / (2.0 * h);
            for i in 0..m {
                jac[(i, j)] = df[i];
            }
        }
        jac
    }

    #[test]
    fn unit_circle_constraint_matches_closed_form() {
        let circle = GeneralizedEllipse::unit_circle();
        let on = DVector::from_column_slice(&[1.0, 0.0]);
        let off = DVector::from_column_slice(&[0.0, 1.1]);
        assert_abs_diff_eq!(circle.constraint(&on).unwrap()[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(circle.constraint(&off).unwrap()[0], 0.21, epsilon = 1e-12);
    }

    #[test]
    fn ellipse_jacobian_matches_finite_differences() {
        let mu = DVector::from_column_slice(&[1.0, -0.5, 0.2]);
        let sigma = DMatrix::from_row_slice(3, 3, &[
            2.0, 0.3, 0.0, //
            0.3, 1.5, 0.2, //
            0.0, 0.2, 1.0,
        ]);
        let ellipse = GeneralizedEllipse::new(mu, sigma, 0.01);
        let x = DVector::from_column_slice(&[2.0, 0.5, -1.0]);
        let analytic = ellipse.jacobian(&x).unwrap();
        let numeric = finite_difference_jacobian(&ellipse, &x, 1e-6);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-5);
    }

    #[test]
    fn bip_jacobian_matches_finite_differences() {
        let manifold = BipManifold::new(0.1, 1.0);
        let x = DVector::from_column_slice(&[0.7, -0.4, 1.3]);
        let analytic = manifold.jacobian(&x).unwrap();
        let numeric = finite_difference_jacobian(&manifold, &x, 1e-6);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-5);
    }

    #[test]
    fn bip_starting_point_is_on_manifold() {
        let manifold = BipManifold::new(0.1, 1.0);
        let x = DVector::from_column_slice(&[0.0, 1.0, 0.0]);
        assert!(manifold.is_on_manifold(&x, 1e-12));
    }

    fn small_lv() -> (LotkaVolterra, DVector<f64>) {
        // True parameter and a fixed noise path for a 3-step simulator.
        let u = DVector::from_column_slice(&[
            2.0 + (0.4f64).ln(),
            2.0 + (0.005f64).ln(),
            2.0 + (0.05f64).ln(),
            2.0 + (0.001f64).ln(),
            0.3, -0.5, 1.1, 0.2, -0.7, 0.4,
        ]);
        let template = LotkaVolterra::new(DVector::zeros(6));
        let y_star = template.simulate(&u).unwrap();
        (LotkaVolterra::new(y_star), u)
    }

    #[test]
    fn lv_point_generating_the_data_is_on_manifold() {
        let (manifold, u) = small_lv();
        assert_eq!(manifold.codimension(), 6);
        assert_eq!(manifold.ambient_dimension(), 10);
        assert!(manifold.is_on_manifold(&u, 1e-10));
    }

    #[test]
    fn lv_jacobian_matches_finite_differences() {
        let (manifold, u) = small_lv();
        let analytic = manifold.jacobian(&u).unwrap();
        let numeric = finite_difference_jacobian(&manifold, &u, 1e-5);
        let mut worst = 0.0f64;
        for i in 0..analytic.nrows() {
            for j in 0..analytic.ncols() {
                let scale = 1.0 + analytic[(i, j)].abs();
                worst = worst.max((analytic[(i, j)] - numeric[(i, j)]).abs() / scale);
            }
        }
        assert!(worst < 1e-4, "worst relative deviation {worst}");
    }

    #[test]
    fn lv_exploding_simulation_is_a_domain_error() {
        let (manifold, mut u) = small_lv();
        u[0] = 300.0;
        assert_eq!(manifold.constraint(&u), Err(DomainError));
        assert_eq!(manifold.jacobian(&u), Err(DomainError));
        assert_eq!(manifold.log_density(&u), f64::NEG_INFINITY);
    }

    #[test]
    fn lv_log_density_is_finite_on_the_manifold() {
        let (manifold, u) = small_lv();
        assert!(manifold.log_density(&u).is_finite());
    }

    #[test]
    fn abc_posterior_peaks_on_the_manifold() {
        let manifold = BipManifold::new(0.1, 1.0);
        let log_pi = abc_log_posterior(&manifold, |x: &DVector<f64>| -0.5 * x.norm_squared(), 0.1);
        let on = DVector::from_column_slice(&[0.0, 1.0, 0.0]);
        let near = DVector::from_column_slice(&[0.0, 1.05, 0.0]);
        assert!(log_pi(&on) > log_pi(&near));
    }
}
