use nalgebra::{DMatrix, DVector};

/// Initial distribution of the state vector, fixed at model construction.
#[derive(Debug, Clone)]
pub struct KalmanInit {
    /// Initial state mean a_0.
    pub initial_state: DVector<f64>,
    /// Initial state covariance P_0.
    pub initial_state_cov: DMatrix<f64>,
    /// Number of initial observations excluded from the log-likelihood
    /// (burn-in). Nonzero when the initial distribution is diffuse.
    pub loglikelihood_burn: usize,
}

impl KalmanInit {
    /// Initialization with a known initial state distribution.
    pub fn known(initial_state: DVector<f64>, initial_state_cov: DMatrix<f64>) -> Self {
        Self {
            initial_state,
            initial_state_cov,
            loglikelihood_burn: 0,
        }
    }

    /// Approximate diffuse initialization.
    ///
    /// - a_0 = 0
    /// - P_0 = kappa * I
    /// - burn = k_states (the diffuse-affected periods are excluded from the
    ///   likelihood)
    pub fn approximate_diffuse(k_states: usize, kappa: f64) -> Self {
        Self {
            initial_state: DVector::zeros(k_states),
            initial_state_cov: DMatrix::identity(k_states, k_states) * kappa,
            loglikelihood_burn: k_states,
        }
    }

    pub fn default_kappa() -> f64 {
        1e6
    }

    pub fn k_states(&self) -> usize {
        self.initial_state.len()
    }
}
