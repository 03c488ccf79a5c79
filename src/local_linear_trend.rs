use nalgebra::{DMatrix, DVector};

use crate::error::{Result, StateSpaceError};
use crate::initialization::KalmanInit;
use crate::kalman::endog_from_scalars;
use crate::matrices::{SystemMatrices, TvMatrix};
use crate::model::StateSpaceModel;

/// Univariate local linear trend model.
///
/// y_t      = mu_t + eps_t,          eps_t  ~ N(0, sigma2.measurement)
/// mu_{t+1} = mu_t + nu_t + xi_t,    xi_t   ~ N(0, sigma2.level)
/// nu_{t+1} = nu_t + zeta_t,         zeta_t ~ N(0, sigma2.trend)
///
/// State space form: k_states = k_posdef = 2, design [1, 0], transition
/// [[1, 1], [0, 1]], selection identity. Only the three variances are
/// estimated; the structural matrices are fixed at construction. The model is
/// nonstationary, so the state is initialized approximately diffuse with a
/// burn-in of k_states periods.
#[derive(Debug, Clone)]
pub struct LocalLinearTrend {
    endog: Vec<DVector<f64>>,
}

const K_STATES: usize = 2;
const K_POSDEF: usize = 2;
const N_PARAMS: usize = 3;

impl LocalLinearTrend {
    pub fn new(endog: &[f64]) -> Result<Self> {
        if endog.iter().filter(|v| !v.is_nan()).count() < 2 {
            return Err(StateSpaceError::DataError(
                "local linear trend requires at least 2 non-missing observations".into(),
            ));
        }
        Ok(Self {
            endog: endog_from_scalars(endog),
        })
    }

    fn endog_std(&self) -> f64 {
        let values: Vec<f64> = self
            .endog
            .iter()
            .map(|y| y[0])
            .filter(|v| !v.is_nan())
            .collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        var.sqrt()
    }
}

impl StateSpaceModel for LocalLinearTrend {
    fn k_states(&self) -> usize {
        K_STATES
    }

    fn k_posdef(&self) -> usize {
        K_POSDEF
    }

    fn endog(&self) -> &[DVector<f64>] {
        &self.endog
    }

    fn param_names(&self) -> Vec<String> {
        vec![
            "sigma2.measurement".into(),
            "sigma2.level".into(),
            "sigma2.trend".into(),
        ]
    }

    /// The sample standard deviation for each variance. Crude, but a valid
    /// strictly positive starting point.
    fn start_params(&self) -> Vec<f64> {
        let std = self.endog_std().max(1e-4);
        vec![std; N_PARAMS]
    }

    fn transform_params(&self, unconstrained: &[f64]) -> Vec<f64> {
        unconstrained.iter().map(|&x| x * x).collect()
    }

    fn untransform_params(&self, constrained: &[f64]) -> Vec<f64> {
        constrained.iter().map(|&x| x.sqrt()).collect()
    }

    fn initialization(&self) -> KalmanInit {
        KalmanInit::approximate_diffuse(K_STATES, KalmanInit::default_kappa())
    }

    fn build_matrices(&self) -> Result<SystemMatrices> {
        let mut mats = SystemMatrices::new(1, K_STATES, K_POSDEF);
        mats.design = TvMatrix::Constant(DMatrix::from_row_slice(1, 2, &[1.0, 0.0]));
        mats.transition = TvMatrix::Constant(DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]));
        mats.selection = TvMatrix::Constant(DMatrix::identity(2, 2));
        Ok(mats)
    }

    fn update(&self, params: &[f64], mats: &mut SystemMatrices) -> Result<()> {
        if params.len() != N_PARAMS {
            return Err(StateSpaceError::ParamLengthMismatch {
                expected: N_PARAMS,
                got: params.len(),
            });
        }
        mats.set_obs_cov_entry(0, 0, params[0])?;
        mats.set_state_cov_diagonal(&params[1..])?;
        Ok(())
    }
}
