use nalgebra::{DMatrix, DVector};

use crate::error::{Result, StateSpaceError};

/// A system matrix that is either constant over time or time-varying.
///
/// Time-varying storage holds one matrix per time step. Access past the last
/// stored index clamps to the final entry, so forecasting beyond the sample
/// reuses the last supplied value.
#[derive(Debug, Clone)]
pub enum TvMatrix {
    Constant(DMatrix<f64>),
    TimeVarying(Vec<DMatrix<f64>>),
}

impl TvMatrix {
    pub fn at(&self, t: usize) -> &DMatrix<f64> {
        match self {
            TvMatrix::Constant(m) => m,
            TvMatrix::TimeVarying(v) => &v[t.min(v.len() - 1)],
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, TvMatrix::Constant(_))
    }

    fn check_shape(&self, name: &str, nrows: usize, ncols: usize) -> Result<()> {
        let check = |m: &DMatrix<f64>, t: Option<usize>| -> Result<()> {
            if m.nrows() != nrows || m.ncols() != ncols {
                let at = t.map(|t| format!(" at t={}", t)).unwrap_or_default();
                return Err(StateSpaceError::ConfigError(format!(
                    "{} must be {}x{}, got {}x{}{}",
                    name,
                    nrows,
                    ncols,
                    m.nrows(),
                    m.ncols(),
                    at
                )));
            }
            Ok(())
        };
        match self {
            TvMatrix::Constant(m) => check(m, None),
            TvMatrix::TimeVarying(v) => {
                if v.is_empty() {
                    return Err(StateSpaceError::ConfigError(format!(
                        "time-varying {} must have at least one entry",
                        name
                    )));
                }
                for (t, m) in v.iter().enumerate() {
                    check(m, Some(t))?;
                }
                Ok(())
            }
        }
    }
}

/// A system vector (intercept) that is either constant over time or time-varying.
#[derive(Debug, Clone)]
pub enum TvVector {
    Constant(DVector<f64>),
    TimeVarying(Vec<DVector<f64>>),
}

impl TvVector {
    pub fn at(&self, t: usize) -> &DVector<f64> {
        match self {
            TvVector::Constant(v) => v,
            TvVector::TimeVarying(vs) => &vs[t.min(vs.len() - 1)],
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, TvVector::Constant(_))
    }

    fn check_len(&self, name: &str, len: usize) -> Result<()> {
        let check = |v: &DVector<f64>, t: Option<usize>| -> Result<()> {
            if v.len() != len {
                let at = t.map(|t| format!(" at t={}", t)).unwrap_or_default();
                return Err(StateSpaceError::ConfigError(format!(
                    "{} must have length {}, got {}{}",
                    name,
                    len,
                    v.len(),
                    at
                )));
            }
            Ok(())
        };
        match self {
            TvVector::Constant(v) => check(v, None),
            TvVector::TimeVarying(vs) => {
                if vs.is_empty() {
                    return Err(StateSpaceError::ConfigError(format!(
                        "time-varying {} must have at least one entry",
                        name
                    )));
                }
                for (t, v) in vs.iter().enumerate() {
                    check(v, Some(t))?;
                }
                Ok(())
            }
        }
    }
}

/// The matrix parameter store for a linear-Gaussian state space model.
///
/// Observation:  y_t = Z_t alpha_t + d_t + eps_t,   eps_t ~ N(0, H_t)
/// State:        alpha_{t+1} = T_t alpha_t + c_t + R_t eta_t,  eta_t ~ N(0, Q_t)
///
/// All matrices default to zero; a model's `build_matrices` sets the fixed
/// structural entries once, and `update` writes parameter-dependent values on
/// every optimizer trial. Shapes are checked eagerly via [`validate`], so the
/// filter never has to deal with non-conformable matrices.
///
/// Exogenous regressors enter through the intercepts: a model with regressor
/// effects precomputes x_t' beta per step and stores it as a time-varying
/// `obs_intercept` (or `state_intercept` for effects on the state equation).
/// Forecasting past the sample reuses the final intercept entry.
///
/// [`validate`]: SystemMatrices::validate
#[derive(Debug, Clone)]
pub struct SystemMatrices {
    k_endog: usize,
    k_states: usize,
    k_posdef: usize,
    /// Z: k_endog x k_states.
    pub design: TvMatrix,
    /// d_t: k_endog. Time-varying storage carries exogenous regressor
    /// effects, one precomputed value per step.
    pub obs_intercept: TvVector,
    /// H: k_endog x k_endog.
    pub obs_cov: TvMatrix,
    /// T: k_states x k_states.
    pub transition: TvMatrix,
    /// c_t: k_states. Like `obs_intercept`, time-varying storage carries
    /// per-step exogenous effects on the state equation.
    pub state_intercept: TvVector,
    /// R: k_states x k_posdef.
    pub selection: TvMatrix,
    /// Q: k_posdef x k_posdef.
    pub state_cov: TvMatrix,
    // Precomputed (row, col) pairs of the state covariance diagonal, set once
    // at construction so repeated writes in `update` skip index arithmetic.
    state_cov_diag: Vec<(usize, usize)>,
}

impl SystemMatrices {
    /// Create a store with all matrices zeroed.
    pub fn new(k_endog: usize, k_states: usize, k_posdef: usize) -> Self {
        Self {
            k_endog,
            k_states,
            k_posdef,
            design: TvMatrix::Constant(DMatrix::zeros(k_endog, k_states)),
            obs_intercept: TvVector::Constant(DVector::zeros(k_endog)),
            obs_cov: TvMatrix::Constant(DMatrix::zeros(k_endog, k_endog)),
            transition: TvMatrix::Constant(DMatrix::zeros(k_states, k_states)),
            state_intercept: TvVector::Constant(DVector::zeros(k_states)),
            selection: TvMatrix::Constant(DMatrix::zeros(k_states, k_posdef)),
            state_cov: TvMatrix::Constant(DMatrix::zeros(k_posdef, k_posdef)),
            state_cov_diag: (0..k_posdef).map(|i| (i, i)).collect(),
        }
    }

    pub fn k_endog(&self) -> usize {
        self.k_endog
    }

    pub fn k_states(&self) -> usize {
        self.k_states
    }

    pub fn k_posdef(&self) -> usize {
        self.k_posdef
    }

    /// Check that every matrix conforms to the declared dimensions, at every
    /// stored time index.
    pub fn validate(&self) -> Result<()> {
        self.design
            .check_shape("design", self.k_endog, self.k_states)?;
        self.obs_intercept.check_len("obs_intercept", self.k_endog)?;
        self.obs_cov
            .check_shape("obs_cov", self.k_endog, self.k_endog)?;
        self.transition
            .check_shape("transition", self.k_states, self.k_states)?;
        self.state_intercept
            .check_len("state_intercept", self.k_states)?;
        self.selection
            .check_shape("selection", self.k_states, self.k_posdef)?;
        self.state_cov
            .check_shape("state_cov", self.k_posdef, self.k_posdef)?;
        Ok(())
    }

    /// Write the state covariance diagonal using the index pairs cached at
    /// construction. Requires a constant state covariance.
    pub fn set_state_cov_diagonal(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.k_posdef {
            return Err(StateSpaceError::ParamLengthMismatch {
                expected: self.k_posdef,
                got: values.len(),
            });
        }
        match &mut self.state_cov {
            TvMatrix::Constant(q) => {
                for (&(i, j), &v) in self.state_cov_diag.iter().zip(values.iter()) {
                    q[(i, j)] = v;
                }
                Ok(())
            }
            TvMatrix::TimeVarying(_) => Err(StateSpaceError::ConfigError(
                "set_state_cov_diagonal requires a constant state covariance".into(),
            )),
        }
    }

    /// Write a single observation covariance entry. Requires a constant
    /// observation covariance.
    pub fn set_obs_cov_entry(&mut self, i: usize, j: usize, value: f64) -> Result<()> {
        if i >= self.k_endog || j >= self.k_endog {
            return Err(StateSpaceError::ConfigError(format!(
                "obs_cov index ({}, {}) out of bounds for k_endog={}",
                i, j, self.k_endog
            )));
        }
        match &mut self.obs_cov {
            TvMatrix::Constant(h) => {
                h[(i, j)] = value;
                Ok(())
            }
            TvMatrix::TimeVarying(_) => Err(StateSpaceError::ConfigError(
                "set_obs_cov_entry requires a constant observation covariance".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_zero() {
        let mats = SystemMatrices::new(1, 2, 2);
        assert_eq!(mats.design.at(0), &DMatrix::zeros(1, 2));
        assert_eq!(mats.transition.at(0), &DMatrix::zeros(2, 2));
        assert_eq!(mats.selection.at(0), &DMatrix::zeros(2, 2));
        assert_eq!(mats.obs_intercept.at(5), &DVector::zeros(1));
        assert!(mats.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_design() {
        let mut mats = SystemMatrices::new(1, 2, 2);
        mats.design = TvMatrix::Constant(DMatrix::zeros(1, 3));
        assert!(mats.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_time_varying_entry() {
        let mut mats = SystemMatrices::new(1, 2, 2);
        mats.obs_intercept = TvVector::TimeVarying(vec![
            DVector::zeros(1),
            DVector::zeros(2), // wrong length at t=1
        ]);
        let err = mats.validate().unwrap_err();
        assert!(err.to_string().contains("t=1"), "got: {}", err);
    }

    #[test]
    fn test_time_varying_access_clamps() {
        let tv = TvVector::TimeVarying(vec![
            DVector::from_element(1, 1.0),
            DVector::from_element(1, 2.0),
        ]);
        assert_eq!(tv.at(0)[0], 1.0);
        assert_eq!(tv.at(1)[0], 2.0);
        assert_eq!(tv.at(100)[0], 2.0);

        let tm = TvMatrix::TimeVarying(vec![DMatrix::from_element(1, 1, 3.0)]);
        assert_eq!(tm.at(50)[(0, 0)], 3.0);
        assert!(!tm.is_constant());
    }

    #[test]
    fn test_state_cov_diagonal_cache() {
        let mut mats = SystemMatrices::new(1, 2, 2);
        mats.set_state_cov_diagonal(&[0.5, 0.1]).unwrap();
        let q = mats.state_cov.at(0);
        assert_eq!(q[(0, 0)], 0.5);
        assert_eq!(q[(1, 1)], 0.1);
        assert_eq!(q[(0, 1)], 0.0);
    }

    #[test]
    fn test_state_cov_diagonal_length_mismatch() {
        let mut mats = SystemMatrices::new(1, 2, 2);
        assert!(mats.set_state_cov_diagonal(&[0.5]).is_err());
    }

    #[test]
    fn test_obs_cov_entry_bounds() {
        let mut mats = SystemMatrices::new(1, 2, 2);
        mats.set_obs_cov_entry(0, 0, 1.5).unwrap();
        assert_eq!(mats.obs_cov.at(0)[(0, 0)], 1.5);
        assert!(mats.set_obs_cov_entry(1, 0, 1.0).is_err());
    }
}
