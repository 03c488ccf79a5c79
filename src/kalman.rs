use nalgebra::{DMatrix, DVector};

use crate::error::{Result, StateSpaceError};
use crate::initialization::KalmanInit;
use crate::matrices::SystemMatrices;

/// Output of one Kalman filter pass. Owned by the run that produced it and
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    /// Predicted state means a_{t|t-1} for t = 0..=T. The final entry is the
    /// one-step-ahead state beyond the sample, which seeds forecasting.
    pub predicted_state: Vec<DVector<f64>>,
    /// Predicted state covariances P_{t|t-1} for t = 0..=T.
    pub predicted_cov: Vec<DMatrix<f64>>,
    /// Filtered state means a_{t|t} for t = 0..T.
    pub filtered_state: Vec<DVector<f64>>,
    /// Filtered state covariances P_{t|t} for t = 0..T.
    pub filtered_cov: Vec<DMatrix<f64>>,
    /// One-step-ahead prediction errors v_t; None at missing observations.
    pub innovations: Vec<Option<DVector<f64>>>,
    /// Prediction error covariances F_t; None at missing observations.
    pub innovation_cov: Vec<Option<DMatrix<f64>>>,
    /// Per-step log-likelihood contributions. Zero for missing observations
    /// and burn-in periods; sums exactly to `loglike`.
    pub loglike_terms: Vec<f64>,
    /// Total log-likelihood.
    pub loglike: f64,
    /// Number of non-missing observations past the burn-in.
    pub n_obs_effective: usize,
}

/// Wrap a univariate series as observation vectors. NaN marks a missing entry.
pub fn endog_from_scalars(y: &[f64]) -> Vec<DVector<f64>> {
    y.iter().map(|&v| DVector::from_element(1, v)).collect()
}

fn symmetrize(p: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (p + p.transpose())
}

fn is_missing(y: &DVector<f64>) -> bool {
    y.iter().any(|v| v.is_nan())
}

/// Run the Kalman filter over an observation series.
///
/// Per step t:
/// 1. record the predicted state a_{t|t-1}, P_{t|t-1}
/// 2. innovation v_t = y_t - Z_t a_{t|t-1} - d_t with covariance
///    F_t = Z_t P_{t|t-1} Z_t' + H_t
/// 3. Kalman update (Joseph form) to the filtered state a_{t|t}, P_{t|t}
/// 4. predict a_{t+1|t} = T_t a_{t|t} + c_t,
///    P_{t+1|t} = T_t P_{t|t} T_t' + R_t Q_t R_t'
///
/// An observation with any NaN component is treated as missing: the filtered
/// state passes the prediction through unchanged and the step contributes
/// zero to the likelihood. Covariances are symmetrized after every update to
/// control floating-point drift. A prediction error covariance that fails its
/// Cholesky factorization aborts this evaluation with
/// [`StateSpaceError::FilterFailed`].
pub fn kalman_filter(
    endog: &[DVector<f64>],
    mats: &SystemMatrices,
    init: &KalmanInit,
) -> Result<FilterOutput> {
    let n = endog.len();
    let k = mats.k_states();
    let m = mats.k_endog();
    let burn = init.loglikelihood_burn;

    if n == 0 {
        return Err(StateSpaceError::DataError(
            "observation series is empty".into(),
        ));
    }
    if n <= burn {
        return Err(StateSpaceError::DataError(format!(
            "not enough observations: n={} <= burn={}",
            n, burn
        )));
    }
    if init.k_states() != k {
        return Err(StateSpaceError::ConfigError(format!(
            "initial state has length {}, expected k_states={}",
            init.k_states(),
            k
        )));
    }
    mats.validate()?;
    for (t, y) in endog.iter().enumerate() {
        if y.len() != m {
            return Err(StateSpaceError::DataError(format!(
                "observation at t={} has length {}, expected {}",
                t,
                y.len(),
                m
            )));
        }
    }

    // R Q R' is constant in the common time-invariant case; precompute it.
    let const_rqr = if mats.selection.is_constant() && mats.state_cov.is_constant() {
        let r = mats.selection.at(0);
        Some(r * mats.state_cov.at(0) * r.transpose())
    } else {
        None
    };
    let rqr_at = |t: usize| -> DMatrix<f64> {
        match &const_rqr {
            Some(rqr) => rqr.clone(),
            None => {
                let r = mats.selection.at(t);
                r * mats.state_cov.at(t) * r.transpose()
            }
        }
    };

    let mut predicted_state = Vec::with_capacity(n + 1);
    let mut predicted_cov = Vec::with_capacity(n + 1);
    let mut filtered_state = Vec::with_capacity(n);
    let mut filtered_cov = Vec::with_capacity(n);
    let mut innovations = Vec::with_capacity(n);
    let mut innovation_cov = Vec::with_capacity(n);
    let mut loglike_terms = Vec::with_capacity(n);

    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let eye = DMatrix::<f64>::identity(k, k);

    let mut a = init.initial_state.clone();
    let mut p = init.initial_state_cov.clone();
    let mut loglike = 0.0_f64;
    let mut n_obs_effective = 0;

    for (t, y) in endog.iter().enumerate() {
        predicted_state.push(a.clone());
        predicted_cov.push(p.clone());

        let (a_filt, p_filt) = if is_missing(y) {
            // Degenerate update: no new information.
            innovations.push(None);
            innovation_cov.push(None);
            loglike_terms.push(0.0);
            (a.clone(), p.clone())
        } else {
            let z = mats.design.at(t);
            let d = mats.obs_intercept.at(t);
            let h = mats.obs_cov.at(t);

            let v = y - z * &a - d;
            let f = symmetrize(&(z * &p * z.transpose() + h));

            let chol = f.clone().cholesky().ok_or_else(|| {
                StateSpaceError::FilterFailed {
                    t,
                    reason: "prediction error covariance is not positive definite".into(),
                }
            })?;

            // Gaussian log-density of the innovation.
            let f_inv_v = chol.solve(&v);
            let quad = v.dot(&f_inv_v);
            let l = chol.l();
            let mut logdet = 0.0;
            for i in 0..m {
                let d_ii = l[(i, i)];
                if d_ii <= 0.0 || !d_ii.is_finite() {
                    return Err(StateSpaceError::FilterFailed {
                        t,
                        reason: "invalid Cholesky diagonal".into(),
                    });
                }
                logdet += 2.0 * d_ii.ln();
            }
            let term = -0.5 * ((m as f64) * ln_2pi + logdet + quad);

            if t >= burn {
                loglike += term;
                loglike_terms.push(term);
                n_obs_effective += 1;
            } else {
                loglike_terms.push(0.0);
            }

            // K = P Z' F^{-1}
            let pz_t = &p * z.transpose();
            let k_gain = chol.solve(&pz_t.transpose()).transpose();

            let a_filt = &a + &k_gain * &v;
            // Joseph form keeps the covariance symmetric positive semidefinite.
            let i_kz = &eye - &k_gain * z;
            let p_filt =
                symmetrize(&(&i_kz * &p * i_kz.transpose() + &k_gain * h * k_gain.transpose()));

            innovations.push(Some(v));
            innovation_cov.push(Some(f));
            (a_filt, p_filt)
        };

        filtered_state.push(a_filt.clone());
        filtered_cov.push(p_filt.clone());

        let t_mat = mats.transition.at(t);
        let c = mats.state_intercept.at(t);
        a = t_mat * &a_filt + c;
        p = symmetrize(&(t_mat * &p_filt * t_mat.transpose() + rqr_at(t)));
    }

    predicted_state.push(a);
    predicted_cov.push(p);

    Ok(FilterOutput {
        predicted_state,
        predicted_cov,
        filtered_state,
        filtered_cov,
        innovations,
        innovation_cov,
        loglike_terms,
        loglike,
        n_obs_effective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrices::{TvMatrix, TvVector};

    // Local level model: y_t = mu_t + eps, mu_{t+1} = mu_t + xi.
    fn local_level(q: f64, h: f64) -> SystemMatrices {
        let mut mats = SystemMatrices::new(1, 1, 1);
        mats.design = TvMatrix::Constant(DMatrix::from_element(1, 1, 1.0));
        mats.transition = TvMatrix::Constant(DMatrix::from_element(1, 1, 1.0));
        mats.selection = TvMatrix::Constant(DMatrix::from_element(1, 1, 1.0));
        mats.state_cov = TvMatrix::Constant(DMatrix::from_element(1, 1, q));
        mats.obs_cov = TvMatrix::Constant(DMatrix::from_element(1, 1, h));
        mats
    }

    // Independent scalar recursion used as a reference for the matrix filter.
    fn scalar_reference(y: &[f64], q: f64, h: f64, m0: f64, p0: f64) -> (Vec<f64>, Vec<f64>, f64) {
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        let mut m_pred = m0;
        let mut p_pred = p0;
        let mut m_filt = Vec::new();
        let mut p_filt = Vec::new();
        let mut ll = 0.0;
        for &yt in y {
            let v = yt - m_pred;
            let f = p_pred + h;
            let k = p_pred / f;
            let m = m_pred + k * v;
            let p = (1.0 - k) * p_pred * (1.0 - k) + k * h * k;
            ll += -0.5 * (ln_2pi + f.ln() + v * v / f);
            m_filt.push(m);
            p_filt.push(p);
            m_pred = m;
            p_pred = p + q;
        }
        (m_filt, p_filt, ll)
    }

    #[test]
    fn test_filter_matches_scalar_reference() {
        let y = vec![0.9, 1.2, 0.8, 1.1, 1.4];
        let (m_ref, p_ref, ll_ref) = scalar_reference(&y, 0.1, 0.2, 0.0, 1.0);

        let mats = local_level(0.1, 0.2);
        let init = KalmanInit::known(
            DVector::from_element(1, 0.0),
            DMatrix::from_element(1, 1, 1.0),
        );
        let out = kalman_filter(&endog_from_scalars(&y), &mats, &init).unwrap();

        assert_eq!(out.filtered_state.len(), y.len());
        assert_eq!(out.predicted_state.len(), y.len() + 1);
        for t in 0..y.len() {
            assert!(
                (out.filtered_state[t][0] - m_ref[t]).abs() < 1e-12,
                "filtered mean mismatch at t={}",
                t
            );
            assert!(
                (out.filtered_cov[t][(0, 0)] - p_ref[t]).abs() < 1e-12,
                "filtered cov mismatch at t={}",
                t
            );
        }
        assert!((out.loglike - ll_ref).abs() < 1e-12);
        assert_eq!(out.n_obs_effective, y.len());
    }

    #[test]
    fn test_loglike_terms_sum_to_total() {
        let y = vec![0.5, 0.7, -0.2, 0.3, 0.9, 0.1];
        let mats = local_level(0.3, 0.5);
        let init = KalmanInit::approximate_diffuse(1, 1e6);
        let out = kalman_filter(&endog_from_scalars(&y), &mats, &init).unwrap();

        let sum: f64 = out.loglike_terms.iter().sum();
        assert!((sum - out.loglike).abs() < 1e-12);
        // burn = k_states = 1: first term excluded
        assert_eq!(out.loglike_terms[0], 0.0);
        assert_eq!(out.n_obs_effective, y.len() - 1);
    }

    #[test]
    fn test_missing_observation_passes_prediction_through() {
        let mut y = vec![0.9, 1.2, 0.8, 1.1, 1.4, 1.0];
        y[3] = f64::NAN;
        let mats = local_level(0.1, 0.2);
        let init = KalmanInit::known(
            DVector::from_element(1, 0.0),
            DMatrix::from_element(1, 1, 1.0),
        );
        let out = kalman_filter(&endog_from_scalars(&y), &mats, &init).unwrap();

        assert!(out.innovations[3].is_none());
        assert!(out.innovation_cov[3].is_none());
        assert_eq!(out.loglike_terms[3], 0.0);
        assert!((out.filtered_state[3][0] - out.predicted_state[3][0]).abs() < 1e-15);
        assert!((out.filtered_cov[3][(0, 0)] - out.predicted_cov[3][(0, 0)]).abs() < 1e-15);
        assert_eq!(out.n_obs_effective, y.len() - 1);
    }

    #[test]
    fn test_zero_state_noise_deterministic_mean_path() {
        // Local linear trend structure with zero state noise and known initial
        // state: the predicted mean path is the transition recursion alone,
        // regardless of the observations.
        let mut mats = SystemMatrices::new(1, 2, 2);
        mats.design = TvMatrix::Constant(DMatrix::from_row_slice(1, 2, &[1.0, 0.0]));
        mats.transition = TvMatrix::Constant(DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]));
        mats.selection = TvMatrix::Constant(DMatrix::identity(2, 2));
        mats.state_cov = TvMatrix::Constant(DMatrix::zeros(2, 2));
        mats.obs_cov = TvMatrix::Constant(DMatrix::from_element(1, 1, 1.0));

        let x0 = DVector::from_row_slice(&[1.0, 2.0]);
        let init = KalmanInit::known(x0.clone(), DMatrix::zeros(2, 2));

        let y = vec![10.0, -3.0, 7.0, 0.0];
        let out = kalman_filter(&endog_from_scalars(&y), &mats, &init).unwrap();

        // mu_t = mu_0 + t * nu_0, nu_t = nu_0
        for t in 0..y.len() {
            let expected_mu = 1.0 + 2.0 * t as f64;
            assert!(
                (out.predicted_state[t][0] - expected_mu).abs() < 1e-10,
                "level mismatch at t={}: {} vs {}",
                t,
                out.predicted_state[t][0],
                expected_mu
            );
            assert!((out.predicted_state[t][1] - 2.0).abs() < 1e-10);
            // With P = 0 the gain is zero and the update is a no-op.
            assert!((out.filtered_state[t][0] - out.predicted_state[t][0]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_obs_intercept_shifts_series() {
        // Filtering y + d with obs_intercept = d is identical to filtering y.
        let y = vec![0.4, 0.9, 0.2, 0.6, 1.1];
        let d = 3.5;
        let shifted: Vec<f64> = y.iter().map(|&v| v + d).collect();

        let init = KalmanInit::known(
            DVector::from_element(1, 0.0),
            DMatrix::from_element(1, 1, 1.0),
        );
        let base = kalman_filter(&endog_from_scalars(&y), &local_level(0.1, 0.2), &init).unwrap();

        let mut mats = local_level(0.1, 0.2);
        mats.obs_intercept = TvVector::Constant(DVector::from_element(1, d));
        let out = kalman_filter(&endog_from_scalars(&shifted), &mats, &init).unwrap();

        assert!((out.loglike - base.loglike).abs() < 1e-10);
        for t in 0..y.len() {
            assert!((out.filtered_state[t][0] - base.filtered_state[t][0]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_singular_innovation_covariance_is_fatal() {
        // Zero obs noise, zero state noise, zero initial covariance: F = 0.
        let mats = local_level(0.0, 0.0);
        let init = KalmanInit::known(DVector::zeros(1), DMatrix::zeros(1, 1));
        let err = kalman_filter(&endog_from_scalars(&[1.0, 2.0]), &mats, &init).unwrap_err();
        match err {
            StateSpaceError::FilterFailed { t, .. } => assert_eq!(t, 0),
            other => panic!("expected FilterFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_short_series_rejected() {
        let mats = local_level(0.1, 0.2);
        let empty: Vec<DVector<f64>> = vec![];
        assert!(kalman_filter(&empty, &mats, &KalmanInit::approximate_diffuse(1, 1e6)).is_err());
        // n == burn
        assert!(kalman_filter(
            &endog_from_scalars(&[1.0]),
            &mats,
            &KalmanInit::approximate_diffuse(1, 1e6)
        )
        .is_err());
    }

    #[test]
    fn test_init_dimension_mismatch_rejected() {
        let mats = local_level(0.1, 0.2);
        let init = KalmanInit::known(DVector::zeros(2), DMatrix::zeros(2, 2));
        assert!(kalman_filter(&endog_from_scalars(&[1.0, 2.0]), &mats, &init).is_err());
    }
}
