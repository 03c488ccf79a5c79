//! Post-estimation queries: in-sample prediction, out-of-sample forecasting,
//! dynamic prediction and confidence intervals.
//!
//! All queries consume an [`MleResults`], so they work identically for fitted
//! parameters and for externally supplied ones (via `filter_at`).

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::error::{Result, StateSpaceError};
use crate::kalman::kalman_filter;
use crate::matrices::SystemMatrices;
use crate::optimizer::MleResults;

/// Distribution used for confidence interval critical values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CiMethod {
    /// Standard normal quantiles.
    Normal,
    /// Student-t quantiles with the given degrees of freedom. Wider intervals
    /// for small samples.
    StudentT { df: f64 },
}

/// Two-sided critical value at level `alpha` (e.g. 0.05 for 95% intervals).
fn critical_value(alpha: f64, method: CiMethod) -> Result<f64> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(StateSpaceError::ConfigError(format!(
            "alpha must be in (0, 1), got {}",
            alpha
        )));
    }
    let p = 1.0 - alpha / 2.0;
    match method {
        CiMethod::Normal => {
            let dist = Normal::new(0.0, 1.0)
                .map_err(|e| StateSpaceError::ConfigError(e.to_string()))?;
            Ok(dist.inverse_cdf(p))
        }
        CiMethod::StudentT { df } => {
            if df <= 0.0 {
                return Err(StateSpaceError::ConfigError(format!(
                    "degrees of freedom must be positive, got {}",
                    df
                )));
            }
            let dist = StudentsT::new(0.0, 1.0, df)
                .map_err(|e| StateSpaceError::ConfigError(e.to_string()))?;
            Ok(dist.inverse_cdf(p))
        }
    }
}

/// Observation-space predictions: means and covariances, one entry per period.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Predicted observation means.
    pub mean: Vec<DVector<f64>>,
    /// Predicted observation covariances (state uncertainty plus measurement
    /// noise).
    pub cov: Vec<DMatrix<f64>>,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Per-component marginal standard errors.
    pub fn std_errors(&self) -> Vec<DVector<f64>> {
        self.cov
            .iter()
            .map(|c| DVector::from_iterator(c.nrows(), c.diagonal().iter().map(|v| v.sqrt())))
            .collect()
    }

    /// Two-sided confidence intervals at level `alpha`, per period and
    /// component. Returns `(lower, upper)` pairs.
    pub fn conf_int(
        &self,
        alpha: f64,
        method: CiMethod,
    ) -> Result<Vec<(DVector<f64>, DVector<f64>)>> {
        let crit = critical_value(alpha, method)?;
        let se = self.std_errors();
        Ok(self
            .mean
            .iter()
            .zip(se.iter())
            .map(|(m, s)| (m - crit * s, m + crit * s))
            .collect())
    }
}

/// Predicted observation distribution from a predicted state distribution:
/// mean Z a + d, covariance Z P Z' + H.
fn observe(
    mats: &SystemMatrices,
    t: usize,
    a: &DVector<f64>,
    p: &DMatrix<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    let z = mats.design.at(t);
    let d = mats.obs_intercept.at(t);
    let h = mats.obs_cov.at(t);
    let mean = z * a + d;
    let cov = z * p * z.transpose() + h;
    (mean, cov)
}

/// In-sample one-step-ahead predicted observations for t = 0..n.
pub fn predicted_observations(results: &MleResults) -> Prediction {
    let n = results.endog.len();
    let mut mean = Vec::with_capacity(n);
    let mut cov = Vec::with_capacity(n);
    for t in 0..n {
        let (m, c) = observe(
            &results.matrices,
            t,
            &results.filter.predicted_state[t],
            &results.filter.predicted_cov[t],
        );
        mean.push(m);
        cov.push(c);
    }
    Prediction { mean, cov }
}

/// Out-of-sample forecasts for `steps` periods beyond the sample.
///
/// Starts from the beyond-sample predicted state and iterates the transition
/// equation; system matrices past the sample reuse their final entries. The
/// forecast covariance includes the measurement noise, so it describes future
/// observations rather than future states.
pub fn forecast_observations(results: &MleResults, steps: usize) -> Prediction {
    let n = results.endog.len();
    let mats = &results.matrices;

    let mut a = results.filter.predicted_state[n].clone();
    let mut p = results.filter.predicted_cov[n].clone();

    let mut mean = Vec::with_capacity(steps);
    let mut cov = Vec::with_capacity(steps);
    for j in 0..steps {
        let t = n + j;
        let (m, c) = observe(mats, t, &a, &p);
        mean.push(m);
        cov.push(c);

        let t_mat = mats.transition.at(t);
        let c_vec = mats.state_intercept.at(t);
        let r = mats.selection.at(t);
        let rqr = r * mats.state_cov.at(t) * r.transpose();
        a = t_mat * a + c_vec;
        p = t_mat * p * t_mat.transpose() + rqr;
        p = 0.5 * (&p + p.transpose());
    }
    Prediction { mean, cov }
}

/// Dynamic in-sample prediction.
///
/// Observations from `start` onward are withheld from the filter, so
/// predictions before `start` are the usual one-step-ahead values while
/// predictions from `start` on are multi-step extrapolations conditioned only
/// on data before the cutoff.
pub fn dynamic_observations(results: &MleResults, start: usize) -> Result<Prediction> {
    let n = results.endog.len();
    if start > n {
        return Err(StateSpaceError::DataError(format!(
            "dynamic prediction start {} is beyond the sample length {}",
            start, n
        )));
    }

    let mut masked = results.endog.clone();
    for y in masked.iter_mut().skip(start) {
        y.fill(f64::NAN);
    }

    let output = kalman_filter(&masked, &results.matrices, &results.init)?;
    let mut mean = Vec::with_capacity(n);
    let mut cov = Vec::with_capacity(n);
    for t in 0..n {
        let (m, c) = observe(
            &results.matrices,
            t,
            &output.predicted_state[t],
            &output.predicted_cov[t],
        );
        mean.push(m);
        cov.push(c);
    }
    Ok(Prediction { mean, cov })
}

impl MleResults {
    /// In-sample one-step-ahead predictions.
    pub fn predict(&self) -> Prediction {
        predicted_observations(self)
    }

    /// Out-of-sample forecasts for `steps` periods.
    pub fn forecast(&self, steps: usize) -> Prediction {
        forecast_observations(self, steps)
    }

    /// Dynamic prediction with observations withheld from `start` onward.
    pub fn predict_dynamic(&self, start: usize) -> Result<Prediction> {
        dynamic_observations(self, start)
    }
}
