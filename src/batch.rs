//! Parallel batch operations over collections of models.
//!
//! Each entry is processed independently on the rayon thread pool and yields
//! its own `Result`, so one failing series never poisons the rest of the
//! batch. A shared [`CancelToken`] in the fit options cancels every in-flight
//! fit cooperatively.
//!
//! [`CancelToken`]: crate::optimizer::CancelToken

use rayon::prelude::*;

use crate::error::Result;
use crate::model::StateSpaceModel;
use crate::optimizer::{fit, loglike, FitOptions, MleResults};
use crate::prediction::{forecast_observations, Prediction};

/// Fit every model in parallel with shared options.
pub fn batch_fit<M>(models: &[M], options: &FitOptions) -> Vec<Result<MleResults>>
where
    M: StateSpaceModel + Sync,
{
    models.par_iter().map(|m| fit(m, options)).collect()
}

/// Evaluate the log-likelihood of every model at a shared constrained
/// parameter vector.
pub fn batch_loglike<M>(models: &[M], params: &[f64]) -> Vec<Result<f64>>
where
    M: StateSpaceModel + Sync,
{
    models.par_iter().map(|m| loglike(m, params)).collect()
}

/// Forecast `steps` periods ahead from every fitted result.
pub fn batch_forecast(results: &[MleResults], steps: usize) -> Vec<Prediction> {
    results
        .par_iter()
        .map(|r| forecast_observations(r, steps))
        .collect()
}
