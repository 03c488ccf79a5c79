//! Linear Gaussian state space modeling: Kalman filtering, maximum likelihood
//! estimation, prediction and forecasting.
//!
//! A model implements [`StateSpaceModel`] by declaring its dimensions,
//! building the fixed structure of its system matrices, and writing the
//! parameter-dependent entries on every optimizer trial. Filtering, fitting,
//! forecasting and confidence intervals then come from the shared machinery:
//!
//! ```
//! use statespace_rs::{fit, FitOptions, LocalLinearTrend, CiMethod};
//!
//! let y: Vec<f64> = (0..50).map(|t| 0.3 * t as f64 + (t % 4) as f64 * 0.1).collect();
//! let model = LocalLinearTrend::new(&y).unwrap();
//! let results = fit(&model, &FitOptions::default()).unwrap();
//!
//! let forecast = results.forecast(4);
//! let intervals = forecast.conf_int(0.05, CiMethod::Normal).unwrap();
//! assert_eq!(intervals.len(), 4);
//! ```
//!
//! Missing observations are marked with NaN and handled transparently by the
//! filter. Nonstationary models use an approximate diffuse initialization
//! with the affected periods excluded from the likelihood.

pub mod batch;
pub mod error;
pub mod initialization;
pub mod kalman;
pub mod local_linear_trend;
pub mod matrices;
pub mod model;
pub mod optimizer;
pub mod prediction;

pub use batch::{batch_fit, batch_forecast, batch_loglike};
pub use error::{Result, StateSpaceError};
pub use initialization::KalmanInit;
pub use kalman::{endog_from_scalars, kalman_filter, FilterOutput};
pub use local_linear_trend::LocalLinearTrend;
pub use matrices::{SystemMatrices, TvMatrix, TvVector};
pub use model::StateSpaceModel;
pub use optimizer::{filter_at, fit, loglike, CancelToken, FitOptions, MleResults};
pub use prediction::{
    dynamic_observations, forecast_observations, predicted_observations, CiMethod, Prediction,
};
