use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateSpaceError {
    #[error("parameter length mismatch: expected {expected}, got {got}")]
    ParamLengthMismatch { expected: usize, got: usize },

    #[error("invalid model configuration: {0}")]
    ConfigError(String),

    #[error("filter failed at t={t}: {reason}")]
    FilterFailed { t: usize, reason: String },

    #[error("optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("optimizer did not converge: {n_iter} iterations, best objective {best_cost}")]
    NotConverged { n_iter: u64, best_cost: f64 },

    #[error("data error: {0}")]
    DataError(String),
}

pub type Result<T> = std::result::Result<T, StateSpaceError>;
