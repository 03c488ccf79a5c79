use nalgebra::DVector;

use crate::error::Result;
use crate::initialization::KalmanInit;
use crate::matrices::SystemMatrices;

/// The contract a concrete state space model implements to get filtering,
/// maximum likelihood estimation, prediction and forecasting for free.
///
/// A model declares its dimensions, owns its observation series, supplies
/// starting parameters and the unconstrained/constrained transform pair, builds
/// the fixed structure of its system matrices once, and writes
/// parameter-dependent entries in [`update`] on every optimizer trial.
///
/// [`update`]: StateSpaceModel::update
pub trait StateSpaceModel {
    /// Dimension of the state vector.
    fn k_states(&self) -> usize;

    /// Dimension of the state error vector (columns of the selection matrix).
    fn k_posdef(&self) -> usize;

    /// The observation series. NaN components mark missing entries.
    fn endog(&self) -> &[DVector<f64>];

    /// Dimension of one observation.
    fn k_endog(&self) -> usize {
        self.endog().first().map(|y| y.len()).unwrap_or(0)
    }

    /// Ordered human-readable parameter labels. Must have the same length as
    /// `start_params`.
    fn param_names(&self) -> Vec<String>;

    /// Initial constrained parameter vector. Must be a valid point (e.g.
    /// strictly positive variances).
    fn start_params(&self) -> Vec<f64>;

    /// Map an unconstrained optimizer-space vector into the constrained
    /// model-natural space.
    fn transform_params(&self, unconstrained: &[f64]) -> Vec<f64>;

    /// Inverse of `transform_params`, up to numerical tolerance.
    fn untransform_params(&self, constrained: &[f64]) -> Vec<f64>;

    /// Initial state distribution, set once at construction.
    fn initialization(&self) -> KalmanInit;

    /// Build the system matrices with their fixed structural entries. Matrices
    /// not touched here or in `update` stay zero.
    fn build_matrices(&self) -> Result<SystemMatrices>;

    /// Write the parameter-dependent matrix entries for a constrained
    /// parameter vector.
    fn update(&self, params: &[f64], mats: &mut SystemMatrices) -> Result<()>;
}
