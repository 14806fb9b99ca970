//! Boundary to the externally owned detection model.

use crate::types::{HistogramTensor, RawPredictions};

/// An opaque detection model.
///
/// The pipeline hands over one histogram per call together with whatever
/// recurrent state the caller chose to keep, and only interprets the returned
/// predictions. State and auxiliary outputs are passed through untouched.
pub trait Model {
    /// Recurrent state threaded between calls.
    type State;
    /// Extra model outputs the pipeline does not inspect.
    type Aux;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the forward pass on a single histogram.
    ///
    /// Predictions must be shaped `[batch, anchors, 5 + num_classes]`.
    fn forward(
        &mut self,
        input: &HistogramTensor,
        state: Option<Self::State>,
    ) -> Result<(RawPredictions, Self::State, Self::Aux), Self::Error>;
}
