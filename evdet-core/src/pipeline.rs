//! End-to-end inference: decode, encode, forward, postprocess.

use crate::config::PipelineConfig;
use crate::decoder::EventDecoder;
use crate::error::{Error, Result};
use crate::histogram::StackedHistogram;
use crate::model::Model;
use crate::postprocess::Postprocessor;
use crate::types::{ClassTable, Detection};
use tracing::{debug, instrument};

/// Result of one inference call.
#[derive(Debug)]
pub struct Inference<S, A> {
    /// Detections per batch item, `None` where nothing survived
    pub detections: Vec<Option<Vec<Detection>>>,
    /// State returned by the model, to be passed back in if desired
    pub state: S,
    pub aux: A,
}

/// Wires the decoder, histogram encoder and postprocessor around a model.
///
/// The pipeline keeps no state between calls; recurrent model state is owned
/// by the caller and threaded through [`Pipeline::infer`].
#[derive(Debug)]
pub struct Pipeline<M> {
    decoder: EventDecoder,
    encoder: StackedHistogram,
    postprocessor: Postprocessor,
    config: PipelineConfig,
    model: M,
}

impl<M: Model> Pipeline<M> {
    /// Builds a pipeline labeling detections with the default class table.
    pub fn new(config: PipelineConfig, model: M) -> Result<Self> {
        Self::with_classes(config, ClassTable::default(), model)
    }

    /// Builds a pipeline with a custom class table.
    pub fn with_classes(config: PipelineConfig, classes: ClassTable, model: M) -> Result<Self> {
        config.validate()?;

        let mut encoder = StackedHistogram::new(config.bins, config.height, config.width)?;
        if let Some(cutoff) = config.count_cutoff {
            encoder = encoder.with_count_cutoff(cutoff)?;
        }
        let postprocessor = Postprocessor::new(classes).class_agnostic(config.class_agnostic);

        Ok(Self {
            decoder: EventDecoder::new(),
            encoder,
            postprocessor,
            config,
            model,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Consumes the pipeline, handing the model back.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Runs one inference over a raw event buffer.
    #[instrument(skip(self, buffer, state), fields(bytes = buffer.len()))]
    pub fn infer(
        &mut self,
        buffer: &[u8],
        state: Option<M::State>,
    ) -> Result<Inference<M::State, M::Aux>> {
        let events = self.decoder.decode(buffer)?;
        let histogram = self.encoder.construct(&events);

        let (predictions, state, aux) = self
            .model
            .forward(&histogram, state)
            .map_err(|e| Error::Model(Box::new(e)))?;
        debug!(shape = ?predictions.shape(), "model forward pass complete");

        let detections = self.postprocessor.postprocess_predictions(
            &predictions,
            self.config.num_classes,
            self.config.confidence_threshold,
            self.config.nms_threshold,
        )?;

        Ok(Inference {
            detections,
            state,
            aux,
        })
    }
}
