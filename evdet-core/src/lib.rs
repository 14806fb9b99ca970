//! Event-camera histogram encoding and detection postprocessing.
//!
//! This crate turns raw event buffers into stacked histograms ready for a
//! detection model, and turns the model's raw per-anchor predictions back into
//! labeled bounding boxes. The model itself stays outside the crate behind the
//! [`Model`] trait.
//!
//! # Example
//!
//! ```no_run
//! use evdet_core::{ClassTable, EventDecoder, Postprocessor, StackedHistogram};
//!
//! let bytes = std::fs::read("events.bin").unwrap();
//! let events = EventDecoder::new().decode(&bytes).unwrap();
//!
//! let histogram = StackedHistogram::new(10, 720, 1280).unwrap();
//! let tensor = histogram.construct(&events);
//! println!("Histogram shape: {:?}", tensor.shape());
//!
//! // ... run the model on `tensor`, then:
//! # let raw = vec![vec![]];
//! let detections = Postprocessor::new(ClassTable::default())
//!     .postprocess(&raw, 3, 0.1, 0.45)
//!     .unwrap();
//! ```
//!
//! # Features
//!
//! - Stable time sort of decoded events
//! - Polarity/time stacked histograms with silent clipping of off-sensor events
//! - Confidence filtering and class-wise greedy NMS
//! - CSV, JSON and binary dump writers

pub mod config;
pub mod decoder;
pub mod error;
pub mod histogram;
pub mod model;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod postprocess;
pub mod types;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use decoder::EventDecoder;
pub use error::{Error, Result};
pub use histogram::StackedHistogram;
pub use model::Model;
pub use output::FieldOrder;
pub use pipeline::{Inference, Pipeline};
pub use postprocess::Postprocessor;
pub use types::{
    BoundingBox, ClassTable, Detection, Event, EventSet, HistogramTensor, RawDetection,
    RawPredictions,
};
