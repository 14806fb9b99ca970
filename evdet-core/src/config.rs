//! Parameters consumed by the pipeline.
//!
//! The values are supplied by the caller; nothing here reads configuration
//! files.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Everything the pipeline needs besides the model itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of temporal bins per polarity
    pub bins: usize,
    /// Sensor height in pixels
    pub height: usize,
    /// Sensor width in pixels
    pub width: usize,
    /// Class scores per prediction row
    pub num_classes: usize,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Optional per-cell clamp for histogram counts
    pub count_cutoff: Option<u32>,
    pub class_agnostic: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // Gen4 sensor geometry (1280x720)
        Self {
            bins: 10,
            height: 720,
            width: 1280,
            num_classes: 3,
            confidence_threshold: 0.1,
            nms_threshold: 0.45,
            count_cutoff: None,
            class_agnostic: false,
        }
    }
}

impl PipelineConfig {
    /// Checks every value against its valid range.
    pub fn validate(&self) -> Result<()> {
        if self.bins == 0 {
            return Err(Error::invalid_parameter("bins", "must be at least 1"));
        }
        if self.height == 0 || self.width == 0 {
            return Err(Error::invalid_parameter(
                "resolution",
                format!("{}x{} has no pixels", self.height, self.width),
            ));
        }
        crate::histogram::cell_count(self.bins, self.height, self.width)?;
        if self.num_classes == 0 {
            return Err(Error::invalid_parameter("num_classes", "must be at least 1"));
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::invalid_parameter(
                    name,
                    format!("{value} is outside [0, 1]"),
                ));
            }
        }
        if self.count_cutoff == Some(0) {
            return Err(Error::invalid_parameter("count_cutoff", "must be at least 1"));
        }
        Ok(())
    }
}
