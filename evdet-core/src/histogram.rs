//! Stacked event histograms.
//!
//! Events are binned by polarity and time into a `[2 * bins, height, width]`
//! tensor of counts. Channel `polarity * bins + bin` holds the events of one
//! polarity that fall into one time bin.

use crate::error::{Error, Result};
use crate::types::{EventSet, HistogramTensor};
use tracing::debug;

/// Number of polarities an event can carry.
pub const POLARITIES: usize = 2;

/// Histogram encoder with a fixed output shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackedHistogram {
    bins: usize,
    height: usize,
    width: usize,
    count_cutoff: Option<u32>,
}

impl StackedHistogram {
    /// Creates an encoder for `bins` time bins on a `height x width` sensor.
    pub fn new(bins: usize, height: usize, width: usize) -> Result<Self> {
        if bins == 0 {
            return Err(Error::invalid_parameter("bins", "must be at least 1"));
        }
        if height == 0 || width == 0 {
            return Err(Error::invalid_parameter(
                "resolution",
                format!("{height}x{width} has no pixels"),
            ));
        }
        cell_count(bins, height, width)?;
        Ok(Self {
            bins,
            height,
            width,
            count_cutoff: None,
        })
    }

    /// Clamps every output cell to at most `cutoff` events.
    pub fn with_count_cutoff(mut self, cutoff: u32) -> Result<Self> {
        if cutoff == 0 {
            return Err(Error::invalid_parameter(
                "count_cutoff",
                "must be at least 1",
            ));
        }
        self.count_cutoff = Some(cutoff);
        Ok(self)
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Returns the output shape `[channels, height, width]`.
    pub fn shape(&self) -> [usize; 3] {
        [POLARITIES * self.bins, self.height, self.width]
    }

    /// Builds the histogram over the events' own time range.
    ///
    /// When every event shares one timestamp, everything lands in bin 0.
    pub fn construct(&self, events: &EventSet) -> HistogramTensor {
        match events.time_range() {
            Some((t_min, t_max)) => self.accumulate(events, t_min, t_max),
            None => {
                let [c, h, w] = self.shape();
                HistogramTensor::zeros(c, h, w)
            }
        }
    }

    /// Builds the histogram over an explicit `[t_start, t_end]` window.
    ///
    /// Events outside the window are dropped. Histograms built over the same
    /// window add up to the histogram of the combined events.
    pub fn construct_window(
        &self,
        events: &EventSet,
        t_start: i64,
        t_end: i64,
    ) -> Result<HistogramTensor> {
        if t_end < t_start {
            return Err(Error::invalid_parameter(
                "window",
                format!("end {t_end} precedes start {t_start}"),
            ));
        }
        Ok(self.accumulate(events, t_start, t_end))
    }

    fn accumulate(&self, events: &EventSet, t_start: i64, t_end: i64) -> HistogramTensor {
        let [channels, height, width] = self.shape();
        let mut tensor = HistogramTensor::zeros(channels, height, width);

        let mut dropped = 0usize;

        for event in events.iter() {
            if event.t < t_start || event.t > t_end {
                dropped += 1;
                continue;
            }
            // Off-sensor coordinates and unknown polarities are noise, not errors
            let (Ok(x), Ok(y), Ok(polarity)) = (
                usize::try_from(event.x),
                usize::try_from(event.y),
                usize::try_from(event.polarity),
            ) else {
                dropped += 1;
                continue;
            };
            if x >= width || y >= height || polarity >= POLARITIES {
                dropped += 1;
                continue;
            }

            let bin = time_bin(event.t, t_start, t_end, self.bins);
            tensor.increment(polarity * self.bins + bin, y, x);
        }

        if let Some(cutoff) = self.count_cutoff {
            tensor.clamp_max(cutoff as f32);
        }

        debug!(
            events = events.len(),
            dropped,
            bins = self.bins,
            "constructed stacked histogram"
        );
        tensor
    }
}

/// Number of cells in a `[2 * bins, height, width]` histogram.
///
/// Fails with [`Error::InvalidParameter`] when the tensor cannot be indexed.
pub(crate) fn cell_count(bins: usize, height: usize, width: usize) -> Result<usize> {
    POLARITIES
        .checked_mul(bins)
        .and_then(|n| n.checked_mul(height))
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| {
            Error::invalid_parameter(
                "resolution",
                format!("{bins} bins of {height}x{width} overflow the tensor size"),
            )
        })
}

/// Returns the time bin of `t` for `bins` bins over `[t_min, t_max]`.
///
/// Bins are half-open `[lo, hi)` except the last, which also holds `t_max`.
pub fn time_bin(t: i64, t_min: i64, t_max: i64, bins: usize) -> usize {
    let span = (t_max as i128 - t_min as i128).max(1);
    let bins = bins.max(1) as i128;
    let offset = (t as i128 - t_min as i128).max(0);
    (offset * bins / span).min(bins - 1) as usize
}
