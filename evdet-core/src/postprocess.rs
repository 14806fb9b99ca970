//! Detection postprocessing: confidence filtering and class-wise NMS.

use crate::error::{Error, Result};
use crate::types::{BoundingBox, ClassTable, Detection, RawDetection, RawPredictions};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Turns raw per-anchor predictions into labeled detections.
///
/// The class table is injected at construction; class ids it does not know
/// are labeled `"unknown"`.
#[derive(Debug, Clone, Default)]
pub struct Postprocessor {
    classes: ClassTable,
    class_agnostic: bool,
}

/// A candidate that passed the confidence filter.
#[derive(Debug, Clone)]
struct Candidate {
    anchor: usize,
    bbox: BoundingBox,
    objectness: f32,
    class_confidence: f32,
    class_id: usize,
    score: f32,
}

impl Postprocessor {
    /// Creates a postprocessor labeling detections from `classes`.
    pub fn new(classes: ClassTable) -> Self {
        Self {
            classes,
            class_agnostic: false,
        }
    }

    /// Runs NMS across all classes at once instead of per class.
    pub fn class_agnostic(mut self, enabled: bool) -> Self {
        self.class_agnostic = enabled;
        self
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Filters and suppresses the detections of every batch item.
    ///
    /// Returns one entry per item; `None` when nothing survives the
    /// confidence filter. All parameters and row shapes are checked before
    /// any item is processed.
    #[instrument(skip(self, raw), fields(batch = raw.len()))]
    pub fn postprocess(
        &self,
        raw: &[Vec<RawDetection>],
        num_classes: usize,
        conf_thre: f32,
        nms_thre: f32,
    ) -> Result<Vec<Option<Vec<Detection>>>> {
        check_threshold("conf_thre", conf_thre)?;
        check_threshold("nms_thre", nms_thre)?;
        if num_classes == 0 {
            return Err(Error::invalid_parameter("num_classes", "must be at least 1"));
        }
        for row in raw.iter().flatten() {
            if row.class_scores.len() != num_classes {
                return Err(Error::shape_mismatch(
                    format!("{num_classes} class scores"),
                    row.class_scores.len(),
                ));
            }
        }

        Ok(raw
            .iter()
            .enumerate()
            .map(|(item, rows)| self.postprocess_item(item, rows, conf_thre, nms_thre))
            .collect())
    }

    /// Same as [`Postprocessor::postprocess`] on a dense model output.
    pub fn postprocess_predictions(
        &self,
        predictions: &RawPredictions,
        num_classes: usize,
        conf_thre: f32,
        nms_thre: f32,
    ) -> Result<Vec<Option<Vec<Detection>>>> {
        check_threshold("conf_thre", conf_thre)?;
        check_threshold("nms_thre", nms_thre)?;
        let raw = predictions.to_detections(num_classes)?;
        self.postprocess(&raw, num_classes, conf_thre, nms_thre)
    }

    fn postprocess_item(
        &self,
        item: usize,
        rows: &[RawDetection],
        conf_thre: f32,
        nms_thre: f32,
    ) -> Option<Vec<Detection>> {
        let candidates: Vec<Candidate> = rows
            .iter()
            .enumerate()
            .filter_map(|(anchor, row)| {
                let (class_id, class_confidence) = argmax(&row.class_scores)?;
                let score = row.objectness * class_confidence;
                // NaN scores fail this comparison and are dropped
                if !(score >= conf_thre) {
                    return None;
                }
                let [cx, cy, w, h] = row.center_box;
                Some(Candidate {
                    anchor,
                    bbox: BoundingBox::from_center(cx, cy, w, h),
                    objectness: row.objectness,
                    class_confidence,
                    class_id,
                    score,
                })
            })
            .collect();

        if candidates.is_empty() {
            debug!(item, rows = rows.len(), "no candidates above confidence threshold");
            return None;
        }
        let passed = candidates.len();

        let mut groups: BTreeMap<usize, Vec<Candidate>> = BTreeMap::new();
        for candidate in candidates {
            let key = if self.class_agnostic { 0 } else { candidate.class_id };
            groups.entry(key).or_default().push(candidate);
        }

        let detections: Vec<Detection> = groups
            .into_values()
            .flat_map(|group| greedy_nms(group, nms_thre))
            .map(|c| Detection {
                bbox: c.bbox,
                score: c.score,
                objectness: c.objectness,
                class_confidence: c.class_confidence,
                class_id: c.class_id,
                class_label: self.classes.label(c.class_id).to_string(),
                anchor: c.anchor,
            })
            .collect();

        debug!(
            item,
            rows = rows.len(),
            passed,
            kept = detections.len(),
            "postprocessed batch item"
        );
        Some(detections)
    }
}

/// Greedy suppression within one group, best score first.
fn greedy_nms(mut group: Vec<Candidate>, nms_thre: f32) -> Vec<Candidate> {
    // Stable sort: equal scores keep anchor order
    group.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::with_capacity(group.len());
    for candidate in group {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) <= nms_thre)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Index and value of the first maximum, ignoring NaN scores.
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, value)) if !(score > value) => {}
            _ => best = Some((i, score)),
        }
    }
    best
}

fn check_threshold(name: &'static str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid_parameter(
            name,
            format!("{value} is outside [0, 1]"),
        ))
    }
}
