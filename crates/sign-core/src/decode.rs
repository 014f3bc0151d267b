//! Decoding of raw detector output into labelled boxes.
//!
//! The network emits one tensor of shape `[1, 4 + C, N]`: for each of the `N`
//! candidate anchors, four centre-form box parameters followed by `C` class
//! scores. Decoding transposes that to one row per candidate, picks the single
//! best class for each row, drops low-confidence rows and finally runs
//! non-maximum suppression.

use serde::Serialize;
use thiserror::Error;

use crate::{
    geometry::BoundingBox,
    labels::LabelVocabulary,
    nms::non_max_suppression,
    tensor::{HostTensor, TensorError},
};

/// Number of box regression channels preceding the class scores.
pub const BOX_CHANNELS: usize = 4;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected detector output shape {0:?}, expected [1, 4 + C, N]")]
    Shape(Vec<usize>),
    #[error("detector emits {classes} class scores but vocabulary {vocabulary:?} has {labels} labels")]
    VocabularyMismatch {
        classes: usize,
        labels: usize,
        vocabulary: String,
    },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Single labelled detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_candidates: usize,
}

impl DecodeParams {
    /// Single target practice only ever needs a handful of survivors.
    pub fn practice() -> Self {
        Self {
            max_candidates: 5,
            ..Self::default()
        }
    }
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_candidates: 20,
        }
    }
}

/// Decode `raw` into detections ordered by descending score.
pub fn decode(
    raw: &HostTensor,
    vocabulary: &LabelVocabulary,
    params: &DecodeParams,
) -> Result<Vec<Detection>, DecodeError> {
    let shape = raw.shape();
    let &[batch, channels, _candidates] = shape else {
        return Err(DecodeError::Shape(shape.to_vec()));
    };
    if batch != 1 || channels <= BOX_CHANNELS {
        return Err(DecodeError::Shape(shape.to_vec()));
    }
    let classes = channels - BOX_CHANNELS;
    if classes != vocabulary.len() {
        return Err(DecodeError::VocabularyMismatch {
            classes,
            labels: vocabulary.len(),
            vocabulary: vocabulary.name().to_string(),
        });
    }

    // [1, 4 + C, N] -> [1, N, 4 + C]
    let rows = raw.transpose_last_two()?;

    let mut candidates = Vec::new();
    for row in rows.data().chunks_exact(channels) {
        let Some((class_id, score)) = arg_max(&row[BOX_CHANNELS..]) else {
            continue;
        };
        if score.is_nan() || score < params.confidence_threshold {
            continue;
        }
        let Some(label) = vocabulary.get(class_id) else {
            continue;
        };
        candidates.push(Detection {
            class_id,
            label: label.to_string(),
            score,
            bbox: BoundingBox::from_center(row[0], row[1], row[2], row[3]),
        });
    }
    drop(rows);

    Ok(non_max_suppression(
        candidates,
        params.iou_threshold,
        params.max_candidates,
    ))
}

/// Index and value of the largest score; the first maximum wins ties.
fn arg_max(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        match best {
            Some((_, current)) if score <= current => {}
            _ if score.is_nan() => {}
            _ => best = Some((idx, score)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorLedger;

    fn vocab3() -> LabelVocabulary {
        LabelVocabulary::new("abc", ["A", "B", "C"]).unwrap()
    }

    /// Build a `[1, 4 + C, N]` tensor from per-candidate rows.
    fn raw_from_rows(
        ledger: &std::sync::Arc<TensorLedger>,
        rows: &[Vec<f32>],
    ) -> HostTensor {
        let channels = rows[0].len();
        let n = rows.len();
        let mut data = vec![0.0; channels * n];
        for (i, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                data[c * n + i] = *v;
            }
        }
        ledger.allocate(vec![1, channels, n], data).unwrap()
    }

    #[test]
    fn arg_max_prefers_first_of_equal_scores() {
        assert_eq!(arg_max(&[0.2, 0.7, 0.7]), Some((1, 0.7)));
        assert_eq!(arg_max(&[]), None);
    }

    #[test]
    fn low_confidence_rows_are_dropped() {
        let ledger = TensorLedger::new();
        let raw = raw_from_rows(
            &ledger,
            &[
                vec![100.0, 100.0, 20.0, 20.0, 0.1, 0.2, 0.3],
                vec![300.0, 300.0, 20.0, 20.0, 0.9, 0.0, 0.0],
            ],
        );
        let dets = decode(&raw, &vocab3(), &DecodeParams::default()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "A");
        assert_eq!(dets[0].class_id, 0);
    }

    #[test]
    fn vocabulary_size_must_match_channels() {
        let ledger = TensorLedger::new();
        let raw = raw_from_rows(&ledger, &[vec![1.0, 1.0, 1.0, 1.0, 0.9, 0.1]]);
        let err = decode(&raw, &vocab3(), &DecodeParams::default()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::VocabularyMismatch {
                classes: 2,
                labels: 3,
                ..
            }
        ));
    }

    #[test]
    fn wrong_rank_is_a_shape_error() {
        let ledger = TensorLedger::new();
        let raw = ledger.zeros(vec![7, 3]);
        assert!(matches!(
            decode(&raw, &vocab3(), &DecodeParams::default()),
            Err(DecodeError::Shape(_))
        ));
    }

    #[test]
    fn decode_releases_its_transpose() {
        let ledger = TensorLedger::new();
        let raw = raw_from_rows(&ledger, &[vec![10.0, 10.0, 4.0, 4.0, 0.0, 0.8, 0.1]]);
        let before = ledger.snapshot();
        let dets = decode(&raw, &vocab3(), &DecodeParams::default()).unwrap();
        assert_eq!(dets[0].label, "B");
        let delta = ledger.snapshot().since(before);
        assert_eq!(delta.allocated, delta.released);
    }

    #[test]
    fn overlapping_candidates_collapse_to_best() {
        let ledger = TensorLedger::new();
        let raw = raw_from_rows(
            &ledger,
            &[
                vec![100.0, 100.0, 50.0, 50.0, 0.6, 0.0, 0.0],
                vec![102.0, 101.0, 50.0, 50.0, 0.0, 0.95, 0.0],
                vec![400.0, 400.0, 50.0, 50.0, 0.0, 0.0, 0.7],
            ],
        );
        let dets = decode(&raw, &vocab3(), &DecodeParams::default()).unwrap();
        let labels: Vec<_> = dets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, ["B", "C"]);
    }
}
