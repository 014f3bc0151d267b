use crate::decode::Detection;

/// Greedy, class-agnostic non-maximum suppression.
///
/// Candidates are visited in descending score order; a candidate survives when
/// its IoU with every already kept box is at most `iou_threshold`. At most
/// `max_output` detections are returned, ordered by descending score.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    max_output: usize,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::with_capacity(max_output.min(detections.len()));
    for candidate in detections {
        if kept.len() >= max_output {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn det(label: &str, score: f32, cx: f32, cy: f32, size: f32) -> Detection {
        Detection {
            class_id: 0,
            label: label.into(),
            score,
            bbox: BoundingBox::from_center(cx, cy, size, size),
        }
    }

    fn scattered() -> Vec<Detection> {
        vec![
            det("A", 0.70, 100.0, 100.0, 60.0),
            det("A", 0.90, 105.0, 98.0, 60.0),
            det("B", 0.80, 110.0, 104.0, 58.0),
            det("C", 0.60, 400.0, 400.0, 40.0),
            det("D", 0.55, 408.0, 404.0, 40.0),
            det("E", 0.51, 600.0, 80.0, 30.0),
        ]
    }

    #[test]
    fn keeps_highest_of_each_cluster() {
        let kept = non_max_suppression(scattered(), 0.45, 10);
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.90, 0.60, 0.51]);
    }

    #[test]
    fn respects_max_output() {
        let kept = non_max_suppression(scattered(), 0.45, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.90);
    }

    #[test]
    fn suppression_is_idempotent() {
        for threshold in [0.1, 0.3, 0.45, 0.7, 0.95] {
            let once = non_max_suppression(scattered(), threshold, 4);
            let twice = non_max_suppression(once.clone(), threshold, 4);
            assert_eq!(once, twice, "threshold {threshold}");
        }
    }

    #[test]
    fn empty_input() {
        assert!(non_max_suppression(Vec::new(), 0.5, 5).is_empty());
    }
}
