use tracing::debug;

use crate::config::SuppressionConfig;
use crate::decode::Candidate;

/// Greedy non-maximum suppression.
///
/// Candidates are ranked by confidence (stable, so equal scores keep their
/// decode order). Each surviving candidate suppresses every lower-ranked one
/// whose IoU with it is strictly above the threshold. Emission stops at
/// `max_detections`. Zero or one candidate is returned as-is.
#[must_use]
pub fn suppress(mut candidates: Vec<Candidate>, config: &SuppressionConfig) -> Vec<Candidate> {
    if candidates.len() <= 1 {
        return candidates;
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let n = candidates.len();
    let mut suppressed = vec![false; n];
    let mut keep = Vec::with_capacity(config.max_detections.min(n));

    for i in 0..n {
        if suppressed[i] {
            continue;
        }

        keep.push(i);
        if keep.len() >= config.max_detections {
            break;
        }

        let box_a = candidates[i].bbox;
        for j in (i + 1)..n {
            if suppressed[j] {
                continue;
            }
            let iou = box_a.iou(&candidates[j].bbox);
            if iou > config.iou_threshold {
                suppressed[j] = true;
                debug!(iou, kept = i, dropped = j, "suppressed overlapping candidate");
            }
        }
    }

    // `keep` is ascending, so rank order is preserved.
    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let kept: Vec<Candidate> = keep.into_iter().filter_map(|i| slots[i].take()).collect();

    debug!(before = n, after = kept.len(), "non-max suppression done");
    kept
}
