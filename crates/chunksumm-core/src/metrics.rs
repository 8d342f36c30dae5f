//! Area under the ROC curve.

use candle_core::{DType, Tensor};

use crate::error::Result;

/// Binary AUROC of `scores` against `labels` using the rank-sum statistic.
/// Tied scores share their average rank. `None` when either class is absent.
pub fn binary_auroc(scores: &[f32], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0f64;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1..=end share their mean.
        let rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| labels[i]).count();
        positive_rank_sum += rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Macro-averaged AUROC over the classes of the last dimension.
///
/// `outputs` are scores (logits or probabilities) and `labels` the expanded
/// one-hot labels, both of the same shape. Labels are cast to integers; any
/// nonzero label is positive. Classes lacking positives or negatives are
/// skipped, and `None` is returned when no class qualifies.
pub fn auroc(outputs: &Tensor, labels: &Tensor) -> Result<Option<f32>> {
    let classes = outputs.dim(candle_core::D::Minus1)?;
    let rows = outputs.elem_count() / classes.max(1);

    let scores: Vec<Vec<f32>> = outputs
        .to_dtype(DType::F32)?
        .reshape((rows, classes))?
        .to_vec2()?;
    let targets: Vec<Vec<u32>> = labels
        .to_dtype(DType::U32)?
        .reshape((rows, classes))?
        .to_vec2()?;

    let per_class: Vec<f64> = (0..classes)
        .filter_map(|c| {
            let column: Vec<f32> = scores.iter().map(|row| row[c]).collect();
            let truth: Vec<bool> = targets.iter().map(|row| row[c] != 0).collect();
            binary_auroc(&column, &truth)
        })
        .collect();

    if per_class.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        (per_class.iter().sum::<f64>() / per_class.len() as f64) as f32,
    ))
}
