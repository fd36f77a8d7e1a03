use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::errors::{HarnessError, HarnessResult};
use crate::labels::LabelTable;

/// Descending score order, NaN last, ties resolved by the lower index.
fn rank(scores: &[f32], a: usize, b: usize) -> Ordering {
    let key = |i: usize| if scores[i].is_nan() { f32::NEG_INFINITY } else { scores[i] };
    key(b).total_cmp(&key(a)).then(a.cmp(&b))
}

/// Indices of the `k` highest scores, best first.
pub fn top_k(scores: &[f32], k: usize) -> HarnessResult<Vec<usize>> {
    if k > scores.len() {
        return Err(HarnessError::InvalidArgument(format!(
            "cannot take the top {k} of {} scores",
            scores.len()
        )));
    }
    if k == 0 {
        return Ok(vec![]);
    }
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| rank(scores, a, b));
        indices.truncate(k);
    }
    indices.sort_by(|&a, &b| rank(scores, a, b));
    Ok(indices)
}

/// One ranked class.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub index: usize,
    pub score: f32,
    pub label: String,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} - \"{}\"", self.score, self.label)
    }
}

/// Ranks `scores` and names the `k` best classes.
pub fn classify(scores: &[f32], labels: &LabelTable, k: usize) -> HarnessResult<Vec<Prediction>> {
    top_k(scores, k)?
        .into_iter()
        .map(|index| {
            Ok(Prediction { index, score: scores[index], label: labels.get(index)?.to_string() })
        })
        .collect()
}
