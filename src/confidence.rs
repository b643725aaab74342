//! Retrieval-distance based confidence.
//!
//! `confidence = clamp(1 - mean(distance), 0, 1)`. The mapping assumes distances where 0 means
//! identical and 1 or more means unrelated, which holds for cosine distance and for `1 - dot` on
//! unit vectors. Other metrics (L2) need their own calibration; [`score_for_metric`] logs a
//! warning when asked to score one.

use tracing::warn;

use crate::error::{RagError, Result};
use crate::records::RetrievedContext;
use crate::vector_store::DistanceMetric;

/// Scores a non-empty retrieved set.
pub fn score(chunks: &[RetrievedContext]) -> Result<f64> {
    if chunks.is_empty() {
        return Err(RagError::InvalidArgument(
            "confidence requires at least one retrieved chunk".to_string(),
        ));
    }
    let mean = chunks.iter().map(|chunk| chunk.distance).sum::<f64>() / chunks.len() as f64;
    Ok((1.0 - mean).clamp(0.0, 1.0))
}

/// Scores a retrieved set and flags metrics the formula is not calibrated for.
pub fn score_for_metric(chunks: &[RetrievedContext], metric: DistanceMetric) -> Result<f64> {
    if !metric.is_normalized() {
        warn!(%metric, "confidence mapping assumes normalized distances");
    }
    score(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(distances: &[f64]) -> Vec<RetrievedContext> {
        distances
            .iter()
            .enumerate()
            .map(|(i, &distance)| RetrievedContext {
                text: String::new(),
                file_path: "docs/a.md".to_string(),
                filename: "a.md".to_string(),
                chunk_index: i.to_string(),
                id: format!("docs/a.md:{i}"),
                distance,
            })
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn boundary_values() {
        assert_eq!(score(&at(&[0.0, 0.0, 0.0])).expect("score"), 1.0);
        assert_eq!(score(&at(&[1.0, 1.0, 1.0])).expect("score"), 0.0);
        assert_eq!(score(&at(&[2.0])).expect("score"), 0.0);
    }

    #[test]
    fn mean_of_two_distances() {
        assert!(approx(score(&at(&[0.2, 0.4])).expect("score"), 0.7));
    }

    #[test]
    fn non_increasing_in_mean_distance() {
        let scores: Vec<f64> = [0.0, 0.1, 0.5, 0.9, 1.0, 1.5]
            .iter()
            .map(|&d| score(&at(&[d, d])).expect("score"))
            .collect();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(score(&[]), Err(RagError::InvalidArgument(_))));
        assert!(matches!(
            score_for_metric(&[], DistanceMetric::L2),
            Err(RagError::InvalidArgument(_))
        ));
    }
}
