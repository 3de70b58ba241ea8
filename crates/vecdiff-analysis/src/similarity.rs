use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("embedding is empty")]
    EmptyVector,
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("embedding has zero magnitude")]
    DegenerateVector,
    #[error("embedding contains non-finite components")]
    NonFinite,
}

/// Cosine of the angle between two embeddings, accumulated in `f64` and
/// clamped to `[-1, 1]`.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Result<f64, SimilarityError> {
    if left.is_empty() || right.is_empty() {
        return Err(SimilarityError::EmptyVector);
    }
    if left.len() != right.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: left.len(),
            right: right.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;
    for (a, b) in left.iter().zip(right) {
        if !a.is_finite() || !b.is_finite() {
            return Err(SimilarityError::NonFinite);
        }
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return Err(SimilarityError::DegenerateVector);
    }

    let score = dot / (left_norm.sqrt() * right_norm.sqrt());
    if !score.is_finite() {
        return Err(SimilarityError::NonFinite);
    }
    Ok(score.clamp(-1.0, 1.0))
}

/// `0.98766` renders as `98.77%`.
pub fn similarity_percent(score: f64) -> String {
    format!("{:.2}%", score * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let vector = [0.3f32, -1.2, 4.5, 0.0, 2.25];
        let score = cosine_similarity(&vector, &vector).expect("score");
        assert!((score - 1.0).abs() < 1e-9, "score was {score}");
        assert_eq!(similarity_percent(score), "100.00%");
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let left = [1.0f32, 2.0, 3.0];
        let right = [-3.0f32, 0.5, 2.0];
        let forward = cosine_similarity(&left, &right).expect("forward");
        let backward = cosine_similarity(&right, &left).expect("backward");
        assert_eq!(forward, backward);
        assert!((-1.0..=1.0).contains(&forward));

        let opposite = cosine_similarity(&left, &[-1.0, -2.0, -3.0]).expect("opposite");
        assert!((opposite + 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Ok(0.0));
    }

    #[test]
    fn invalid_inputs_are_explicit_errors() {
        assert_eq!(
            cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]),
            Err(SimilarityError::DimensionMismatch { left: 2, right: 3 })
        );
        assert_eq!(
            cosine_similarity(&[], &[]),
            Err(SimilarityError::EmptyVector)
        );
        assert_eq!(
            cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]),
            Err(SimilarityError::DegenerateVector)
        );
        assert_eq!(
            cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]),
            Err(SimilarityError::NonFinite)
        );
        assert_eq!(
            cosine_similarity(&[1.0, f32::INFINITY], &[1.0, 1.0]),
            Err(SimilarityError::NonFinite)
        );
    }

    #[test]
    fn percent_rounds_to_two_decimals() {
        assert_eq!(similarity_percent(0.987_66), "98.77%");
        assert_eq!(similarity_percent(0.0), "0.00%");
    }
}
