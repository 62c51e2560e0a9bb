use serde::{Deserialize, Serialize};

/// Similarity function of an index. Fixed for the lifetime of the index and
/// stored in its file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl SimilarityMetric {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Cosine => 0,
            Self::Euclidean => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Cosine),
            1 => Some(Self::Euclidean),
            _ => None,
        }
    }

    /// Similarity score, higher is closer.
    ///
    /// Cosine yields `[-1, 1]`; euclidean yields the negated distance so an
    /// exact match scores `0`. `a_norm`/`b_norm` are only read for cosine.
    #[must_use]
    pub fn score(self, a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
        let s = match self {
            Self::Cosine => {
                if a_norm == 0.0 || b_norm == 0.0 {
                    0.0
                } else {
                    dot(a, b) / (a_norm * b_norm)
                }
            }
            Self::Euclidean => -euclidean_distance_squared(a, b).sqrt(),
        };
        if s.is_nan() { f32::NEG_INFINITY } else { s }
    }
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::Euclidean => f.write_str("euclidean"),
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn magnitude(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(metric: SimilarityMetric, a: &[f32], b: &[f32]) -> f32 {
        metric.score(a, magnitude(a), b, magnitude(b))
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let a = [1.0, 2.0, 3.0];
        assert!((score(SimilarityMetric::Cosine, &a, &a) - 1.0).abs() < 1e-6);
        assert!(score(SimilarityMetric::Cosine, &[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((score(SimilarityMetric::Cosine, &[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_scale_invariant() {
        let s = score(SimilarityMetric::Cosine, &[1.0, 1.0], &[5.0, 5.0]);
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(score(SimilarityMetric::Cosine, &[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_euclidean_negated_distance() {
        assert_eq!(score(SimilarityMetric::Euclidean, &[1.0, 1.0], &[1.0, 1.0]), 0.0);
        let s = score(SimilarityMetric::Euclidean, &[0.0, 0.0], &[3.0, 4.0]);
        assert!((s + 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_tag_roundtrip() {
        for metric in [SimilarityMetric::Cosine, SimilarityMetric::Euclidean] {
            assert_eq!(SimilarityMetric::from_tag(metric.tag()), Some(metric));
        }
        assert_eq!(SimilarityMetric::from_tag(9), None);
    }
}
