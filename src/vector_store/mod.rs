//! Vector store contract plus the local and pgvector backends.

pub mod local;
pub mod pgvector;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use local::{LocalVectorStore, StoredVector};
pub use pgvector::{PgVectorStore, TableName};

/// One nearest-neighbor hit as reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Record key, canonically `"<file_path>:<chunk_index>"`.
    pub id: String,
    /// Document text when the backend stores it.
    pub text: Option<String>,
    /// String-valued metadata (`file_path`, `filename`, `chunk_index`, ...).
    pub metadata: BTreeMap<String, String>,
    /// Distance to the query embedding, smaller is closer.
    pub distance: f64,
}

/// Nearest-neighbor index over chunk embeddings.
pub trait VectorStore: Send + Sync {
    /// Returns at most `k` hits ordered by ascending distance.
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    /// Number of indexed records.
    fn count(&self) -> Result<usize>;

    /// Backend label shown by health checks.
    fn describe(&self) -> String;

    /// Metric the reported distances are measured in.
    fn metric(&self) -> DistanceMetric;

    /// Up to `limit` stored records, embeddings included, in a stable backend order.
    fn sample(&self, limit: usize) -> Result<Vec<StoredVector>> {
        let _ = limit;
        anyhow::bail!("{} cannot list stored records", self.describe())
    }
}

impl<T: VectorStore + ?Sized> VectorStore for Arc<T> {
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        (**self).query(embedding, k)
    }

    fn count(&self) -> Result<usize> {
        (**self).count()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn metric(&self) -> DistanceMetric {
        (**self).metric()
    }

    fn sample(&self, limit: usize) -> Result<Vec<StoredVector>> {
        (**self).sample(limit)
    }
}

/// Distance function used to rank hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance, unbounded.
    L2,
    /// `1 - dot(a, b)`; equals cosine distance on unit vectors.
    InnerProduct,
}

impl DistanceMetric {
    /// Whether `1 - mean(distance)` is a meaningful confidence under this metric.
    ///
    /// Inner product only qualifies when embeddings are unit length, which holds for the
    /// OpenAI embedding models.
    pub fn is_normalized(self) -> bool {
        matches!(self, Self::Cosine | Self::InnerProduct)
    }

    /// Distance between two equal-length vectors.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::Cosine => {
                let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
                    (0.0f64, 0.0f64, 0.0f64),
                    |(dot, na, nb), (&x, &y)| {
                        let (x, y) = (f64::from(x), f64::from(y));
                        (dot + x * y, na + x * x, nb + y * y)
                    },
                );
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
            }
            Self::L2 => a
                .iter()
                .zip(b)
                .map(|(&x, &y)| {
                    let d = f64::from(x) - f64::from(y);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
            Self::InnerProduct => {
                1.0 - a
                    .iter()
                    .zip(b)
                    .map(|(&x, &y)| f64::from(x) * f64::from(y))
                    .sum::<f64>()
            }
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
            Self::InnerProduct => "inner-product",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Inputs are f32, so widened products carry ~1e-8 rounding.
    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn cosine_distance_bounds() {
        let m = DistanceMetric::Cosine;
        assert!(close(m.distance(&[1.0, 0.0], &[2.0, 0.0]), 0.0));
        assert!(close(m.distance(&[1.0, 0.0], &[0.0, 3.0]), 1.0));
        assert!(close(m.distance(&[1.0, 0.0], &[-1.0, 0.0]), 2.0));
        assert!(close(m.distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0));
    }

    #[test]
    fn l2_and_inner_product() {
        assert!(close(DistanceMetric::L2.distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0));
        assert!(close(
            DistanceMetric::InnerProduct.distance(&[0.6, 0.8], &[0.6, 0.8]),
            0.0
        ));
        assert_eq!(
            DistanceMetric::InnerProduct.distance(&[1.0, 0.0], &[0.5, 0.0]),
            0.5
        );
    }

    #[test]
    fn only_l2_is_uncalibrated() {
        assert!(DistanceMetric::Cosine.is_normalized());
        assert!(DistanceMetric::InnerProduct.is_normalized());
        assert!(!DistanceMetric::L2.is_normalized());
    }

    #[test]
    fn metric_names_match_serde() {
        let json = serde_json::to_string(&DistanceMetric::InnerProduct).expect("serialize");
        assert_eq!(json, "\"inner-product\"");
        assert_eq!(DistanceMetric::InnerProduct.to_string(), "inner-product");
    }
}
