//! Similarity functions for memory search
//!
//! All scores follow "higher = more similar". Vectors are used as given,
//! never normalized implicitly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Similarity metric, fixed per store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "inner_product",
        }
    }

    /// Score `a` against `b`. Both slices must have the same length.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "Dimension mismatch in similarity");
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::InnerProduct => dot_product(a, b),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "inner_product" | "dot" => Ok(Metric::InnerProduct),
            other => Err(format!("unknown metric: {}", other)),
        }
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity in [-1, 1]; 0.0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_opposite() {
        let a = [1.0, 2.0, 3.0];
        let b = [-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_inner_product_is_scale_sensitive() {
        let q = [1.0, 0.0];
        assert!(Metric::InnerProduct.score(&q, &[2.0, 0.0]) > Metric::InnerProduct.score(&q, &[1.0, 0.0]));
        assert_eq!(
            Metric::Cosine.score(&q, &[2.0, 0.0]),
            Metric::Cosine.score(&q, &[1.0, 0.0])
        );
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("inner_product".parse::<Metric>().unwrap(), Metric::InnerProduct);
        assert!("euclid".parse::<Metric>().is_err());
    }
}
