//! Path-set similarity measures used to score groupings

use crate::discover::paths::PathSet;
use std::fmt;

/// Similarity of two documents' leaf-path sets, in `[0, 1]`
pub trait SimilarityStrategy: fmt::Debug + Send + Sync {
    fn similarity(&self, a: &PathSet, b: &PathSet) -> f64;

    fn name(&self) -> &'static str;
}

/// |A ∩ B| / |A ∪ B|; two empty sets are identical
#[derive(Debug, Clone, Copy, Default)]
pub struct JaccardPathSimilarity;

impl SimilarityStrategy for JaccardPathSimilarity {
    fn similarity(&self, a: &PathSet, b: &PathSet) -> f64 {
        let intersection = a.intersection(b).count();
        let union = a.len() + b.len() - intersection;
        if union == 0 {
            return 1.0;
        }
        intersection as f64 / union as f64
    }

    fn name(&self) -> &'static str {
        "jaccard"
    }
}

/// Jaccard where each path weighs `depth_decay ^ depth`, so structure near
/// the root counts more than deep detail
#[derive(Debug, Clone, Copy)]
pub struct WeightedJaccardSimilarity {
    pub depth_decay: f64,
}

impl Default for WeightedJaccardSimilarity {
    fn default() -> Self {
        WeightedJaccardSimilarity { depth_decay: 0.8 }
    }
}

impl WeightedJaccardSimilarity {
    pub fn new(depth_decay: f64) -> Self {
        WeightedJaccardSimilarity { depth_decay }
    }

    fn weight(&self, path: &str) -> f64 {
        let depth = path.matches('.').count() + path.matches("[]").count();
        self.depth_decay.powi(depth as i32)
    }
}

impl SimilarityStrategy for WeightedJaccardSimilarity {
    fn similarity(&self, a: &PathSet, b: &PathSet) -> f64 {
        let intersection: f64 = a.intersection(b).map(|p| self.weight(p)).sum();
        let union: f64 = a.union(b).map(|p| self.weight(p)).sum();
        if union == 0.0 {
            return 1.0;
        }
        intersection / union
    }

    fn name(&self) -> &'static str {
        "weighted_jaccard"
    }
}

/// 1 for identical path sets, 0 otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatchSimilarity;

impl SimilarityStrategy for ExactMatchSimilarity {
    fn similarity(&self, a: &PathSet, b: &PathSet) -> f64 {
        if a == b {
            1.0
        } else {
            0.0
        }
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}
