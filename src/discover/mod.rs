//! Structure discovery over a document corpus
//!
//! Finds the field that best separates documents into structural shapes,
//! summarizes the shapes, and drafts a table configuration for each.

pub mod paths;
pub mod similarity;
pub mod analyzer;
pub mod hints;

pub use paths::{PathExtractor, PathSet, PathSummary};
pub use similarity::{ExactMatchSimilarity, JaccardPathSimilarity, SimilarityStrategy, WeightedJaccardSimilarity};
pub use analyzer::{
    GroupBreakdown, GroupingScore, SplitterCandidate, SplitterOptions, StructureAnalyzer, StructureReport,
    StructureSummary,
};
pub use hints::{draft_table_configs, TypeHintBuilder};
