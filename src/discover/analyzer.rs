//! Splitter discovery
//!
//! A splitter is a field whose value predicts the rest of a document's
//! structure. Documents are grouped by a candidate's value and the grouping
//! is scored by how alike documents are inside a group compared to
//! documents from different groups:
//!
//! ```text
//! score = within / max(between, 0.01)
//! ```
//!
//! Candidates are shallow, key-only paths that are present in most
//! documents and take a small number of distinct values.

use crate::discover::paths::{PathExtractor, PathSet, PathSummary};
use crate::discover::similarity::{JaccardPathSimilarity, SimilarityStrategy};
use crate::unfurl::path::{follow_keys, PathExpression};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

/// Floor for the between-group similarity
const MIN_BETWEEN: f64 = 0.01;

/// Paths listed per group in a report
const REPORT_PATHS: usize = 3;

static NULL: Value = Value::Null;

/// Limits applied when searching for candidate splitters
#[derive(Debug, Clone, PartialEq)]
pub struct SplitterOptions {
    /// Absolute cap on distinct values
    pub max_cardinality: usize,
    /// Cap on distinct values relative to the corpus size
    pub max_cardinality_ratio: f64,
    /// Minimum fraction of documents where the field is present and non-null
    pub min_coverage: f64,
    /// Maximum number of keys in a candidate path
    pub max_depth: usize,
    /// Documents per group used when comparing pairs
    pub pair_sample: usize,
}

impl Default for SplitterOptions {
    fn default() -> Self {
        SplitterOptions {
            max_cardinality: 50,
            max_cardinality_ratio: 0.5,
            min_coverage: 0.5,
            max_depth: 3,
            pair_sample: 20,
        }
    }
}

impl SplitterOptions {
    /// Largest distinct-value count a candidate may have for `documents` inputs
    pub fn cardinality_ceiling(&self, documents: usize) -> usize {
        let relative = (documents as f64 * self.max_cardinality_ratio).floor() as usize;
        self.max_cardinality.min(relative.max(2))
    }
}

/// Score of an arbitrary grouping of the corpus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingScore {
    pub label: String,
    pub score: f64,
    pub distinct_values: usize,
    pub coverage: f64,
    pub value_counts: BTreeMap<String, usize>,
    pub within_similarity: f64,
    pub between_similarity: f64,
}

/// A field path proposed as a discriminator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitterCandidate {
    pub field: PathExpression,
    pub score: f64,
    pub distinct_values: usize,
    pub coverage: f64,
    pub value_counts: BTreeMap<String, usize>,
    pub within_similarity: f64,
    pub between_similarity: f64,
}

impl SplitterCandidate {
    fn from_score(field: PathExpression, score: GroupingScore) -> Self {
        SplitterCandidate {
            field,
            score: score.score,
            distinct_values: score.distinct_values,
            coverage: score.coverage,
            value_counts: score.value_counts,
            within_similarity: score.within_similarity,
            between_similarity: score.between_similarity,
        }
    }
}

impl fmt::Display for SplitterCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} values, score: {:.2}, coverage: {:.1}%)",
            self.field,
            self.distinct_values,
            self.score,
            self.coverage * 100.0
        )
    }
}

/// Structure of the documents sharing one splitter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureSummary {
    pub value: String,
    pub count: usize,
    /// Every path seen in the group
    pub unique_paths: BTreeSet<String>,
    /// Paths present in every document of the group
    pub common_paths: BTreeSet<String>,
    pub sample_paths: Vec<String>,
}

/// One line of the per-value breakdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBreakdown {
    pub value: String,
    pub documents: usize,
    /// Paths that only this group has, sorted
    pub distinctive_paths: Vec<String>,
}

/// Human-readable discovery summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureReport {
    pub documents: usize,
    pub unique_paths: usize,
    pub candidates: Vec<SplitterCandidate>,
    pub splitter: Option<PathExpression>,
    pub groups: Vec<GroupBreakdown>,
}

impl fmt::Display for StructureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.documents == 0 {
            return write!(f, "No documents to analyze.");
        }

        writeln!(f, "Documents analyzed: {}", group_thousands(self.documents))?;
        writeln!(f, "Unique paths: {}", self.unique_paths)?;
        writeln!(f)?;

        if self.candidates.is_empty() && self.groups.is_empty() {
            return write!(f, "No candidate splitters found.");
        }

        if !self.candidates.is_empty() {
            writeln!(f, "Candidate splitters:")?;
            for (i, c) in self.candidates.iter().enumerate() {
                let marker = if i == 0 { " <- recommended" } else { "" };
                writeln!(
                    f,
                    "  {} ({} values, score: {:.2}){}",
                    c.field, c.distinct_values, c.score, marker
                )?;
            }
            writeln!(f)?;
        }

        if let Some(splitter) = &self.splitter {
            write!(f, "Structure by {}:", splitter)?;
            for group in &self.groups {
                let shown = &group.distinctive_paths[..group.distinctive_paths.len().min(REPORT_PATHS)];
                let mut paths = shown.join(", ");
                if group.distinctive_paths.len() > REPORT_PATHS {
                    paths.push_str(&format!(" (+{} more)", group.distinctive_paths.len() - REPORT_PATHS));
                }
                if paths.is_empty() {
                    paths.push_str("(same as others)");
                }
                write!(f, "\n  \"{}\" ({} docs): {}", group.value, group.documents, paths)?;
            }
        }
        Ok(())
    }
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Grouping key of a discriminator value; `None` for null
pub fn group_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

/// Finds and scores splitter fields over a corpus
#[derive(Debug)]
pub struct StructureAnalyzer {
    similarity: Box<dyn SimilarityStrategy>,
    extractor: PathExtractor,
    options: SplitterOptions,
}

impl Default for StructureAnalyzer {
    fn default() -> Self {
        StructureAnalyzer {
            similarity: Box::new(JaccardPathSimilarity),
            extractor: PathExtractor::default(),
            options: SplitterOptions::default(),
        }
    }
}

impl StructureAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_similarity(mut self, similarity: impl SimilarityStrategy + 'static) -> Self {
        self.similarity = Box::new(similarity);
        self
    }

    pub fn with_extractor(mut self, extractor: PathExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_options(mut self, options: SplitterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SplitterOptions {
        &self.options
    }

    pub fn path_sets(&self, docs: &[Value]) -> Vec<PathSet> {
        docs.par_iter().map(|doc| self.extractor.extract(doc)).collect()
    }

    /// Rank every eligible field, best first
    pub fn find_splitters(&self, docs: &[Value]) -> Vec<SplitterCandidate> {
        if docs.is_empty() {
            return Vec::new();
        }

        let doc_paths = self.path_sets(docs);
        let fields = self.candidate_fields(docs, &doc_paths);
        debug!(documents = docs.len(), candidates = fields.len(), "Scoring splitter candidates");

        let mut candidates: Vec<SplitterCandidate> = fields
            .into_par_iter()
            .map(|field| {
                let keys = field_keys(docs, &field);
                let score = self.score_keys(&field.to_string(), &doc_paths, &keys);
                SplitterCandidate::from_score(field, score)
            })
            .filter(|c| c.score > 0.0)
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.coverage.total_cmp(&a.coverage))
                .then_with(|| a.field.len().cmp(&b.field.len()))
                .then_with(|| a.field.to_string().cmp(&b.field.to_string()))
        });
        candidates
    }

    /// Score one field, whether or not it would pass the candidate filters
    pub fn evaluate_field(&self, docs: &[Value], field: &PathExpression) -> SplitterCandidate {
        let doc_paths = self.path_sets(docs);
        let keys = field_keys(docs, field);
        let score = self.score_keys(&field.to_string(), &doc_paths, &keys);
        SplitterCandidate::from_score(field.clone(), score)
    }

    /// Score the tuple of several fields as one key
    pub fn evaluate_composite(&self, docs: &[Value], fields: &[PathExpression]) -> GroupingScore {
        let label = fields.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("+");
        self.evaluate_grouping(docs, &label, |doc| {
            let parts: Vec<&Value> = fields
                .iter()
                .map(|f| follow_keys(doc, f.steps()).unwrap_or(&NULL))
                .collect();
            if parts.iter().all(|v| v.is_null()) {
                return None;
            }
            serde_json::to_string(&parts).ok()
        })
    }

    /// Score a grouping computed by an arbitrary function
    pub fn evaluate_grouping<F>(&self, docs: &[Value], label: &str, key_fn: F) -> GroupingScore
    where
        F: Fn(&Value) -> Option<String> + Sync,
    {
        let doc_paths = self.path_sets(docs);
        let keys: Vec<Option<String>> = docs.par_iter().map(|doc| key_fn(doc)).collect();
        self.score_keys(label, &doc_paths, &keys)
    }

    /// Path structure of each group produced by `splitter`
    pub fn structure_by_value(&self, docs: &[Value], splitter: &PathExpression) -> BTreeMap<String, StructureSummary> {
        let doc_paths = self.path_sets(docs);
        let keys = field_keys(docs, splitter);

        let mut groups: BTreeMap<String, PathSummary> = BTreeMap::new();
        for (key, paths) in keys.into_iter().zip(&doc_paths) {
            if let Some(key) = key {
                groups.entry(key).or_default().add(paths);
            }
        }

        groups
            .into_iter()
            .map(|(value, summary)| {
                let unique_paths = summary.paths();
                let sample_paths = unique_paths.iter().take(10).cloned().collect();
                let structure = StructureSummary {
                    value: value.clone(),
                    count: summary.documents(),
                    common_paths: summary.common_paths(),
                    unique_paths,
                    sample_paths,
                };
                (value, structure)
            })
            .collect()
    }

    /// Summarize the corpus; without an explicit splitter the best candidate is used
    pub fn report(&self, docs: &[Value], splitter: Option<&PathExpression>, top_n: usize) -> StructureReport {
        if docs.is_empty() {
            return StructureReport::default();
        }

        let doc_paths = self.path_sets(docs);
        let unique_paths = doc_paths.iter().flatten().collect::<HashSet<_>>().len();

        let mut candidates = self.find_splitters(docs);
        let chosen = splitter.cloned().or_else(|| candidates.first().map(|c| c.field.clone()));
        let groups = match (&chosen, candidates.is_empty()) {
            (Some(field), false) => breakdown(&doc_paths, &field_keys(docs, field)),
            _ => Vec::new(),
        };
        candidates.truncate(top_n);

        StructureReport {
            documents: docs.len(),
            unique_paths,
            candidates,
            splitter: chosen,
            groups,
        }
    }

    pub fn describe(&self, docs: &[Value], splitter: Option<&PathExpression>, top_n: usize) -> String {
        self.report(docs, splitter, top_n).to_string()
    }

    fn candidate_fields(&self, docs: &[Value], doc_paths: &[PathSet]) -> Vec<PathExpression> {
        let seen: BTreeSet<&str> = doc_paths
            .iter()
            .flatten()
            .filter(|p| !p.contains('['))
            .map(String::as_str)
            .collect();
        let ceiling = self.options.cardinality_ceiling(docs.len());

        seen.into_iter()
            .filter_map(|p| PathExpression::parse(p).ok())
            .filter(|path| path.key_depth() <= self.options.max_depth)
            .filter(|path| {
                let mut present = 0usize;
                let mut distinct = HashSet::new();
                for doc in docs {
                    if let Some(key) = follow_keys(doc, path.steps()).and_then(group_key) {
                        present += 1;
                        distinct.insert(key);
                        if distinct.len() > ceiling {
                            return false;
                        }
                    }
                }
                let coverage = present as f64 / docs.len() as f64;
                coverage >= self.options.min_coverage && distinct.len() >= 2
            })
            .collect()
    }

    fn score_keys(&self, label: &str, doc_paths: &[PathSet], keys: &[Option<String>]) -> GroupingScore {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            if let Some(key) = key {
                groups.entry(key.as_str()).or_default().push(i);
            }
        }

        let present: usize = groups.values().map(Vec::len).sum();
        let coverage = if keys.is_empty() {
            0.0
        } else {
            present as f64 / keys.len() as f64
        };
        let value_counts = groups.iter().map(|(k, v)| (k.to_string(), v.len())).collect();

        let sample = self.options.pair_sample.max(2);
        let sampled: Vec<&[usize]> = groups.values().map(|v| &v[..v.len().min(sample)]).collect();
        let sim = |i: usize, j: usize| self.similarity.similarity(&doc_paths[i], &doc_paths[j]);

        let mut within = Mean::default();
        for members in &sampled {
            for (a, &i) in members.iter().enumerate() {
                for &j in &members[a + 1..] {
                    within.push(sim(i, j));
                }
            }
        }

        let mut between = Mean::default();
        for (g, left) in sampled.iter().enumerate() {
            for right in &sampled[g + 1..] {
                for &i in left.iter() {
                    for &j in right.iter() {
                        between.push(sim(i, j));
                    }
                }
            }
        }

        let within_similarity = within.value().unwrap_or(1.0);
        let between_similarity = between.value().unwrap_or(0.0);
        let score = if sampled.len() < 2 {
            0.0
        } else {
            within_similarity / between_similarity.max(MIN_BETWEEN)
        };

        GroupingScore {
            label: label.to_string(),
            score,
            distinct_values: groups.len(),
            coverage,
            value_counts,
            within_similarity,
            between_similarity,
        }
    }
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

fn field_keys(docs: &[Value], field: &PathExpression) -> Vec<Option<String>> {
    docs.iter()
        .map(|doc| follow_keys(doc, field.steps()).and_then(group_key))
        .collect()
}

/// Groups sorted by size (largest first), then by value
fn breakdown(doc_paths: &[PathSet], keys: &[Option<String>]) -> Vec<GroupBreakdown> {
    let mut groups: BTreeMap<&str, (usize, BTreeSet<&str>)> = BTreeMap::new();
    for (key, paths) in keys.iter().zip(doc_paths) {
        if let Some(key) = key {
            let entry = groups.entry(key.as_str()).or_default();
            entry.0 += 1;
            entry.1.extend(paths.iter().map(String::as_str));
        }
    }

    let mut out: Vec<GroupBreakdown> = groups
        .iter()
        .map(|(value, (documents, paths))| {
            let distinctive_paths = paths
                .iter()
                .filter(|p| {
                    groups
                        .iter()
                        .all(|(other, (_, other_paths))| other == value || !other_paths.contains(*p))
                })
                .map(|p| p.to_string())
                .collect();
            GroupBreakdown {
                value: value.to_string(),
                documents: *documents,
                distinctive_paths,
            }
        })
        .collect();

    out.sort_by(|a, b| b.documents.cmp(&a.documents).then_with(|| a.value.cmp(&b.value)));
    out
}
