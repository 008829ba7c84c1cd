//! Weighted term-vector similarity between puzzles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Relative weight of each puzzle field in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub description: f64,
    pub problem_statement: f64,
    pub concepts: f64,
    pub keywords: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            description: 0.1,
            problem_statement: 0.3,
            concepts: 0.4,
            keywords: 0.2,
        }
    }
}

impl FieldWeights {
    fn total(&self) -> f64 {
        self.description + self.problem_statement + self.concepts + self.keywords
    }
}

/// Borrowed view of the fields that take part in similarity.
#[derive(Debug, Clone, Copy)]
pub struct PuzzleText<'a> {
    pub description: &'a str,
    pub problem_statement: &'a str,
    pub keywords: &'a [String],
    pub concepts: &'a [String],
}

pub type TermVector = BTreeMap<String, f64>;

/// Lowercased alphanumeric term frequencies.
pub fn term_vector(text: &str) -> TermVector {
    let mut terms = TermVector::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *terms.entry(token.to_lowercase()).or_insert(0.0) += 1.0;
    }
    terms
}

pub fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm = |v: &TermVector| v.values().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Composite similarity in `[0, 1]`, normalised by the total weight.
pub fn weighted_similarity(
    query: &PuzzleText<'_>,
    candidate: &PuzzleText<'_>,
    weights: &FieldWeights,
) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let field = |a: &str, b: &str| cosine(&term_vector(a), &term_vector(b));
    let score = weights.description * field(query.description, candidate.description)
        + weights.problem_statement * field(query.problem_statement, candidate.problem_statement)
        + weights.concepts * field(&query.concepts.join(" "), &candidate.concepts.join(" "))
        + weights.keywords * field(&query.keywords.join(" "), &candidate.keywords.join(" "));
    score / total
}
