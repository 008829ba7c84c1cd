//! Reference puzzle store backing the retrieval stage.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::record::PipelineRecord;
use crate::core::similarity::{FieldWeights, PuzzleText, weighted_similarity};
use crate::io::config::write_atomic;

/// A preprocessed puzzle as stored (and as used for similarity queries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleEntry {
    pub year: u16,
    pub day: u8,
    pub full_description: String,
    #[serde(default)]
    pub problem_statement: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
}

impl PuzzleEntry {
    pub fn from_record(record: &PipelineRecord) -> Self {
        Self {
            year: record.year(),
            day: record.day(),
            full_description: record.puzzle().description.clone(),
            problem_statement: record.problem_statement.clone().unwrap_or_default(),
            keywords: record.keywords.clone(),
            concepts: record.concepts.clone(),
        }
    }

    fn text(&self) -> PuzzleText<'_> {
        PuzzleText {
            description: &self.full_description,
            problem_statement: &self.problem_statement,
            keywords: &self.keywords,
            concepts: &self.concepts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionSource {
    Github,
    Reddit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionEntry {
    pub year: u16,
    pub day: u8,
    pub code: String,
    pub author: String,
    pub source: SolutionSource,
}

/// Whether an insert created a new entry or matched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Added,
    Existing,
}

/// Read access used by the retrieval stage.
pub trait PuzzleStore {
    /// Up to `limit` stored puzzles, most similar first.
    fn find_similar(&self, query: &PuzzleEntry, limit: usize) -> Result<Vec<PuzzleEntry>>;

    /// Up to `limit` solutions for the puzzle at (`year`, `day`), in insertion order.
    fn fetch_solutions(&self, year: u16, day: u8, limit: usize) -> Result<Vec<SolutionEntry>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    puzzles: Vec<PuzzleEntry>,
    #[serde(default)]
    solutions: Vec<SolutionEntry>,
}

/// Store persisted as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonPuzzleStore {
    path: PathBuf,
    data: StoreFile,
    weights: FieldWeights,
}

impl JsonPuzzleStore {
    /// Open the store at `path`; a missing file yields an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(anyhow!("puzzle store path must not be empty"));
        }
        let data = if path.exists() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        } else {
            debug!(path = %path.display(), "puzzle store missing, starting empty");
            StoreFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            data,
            weights: FieldWeights::default(),
        })
    }

    pub fn with_weights(mut self, weights: FieldWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn puzzles(&self) -> &[PuzzleEntry] {
        &self.data.puzzles
    }

    pub fn contains_puzzle(&self, year: u16, day: u8) -> bool {
        self.data
            .puzzles
            .iter()
            .any(|p| p.year == year && p.day == day)
    }

    /// Insert a puzzle unless one already exists for its (year, day).
    pub fn add_puzzle(&mut self, puzzle: PuzzleEntry) -> Insert {
        if self.contains_puzzle(puzzle.year, puzzle.day) {
            info!(year = puzzle.year, day = puzzle.day, "puzzle already stored");
            return Insert::Existing;
        }
        info!(year = puzzle.year, day = puzzle.day, "puzzle added");
        self.data.puzzles.push(puzzle);
        Insert::Added
    }

    /// Insert a solution for a stored puzzle, once per author.
    pub fn add_solution(&mut self, solution: SolutionEntry) -> Result<Insert> {
        if !self.contains_puzzle(solution.year, solution.day) {
            return Err(anyhow!(
                "puzzle {}-{} does not exist in the store",
                solution.year,
                solution.day
            ));
        }
        let exists = self.data.solutions.iter().any(|s| {
            s.year == solution.year && s.day == solution.day && s.author == solution.author
        });
        if exists {
            info!(author = %solution.author, "solution already stored");
            return Ok(Insert::Existing);
        }
        info!(
            year = solution.year,
            day = solution.day,
            author = %solution.author,
            "solution added"
        );
        self.data.solutions.push(solution);
        Ok(Insert::Added)
    }

    /// Atomically write the store back to its path.
    pub fn save(&self) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(&self.data).context("serialize puzzle store")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

impl PuzzleStore for JsonPuzzleStore {
    fn find_similar(&self, query: &PuzzleEntry, limit: usize) -> Result<Vec<PuzzleEntry>> {
        let query_text = query.text();
        let mut scored: Vec<(f64, &PuzzleEntry)> = self
            .data
            .puzzles
            .iter()
            .map(|p| (weighted_similarity(&query_text, &p.text(), &self.weights), p))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| (a.year, a.day).cmp(&(b.year, b.day)))
        });
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn fetch_solutions(&self, year: u16, day: u8, limit: usize) -> Result<Vec<SolutionEntry>> {
        Ok(self
            .data
            .solutions
            .iter()
            .filter(|s| s.year == year && s.day == day)
            .take(limit)
            .cloned()
            .collect())
    }
}
