//! Pulls similar solved puzzles from the store and extracts a plan from the
//! best community solution of each.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::record::{PipelineRecord, Reference, ReferencePuzzle};
use crate::core::response::ResponseSchema;
use crate::io::model::LanguageModel;
use crate::io::prompt::{PromptEngine, PromptKind};
use crate::io::store::{PuzzleEntry, PuzzleStore, SolutionEntry};
use crate::stages::{Stage, StageKind, request_with_retries};

const RANKED_SOLUTIONS_SCHEMA: &str = include_str!("../../schemas/ranked_solutions.schema.json");

#[derive(Debug, Serialize)]
struct RankInput<'a> {
    problem_statement: &'a str,
    full_description: &'a str,
    underlying_concepts: &'a [String],
    keywords: &'a [String],
    solutions: Vec<CandidateSolution<'a>>,
}

#[derive(Debug, Serialize)]
struct CandidateSolution<'a> {
    solution_id: String,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct RankedSolutions {
    ranked_solutions: Vec<RankedSolution>,
}

#[derive(Debug, Deserialize)]
struct RankedSolution {
    solution_id: String,
    rank: u32,
    plan: String,
}

fn solution_id(index: usize) -> String {
    format!("solution-{index}")
}

pub struct RetrievalStage {
    model: Box<dyn LanguageModel>,
    store: Box<dyn PuzzleStore>,
    prompts: PromptEngine,
    schema: ResponseSchema,
    limit: usize,
    max_retries: u32,
}

impl RetrievalStage {
    pub fn new(
        model: Box<dyn LanguageModel>,
        store: Box<dyn PuzzleStore>,
        limit: usize,
        max_retries: u32,
    ) -> Result<Self> {
        if limit == 0 {
            bail!("retrieval limit must be > 0");
        }
        Ok(Self {
            model,
            store,
            prompts: PromptEngine::new(),
            schema: ResponseSchema::new("ranked_solutions", RANKED_SOLUTIONS_SCHEMA)?,
            limit,
            max_retries,
        })
    }

    /// Ask the model for the best of `solutions`; returns its index and plan.
    fn rank(&self, puzzle: &PuzzleEntry, solutions: &[SolutionEntry]) -> Result<(usize, String)> {
        let input = RankInput {
            problem_statement: &puzzle.problem_statement,
            full_description: &puzzle.full_description,
            underlying_concepts: &puzzle.concepts,
            keywords: &puzzle.keywords,
            solutions: solutions
                .iter()
                .enumerate()
                .map(|(i, s)| CandidateSolution {
                    solution_id: solution_id(i),
                    code: &s.code,
                })
                .collect(),
        };
        let prompt = self.prompts.render_json(PromptKind::RankSolutions, &input)?;

        request_with_retries(self.model.as_ref(), &prompt, self.max_retries, |text| {
            let ranked: RankedSolutions = self.schema.parse(text)?;
            let top = ranked
                .ranked_solutions
                .into_iter()
                .find(|s| s.rank == 1)
                .ok_or_else(|| anyhow!("no solution ranked 1"))?;
            let index = (0..solutions.len())
                .find(|i| solution_id(*i) == top.solution_id)
                .ok_or_else(|| anyhow!("unknown solution id {}", top.solution_id))?;
            Ok((index, top.plan))
        })
    }
}

impl Stage for RetrievalStage {
    fn name(&self) -> &str {
        StageKind::Retrieval.as_str()
    }

    fn process(&mut self, mut record: PipelineRecord) -> Result<PipelineRecord> {
        let query = PuzzleEntry::from_record(&record);
        // One extra so the puzzle itself can be dropped without losing a slot.
        let similar = self.store.find_similar(&query, self.limit + 1)?;

        let own = (record.year(), record.day());
        let mut references = Vec::new();
        for puzzle in similar
            .iter()
            .filter(|p| (p.year, p.day) != own)
            .take(self.limit)
        {
            let solutions = self.store.fetch_solutions(puzzle.year, puzzle.day, self.limit)?;
            if solutions.is_empty() {
                debug!(year = puzzle.year, day = puzzle.day, "no solutions stored, skipping");
                continue;
            }

            match self.rank(puzzle, &solutions) {
                Ok((index, plan)) => references.push(Reference {
                    puzzle: ReferencePuzzle {
                        year: puzzle.year,
                        day: puzzle.day,
                        description: puzzle.full_description.clone(),
                        solution: solutions[index].code.clone(),
                    },
                    plan,
                }),
                Err(err) => {
                    warn!(year = puzzle.year, day = puzzle.day, "could not rank solutions");
                    record.log_error(
                        self.name(),
                        format!("ranking {}-{} failed: {err:#}", puzzle.year, puzzle.day),
                    );
                }
            }
        }

        info!(references = references.len(), "references retrieved");
        record.log_activity(
            self.name(),
            format!("retrieved {} references", references.len()),
        );
        record.references = references;
        Ok(record)
    }
}
