//! Maintenance of the reference puzzle store (`add-puzzle`, `add-solution`).

use anyhow::{Result, bail};
use tracing::info;

use crate::core::record::{PipelineRecord, Puzzle};
use crate::io::store::{Insert, JsonPuzzleStore, PuzzleEntry, SolutionEntry};
use crate::stages::Stage;

/// Preprocess `puzzle` and store it, unless (year, day) is already stored.
///
/// The store is saved only when something was added.
pub fn add_puzzle(
    store: &mut JsonPuzzleStore,
    preprocess: &mut dyn Stage,
    puzzle: Puzzle,
) -> Result<Insert> {
    if store.contains_puzzle(puzzle.year, puzzle.day) {
        info!(year = puzzle.year, day = puzzle.day, "puzzle already stored, skipping");
        return Ok(Insert::Existing);
    }

    let record = preprocess.process(PipelineRecord::new(puzzle))?;
    if record.problem_statement.is_none() {
        let detail = record
            .errors()
            .last()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "no problem statement extracted".to_string());
        bail!(
            "could not preprocess puzzle {}-{}: {detail}",
            record.year(),
            record.day()
        );
    }

    let inserted = store.add_puzzle(PuzzleEntry::from_record(&record));
    store.save()?;
    Ok(inserted)
}

/// Store one community solution for an already stored puzzle.
pub fn add_solution(store: &mut JsonPuzzleStore, solution: SolutionEntry) -> Result<Insert> {
    let inserted = store.add_solution(solution)?;
    if inserted == Insert::Added {
        store.save()?;
    }
    Ok(inserted)
}
