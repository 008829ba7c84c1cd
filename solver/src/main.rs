//! Command-line entry point for the puzzle solver.
//!
//! `solve` runs the five-stage pipeline for one puzzle and prints the final
//! program on stdout. `add-puzzle` and `add-solution` grow the reference
//! store that retrieval draws from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use solver::catalog;
use solver::core::record::Puzzle;
use solver::exit_codes;
use solver::io::config::{DEFAULT_CONFIG_PATH, SolverConfig, load_config, write_config};
use solver::io::model::CommandModel;
use solver::io::store::{Insert, JsonPuzzleStore, SolutionEntry, SolutionSource};
use solver::logging;
use solver::pipeline::{ConfiguredCollaborators, PipelineOptions};
use solver::solve::{SolveRequest, run_solve, write_record};
use solver::stages::StageKind;
use solver::stages::preprocess::PreprocessStage;

#[derive(Parser)]
#[command(
    name = "solver",
    version,
    about = "Multi-stage LLM pipeline for programming puzzles"
)]
struct Cli {
    /// Path to the TOML config; defaults apply when the file is missing.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Tracing filter, e.g. `debug` or `solver=trace`. Overrides `RUST_LOG`.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the pipeline for one puzzle and print the final program.
    Solve(SolveArgs),
    /// Preprocess a puzzle description and add it to the reference store.
    AddPuzzle {
        /// File holding the full puzzle description.
        #[arg(long)]
        description: PathBuf,
        #[arg(long)]
        year: u16,
        #[arg(long)]
        day: u8,
        /// Model used for preprocessing; defaults to `model.default`.
        #[arg(long)]
        model: Option<String>,
    },
    /// Add a community solution for a stored puzzle.
    AddSolution {
        #[arg(long)]
        year: u16,
        #[arg(long)]
        day: u8,
        /// File holding the solution source.
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        author: String,
        #[arg(long, value_enum)]
        source: SourceArg,
    },
}

#[derive(clap::Args)]
struct SolveArgs {
    /// File holding the puzzle description.
    #[arg(long)]
    puzzle: PathBuf,
    /// File holding the real puzzle input.
    #[arg(long)]
    puzzle_input: PathBuf,
    /// Known answer for the puzzle input.
    #[arg(long)]
    expected_output: Option<String>,
    #[arg(long, default_value_t = 2024)]
    year: u16,
    #[arg(long, default_value_t = 1)]
    day: u8,
    /// Skip a stage; repeatable.
    #[arg(long, value_enum)]
    disable: Vec<StageKind>,
    /// Model for every stage without its own override.
    #[arg(long)]
    default_model: Option<String>,
    #[arg(long)]
    preprocess_model: Option<String>,
    #[arg(long)]
    retrieval_model: Option<String>,
    #[arg(long)]
    planning_model: Option<String>,
    #[arg(long)]
    coding_model: Option<String>,
    #[arg(long)]
    debugging_model: Option<String>,
    /// Write the final pipeline record as JSON.
    #[arg(long)]
    record_out: Option<PathBuf>,
}

impl SolveArgs {
    fn stage_models(&self) -> HashMap<StageKind, String> {
        [
            (StageKind::Preprocess, &self.preprocess_model),
            (StageKind::Retrieval, &self.retrieval_model),
            (StageKind::Planning, &self.planning_model),
            (StageKind::Coding, &self.coding_model),
            (StageKind::Debugging, &self.debugging_model),
        ]
        .into_iter()
        .filter_map(|(kind, model)| model.clone().map(|m| (kind, m)))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Github,
    Reddit,
}

impl From<SourceArg> for SolutionSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Github => SolutionSource::Github,
            SourceArg::Reddit => SolutionSource::Reddit,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Solve(args) => cmd_solve(&load_config(&cli.config)?, args),
        Command::AddPuzzle {
            description,
            year,
            day,
            model,
        } => {
            let cfg = load_config(&cli.config)?;
            let puzzle = Puzzle {
                description: read_file(&description)?,
                year,
                day,
            };
            cmd_add_puzzle(&cfg, puzzle, model)
        }
        Command::AddSolution {
            year,
            day,
            code,
            author,
            source,
        } => {
            let cfg = load_config(&cli.config)?;
            let solution = SolutionEntry {
                year,
                day,
                code: read_file(&code)?,
                author,
                source: source.into(),
            };
            cmd_add_solution(&cfg, solution)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SolverConfig::default())?;
    info!(path = %path.display(), "wrote default config");
    Ok(())
}

fn cmd_solve(cfg: &SolverConfig, args: SolveArgs) -> Result<()> {
    let stage_models = args.stage_models();
    let request = SolveRequest {
        puzzle: Puzzle {
            description: read_file(&args.puzzle)?,
            year: args.year,
            day: args.day,
        },
        options: PipelineOptions {
            puzzle_input: read_file(&args.puzzle_input)?,
            expected_output: args.expected_output,
            disabled: args.disable,
            default_model: args.default_model,
            stage_models,
        },
    };

    let outcome = run_solve(cfg, &request, &ConfiguredCollaborators::new(cfg))?;
    if let Some(path) = &args.record_out {
        write_record(path, &outcome.record)?;
    }

    let record = &outcome.record;
    match record.final_code() {
        Some(code) => {
            info!(steps = outcome.steps, "puzzle solved");
            println!("{code}");
        }
        None => {
            error!(
                year = record.year(),
                day = record.day(),
                stop = ?outcome.stop,
                "could not solve puzzle"
            );
            if let Some(code) = &record.generated_code {
                println!("{code}");
            }
        }
    }
    Ok(())
}

fn cmd_add_puzzle(cfg: &SolverConfig, puzzle: Puzzle, model: Option<String>) -> Result<()> {
    let model = model.unwrap_or_else(|| cfg.model.default.clone());
    let mut stage = PreprocessStage::new(
        Box::new(CommandModel::new(&model, &cfg.model)),
        cfg.max_response_retries,
    )?;
    let mut store = JsonPuzzleStore::open(&cfg.store_path)?;
    let (year, day) = (puzzle.year, puzzle.day);
    match catalog::add_puzzle(&mut store, &mut stage, puzzle)? {
        Insert::Added => info!(year, day, "puzzle added"),
        Insert::Existing => info!(year, day, "puzzle already present"),
    }
    Ok(())
}

fn cmd_add_solution(cfg: &SolverConfig, solution: SolutionEntry) -> Result<()> {
    let mut store = JsonPuzzleStore::open(&cfg.store_path)?;
    let (year, day) = (solution.year, solution.day);
    match catalog::add_solution(&mut store, solution)? {
        Insert::Added => info!(year, day, "solution added"),
        Insert::Existing => info!(year, day, "solution already present"),
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["solver", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_init_force_with_global_flags() {
        let cli = Cli::parse_from([
            "solver", "init", "--force", "--config", "c.toml", "-l", "debug",
        ]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from("c.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn parse_solve_defaults() {
        let cli = Cli::parse_from([
            "solver",
            "solve",
            "--puzzle",
            "p.md",
            "--puzzle-input",
            "in.txt",
        ]);
        let Command::Solve(args) = cli.command else {
            panic!("expected solve");
        };
        assert_eq!((args.year, args.day), (2024, 1));
        assert!(args.disable.is_empty());
        assert!(args.expected_output.is_none());
        assert!(args.stage_models().is_empty());
    }

    #[test]
    fn parse_solve_disables_and_overrides() {
        let cli = Cli::parse_from([
            "solver",
            "solve",
            "--puzzle",
            "p.md",
            "--puzzle-input",
            "in.txt",
            "--disable",
            "retrieval",
            "--disable",
            "debugging",
            "--coding-model",
            "big",
            "--expected-output",
            "42",
        ]);
        let Command::Solve(args) = cli.command else {
            panic!("expected solve");
        };
        assert_eq!(args.disable, vec![StageKind::Retrieval, StageKind::Debugging]);
        assert_eq!(args.expected_output.as_deref(), Some("42"));
        let models = args.stage_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[&StageKind::Coding], "big");
    }

    #[test]
    fn parse_add_solution_source() {
        let cli = Cli::parse_from([
            "solver",
            "add-solution",
            "--year",
            "2022",
            "--day",
            "5",
            "--code",
            "s.py",
            "--author",
            "ann",
            "--source",
            "reddit",
        ]);
        let Command::AddSolution { source, .. } = cli.command else {
            panic!("expected add-solution");
        };
        assert_eq!(SolutionSource::from(source), SolutionSource::Reddit);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let parsed = Cli::try_parse_from([
            "solver",
            "solve",
            "--puzzle",
            "p.md",
            "--puzzle-input",
            "in.txt",
            "--disable",
            "testing",
        ]);
        assert!(parsed.is_err());
    }
}
