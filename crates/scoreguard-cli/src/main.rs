//! Scoreguard - Scoring Reliability & Validation CLI
//!
//! The `scoreguard` command drives the validation engine against the
//! configured SurrealDB store. Every command prints its result as JSON on
//! stdout; logs go to stderr.
//!
//! ## Commands
//!
//! - `evaluator add` / `session add`: register collaborators
//! - `primary` / `submit` / `snapshot`: attach scores to a record
//! - `resolve`: apply a validator decision
//! - `validate` / `irr`: reliability checks
//! - `queue` / `report` / `evaluator-report`: review queue and reports
//! - `show` / `verify`: inspect a record and its audit trail

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Instrument, Level};

use scoreguard_core::{
    record_span, CriterionScore, EngineConfig, EvaluatorKind, RecordKey, ValidationEngine,
    ValidationStatus, METRICS,
};
use scoreguard_state::SurrealStore;

#[derive(Parser)]
#[command(name = "scoreguard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scoring reliability and validation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (default: ./scoreguard.toml when present)
    #[arg(short, long, global = true, env = "SCOREGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage evaluators
    Evaluator {
        #[command(subcommand)]
        action: EvaluatorAction,
    },

    /// Manage session reference scores
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Record (or revise) the primary score for a session rubric
    Primary {
        #[command(flatten)]
        target: RecordArgs,

        /// Evaluator awarding the score
        #[arg(short, long)]
        evaluator: String,

        /// Score in 0-100
        #[arg(short, long)]
        score: f64,

        /// Per-criterion score as `criterion=score` (repeatable)
        #[arg(long = "criterion", value_parser = parse_criterion)]
        criteria: Vec<CriterionScore>,
    },

    /// Submit a secondary score for an existing record
    Submit {
        #[command(flatten)]
        target: RecordArgs,

        /// Evaluator awarding the score
        #[arg(short, long)]
        evaluator: String,

        /// Score in 0-100
        #[arg(short, long)]
        score: f64,

        /// Per-criterion score as `criterion=score` (repeatable)
        #[arg(long = "criterion", value_parser = parse_criterion)]
        criteria: Vec<CriterionScore>,
    },

    /// Attach a reliability snapshot (0.0-1.0) to a record
    Snapshot {
        #[command(flatten)]
        target: RecordArgs,

        #[arg(short, long)]
        evaluator: String,

        /// Reliability in 0.0-1.0
        #[arg(short, long)]
        score: f64,

        /// Criteria the snapshot covers (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,
    },

    /// Apply a validator decision to a record
    Resolve {
        #[command(flatten)]
        target: RecordArgs,

        /// Validator making the decision
        #[arg(long)]
        validator: String,

        /// validated | invalid | disputed | needs_review
        #[arg(long, value_parser = parse_status)]
        status: ValidationStatus,

        #[arg(short, long, default_value = "")]
        notes: String,

        /// Allow changing a record that is already resolved
        #[arg(long = "override")]
        override_resolved: bool,
    },

    /// Check a human score against the session reference score
    Validate {
        #[arg(long)]
        session: String,

        #[arg(short, long)]
        evaluator: String,

        /// Human score in 0-100
        #[arg(short, long)]
        score: f64,

        /// Confidence threshold in 0.0-1.0 (default from configuration)
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Inter-rater reliability of an ad-hoc score list
    Irr {
        /// Scores in 0-100
        #[arg(required = true, num_args = 1..)]
        scores: Vec<f64>,
    },

    /// List records needing review, least reliable first
    Queue {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Reliability aggregate for one evaluator
    EvaluatorReport {
        evaluator: String,

        /// Look-back window in hours
        #[arg(long, default_value = "720")]
        hours: i64,
    },

    /// Validation report for a session
    Report { session: String },

    /// Show a validation record
    Show {
        #[command(flatten)]
        target: RecordArgs,
    },

    /// Verify a record's audit trail digests
    Verify {
        #[command(flatten)]
        target: RecordArgs,
    },
}

#[derive(Subcommand)]
enum EvaluatorAction {
    /// Register an evaluator
    Add {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        /// automated | human
        #[arg(short, long, default_value = "human", value_parser = parse_kind)]
        kind: EvaluatorKind,
    },

    /// Show an evaluator and its reliability profile
    Show { id: String },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Set a session's reference score
    Add {
        id: String,

        /// Reference score in 0-100
        #[arg(short, long)]
        reference: f64,
    },
}

#[derive(clap::Args)]
struct RecordArgs {
    /// Session identifier
    #[arg(long)]
    session: String,

    /// Rubric identifier
    #[arg(long)]
    rubric: String,
}

impl RecordArgs {
    fn key(&self) -> RecordKey {
        RecordKey::new(&self.session, &self.rubric)
    }
}

fn parse_criterion(raw: &str) -> Result<CriterionScore, String> {
    let (id, score) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected criterion=score, got {raw:?}"))?;
    let score = score
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad score in {raw:?}: {e}"))?;
    Ok(CriterionScore {
        criterion_id: id.trim().to_string(),
        score,
    })
}

fn parse_status(raw: &str) -> Result<ValidationStatus, String> {
    ValidationStatus::parse(raw).ok_or_else(|| format!("unknown status {raw:?}"))
}

fn parse_kind(raw: &str) -> Result<EvaluatorKind, String> {
    EvaluatorKind::parse(raw).ok_or_else(|| format!("unknown evaluator kind {raw:?}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    scoreguard_core::init_tracing(cli.json, level);

    let mut config = EngineConfig::load(cli.config.as_deref())
        .context("Failed to load Scoreguard configuration")?;
    // spawned profile updates would not outlive this process
    config.tracking.background = false;

    let store = SurrealStore::from_env()
        .await
        .context("Failed to connect to Scoreguard database")?;
    let engine = ValidationEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config,
    );

    let result = run(cli.command, &engine, &store).await;
    METRICS.flush();
    result
}

async fn run(command: Commands, engine: &ValidationEngine, store: &SurrealStore) -> Result<()> {
    match command {
        Commands::Evaluator { action } => match action {
            EvaluatorAction::Add { id, name, kind } => {
                let name = name.unwrap_or_else(|| id.clone());
                let evaluator = engine.register_evaluator(&id, &name, kind).await?;
                info!(evaluator_id = %id, "evaluator registered");
                print_json(&evaluator)
            }
            EvaluatorAction::Show { id } => print_json(&engine.get_evaluator(&id).await?),
        },
        Commands::Session { action } => match action {
            SessionAction::Add { id, reference } => {
                if !(0.0..=100.0).contains(&reference) {
                    return Err(anyhow!("reference score must be within 0-100"));
                }
                store.put_session(&id, reference).await?;
                print_json(&serde_json::json!({
                    "session_id": id,
                    "reference_score": reference,
                }))
            }
        },
        Commands::Primary {
            target,
            evaluator,
            score,
            criteria,
        } => {
            let record = engine
                .record_primary_score(&target.session, &target.rubric, &evaluator, score, criteria)
                .instrument(record_span(&target.key()))
                .await?;
            print_json(&record)
        }
        Commands::Submit {
            target,
            evaluator,
            score,
            criteria,
        } => {
            let record = engine
                .submit_secondary_score(&target.session, &target.rubric, &evaluator, score, criteria)
                .instrument(record_span(&target.key()))
                .await?;
            print_json(&record)
        }
        Commands::Snapshot {
            target,
            evaluator,
            score,
            criteria,
        } => {
            let record = engine
                .add_reliability_snapshot(&target.session, &target.rubric, &evaluator, score, criteria)
                .instrument(record_span(&target.key()))
                .await?;
            print_json(&record)
        }
        Commands::Resolve {
            target,
            validator,
            status,
            notes,
            override_resolved,
        } => {
            let record = engine
                .resolve_record(
                    &target.session,
                    &target.rubric,
                    &validator,
                    &notes,
                    status,
                    override_resolved,
                )
                .instrument(record_span(&target.key()))
                .await?;
            print_json(&record)
        }
        Commands::Validate {
            session,
            evaluator,
            score,
            threshold,
        } => {
            let threshold =
                threshold.unwrap_or(engine.config().tracking.default_confidence_threshold);
            let check = engine
                .validate_scoring_reliability(&session, &evaluator, score, threshold)
                .await?;
            print_json(&check)
        }
        Commands::Irr { scores } => print_json(&engine.calculate_inter_rater_reliability(&scores)?),
        Commands::Queue { limit } => print_json(&engine.find_needing_review(limit).await?),
        Commands::EvaluatorReport { evaluator, hours } => {
            if hours <= 0 {
                return Err(anyhow!("--hours must be positive"));
            }
            let report = engine
                .get_evaluator_reliability(&evaluator, chrono::Duration::hours(hours))
                .await?;
            print_json(&report)
        }
        Commands::Report { session } => {
            print_json(&engine.generate_validation_report(&session).await?)
        }
        Commands::Show { target } => {
            print_json(&engine.get_record(&target.session, &target.rubric).await?)
        }
        Commands::Verify { target } => {
            let verification = engine
                .verify_audit_trail(&target.session, &target.rubric)
                .await?;
            if !verification.valid {
                tracing::warn!(
                    record = %target.key(),
                    first_invalid = ?verification.first_invalid,
                    "audit trail digest mismatch"
                );
            }
            print_json(&verification)
        }
    }
}
