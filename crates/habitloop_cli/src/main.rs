//! Command-line host for the habitloop engine.
//!
//! # Responsibility
//! - Open a database file and drive the engine operations.
//! - Act as the external sweep trigger (`habitloop sweep`) for cron jobs.
//! - Print results as JSON for scripting.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use habitloop_core::{
    init_logging_from_config, open_db, Difficulty, EngineConfig, HabitEngine, Obligation,
    ObligationId, ObligationKind, ObligationListQuery, OwnerId, PeriodId, RecurrenceRule,
    SqlitePeriodStore, SweepScope, SystemClock,
};
use serde_json::json;
use std::error::Error;
use std::path::PathBuf;

const DEFAULT_DB_PATH: &str = "habitloop.sqlite3";

#[derive(Debug, Parser)]
#[command(name = "habitloop", version, about = "Habit and daily period tracker")]
struct Cli {
    /// SQLite database file. Overrides `[database] path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an obligation
    Add {
        #[arg(long)]
        owner: OwnerId,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        title: String,
        /// always | daily[/N] | weekly[/N] | monthly[/N]
        #[arg(long, default_value = "daily")]
        cadence: RecurrenceRule,
        /// Completions required per period
        #[arg(long)]
        target: Option<u32>,
        #[arg(long, value_enum, default_value_t = DifficultyArg::Easy)]
        difficulty: DifficultyArg,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List obligations
    List {
        #[arg(long)]
        owner: Option<OwnerId>,
        /// Include archived obligations
        #[arg(long)]
        all: bool,
    },
    /// Archive an obligation
    Archive { id: ObligationId },
    /// Restore an archived obligation
    Restore { id: ObligationId },
    /// Show (and open if needed) the period covering now
    Current { id: ObligationId },
    /// Complete an obligation now
    Complete { id: ObligationId },
    /// Record a completion before the current window
    Backfill {
        id: ObligationId,
        /// RFC 3339 instant, e.g. 2024-01-01T10:00:00Z
        #[arg(long)]
        at: DateTime<Utc>,
    },
    /// Force a pending period to success
    Finalize { period: PeriodId },
    /// Expire elapsed periods
    Sweep {
        #[arg(long, conflicts_with = "obligation")]
        owner: Option<OwnerId>,
        #[arg(long)]
        obligation: Option<ObligationId>,
    },
    /// Show streak and completion statistics
    Streak { id: ObligationId },
    /// Show period and entry history
    History { id: ObligationId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Habit,
    Daily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DifficultyArg {
    Trivial,
    Easy,
    Medium,
    Hard,
}

impl From<KindArg> for ObligationKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Habit => Self::Habit,
            KindArg::Daily => Self::Daily,
        }
    }
}

impl From<DifficultyArg> for Difficulty {
    fn from(value: DifficultyArg) -> Self {
        match value {
            DifficultyArg::Trivial => Self::Trivial,
            DifficultyArg::Easy => Self::Easy,
            DifficultyArg::Medium => Self::Medium,
            DifficultyArg::Hard => Self::Hard,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    init_logging_from_config(&config.logging)?;

    let db_path = resolve_db_path(cli.db.as_ref(), &config);
    let conn = open_db(&db_path)?;
    let store = SqlitePeriodStore::try_new(&conn)?;
    let engine = HabitEngine::new(store, SystemClock, config);

    let output = match cli.command {
        Command::Add {
            owner,
            kind,
            title,
            cadence,
            target,
            difficulty,
            tags,
        } => {
            let mut obligation = Obligation::new(owner, kind.into(), title, cadence, engine.now())
                .with_difficulty(difficulty.into())
                .with_tags(tags);
            obligation.target = target;
            json!(engine.create_obligation(&obligation)?)
        }
        Command::List { owner, all } => {
            let query = ObligationListQuery {
                owner_id: owner,
                include_archived: all,
            };
            json!(engine.list_obligations(&query)?)
        }
        Command::Archive { id } => {
            engine.archive_obligation(id)?;
            json!({ "id": id, "status": "archived" })
        }
        Command::Restore { id } => {
            engine.restore_obligation(id)?;
            json!({ "id": id, "status": "active" })
        }
        Command::Current { id } => json!(engine.get_or_create_active_period(id)?),
        Command::Complete { id } => json!(engine.complete_obligation(id)?),
        Command::Backfill { id, at } => json!(engine.record_adhoc_completion(id, at)?),
        Command::Finalize { period } => json!(engine.complete_and_finalize(period)?),
        Command::Sweep { owner, obligation } => {
            json!(engine.finalize_expired_periods(sweep_scope(owner, obligation))?)
        }
        Command::Streak { id } => json!({
            "streak": engine.get_streak(id)?,
            "stats": engine.get_stats(id)?,
        }),
        Command::History { id } => json!({
            "periods": engine.list_periods(id)?,
            "entries": engine.list_entries(id)?,
        }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn resolve_db_path(flag: Option<&PathBuf>, config: &EngineConfig) -> PathBuf {
    flag.or(config.database.path.as_ref())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

fn sweep_scope(owner: Option<OwnerId>, obligation: Option<ObligationId>) -> SweepScope {
    match (owner, obligation) {
        (_, Some(obligation_id)) => SweepScope::Obligation(obligation_id),
        (Some(owner_id), None) => SweepScope::Owner(owner_id),
        (None, None) => SweepScope::All,
    }
}
