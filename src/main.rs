//! Robot tutor study CLI
//!
//! Usage:
//!   tutorstudy list
//!   tutorstudy participant <WORKER:ASSIGNMENT>
//!   tutorstudy stats
//!   tutorstudy ingest --trials trialdata.csv --questions questiondata.csv
//!   tutorstudy ingest --datastring session.json --participant W1:A1
//!   tutorstudy assign --worker-id W1 --assignment-id A1
//!   tutorstudy bonus <WORKER:ASSIGNMENT>
//!   tutorstudy analyze [--trials trialdata.csv --questions questiondata.csv]
//!   tutorstudy export-csv [--output-dir DIR]
//!   tutorstudy export-json [--output FILE]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutorstudy_backend::dataset::{build_dataset, build_entry, resolve_condition};
use tutorstudy_backend::demographics::QUESTIONNAIRE_KEYS;
use tutorstudy_backend::ingest::{
    assigned_condition, load_feed_files, parse_log, raw_events_from_datastring,
};
use tutorstudy_backend::models::{ParticipantSnapshot, ParticipantStatus};
use tutorstudy_backend::report::{
    render_full_json, render_questionnaire_csv, render_trial_csv, RenderedReport,
};
use tutorstudy_backend::{
    analyze, analyze_store, ParticipantId, ParticipantStore, SqliteParticipantStore, StudyConfig,
    StudySession,
};

/// Robot tutor study: participant store, assignment, bonus and analysis
#[derive(Parser, Debug)]
#[command(name = "tutorstudy")]
#[command(about = "Reconcile, inspect and analyze robot tutor study data")]
struct Cli {
    /// TOML config file (defaults to $STUDY_CONFIG_PATH, then study_config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Participant database, overriding the config
    #[arg(long, global = true, env = "STUDY_DATABASE_PATH")]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all participants
    List,

    /// Show one participant in detail
    Participant {
        /// Participant id, WORKER:ASSIGNMENT
        id: String,
    },

    /// Study-wide totals
    Stats,

    /// Import feed files or a datastring into the store
    Ingest {
        /// Trial feed CSV (participant_id, sequence_index, timestamp, payload)
        #[arg(long, requires = "questions")]
        trials: Option<PathBuf>,

        /// Question feed CSV (participant_id, question_key, response_value)
        #[arg(long, requires = "trials")]
        questions: Option<PathBuf>,

        /// psiTurk-style datastring JSON file
        #[arg(long, requires = "participant", conflicts_with = "trials")]
        datastring: Option<PathBuf>,

        /// Participant the datastring belongs to
        #[arg(long)]
        participant: Option<String>,
    },

    /// Assign (or look up) a condition for a session
    Assign {
        #[arg(short, long)]
        worker_id: String,

        #[arg(short, long)]
        assignment_id: String,
    },

    /// Recompute and store a participant's bonus
    Bonus {
        /// Participant id, WORKER:ASSIGNMENT
        id: String,
    },

    /// Run the full analysis and write the report
    Analyze {
        /// Analyze feed files instead of the store
        #[arg(long, requires = "questions")]
        trials: Option<PathBuf>,

        #[arg(long, requires = "trials")]
        questions: Option<PathBuf>,

        /// Output directory, overriding the config
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Export the trial and questionnaire streams as CSV
    ExportCsv {
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Export every participant as JSON
    ExportJson {
        /// Output file path (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StudyConfig::load(path)?,
        None => StudyConfig::from_env()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.database_path = db_path.clone();
    }

    match cli.command {
        Commands::List => list_participants(&config)?,
        Commands::Participant { id } => show_participant(&config, &ParticipantId::new(id))?,
        Commands::Stats => show_stats(&config)?,
        Commands::Ingest {
            trials,
            questions,
            datastring,
            participant,
        } => ingest(&config, trials, questions, datastring, participant)?,
        Commands::Assign {
            worker_id,
            assignment_id,
        } => {
            let session = open_session(&config)?;
            let condition = session
                .assign_condition(&worker_id, &assignment_id)
                .context("Condition assignment failed")?;
            println!("{} (code {})", condition, condition.code());
        }
        Commands::Bonus { id } => {
            let session = open_session(&config)?;
            let id = ParticipantId::new(id);
            let bonus = session
                .compute_bonus(&id)
                .with_context(|| format!("Failed to compute bonus for {}", id))?;
            println!("{}: ${:.2}", id, bonus);
        }
        Commands::Analyze {
            trials,
            questions,
            output_dir,
        } => {
            if let Some(dir) = output_dir {
                config.report.output_dir = dir;
            }
            run_analysis(&config, trials, questions)?
        }
        Commands::ExportCsv { output_dir } => {
            if let Some(dir) = output_dir {
                config.report.output_dir = dir;
            }
            export_csv(&config)?
        }
        Commands::ExportJson { output } => export_json(&config, output)?,
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutorstudy=info,tutorstudy_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_store(config: &StudyConfig) -> Result<Arc<SqliteParticipantStore>> {
    let store = SqliteParticipantStore::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open participant store: {}",
            config.database_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn open_session(config: &StudyConfig) -> Result<StudySession> {
    Ok(StudySession::new(
        open_store(config)?,
        config.assignment,
        config.bonus,
    ))
}

fn load_snapshots(config: &StudyConfig) -> Result<Vec<ParticipantSnapshot>> {
    let store = open_store(config)?;
    store
        .get_all()
        .context("Failed to read participants from store")
}

fn print_banner(title: &str) {
    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╚════════════════════════════════════════════════════════════════╝");
    println!();
}

// =============================================================================
// INSPECTION
// =============================================================================

fn list_participants(config: &StudyConfig) -> Result<()> {
    let snapshots = load_snapshots(config)?;
    print_banner("PARTICIPANTS");

    if snapshots.is_empty() {
        println!("No participants found.");
        return Ok(());
    }

    println!(
        "{:<40} {:<20} {:<12} {:<10}",
        "ID", "CREATED", "STATUS", "CONDITION"
    );
    println!("{}", "-".repeat(85));
    for p in &snapshots {
        let records = parse_log(&p.events).records;
        let condition = resolve_condition(&records, p.condition)
            .map(|c| c.as_str())
            .unwrap_or("unknown");
        let created = p
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<20} {:<12} {:<10}",
            p.id.as_str(),
            created,
            p.status.as_str(),
            condition
        );
    }
    println!();
    println!("Total: {} participants", snapshots.len());
    Ok(())
}

fn show_participant(config: &StudyConfig, id: &ParticipantId) -> Result<()> {
    let store = open_store(config)?;
    let Some(snapshot) = store.get(id)? else {
        bail!("Participant not found: {}", id);
    };
    let (entry, _) = build_entry(&snapshot, &config.bonus);
    let row = &entry.row;

    print_banner(&format!("PARTICIPANT {}", id));

    println!("=== Basic Info ===");
    if let Some((worker, assignment)) = id.worker_assignment() {
        println!("  Worker ID:      {}", worker);
        println!("  Assignment ID:  {}", assignment);
    }
    println!("  Condition:      {}", row.condition_label());
    println!("  Status:         {}", row.status.as_str());
    println!("  Stored bonus:   ${:.2}", snapshot.bonus);
    if let Some(created) = snapshot.created_at {
        println!("  Created:        {}", created.to_rfc3339());
    }
    println!();

    println!("=== Demographics ===");
    let d = &row.demographics;
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!(
        "  Age:                 {}",
        d.age.map(|a| format!("{:.0}", a)).unwrap_or_else(|| "-".to_string())
    );
    println!("  Gender:              {}", show(&d.gender));
    println!("  Platform experience: {}", show(&d.platform_experience));
    println!("  Robot experience:    {}", show(&d.robot_experience));
    println!();

    println!("=== Performance ===");
    let p = &row.performance;
    println!("  Trials:    {}", p.total_questions);
    println!("  Correct:   {}", p.correct_count);
    match p.accuracy {
        Some(acc) => println!("  Accuracy:  {:.1}%", acc * 100.0),
        None => println!("  Accuracy:  -"),
    }
    if let Some(rt) = p.mean_rt {
        println!("  Mean RT:   {:.0} ms", rt);
    }
    println!("  Bonus:     ${:.2}", p.bonus);
    println!(
        "  Log:       {} entries, {} skipped, {} repaired",
        row.parse.total, row.parse.skipped, row.parse.repaired
    );
    println!();

    println!("=== Questionnaire ===");
    if entry.questionnaire.is_empty() {
        println!("  (no answers)");
    }
    for key in QUESTIONNAIRE_KEYS {
        if let Some(value) = entry.questionnaire.get(key) {
            println!("  {:<22} {}", key, value);
        }
    }
    Ok(())
}

fn show_stats(config: &StudyConfig) -> Result<()> {
    let snapshots = load_snapshots(config)?;
    let dataset = build_dataset(&snapshots, &config.bonus);
    print_banner("STUDY STATISTICS");

    let completed = dataset
        .rows()
        .filter(|r| r.status == ParticipantStatus::Completed)
        .count();
    let in_progress = dataset
        .rows()
        .filter(|r| r.status == ParticipantStatus::InProgress)
        .count();

    println!("=== Participants ===");
    println!("  Total:        {}", dataset.len());
    println!("  Completed:    {}", completed);
    println!("  In progress:  {}", in_progress);
    println!();

    let mut by_condition: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &dataset.entries {
        let label = assigned_condition(&entry.records)
            .map(|c| c.as_str())
            .unwrap_or("unknown");
        *by_condition.entry(label).or_insert(0) += 1;
    }
    println!("=== Condition Distribution (assignment events) ===");
    for (label, count) in &by_condition {
        println!("  {:<10} {}", label, count);
    }
    println!();

    let trials: u32 = dataset.rows().map(|r| r.performance.total_questions).sum();
    let correct: u32 = dataset.rows().map(|r| r.performance.correct_count).sum();
    println!("=== Trials ===");
    println!("  Total:     {}", trials);
    println!("  Correct:   {}", correct);
    if trials > 0 {
        println!(
            "  Accuracy:  {:.1}%",
            correct as f64 / trials as f64 * 100.0
        );
    }
    println!();

    let report = &dataset.parse_report;
    println!("=== Log Quality ===");
    println!("  Entries:   {}", report.total);
    println!("  Skipped:   {}", report.skipped_count());
    println!("  Repaired:  {}", report.repaired);
    Ok(())
}

// =============================================================================
// WRITES
// =============================================================================

fn ingest(
    config: &StudyConfig,
    trials: Option<PathBuf>,
    questions: Option<PathBuf>,
    datastring: Option<PathBuf>,
    participant: Option<String>,
) -> Result<()> {
    let snapshots = match (trials, questions, datastring, participant) {
        (Some(trials), Some(questions), None, _) => load_feed_files(&trials, &questions)
            .with_context(|| {
                format!(
                    "Failed to load feeds {} and {}",
                    trials.display(),
                    questions.display()
                )
            })?,
        (None, None, Some(path), Some(participant)) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let (events, answers) = raw_events_from_datastring(&text)
                .with_context(|| format!("Failed to unpack datastring {}", path.display()))?;
            vec![ParticipantSnapshot::from_feeds(
                ParticipantId::new(participant),
                events,
                answers,
            )]
        }
        _ => bail!("ingest needs --trials and --questions, or --datastring and --participant"),
    };

    let session = open_session(config)?;
    let mut imported = 0;
    for snapshot in &snapshots {
        let condition = session
            .import_participant(snapshot)
            .with_context(|| format!("Failed to import {}", snapshot.id))?;
        info!(participant = %snapshot.id, %condition, events = snapshot.events.len(), "Imported");
        imported += 1;
    }
    println!(
        "Imported {} participants into {}",
        imported,
        config.database_path.display()
    );
    Ok(())
}

fn run_analysis(
    config: &StudyConfig,
    trials: Option<PathBuf>,
    questions: Option<PathBuf>,
) -> Result<()> {
    let output = match (trials, questions) {
        (Some(trials), Some(questions)) => {
            let snapshots = load_feed_files(&trials, &questions)
                .context("Failed to load feed files")?;
            analyze(&snapshots, config)
        }
        _ => {
            let store = open_store(config)?;
            analyze_store(store.as_ref(), config).context("Participant store unavailable")?
        }
    };

    let skipped = output.dataset.parse_report.skipped_count();
    if skipped > 0 {
        warn!(skipped, "Some log entries could not be parsed");
    }

    let written = output.export(config).context("Failed to write report")?;
    if let Some(summary) = written
        .iter()
        .find(|p| p.ends_with(&config.report.summary_file))
    {
        let text = std::fs::read_to_string(summary)?;
        println!("{}", text);
    }
    for path in &written {
        println!("✓ Saved: {}", path.display());
    }
    Ok(())
}

fn export_csv(config: &StudyConfig) -> Result<()> {
    let snapshots = load_snapshots(config)?;
    let dataset = build_dataset(&snapshots, &config.bonus);
    let precision = config.report.precision;

    let rendered = RenderedReport {
        files: vec![
            (
                config.report.trial_file.clone(),
                render_trial_csv(&dataset, precision)?,
            ),
            (
                config.report.questionnaire_file.clone(),
                render_questionnaire_csv(&dataset)?,
            ),
        ],
    };
    let written = rendered.write_to(&config.report.output_dir)?;
    for path in &written {
        println!("✓ Saved: {}", path.display());
    }
    Ok(())
}

fn export_json(config: &StudyConfig, output: Option<PathBuf>) -> Result<()> {
    let snapshots = load_snapshots(config)?;
    let dataset = build_dataset(&snapshots, &config.bonus);
    let json = render_full_json(&dataset)?;

    match output {
        Some(path) => {
            write_single(&path, &json)?;
            println!("✓ Saved: {}", path.display());
        }
        None => print!("{}", json),
    }
    Ok(())
}

fn write_single(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("Not a file path: {}", path.display()))?
        .to_string_lossy()
        .into_owned();
    RenderedReport {
        files: vec![(name, content.to_string())],
    }
    .write_to(&dir)?;
    Ok(())
}
