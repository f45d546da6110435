//! RAG Scorecard CLI
//!
//! Scores original and optimized RAG answers against their reference keys.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rag_scorecard::{
    config::Config,
    dataset::{Dataset, DatasetItem, discover_datasets, sample_dataset},
    embeddings::{Embedder, build_embedder},
    judge::{
        JudgeRecord, LlmJudge, ValidationConfig, ValidationReport, parse_comparison_text,
        parse_judge_text, validate,
    },
    ledger::{EvaluationLedger, EvaluationRecord, report},
    llm::{DEFAULT_BATCH_SIZE, Prompts},
    model::AnswerVersion,
    session::{EvaluationSession, ItemEvaluation, JudgeIngest, SessionSummary},
};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// RAG Scorecard - keyword, semantic and LLM-judge scoring for RAG answers
#[derive(Parser)]
#[command(name = "ragscore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every question in a dataset
    Score {
        /// Dataset CSV; the built-in sample is used when omitted
        dataset: Option<PathBuf>,

        /// Directory of judge outputs named q{id}_{version}.json or .txt
        #[arg(long)]
        judge_dir: Option<PathBuf>,

        /// Call the configured LLM judge for answers without a judge output
        #[arg(long)]
        auto_judge: bool,

        /// Append results to the ledger
        #[arg(long)]
        save: bool,

        /// Also write a CSV report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable the semantic layer for this run
        #[arg(long)]
        no_semantic: bool,

        /// Keep judge outputs that fail validation
        #[arg(long)]
        force: bool,

        /// Only score the first N questions
        #[arg(long)]
        limit: Option<usize>,

        /// Ignore judge results stored in the ledger for this dataset
        #[arg(long)]
        fresh: bool,

        /// Print per-question detail
        #[arg(long)]
        verbose: bool,
    },

    /// List dataset files under a directory
    Discover {
        /// Directory to search
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Render judge prompts for manual judging
    Prompt {
        /// Dataset CSV
        dataset: PathBuf,

        /// Question to render; all questions when omitted
        question_id: Option<i64>,

        /// Answer version to judge
        #[arg(long, default_value = "optimized")]
        version: AnswerVersion,

        /// Render the side-by-side comparison prompt instead
        #[arg(long)]
        compare: bool,

        /// Write prompts into this directory instead of printing them
        #[arg(long)]
        out: Option<PathBuf>,

        /// Questions per prompt file when writing all questions
        #[arg(long)]
        batch: Option<usize>,
    },

    /// Parse and validate a judge output
    Judge {
        /// Judge output file, or '-' for stdin
        file: PathBuf,

        /// Question the output belongs to
        #[arg(short, long)]
        question_id: Option<i64>,

        /// Answer version the output belongs to
        #[arg(long, default_value = "optimized")]
        version: AnswerVersion,

        /// The output is a side-by-side comparison
        #[arg(long)]
        compare: bool,

        /// Allowed gap between overall and the dimension mean
        #[arg(long)]
        tolerance: Option<f64>,

        /// Print the normalized record as JSON
        #[arg(long)]
        json: bool,

        /// Dataset the question comes from; appends rows to the judge table
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Keep the output even when validation fails
        #[arg(long)]
        force: bool,

        /// Also warn on a missing question_id or missing metrics
        #[arg(long)]
        strict: bool,
    },

    /// Inspect or export the evaluation ledger
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Test judge and embedding connections
    Test,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Aggregate statistics over all records
    Stats,

    /// List records
    List {
        /// Only records from this source file
        #[arg(long)]
        file: Option<String>,

        /// Only the newest record per question
        #[arg(long)]
        latest: bool,
    },

    /// Export records to CSV
    Export {
        /// Output CSV path
        output: PathBuf,

        /// Only the newest record per question
        #[arg(long)]
        latest: bool,
    },

    /// Delete the history and judge table
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Score {
            dataset,
            judge_dir,
            auto_judge,
            save,
            output,
            no_semantic,
            force,
            limit,
            fresh,
            verbose,
        } => cmd_score(
            config,
            ScoreOptions {
                dataset,
                judge_dir,
                auto_judge,
                save,
                output,
                no_semantic,
                force,
                limit,
                fresh,
                verbose,
            },
        ),
        Commands::Discover { dir } => cmd_discover(&dir),
        Commands::Prompt {
            dataset,
            question_id,
            version,
            compare,
            out,
            batch,
        } => cmd_prompt(&dataset, question_id, version, compare, out, batch),
        Commands::Judge {
            file,
            question_id,
            version,
            compare,
            tolerance,
            json,
            dataset,
            force,
            strict,
        } => cmd_judge(
            &config,
            JudgeOptions {
                file,
                question_id,
                version,
                compare,
                tolerance,
                json,
                dataset,
                force,
                strict,
            },
        ),
        Commands::History { action } => cmd_history(&config, action),
        Commands::Test => cmd_test(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Judge calls are async; everything else runs on plain threads.
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

struct ScoreOptions {
    dataset: Option<PathBuf>,
    judge_dir: Option<PathBuf>,
    auto_judge: bool,
    save: bool,
    output: Option<PathBuf>,
    no_semantic: bool,
    force: bool,
    limit: Option<usize>,
    fresh: bool,
    verbose: bool,
}

fn cmd_score(mut config: Config, options: ScoreOptions) -> Result<()> {
    let mut dataset = match &options.dataset {
        Some(path) => Dataset::load_csv(path).context("Failed to load dataset")?,
        None => {
            println!("No dataset given; scoring the built-in sample.");
            sample_dataset()
        }
    };
    if let Some(limit) = options.limit {
        dataset = dataset.take(limit);
    }
    if dataset.is_empty() {
        anyhow::bail!("Dataset '{}' has no questions", dataset.name);
    }

    if options.no_semantic {
        config.embedding.backend = Default::default();
    }
    if options.auto_judge {
        config.validate_llm().context("--auto-judge needs an LLM endpoint")?;
    }

    println!("Scoring {} questions from {}", dataset.len(), dataset.name);
    let start = Instant::now();

    let mut session = EvaluationSession::from_config(&dataset.name, &config)
        .context("Failed to set up scorers")?;
    println!(
        "  Semantic layer: {}",
        if session.semantic_enabled() { "on" } else { "off" }
    );

    let ledger = EvaluationLedger::open(&config.ledger.dir);
    if !options.fresh {
        let restored = session
            .restore_judges(&ledger)
            .context("Failed to read stored judge results")?;
        if restored > 0 {
            println!("  Judge results restored from ledger: {}", restored);
        }
    }

    if let Some(dir) = &options.judge_dir {
        let loaded = load_judge_dir(&mut session, &dataset.items, dir, options.force)?;
        println!("  Judge outputs loaded: {}", loaded);
    }

    if options.auto_judge {
        let judge = LlmJudge::from_config(config.llm.clone());
        println!("  Judging with model: {}", config.llm.model);
        let summary = runtime()?.block_on(session.judge_all(&judge, &dataset.items));
        println!(
            "  Judge calls: {} judged, {} rejected, {} failed",
            summary.judged, summary.rejected, summary.failed
        );
    }

    let evaluations = session.evaluate_all(&dataset.items);
    let records = session.build_records(&dataset.items, &evaluations);

    if options.verbose {
        print_details(&records, &evaluations);
    }

    println!();
    println!("{}", "─".repeat(60));
    println!("{}", SessionSummary::from_records(&records));
    println!("{}", "─".repeat(60));
    println!("Scored in {:.2?}", start.elapsed());

    if let Some(output) = &options.output {
        let rows = report::export_csv(&records, output).context("Failed to write report")?;
        println!("Report: {} ({} rows)", output.display(), rows);
    }

    if options.save {
        let judge_rows = session.judge_rows(&dataset.items);
        session
            .persist(&ledger, records, &judge_rows)
            .context("Failed to save results")?;
        println!("Saved to ledger: {}", ledger.history_path().display());
    }

    Ok(())
}

fn print_details(records: &[EvaluationRecord], evaluations: &[ItemEvaluation]) {
    for (record, evaluation) in records.iter().zip(evaluations) {
        println!();
        println!("Q{}: {}", record.question_id, record.question_text);
        println!("  Keywords: {}", evaluation.answers.original.keywords.joined());
        for version in AnswerVersion::ALL {
            let scores = record.scores.get(version);
            let answer = evaluation.answers.get(version);
            println!(
                "  {:<9} final {:>6.2} | keyword {:>6.2} scope {:>6.2} ({})",
                version.as_str(),
                scores.final_score,
                scores.keyword_score,
                scores.scope_score,
                answer.scope.description()
            );
            if !answer.coverage.missing.is_empty() {
                println!("            missing: {}", answer.coverage.missing.join(", "));
            }
            for flag in &scores.flags {
                println!("            flag: {}", flag);
            }
            if let Some(semantic) = &answer.semantic {
                for (sentence, score) in &semantic.detail.sentence_breakdown {
                    println!("            {:>6.2}  {}", score, sentence);
                }
            }
        }
        println!("  Improvement: {:+.2}", record.improvement());
    }
}

/// Attach judge outputs saved as `q{id}_{version}.json` or `.txt`.
fn load_judge_dir(
    session: &mut EvaluationSession,
    items: &[DatasetItem],
    dir: &Path,
    force: bool,
) -> Result<usize> {
    if !dir.is_dir() {
        anyhow::bail!("Judge directory '{}' does not exist", dir.display());
    }

    let mut loaded = 0;
    for item in items {
        for version in AnswerVersion::ALL {
            let Some(path) = ["json", "txt"]
                .iter()
                .map(|ext| dir.join(format!("q{}_{}.{}", item.question_id(), version, ext)))
                .find(|path| path.is_file())
            else {
                continue;
            };

            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            match session.attach_judge_text(item.question_id(), version, &text, force) {
                JudgeIngest::Accepted(_) => loaded += 1,
                JudgeIngest::Rejected(report) => {
                    warn!(path = %path.display(), errors = %report.error_summary(), "Skipped judge output")
                }
                JudgeIngest::Unparsable(failure) => {
                    warn!(path = %path.display(), reason = %failure.reason, "Skipped judge output")
                }
            }
        }
    }
    Ok(loaded)
}

fn cmd_discover(dir: &Path) -> Result<()> {
    let files = discover_datasets(dir).context("Failed to search for datasets")?;
    if files.is_empty() {
        println!("No CSV files under {}", dir.display());
        return Ok(());
    }

    println!("Datasets under {}:", dir.display());
    for path in files {
        match Dataset::load_csv(&path) {
            Ok(dataset) => println!("  {} ({} questions)", path.display(), dataset.len()),
            Err(e) => println!("  {} (unusable: {})", path.display(), e),
        }
    }
    Ok(())
}

fn cmd_prompt(
    dataset_path: &Path,
    question_id: Option<i64>,
    version: AnswerVersion,
    compare: bool,
    out: Option<PathBuf>,
    batch: Option<usize>,
) -> Result<()> {
    let dataset = Dataset::load_csv(dataset_path).context("Failed to load dataset")?;

    let render = |item: &DatasetItem| {
        if compare {
            Prompts::render_judge_comparison(
                &item.reference,
                item.answer(AnswerVersion::Original),
                item.answer(AnswerVersion::Optimized),
            )
        } else {
            Prompts::render_judge_answer(&item.reference, item.answer(version), version)
        }
    };

    let items: Vec<&DatasetItem> = match question_id {
        Some(id) => vec![
            dataset
                .get(id)
                .with_context(|| format!("Question {} is not in {}", id, dataset.name))?,
        ],
        None => dataset.items.iter().collect(),
    };

    let Some(out) = out else {
        for item in items {
            println!("{}\n", render(item));
        }
        return Ok(());
    };

    fs::create_dir_all(&out)
        .with_context(|| format!("Failed to create '{}'", out.display()))?;

    let files: Vec<(String, String)> = match batch {
        Some(per_batch) if !compare => {
            let per_batch = if per_batch == 0 { DEFAULT_BATCH_SIZE } else { per_batch };
            Prompts::render_batches(
                items.iter().map(|item| (&item.reference, item.answer(version))),
                version,
                per_batch,
            )
            .into_iter()
            .enumerate()
            .map(|(i, text)| (format!("prompt_batch{}_{}.txt", i + 1, version), text))
            .collect()
        }
        _ => items
            .iter()
            .map(|item| {
                let name = if compare {
                    format!("prompt_q{}_compare.txt", item.question_id())
                } else {
                    format!("prompt_q{}_{}.txt", item.question_id(), version)
                };
                (name, render(item))
            })
            .collect(),
    };

    for (name, text) in &files {
        let path = out.join(name);
        fs::write(&path, text).with_context(|| format!("Failed to write '{}'", path.display()))?;
    }
    println!("Wrote {} prompt files to {}", files.len(), out.display());
    Ok(())
}

struct JudgeOptions {
    file: PathBuf,
    question_id: Option<i64>,
    version: AnswerVersion,
    compare: bool,
    tolerance: Option<f64>,
    json: bool,
    dataset: Option<PathBuf>,
    force: bool,
    strict: bool,
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn print_report(label: &str, report: &ValidationReport) {
    if report.is_clean() {
        println!("{}: valid", label);
        return;
    }
    println!(
        "{}: {} errors, {} warnings",
        label,
        report.errors.len(),
        report.warnings.len()
    );
    for finding in &report.errors {
        println!("  error:   {}", finding);
    }
    for finding in &report.warnings {
        println!("  warning: {}", finding);
    }
}

fn print_record(record: &JudgeRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }
    for (dim, block) in &record.dimensions {
        match block.score {
            Some(score) => println!("  {:<13} {:>6.2}", dim.key(), score),
            None => println!("  {:<13} {:>6}", dim.key(), "-"),
        }
    }
    if let Some(overall) = record.overall {
        let note = if record.overall_derived { " (derived)" } else { "" };
        println!("  {:<13} {:>6.2}{}", "overall", overall, note);
    }
    Ok(())
}

fn cmd_judge(config: &Config, options: JudgeOptions) -> Result<()> {
    let text = read_input(&options.file)?;
    let tolerance = options
        .tolerance
        .unwrap_or(config.scoring.overall_tolerance);
    let validation = ValidationConfig::with_tolerance(tolerance)
        .strict(options.strict || config.scoring.strict_validation);

    if options.compare {
        let comparison = parse_comparison_text(&text)
            .map_err(|failure| anyhow::anyhow!("Unparsable comparison: {}", failure.reason))?;
        for record in [&comparison.original, &comparison.optimized] {
            let label = record.version.map_or("unknown", |v| v.as_str());
            print_report(label, &validate(record, &validation));
            print_record(record, options.json)?;
        }
        if let Some(better) = comparison.better_version {
            println!("Better version: {}", better);
        }
        if let Some(improvement) = comparison.improvement {
            println!("Reported improvement: {:+.2}", improvement);
        }
        return Ok(());
    }

    let mut record = parse_judge_text(&text)
        .map_err(|failure| anyhow::anyhow!("Unparsable judge output: {}", failure.reason))?;
    let question_id = options.question_id.or(record.question_id);
    if let Some(id) = question_id {
        record.assign(id, options.version);
    }

    let report = validate(&record, &validation);
    print_report("Judge output", &report);
    print_record(&record, options.json)?;

    if report.blocks_persistence(options.force) {
        anyhow::bail!(
            "Judge output failed validation: {}",
            report.error_summary()
        );
    }

    let Some(dataset_path) = options.dataset else {
        return Ok(());
    };
    let Some(question_id) = question_id else {
        anyhow::bail!("--question-id is required to store a judge output");
    };

    let dataset = Dataset::load_csv(&dataset_path).context("Failed to load dataset")?;
    if dataset.get(question_id).is_none() {
        anyhow::bail!("Question {} is not in {}", question_id, dataset.name);
    }
    let mut session = EvaluationSession::new(
        &dataset.name,
        &config.scoring,
        Default::default(),
    );
    let ledger = EvaluationLedger::open(&config.ledger.dir);
    session
        .restore_judges(&ledger)
        .context("Failed to read stored judge results")?;
    if session.judge_record(question_id, options.version).is_some() {
        println!(
            "Replacing the stored judge result for Q{} {}",
            question_id, options.version
        );
    }
    if !session.attach_judge_record(record, options.force).is_accepted() {
        anyhow::bail!("Judge output was not accepted");
    }

    let rows = session.judge_rows(&dataset.items);
    ledger
        .append_judge_rows(&rows)
        .context("Failed to write judge table")?;
    println!(
        "Appended {} rows to {}",
        rows.len(),
        ledger.judge_table_path().display()
    );
    println!(
        "Judged answers on record for {}: {}",
        dataset.name,
        session.judge_count()
    );
    Ok(())
}

fn cmd_history(config: &Config, action: HistoryAction) -> Result<()> {
    let ledger = EvaluationLedger::open(&config.ledger.dir);

    match action {
        HistoryAction::Stats => {
            let stats = ledger.statistics().context("Failed to read ledger")?;
            println!("Ledger: {}", ledger.history_path().display());
            println!("{}", "─".repeat(40));
            println!("{}", stats);
        }
        HistoryAction::List { file, latest } => {
            let mut records = match &file {
                Some(file) => ledger.query_by_file(file),
                None => ledger.load_all(),
            }
            .context("Failed to read ledger")?;
            if latest {
                records = rag_scorecard::ledger::latest_per_question(records);
            }

            if records.is_empty() {
                println!("No evaluations recorded.");
                return Ok(());
            }
            for record in &records {
                println!(
                    "{}  {:<24} Q{:<4} {:>6.2} -> {:>6.2} ({:+.2})",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.source_file,
                    record.question_id,
                    record.scores.original.final_score,
                    record.scores.optimized.final_score,
                    record.improvement()
                );
            }
            println!("{} records", records.len());
        }
        HistoryAction::Export { output, latest } => {
            let records = if latest {
                ledger.latest_per_question()
            } else {
                ledger.load_all()
            }
            .context("Failed to read ledger")?;
            let rows = report::export_csv(&records, &output).context("Failed to export")?;
            println!("Exported {} rows to {}", rows, output.display());
        }
        HistoryAction::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to clear the ledger without --yes");
            }
            ledger.clear().context("Failed to clear ledger")?;
            info!(dir = %config.ledger.dir.display(), "Ledger cleared");
            println!("Ledger cleared.");
        }
    }

    Ok(())
}

fn cmd_test(config: &Config) -> Result<()> {
    println!("Testing connections...\n");

    println!("Judge:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    println!(
        "  API Key:   {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );

    match config.validate_llm() {
        Err(e) => println!("  Configuration error: {}", e),
        Ok(()) => {
            let judge = LlmJudge::from_config(config.llm.clone());
            match runtime()?.block_on(judge.test_connection()) {
                Ok(()) => println!("  Connection successful!"),
                Err(e) => println!("  Connection failed: {}", e),
            }
        }
    }

    println!("\nEmbeddings:");
    match build_embedder(&config.embedding) {
        Ok(None) => println!("  Semantic layer disabled."),
        Ok(Some(embedder)) => match embedder.embed("connection test") {
            Ok(vector) => println!("  {} ok ({} dimensions)", embedder.name(), vector.len()),
            Err(e) => println!("  {} failed: {}", embedder.name(), e),
        },
        Err(e) => println!("  Configuration error: {}", e),
    }

    Ok(())
}
