// SPDX-License-Identifier: MIT

//! Arquivista CLI: scan, plan, execute.
//!
//! Plans are reviewable artifacts; execution is dry-run unless
//! `--apply` is given. Exit codes: 0 success, 1 any failed item,
//! 2 configuration or plan-file error.

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use arquivista::config::AppConfig;
use arquivista::executor::Executor;
use arquivista::extractor::Extractor;
use arquivista::llm::backend::{GeminiBackend, LlmBackend, OllamaBackend, OpenAiBackend};
use arquivista::llm::LlmClassifier;
use arquivista::model::{Category, ExecMode, ExecStatus, Plan};
use arquivista::pipeline;
use arquivista::planner::Planner;
use arquivista::rules::RuleEngine;
use arquivista::scanner::Scanner;
use arquivista::{ArquivistaError, Result};

const EXIT_OK: u8 = 0;
const EXIT_FAILED_ITEMS: u8 = 1;
const EXIT_CONFIG: u8 = 2;

/// Arquivista CLI arguments
#[derive(Parser, Debug)]
#[command(name = "arquivista")]
#[command(version = "1.0.0")]
#[command(about = "Local-first AI file organizer", long_about = None)]
#[command(group(ArgGroup::new("backend").args(["local", "gemini", "openai", "rules_only"])))]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "arquivista.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use the local Ollama backend
    #[arg(long, global = true)]
    local: bool,

    /// Use the Google Gemini API
    #[arg(long, global = true)]
    gemini: bool,

    /// Use the OpenAI API
    #[arg(long, global = true)]
    openai: bool,

    /// Classify with rules only, no LLM
    #[arg(long = "rules-only", global = true)]
    rules_only: bool,

    /// Model name override for the selected backend
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print backend and configuration status
    Info,

    /// Scan a directory and print statistics
    Scan {
        /// Root directory to scan
        dir: PathBuf,
    },

    /// Generate an execution plan for a directory
    Plan {
        /// Root directory to organize
        dir: PathBuf,

        /// Base root for destinations (overrides config)
        #[arg(long)]
        destination: Option<PathBuf>,

        /// Rules file (overrides config)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Emit COPY actions instead of MOVE
        #[arg(long)]
        copy: bool,

        /// Confidence gate for non-inbox destinations
        #[arg(long)]
        min_confidence: Option<u8>,
    },

    /// Execute a persisted plan (dry-run unless --apply)
    Execute {
        /// Plan file produced by `plan`
        plan_file: PathBuf,

        /// Perform real filesystem operations
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendChoice {
    Local,
    Gemini,
    OpenAi,
    RulesOnly,
}

impl BackendChoice {
    fn label(&self) -> &'static str {
        match self {
            BackendChoice::Local => "local (ollama)",
            BackendChoice::Gemini => "gemini",
            BackendChoice::OpenAi => "openai",
            BackendChoice::RulesOnly => "rules-only",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            let code = match e {
                ArquivistaError::Config(_)
                | ArquivistaError::Plan(_)
                | ArquivistaError::BackendUnavailable(_) => EXIT_CONFIG,
                _ => EXIT_FAILED_ITEMS,
            };
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = AppConfig::load(&cli.config)?;

    match &cli.command {
        Command::Info => cmd_info(&cli, &config).await,
        Command::Scan { dir } => cmd_scan(&config, dir),
        Command::Plan {
            dir,
            destination,
            rules,
            copy,
            min_confidence,
        } => {
            cmd_plan(
                &cli,
                config,
                dir.clone(),
                destination.clone(),
                rules.clone(),
                *copy,
                *min_confidence,
            )
            .await
        }
        Command::Execute { plan_file, apply } => cmd_execute(&config, plan_file, *apply),
    }
}

async fn cmd_info(cli: &Cli, config: &AppConfig) -> Result<u8> {
    println!("arquivista {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Base root:  {}", config.base_root.display());
    println!("Plans dir:  {}", config.plans_dir.display());
    println!("Logs dir:   {}", config.logs_dir.display());
    println!("Rules file: {}", config.rules_path.display());

    match RuleEngine::from_yaml_file(&config.rules_path) {
        Ok(engine) => println!("Rules:      {} loaded", engine.rule_count()),
        Err(e) => println!("Rules:      unavailable ({e})"),
    }

    println!();
    println!("Categories:");
    for category in Category::ALL {
        println!("  {category}");
    }

    println!();
    let ollama = OllamaBackend::new(
        &config.llm.ollama.base_url,
        &config.llm.ollama.model,
        Duration::from_secs(config.llm.request_timeout_secs),
    )?;
    match ollama.health_check().await {
        Ok(()) => println!(
            "Ollama:     available at {} (model {})",
            config.llm.ollama.base_url, config.llm.ollama.model
        ),
        Err(e) => println!("Ollama:     unavailable ({e})"),
    }
    println!(
        "Gemini:     GOOGLE_API_KEY {}",
        if std::env::var("GOOGLE_API_KEY").is_ok() {
            "set"
        } else {
            "not set"
        }
    );
    println!(
        "OpenAI:     OPENAI_API_KEY {}",
        if std::env::var("OPENAI_API_KEY").is_ok() {
            "set"
        } else {
            "not set"
        }
    );

    let choice = resolve_backend(cli, config).await;
    println!();
    println!("Selected backend: {}", choice.label());

    Ok(EXIT_OK)
}

fn cmd_scan(config: &AppConfig, dir: &PathBuf) -> Result<u8> {
    let scanner = Scanner::new(&config.scanner);

    let mut iter = match scanner.scan(dir) {
        Ok(iter) => iter,
        Err(e) => {
            error!("cannot scan {}: {e}", dir.display());
            return Ok(EXIT_CONFIG);
        }
    };

    let mut by_extension = std::collections::BTreeMap::<String, u64>::new();
    for record in iter.by_ref() {
        *by_extension.entry(record.extension).or_insert(0) += 1;
    }
    let stats = iter.into_stats();

    println!("Scanned {}:", dir.display());
    println!("  Files:               {}", stats.files_scanned);
    println!("  Excluded:            {}", stats.files_excluded);
    println!("  Directories skipped: {}", stats.directories_skipped);
    println!("  Total bytes:         {}", stats.total_size_bytes);

    if !by_extension.is_empty() {
        println!("  By extension:");
        for (extension, count) in by_extension {
            let label = if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            };
            println!("    {label}: {count}");
        }
    }

    Ok(EXIT_OK)
}

async fn cmd_plan(
    cli: &Cli,
    mut config: AppConfig,
    dir: PathBuf,
    destination: Option<PathBuf>,
    rules: Option<PathBuf>,
    copy: bool,
    min_confidence: Option<u8>,
) -> Result<u8> {
    if let Some(destination) = destination {
        config.base_root = destination;
    }
    if let Some(rules) = rules {
        config.rules_path = rules;
    }
    if let Some(min_confidence) = min_confidence {
        config.planner.min_confidence = min_confidence;
    }

    let rules = Arc::new(RuleEngine::from_yaml_file(&config.rules_path)?);
    info!("loaded {} rules from {}", rules.rule_count(), config.rules_path.display());

    let choice = resolve_backend(cli, &config).await;
    info!("classifying with backend: {}", choice.label());

    let classifier = build_classifier(choice, &config, cli.model.as_deref())?;
    if let Some(classifier) = &classifier {
        // One health probe per run; an unreachable backend is fatal
        // before any scanning starts.
        classifier.ensure_healthy().await?;
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, draining pipeline");
            ctrl_c_cancel.cancel();
        }
    });

    if let Some(secs) = config.run_deadline_secs {
        let deadline_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("run deadline reached, draining pipeline");
            deadline_cancel.cancel();
        });
    }

    let output = pipeline::run(
        vec![dir],
        Scanner::new(&config.scanner),
        Arc::new(Extractor::new(&config.extractor)),
        Arc::clone(&rules),
        classifier.map(Arc::new),
        Duration::from_secs(config.file_timeout_secs),
        cancel,
    )
    .await?;

    let planner = Planner::new(
        config.base_root.clone(),
        config.plans_dir.clone(),
        config.planner.min_confidence,
        copy,
    );
    let plan = planner.build_plan(output.pairs)?;
    let (json_path, md_path) =
        planner.write_artifacts(&plan, Some(&output.scan_stats), &output.rule_hits)?;

    println!("Plan {} generated:", plan.id);
    println!("  MOVE:   {}", plan.counts.moves);
    println!("  COPY:   {}", plan.counts.copies);
    println!("  RENAME: {}", plan.counts.renames);
    println!("  SKIP:   {}", plan.counts.skips);
    println!("  Machine plan: {}", json_path.display());
    println!("  Review plan:  {}", md_path.display());
    println!();
    println!("Review the plan, then run:");
    println!("  arquivista execute {} --apply", json_path.display());

    Ok(EXIT_OK)
}

fn cmd_execute(config: &AppConfig, plan_file: &PathBuf, apply: bool) -> Result<u8> {
    let plan = Plan::load(plan_file)?;

    let mode = if apply { ExecMode::Apply } else { ExecMode::DryRun };
    if mode == ExecMode::DryRun {
        info!("dry-run mode: no filesystem mutation (use --apply to execute)");
    }

    let deadline = config
        .run_deadline_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let executor = Executor::new(mode, config.logs_dir.clone()).with_deadline(deadline);
    let (manifest, manifest_path) = executor.execute(&plan)?;

    println!("Executed plan {} ({} items):", plan.id, plan.items.len());
    println!("  applied: {}", manifest.count(ExecStatus::Applied));
    println!("  dry-run: {}", manifest.count(ExecStatus::DryRun));
    println!("  skipped: {}", manifest.count(ExecStatus::Skipped));
    println!("  failed:  {}", manifest.count(ExecStatus::Failed));
    println!("  Manifest: {}", manifest_path.display());

    Ok(if manifest.any_failed() {
        EXIT_FAILED_ITEMS
    } else {
        EXIT_OK
    })
}

/// Explicit selector, or auto-detection: healthy Ollama, then a
/// Gemini key, then an OpenAI key, then rules-only.
async fn resolve_backend(cli: &Cli, config: &AppConfig) -> BackendChoice {
    if cli.local {
        return BackendChoice::Local;
    }
    if cli.gemini {
        return BackendChoice::Gemini;
    }
    if cli.openai {
        return BackendChoice::OpenAi;
    }
    if cli.rules_only {
        return BackendChoice::RulesOnly;
    }

    if let Ok(ollama) = OllamaBackend::new(
        &config.llm.ollama.base_url,
        &config.llm.ollama.model,
        Duration::from_secs(config.llm.request_timeout_secs),
    ) {
        if ollama.health_check().await.is_ok() {
            return BackendChoice::Local;
        }
    }
    if std::env::var("GOOGLE_API_KEY").is_ok() {
        return BackendChoice::Gemini;
    }
    if std::env::var("OPENAI_API_KEY").is_ok() {
        return BackendChoice::OpenAi;
    }
    BackendChoice::RulesOnly
}

fn build_classifier(
    choice: BackendChoice,
    config: &AppConfig,
    model_override: Option<&str>,
) -> Result<Option<LlmClassifier>> {
    let timeout = Duration::from_secs(config.llm.request_timeout_secs);

    let backend: Arc<dyn LlmBackend> = match choice {
        BackendChoice::RulesOnly => return Ok(None),
        BackendChoice::Local => {
            let model = model_override.unwrap_or(&config.llm.ollama.model);
            Arc::new(OllamaBackend::new(
                &config.llm.ollama.base_url,
                model,
                timeout,
            )?)
        }
        BackendChoice::Gemini => {
            let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
                ArquivistaError::Config("GOOGLE_API_KEY not set for --gemini".to_string())
            })?;
            let model = model_override.unwrap_or(&config.llm.gemini.model);
            Arc::new(GeminiBackend::new(&api_key, model, timeout)?)
        }
        BackendChoice::OpenAi => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                ArquivistaError::Config("OPENAI_API_KEY not set for --openai".to_string())
            })?;
            let model = model_override.unwrap_or(&config.llm.openai.model);
            Arc::new(OpenAiBackend::new(&api_key, model, timeout)?)
        }
    };

    Ok(Some(LlmClassifier::new(backend, &config.llm)))
}
