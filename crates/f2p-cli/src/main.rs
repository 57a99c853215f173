//! f2p - Fail2Pass evaluation engine CLI
//!
//! ## Commands
//!
//! - `run`: evaluate a batch of instance descriptors
//! - `sanitize`: strip credentials from an environment recipe
//! - `parse`: turn a test-runner log into an outcome map
//! - `classify`: label before/after outcome maps

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use f2p_core::{
    build_outcome_map, classify, ExecutionResult, InstanceDescriptor, OutcomeMap, ParseFailure,
    Phase, RunnerKind, TestPartition, TransitionLabel,
};
use f2p_env::{sanitize_recipe, SecretPolicy};
use f2p_eval::{BackendKind, EngineConfig, RunOrchestrator, RunOutput};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "f2p")]
#[command(author = "Stevedores Org")]
#[command(version = f2p_core::VERSION)]
#[command(about = "Fail2Pass patch evaluation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate instance descriptors (JSON array or JSON lines)
    Run {
        /// Descriptor file
        #[arg(short, long)]
        instances: PathBuf,

        /// Parent directory for run artifacts (default: .f2p/runs)
        #[arg(short, long, env = "F2P_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        /// Maximum number of instances evaluated at once
        #[arg(short = 'j', long, env = "F2P_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Environment backend: docker or local
        #[arg(long, env = "F2P_BACKEND")]
        backend: Option<BackendKind>,

        /// Run id (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Environment build deadline in seconds
        #[arg(long, env = "F2P_BUILD_TIMEOUT")]
        build_timeout: Option<u64>,

        /// Patch apply deadline in seconds
        #[arg(long, env = "F2P_APPLY_TIMEOUT")]
        apply_timeout: Option<u64>,

        /// Extra variable name to treat as a secret (repeatable)
        #[arg(long = "secret-name")]
        secret_names: Vec<String>,
    },

    /// Print a recipe with credential-bearing lines removed
    Sanitize {
        /// Recipe file (Dockerfile or provisioning script)
        recipe: PathBuf,

        /// Extra variable name to treat as a secret (repeatable)
        #[arg(long = "secret-name")]
        secret_names: Vec<String>,
    },

    /// Parse a test-runner log into an outcome map
    Parse {
        /// Runner that produced the log: pytest, cargo or go
        #[arg(short, long)]
        runner: RunnerKind,

        /// Log file
        log: PathBuf,

        /// Expected test identifier (repeatable)
        #[arg(long = "target")]
        targets: Vec<String>,
    },

    /// Classify before/after outcome maps
    Classify {
        /// Outcome map JSON before the patch
        #[arg(long)]
        before: PathBuf,

        /// Outcome map JSON after the patch
        #[arg(long)]
        after: PathBuf,

        /// Selector for a test expected to go from fail to pass (repeatable)
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Selector for a test expected to keep passing (repeatable)
        #[arg(long = "guard")]
        guards: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    f2p_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            instances,
            output_dir,
            concurrency,
            backend,
            run_id,
            build_timeout,
            apply_timeout,
            secret_names,
        } => {
            let mut config = EngineConfig::from_env().context("invalid F2P_* configuration")?;
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(n) = concurrency {
                config.concurrency = n;
            }
            if let Some(kind) = backend {
                config.backend = kind;
            }
            if let Some(secs) = build_timeout {
                config.build_timeout_secs = secs;
            }
            if let Some(secs) = apply_timeout {
                config.apply_timeout_secs = secs;
            }
            config.secret_names.extend(secret_names);
            cmd_run(config, &instances, run_id).await
        }
        Commands::Sanitize {
            recipe,
            secret_names,
        } => cmd_sanitize(&recipe, &secret_names),
        Commands::Parse {
            runner,
            log,
            targets,
        } => cmd_parse(runner, &log, &targets),
        Commands::Classify {
            before,
            after,
            targets,
            guards,
        } => cmd_classify(&before, &after, targets, guards),
    }
}

/// Accept either a JSON array or one descriptor per line.
fn parse_descriptors(text: &str) -> Result<Vec<InstanceDescriptor>> {
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(text).context("invalid descriptor array");
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<InstanceDescriptor>(line)
                .with_context(|| format!("invalid descriptor on line {}", i + 1))
        })
        .collect()
}

fn load_descriptors(path: &Path) -> Result<Vec<InstanceDescriptor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_descriptors(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn read_outcome_map(path: &Path) -> Result<OutcomeMap> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not an outcome map", path.display()))
}

async fn cmd_run(config: EngineConfig, instances: &Path, run_id: Option<String>) -> Result<()> {
    let descriptors = load_descriptors(instances)?;
    info!(
        instances = descriptors.len(),
        backend = %config.backend,
        concurrency = config.effective_concurrency(),
        "loaded instance descriptors"
    );

    let orchestrator = RunOrchestrator::new(config);
    let output = orchestrator
        .run(descriptors, run_id)
        .await
        .context("evaluation run failed")?;

    print_summary(&output);
    Ok(())
}

fn print_summary(output: &RunOutput) {
    let report = &output.report;
    println!("Run ID: {}", report.run_id);
    println!("Artifacts: {}", output.root.display());
    println!();

    let width = report
        .instances
        .iter()
        .map(|r| r.instance_id.len())
        .max()
        .unwrap_or(0)
        .max("INSTANCE".len());
    println!(
        "  {:<width$}  {:<9}  {:<9}  {:<9}  ERRORS",
        "INSTANCE", "VERDICT", "BUILD", "APPLY"
    );
    for instance in &report.instances {
        let errors: Vec<&str> = instance.errors.iter().map(|e| e.kind.as_str()).collect();
        println!(
            "  {:<width$}  {:<9}  {:<9}  {:<9}  {}",
            instance.instance_id,
            instance.verdict.as_str(),
            format!("{:?}", instance.build.status).to_lowercase(),
            format!("{:?}", instance.apply.status).to_lowercase(),
            errors.join(",")
        );
    }

    println!();
    let counts: Vec<String> = TransitionLabel::ALL
        .iter()
        .map(|label| format!("{}={}", label.as_str(), report.summary.count(*label)))
        .collect();
    println!("Summary: {} instances, {}", report.summary.total, counts.join(" "));
}

fn cmd_sanitize(recipe: &Path, secret_names: &[String]) -> Result<()> {
    let text = std::fs::read_to_string(recipe)
        .with_context(|| format!("failed to read {}", recipe.display()))?;
    let sanitized = sanitize_recipe(&text, &SecretPolicy::with_extra(secret_names));

    print!("{}", sanitized.text);
    for redaction in &sanitized.redactions {
        eprintln!(
            "redacted line {}: {}",
            redaction.line,
            redaction.names.join(", ")
        );
    }
    if !sanitized.redactions.is_empty() {
        warn!(lines = sanitized.redactions.len(), "recipe contained credentials");
    }
    Ok(())
}

#[derive(Serialize)]
struct ParseOutput {
    outcomes: OutcomeMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_failure: Option<ParseFailure>,
}

fn cmd_parse(runner: RunnerKind, log: &Path, targets: &[String]) -> Result<()> {
    let stdout = std::fs::read_to_string(log)
        .with_context(|| format!("failed to read {}", log.display()))?;
    let result = ExecutionResult {
        phase: Phase::Before,
        exit_code: None,
        stdout,
        stderr: String::new(),
        duration_ms: 0,
        timed_out: false,
    };
    let parsed = build_outcome_map(&result, runner, targets);
    let output = ParseOutput {
        outcomes: parsed.outcomes,
        parse_failure: parsed.parse_failure,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_classify(
    before: &Path,
    after: &Path,
    targets: Vec<String>,
    guards: Vec<String>,
) -> Result<()> {
    let before = read_outcome_map(before)?;
    let after = read_outcome_map(after)?;
    let classification = classify(&before, &after, &TestPartition::new(targets, guards))
        .context("classification failed")?;
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}
