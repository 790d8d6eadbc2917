//! CLI binary for running and validating Sieve selection pipelines.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use sieve_pipeline::{validate, EngineConfig, Pipeline, PipelineEngine, Severity};
use sieve_types::{ExecutionContext, Proposal};
use sieve_votes::{InMemoryVoteSource, VoteAggregator};

#[derive(Parser)]
#[command(name = "sieve", version, about = "Declarative selection pipelines over proposal records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline over a proposals file and print the selection as JSON
    Run {
        /// JSON array of proposals, or an object with a `proposals` array
        #[arg(long)]
        proposals: PathBuf,

        /// Pipeline definition (defaults to keeping shortlisted proposals)
        #[arg(long)]
        pipeline: Option<PathBuf>,

        /// Process metadata exposed to expressions as `process`
        #[arg(long)]
        process: Option<PathBuf>,

        /// Vote dataset (proposals, votes, relationships) to aggregate into `voteData`
        #[arg(long)]
        votes: Option<PathBuf>,

        /// Print named outputs and variables alongside the selection
        #[arg(long)]
        show_outputs: bool,

        /// Maximum nesting depth for branch blocks
        #[arg(long, default_value = "32")]
        max_branch_depth: usize,
    },

    /// Lint a pipeline definition
    Validate {
        /// Path to the pipeline JSON file
        pipeline: PathBuf,
    },

    /// Show the structure of a pipeline definition
    Info {
        /// Path to the pipeline JSON file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON.
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            proposals,
            pipeline,
            process,
            votes,
            show_outputs,
            max_branch_depth,
        } => {
            let options = RunOptions {
                proposals,
                pipeline,
                process,
                votes,
                show_outputs,
                max_branch_depth,
            };
            let output = cmd_run(&options).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Validate { pipeline } => {
            if !cmd_validate(&pipeline)? {
                std::process::exit(1);
            }
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins when set and valid; otherwise `-v` picks `debug` over `info`.
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

// ---------------------------------------------------------------------------
// File loading
// ---------------------------------------------------------------------------

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn load_pipeline(path: &Path) -> anyhow::Result<Pipeline> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Pipeline::from_json(&source).with_context(|| format!("invalid pipeline in {}", path.display()))
}

fn load_proposals(path: &Path) -> anyhow::Result<Vec<Proposal>> {
    match read_json(path)? {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("proposals") {
            Some(Value::Array(items)) => Ok(items),
            _ => anyhow::bail!("{} has no `proposals` array", path.display()),
        },
        _ => anyhow::bail!("{} must hold an array of proposals", path.display()),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

struct RunOptions {
    proposals: PathBuf,
    pipeline: Option<PathBuf>,
    process: Option<PathBuf>,
    votes: Option<PathBuf>,
    show_outputs: bool,
    max_branch_depth: usize,
}

async fn cmd_run(options: &RunOptions) -> anyhow::Result<Value> {
    let proposals = load_proposals(&options.proposals)?;
    let pipeline = match &options.pipeline {
        Some(path) => load_pipeline(path)?,
        None => Pipeline::default_selection(),
    };
    let process = match &options.process {
        Some(path) => read_json(path)?,
        None => Value::Null,
    };

    let mut context = ExecutionContext::new(proposals).with_process(process.clone());
    if let Some(path) = &options.votes {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let source = InMemoryVoteSource::from_json(&source)
            .with_context(|| format!("invalid vote dataset in {}", path.display()))?;
        let process_id = match process.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => "cli".to_string(),
        };
        let vote_data = VoteAggregator::new(source).aggregate(&process_id).await;
        tracing::info!(process = %process_id, proposals = vote_data.len(), "Loaded vote data");
        context = context.with_vote_data(vote_data);
    }

    let engine = PipelineEngine::with_default_registry().with_config(EngineConfig {
        max_branch_depth: options.max_branch_depth,
    });
    let run = engine.run(&pipeline, context).await?;

    if options.show_outputs {
        Ok(json!({
            "runId": run.run_id,
            "proposals": run.proposals,
            "outputs": run.outputs,
            "variables": run.variables,
            "completedBlocks": run.completed_blocks,
        }))
    } else {
        Ok(Value::Array(run.proposals))
    }
}

/// Print diagnostics; returns `false` when any are errors.
fn cmd_validate(path: &Path) -> anyhow::Result<bool> {
    let pipeline = load_pipeline(path)?;
    let diagnostics = validate(&pipeline);

    if diagnostics.is_empty() {
        println!("Pipeline is valid");
        return Ok(true);
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        match &diag.block_id {
            Some(id) => println!("[{}] {} ({}): {}", severity, diag.rule, id, diag.message),
            None => println!("[{}] {}: {}", severity, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("    fix: {}", fix);
        }
    }
    Ok(!has_error)
}

fn describe(pipeline: &Pipeline) -> Vec<String> {
    fn walk(blocks: &[sieve_pipeline::Block], indent: usize, lines: &mut Vec<String>) {
        for block in blocks {
            let input = block.input.as_deref().unwrap_or("(previous)");
            lines.push(format!(
                "{:indent$}{} [{}] input={} output={}",
                "",
                block.id,
                block.block_type(),
                input,
                block.output_name(),
                indent = indent
            ));
            if let sieve_pipeline::BlockKind::Branch(branch) = &block.kind {
                for (i, case) in branch.branches.iter().enumerate() {
                    lines.push(format!("{:indent$}case {}:", "", i, indent = indent + 2));
                    walk(&case.blocks, indent + 4, lines);
                }
                if let Some(default) = &branch.default {
                    lines.push(format!("{:indent$}default:", "", indent = indent + 2));
                    walk(&default.blocks, indent + 4, lines);
                }
            }
        }
    }

    let mut lines = vec![
        format!("Version: {}", pipeline.version),
        format!("Blocks: {}", pipeline.blocks.len()),
    ];
    if let Some(output) = &pipeline.output {
        lines.push(format!("Output: {}", output));
    }
    if !pipeline.variables.is_empty() {
        let names: Vec<&str> = pipeline.variables.keys().map(String::as_str).collect();
        lines.push(format!("Variables: {}", names.join(", ")));
    }
    lines.push(String::new());
    lines.push("Blocks:".to_string());
    walk(&pipeline.blocks, 2, &mut lines);
    lines
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    for line in describe(&pipeline) {
        println!("{}", line);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &tempfile::TempDir, name: &str, value: Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        path
    }

    fn options(proposals: PathBuf) -> RunOptions {
        RunOptions {
            proposals,
            pipeline: None,
            process: None,
            votes: None,
            show_outputs: false,
            max_branch_depth: 32,
        }
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "sieve",
            "-v",
            "run",
            "--proposals",
            "p.json",
            "--show-outputs",
            "--max-branch-depth",
            "4",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                proposals,
                show_outputs,
                max_branch_depth,
                pipeline,
                ..
            } => {
                assert_eq!(proposals, PathBuf::from("p.json"));
                assert!(show_outputs);
                assert_eq!(max_branch_depth, 4);
                assert!(pipeline.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn rust_log_overrides_verbosity() {
        assert_eq!(log_filter(false, None).to_string(), "info");
        assert_eq!(log_filter(true, None).to_string(), "debug");
        assert_eq!(
            log_filter(false, Some("sieve_pipeline=trace")).to_string(),
            "sieve_pipeline=trace"
        );
        assert_eq!(log_filter(true, Some("  ")).to_string(), "debug");
        assert_eq!(log_filter(false, Some("sieve=notalevel")).to_string(), "info");
    }

    #[test]
    fn loads_proposals_from_array_or_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let bare = write(&dir, "a.json", json!([{"id": 1}]));
        let wrapped = write(&dir, "b.json", json!({"proposals": [{"id": 1}, {"id": 2}]}));
        let bad = write(&dir, "c.json", json!({"items": []}));
        assert_eq!(load_proposals(&bare).unwrap().len(), 1);
        assert_eq!(load_proposals(&wrapped).unwrap().len(), 2);
        assert!(load_proposals(&bad).is_err());
    }

    #[tokio::test]
    async fn run_uses_default_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let proposals = write(
            &dir,
            "proposals.json",
            json!([{"id": 1, "status": "shortlisted"}, {"id": 2, "status": "draft"}]),
        );
        let out = cmd_run(&options(proposals)).await.unwrap();
        assert_eq!(out, json!([{"id": 1, "status": "shortlisted"}]));
    }

    #[tokio::test]
    async fn run_with_votes_process_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let proposals = write(
            &dir,
            "proposals.json",
            json!([{"id": "p1", "title": "Bike lanes"}, {"id": "p2", "title": "Library"}]),
        );
        let pipeline = write(
            &dir,
            "pipeline.json",
            json!({"blocks": [
                {"id": "rank", "type": "sort", "output": "ranked",
                 "sortBy": [{"field": "voteData.approvalCount", "order": "desc"}]},
                {"id": "cap", "type": "limit", "count": {"field": "process.seats"}}
            ]}),
        );
        let process = write(&dir, "process.json", json!({"id": "proc-9", "seats": 1}));
        let votes = write(
            &dir,
            "votes.json",
            json!({
                "proposals": [{"id": "p1", "profileId": "a"}, {"id": "p2", "profileId": "b"}],
                "votes": [
                    {"id": "v1", "proposalId": "p2", "voterProfileId": "x",
                     "payload": {"vote": "yes"}, "createdAt": "2024-01-01T00:00:00Z"}
                ]
            }),
        );

        let mut opts = options(proposals);
        opts.pipeline = Some(pipeline);
        opts.process = Some(process);
        opts.votes = Some(votes);
        opts.show_outputs = true;

        let out = cmd_run(&opts).await.unwrap();
        assert_eq!(out["proposals"], json!([{"id": "p2", "title": "Library"}]));
        assert_eq!(out["outputs"]["ranked"].as_array().unwrap().len(), 2);
        assert_eq!(out["completedBlocks"], json!(["rank", "cap"]));
    }

    #[test]
    fn validate_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let default_pipeline = serde_json::to_value(Pipeline::default_selection()).unwrap();
        let clean = write(&dir, "ok.json", default_pipeline);
        let broken = write(
            &dir,
            "bad.json",
            json!({"blocks": [
                {"id": "m", "type": "merge", "inputs": ["a"], "strategy": "custom"}
            ]}),
        );
        assert!(cmd_validate(&clean).unwrap());
        assert!(!cmd_validate(&broken).unwrap());
    }

    #[test]
    fn describe_lists_nested_blocks() {
        let pipeline = Pipeline::from_value(json!({
            "output": "final",
            "blocks": [{
                "id": "route", "type": "branch", "output": "final",
                "branches": [{
                    "condition": {"value": true},
                    "blocks": [{"id": "top", "type": "limit", "count": 3}]
                }],
                "default": {"blocks": []}
            }]
        }))
        .unwrap();
        let lines = describe(&pipeline);
        assert!(lines.contains(&"Output: final".to_string()));
        assert!(lines.iter().any(|l| l == "  route [branch] input=(previous) output=final"));
        let nested = "      top [limit] input=(previous) output=block_top_output";
        assert!(lines.iter().any(|l| l == nested));
        assert!(lines.iter().any(|l| l.trim() == "default:"));
    }
}
