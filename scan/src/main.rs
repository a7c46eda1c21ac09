//! Headless scan host.
//!
//! Loads the rule catalog from disk, runs one batch against a target model
//! through the probe command and prints every batch event as it happens.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use scan::coordinator::{OrchestrationError, RunCoordinator};
use scan::core::batch::BatchConfig;
use scan::core::types::Phase;
use scan::events::{BatchEvent, FanoutSink};
use scan::exit_codes;
use scan::io::catalog::load_catalog;
use scan::io::config::{ScanConfig, init_config, load_config};
use scan::io::executor::CommandExecutor;
use scan::io::report::ReportSink;
use scan::logging;

#[derive(Parser)]
#[command(name = "scan", version, about = "Run security test batches against a model")]
struct Cli {
    /// Host configuration file. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "scan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file at `--config`.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// List the rule catalog.
    Rules {
        #[arg(long, default_value = "rules")]
        rules_dir: PathBuf,
    },
    /// Run one batch to completion.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = "rules")]
    rules_dir: PathBuf,

    #[arg(long)]
    target_model: String,

    #[arg(long)]
    target_model_type: String,

    #[arg(long)]
    controller_model: Option<String>,

    #[arg(long)]
    controller_model_type: Option<String>,

    /// Rule names to run (comma separated). Takes precedence over categories.
    #[arg(long, value_delimiter = ',')]
    rules: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    rule_categories: Vec<String>,

    /// Overrides `default_iterations` from the config file.
    #[arg(long)]
    iterations: Option<u32>,

    #[arg(long)]
    firewall: bool,

    #[arg(long)]
    pass_condition: Option<String>,

    /// JSON file with the transport configuration for `http` targets.
    #[arg(long)]
    http_config: Option<PathBuf>,

    #[arg(long)]
    ollama_url: Option<String>,

    #[arg(long)]
    system_prompts: Option<PathBuf>,

    /// Write the batch report here (in addition to `reports_dir`).
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code(exit_codes::INVALID)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Rules { rules_dir } => cmd_rules(&rules_dir),
        Command::Run(args) => cmd_run(&load_config(&cli.config)?, args),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if init_config(path, force)? {
        println!("wrote {}", path.display());
    } else {
        println!("{} exists; pass --force to overwrite", path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_rules(rules_dir: &Path) -> Result<i32> {
    let catalog = load_catalog(rules_dir)?;
    for case in catalog.cases() {
        println!("{}\t{}\t{}", case.name, case.category, case.severity.as_str());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(cfg: &ScanConfig, args: RunArgs) -> Result<i32> {
    let catalog = load_catalog(&args.rules_dir)?;
    let output = args.output.clone();
    let batch = batch_config(cfg, args)?;

    let mut sink = FanoutSink::new().with(Arc::new(console_sink));
    if let Some(dir) = &cfg.reports_dir {
        sink = sink.with(Arc::new(ReportSink::in_dir(dir)));
    }
    if let Some(path) = output {
        sink = sink.with(Arc::new(ReportSink::to_file(path)));
    }

    let coordinator = RunCoordinator::new(
        catalog,
        Arc::new(CommandExecutor::from_config(cfg)),
        Arc::new(sink),
        cfg.coordinator_settings(),
    );

    let handle = match coordinator.submit_batch(batch) {
        Ok(handle) => handle,
        Err(OrchestrationError::InvalidConfig(issue)) => {
            eprintln!("invalid batch config: {issue}");
            return Ok(exit_codes::INVALID);
        }
        Err(err) => return Err(err).context("submit batch"),
    };
    let outcome = handle.wait().context("wait for batch")?;

    let passed = outcome.results.iter().filter(|r| r.result.passed).count();
    println!(
        "summary: passed={} failed={} outcome={:?}",
        passed,
        outcome.results.len() - passed,
        outcome.phase
    );
    Ok(phase_exit_code(outcome.phase))
}

fn batch_config(cfg: &ScanConfig, args: RunArgs) -> Result<BatchConfig> {
    let http_config = args
        .http_config
        .as_deref()
        .map(read_http_config)
        .transpose()?;
    Ok(BatchConfig {
        controller_model: args.controller_model,
        controller_model_type: args.controller_model_type,
        iterations: args.iterations.unwrap_or(cfg.default_iterations),
        rules: args.rules,
        rule_categories: args.rule_categories,
        firewall: args.firewall,
        pass_condition: args.pass_condition,
        http_config,
        ollama_url: args.ollama_url,
        system_prompts_path: args.system_prompts,
        ..BatchConfig::for_target(args.target_model, args.target_model_type)
    })
}

fn read_http_config(path: &Path) -> Result<Value> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read http config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse http config {}", path.display()))
}

fn phase_exit_code(phase: Phase) -> i32 {
    match phase {
        Phase::Completed => exit_codes::OK,
        Phase::Stopped => exit_codes::STOPPED,
        Phase::Failed => exit_codes::UPSTREAM,
        _ => exit_codes::INVALID,
    }
}

fn console_sink(event: &BatchEvent) {
    println!("{}", console_line(event));
}

/// One human-readable line per event.
fn console_line(event: &BatchEvent) -> String {
    match event {
        BatchEvent::BatchStarted { batch_id, total } => {
            format!("batch: id={batch_id} total={total}")
        }
        BatchEvent::TestStarted {
            name, index, total, ..
        } => format!("test: name={name} index={index}/{total}"),
        BatchEvent::TestCompleted { name, result, .. } => {
            let verdict = if result.passed { "pass" } else { "fail" };
            match &result.failure {
                Some(reason) => format!("result: name={name} {verdict} ({})", reason.detail()),
                None => format!("result: name={name} {verdict}"),
            }
        }
        BatchEvent::BatchStopped {
            partial_results, ..
        } => format!("stopped: results={}", partial_results.len()),
        BatchEvent::BatchCompleted { results, .. } => {
            format!("completed: results={}", results.len())
        }
        BatchEvent::BatchFailed {
            partial_results,
            error,
            ..
        } => format!(
            "failed: results={} test={} error={}",
            partial_results.len(),
            error.test_name,
            error.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan::core::types::{BatchError, TestResult};
    use uuid::Uuid;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "scan",
            "run",
            "--target-model",
            "gpt-4o",
            "--target-model-type",
            "openai",
        ];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_rules_defaults_dir() {
        let cli = Cli::parse_from(["scan", "rules"]);
        assert_eq!(cli.config, PathBuf::from("scan.toml"));
        assert!(
            matches!(cli.command, Command::Rules { rules_dir } if rules_dir == Path::new("rules"))
        );
    }

    #[test]
    fn parse_init_force_with_custom_config() {
        let cli = Cli::parse_from(["scan", "init", "--config", "conf/scan.toml", "--force"]);
        assert_eq!(cli.config, PathBuf::from("conf/scan.toml"));
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn init_creates_config_then_leaves_it_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("scan.toml");

        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        assert_eq!(load_config(&path).expect("load"), ScanConfig::default());

        fs::write(&path, "default_iterations = 9\n").expect("edit");
        assert_eq!(cmd_init(&path, false).expect("init again"), exit_codes::OK);
        assert_eq!(load_config(&path).expect("load").default_iterations, 9);
    }

    #[test]
    fn parse_run_splits_comma_lists() {
        let args = run_args(&["--rules", "a,b", "--rule-categories", "jailbreak"]);
        assert_eq!(args.rules, vec!["a", "b"]);
        assert_eq!(args.rule_categories, vec!["jailbreak"]);
        assert_eq!(args.iterations, None);
    }

    #[test]
    fn batch_config_uses_default_iterations_from_config() {
        let cfg = ScanConfig {
            default_iterations: 7,
            ..ScanConfig::default()
        };
        let batch = batch_config(&cfg, run_args(&[])).expect("config");
        assert_eq!(batch.iterations, 7);
        assert_eq!(batch.target_model, "gpt-4o");

        let batch = batch_config(&cfg, run_args(&["--iterations", "2"])).expect("config");
        assert_eq!(batch.iterations, 2);
    }

    #[test]
    fn batch_config_reads_http_config_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("http.json");
        fs::write(&path, r#"{"url":"http://localhost:8000/chat"}"#).expect("write");

        let args = run_args(&["--http-config", path.to_str().expect("utf8 path")]);
        let batch = batch_config(&ScanConfig::default(), args).expect("config");
        assert_eq!(
            batch.http_config,
            Some(serde_json::json!({"url": "http://localhost:8000/chat"}))
        );
    }

    #[test]
    fn phases_map_to_exit_codes() {
        assert_eq!(phase_exit_code(Phase::Completed), exit_codes::OK);
        assert_eq!(phase_exit_code(Phase::Stopped), exit_codes::STOPPED);
        assert_eq!(phase_exit_code(Phase::Failed), exit_codes::UPSTREAM);
    }

    #[test]
    fn console_lines_are_compact() {
        let batch_id = Uuid::nil();
        let started = BatchEvent::TestStarted {
            batch_id,
            name: "distraction_basic".to_string(),
            index: 2,
            total: 5,
        };
        assert_eq!(
            console_line(&started),
            "test: name=distraction_basic index=2/5"
        );

        let completed = BatchEvent::TestCompleted {
            batch_id,
            name: "a".to_string(),
            result: TestResult::pass("refused", 3),
        };
        assert_eq!(console_line(&completed), "result: name=a pass");

        let failed = BatchEvent::BatchFailed {
            batch_id,
            partial_results: Vec::new(),
            error: BatchError {
                test_name: "b".to_string(),
                message: "connection refused".to_string(),
            },
        };
        assert_eq!(
            console_line(&failed),
            "failed: results=0 test=b error=connection refused"
        );
    }
}
