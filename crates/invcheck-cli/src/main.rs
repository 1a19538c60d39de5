//! invcheck CLI - Invariant-driven API correctness testing

mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use invcheck_core::config;
use invcheck_core::verdict::{EXIT_CONFIG, EXIT_OK};
use invcheck_core::{TestSpecification, VerdictPolicy};
use invcheck_runner::SequenceRunner;

#[derive(Parser)]
#[command(name = "invcheck")]
#[command(about = "Invariant-driven API correctness testing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "terminal")]
    output: OutputFormat,

    /// Strict mode (bug-demo steps that detect nothing fail the run)
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    strict: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test specification against its target
    Run {
        /// Specification file (.yaml, .yml, .json, .toml)
        spec: PathBuf,

        /// Write the full JSON report to this file
        #[arg(long)]
        report_file: Option<PathBuf>,

        /// Dump every request/response pair to JSONL files in this directory
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },

    /// Load and validate a specification without sending requests
    Validate {
        /// Specification file
        spec: PathBuf,
    },

    /// Write a starter specification
    Init {
        #[arg(default_value = "invcheck.yaml")]
        path: PathBuf,
    },

    /// Export JSON Schema for the report format
    Schema,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Terminal,
    Json,
    Silent,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(3)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            spec,
            report_file,
            dump_dir,
        } => {
            let Some(loaded) = load_spec(&spec) else {
                return Ok(EXIT_CONFIG);
            };
            if cli.output != OutputFormat::Silent {
                eprintln!("Spec:     {}", spec.display());
                eprintln!("  base_url: {}", loaded.base_url);
                eprintln!("  steps:    {}", loaded.steps.len());
                eprintln!();
            }

            let mut runner =
                SequenceRunner::from_spec(loaded).context("failed to build HTTP client")?;
            let report = runner.run();
            let policy = VerdictPolicy { strict: cli.strict };
            let verdict = policy.verdict(&report);

            match cli.output {
                OutputFormat::Terminal => println!("{}", render::terminal(&report, &verdict)),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&render::json(&report, &verdict))?
                ),
                OutputFormat::Silent => {}
            }

            if let Some(path) = report_file {
                let body = serde_json::to_string_pretty(&report)?;
                std::fs::write(&path, body)
                    .with_context(|| format!("failed to write report to {}", path.display()))?;
                if cli.output != OutputFormat::Silent {
                    eprintln!("Report saved: {}", path.display());
                }
            }

            if let Some(dir) = dump_dir {
                match invcheck_core::dump::write_dump(&report, &dir, true) {
                    Ok(index) => {
                        if cli.output != OutputFormat::Silent {
                            eprintln!(
                                "Dump: {} exchanges → {} ({} files)",
                                index.total,
                                dir.display(),
                                index.steps.len()
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "failed to write dump");
                    }
                }
            }

            Ok(verdict.exit_code)
        }

        Commands::Validate { spec } => {
            let Some(loaded) = load_spec(&spec) else {
                return Ok(EXIT_CONFIG);
            };
            if cli.output != OutputFormat::Silent {
                println!("{}: OK ({} steps)", spec.display(), loaded.steps.len());
                for step in &loaded.steps {
                    let mut modes = Vec::new();
                    if step.retry.is_some() {
                        modes.push("retry");
                    }
                    if step.fuzz.is_some() {
                        modes.push("fuzz");
                    }
                    let modes = if modes.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", modes.join(", "))
                    };
                    println!("  {} {}{modes}", step.id, step.label());
                }
            }
            Ok(EXIT_OK)
        }

        Commands::Init { path } => {
            if path.exists() {
                eprintln!("{} already exists", path.display());
                return Ok(1);
            }
            std::fs::write(&path, config::example())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Created {}", path.display());
            println!("\nEdit the file to configure:");
            println!("  - base_url: server to test");
            println!("  - snapshot: read endpoint exposing balances");
            println!("  - steps: requests, invariants, retry and fuzz modes");
            Ok(EXIT_OK)
        }

        Commands::Schema => {
            println!("{}", invcheck_core::report::generate_schema());
            Ok(EXIT_OK)
        }
    }
}

/// Load a specification, printing the problems when it is unusable.
fn load_spec(path: &Path) -> Option<TestSpecification> {
    match config::load(path) {
        Ok(spec) => {
            tracing::debug!(
                path = %path.display(),
                steps = spec.steps.len(),
                snapshot = spec.snapshot.is_some(),
                "specification loaded"
            );
            Some(spec)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("invcheck").chain(args.iter().copied()))
    }

    #[test]
    fn init_then_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.yaml");
        let path_str = path.to_str().unwrap();

        assert_eq!(run(cli(&["init", path_str])).unwrap(), EXIT_OK);
        assert!(path.exists());
        assert_eq!(run(cli(&["validate", path_str])).unwrap(), EXIT_OK);
        // refuses to overwrite
        assert_eq!(run(cli(&["init", path_str])).unwrap(), 1);
    }

    #[test]
    fn invalid_spec_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(
            &path,
            r#"{"base_url": "http://localhost:5000",
                "steps": [{"id": "t", "method": "POST", "path": "/transfer",
                           "invariants": ["balance_sane"]}]}"#,
        )
        .unwrap();
        let path_str = path.to_str().unwrap();

        assert_eq!(run(cli(&["validate", path_str])).unwrap(), EXIT_CONFIG);
        assert_eq!(run(cli(&["--output", "silent", "run", path_str])).unwrap(), EXIT_CONFIG);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert_eq!(
            run(cli(&["validate", "/nonexistent/invcheck.yaml"])).unwrap(),
            EXIT_CONFIG
        );
    }

    #[test]
    fn strict_flag_takes_a_value() {
        let parsed = cli(&["--strict", "false", "schema"]);
        assert!(!parsed.strict);
        assert!(cli(&["schema"]).strict);
    }
}
