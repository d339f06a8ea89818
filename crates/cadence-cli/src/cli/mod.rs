//! CLI argument definitions for Cadence.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Cadence CLI
#[derive(Parser, Debug)]
#[command(name = "cadence", version, about = "Cadence: tool-call orchestration for coding agents")]
pub struct Cli {
    /// Config file (defaults to ~/.cadence/config.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse an assistant message and print its segments as JSON
    Parse(InputArgs),
    /// Show the execution order and waves for a message's invocations
    Plan(InputArgs),
    /// Execute a message's invocations against a dry-run runner
    Run(RunArgs),
}

/// Message source shared by every subcommand.
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Message file, or `-` for stdin
    #[arg(value_name = "FILE|-", default_value = "-")]
    pub input: String,
}

/// Arguments for `cadence run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Upper bound on invocations in flight for parallel batches
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Keep going after a failed invocation
    #[arg(long)]
    pub continue_on_error: bool,

    /// Whole-run deadline in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Make every invocation of this tool fail (repeatable)
    #[arg(long = "fail", value_name = "TOOL")]
    pub fail: Vec<String>,

    /// Print engine events to stderr as JSON lines
    #[arg(long)]
    pub events: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["cadence", "parse"]).unwrap();
        match cli.command {
            Commands::Parse(args) => assert_eq!(args.input, "-"),
            other => panic!("expected Parse, got {other:?}"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn plan_takes_a_file() {
        let cli = Cli::try_parse_from(["cadence", "plan", "message.txt"]).unwrap();
        match cli.command {
            Commands::Plan(args) => assert_eq!(args.input, "message.txt"),
            other => panic!("expected Plan, got {other:?}"),
        }
    }

    #[test]
    fn run_with_all_flags() {
        let cli = Cli::try_parse_from([
            "cadence",
            "run",
            "--max-concurrency",
            "2",
            "--continue-on-error",
            "--timeout-ms",
            "5000",
            "--fail",
            "read_file",
            "--fail",
            "execute_command",
            "--events",
            "--config",
            "cadence.toml",
            "msg.txt",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cadence.toml")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input.input, "msg.txt");
                assert_eq!(args.max_concurrency, Some(2));
                assert!(args.continue_on_error);
                assert_eq!(args.timeout_ms, Some(5000));
                assert_eq!(args.fail, vec!["read_file", "execute_command"]);
                assert!(args.events);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["cadence", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input.input, "-");
                assert!(args.max_concurrency.is_none());
                assert!(!args.continue_on_error);
                assert!(args.fail.is_empty());
                assert!(!args.events);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }
}
