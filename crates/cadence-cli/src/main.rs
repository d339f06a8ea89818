//! Cadence CLI binary entry point.

mod cli;
mod errors;

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use cadence::engine::{EngineEvent, EngineEventPayload};
use cadence::error::CadenceError;
use cadence::tools::{FnRunner, ToolRunner};
use cadence::{EngineConfig, MessageParser};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, InputArgs, RunArgs};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cadence=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match EngineConfig::load(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Parse(args) => handle_parse(&config, &args),
            Commands::Plan(args) => handle_plan(&config, &args),
            Commands::Run(args) => handle_run(&config, args).await,
        },
        Err(err) => Err(err.into()),
    };

    if let Err(e) = result {
        // Try to downcast to CadenceError for actionable help text
        let message = if let Some(cadence_err) = e.downcast_ref::<CadenceError>() {
            errors::format_error_help(cadence_err)
        } else {
            format!("{e}")
        };
        eprintln!("Error: {message}");
        std::process::exit(1);
    }
}

fn handle_parse(config: &EngineConfig, args: &InputArgs) -> Result<(), Box<dyn std::error::Error>> {
    let parser = MessageParser::from_config(cadence::default_catalog(), config);
    let parsed = parser.parse_message(&read_input(&args.input)?);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

fn handle_plan(config: &EngineConfig, args: &InputArgs) -> Result<(), Box<dyn std::error::Error>> {
    let parser = MessageParser::from_config(cadence::default_catalog(), config);
    let parsed = parser.parse_message(&read_input(&args.input)?);
    for anomaly in &parsed.anomalies {
        eprintln!("warning: {anomaly}");
    }

    let mode = parsed.mode;
    let resolution = cadence::resolve(parsed.into_invocations(), mode);

    println!("mode: {mode}");
    println!("order:");
    for (index, invocation) in resolution.invocations.iter().enumerate() {
        println!("  {}. {}", index + 1, invocation.describe());
    }
    println!("waves:");
    for (index, wave) in resolution.waves.iter().enumerate() {
        println!("  {}: {}", index + 1, wave.join(", "));
    }
    if !resolution.cyclic.is_empty() {
        println!("cyclic: {}", resolution.cyclic.join(", "));
    }
    for warning in &resolution.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

async fn handle_run(config: &EngineConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let text = read_input(&args.input.input)?;
    let fail: HashSet<String> = args.fail.into_iter().collect();
    let (parser, mut engine) = cadence::configured(config, dry_run_runner(fail));

    if args.events {
        engine = engine.with_event_sink(Arc::new(|event: EngineEvent| {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{line}");
            }
        }));
    } else {
        engine = engine.with_event_sink(Arc::new(|event: EngineEvent| {
            if let EngineEventPayload::InvocationRetrying {
                id, attempt, error, ..
            } = &event.payload
            {
                eprintln!("  retrying {id} (attempt {attempt}): {error}");
            }
        }));
    }

    let parsed = parser.parse_message(&text);
    for anomaly in &parsed.anomalies {
        eprintln!("warning: {anomaly}");
    }

    let mut options = config.execution_options();
    if let Some(max) = args.max_concurrency.filter(|value| *value > 0) {
        options.max_concurrency = max;
    }
    if args.continue_on_error {
        options.continue_on_error = true;
    }
    if args.timeout_ms.is_some() {
        options.timeout_ms = args.timeout_ms;
    }
    if let Some(overrides) = &parsed.options {
        options = options.merged(overrides);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mode = parsed.mode;
    tracing::debug!(%mode, ?options, "executing message");
    let outcome = engine
        .execute_with_cancel(parsed.into_invocations(), mode, options, cancel)
        .await?;

    println!("{}", outcome.report);
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    if engine.mistake_limit_reached() {
        eprintln!(
            "warning: {} consecutive invalid invocations",
            engine.consecutive_mistakes()
        );
    }
    if !outcome.overall_success {
        std::process::exit(2);
    }
    Ok(())
}

/// Runner that performs nothing and echoes each call back, failing the
/// tools named in `fail`.
fn dry_run_runner(fail: HashSet<String>) -> Arc<dyn ToolRunner> {
    let fail = Arc::new(fail);
    Arc::new(FnRunner::new(move |name, args, ctx| {
        let fail = fail.clone();
        async move {
            if fail.contains(&name) {
                return Err(CadenceError::tool(name, "failed by --fail"));
            }
            Ok(serde_json::json!({
                "tool": name,
                "params": args.raw(),
                "attempt": ctx.attempt,
            }))
        }
    }))
}

fn read_input(source: &str) -> Result<String, CadenceError> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(std::fs::read_to_string(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence::types::{ExecutionMode, ExecutionOptions, ToolInvocation};

    #[tokio::test]
    async fn dry_run_runner_echoes_and_fails_named_tools() {
        let runner = dry_run_runner(HashSet::from(["execute_command".to_string()]));
        let engine = cadence::default_engine(runner);
        let invocations = vec![
            ToolInvocation::new("a", "read_file").with_param("path", "src/lib.rs"),
            ToolInvocation::new("b", "execute_command").with_param("command", "ls"),
        ];

        let outcome = engine
            .execute(
                invocations,
                ExecutionMode::Sequential,
                ExecutionOptions::builder().continue_on_error(true).build(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.get("a").unwrap().payload["params"]["path"], "src/lib.rs");
        assert_eq!(
            outcome.get("b").unwrap().error_message(),
            Some("Tool execution error: execute_command: failed by --fail")
        );
    }

    #[test]
    fn read_input_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message.txt");
        std::fs::write(&path, "<read_file><path>a</path></read_file>").unwrap();
        let text = read_input(path.to_str().unwrap()).unwrap();
        assert!(text.starts_with("<read_file>"));
    }

    #[test]
    fn read_input_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_input(dir.path().join("nope.txt").to_str().unwrap()).unwrap_err();
        assert!(matches!(err, CadenceError::Io(_)));
    }
}
