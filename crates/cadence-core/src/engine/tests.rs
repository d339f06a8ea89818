use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::DependencyWarning;
use crate::tools::{FnRunner, ToolSpec, UsageCounter};
use crate::types::{Condition, ConditionKind, RetryPolicy};

fn catalog() -> ToolCatalog {
    ToolCatalog::new()
        .with_tool(ToolSpec::new("read_file", "Read a file").required("path", "File path"))
        .with_tool(ToolSpec::new("list_files", "List a directory").required("path", "Directory"))
        .with_tool(ToolSpec::new("execute_command", "Run a command").required("command", "Command line"))
}

fn read(id: &str, path: &str) -> ToolInvocation {
    ToolInvocation::new(id, "read_file").with_param("path", path)
}

/// Echoes its path; paths starting with `missing` fail.
fn echo_runner() -> Arc<dyn ToolRunner> {
    Arc::new(FnRunner::new(|name, args, _ctx| async move {
        let path = args.get_str("path")?.to_string();
        if path.starts_with("missing") {
            return Err(CadenceError::tool(name, format!("{path}: not found")));
        }
        Ok(json!({ "tool": name, "path": path }))
    }))
}

fn options(max_concurrency: usize, continue_on_error: bool) -> ExecutionOptions {
    ExecutionOptions::builder()
        .max_concurrency(max_concurrency)
        .continue_on_error(continue_on_error)
        .build()
}

fn recorded_events() -> (Arc<Mutex<Vec<EngineEvent>>>, EngineEventSink) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = events.clone();
    let sink: EngineEventSink = Arc::new(move |event| captured.lock().unwrap().push(event));
    (events, sink)
}

#[tokio::test(start_paused = true)]
async fn parallel_mode_never_exceeds_max_concurrency() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (now, max) = (in_flight.clone(), peak.clone());
    let runner = FnRunner::new(move |_name, args, _ctx| {
        let (now, max) = (now.clone(), max.clone());
        async move {
            let current = now.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            now.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(args.get_str("path")?))
        }
    });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));
    let batch = (1..=10).map(|n| read(&format!("t{n}"), &format!("{n}.rs"))).collect();

    let multi = engine
        .execute(batch, ExecutionMode::Parallel, options(4, false))
        .await
        .unwrap();

    assert_eq!(multi.len(), 10);
    assert!(multi.overall_success);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert_eq!(peak.load(Ordering::SeqCst), 4);
    assert_eq!(multi.order[0], "t1");
    assert_eq!(multi.order[9], "t10");
}

#[tokio::test(start_paused = true)]
async fn parallel_dependency_waits_for_its_source() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();
    let runner = FnRunner::new(move |_name, args, ctx| {
        let seen = seen.clone();
        async move {
            let path = args.get_str("path")?.to_string();
            seen.lock().unwrap().push(format!("start {path}"));
            if path == "slow" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            seen.lock().unwrap().push(format!("end {path}"));
            Ok(json!({ "path": path, "saw_slow": ctx.state("a").is_some() }))
        }
    });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));
    let batch = vec![read("b", "fast").with_depends_on("a"), read("a", "slow")];

    let multi = engine
        .execute(batch, ExecutionMode::Parallel, options(4, false))
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["start slow", "end slow", "start fast", "end fast"]);
    assert_eq!(multi.get("b").unwrap().payload["saw_slow"], true);
    assert_eq!(multi.order, vec!["b", "a"]);
}

#[tokio::test]
async fn parallel_failure_stops_later_waves() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let batch = vec![read("t1", "missing.rs"), read("t2", "a.rs"), read("t3", "b.rs")];

    let multi = engine
        .execute(batch, ExecutionMode::Parallel, options(1, false))
        .await
        .unwrap();

    assert!(!multi.overall_success);
    assert_eq!(multi.failed_ids(), vec!["t1", "t2", "t3"]);
    assert!(multi.get("t2").unwrap().is_not_attempted());
    assert!(multi.get("t3").unwrap().is_not_attempted());
}

#[tokio::test]
async fn sequential_failure_halts_remaining_invocations() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let runner = FnRunner::new(move |name, args, _ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            match args.get_str("path")? {
                "bad.rs" => Err(CadenceError::tool(name, "permission denied")),
                path => Ok(json!(path)),
            }
        }
    });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));
    let batch = vec![read("1", "a.rs"), read("2", "bad.rs"), read("3", "c.rs")];

    let multi = engine
        .execute(batch, ExecutionMode::Sequential, ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!multi.overall_success);
    assert!(multi.get("1").unwrap().success);
    let failed = multi.get("2").unwrap();
    assert_eq!(failed.error_message(), Some("Tool execution error: read_file: permission denied"));
    assert_eq!(failed.error.as_ref().unwrap().details["category"], "execution");
    let skipped = multi.get("3").unwrap();
    assert!(skipped.is_not_attempted());
    assert_eq!(skipped.error.as_ref().unwrap().details["haltedBy"], "2");
    assert!(multi.report.contains("[not attempted] read_file (3)"));
}

#[tokio::test]
async fn continue_on_error_runs_everything() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let batch = vec![read("1", "missing.rs"), read("2", "b.rs")];

    let multi = engine
        .execute(batch, ExecutionMode::Sequential, options(4, true))
        .await
        .unwrap();

    assert!(multi.overall_success);
    assert!(!multi.get("1").unwrap().success);
    assert!(multi.get("2").unwrap().success);
}

#[tokio::test]
async fn false_condition_skips_without_calling_the_runner() {
    let gated_calls = Arc::new(AtomicUsize::new(0));
    let counter = gated_calls.clone();
    let runner = FnRunner::new(move |name, _args, _ctx| {
        if name == "execute_command" {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        async move { Ok(json!({ "count": 0 })) }
    });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));
    let batch = vec![
        ToolInvocation::new("list", "list_files").with_param("path", "src"),
        ToolInvocation::new("build", "execute_command")
            .with_param("command", "cargo build")
            .with_condition(Condition::new(ConditionKind::Result, "list", "$.count > 0")),
    ];

    let multi = engine
        .execute(batch, ExecutionMode::Conditional, ExecutionOptions::default())
        .await
        .unwrap();

    let skipped = multi.get("build").unwrap();
    assert!(skipped.success);
    assert!(skipped.is_skipped());
    assert_eq!(skipped.payload["skipped"], true);
    assert_eq!(gated_calls.load(Ordering::SeqCst), 0);
    assert!(multi.overall_success);
}

#[tokio::test]
async fn error_condition_recovers_after_a_halting_failure() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let batch = vec![
        read("probe", "missing.rs"),
        read("next", "next.rs").with_depends_on("probe"),
        read("recover", "backup.rs").with_condition(Condition::new(ConditionKind::Error, "probe", "")),
    ];

    let multi = engine
        .execute(batch, ExecutionMode::Conditional, ExecutionOptions::default())
        .await
        .unwrap();

    assert!(!multi.overall_success);
    assert!(multi.get("next").unwrap().is_not_attempted());
    let recovered = multi.get("recover").unwrap();
    assert!(recovered.success);
    assert!(!recovered.is_skipped());
    assert_eq!(recovered.payload["path"], "backup.rs");
}

#[tokio::test]
async fn invalid_condition_is_a_failed_result() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let batch = vec![
        read("a", "a.rs"),
        read("b", "b.rs").with_condition(Condition::new(ConditionKind::Custom, "a", "$.state >")),
    ];

    let multi = engine
        .execute(batch, ExecutionMode::Conditional, options(4, true))
        .await
        .unwrap();

    let result = multi.get("b").unwrap();
    assert!(!result.success);
    assert!(result.error_message().unwrap().contains("invalid condition expression"));
    assert_eq!(engine.consecutive_mistakes(), 1);
}

#[tokio::test]
async fn single_mode_rejects_multiple_invocations() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let runner = FnRunner::new(move |_name, _args, _ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(Value::Null) }
    });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));

    let multi = engine
        .execute(
            vec![read("a", "a.rs"), read("b", "b.rs")],
            ExecutionMode::Single,
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(multi.failed_ids(), vec!["a", "b"]);
    assert_eq!(
        multi.get("a").unwrap().error_message(),
        Some("single mode accepts exactly one invocation, got 2")
    );
    assert_eq!(engine.consecutive_mistakes(), 1);
}

#[tokio::test]
async fn validation_failures_count_as_mistakes_until_a_success() {
    let engine = ExecutionEngine::new(catalog(), echo_runner()).with_mistake_limit(2);
    let unknown = ToolInvocation::new("x", "frobnicate");
    let missing = ToolInvocation::new("y", "read_file");

    let multi = engine
        .execute(vec![unknown], ExecutionMode::Single, ExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(multi.get("x").unwrap().error_message(), Some("unknown tool 'frobnicate'"));
    assert!(!engine.mistake_limit_reached());

    let multi = engine
        .execute(vec![missing], ExecutionMode::Single, ExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(
        multi.get("y").unwrap().error_message(),
        Some("missing required parameter 'path' for tool 'read_file'")
    );
    assert_eq!(engine.consecutive_mistakes(), 2);
    assert!(engine.mistake_limit_reached());

    engine
        .execute(vec![read("z", "ok.rs")], ExecutionMode::Single, ExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(engine.consecutive_mistakes(), 0);
}

#[tokio::test]
async fn composite_copies_state_only_through_mappings() {
    let runner = FnRunner::new(|name, args, ctx| async move {
        Ok(json!({
            "tool": name,
            "dir": ctx.state("dir").cloned().unwrap_or(Value::Null),
            "secret": ctx.state("secret").cloned().unwrap_or(Value::Null),
            "path": args.get_str("path")?,
        }))
    });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));
    let composite = ToolInvocation::new("survey", "composite")
        .with_children(
            ExecutionMode::Sequential,
            vec![ToolInvocation::new("survey.1", "list_files").with_param("path", "src")],
        )
        .map_input("root", "dir")
        .map_output("survey.1", "listing");
    let mut ctx = ExecutionContext::new(ExecutionMode::Single, ExecutionOptions::default())
        .with_state("root", json!("/repo"))
        .with_state("secret", json!("hunter2"));

    let multi = engine
        .execute_in(&mut ctx, vec![composite], CancellationToken::new())
        .await
        .unwrap();

    let result = multi.get("survey").unwrap();
    assert!(result.success);
    assert_eq!(result.payload[0]["dir"], "/repo");
    assert_eq!(result.payload[0]["secret"], Value::Null);
    assert_eq!(ctx.shared_state["listing"]["path"], "src");
    assert!(!ctx.shared_state.contains_key("survey.1"));
}

#[tokio::test]
async fn failing_composite_reports_failed_children() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let composite = ToolInvocation::new("c", "composite").with_children(
        ExecutionMode::Parallel,
        vec![read("c.1", "a.rs"), read("c.2", "missing.rs")],
    );

    let multi = engine
        .execute(vec![composite], ExecutionMode::Composite, ExecutionOptions::default())
        .await
        .unwrap();

    let result = multi.get("c").unwrap();
    assert!(!result.success);
    assert_eq!(result.error_message(), Some("composite failed: c.2"));
    assert_eq!(result.error.as_ref().unwrap().details["failed"], json!(["c.2"]));
}

#[tokio::test]
async fn composite_with_only_failed_children_fails_under_continue_on_error() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let composite = ToolInvocation::new("c", "composite").with_children(
        ExecutionMode::Sequential,
        vec![read("c.1", "missing1.rs"), read("c.2", "missing2.rs")],
    );

    let multi = engine
        .execute(vec![composite], ExecutionMode::Composite, options(4, true))
        .await
        .unwrap();

    let result = multi.get("c").unwrap();
    assert!(!result.success);
    assert_eq!(result.error_message(), Some("composite failed: c.1, c.2"));
    assert_eq!(engine.consecutive_mistakes(), 0);
}

#[tokio::test]
async fn fallback_result_is_returned_under_original_id() {
    let (events, sink) = recorded_events();
    let engine = ExecutionEngine::new(catalog(), echo_runner()).with_event_sink(sink);
    let primary = read("cfg", "missing.toml").with_fallback(
        ToolInvocation::new("cfg-fallback", "list_files").with_param("path", "."),
    );

    let multi = engine
        .execute(vec![primary], ExecutionMode::Single, ExecutionOptions::default())
        .await
        .unwrap();

    let result = multi.get("cfg").unwrap();
    assert!(result.success);
    assert_eq!(result.payload, json!({ "tool": "list_files", "path": "." }));
    assert_eq!(multi.order, vec!["cfg"]);
    assert!(events.lock().unwrap().iter().any(|event| matches!(
        &event.payload,
        EngineEventPayload::FallbackEngaged { id, fallback_tool, .. }
            if id == "cfg" && fallback_tool == "list_files"
    )));
}

#[tokio::test(start_paused = true)]
async fn retries_are_counted_and_usage_recorded_once() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let runner = FnRunner::new(move |name, _args, ctx| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            assert_eq!(ctx.attempt as usize, n);
            if n < 2 {
                Err(CadenceError::tool(name, "busy"))
            } else {
                Ok(json!("done"))
            }
        }
    });
    let usage = Arc::new(UsageCounter::new());
    let (events, sink) = recorded_events();
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner))
        .with_usage_recorder(usage.clone())
        .with_event_sink(sink);
    let batch = vec![
        ToolInvocation::new("run", "execute_command")
            .with_param("command", "make")
            .with_retry(RetryPolicy::new(3, 10)),
        ToolInvocation::new("bad", "read_file"),
    ];

    let multi = engine
        .execute(batch, ExecutionMode::Parallel, options(4, true))
        .await
        .unwrap();

    let result = multi.get("run").unwrap();
    assert!(result.success);
    assert_eq!(result.metrics.retry_count, 2);
    assert_eq!(usage.count("execute_command"), 1);
    assert_eq!(usage.count("read_file"), 0);
    let retries = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event.payload, EngineEventPayload::InvocationRetrying { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn cancelled_run_is_aborted() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .execute_with_cancel(
            vec![read("a", "a.rs")],
            ExecutionMode::Sequential,
            ExecutionOptions::default(),
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CadenceError::Aborted));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_retry_backoff() {
    let runner = FnRunner::new(|name, _args, _ctx| async move { Err(CadenceError::tool(name, "down")) });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let flaky = read("a", "a.rs").with_retry(RetryPolicy::new(5, 60_000));

    let err = engine
        .execute_with_cancel(vec![flaky], ExecutionMode::Single, ExecutionOptions::default(), cancel)
        .await
        .unwrap_err();

    assert!(err.is_abort());
}

#[tokio::test(start_paused = true)]
async fn timeout_stops_between_scheduling_steps() {
    let runner = FnRunner::new(|_name, _args, _ctx| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Value::Null)
    });
    let engine = ExecutionEngine::new(catalog(), Arc::new(runner));
    let options = ExecutionOptions::builder().timeout_ms(100).build();

    let err = engine
        .execute(
            vec![read("a", "a.rs"), read("b", "b.rs")],
            ExecutionMode::Sequential,
            options,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CadenceError::Timeout(100)));
}

#[tokio::test]
async fn partial_invocations_are_dropped_with_a_warning() {
    let engine = ExecutionEngine::new(catalog(), echo_runner());
    let mut cut = read("t2", "b.r");
    cut.partial = true;

    let multi = engine
        .execute(vec![read("t1", "a.rs"), cut], ExecutionMode::Parallel, ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(multi.order, vec!["t1"]);
    assert_eq!(
        multi.warnings,
        vec![DependencyWarning::PartialSkipped {
            id: "t2".into(),
            name: "read_file".into()
        }]
    );
}

#[tokio::test]
async fn events_are_sequenced_from_start_to_completion() {
    let (events, sink) = recorded_events();
    let engine = ExecutionEngine::new(catalog(), echo_runner()).with_event_sink(sink);

    engine
        .execute(
            vec![read("a", "a.rs"), read("b", "b.rs")],
            ExecutionMode::Sequential,
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, (1..=events.len() as u64).collect::<Vec<_>>());
    assert!(matches!(
        events.first().map(|e| &e.payload),
        Some(EngineEventPayload::RunStarted { invocation_count: 2, .. })
    ));
    assert!(matches!(
        events.last().map(|e| &e.payload),
        Some(EngineEventPayload::RunCompleted { overall_success: true, results: 2, .. })
    ));
    let completed = events
        .iter()
        .filter(|event| matches!(event.payload, EngineEventPayload::InvocationCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
}

/// Records the `path` of every call in order.
fn recording_runner() -> (Arc<Mutex<Vec<String>>>, Arc<dyn ToolRunner>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let runner = FnRunner::new(move |name, args, _ctx| {
        let seen = seen.clone();
        async move {
            let path = args.get_str("path")?.to_string();
            seen.lock().unwrap().push(path.clone());
            if path.starts_with("missing") {
                return Err(CadenceError::tool(name, format!("{path}: not found")));
            }
            Ok(json!(path))
        }
    });
    (calls, Arc::new(runner))
}

#[tokio::test]
async fn sequential_halt_skips_error_conditions_too() {
    let (calls, runner) = recording_runner();
    let engine = ExecutionEngine::new(catalog(), runner);
    let batch = vec![
        read("a", "missing.rs"),
        read("b", "backup.rs").with_condition(Condition::new(ConditionKind::Error, "a", "")),
    ];

    let multi = engine
        .execute(batch, ExecutionMode::Sequential, ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["missing.rs"]);
    let b = multi.get("b").unwrap();
    assert!(!b.success);
    assert!(b.is_not_attempted());
    assert_eq!(b.error.as_ref().unwrap().details["haltedBy"], "a");
}

#[tokio::test]
async fn parallel_cycle_members_still_run() {
    let (calls, runner) = recording_runner();
    let engine = ExecutionEngine::new(catalog(), runner);
    let batch = vec![
        read("x", "x.rs").with_depends_on("y"),
        read("free", "free.rs"),
        read("y", "y.rs").with_depends_on("x"),
    ];

    let multi = engine
        .execute(batch, ExecutionMode::Parallel, options(1, false))
        .await
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["free.rs", "x.rs", "y.rs"]);
    assert!(multi.overall_success);
    assert_eq!(multi.order, vec!["x", "free", "y"]);
    assert_eq!(
        multi.warnings,
        vec![DependencyWarning::Cycle {
            ids: vec!["x".into(), "y".into()]
        }]
    );
}

#[tokio::test]
async fn sequential_cycle_falls_back_to_declaration_order() {
    let (calls, runner) = recording_runner();
    let engine = ExecutionEngine::new(catalog(), runner);
    // `a` waits on `c` explicitly; the implicit chain closes c -> b -> a.
    let batch = vec![
        read("a", "a.rs").with_depends_on("c"),
        read("b", "b.rs"),
        read("c", "c.rs"),
    ];

    let multi = engine
        .execute(batch, ExecutionMode::Sequential, ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["a.rs", "b.rs", "c.rs"]);
    assert!(multi.overall_success);
    assert_eq!(multi.len(), 3);
    assert!(multi.ordered().all(|result| result.success));
    assert_eq!(
        multi.warnings,
        vec![DependencyWarning::Cycle {
            ids: vec!["a".into(), "b".into(), "c".into()]
        }]
    );
}
