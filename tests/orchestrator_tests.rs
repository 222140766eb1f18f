//! End-to-end orchestrator scenarios: batching, result injection,
//! timing, and the three verification gates.

use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use taskforge::evidence::{ExecEntry, ExecLog};
use taskforge::graph::{Task, TaskType};
use taskforge::llm::{ChatResponse, LlmClient, MockLlm};
use taskforge::orchestrator::{
    ExecutionResult, OrchestratorConfig, TaskExecutorFn, TaskOrchestrator, WorkflowBuilder,
};
use taskforge::subagent::{LlmFactory, SubAgentOrchestrator};
use taskforge::tools::build_registry;
use taskforge::EngineError;

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Gates off: executor behavior only.
fn gates_off() -> OrchestratorConfig {
    OrchestratorConfig {
        verbose: false,
        enable_data_gate: false,
        enable_exec_gate: false,
        enable_verification: false,
        ..Default::default()
    }
}

/// An executor that succeeds with a canned per-task payload and records
/// the injected inputs it saw.
fn recording_executor(
    outputs: HashMap<String, serde_json::Value>,
) -> (TaskExecutorFn, Arc<Mutex<HashMap<String, Vec<String>>>>) {
    let seen: Arc<Mutex<HashMap<String, Vec<String>>>> = Arc::new(Mutex::new(HashMap::new()));
    let seen_clone = Arc::clone(&seen);
    let executor: TaskExecutorFn = Arc::new(move |task, inputs| {
        let mut keys: Vec<String> = inputs.keys().cloned().collect();
        keys.sort();
        seen_clone.lock().unwrap().insert(task.id.clone(), keys);
        let output = outputs.get(&task.id).cloned().unwrap_or_else(|| json!("done"));
        ExecutionResult::ok(&task.id, output)
    });
    (executor, seen)
}

fn write_csv(path: &Path, rows: usize) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = std::fs::File::create(path).unwrap();
    writeln!(f, "t,value").unwrap();
    for i in 0..rows {
        writeln!(f, "{},{}", i, i * 2).unwrap();
    }
}

/// Sub-executor orchestrator whose every spawn replies with the given
/// text (the verifier path in these tests).
fn scripted_subagents(reply: &'static str) -> Arc<SubAgentOrchestrator> {
    let factory: LlmFactory = Arc::new(move |_profile| {
        Arc::new(MockLlm::new(vec![ChatResponse::text(reply)])) as Arc<dyn LlmClient>
    });
    Arc::new(SubAgentOrchestrator::new(
        build_registry(std::env::temp_dir()),
        std::env::temp_dir(),
        factory,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 1: linear chain with result injection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn linear_chain_runs_in_three_batches_and_injects_results() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add_task(
            Task::new("a", "research the method")
                .with_type(TaskType::Research)
                .with_result_key("r"),
        )
        .add_task(
            Task::new("b", "implement it")
                .with_type(TaskType::Code)
                .with_depends_on(vec!["a".into()]),
        )
        .add_task(
            Task::new("c", "validate it")
                .with_type(TaskType::Validate)
                .with_depends_on(vec!["b".into()]),
        )
        .build_in(dir.path())
        .unwrap();

    {
        let batches = graph.read().unwrap().execution_order();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    let (executor, seen) = recording_executor(HashMap::from([(
        "a".to_string(),
        json!({"method": "fft"}),
    )]));
    let orch = TaskOrchestrator::new(Arc::clone(&graph), dir.path(), gates_off())
        .with_executor(executor);

    let summary = orch.execute_all().await;
    assert!(summary.success);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);

    // B received A's result under its result key.
    let seen = seen.lock().unwrap();
    assert_eq!(seen["a"], Vec::<String>::new());
    assert_eq!(seen["b"], vec!["r".to_string()]);
    assert_eq!(summary.results.get("r"), Some(&json!({"method": "fft"})));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 2: parallel fan-in: wall time ≈ max, not sum
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_fan_in_overlaps_independent_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add("r1", "measure one", TaskType::General, &[])
        .add("r2", "measure two", TaskType::General, &[])
        .add("r3", "measure three", TaskType::General, &[])
        .add("d", "combine measurements", TaskType::General, &["r1", "r2", "r3"])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn = Arc::new(|task, _inputs| {
        std::thread::sleep(Duration::from_millis(300));
        ExecutionResult::ok(&task.id, json!("measured"))
    });

    let config = OrchestratorConfig { max_parallel_tasks: 3, ..gates_off() };
    let orch = TaskOrchestrator::new(graph, dir.path(), config).with_executor(executor);

    let start = Instant::now();
    let summary = orch.execute_all().await;
    let elapsed = start.elapsed();

    assert!(summary.success);
    assert_eq!(summary.completed, 4);

    // Sequential would be ~1200ms; overlapped is ~600ms.
    assert!(elapsed >= Duration::from_millis(550), "too fast: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1050), "no overlap: {:?}", elapsed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 3: cycle rejection
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cyclic_workflow_is_rejected_at_construction() {
    let result = WorkflowBuilder::new()
        .add("a", "first", TaskType::General, &["b"])
        .add("b", "second", TaskType::General, &["a"])
        .build();

    match result {
        Err(EngineError::CycleDetected(path)) => {
            assert!(path.contains('a') && path.contains('b'));
        }
        other => panic!("expected cycle rejection, got {:?}", other.err()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 4: data gate catches fabricated downloads
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn data_gate_aborts_on_missing_fetch_record() {
    let dir = tempfile::tempdir().unwrap();
    // The file exists and parses; only the fetch evidence is missing.
    write_csv(&dir.path().join("out/data.csv"), 100);

    let graph = WorkflowBuilder::new()
        .add_task(
            Task::new("f", "Download the dataset")
                .with_type(TaskType::Research)
                .with_produces("file:out/data.csv:csv:100"),
        )
        .add_task(
            Task::new("an", "Analyze the dataset")
                .with_type(TaskType::Code)
                .with_depends_on(vec!["f".into()]),
        )
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn = Arc::new(|task, _| {
        ExecutionResult::ok(&task.id, json!({"url": "https://example.org/x.csv"}))
    });

    let config = OrchestratorConfig {
        verbose: false,
        enable_data_gate: true,
        data_gate_strict: true,
        enable_exec_gate: false,
        enable_verification: false,
        ..Default::default()
    };
    let orch = TaskOrchestrator::new(graph, dir.path(), config).with_executor(executor);

    let summary = orch.execute_all().await;

    assert!(!summary.success);
    assert!(summary.data_gate_failed);
    assert!(!summary.data_gate_passed);
    assert_eq!(summary.completed, 1, "only the acquisition task ran");

    let prov = summary.provenance_results.get("f").expect("provenance recorded for f");
    assert!(!prov.valid);
    assert!(prov.issues.iter().any(|i| i.category == "no_fetch_record"));
    assert!(summary.gate_issues.iter().any(|i| i.contains("no_fetch_record")));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 5: exec gate catches unrun tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn exec_gate_aborts_when_no_tests_were_run() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add("t", "Run the test suite", TaskType::Validate, &[])
        .add("rep", "Write the final report", TaskType::General, &["t"])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn =
        Arc::new(|task, _| ExecutionResult::ok(&task.id, json!("claimed done")));

    let config = OrchestratorConfig {
        verbose: false,
        enable_data_gate: false,
        enable_exec_gate: true,
        exec_gate_strict: true,
        enable_verification: false,
        ..Default::default()
    };
    let orch = TaskOrchestrator::new(graph, dir.path(), config).with_executor(executor);

    let summary = orch.execute_all().await;

    assert!(!summary.success);
    assert!(summary.exec_gate_failed);
    assert_eq!(summary.completed, 1, "gate fires before the report batch");
    assert!(summary
        .gate_issues
        .iter()
        .any(|i| i.contains("No test/verification commands")));
    assert_eq!(summary.exec_summary.as_ref().unwrap().total, 0);
}

#[tokio::test]
async fn exec_gate_passes_with_successful_verification_run() {
    let dir = tempfile::tempdir().unwrap();

    // Real evidence: a passing test command in the exec log.
    let exec_log = ExecLog::new(dir.path().join("_logs"));
    exec_log.append(&ExecEntry::new("python sim.py", 0, false, "")).unwrap();
    exec_log.append(&ExecEntry::new("pytest tests/ -q", 0, false, "")).unwrap();

    let graph = WorkflowBuilder::new()
        .add("t", "Run the test suite", TaskType::Validate, &[])
        .add("rep", "Write the final report", TaskType::General, &["t"])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn =
        Arc::new(|task, _| ExecutionResult::ok(&task.id, json!("done")));

    let config = OrchestratorConfig {
        verbose: false,
        enable_data_gate: false,
        enable_exec_gate: true,
        exec_gate_strict: true,
        enable_verification: false,
        ..Default::default()
    };
    let orch = TaskOrchestrator::new(graph, dir.path(), config).with_executor(executor);

    let summary = orch.execute_all().await;
    assert!(summary.success, "issues: {:?}", summary.gate_issues);
    assert!(summary.exec_gate_passed);
    assert_eq!(summary.completed, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 6: LLM verification refutation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn verification_gate_fails_on_refuted_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add("final_report", "Produce the final report", TaskType::General, &[])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn =
        Arc::new(|task, _| ExecutionResult::ok(&task.id, json!("wrote report.md")));

    let verifier_reply = r#"{"verdict": "refuted", "confidence": 0.9,
        "issues": ["file size 12 bytes insufficient for 100-row CSV"],
        "reasoning": "claimed artifact cannot hold the claimed data"}"#;

    let config = OrchestratorConfig {
        verbose: false,
        enable_data_gate: false,
        enable_exec_gate: false,
        enable_verification: true,
        verification_strict: true,
        original_request: Some("produce a verified report".into()),
        ..Default::default()
    };
    let orch = TaskOrchestrator::new(graph, dir.path(), config)
        .with_executor(executor)
        .with_subagents(scripted_subagents(verifier_reply));

    let summary = orch.execute_all().await;

    assert!(!summary.success);
    assert!(summary.llm_verification_failed);
    assert!(!summary.llm_verification_passed);
    assert_eq!(summary.completed, 1, "the task itself completed; the gate refuted it");

    let verdict = summary.verification_results.get("final_report").unwrap();
    assert_eq!(verdict.verdict, "refuted");
    assert!(verdict.confidence > 0.8);
    assert!(verdict.issues[0].contains("12 bytes"));
}

#[tokio::test]
async fn verification_gate_passes_on_confident_verified_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add("final_report", "Produce the final report", TaskType::General, &[])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn =
        Arc::new(|task, _| ExecutionResult::ok(&task.id, json!("wrote report.md")));

    let verifier_reply = r#"{"verdict": "verified", "confidence": 0.92,
        "supporting_facts": ["exec log shows the report generator ran"]}"#;

    let config = OrchestratorConfig {
        verbose: false,
        enable_data_gate: false,
        enable_exec_gate: false,
        enable_verification: true,
        verification_strict: true,
        ..Default::default()
    };
    let orch = TaskOrchestrator::new(graph, dir.path(), config)
        .with_executor(executor)
        .with_subagents(scripted_subagents(verifier_reply));

    let summary = orch.execute_all().await;
    assert!(summary.success, "issues: {:?}", summary.gate_issues);
    assert!(summary.llm_verification_passed);
}

#[tokio::test]
async fn low_confidence_verified_verdict_still_fails_gate() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add("final_report", "Produce the final report", TaskType::General, &[])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn =
        Arc::new(|task, _| ExecutionResult::ok(&task.id, json!("done")));

    // verified but below the 0.7 threshold
    let verifier_reply = r#"{"verdict": "verified", "confidence": 0.4}"#;

    let config = OrchestratorConfig {
        verbose: false,
        enable_data_gate: false,
        enable_exec_gate: false,
        enable_verification: true,
        verification_strict: true,
        ..Default::default()
    };
    let orch = TaskOrchestrator::new(graph, dir.path(), config)
        .with_executor(executor)
        .with_subagents(scripted_subagents(verifier_reply));

    let summary = orch.execute_all().await;
    assert!(!summary.success);
    assert!(summary.llm_verification_failed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure propagation and timeouts
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn executor_failure_blocks_dependents_and_surfaces_in_summary() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add("a", "produce input", TaskType::General, &[])
        .add("b", "consume input", TaskType::General, &["a"])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn = Arc::new(|task, _| {
        if task.id == "a" {
            ExecutionResult::fail(&task.id, "simulated crash")
        } else {
            ExecutionResult::ok(&task.id, json!("unreachable"))
        }
    });

    let orch = TaskOrchestrator::new(Arc::clone(&graph), dir.path(), gates_off())
        .with_executor(executor);
    let summary = orch.execute_all().await;

    assert!(!summary.success);
    assert_eq!(summary.failed, 1);
    // b never completed: its dependency failed, so it stayed blocked.
    assert!(summary.completed < 2);
    let graph = graph.read().unwrap();
    assert_eq!(graph.blocked().len(), 1);
    assert_eq!(graph.blocked()[0].id, "b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_task_timeout_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let graph = WorkflowBuilder::new()
        .add("slow", "never finishes", TaskType::General, &[])
        .build_in(dir.path())
        .unwrap();

    let executor: TaskExecutorFn = Arc::new(|task, _| {
        std::thread::sleep(Duration::from_secs(2));
        ExecutionResult::ok(&task.id, json!("too late"))
    });

    let config = OrchestratorConfig {
        timeout_per_task: Duration::from_millis(200),
        ..gates_off()
    };
    let orch = TaskOrchestrator::new(graph, dir.path(), config).with_executor(executor);

    let start = Instant::now();
    let summary = orch.execute_all().await;

    assert!(!summary.success);
    assert_eq!(summary.failed, 1);
    assert!(start.elapsed() < Duration::from_secs(3), "timeout did not bound the wait");
    assert!(summary.log[0].error.as_ref().unwrap().contains("timed out"));
}
