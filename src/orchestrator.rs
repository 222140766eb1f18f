//! Dependency-aware task orchestration with verification gates.
//!
//! Tasks execute in topological batches; independent tasks run on a
//! bounded worker pool with a per-task timeout. Three gates stand
//! between the workers and the final summary:
//!
//! 1. **Data gate**: before the first analysis batch, every completed
//!    data-acquisition task must have real fetch-log evidence and a
//!    valid file on disk.
//! 2. **Exec gate**: before the first output batch, the exec log must
//!    show real command activity and passing verification runs.
//! 3. **LLM verification gate**: after all batches, a fresh-context
//!    verifier sub-executor audits claimed results against the evidence.
//!
//! Gate evidence comes from the append-only logs and the filesystem;
//! the worker model cannot fabricate it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::graph::{Task, TaskGraph, TaskStatus, TaskType};
use crate::provenance::{
    DataAcquisitionClaim, ExecutionSummary, ProvenanceChecker, ProvenanceResult,
};
use crate::artifact::{ArtifactSpec, RowSpec};
use crate::subagent::SubAgentOrchestrator;

/// Result of one task execution, before graph validation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id:          String,
    pub success:          bool,
    pub output:           Option<serde_json::Value>,
    pub error:            Option<String>,
    pub duration_seconds: f64,
    pub iterations:       usize,
}

impl ExecutionResult {
    pub fn ok(task_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            task_id:          task_id.into(),
            success:          true,
            output:           Some(output),
            error:            None,
            duration_seconds: 0.0,
            iterations:       0,
        }
    }

    pub fn fail(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id:          task_id.into(),
            success:          false,
            output:           None,
            error:            Some(error.into()),
            duration_seconds: 0.0,
            iterations:       0,
        }
    }
}

/// Custom task executor hook; used by tests and embedders that do not
/// want sub-executor workers.
pub type TaskExecutorFn = Arc<
    dyn Fn(&Task, &HashMap<String, serde_json::Value>) -> ExecutionResult + Send + Sync,
>;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_parallel_tasks: usize,
    pub timeout_per_task:   Duration,
    pub verbose:            bool,

    /// Data gate: verify data provenance before analysis tasks.
    pub enable_data_gate: bool,
    pub data_gate_strict: bool,
    pub data_acquisition_types: Vec<String>,
    pub analysis_types:   Vec<String>,

    /// Exec gate: verify commands actually ran before output tasks.
    pub enable_exec_gate: bool,
    pub exec_gate_strict: bool,
    pub verification_types: Vec<String>,
    pub output_types:     Vec<String>,

    /// LLM verification gate: independent fresh-context audit.
    pub enable_verification: bool,
    pub verification_strict: bool,
    pub verification_threshold: f64,

    /// Original user request, passed to the verifier for outcome checks.
    pub original_request: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            timeout_per_task:   Duration::from_secs(300),
            verbose:            true,

            enable_data_gate: true,
            data_gate_strict: true,
            data_acquisition_types: strings(&["research", "data", "download", "fetch"]),
            analysis_types:   strings(&["analysis", "code", "compute", "validate"]),

            enable_exec_gate: true,
            exec_gate_strict: true,
            verification_types: strings(&["validate", "test", "verify", "check"]),
            output_types:     strings(&["output", "report", "final", "deliver"]),

            enable_verification: true,
            verification_strict: true,
            verification_threshold: 0.7,

            original_request: None,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Outcome of a single gate run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateReport {
    pub passed:       bool,
    pub issues:       Vec<String>,
    pub verified:     usize,
    pub failed:       usize,
}

/// Parsed verdict from the verifier sub-executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationVerdict {
    #[serde(default)]
    pub verdict:    String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub issues:     Vec<String>,
    #[serde(default)]
    pub reasoning:  String,
    #[serde(default)]
    pub supporting_facts: Vec<String>,
    #[serde(default)]
    pub fabrication_indicators: Vec<String>,
    #[serde(default)]
    pub missing_evidence: Vec<String>,
}

impl VerificationVerdict {
    fn insufficient(reason: impl Into<String>) -> Self {
        Self {
            verdict:    "insufficient".to_string(),
            confidence: 0.0,
            issues:     vec![reason.into()],
            reasoning:  String::new(),
            supporting_facts: Vec::new(),
            fabrication_indicators: Vec::new(),
            missing_evidence: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub task_id:   String,
    pub success:   bool,
    pub duration:  f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:     Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Full run report returned by `execute_all`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub success:          bool,
    pub completed:        usize,
    pub failed:           usize,
    pub total:            usize,
    pub duration_seconds: f64,
    pub results:          HashMap<String, serde_json::Value>,
    pub log:              Vec<ExecutionLogEntry>,

    pub data_gate_passed: bool,
    pub data_gate_failed: bool,
    pub exec_gate_passed: bool,
    pub exec_gate_failed: bool,
    pub llm_verification_passed: bool,
    pub llm_verification_failed: bool,

    pub gate_issues:          Vec<String>,
    pub provenance_results:   HashMap<String, ProvenanceResult>,
    pub exec_summary:         Option<ExecutionSummary>,
    pub verification_results: HashMap<String, VerificationVerdict>,
}

impl RunSummary {
    /// Human-readable run report: counts, gate verdicts, top issues, and
    /// verification verdicts.
    pub fn report(&self) -> String {
        let gate_line = |enabled_failed: bool, passed: bool| {
            if enabled_failed {
                "FAILED"
            } else if passed {
                "PASSED"
            } else {
                "NOT REACHED"
            }
        };

        let mut lines = vec![
            "=".repeat(60),
            if self.success {
                "EXECUTION COMPLETE".to_string()
            } else {
                "EXECUTION FAILED".to_string()
            },
            format!("  Completed: {}/{}", self.completed, self.total),
            format!("  Failed: {}/{}", self.failed, self.total),
            format!("  Duration: {:.1}s", self.duration_seconds),
            format!("  Data Gate: {}", gate_line(self.data_gate_failed, self.data_gate_passed)),
            format!("  Exec Gate: {}", gate_line(self.exec_gate_failed, self.exec_gate_passed)),
            format!(
                "  LLM Verification: {}",
                gate_line(self.llm_verification_failed, self.llm_verification_passed)
            ),
        ];

        if let Some(exec) = &self.exec_summary {
            lines.push(format!(
                "  Commands: {} total, {} succeeded, {} failed, {} timeouts, {} verification",
                exec.total, exec.succeeded, exec.failed, exec.timeouts,
                exec.verification_commands
            ));
        }

        if !self.gate_issues.is_empty() {
            lines.push("  Issues:".to_string());
            for issue in self.gate_issues.iter().take(10) {
                lines.push(format!("    - {}", issue));
            }
        }

        for (task_id, verdict) in &self.verification_results {
            lines.push(format!(
                "  [{}] verdict={} confidence={:.2}",
                task_id, verdict.verdict, verdict.confidence
            ));
        }

        lines.push("=".repeat(60));
        lines.join("\n")
    }
}

/// Dependency-aware task orchestrator over a shared graph.
pub struct TaskOrchestrator {
    graph:           Arc<RwLock<TaskGraph>>,
    subagent:        Option<Arc<SubAgentOrchestrator>>,
    config:          OrchestratorConfig,
    custom_executor: Option<TaskExecutorFn>,
    working_dir:     PathBuf,
    provenance:      ProvenanceChecker,
}

impl TaskOrchestrator {
    pub fn new(
        graph: Arc<RwLock<TaskGraph>>,
        working_dir: impl Into<PathBuf>,
        config: OrchestratorConfig,
    ) -> Self {
        let working_dir = working_dir.into();
        Self {
            provenance: ProvenanceChecker::new(working_dir.join("_logs"), &working_dir),
            graph,
            subagent: None,
            config,
            custom_executor: None,
            working_dir,
        }
    }

    pub fn with_subagents(mut self, subagent: Arc<SubAgentOrchestrator>) -> Self {
        self.subagent = Some(subagent);
        self
    }

    pub fn with_executor(mut self, executor: TaskExecutorFn) -> Self {
        self.custom_executor = Some(executor);
        self
    }

    pub fn provenance(&self) -> &ProvenanceChecker {
        &self.provenance
    }

    /// Snapshot of task counts and readiness.
    pub fn status(&self) -> serde_json::Value {
        let graph = self.graph.read().unwrap();
        let count = |status: TaskStatus| {
            graph.all().iter().filter(|t| t.status == status).count()
        };
        serde_json::json!({
            "counts": {
                "pending": count(TaskStatus::Pending),
                "in_progress": count(TaskStatus::InProgress),
                "completed": count(TaskStatus::Completed),
                "failed": count(TaskStatus::Failed),
            },
            "ready_tasks": graph.ready().iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
            "blocked_tasks": graph.blocked().iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
        })
    }

    // ── Main run ────────────────────────────────────────────────────────

    /// Execute every task in dependency order, running the gates as
    /// their trigger batches come up. Strict gate failures abort the
    /// run; non-strict failures downgrade to warnings in the summary.
    pub async fn execute_all(&self) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        {
            let graph = self.graph.read().unwrap();
            if let Err(e) = graph.validate() {
                summary.gate_issues.push(e.to_string());
                return summary;
            }
        }

        let batches: Vec<Vec<Task>> = self.graph.read().unwrap().execution_order();
        summary.total = batches.iter().map(|b| b.len()).sum();
        if summary.total == 0 {
            summary.success = true;
            return summary;
        }

        tracing::info!(
            total = summary.total,
            batches = batches.len(),
            data_gate = self.config.enable_data_gate,
            exec_gate = self.config.enable_exec_gate,
            "orchestrator starting"
        );

        let mut data_gate_passed = false;
        let mut exec_gate_passed = false;

        'batches: for (batch_num, batch) in batches.iter().enumerate() {
            // Data gate fires once, before the first analysis batch.
            if self.config.enable_data_gate
                && !data_gate_passed
                && self.batch_contains_analysis(batch)
            {
                tracing::info!("data gate: verifying data provenance before analysis");
                let report = self.run_data_gate(&mut summary.provenance_results);
                summary.gate_issues.extend(report.issues.clone());

                if !report.passed {
                    if self.config.data_gate_strict {
                        tracing::error!("data gate failed, execution stopped");
                        summary.data_gate_failed = true;
                        break 'batches;
                    }
                    tracing::warn!("data gate: issues detected but continuing (strict=false)");
                } else {
                    data_gate_passed = true;
                }
            }

            // Exec gate fires once, before the first output batch.
            if self.config.enable_exec_gate
                && !exec_gate_passed
                && self.batch_contains_output(batch)
            {
                tracing::info!("exec gate: verifying command execution before output");
                let report = self.run_exec_gate(&mut summary);
                summary.gate_issues.extend(report.issues.clone());

                if !report.passed {
                    if self.config.exec_gate_strict {
                        tracing::error!("exec gate failed, execution stopped");
                        summary.exec_gate_failed = true;
                        break 'batches;
                    }
                    tracing::warn!("exec gate: issues detected but continuing (strict=false)");
                } else {
                    exec_gate_passed = true;
                }
            }

            // A failed dependency leaves its dependents blocked; they are
            // surfaced via the graph, not executed.
            let runnable: Vec<Task> = {
                let graph = self.graph.read().unwrap();
                batch.iter().filter(|t| graph.dependencies_met(&t.id)).cloned().collect()
            };
            if runnable.len() < batch.len() {
                tracing::warn!(
                    batch = batch_num + 1,
                    skipped = batch.len() - runnable.len(),
                    "skipping tasks with unmet dependencies"
                );
            }
            if runnable.is_empty() {
                continue;
            }

            tracing::info!(
                batch = batch_num + 1,
                size = runnable.len(),
                "executing batch"
            );

            let results = self.execute_batch(&runnable).await;

            for result in results {
                let validated = if result.success {
                    // May still fail artifact/target validation.
                    self.graph.write().unwrap().set_task_result(
                        &result.task_id,
                        result.output.clone(),
                        None,
                    )
                } else {
                    let err =
                        result.error.clone().unwrap_or_else(|| "unknown error".to_string());
                    let _ = self.graph.write().unwrap().set_task_result(
                        &result.task_id,
                        None,
                        Some(err.clone()),
                    );
                    Err(err)
                };

                match validated {
                    Ok(()) => {
                        summary.completed += 1;
                        tracing::info!(task = %result.task_id, "task completed");
                    }
                    Err(error) => {
                        summary.failed += 1;
                        tracing::warn!(task = %result.task_id, error = %error, "task failed");
                    }
                }

                summary.log.push(ExecutionLogEntry {
                    task_id:   result.task_id.clone(),
                    success:   result.success,
                    duration:  result.duration_seconds,
                    error:     result.error.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        summary.data_gate_passed = data_gate_passed;
        summary.exec_gate_passed = exec_gate_passed;

        // LLM verification runs after all batches, only when no earlier
        // gate aborted the run.
        if self.config.enable_verification
            && !summary.data_gate_failed
            && !summary.exec_gate_failed
        {
            let to_verify = self.tasks_requiring_verification();
            if !to_verify.is_empty() {
                tracing::info!(count = to_verify.len(), "llm verification gate");
                let prior = summary.provenance_results.clone();
                let report = self
                    .run_llm_verification_gate(
                        &to_verify,
                        &prior,
                        &mut summary.verification_results,
                    )
                    .await;
                summary.gate_issues.extend(report.issues.clone());

                if report.passed {
                    summary.llm_verification_passed = true;
                } else if self.config.verification_strict {
                    tracing::error!("llm verification failed, run marked failed");
                    summary.llm_verification_failed = true;
                } else {
                    tracing::warn!("llm verification: issues detected but continuing");
                }
            }
        }

        summary.results = self.graph.read().unwrap().results().clone();
        summary.duration_seconds = start.elapsed().as_secs_f64();
        summary.success = summary.failed == 0
            && !summary.data_gate_failed
            && !summary.exec_gate_failed
            && !summary.llm_verification_failed;

        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            success = summary.success,
            "orchestrator finished"
        );

        summary
    }

    /// Execute the next ready task (sequential mode).
    pub async fn execute_next(&self) -> Option<ExecutionResult> {
        let task = {
            let graph = self.graph.read().unwrap();
            graph.ready().first().map(|t| (*t).clone())
        }?;
        Some(self.execute_task(task).await)
    }

    // ── Batch execution ─────────────────────────────────────────────────

    /// Parallelizable tasks run on the bounded pool; the rest run after,
    /// sequentially, in list order. Completion order is what the
    /// coordinator observes.
    async fn execute_batch(&self, batch: &[Task]) -> Vec<ExecutionResult> {
        if batch.len() == 1 {
            return vec![self.execute_task(batch[0].clone()).await];
        }

        let parallel: Vec<Task> =
            batch.iter().filter(|t| t.can_parallel).cloned().collect();
        let sequential: Vec<Task> =
            batch.iter().filter(|t| !t.can_parallel).cloned().collect();

        let mut results = Vec::new();

        if !parallel.is_empty() {
            use futures::stream::{FuturesUnordered, StreamExt};

            let semaphore =
                Arc::new(tokio::sync::Semaphore::new(self.config.max_parallel_tasks));
            let mut in_flight = FuturesUnordered::new();

            for task in parallel {
                let semaphore = Arc::clone(&semaphore);
                in_flight.push(async move {
                    let _permit = semaphore.acquire_owned().await;
                    self.execute_task(task).await
                });
            }

            // Completion order, not submission order.
            while let Some(result) = in_flight.next().await {
                results.push(result);
            }
        }

        for task in sequential {
            results.push(self.execute_task(task).await);
        }

        results
    }

    /// Run one task under the per-task timeout. The timeout bounds the
    /// wait, not the underlying work.
    async fn execute_task(&self, task: Task) -> ExecutionResult {
        let start = Instant::now();
        let task_id = task.id.clone();

        let inputs = {
            let mut graph = self.graph.write().unwrap();
            graph.mark_in_progress(&task_id);
            graph.results_for(&task_id)
        };

        if !inputs.is_empty() {
            tracing::debug!(task = %task_id, inputs = ?inputs.keys().collect::<Vec<_>>(), "injecting inputs");
        }

        let timeout = self.config.timeout_per_task;
        let outcome = tokio::time::timeout(timeout, self.run_executor(&task, &inputs)).await;

        match outcome {
            Ok(mut result) => {
                result.duration_seconds = start.elapsed().as_secs_f64();
                result
            }
            Err(_) => ExecutionResult {
                task_id,
                success: false,
                output: None,
                error: Some(format!("Task timed out after {}s", timeout.as_secs())),
                duration_seconds: start.elapsed().as_secs_f64(),
                iterations: 0,
            },
        }
    }

    async fn run_executor(
        &self,
        task: &Task,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> ExecutionResult {
        if let Some(executor) = &self.custom_executor {
            let executor = Arc::clone(executor);
            let task_id = task.id.clone();
            let task = task.clone();
            let inputs = inputs.clone();
            return tokio::task::spawn_blocking(move || executor(&task, &inputs))
                .await
                .unwrap_or_else(|e| {
                    ExecutionResult::fail(task_id, format!("Executor panicked: {}", e))
                });
        }

        if let Some(subagent) = &self.subagent {
            return self.execute_with_subagent(subagent, task, inputs).await;
        }

        ExecutionResult::ok(
            &task.id,
            serde_json::json!(format!(
                "Task '{}' completed (no executor configured)",
                task.content
            )),
        )
    }

    /// Map the task type to an executor profile and inject dependency
    /// results as an "Available inputs" block.
    async fn execute_with_subagent(
        &self,
        subagent: &Arc<SubAgentOrchestrator>,
        task: &Task,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> ExecutionResult {
        let agent_name = match task.task_type {
            TaskType::Research => "research",
            TaskType::Code => "general",
            TaskType::Validate => "general",
            TaskType::Review => "reviewer",
            TaskType::General => "general",
        };

        let mut prompt = task.content.clone();
        if !inputs.is_empty() {
            let mut keys: Vec<&String> = inputs.keys().collect();
            keys.sort();
            let block: Vec<String> =
                keys.iter().map(|k| format!("- {}: {}", k, inputs[*k])).collect();
            prompt = format!(
                "{}\n\n**Available inputs from previous tasks:**\n{}",
                task.content,
                block.join("\n")
            );
        }

        let result = subagent.spawn(agent_name, &prompt).await;

        ExecutionResult {
            task_id:          task.id.clone(),
            success:          result.success,
            output:           Some(serde_json::json!(result.output)),
            error:            result.error,
            duration_seconds: result.duration_seconds,
            iterations:       result.iterations,
        }
    }

    // ── Data gate ───────────────────────────────────────────────────────

    fn batch_contains_analysis(&self, batch: &[Task]) -> bool {
        const ANALYSIS_KEYWORDS: &[&str] =
            &["analyze", "analysis", "compute", "calculate", "process", "run simulation"];
        batch.iter().any(|task| {
            let task_type = task.task_type.as_str();
            self.config.analysis_types.iter().any(|t| task_type.contains(t.as_str()))
                || contains_any(&task.content, ANALYSIS_KEYWORDS)
        })
    }

    fn data_acquisition_tasks(&self) -> Vec<Task> {
        const DATA_KEYWORDS: &[&str] =
            &["download", "fetch", "retrieve", "get data", "acquire", "scrape"];
        let graph = self.graph.read().unwrap();
        graph
            .all()
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .filter(|task| {
                let task_type = task.task_type.as_str();
                let is_data_type = self
                    .config
                    .data_acquisition_types
                    .iter()
                    .any(|t| task_type.contains(t.as_str()));
                let has_file_output =
                    task.produces.as_deref().map(|p| p.starts_with("file:")).unwrap_or(false);
                is_data_type || has_file_output || contains_any(&task.content, DATA_KEYWORDS)
            })
            .cloned()
            .collect()
    }

    fn run_data_gate(
        &self,
        provenance_results: &mut HashMap<String, ProvenanceResult>,
    ) -> GateReport {
        let data_tasks = self.data_acquisition_tasks();
        if data_tasks.is_empty() {
            tracing::info!("data gate: no data acquisition tasks to verify");
            return GateReport { passed: true, ..Default::default() };
        }

        let mut report = GateReport::default();

        for task in &data_tasks {
            let mut claim = DataAcquisitionClaim::default();

            if let Some(produces) = &task.produces {
                match ArtifactSpec::parse(produces) {
                    ArtifactSpec::File { path, file_type, rows } => {
                        claim.file = Some(path);
                        claim.expected_type = file_type;
                        match rows {
                            Some(RowSpec::Exact(n)) => claim.expected_rows = Some(n),
                            Some(RowSpec::Min(n)) => claim.min_rows = Some(n),
                            None => {}
                        }
                    }
                    _ => {}
                }
            }

            // The claimed URL lives in the task's result object.
            if let Some(result) = &task.result {
                claim.url = result
                    .get("url")
                    .or_else(|| result.get("source_url"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
            }

            let result = self.provenance.verify_data_acquisition(&claim);

            if result.valid {
                report.verified += 1;
            } else {
                report.failed += 1;
                for issue in result.errors() {
                    report
                        .issues
                        .push(format!("[{}] {}: {}", task.id, issue.category, issue.message));
                }
            }
            provenance_results.insert(task.id.clone(), result);
        }

        report.passed = report.failed == 0;
        tracing::info!(
            verified = report.verified,
            failed = report.failed,
            "data gate results"
        );
        report
    }

    // ── Exec gate ───────────────────────────────────────────────────────

    fn batch_contains_output(&self, batch: &[Task]) -> bool {
        const OUTPUT_KEYWORDS: &[&str] =
            &["final", "output", "report", "deliver", "summary", "conclude", "complete"];
        batch.iter().any(|task| {
            let task_type = task.task_type.as_str();
            self.config.output_types.iter().any(|t| task_type.contains(t.as_str()))
                || contains_any(&task.content, OUTPUT_KEYWORDS)
        })
    }

    fn verification_tasks(&self) -> Vec<Task> {
        const VERIFY_KEYWORDS: &[&str] = &[
            "test", "verify", "validate", "check", "assert", "run", "execute", "pytest",
            "unittest",
        ];
        let graph = self.graph.read().unwrap();
        graph
            .all()
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .filter(|task| {
                let task_type = task.task_type.as_str();
                self.config.verification_types.iter().any(|t| task_type.contains(t.as_str()))
                    || contains_any(&task.content, VERIFY_KEYWORDS)
            })
            .cloned()
            .collect()
    }

    fn run_exec_gate(&self, summary: &mut RunSummary) -> GateReport {
        let mut report = GateReport::default();
        let exec_summary = self.provenance.execution_summary();

        tracing::info!(
            total = exec_summary.total,
            succeeded = exec_summary.succeeded,
            failed = exec_summary.failed,
            timeouts = exec_summary.timeouts,
            verification = exec_summary.verification_commands,
            "exec gate summary"
        );

        if exec_summary.total == 0 {
            report.issues.push("No commands were executed. Claims may be fabricated.".to_string());
        }

        let verify_tasks = self.verification_tasks();
        if !verify_tasks.is_empty() && exec_summary.verification_commands == 0 {
            let ids: Vec<&String> = verify_tasks.iter().map(|t| &t.id).collect();
            report.issues.push(format!(
                "Tasks {:?} claim verification but no test commands found in exec log.",
                ids
            ));
        }

        if !verify_tasks.is_empty() {
            let test_result = self.provenance.verify_tests_ran();
            for issue in test_result.errors() {
                report.issues.push(format!("Test verification: {}", issue.message));
            }
        }

        if exec_summary.failed > 0 && exec_summary.total > 0 {
            let fail_rate = exec_summary.failed as f64 / exec_summary.total as f64;
            if fail_rate > 0.5 {
                report.issues.push(format!(
                    "High failure rate: {}/{} commands failed ({:.0}%)",
                    exec_summary.failed,
                    exec_summary.total,
                    fail_rate * 100.0
                ));
            }
        }

        if exec_summary.timeouts > 0 {
            report.issues.push(format!("{} command(s) timed out", exec_summary.timeouts));
        }

        report.verified = exec_summary.succeeded;
        report.failed = exec_summary.failed;
        report.passed = report.issues.is_empty();
        summary.exec_summary = Some(exec_summary);
        report
    }

    // ── LLM verification gate ───────────────────────────────────────────

    /// Tasks selected for verification: explicit `verify` flag, output
    /// task types, members of the final batch, or output-sounding
    /// content.
    fn tasks_requiring_verification(&self) -> Vec<Task> {
        const OUTPUT_KEYWORDS: &[&str] =
            &["final", "output", "report", "deliver", "summary", "conclude"];
        let graph = self.graph.read().unwrap();

        let final_ids: Vec<String> = graph
            .execution_order()
            .last()
            .map(|batch| batch.iter().map(|t| t.id.clone()).collect())
            .unwrap_or_default();

        graph
            .all()
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .filter(|task| {
                task.verify
                    || self
                        .config
                        .output_types
                        .iter()
                        .any(|t| task.task_type.as_str().contains(t.as_str()))
                    || final_ids.contains(&task.id)
                    || contains_any(&task.content, OUTPUT_KEYWORDS)
            })
            .cloned()
            .collect()
    }

    /// Evidence package for one task: the claim, recent log entries,
    /// file facts, and any prior provenance findings.
    fn build_verification_context(
        &self,
        task: &Task,
        prior: Option<&ProvenanceResult>,
    ) -> String {
        let mut claim_parts = Vec::new();
        if let Some(original) = &self.config.original_request {
            claim_parts.push(format!("ORIGINAL USER GOAL: {}\n", original));
        }
        claim_parts.push(format!("Task: {}", task.content));
        if let Some(result) = &task.result {
            let mut text = result.to_string();
            if text.len() > 1000 {
                text.truncate(1000);
                text.push_str("...");
            }
            claim_parts.push(format!("Claimed result: {}", text));
        }
        if let Some(produces) = &task.produces {
            claim_parts.push(format!("Claimed output: {}", produces));
        }

        let mut evidence_parts = Vec::new();

        let fetches = self.provenance.fetch_log().recent_fetches(5);
        if !fetches.is_empty() {
            evidence_parts.push("## Fetch Log (recent HTTP requests)".to_string());
            for entry in &fetches {
                let url: String = entry.url.chars().take(80).collect();
                evidence_parts.push(format!(
                    "- {}: status={}, success={}",
                    url, entry.status_code, entry.success
                ));
            }
        }

        let execs = self.provenance.exec_log().recent_executions(5);
        if !execs.is_empty() {
            evidence_parts.push("\n## Exec Log (recent commands)".to_string());
            for entry in &execs {
                let cmd: String = entry.command.chars().take(60).collect();
                evidence_parts.push(format!(
                    "- {}: exit={}, success={}",
                    cmd, entry.exit_code, entry.success
                ));
            }
        }

        if let Some(produces) = &task.produces {
            if let ArtifactSpec::File { path, .. } = ArtifactSpec::parse(produces) {
                let resolved =
                    if path.is_absolute() { path } else { self.working_dir.join(path) };
                evidence_parts.push(format!("\n## File Evidence: {}", resolved.display()));
                if resolved.exists() {
                    let size = std::fs::metadata(&resolved).map(|m| m.len()).unwrap_or(0);
                    evidence_parts.push("- File exists: Yes".to_string());
                    evidence_parts.push(format!("- File size: {} bytes", size));
                    if let Ok(content) = std::fs::read_to_string(&resolved) {
                        let preview: String = content.chars().take(500).collect();
                        evidence_parts
                            .push(format!("- Content preview:\n```\n{}\n```", preview));
                    }
                } else {
                    evidence_parts.push("- File exists: No".to_string());
                }
            }
        }

        if let Some(prov) = prior {
            evidence_parts.push("\n## Provenance Check".to_string());
            evidence_parts.push(format!("- Valid: {}", prov.valid));
            for issue in prov.issues.iter().take(3) {
                evidence_parts.push(format!("- Issue: {}", issue.message));
            }
        }

        let evidence = if evidence_parts.is_empty() {
            "No evidence available".to_string()
        } else {
            evidence_parts.join("\n")
        };

        format!(
            "Please verify the following claim and evidence.\n\n\
             ## CLAIM TO AUDIT\n{}\n\n\
             ## EVIDENCE PROVIDED\n{}\n\n\
             Respond with a JSON object containing your verdict, confidence, \
             issues found, etc.",
            claim_parts.join("\n"),
            evidence
        )
    }

    async fn run_llm_verification_gate(
        &self,
        tasks: &[Task],
        prior_provenance: &HashMap<String, ProvenanceResult>,
        results: &mut HashMap<String, VerificationVerdict>,
    ) -> GateReport {
        let Some(subagent) = &self.subagent else {
            tracing::warn!("llm verification skipped: no sub-executor orchestrator");
            return GateReport { passed: true, ..Default::default() };
        };

        let mut report = GateReport::default();

        for task in tasks {
            let prompt =
                self.build_verification_context(task, prior_provenance.get(&task.id));

            // Fresh context every spawn: the verifier never inherits
            // conversation state.
            let spawn_result = subagent.spawn("verifier", &prompt).await;

            let verdict = if spawn_result.success {
                parse_verdict(&spawn_result.output)
            } else {
                VerificationVerdict::insufficient(format!(
                    "Verifier error: {}",
                    spawn_result.error.unwrap_or_default()
                ))
            };

            let passed = verdict.verdict == "verified"
                && verdict.confidence >= self.config.verification_threshold;

            if passed {
                report.verified += 1;
                tracing::info!(task = %task.id, confidence = verdict.confidence, "verified");
            } else {
                report.failed += 1;
                report.issues.push(format!(
                    "[{}] verification {}: {}",
                    task.id,
                    if verdict.verdict == "refuted" { "refuted" } else { "insufficient" },
                    verdict
                        .issues
                        .first()
                        .cloned()
                        .unwrap_or_else(|| verdict.reasoning.chars().take(100).collect())
                ));
                tracing::warn!(
                    task = %task.id,
                    verdict = %verdict.verdict,
                    confidence = verdict.confidence,
                    "verification did not pass"
                );
            }

            results.insert(task.id.clone(), verdict);
        }

        report.passed = report.failed == 0;
        report
    }
}

/// Pull the first JSON object out of the verifier's output.
fn parse_verdict(output: &str) -> VerificationVerdict {
    let Some(start) = output.find('{') else {
        return VerificationVerdict::insufficient("Could not parse verifier response");
    };
    let Some(end) = output.rfind('}') else {
        return VerificationVerdict::insufficient("Could not parse verifier response");
    };
    if end < start {
        return VerificationVerdict::insufficient("Could not parse verifier response");
    }
    serde_json::from_str(&output[start..=end])
        .unwrap_or_else(|_| VerificationVerdict::insufficient("Invalid JSON response from verifier"))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Declarative workflow construction.
///
/// ```
/// # use taskforge::orchestrator::WorkflowBuilder;
/// # use taskforge::graph::TaskType;
/// let graph = WorkflowBuilder::new()
///     .add("research_api", "Research REST API patterns", TaskType::Research, &[])
///     .add("design", "Design the API", TaskType::General, &["research_api"])
///     .build()
///     .unwrap();
/// ```
pub struct WorkflowBuilder {
    tasks: Vec<Task>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn add(
        mut self,
        id: &str,
        content: &str,
        task_type: TaskType,
        depends_on: &[&str],
    ) -> Self {
        let task = Task::new(id, content)
            .with_type(task_type)
            .with_depends_on(depends_on.iter().map(|s| s.to_string()).collect())
            .with_result_key(id);
        self.tasks.push(task);
        self
    }

    /// Add a fully-configured task.
    pub fn add_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Tasks that must run one after another; each depends on the
    /// previous and none may parallelize.
    pub fn add_sequence(mut self, tasks: Vec<Task>) -> Self {
        let mut prev_id: Option<String> = None;
        for mut task in tasks {
            if let Some(prev) = &prev_id {
                if !task.depends_on.contains(prev) {
                    task.depends_on.push(prev.clone());
                }
            }
            task.can_parallel = false;
            prev_id = Some(task.id.clone());
            self.tasks.push(task);
        }
        self
    }

    pub fn build(self) -> Result<Arc<RwLock<TaskGraph>>, crate::error::EngineError> {
        self.build_in(".")
    }

    pub fn build_in(
        self,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Arc<RwLock<TaskGraph>>, crate::error::EngineError> {
        let mut graph = TaskGraph::with_working_dir(working_dir.into());
        for task in self.tasks {
            graph.add(task);
        }
        graph.validate()?;
        Ok(Arc::new(RwLock::new(graph)))
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
