//! Sub-executor isolation: fresh contexts, filtered tool registries, no
//! recursive spawning, bounded parallel execution.

use std::sync::{Arc, Mutex};

use taskforge::llm::{ChatResponse, LlmClient, MockLlm};
use taskforge::subagent::{
    LlmFactory, SpawnSpec, SubAgent, SubAgentOrchestrator, SubAgentProfile, SubAgentRegistry,
};
use taskforge::tools::{build_registry, TaskSpawnTool, ToolRegistry};
use taskforge::types::Role;

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Factory that scripts every spawned executor with one text reply and
/// records the created mocks for later inspection.
fn recording_factory(reply: &'static str) -> (LlmFactory, Arc<Mutex<Vec<Arc<MockLlm>>>>) {
    let created: Arc<Mutex<Vec<Arc<MockLlm>>>> = Arc::new(Mutex::new(Vec::new()));
    let created_clone = Arc::clone(&created);
    let factory: LlmFactory = Arc::new(move |_profile: &SubAgentProfile| {
        let mock = Arc::new(MockLlm::new(vec![ChatResponse::text(reply)]));
        created_clone.lock().unwrap().push(Arc::clone(&mock));
        mock as Arc<dyn LlmClient>
    });
    (factory, created)
}

fn orchestrator(reply: &'static str) -> (Arc<SubAgentOrchestrator>, Arc<Mutex<Vec<Arc<MockLlm>>>>) {
    let (factory, created) = recording_factory(reply);
    let orch = Arc::new(SubAgentOrchestrator::new(
        build_registry(std::env::temp_dir()),
        std::env::temp_dir(),
        factory,
    ));
    (orch, created)
}

// ─────────────────────────────────────────────────────────────────────────────
// P10: each spawn begins with an empty context
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn spawned_executor_starts_with_fresh_context() {
    let (orch, created) = orchestrator("first answer");

    let r1 = orch.spawn("explore", "look around").await;
    assert!(r1.success);

    // The spawned agent's first LLM call saw only its system prompt and
    // the one task message, nothing inherited.
    let mocks = created.lock().unwrap();
    let first_call = mocks[0].messages_for_call(0).expect("one call made");
    assert_eq!(first_call.len(), 2);
    assert_eq!(first_call[0].role, Role::System);
    assert_eq!(first_call[1].role, Role::User);
    assert!(first_call[1].content.contains("look around"));
}

#[tokio::test]
async fn second_spawn_does_not_see_first_spawn_history() {
    let (orch, created) = orchestrator("answer");

    orch.spawn("explore", "task one").await;
    orch.spawn("explore", "task two").await;

    let mocks = created.lock().unwrap();
    assert_eq!(mocks.len(), 2, "one fresh client per spawn");
    let second_call = mocks[1].messages_for_call(0).unwrap();
    assert!(second_call.iter().all(|m| !m.content.contains("task one")));
}

// ─────────────────────────────────────────────────────────────────────────────
// P11: no recursive spawning
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sub_executor_registry_never_contains_spawn_tools() {
    let (orch, _) = orchestrator("unused");

    // Parent registry *does* carry the task tool.
    let mut parent = build_registry(std::env::temp_dir());
    parent.register(Arc::new(TaskSpawnTool::new(Arc::clone(&orch))));
    assert!(parent.has("task"));

    // Any sub-executor built from it has the spawn tools stripped,
    // whatever its profile allows.
    let registry = SubAgentRegistry::new();
    for name in ["explore", "debug", "research", "plan", "general", "reviewer", "verifier"] {
        let profile = registry.get(name).unwrap().clone();
        let sub = SubAgent::new(
            profile,
            &parent,
            std::env::temp_dir(),
            Arc::new(MockLlm::new(vec![])) as Arc<dyn LlmClient>,
        );
        assert!(!sub.tools().has("task"), "{} can spawn", name);
        assert!(!sub.tools().has("spawn_agent"), "{} can spawn", name);
    }
}

#[tokio::test]
async fn allowed_tools_filter_is_enforced() {
    let registry = SubAgentRegistry::new();
    let explore = registry.get("explore").unwrap().clone();
    let base = build_registry(std::env::temp_dir());

    let sub = SubAgent::new(
        explore,
        &base,
        std::env::temp_dir(),
        Arc::new(MockLlm::new(vec![])) as Arc<dyn LlmClient>,
    );

    for allowed in ["file_ops", "search", "bash"] {
        assert!(sub.tools().has(allowed));
    }
    for denied in ["web", "todo", "ask_user"] {
        assert!(!sub.tools().has(denied), "explore should not have {}", denied);
    }

    // verifier is read-mostly: file inspection only
    let verifier = registry.get("verifier").unwrap().clone();
    let sub = SubAgent::new(
        verifier,
        &base,
        std::env::temp_dir(),
        Arc::new(MockLlm::new(vec![])) as Arc<dyn LlmClient>,
    );
    assert!(sub.tools().has("file_ops"));
    assert!(!sub.tools().has("bash"));
    assert!(!sub.tools().has("web"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Parallel spawning
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_spawn_returns_all_results() {
    let (orch, _) = orchestrator("done");

    let specs = vec![
        SpawnSpec { agent_name: "explore".into(), task: "t1".into() },
        SpawnSpec { agent_name: "explore".into(), task: "t2".into() },
        SpawnSpec { agent_name: "nonexistent".into(), task: "t3".into() },
    ];

    let results = orch.spawn_parallel(specs).await;
    assert_eq!(results.len(), 3);

    let ok = results.iter().filter(|r| r.success).count();
    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(ok, 2);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_ref().unwrap().contains("Unknown agent type"));

    assert_eq!(orch.history().len(), 3);
}

#[tokio::test]
async fn resume_continues_an_existing_session() {
    let created: Arc<Mutex<Vec<Arc<MockLlm>>>> = Arc::new(Mutex::new(Vec::new()));
    let created_clone = Arc::clone(&created);
    let factory: LlmFactory = Arc::new(move |_profile| {
        let mock = Arc::new(MockLlm::new(vec![
            ChatResponse::text("first"),
            ChatResponse::text("second"),
        ]));
        created_clone.lock().unwrap().push(Arc::clone(&mock));
        mock as Arc<dyn LlmClient>
    });
    let orch = Arc::new(SubAgentOrchestrator::new(
        build_registry(std::env::temp_dir()),
        std::env::temp_dir(),
        factory,
    ));

    let first = orch.spawn("general", "start the work").await;
    let session_id = first.session_id.clone().unwrap();

    let resumed = orch.resume(&session_id, "continue the work").await.unwrap();
    assert!(resumed.success);
    assert_eq!(resumed.output, "second");

    // Same client, same conversation: the resumed call sees the earlier
    // exchange.
    let mocks = created.lock().unwrap();
    assert_eq!(mocks.len(), 1);
    let second_call = mocks[0].messages_for_call(1).unwrap();
    assert!(second_call.iter().any(|m| m.content.contains("start the work")));

    assert!(orch.resume("no-such-session", "x").await.is_none());
}
