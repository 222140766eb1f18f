//! Context window invariants: tool pairing, repair idempotence, and
//! compression safety.

use std::collections::HashMap;

use taskforge::context::{ContextWindow, REPAIRED_RESULT_TEXT};
use taskforge::types::{Message, Role, ToolCall};

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn call(id: &str, name: &str) -> ToolCall {
    ToolCall::new(id, name, HashMap::new())
}

/// Assert the pairing invariant: every tool call answered exactly once,
/// before the next assistant message; no orphaned results.
fn assert_pairing_holds(ctx: &ContextWindow) {
    let mut open: Vec<String> = Vec::new();
    for msg in ctx.messages() {
        match msg.role {
            Role::Assistant => {
                assert!(
                    open.is_empty(),
                    "assistant message appended while tool calls still open: {:?}",
                    open
                );
                if let Some(calls) = &msg.tool_calls {
                    open.extend(calls.iter().map(|c| c.id.clone()));
                }
            }
            Role::Tool => {
                let id = msg.tool_call_id.as_ref().expect("tool message without call id");
                let pos = open
                    .iter()
                    .position(|o| o == id)
                    .unwrap_or_else(|| panic!("orphaned tool result: {}", id));
                open.remove(pos);
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "unanswered tool calls at end: {:?}", open);
}

// ─────────────────────────────────────────────────────────────────────────────
// P1/P2: repair
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn repair_restores_pairing_from_arbitrary_damage() {
    let mut ctx = ContextWindow::new("sys");
    ctx.add_user_message("task");

    // A good turn, then an orphaned result, then an unanswered call.
    ctx.add_assistant_message(Message::assistant_with_tools("", vec![call("ok", "bash")]));
    ctx.add_tool_result("ok", "bash", "fine");
    ctx.add_tool_result("ghost", "bash", "orphan");
    ctx.add_assistant_message(Message::assistant_with_tools(
        "",
        vec![call("lost-1", "web"), call("lost-2", "web")],
    ));

    let issues = ctx.validate_and_repair();
    assert_eq!(issues.len(), 3, "one removal, two synthesized results: {:?}", issues);
    assert_pairing_holds(&ctx);

    // Synthesized results carry the repair marker.
    let synthesized: Vec<&Message> = ctx
        .messages()
        .iter()
        .filter(|m| m.content == REPAIRED_RESULT_TEXT)
        .collect();
    assert_eq!(synthesized.len(), 2);
    assert_eq!(synthesized[0].tool_call_id.as_deref(), Some("lost-1"));
    assert_eq!(synthesized[1].tool_call_id.as_deref(), Some("lost-2"));
}

#[test]
fn repair_is_idempotent() {
    let mut ctx = ContextWindow::new("sys");
    ctx.add_user_message("task");
    ctx.add_assistant_message(Message::assistant_with_tools("", vec![call("x", "bash")]));
    // no result for x

    let first = ctx.validate_and_repair();
    assert!(!first.is_empty());
    let snapshot: Vec<String> = ctx.messages().iter().map(|m| m.content.clone()).collect();

    let second = ctx.validate_and_repair();
    assert!(second.is_empty(), "second pass found issues: {:?}", second);
    let after: Vec<String> = ctx.messages().iter().map(|m| m.content.clone()).collect();
    assert_eq!(snapshot, after, "second pass changed the message list");
}

#[test]
fn repair_keeps_duplicate_result_out() {
    let mut ctx = ContextWindow::new("sys");
    ctx.add_assistant_message(Message::assistant_with_tools("", vec![call("a", "bash")]));
    ctx.add_tool_result("a", "bash", "first");
    ctx.add_tool_result("a", "bash", "second");

    let issues = ctx.validate_and_repair();
    assert_eq!(issues.len(), 1);
    let tool_msgs = ctx.messages().iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(tool_msgs, 1, "exactly one result per call id");
    assert_pairing_holds(&ctx);
}

// ─────────────────────────────────────────────────────────────────────────────
// P3: compression safety
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn compression_never_orphans_tool_calls() {
    let mut ctx = ContextWindow::new("sys");
    ctx.max_messages = 40;
    ctx.add_user_message("big task");

    // Turns of varying width so cut boundaries land between pairs.
    for i in 0..30 {
        let calls: Vec<ToolCall> = (0..(i % 3) + 1)
            .map(|j| call(&format!("t{}-{}", i, j), "bash"))
            .collect();
        let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
        ctx.add_assistant_message(Message::assistant_with_tools("thinking", calls));
        for id in ids {
            ctx.add_tool_result(id, "bash", "output");
        }
    }

    assert!(ctx.needs_compression());
    let compressed = ctx.compress_if_needed(|middle| {
        assert!(!middle.is_empty());
        Some(format!("{} messages condensed", middle.len()))
    });
    assert!(compressed);
    assert_pairing_holds(&ctx);
    assert!(ctx.validate_and_repair().is_empty());
}

#[test]
fn compression_range_boundaries_are_safe_cut_points() {
    let mut ctx = ContextWindow::new("sys");
    ctx.max_messages = 20;
    ctx.add_user_message("task");
    for i in 0..25 {
        ctx.add_assistant_message(Message::assistant_with_tools(
            "",
            vec![call(&format!("c{}", i), "bash")],
        ));
        ctx.add_tool_result(format!("c{}", i), "bash", "ok");
    }

    let (start, end) = ctx.compression_range().expect("compression expected");
    assert!(start < end);

    // Dropping the middle outright must still preserve pairing: both
    // boundaries are safe.
    let mut truncated = ctx.clone();
    truncated.apply_compression(start, end, None);
    assert_pairing_holds(&truncated);
}

#[test]
fn token_estimate_drives_nothing_but_compression() {
    let mut ctx = ContextWindow::new("x".repeat(400));
    assert_eq!(ctx.token_estimate(), 100);
    ctx.add_user_message("y".repeat(400));
    assert_eq!(ctx.token_estimate(), 200);
}
