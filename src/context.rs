//! Conversation context sent to the LLM.
//!
//! The window owns the ordered message log of one agent loop. Messages
//! are append-only; `validate_and_repair` is the single privileged
//! mutator. Every compression preserves the tool-use/tool-result pairing
//! the LLM APIs require: an assistant message that issues tool calls must
//! be answered by exactly one tool message per call id before the next
//! assistant turn.

use crate::types::{Message, Role};

pub const REPAIRED_RESULT_TEXT: &str =
    "[Tool execution result unavailable - context was repaired]";

const COMPRESS_KEEP_HEAD: usize = 5;
const COMPRESS_KEEP_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct ContextWindow {
    system_prompt: String,
    messages:      Vec<Message>,
    /// Soft message-count threshold before compression kicks in.
    pub max_messages: usize,
}

impl ContextWindow {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages:      Vec::new(),
            max_messages:  100,
        }
    }

    pub fn from_messages(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            max_messages: 100,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn add_assistant_message(&mut self, message: Message) {
        debug_assert_eq!(message.role, Role::Assistant);
        self.messages.push(message);
    }

    pub fn add_tool_result(
        &mut self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.messages.push(Message::tool_result(tool_call_id, tool_name, content));
    }

    /// Clear all messages but keep the system prompt.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// All messages with the system prompt first: the exact sequence
    /// handed to the LLM adapter.
    pub fn messages_with_system(&self) -> Vec<Message> {
        let mut all = Vec::with_capacity(self.messages.len() + 1);
        all.push(Message::system(self.system_prompt.clone()));
        all.extend(self.messages.iter().cloned());
        all
    }

    /// Rough token estimate (4 chars ≈ 1 token). Used only as a
    /// compression trigger, never for billing.
    pub fn token_estimate(&self) -> usize {
        let mut total_chars = self.system_prompt.len();
        for msg in &self.messages {
            total_chars += msg.content.len();
        }
        total_chars / 4
    }

    // ── Structural repair ───────────────────────────────────────────────

    /// Enforce the tool pairing invariant with a single forward sweep.
    ///
    /// - A tool message answering no open call id is removed.
    /// - An assistant tool call still open at the end receives a
    ///   synthesized tool message inserted directly after its turn's
    ///   existing results.
    ///
    /// Returns a description of every repair made. Running twice in a row
    /// yields an empty second-pass list.
    pub fn validate_and_repair(&mut self) -> Vec<String> {
        let mut issues = Vec::new();
        // id -> (assistant message index, tool name), insertion-ordered
        let mut pending: Vec<(String, usize, String)> = Vec::new();

        let mut i = 0;
        while i < self.messages.len() {
            let msg = &self.messages[i];

            if msg.role == Role::Assistant {
                if let Some(calls) = &msg.tool_calls {
                    for tc in calls {
                        pending.push((tc.id.clone(), i, tc.name.clone()));
                    }
                }
            }

            if msg.role == Role::Tool {
                if let Some(id) = msg.tool_call_id.clone() {
                    if let Some(pos) = pending.iter().position(|(pid, _, _)| *pid == id) {
                        pending.remove(pos);
                    } else {
                        issues.push(format!("Removed orphaned tool_result at index {}", i));
                        self.messages.remove(i);
                        continue; // don't advance i
                    }
                } else {
                    issues.push(format!("Removed tool message without call id at index {}", i));
                    self.messages.remove(i);
                    continue;
                }
            }

            i += 1;
        }

        // Synthesize results for calls that never got one. Process in
        // position order so earlier inserts shift later positions by a
        // known offset.
        pending.sort_by_key(|(_, idx, _)| *idx);
        let mut offset = 0usize;
        for (id, idx, name) in pending {
            let assistant_idx = idx + offset;
            let mut insert_pos = assistant_idx + 1;
            while insert_pos < self.messages.len()
                && self.messages[insert_pos].role == Role::Tool
            {
                insert_pos += 1;
            }
            issues.push(format!("Added missing tool_result for {} (id: {})", name, id));
            self.messages
                .insert(insert_pos, Message::tool_result(id, name, REPAIRED_RESULT_TEXT));
            offset += 1;
        }

        issues
    }

    // ── Compression ─────────────────────────────────────────────────────

    /// True once the message count exceeds the soft threshold.
    pub fn needs_compression(&self) -> bool {
        self.messages.len() > self.max_messages
    }

    /// An index is a safe cut point iff every assistant tool call before
    /// it also has its result before it.
    fn is_safe_cut_point(&self, idx: usize) -> bool {
        if idx == 0 || idx >= self.messages.len() {
            return true;
        }

        let mut open: Vec<&str> = Vec::new();
        for msg in &self.messages[..idx] {
            if msg.role == Role::Assistant {
                if let Some(calls) = &msg.tool_calls {
                    for tc in calls {
                        open.push(tc.id.as_str());
                    }
                }
            }
            if msg.role == Role::Tool {
                if let Some(id) = &msg.tool_call_id {
                    open.retain(|o| o != id);
                }
            }
        }
        open.is_empty()
    }

    /// The `[start, end)` middle slice a compression would replace, or
    /// `None` when no compression is needed or no safe boundaries exist.
    ///
    /// The start boundary is searched forward from the ideal head cut,
    /// the end boundary backward from the ideal tail cut, so neither
    /// boundary orphans a tool call.
    pub fn compression_range(&self) -> Option<(usize, usize)> {
        if !self.needs_compression() {
            return None;
        }
        let len = self.messages.len();

        let mut start = COMPRESS_KEEP_HEAD.min(len);
        while start < len && !self.is_safe_cut_point(start) {
            start += 1;
        }

        let mut end = len.saturating_sub(COMPRESS_KEEP_TAIL);
        while end > 0 && !self.is_safe_cut_point(end) {
            end -= 1;
        }

        if start >= end {
            return None;
        }
        Some((start, end))
    }

    /// Replace `[start, end)` with a single synthesized assistant summary
    /// message, or drop the slice when no summary is given.
    pub fn apply_compression(&mut self, start: usize, end: usize, summary: Option<String>) {
        if start >= end || end > self.messages.len() {
            return;
        }
        match summary {
            Some(text) => {
                let msg = Message::assistant(format!("[Context Summary]\n{}", text));
                self.messages.splice(start..end, std::iter::once(msg));
            }
            None => {
                self.messages.drain(start..end);
            }
        }
    }

    /// Compress when over the threshold, using the caller-provided
    /// summarizer for the middle slice. Returns true if a cut happened.
    pub fn compress_if_needed<F>(&mut self, summarizer: F) -> bool
    where
        F: FnOnce(&[Message]) -> Option<String>,
    {
        let Some((start, end)) = self.compression_range() else {
            return false;
        };
        let summary = summarizer(&self.messages[start..end]);
        self.apply_compression(start, end, summary);
        true
    }
}
