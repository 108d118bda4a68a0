//! Reassembly of streamed function-call state.
//!
//! Upstreams identify an in-flight function call by an item id, a call id, or
//! both, and they deliver the call's arguments as any mix of incremental
//! deltas and whole-string snapshots on `added`/`done` markers. The collector
//! absorbs that traffic in arrival order and answers, per call, with exactly
//! one final argument string.

use std::collections::HashMap;
use std::collections::HashSet;

/// Streaming state for one upstream response.
#[derive(Debug, Default)]
pub struct Collector {
    /// Upstreams may key a call by either id; this records the aliasing.
    item_to_call: HashMap<String, String>,
    /// Argument fragments per call id, concatenated in arrival order.
    call_args: HashMap<String, String>,
    /// Fragments seen before the call id was known, keyed by item id and
    /// flushed into `call_args` once the aliasing is learned.
    item_args: HashMap<String, String>,
    /// First name observed wins.
    call_names: HashMap<String, String>,
    /// Calls already handed to the client, so redundant `done` markers do not
    /// emit twice.
    emitted_calls: HashSet<String>,
    text: String,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the item↔call aliasing and flush any fragments that were
    /// buffered under the item id.
    fn alias(&mut self, item_id: Option<&str>, call_id: &str) {
        let Some(item_id) = item_id else {
            return;
        };
        self.item_to_call
            .insert(item_id.to_string(), call_id.to_string());
        if let Some(buffered) = self.item_args.remove(item_id) {
            self.call_args
                .entry(call_id.to_string())
                .or_default()
                .push_str(&buffered);
        }
    }

    fn resolve(&self, call_id: Option<&str>, item_id: Option<&str>) -> Option<String> {
        if let Some(call_id) = call_id
            && !call_id.is_empty()
        {
            return Some(call_id.to_string());
        }
        item_id.and_then(|id| self.item_to_call.get(id).cloned())
    }

    /// An `output_item.added` (or equivalent) announcing a function call.
    /// A snapshot `arguments` only seeds the buffer when it is still empty;
    /// otherwise the snapshot duplicates deltas we already hold.
    pub fn record_call_added(
        &mut self,
        item_id: Option<&str>,
        call_id: &str,
        name: Option<&str>,
        snapshot: Option<&str>,
    ) {
        self.alias(item_id, call_id);
        if let Some(name) = name
            && !name.is_empty()
        {
            self.call_names
                .entry(call_id.to_string())
                .or_insert_with(|| name.to_string());
        }
        if let Some(snapshot) = snapshot
            && !snapshot.is_empty()
        {
            let buf = self.call_args.entry(call_id.to_string()).or_default();
            if buf.is_empty() {
                buf.push_str(snapshot);
            }
        }
    }

    /// An incremental arguments fragment. Prefers an explicit call id, falls
    /// back through the item aliasing, and as a last resort buffers under the
    /// item id until the aliasing is learned.
    pub fn record_args_delta(&mut self, call_id: Option<&str>, item_id: Option<&str>, delta: &str) {
        if let (Some(call_id), Some(item_id)) = (call_id, item_id)
            && !call_id.is_empty()
        {
            self.alias(Some(item_id), call_id);
        }
        match self.resolve(call_id, item_id) {
            Some(call) => {
                self.call_args.entry(call).or_default().push_str(delta);
            }
            None => {
                if let Some(item_id) = item_id {
                    self.item_args
                        .entry(item_id.to_string())
                        .or_default()
                        .push_str(delta);
                }
            }
        }
    }

    /// An `arguments.done` marker. Same buffering rules as `added`: the
    /// snapshot only initializes an otherwise-empty buffer. Returns the
    /// resolved call id, when one is known.
    pub fn record_args_done(
        &mut self,
        call_id: Option<&str>,
        item_id: Option<&str>,
        snapshot: Option<&str>,
    ) -> Option<String> {
        if let (Some(call_id), Some(item_id)) = (call_id, item_id)
            && !call_id.is_empty()
        {
            self.alias(Some(item_id), call_id);
        }
        let call = self.resolve(call_id, item_id)?;
        if let Some(snapshot) = snapshot
            && !snapshot.is_empty()
        {
            let buf = self.call_args.entry(call.clone()).or_default();
            if buf.is_empty() {
                buf.push_str(snapshot);
            }
        }
        Some(call)
    }

    pub fn record_text_delta(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    pub fn call_id_for_item(&self, item_id: &str) -> Option<&str> {
        self.item_to_call.get(item_id).map(String::as_str)
    }

    pub fn name_for_call(&self, call_id: &str) -> Option<&str> {
        self.call_names.get(call_id).map(String::as_str)
    }

    /// Final reassembled arguments for a call; empty when nothing arrived.
    pub fn args_for_call(&self, call_id: &str) -> &str {
        self.call_args.get(call_id).map(String::as_str).unwrap_or("")
    }

    pub fn all_args(&self) -> &HashMap<String, String> {
        &self.call_args
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// One-shot emission predicate: true the first time a call id is asked
    /// about, false ever after.
    pub fn should_emit(&mut self, call_id: &str) -> bool {
        self.emitted_calls.insert(call_id.to_string())
    }

    /// Call ids that accumulated arguments but were never emitted; used to
    /// flush stragglers when the upstream closes without per-call `done`
    /// markers.
    pub fn unemitted_calls(&self) -> Vec<String> {
        self.call_args
            .keys()
            .filter(|id| !self.emitted_calls.contains(*id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deltas_concatenate_in_arrival_order() {
        let mut c = Collector::new();
        c.record_call_added(Some("item_1"), "call_1", Some("exec"), None);
        c.record_args_delta(Some("call_1"), None, "{\"command\":");
        c.record_args_delta(Some("call_1"), None, "\"ls\"}");
        assert_eq!(c.args_for_call("call_1"), "{\"command\":\"ls\"}");
        assert_eq!(c.name_for_call("call_1"), Some("exec"));
    }

    #[test]
    fn snapshot_ignored_when_deltas_already_buffered() {
        let mut c = Collector::new();
        c.record_args_delta(Some("call_1"), None, "{\"a\":1}");
        c.record_call_added(Some("item_1"), "call_1", Some("exec"), Some("{\"a\":1}"));
        let done = c.record_args_done(Some("call_1"), None, Some("{\"a\":1}"));
        assert_eq!(done.as_deref(), Some("call_1"));
        // The don't-duplicate-deltas rule: neither snapshot is appended.
        assert_eq!(c.args_for_call("call_1"), "{\"a\":1}");
    }

    #[test]
    fn snapshot_seeds_empty_buffer() {
        let mut c = Collector::new();
        c.record_call_added(Some("item_1"), "call_1", Some("read"), Some("{\"path\":\"x\"}"));
        assert_eq!(c.args_for_call("call_1"), "{\"path\":\"x\"}");
        // A later redundant done snapshot is ignored.
        c.record_args_done(Some("call_1"), None, Some("{\"path\":\"x\"}"));
        assert_eq!(c.args_for_call("call_1"), "{\"path\":\"x\"}");
    }

    #[test]
    fn item_buffer_flushes_once_alias_is_learned() {
        let mut c = Collector::new();
        // Deltas arrive keyed by item id before the call is announced.
        c.record_args_delta(None, Some("item_9"), "{\"wor");
        c.record_args_delta(None, Some("item_9"), "kdir\":\"/tmp\"}");
        assert_eq!(c.args_for_call("call_9"), "");
        c.record_call_added(Some("item_9"), "call_9", Some("exec"), None);
        assert_eq!(c.args_for_call("call_9"), "{\"workdir\":\"/tmp\"}");
        assert_eq!(c.call_id_for_item("item_9"), Some("call_9"));
    }

    #[test]
    fn alias_learned_from_done_marker() {
        let mut c = Collector::new();
        c.record_args_delta(None, Some("item_2"), "{}");
        let call = c.record_args_done(Some("call_2"), Some("item_2"), None);
        assert_eq!(call.as_deref(), Some("call_2"));
        assert_eq!(c.args_for_call("call_2"), "{}");
    }

    #[test]
    fn should_emit_is_one_shot() {
        let mut c = Collector::new();
        assert!(c.should_emit("call_1"));
        assert!(!c.should_emit("call_1"));
        assert!(c.should_emit("call_2"));
    }

    #[test]
    fn text_accumulates() {
        let mut c = Collector::new();
        c.record_text_delta("Hello");
        c.record_text_delta(", world");
        assert_eq!(c.text(), "Hello, world");
    }

    #[test]
    fn unemitted_calls_reports_stragglers() {
        let mut c = Collector::new();
        c.record_args_delta(Some("call_a"), None, "{}");
        c.record_args_delta(Some("call_b"), None, "{}");
        assert!(c.should_emit("call_a"));
        let mut left = c.unemitted_calls();
        left.sort();
        assert_eq!(left, vec!["call_b".to_string()]);
    }
}
