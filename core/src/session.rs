//! Process-local session memory.
//!
//! A session remembers the last instructions seen and the shape of past tool
//! calls so a later request that references a call id missing from its own
//! input can still be reconstructed. Eviction is lazy: an entry is only aged
//! out when something touches it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use sha2::Digest;
use sha2::Sha256;

use crate::flags::OPENCLAW_SESSION_TTL_SECS;

/// Name and raw arguments JSON of a historical tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug)]
struct SessionEntry {
    instructions: String,
    instructions_hash: String,
    tool_calls: HashMap<String, ToolCallRecord>,
    last_seen: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            instructions: String::new(),
            instructions_hash: String::new(),
            tool_calls: HashMap::new(),
            last_seen: Instant::now(),
        }
    }
}

pub struct SessionCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(*OPENCLAW_SESSION_TTL_SECS))
    }
}

pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create-or-refresh the entry for a session.
    pub fn touch(&self, session_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            Self::fresh_entry(&mut entries, self.ttl, session_id);
        }
    }

    pub fn save_instructions(&self, session_id: &str, instructions: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            let entry = Self::fresh_entry(&mut entries, self.ttl, session_id);
            entry.instructions = instructions.to_string();
            entry.instructions_hash = sha256_hex(instructions);
        }
    }

    pub fn update_instructions_hash(&self, session_id: &str, hash: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            let entry = Self::fresh_entry(&mut entries, self.ttl, session_id);
            entry.instructions_hash = hash.to_string();
        }
    }

    /// Last instructions seen for this session; `None` when the session is
    /// new, expired, or never carried instructions.
    pub fn instructions(&self, session_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().ok()?;
        let entry = Self::fresh_entry(&mut entries, self.ttl, session_id);
        if entry.instructions.is_empty() {
            None
        } else {
            Some(entry.instructions.clone())
        }
    }

    pub fn instructions_hash(&self, session_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().ok()?;
        let entry = Self::fresh_entry(&mut entries, self.ttl, session_id);
        if entry.instructions_hash.is_empty() {
            None
        } else {
            Some(entry.instructions_hash.clone())
        }
    }

    /// Merge tool-call records into the session. Entries are additive; the
    /// latest record for a call id wins.
    pub fn save_tool_calls<I>(&self, session_id: &str, calls: I)
    where
        I: IntoIterator<Item = (String, ToolCallRecord)>,
    {
        if let Ok(mut entries) = self.entries.lock() {
            let entry = Self::fresh_entry(&mut entries, self.ttl, session_id);
            entry.tool_calls.extend(calls);
        }
    }

    pub fn get_tool_call(&self, session_id: &str, call_id: &str) -> Option<ToolCallRecord> {
        let mut entries = self.entries.lock().ok()?;
        let entry = Self::fresh_entry(&mut entries, self.ttl, session_id);
        entry.tool_calls.get(call_id).cloned()
    }

    /// Lazy TTL check: an expired entry is dropped and replaced by a fresh
    /// one on access; `last_seen` is refreshed either way.
    fn fresh_entry<'a>(
        entries: &'a mut HashMap<String, SessionEntry>,
        ttl: Duration,
        session_id: &str,
    ) -> &'a mut SessionEntry {
        let expired = entries
            .get(session_id)
            .is_some_and(|e| e.last_seen.elapsed() > ttl);
        if expired {
            entries.remove(session_id);
        }
        let entry = entries
            .entry(session_id.to_string())
            .or_insert_with(SessionEntry::new);
        entry.last_seen = Instant::now();
        entry
    }
}
