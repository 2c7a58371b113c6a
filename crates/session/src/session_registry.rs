//! Session registry (§4.10): `session_id → SessionMetadata`, plus a
//! global monotonic sequence counter. Grounded in the teacher's general
//! "registry keyed by string id, guarded by a concurrent map" pattern
//! (`dashmap::DashMap`, used throughout `crates/search/src/index.rs` for
//! `postings`/`doc_freqs`); no teacher module owns session-level
//! metadata directly, so this is newly built in that idiom, with an
//! `AtomicU64` sequence counter matching `InvertedIndex::version`'s
//! pattern.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use memcore::{Error, NodeId, Result};
use mem_search::InvertedIndex;

use crate::keyword_extractor::{self, IdentifierKind};

/// A session's accumulated metadata (§4.10).
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub session_id: String,
    pub agent_id: String,
    pub root_node_id: NodeId,
    pub created_at: u64,
    pub last_active_at: u64,
    pub sequence_num: u64,
    pub title: Option<String>,
    pub title_generated: bool,
    pub keywords: Vec<(String, f32)>,
    pub identifiers: Vec<(String, IdentifierKind)>,
    pub file_paths: Vec<String>,
    pub message_count: u64,
    pub block_count: u64,
    pub statement_count: u64,
}

/// Keyed by `session_id`; a global `AtomicU64` assigns both registration
/// sequence numbers and externally-tagged mutation sequence numbers.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionMetadata>,
    counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry { sessions: DashMap::new(), counter: AtomicU64::new(0) }
    }

    /// Increment and return the global sequence counter. Used internally by
    /// `register` and externally by callers tagging mutations (§4.10).
    pub fn next_sequence(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register a new session; fails with `Exists` if `session_id` is
    /// already registered (§4.10 uniqueness check).
    pub fn register(&self, session_id: &str, agent_id: &str, root_node_id: NodeId, now: u64) -> Result<()> {
        if self.sessions.contains_key(session_id) {
            return Err(Error::Exists(format!("session {session_id}")));
        }
        let sequence_num = self.next_sequence();
        self.sessions.insert(
            session_id.to_string(),
            SessionMetadata {
                session_id: session_id.to_string(),
                agent_id: agent_id.to_string(),
                root_node_id,
                created_at: now,
                last_active_at: now,
                sequence_num,
                title: None,
                title_generated: false,
                keywords: Vec::new(),
                identifiers: Vec::new(),
                file_paths: Vec::new(),
                message_count: 0,
                block_count: 0,
                statement_count: 0,
            },
        );
        tracing::debug!(session_id, agent_id, "session registered");
        Ok(())
    }

    /// Extract keywords/identifiers/file paths from `text` and merge them
    /// into the session's lists, de-duplicating by word/name/path and
    /// keeping the better score on collision (§4.10).
    pub fn update_content(&self, session_id: &str, text: &str, index: &InvertedIndex, now: u64) -> Result<()> {
        let mut entry =
            self.sessions.get_mut(session_id).ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

        for (word, score) in keyword_extractor::extract_keywords(text, index) {
            match entry.keywords.iter_mut().find(|(w, _)| *w == word) {
                Some((_, existing)) => {
                    if score > *existing {
                        *existing = score;
                    }
                }
                None => entry.keywords.push((word, score)),
            }
        }
        entry.keywords.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        entry.keywords.truncate(memcore::MAX_KEYWORDS);

        for (name, kind) in keyword_extractor::extract_identifiers(text) {
            if !entry.identifiers.iter().any(|(n, _)| *n == name) {
                entry.identifiers.push((name, kind));
            }
        }
        entry.identifiers.truncate(memcore::MAX_IDENTIFIERS);

        for path in keyword_extractor::extract_file_paths(text) {
            if !entry.file_paths.iter().any(|p| *p == path) {
                entry.file_paths.push(path);
            }
        }
        entry.file_paths.truncate(memcore::MAX_FILE_PATHS);

        entry.last_active_at = now;
        tracing::trace!(
            session_id,
            keywords = entry.keywords.len(),
            identifiers = entry.identifiers.len(),
            file_paths = entry.file_paths.len(),
            "session content updated"
        );
        Ok(())
    }

    pub fn set_title(&self, session_id: &str, title: &str) -> Result<()> {
        let mut entry =
            self.sessions.get_mut(session_id).ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        entry.title = Some(title.to_string());
        entry.title_generated = true;
        Ok(())
    }

    pub fn update_stats(&self, session_id: &str, dmsg: u64, dblk: u64, dstmt: u64) -> Result<()> {
        let mut entry =
            self.sessions.get_mut(session_id).ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        entry.message_count += dmsg;
        entry.block_count += dblk;
        entry.statement_count += dstmt;
        Ok(())
    }

    /// Session ids, optionally filtered by `agent_id` and by
    /// `last_active_at ∈ [from, to]`, ordered by registration sequence.
    pub fn list(&self, agent_filter: Option<&str>, time_filter: Option<(u64, u64)>) -> Vec<String> {
        let mut matches: Vec<(u64, String)> = self
            .sessions
            .iter()
            .filter(|entry| agent_filter.map_or(true, |a| entry.agent_id == a))
            .filter(|entry| time_filter.map_or(true, |(from, to)| entry.last_active_at >= from && entry.last_active_at <= to))
            .map(|entry| (entry.sequence_num, entry.session_id.clone()))
            .collect();
        matches.sort_by_key(|(seq, _)| *seq);
        matches.into_iter().map(|(_, id)| id).collect()
    }

    pub fn find_by_keyword(&self, word: &str) -> Vec<String> {
        let needle = word.to_lowercase();
        self.sessions
            .iter()
            .filter(|entry| entry.keywords.iter().any(|(w, _)| w.to_lowercase().contains(&needle)))
            .map(|entry| entry.session_id.clone())
            .collect()
    }

    pub fn find_by_file(&self, substring: &str) -> Vec<String> {
        let needle = substring.to_lowercase();
        self.sessions
            .iter()
            .filter(|entry| entry.file_paths.iter().any(|p| p.to_lowercase().contains(&needle)))
            .map(|entry| entry.session_id.clone())
            .collect()
    }

    pub fn get_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        self.sessions.get(session_id).map(|e| e.clone()).ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }
}

impl Default for SessionRegistry {
    fn default() -> SessionRegistry {
        SessionRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_duplicate_session_id() {
        let registry = SessionRegistry::new();
        registry.register("s1", "agent-1", 0, 1).unwrap();
        let err = registry.register("s1", "agent-1", 0, 2).unwrap_err();
        assert!(err.is_exists());
    }

    #[test]
    fn update_content_merges_and_dedups_keeping_best_score() {
        let registry = SessionRegistry::new();
        registry.register("s1", "agent-1", 0, 1).unwrap();
        let mut index = InvertedIndex::new();
        index.index(0, &["rust".into(), "arena".into()]);

        registry.update_content("s1", "rust memory arena allocator", &index, 2).unwrap();
        registry.update_content("s1", "rust performance benchmarks", &index, 3).unwrap();

        let meta = registry.get_metadata("s1").unwrap();
        let words: Vec<&str> = meta.keywords.iter().map(|(w, _)| w.as_str()).collect();
        assert!(words.contains(&"rust"));
        assert_eq!(meta.last_active_at, 3);
        assert_eq!(words.iter().filter(|w| **w == "rust").count(), 1);
    }

    #[test]
    fn set_title_marks_generated() {
        let registry = SessionRegistry::new();
        registry.register("s1", "agent-1", 0, 1).unwrap();
        registry.set_title("s1", "Debugging session").unwrap();
        let meta = registry.get_metadata("s1").unwrap();
        assert_eq!(meta.title.as_deref(), Some("Debugging session"));
        assert!(meta.title_generated);
    }

    #[test]
    fn update_stats_accumulates() {
        let registry = SessionRegistry::new();
        registry.register("s1", "agent-1", 0, 1).unwrap();
        registry.update_stats("s1", 1, 2, 3).unwrap();
        registry.update_stats("s1", 1, 0, 1).unwrap();
        let meta = registry.get_metadata("s1").unwrap();
        assert_eq!(meta.message_count, 2);
        assert_eq!(meta.block_count, 2);
        assert_eq!(meta.statement_count, 4);
    }

    #[test]
    fn list_filters_by_agent_and_time() {
        let registry = SessionRegistry::new();
        registry.register("s1", "agent-1", 0, 10).unwrap();
        registry.register("s2", "agent-2", 0, 20).unwrap();

        assert_eq!(registry.list(Some("agent-1"), None), vec!["s1".to_string()]);
        assert_eq!(registry.list(None, Some((15, 25))), vec!["s2".to_string()]);
        assert_eq!(registry.list(None, None).len(), 2);
    }

    #[test]
    fn find_by_keyword_and_file_are_case_insensitive_substrings() {
        let registry = SessionRegistry::new();
        registry.register("s1", "agent-1", 0, 1).unwrap();
        let index = InvertedIndex::new();
        registry.update_content("s1", "debugging Rust arena allocator in src/lib.rs", &index, 2).unwrap();

        assert_eq!(registry.find_by_keyword("RUST"), vec!["s1".to_string()]);
        assert_eq!(registry.find_by_file("LIB.RS"), vec!["s1".to_string()]);
        assert!(registry.find_by_keyword("nonexistent").is_empty());
    }

    #[test]
    fn get_metadata_on_unknown_session_is_not_found() {
        let registry = SessionRegistry::new();
        let err = registry.get_metadata("missing").unwrap_err();
        assert!(err.is_not_found());
    }
}
