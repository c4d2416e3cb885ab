//! Browser location abstraction.
//!
//! The URL tier is whatever owns the current query string: the browser's
//! history API in a web front-end, or an in-memory stand-in for tests and
//! the CLI. Implementations must apply changes synchronously.

use std::sync::RwLock;

/// Read and rewrite the current query string.
pub trait Location: Send + Sync {
    /// Current query string, without the leading `?`.
    fn query(&self) -> String;

    /// Replace the current history entry's query string.
    fn replace_query(&self, query: &str);

    /// Push a new history entry with the given query string.
    fn push_query(&self, query: &str);
}

/// In-memory history stack.
#[derive(Debug)]
pub struct MemoryLocation {
    entries: RwLock<Vec<String>>,
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new("")
    }
}

impl MemoryLocation {
    /// Start with one history entry holding `query`.
    pub fn new(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            entries: RwLock::new(vec![query.to_string()]),
        }
    }

    /// Number of history entries.
    pub fn history_len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// All history entries, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Simulate a navigation to a new URL: push an entry with `query`.
    pub fn navigate(&self, query: &str) {
        self.push_query(query.strip_prefix('?').unwrap_or(query));
    }
}

impl Location for MemoryLocation {
    fn query(&self) -> String {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
            .unwrap_or_default()
    }

    fn replace_query(&self, query: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.last_mut() {
            Some(last) => *last = query.to_string(),
            None => entries.push(query.to_string()),
        }
    }

    fn push_query(&self, query: &str) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_keeps_history_length() {
        let location = MemoryLocation::new("?a=1");
        assert_eq!(location.query(), "a=1");
        location.replace_query("a=2");
        assert_eq!(location.query(), "a=2");
        assert_eq!(location.history_len(), 1);
    }

    #[test]
    fn test_push_adds_entry() {
        let location = MemoryLocation::default();
        location.push_query("a=1");
        assert_eq!(location.history(), vec!["".to_string(), "a=1".to_string()]);
        assert_eq!(location.query(), "a=1");
    }
}
