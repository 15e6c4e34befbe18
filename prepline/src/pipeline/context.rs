//! Execution context shared by the tasks of one chain run.

use serde_json::{Map, Value};

/// Reserved key carrying the chain's failure signal.
pub const ERROR_KEY: &str = "error";

/// Key/value state threaded through one chain run.
///
/// Tasks are heterogeneous, so values stay weakly typed (`serde_json::Value`).
/// The `error` entry lives in its own slot: it is the only failure signal of
/// the chain and is never part of a persisted snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    entries: Map<String, Value>,
    error: Option<Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from previously persisted entries.
    pub fn from_snapshot(snapshot: Map<String, Value>) -> Self {
        let mut ctx = Self::new();
        ctx.merge(&snapshot);
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if key == ERROR_KEY {
            return self.error.as_ref();
        }
        self.entries.get(key)
    }

    /// String value of `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value. Inserting under `error` sets the error slot.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if key == ERROR_KEY {
            self.error = Some(value);
        } else {
            self.entries.insert(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if key == ERROR_KEY {
            return self.error.take();
        }
        self.entries.remove(key)
    }

    pub fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    /// Record a failure cause. A later failure overwrites an earlier one.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(Value::String(message.into()));
    }

    pub fn has_error(&self) -> bool {
        self.error.as_ref().is_some_and(|v| !v.is_null())
    }

    /// Error message, stringified on a best-effort basis.
    /// Returns an empty string when no error is recorded.
    pub fn error_message(&self) -> String {
        match &self.error {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Copy of every entry except `error`.
    ///
    /// This is what gets persisted for a successful step: it must never carry
    /// the failure marker of an earlier task.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries.clone()
    }

    /// Copy entries from a snapshot, overwriting existing keys.
    /// An `error` entry in the snapshot is ignored.
    pub fn merge(&mut self, snapshot: &Map<String, Value>) {
        for (key, value) in snapshot {
            if key != ERROR_KEY {
                self.entries.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_slot_is_separate() {
        let mut ctx = ExecutionContext::new();
        ctx.insert("video_path", "/data/v.mp4");
        ctx.insert(ERROR_KEY, "boom");

        assert!(ctx.has_error());
        assert_eq!(ctx.error_message(), "boom");
        assert_eq!(ctx.get_str("error"), Some("boom"));
        assert_eq!(ctx.len(), 1);

        let snapshot = ctx.snapshot();
        assert!(!snapshot.contains_key(ERROR_KEY));
        assert_eq!(snapshot.get("video_path"), Some(&json!("/data/v.mp4")));
    }

    #[test]
    fn test_error_message_best_effort() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(ctx.error_message(), "");
        assert!(!ctx.has_error());

        ctx.insert(ERROR_KEY, json!({"code": 7}));
        assert_eq!(ctx.error_message(), r#"{"code":7}"#);

        ctx.remove(ERROR_KEY);
        assert!(!ctx.has_error());
    }

    #[test]
    fn test_merge_ignores_error_and_overwrites() {
        let mut ctx = ExecutionContext::new();
        ctx.insert("audio_path", "old");

        let mut snapshot = Map::new();
        snapshot.insert("audio_path".into(), json!("new"));
        snapshot.insert(ERROR_KEY.into(), json!("stale failure"));
        ctx.merge(&snapshot);

        assert_eq!(ctx.get_str("audio_path"), Some("new"));
        assert!(!ctx.has_error());
    }

    #[test]
    fn test_from_snapshot() {
        let mut snapshot = Map::new();
        snapshot.insert("caption_path".into(), json!("/data/c.srt"));
        let ctx = ExecutionContext::from_snapshot(snapshot);
        assert_eq!(ctx.get_str("caption_path"), Some("/data/c.srt"));
        assert!(!ctx.is_empty());
    }
}
