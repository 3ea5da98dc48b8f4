//! Per-invocation context and the command recorder.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Receives every command sent to the store, in its logged form.
pub trait QueryRecorder: Send + Sync {
    fn record(&self, command: &str);
}

/// Recorder that keeps commands in memory, in order.
#[derive(Debug, Default)]
pub struct CommandLog {
    entries: Mutex<Vec<String>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.entries.lock().ok().and_then(|e| e.last().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.entries.lock() {
            e.clear();
        }
    }
}

impl QueryRecorder for CommandLog {
    fn record(&self, command: &str) {
        if let Ok(mut e) = self.entries.lock() {
            e.push(command.to_string());
        }
    }
}

/// Inputs of one query invocation beyond the query itself.
#[derive(Clone, Default)]
pub struct QueryContext {
    recorder: Option<Arc<dyn QueryRecorder>>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn QueryRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub(crate) fn record(&self, command: impl FnOnce() -> String) {
        if let Some(r) = &self.recorder {
            r.record(&command());
        }
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_is_per_context() {
        let log = Arc::new(CommandLog::new());
        let ctx = QueryContext::new().with_recorder(log.clone());
        ctx.record(|| "ReadItem(None, ALFKI)".to_string());
        QueryContext::new().record(|| "ignored".to_string());
        assert_eq!(log.entries(), vec!["ReadItem(None, ALFKI)"]);
        log.clear();
        assert!(log.is_empty());
    }
}
