use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieve_selector::{Requirement, Requirements};

/// Label and annotation requirements attached to one handler registration.
/// Repeated `with_*` calls merge; later keys overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerOptions {
    pub labels: Requirements,
    pub annotations: Requirements,
}

impl HandlerOptions {
    pub fn new() -> Self { Self::default() }

    pub fn with_labels(mut self, labels: Requirements) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_annotations(mut self, annotations: Requirements) -> Self {
        self.annotations.extend(annotations);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, req: impl Into<Requirement>) -> Self {
        self.labels.insert(key.into(), req.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, req: impl Into<Requirement>) -> Self {
        self.annotations.insert(key.into(), req.into());
        self
    }
}

pub const DEFAULT_FIELD_MANAGER: &str = "sieve";

/// Knobs for the watch/dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Watch a single namespace; `None` watches all.
    pub namespace: Option<String>,
    /// Maximum identities reconciled at once.
    pub concurrency: usize,
    /// Delay before a failed reconcile is retried.
    pub requeue_after: Duration,
    /// Also log events the predicate rejects.
    pub log_ignored: bool,
    pub field_manager: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 4,
            requeue_after: Duration::from_secs(30),
            log_ignored: false,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl RuntimeOptions {
    /// Apply `SIEVE_CONCURRENCY` and `SIEVE_REQUEUE_SECS` when set and parseable.
    pub fn with_env(mut self) -> Self {
        if let Some(n) = std::env::var("SIEVE_CONCURRENCY").ok().and_then(|s| s.parse::<usize>().ok()) {
            self.concurrency = n;
        }
        if let Some(secs) = std::env::var("SIEVE_REQUEUE_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
            self.requeue_after = Duration::from_secs(secs);
        }
        self
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn requeue_after(mut self, d: Duration) -> Self {
        self.requeue_after = d;
        self
    }

    pub fn log_ignored(mut self, on: bool) -> Self {
        self.log_ignored = on;
        self
    }

    pub fn field_manager(mut self, fm: impl Into<String>) -> Self {
        self.field_manager = fm.into();
        self
    }

    pub(crate) fn problems(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if self.concurrency == 0 {
            out.push(("concurrency", "must be at least 1".to_string()));
        }
        if self.field_manager.trim().is_empty() {
            out.push(("field_manager", "must not be empty".to_string()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_selector::requirements;

    #[test]
    fn handler_options_merge_by_union() {
        let opts = HandlerOptions::new()
            .with_labels(requirements([("foo", "bar"), ("shared", "first")]))
            .with_labels(requirements([("shared", "second")]))
            .with_label("important", Requirement::Present)
            .with_annotations(requirements([("keep", Requirement::Absent)]));
        assert_eq!(opts.labels.len(), 3);
        assert_eq!(opts.labels["shared"], Requirement::from("second"));
        assert_eq!(opts.labels["important"], Requirement::Present);
        assert_eq!(opts.annotations["keep"], Requirement::Absent);
    }

    #[test]
    fn runtime_option_problems() {
        assert!(RuntimeOptions::default().problems().is_empty());
        let bad = RuntimeOptions::default().concurrency(0).field_manager(" ");
        let fields: Vec<_> = bad.problems().into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["concurrency", "field_manager"]);
    }
}
