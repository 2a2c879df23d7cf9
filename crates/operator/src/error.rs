use std::fmt;

use sieve_reconcile::HandlerKind;
use sieve_selector::SelectorError;

/// One configuration mistake found while building an operator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigProblem {
    #[error("{handler} handler: {source}")]
    Selector { handler: HandlerKind, source: SelectorError },
    #[error("owned kind {kind}: {source}")]
    OwnedSelector { kind: String, source: SelectorError },
    #[error("runtime options supplied more than once")]
    DuplicateRuntimeOptions,
    #[error("runtime option {field}: {reason}")]
    InvalidRuntimeOption { field: &'static str, reason: String },
}

/// Every configuration problem, reported together. Nothing is built when
/// this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub problems: Vec<ConfigProblem>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operator configuration ({} problem", self.problems.len())?;
        if self.problems.len() != 1 {
            f.write_str("s")?;
        }
        f.write_str(")")?;
        for p in &self.problems {
            write!(f, "\n  - {}", p)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}
