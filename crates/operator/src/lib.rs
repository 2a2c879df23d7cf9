//! Sieve operator: handler registration, predicate composition and the
//! watch/dispatch loop.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use k8s_openapi::api::core::v1::Secret;
//! # use sieve_operator::{HandlerOptions, Operator};
//! # use sieve_reconcile::Context;
//! # use sieve_selector::Requirement;
//! let operator = Operator::<Secret>::typed()
//!     .on_create_or_update(
//!         |s: Arc<Secret>, _ctx: Context| async move {
//!             tracing::info!(name = ?s.metadata.name, "reconciling");
//!             anyhow::Ok(())
//!         },
//!         HandlerOptions::new().with_label("important", Requirement::Present),
//!     )
//!     .build()
//!     .expect("valid configuration");
//! # let _ = operator;
//! ```

#![forbid(unsafe_code)]

mod builder;
mod config;
mod error;
mod options;
mod queue;
mod runtime;

pub use builder::{compose, Operator, OperatorBuilder, OwnedKind};
pub use config::{KindRef, OperatorConfig, OwnsRef, RuntimeConfig};
pub use error::{ConfigError, ConfigProblem};
pub use options::{HandlerOptions, RuntimeOptions, DEFAULT_FIELD_MANAGER};
