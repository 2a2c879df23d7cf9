//! Sieve reconcile: turns an admitted identity into handler invocations
//! against freshly fetched, correctly typed object state.

#![forbid(unsafe_code)]

mod dispatch;
mod handler;

pub use dispatch::{DispatchError, Dispatcher, Outcome};
pub use handler::{Context, Handler, HandlerKind, HandlerSet};
