//! Sieve predicates: admission decisions for change events.
//!
//! A [`Predicate`] is a small immutable tree built once at configuration time
//! and evaluated for every inbound event. Leaves are constants, event-kind
//! gates, metadata selectors and user filters; inner nodes are AND/OR and the
//! logging wrapper.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sieve_core::{Event, EventKind};

mod log;
mod metadata;

pub use metadata::{create_or_update_by_metadata, delete_by_metadata, MetadataPredicate, MetadataScope};

/// User-supplied admission filter.
pub trait EventFilter: Send + Sync {
    fn admit(&self, event: &Event<'_>) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&Event<'_>) -> bool + Send + Sync,
{
    fn admit(&self, event: &Event<'_>) -> bool { self(event) }
}

/// Fixed per-kind allow table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindGate {
    pub create: bool,
    pub update: bool,
    pub delete: bool,
    pub generic: bool,
}

impl KindGate {
    pub fn only(kinds: &[EventKind]) -> Self {
        let mut gate = KindGate::default();
        for kind in kinds {
            match kind {
                EventKind::Create => gate.create = true,
                EventKind::Update => gate.update = true,
                EventKind::Delete => gate.delete = true,
                EventKind::Generic => gate.generic = true,
            }
        }
        gate
    }

    /// Kinds relevant to a create-or-update handler.
    pub fn create_or_update() -> Self { Self::only(&[EventKind::Create, EventKind::Update]) }

    /// Kinds relevant to a delete handler.
    pub fn delete() -> Self { Self::only(&[EventKind::Delete]) }

    pub fn allows(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Create => self.create,
            EventKind::Update => self.update,
            EventKind::Delete => self.delete,
            EventKind::Generic => self.generic,
        }
    }
}

/// Admission function over change events.
#[derive(Clone)]
pub enum Predicate {
    Const(bool),
    Gate(KindGate),
    Metadata(MetadataPredicate),
    /// All must admit; empty admits everything.
    And(Vec<Predicate>),
    /// Any must admit; empty admits nothing.
    Or(Vec<Predicate>),
    Custom(Arc<dyn EventFilter>),
    Logged { inner: Box<Predicate>, log_ignored: bool },
}

impl Predicate {
    pub fn admit(&self, event: &Event<'_>) -> bool {
        match self {
            Predicate::Const(v) => *v,
            Predicate::Gate(gate) => gate.allows(event.kind()),
            Predicate::Metadata(m) => m.admit(event),
            Predicate::And(ps) => ps.iter().all(|p| p.admit(event)),
            Predicate::Or(ps) => ps.iter().any(|p| p.admit(event)),
            Predicate::Custom(f) => f.admit(event),
            Predicate::Logged { inner, log_ignored } => log::admit_logged(inner, *log_ignored, event),
        }
    }

    pub fn create(&self, obj: &ObjectMeta) -> bool { self.admit(&Event::Create(obj)) }

    pub fn update(&self, old: &ObjectMeta, new: &ObjectMeta) -> bool { self.admit(&Event::Update { old, new }) }

    pub fn delete(&self, obj: &ObjectMeta) -> bool { self.admit(&Event::Delete(obj)) }

    pub fn generic(&self, obj: &ObjectMeta) -> bool { self.admit(&Event::Generic(obj)) }

    pub fn and(preds: impl IntoIterator<Item = Predicate>) -> Self { Predicate::And(preds.into_iter().collect()) }

    pub fn or(preds: impl IntoIterator<Item = Predicate>) -> Self { Predicate::Or(preds.into_iter().collect()) }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Event<'_>) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    /// Filter applied to the event's subject object for every kind (the new
    /// object for updates).
    pub fn object<F>(f: F) -> Self
    where
        F: Fn(&ObjectMeta) -> bool + Send + Sync + 'static,
    {
        Self::from_fn(move |ev: &Event<'_>| f(ev.object()))
    }

    /// Admit updates only when `metadata.generation` changed; other kinds pass.
    pub fn generation_changed() -> Self {
        Self::from_fn(|ev: &Event<'_>| match ev {
            Event::Update { old, new } => old.generation != new.generation,
            _ => true,
        })
    }

    /// Wrap in the event logging decorator; the decision is unchanged.
    pub fn logged(self, log_ignored: bool) -> Self { Predicate::Logged { inner: Box::new(self), log_ignored } }
}

impl Default for Predicate {
    fn default() -> Self { Predicate::Const(true) }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Const(v) => f.debug_tuple("Const").field(v).finish(),
            Predicate::Gate(g) => f.debug_tuple("Gate").field(g).finish(),
            Predicate::Metadata(m) => f.debug_tuple("Metadata").field(m).finish(),
            Predicate::And(ps) => f.debug_tuple("And").field(ps).finish(),
            Predicate::Or(ps) => f.debug_tuple("Or").field(ps).finish(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
            Predicate::Logged { inner, log_ignored } => {
                f.debug_struct("Logged").field("inner", inner).field("log_ignored", log_ignored).finish()
            }
        }
    }
}
