use std::sync::Arc;

use kube::core::DynamicObject;
use kube::Resource;
use serde::de::DeserializeOwned;
use sieve_core::ObjectKind;
use sieve_kubehub::ObjectStore;
use sieve_predicates::{create_or_update_by_metadata, delete_by_metadata, KindGate, Predicate};
use sieve_reconcile::{Dispatcher, Handler, HandlerKind, HandlerSet};
use tracing::debug;

use crate::{ConfigError, ConfigProblem, HandlerOptions, RuntimeOptions};

type MakeDispatcher<K> = fn(ObjectKind, Arc<dyn ObjectStore>, HandlerSet<K>, &str) -> Dispatcher<K>;

/// A secondary kind whose admitted events requeue their controlling owner.
#[derive(Debug, Clone)]
pub struct OwnedKind {
    pub kind: ObjectKind,
    pub predicate: Predicate,
}

/// A configured operator: the composed admission predicate, the handler
/// table and the runtime options, all read-only after `build`.
pub struct Operator<K> {
    pub(crate) kind: ObjectKind,
    pub(crate) predicate: Predicate,
    pub(crate) handlers: HandlerSet<K>,
    pub(crate) owns: Vec<OwnedKind>,
    pub(crate) options: RuntimeOptions,
    make_dispatcher: MakeDispatcher<K>,
}

impl<K> Operator<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned + Send + Sync + 'static,
{
    /// Operator over a compiled resource type.
    pub fn typed() -> OperatorBuilder<K> {
        OperatorBuilder::new(ObjectKind::typed::<K>(), |kind, store, handlers, fm| Dispatcher::typed(store, handlers, fm).with_kind(kind))
    }
}

impl Operator<DynamicObject> {
    /// Operator over a kind only known by group/version/kind.
    pub fn dynamic(kind: ObjectKind) -> OperatorBuilder<DynamicObject> { OperatorBuilder::new(kind, Dispatcher::dynamic) }
}

impl<K: Send + Sync + 'static> Operator<K> {
    pub fn kind(&self) -> &ObjectKind { &self.kind }

    /// Composed admission predicate for events of the primary kind.
    pub fn predicate(&self) -> &Predicate { &self.predicate }

    pub fn owns(&self) -> &[OwnedKind] { &self.owns }

    pub fn runtime_options(&self) -> &RuntimeOptions { &self.options }

    pub fn handler_kinds(&self) -> Vec<HandlerKind> { self.handlers.kinds() }

    /// Dispatcher for this operator's handlers over `store`.
    pub fn dispatcher(&self, store: Arc<dyn ObjectStore>) -> Dispatcher<K> { self.dispatcher_for(self.kind.clone(), store) }

    /// Like [`Operator::dispatcher`], fetching through `kind` instead of the
    /// configured kind; used once discovery has resolved the served resource.
    pub fn dispatcher_for(&self, kind: ObjectKind, store: Arc<dyn ObjectStore>) -> Dispatcher<K> {
        (self.make_dispatcher)(kind, store, self.handlers.clone(), &self.options.field_manager)
    }
}

/// Collects registrations and options; every mistake is kept and reported
/// once from [`OperatorBuilder::build`].
pub struct OperatorBuilder<K> {
    kind: ObjectKind,
    handlers: HandlerSet<K>,
    handler_predicates: Vec<(HandlerKind, Predicate)>,
    custom: Vec<Predicate>,
    owns: Vec<OwnedKind>,
    options: Option<RuntimeOptions>,
    problems: Vec<ConfigProblem>,
    make_dispatcher: MakeDispatcher<K>,
}

impl<K: Send + Sync + 'static> OperatorBuilder<K> {
    fn new(kind: ObjectKind, make_dispatcher: MakeDispatcher<K>) -> Self {
        Self {
            kind,
            handlers: HandlerSet::new(),
            handler_predicates: Vec::new(),
            custom: Vec::new(),
            owns: Vec::new(),
            options: None,
            problems: Vec::new(),
            make_dispatcher,
        }
    }

    /// Register the handler for created and updated objects matching `options`.
    pub fn on_create_or_update(mut self, handler: impl Handler<K> + 'static, options: HandlerOptions) -> Self {
        self.register(HandlerKind::CreateOrUpdate, Arc::new(handler), options);
        self
    }

    /// Register the handler for deleted objects matching `options`.
    pub fn on_delete(mut self, handler: impl Handler<K> + 'static, options: HandlerOptions) -> Self {
        self.register(HandlerKind::Delete, Arc::new(handler), options);
        self
    }

    /// A predicate every admitted event must also satisfy.
    pub fn with_custom_predicate(mut self, predicate: Predicate) -> Self {
        self.custom.push(predicate);
        self
    }

    pub fn with_owns(mut self, kind: ObjectKind, predicate: Predicate) -> Self {
        self.owns.push(OwnedKind { kind, predicate });
        self
    }

    /// May be supplied once.
    pub fn with_runtime_options(mut self, options: RuntimeOptions) -> Self {
        if self.options.is_some() {
            self.problems.push(ConfigProblem::DuplicateRuntimeOptions);
        } else {
            self.options = Some(options);
        }
        self
    }

    pub(crate) fn push_problem(&mut self, problem: ConfigProblem) { self.problems.push(problem); }

    pub(crate) fn register(&mut self, kind: HandlerKind, handler: Arc<dyn Handler<K>>, options: HandlerOptions) {
        let HandlerOptions { labels, annotations } = options;
        let (gate, metadata) = match kind {
            HandlerKind::CreateOrUpdate => (KindGate::create_or_update(), create_or_update_by_metadata(Some(labels), Some(annotations))),
            HandlerKind::Delete => (KindGate::delete(), delete_by_metadata(Some(labels), Some(annotations))),
        };
        match metadata {
            Ok(metadata) => {
                self.handler_predicates.retain(|(k, _)| *k != kind);
                self.handler_predicates.push((kind, Predicate::and([Predicate::Gate(gate), metadata])));
            }
            Err(source) => self.problems.push(ConfigProblem::Selector { handler: kind, source }),
        }
        self.handlers.set(kind, handler);
    }

    pub fn build(self) -> Result<Operator<K>, ConfigError> {
        let mut problems = self.problems;
        let options = self.options.unwrap_or_default();
        for (field, reason) in options.problems() {
            problems.push(ConfigProblem::InvalidRuntimeOption { field, reason });
        }
        if !problems.is_empty() {
            return Err(ConfigError { problems });
        }
        let handler_predicates = self.handler_predicates.into_iter().map(|(_, p)| p).collect();
        let predicate = compose(handler_predicates, self.custom, options.log_ignored);
        debug!(gvk = %self.kind.gvk_key(), handlers = ?self.handlers.kinds(), owns = self.owns.len(), "operator built");
        Ok(Operator {
            kind: self.kind,
            predicate,
            handlers: self.handlers,
            owns: self.owns,
            options,
            make_dispatcher: self.make_dispatcher,
        })
    }
}

/// `Logged(And(custom..., Or(handlers...)))`; the OR is left out when no
/// handler is registered since an empty OR rejects everything.
pub fn compose(handler_predicates: Vec<Predicate>, custom: Vec<Predicate>, log_ignored: bool) -> Predicate {
    let mut all = custom;
    if !handler_predicates.is_empty() {
        all.push(Predicate::or(handler_predicates));
    }
    Predicate::and(all).logged(log_ignored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn compose_without_anything_admits_all() {
        let p = compose(vec![], vec![], false);
        let o = ObjectMeta::default();
        assert!(p.create(&o) && p.update(&o, &o) && p.delete(&o) && p.generic(&o));
    }

    #[test]
    fn compose_shape() {
        let p = compose(vec![Predicate::Const(true)], vec![Predicate::Const(false)], true);
        assert_eq!(
            format!("{:?}", p),
            "Logged { inner: And([Const(false), Or([Const(true)])]), log_ignored: true }"
        );
    }
}
