use std::fmt;
use std::future::Future;
use std::sync::Arc;

use kube::core::{ApiResource, DynamicObject};
use serde::{Deserialize, Serialize};
use sieve_core::{ObjectKey, ObjectKind};
use sieve_kubehub::{ObjectStore, StoreError};
use tokio_util::sync::CancellationToken;

/// Which registered handler an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    CreateOrUpdate,
    Delete,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::CreateOrUpdate => "create-or-update",
            HandlerKind::Delete => "delete",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// What a handler gets besides the object: store access, type information
/// for the tracked kind and the cancellation signal of the current pass.
#[derive(Clone)]
pub struct Context {
    store: Arc<dyn ObjectStore>,
    kind: ObjectKind,
    cancel: CancellationToken,
    field_manager: Arc<str>,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, kind: ObjectKind, cancel: CancellationToken, field_manager: Arc<str>) -> Self {
        Self { store, kind, cancel, field_manager }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> { &self.store }

    pub fn kind(&self) -> &ObjectKind { &self.kind }

    pub fn cancel(&self) -> &CancellationToken { &self.cancel }

    pub fn field_manager(&self) -> &str { &self.field_manager }

    /// Fetch another object of the tracked kind.
    pub async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        self.store.get(self.kind.api_resource(), key).await
    }

    /// Server-side apply an object of the tracked kind under this operator's field manager.
    pub async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.store.apply(self.kind.api_resource(), object, &self.field_manager).await
    }

    /// Server-side apply an object of any kind.
    pub async fn apply_as(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.store.apply(resource, object, &self.field_manager).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind.gvk_key())
            .field("field_manager", &self.field_manager)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// User reconcile logic for one handler kind.
#[async_trait::async_trait]
pub trait Handler<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn handle(&self, object: Arc<K>, ctx: Context) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<K, F, Fut> Handler<K> for F
where
    K: Send + Sync + 'static,
    F: Fn(Arc<K>, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, object: Arc<K>, ctx: Context) -> anyhow::Result<()> { (self)(object, ctx).await }
}

/// At most one handler per kind; setting a kind again replaces it.
pub struct HandlerSet<K> {
    create_or_update: Option<Arc<dyn Handler<K>>>,
    delete: Option<Arc<dyn Handler<K>>>,
}

impl<K: Send + Sync + 'static> HandlerSet<K> {
    pub fn new() -> Self { Self { create_or_update: None, delete: None } }

    pub fn set(&mut self, kind: HandlerKind, handler: Arc<dyn Handler<K>>) {
        match kind {
            HandlerKind::CreateOrUpdate => self.create_or_update = Some(handler),
            HandlerKind::Delete => self.delete = Some(handler),
        }
    }

    pub fn with_create_or_update(mut self, handler: impl Handler<K> + 'static) -> Self {
        self.set(HandlerKind::CreateOrUpdate, Arc::new(handler));
        self
    }

    pub fn with_delete(mut self, handler: impl Handler<K> + 'static) -> Self {
        self.set(HandlerKind::Delete, Arc::new(handler));
        self
    }

    pub fn get(&self, kind: HandlerKind) -> Option<&Arc<dyn Handler<K>>> {
        match kind {
            HandlerKind::CreateOrUpdate => self.create_or_update.as_ref(),
            HandlerKind::Delete => self.delete.as_ref(),
        }
    }

    /// Registered kinds in invocation order.
    pub fn kinds(&self) -> Vec<HandlerKind> {
        [HandlerKind::Delete, HandlerKind::CreateOrUpdate].into_iter().filter(|k| self.get(*k).is_some()).collect()
    }

    pub fn is_empty(&self) -> bool { self.create_or_update.is_none() && self.delete.is_none() }
}

impl<K: Send + Sync + 'static> Default for HandlerSet<K> {
    fn default() -> Self { Self::new() }
}

impl<K> Clone for HandlerSet<K> {
    fn clone(&self) -> Self { Self { create_or_update: self.create_or_update.clone(), delete: self.delete.clone() } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn noop() -> impl Handler<ConfigMap> { |_o: Arc<ConfigMap>, _c: Context| async { anyhow::Ok(()) } }

    #[test]
    fn kinds_are_in_invocation_order() {
        let set = HandlerSet::new().with_create_or_update(noop()).with_delete(noop());
        assert_eq!(set.kinds(), vec![HandlerKind::Delete, HandlerKind::CreateOrUpdate]);
        assert!(HandlerSet::<ConfigMap>::new().is_empty());
    }

    #[test]
    fn handler_kind_names() {
        assert_eq!(HandlerKind::CreateOrUpdate.to_string(), "create-or-update");
        assert_eq!(serde_json::to_string(&HandlerKind::Delete).expect("json"), "\"delete\"");
    }
}
