use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use kube::core::{DynamicObject, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use sieve_core::{ObjectKey, ObjectKind};
use sieve_kubehub::{ObjectStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Context, HandlerKind, HandlerSet};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("fetch: {0}")]
    Fetch(#[source] StoreError),
    #[error("decode: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("{kind} handler: {source:#}")]
    Handler {
        kind: HandlerKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The object no longer exists; nothing was invoked.
    NotFound,
    /// Handlers invoked, in order.
    Handled(Vec<HandlerKind>),
}

type Decode<K> = fn(DynamicObject, &ObjectKind) -> Result<K, serde_json::Error>;

/// Fetches the live object for an admitted identity and runs the registered
/// handlers against it: delete first, then create-or-update.
pub struct Dispatcher<K> {
    kind: ObjectKind,
    store: Arc<dyn ObjectStore>,
    handlers: HandlerSet<K>,
    field_manager: Arc<str>,
    decode: Decode<K>,
}

impl<K> Dispatcher<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned + Send + Sync + 'static,
{
    /// Dispatcher for a compiled resource type; fetched objects decode into `K`.
    pub fn typed(store: Arc<dyn ObjectStore>, handlers: HandlerSet<K>, field_manager: &str) -> Self {
        Self {
            kind: ObjectKind::typed::<K>(),
            store,
            handlers,
            field_manager: Arc::from(field_manager),
            decode: decode_typed::<K>,
        }
    }
}

impl Dispatcher<DynamicObject> {
    /// Dispatcher for a kind only known by group/version/kind.
    pub fn dynamic(kind: ObjectKind, store: Arc<dyn ObjectStore>, handlers: HandlerSet<DynamicObject>, field_manager: &str) -> Self {
        Self { kind, store, handlers, field_manager: Arc::from(field_manager), decode: stamp_dynamic }
    }
}

fn decode_typed<K: DeserializeOwned>(obj: DynamicObject, _kind: &ObjectKind) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

// The server may omit apiVersion/kind on fetched items.
fn stamp_dynamic(mut obj: DynamicObject, kind: &ObjectKind) -> Result<DynamicObject, serde_json::Error> {
    let ar = kind.api_resource();
    obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    Ok(obj)
}

impl<K: Send + Sync + 'static> Dispatcher<K> {
    /// Fetch through `kind`, e.g. the resource discovery resolved with the
    /// server's plural.
    pub fn with_kind(mut self, kind: ObjectKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn kind(&self) -> &ObjectKind { &self.kind }

    pub fn handlers(&self) -> &HandlerSet<K> { &self.handlers }

    pub fn field_manager(&self) -> &str { &self.field_manager }

    pub fn store(&self) -> &Arc<dyn ObjectStore> { &self.store }

    pub async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Outcome, DispatchError> {
        let started = Instant::now();
        let res = self.reconcile_inner(key, cancel).await;
        let result = match &res {
            Ok(Outcome::NotFound) => "not_found",
            Ok(Outcome::Handled(_)) => "ok",
            Err(DispatchError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        metrics::counter!("sieve_reconcile_total", 1u64, "result" => result);
        metrics::histogram!("sieve_reconcile_seconds", started.elapsed().as_secs_f64());
        res
    }

    async fn reconcile_inner(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Outcome, DispatchError> {
        let live = match cancellable(cancel, self.store.get(self.kind.api_resource(), key)).await? {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!(key = %key, gvk = %self.kind.gvk_key(), "reconcile: object gone");
                return Ok(Outcome::NotFound);
            }
            Err(e) => return Err(DispatchError::Fetch(e)),
        };
        let object = Arc::new((self.decode)(live, &self.kind).map_err(DispatchError::Decode)?);
        let ctx = Context::new(self.store.clone(), self.kind.clone(), cancel.clone(), self.field_manager.clone());

        let mut invoked = Vec::with_capacity(2);
        for kind in [HandlerKind::Delete, HandlerKind::CreateOrUpdate] {
            let Some(handler) = self.handlers.get(kind) else { continue };
            debug!(key = %key, handler = %kind, "reconcile: invoking handler");
            cancellable(cancel, handler.handle(object.clone(), ctx.clone()))
                .await?
                .map_err(|source| {
                    warn!(key = %key, handler = %kind, error = %format!("{:#}", source), "reconcile: handler failed");
                    DispatchError::Handler { kind, source }
                })?;
            invoked.push(kind);
        }
        Ok(Outcome::Handled(invoked))
    }
}

async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, DispatchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        out = fut => Ok(out),
    }
}
