use std::collections::BTreeMap;
use std::sync::Mutex;

use kube::api::{Api, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use kube::Client;
use sieve_core::ObjectKey;
use tracing::debug;

/// Errors from the object store. `NotFound` is distinguished so callers can
/// treat a vanished object as done.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("api: {0}")]
    Api(#[source] kube::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound(_)) }

    fn from_kube(err: kube::Error, what: impl std::fmt::Display) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(what.to_string()),
            other => StoreError::Api(other),
        }
    }
}

/// Read/write access to live object state, as seen by the dispatcher and handlers.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the current state of `key`.
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject, StoreError>;

    /// Server-side apply `object`, taking ownership of conflicting fields.
    async fn apply(&self, resource: &ApiResource, object: &DynamicObject, field_manager: &str) -> Result<DynamicObject, StoreError>;
}

/// [`ObjectStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let api = self.api(resource, key.namespace.as_deref());
        let obj = api.get(&key.name).await.map_err(|e| StoreError::from_kube(e, key))?;
        debug!(key = %key, kind = %resource.kind, rv = ?obj.metadata.resource_version, "store: get ok");
        Ok(obj)
    }

    async fn apply(&self, resource: &ApiResource, object: &DynamicObject, field_manager: &str) -> Result<DynamicObject, StoreError> {
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Invalid("object missing metadata.name".into()))?;
        let api = self.api(resource, object.metadata.namespace.as_deref());
        let pp = PatchParams::apply(field_manager).force();
        let out = api
            .patch(name, &pp, &Patch::Apply(object))
            .await
            .map_err(|e| StoreError::from_kube(e, name))?;
        metrics::counter!("sieve_store_apply_total", 1u64, "kind" => resource.kind.clone());
        Ok(out)
    }
}

/// In-memory [`ObjectStore`], keyed by apiVersion/kind and identity.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, ObjectKey), DynamicObject>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn slot(resource: &ApiResource, key: ObjectKey) -> (String, ObjectKey) {
        (format!("{}/{}", resource.api_version, resource.kind), key)
    }

    /// Insert or replace an object, stamping apiVersion/kind from `resource`.
    pub fn insert(&self, resource: &ApiResource, mut object: DynamicObject) -> Result<(), StoreError> {
        let key = ObjectKey::from_meta(&object.metadata)
            .ok_or_else(|| StoreError::Invalid("object missing metadata.name".into()))?;
        object.types = Some(TypeMeta { api_version: resource.api_version.clone(), kind: resource.kind.clone() });
        let mut objects = self.objects.lock().map_err(|_| StoreError::Invalid("store lock poisoned".into()))?;
        objects.insert(Self::slot(resource, key), object);
        Ok(())
    }

    pub fn remove(&self, resource: &ApiResource, key: &ObjectKey) -> Option<DynamicObject> {
        let mut objects = self.objects.lock().ok()?;
        objects.remove(&Self::slot(resource, key.clone()))
    }

    pub fn len(&self) -> usize { self.objects.lock().map(|o| o.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let objects = self.objects.lock().map_err(|_| StoreError::Invalid("store lock poisoned".into()))?;
        objects
            .get(&Self::slot(resource, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn apply(&self, resource: &ApiResource, object: &DynamicObject, _field_manager: &str) -> Result<DynamicObject, StoreError> {
        self.insert(resource, object.clone())?;
        let key = ObjectKey::from_meta(&object.metadata)
            .ok_or_else(|| StoreError::Invalid("object missing metadata.name".into()))?;
        self.get(resource, &key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::ObjectKind;

    #[tokio::test]
    async fn memory_store_roundtrip_and_not_found() {
        let kind = ObjectKind::dynamic("", "v1", "ConfigMap");
        let store = MemoryStore::new();
        let key = ObjectKey::namespaced("biz", "baz");
        assert!(store.get(kind.api_resource(), &key).await.expect_err("missing").is_not_found());

        let mut obj = kind.blank(&key);
        obj.data = serde_json::json!({ "data": { "a": "b" } });
        store.apply(kind.api_resource(), &obj, "test").await.expect("apply");

        let got = store.get(kind.api_resource(), &key).await.expect("get");
        assert_eq!(got.data["data"]["a"], "b");
        assert_eq!(got.types.map(|t| t.kind).as_deref(), Some("ConfigMap"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_separates_kinds() {
        let cm = ObjectKind::dynamic("", "v1", "ConfigMap");
        let secret = ObjectKind::dynamic("", "v1", "Secret");
        let store = MemoryStore::new();
        let key = ObjectKey::namespaced("biz", "baz");
        store.insert(cm.api_resource(), cm.blank(&key)).expect("insert");
        assert!(store.get(secret.api_resource(), &key).await.is_err());
        assert!(store.remove(cm.api_resource(), &key).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn unnamed_objects_are_rejected() {
        let kind = ObjectKind::dynamic("", "v1", "ConfigMap");
        let store = MemoryStore::new();
        let obj = DynamicObject::new("", kind.api_resource());
        let mut unnamed = obj.clone();
        unnamed.metadata.name = None;
        assert!(matches!(store.insert(kind.api_resource(), unnamed), Err(StoreError::Invalid(_))));
    }
}
