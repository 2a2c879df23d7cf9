use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject};
use sieve_core::{ObjectKey, ObjectKind};
use sieve_kubehub::{MemoryStore, ObjectStore, StoreError};
use sieve_reconcile::{Context, DispatchError, Dispatcher, HandlerKind, HandlerSet, Outcome};
use tokio_util::sync::CancellationToken;

type Calls = Arc<Mutex<Vec<&'static str>>>;

fn key() -> ObjectKey { ObjectKey::namespaced("biz", "baz") }

fn secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("baz".into()),
            namespace: Some("biz".into()),
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([("token".to_string(), "abc".to_string())])),
        ..Default::default()
    }
}

fn store_with_secret() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let ar = ApiResource::erase::<Secret>(&());
    let obj: DynamicObject = serde_json::from_value(serde_json::to_value(secret()).expect("json")).expect("dynamic");
    store.insert(&ar, obj).expect("insert");
    store
}

fn recording(calls: &Calls, tag: &'static str, fail: bool) -> impl sieve_reconcile::Handler<Secret> {
    let calls = calls.clone();
    move |obj: Arc<Secret>, _ctx: Context| {
        let calls = calls.clone();
        async move {
            assert_eq!(obj.metadata.name.as_deref(), Some("baz"));
            calls.lock().expect("lock").push(tag);
            if fail {
                anyhow::bail!("{} failed", tag);
            }
            anyhow::Ok(())
        }
    }
}

#[tokio::test]
async fn not_found_invokes_nothing() {
    let calls = Calls::default();
    let handlers = HandlerSet::new()
        .with_create_or_update(recording(&calls, "cu", false))
        .with_delete(recording(&calls, "del", false));
    let d = Dispatcher::typed(Arc::new(MemoryStore::new()), handlers, "sieve");

    let out = d.reconcile(&key(), &CancellationToken::new()).await.expect("ok");
    assert_eq!(out, Outcome::NotFound);
    assert!(calls.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn typed_object_reaches_both_handlers_delete_first() {
    let calls = Calls::default();
    let handlers = HandlerSet::new()
        .with_create_or_update(recording(&calls, "cu", false))
        .with_delete(recording(&calls, "del", false));
    let d = Dispatcher::typed(store_with_secret(), handlers, "sieve");

    let out = d.reconcile(&key(), &CancellationToken::new()).await.expect("ok");
    assert_eq!(out, Outcome::Handled(vec![HandlerKind::Delete, HandlerKind::CreateOrUpdate]));
    assert_eq!(*calls.lock().expect("lock"), vec!["del", "cu"]);
}

#[tokio::test]
async fn delete_failure_stops_create_or_update() {
    let calls = Calls::default();
    let handlers = HandlerSet::new()
        .with_create_or_update(recording(&calls, "cu", false))
        .with_delete(recording(&calls, "del", true));
    let d = Dispatcher::typed(store_with_secret(), handlers, "sieve");

    let err = d.reconcile(&key(), &CancellationToken::new()).await.expect_err("fails");
    match err {
        DispatchError::Handler { kind, source } => {
            assert_eq!(kind, HandlerKind::Delete);
            assert_eq!(source.to_string(), "del failed");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(*calls.lock().expect("lock"), vec!["del"]);
}

#[tokio::test]
async fn only_registered_handler_runs() {
    let calls = Calls::default();
    let handlers = HandlerSet::new().with_create_or_update(recording(&calls, "cu", false));
    let d = Dispatcher::typed(store_with_secret(), handlers, "sieve");

    let out = d.reconcile(&key(), &CancellationToken::new()).await.expect("ok");
    assert_eq!(out, Outcome::Handled(vec![HandlerKind::CreateOrUpdate]));
}

#[tokio::test]
async fn cancelled_before_fetch() {
    let calls = Calls::default();
    let handlers = HandlerSet::new().with_create_or_update(recording(&calls, "cu", false));
    let d = Dispatcher::typed(store_with_secret(), handlers, "sieve");
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(d.reconcile(&key(), &cancel).await, Err(DispatchError::Cancelled)));
    assert!(calls.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn cancelled_while_handler_waits() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let handlers = HandlerSet::new().with_create_or_update(move |_o: Arc<Secret>, ctx: Context| {
        let trigger = trigger.clone();
        async move {
            trigger.cancel();
            ctx.cancel().cancelled().await;
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            anyhow::Ok(())
        }
    });
    let d = Dispatcher::typed(store_with_secret(), handlers, "sieve");
    assert!(matches!(d.reconcile(&key(), &cancel).await, Err(DispatchError::Cancelled)));
}

/// Store returning objects without apiVersion/kind, or a fixed failure.
struct RawStore {
    fail: bool,
}

#[async_trait::async_trait]
impl ObjectStore for RawStore {
    async fn get(&self, _resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        if self.fail {
            return Err(StoreError::Invalid("boom".into()));
        }
        let mut obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "metadata": { "name": key.name, "namespace": key.namespace },
            "spec": { "size": 3 }
        }))?;
        obj.types = None;
        Ok(obj)
    }

    async fn apply(&self, _resource: &ApiResource, object: &DynamicObject, _fm: &str) -> Result<DynamicObject, StoreError> {
        Ok(object.clone())
    }
}

#[tokio::test]
async fn dynamic_objects_are_stamped_with_gvk() {
    let seen: Arc<Mutex<Option<DynamicObject>>> = Arc::default();
    let sink = seen.clone();
    let handlers = HandlerSet::new().with_create_or_update(move |o: Arc<DynamicObject>, ctx: Context| {
        let sink = sink.clone();
        async move {
            assert!(ctx.kind().is_dynamic());
            *sink.lock().expect("lock") = Some((*o).clone());
            anyhow::Ok(())
        }
    });
    let kind = ObjectKind::dynamic("example.com", "v1", "Widget");
    let d = Dispatcher::dynamic(kind, Arc::new(RawStore { fail: false }), handlers, "sieve");

    d.reconcile(&key(), &CancellationToken::new()).await.expect("ok");
    let obj = seen.lock().expect("lock").clone().expect("handler ran");
    let types = obj.types.expect("stamped");
    assert_eq!(types.api_version, "example.com/v1");
    assert_eq!(types.kind, "Widget");
    assert_eq!(obj.data["spec"]["size"], 3);
}

#[tokio::test]
async fn fetch_errors_propagate_unchanged() {
    let handlers = HandlerSet::<DynamicObject>::new();
    let d = Dispatcher::dynamic(ObjectKind::dynamic("", "v1", "ConfigMap"), Arc::new(RawStore { fail: true }), handlers, "sieve");
    match d.reconcile(&key(), &CancellationToken::new()).await {
        Err(DispatchError::Fetch(StoreError::Invalid(msg))) => assert_eq!(msg, "boom"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn handlers_can_write_through_context() {
    let store = store_with_secret();
    let handlers = HandlerSet::new().with_create_or_update(|o: Arc<Secret>, ctx: Context| async move {
        let mut copy = ctx.kind().blank(&ObjectKey::namespaced("biz", "baz-copy"));
        copy.metadata.labels = o.metadata.labels.clone();
        ctx.apply(&copy).await?;
        assert_eq!(ctx.field_manager(), "sieve-test");
        anyhow::Ok(())
    });
    let d = Dispatcher::typed(store.clone(), handlers, "sieve-test");
    d.reconcile(&key(), &CancellationToken::new()).await.expect("ok");

    let copy = store.get(&ApiResource::erase::<Secret>(&()), &ObjectKey::namespaced("biz", "baz-copy")).await.expect("written");
    assert_eq!(copy.metadata.labels.and_then(|l| l.get("app").cloned()).as_deref(), Some("web"));
}
