//! Sieve kubehub: object store client, kind resolution and watch wiring

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use futures::StreamExt;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    runtime::{watcher, WatchStreamExt},
    Client,
};
use sieve_core::ObjectKind;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod events;
mod store;

pub use events::{EventSource, Observed};
pub use store::{KubeStore, MemoryStore, ObjectStore, StoreError};

/// A change observed by one of the operator's watches.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Index of the watch that produced the change.
    pub source: usize,
    pub change: Observed,
}

/// Resolve the served resource for `kind` via discovery. Returns the kind with
/// the server's plural and whether it is namespaced.
pub async fn resolve(client: Client, kind: &ObjectKind) -> Result<(ObjectKind, bool)> {
    let wanted = kind.api_resource();
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == wanted.group && ar.version == wanted.version && ar.kind == wanted.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                let resolved = match kind {
                    ObjectKind::Typed(_) => ObjectKind::Typed(ar),
                    ObjectKind::Dynamic(_) => ObjectKind::Dynamic(ar),
                };
                return Ok((resolved, namespaced));
            }
        }
    }
    Err(anyhow!("kind not served: {}", kind.gvk_key()))
}

fn watch_api(client: Client, ar: &ApiResource, namespaced: bool, namespace: Option<&str>) -> Api<DynamicObject> {
    match (namespaced, namespace) {
        (true, Some(ns)) => Api::namespaced_with(client, ns, ar),
        _ => Api::all_with(client, ar),
    }
}

/// Start list+watch for `kind` and forward translated changes into `tx`.
/// Returns when the receiver is dropped or the stream ends.
pub async fn start_watcher(
    client: Client,
    kind: &ObjectKind,
    namespaced: bool,
    namespace: Option<&str>,
    source: usize,
    tx: mpsc::Sender<WatchEvent>,
) -> Result<()> {
    let gvk = kind.gvk_key();
    let api = watch_api(client, kind.api_resource(), namespaced, namespace);
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut events = EventSource::new();
    info!(gvk = %gvk, ns = ?namespace, source, "watcher started");
    while let Some(ev) = stream.next().await {
        let ev = match ev {
            Ok(ev) => ev,
            Err(e) => {
                warn!(gvk = %gvk, error = %e, "watch error; backing off");
                metrics::counter!("sieve_watch_errors_total", 1u64, "gvk" => gvk.clone());
                continue;
            }
        };
        if let watcher::Event::Restarted(list) = &ev {
            debug!(gvk = %gvk, count = list.len(), "watch restart");
        }
        for change in events.observe(ev) {
            if tx.send(WatchEvent { source, change }).await.is_err() {
                debug!(gvk = %gvk, "watch receiver dropped");
                return Ok(());
            }
        }
    }
    warn!(gvk = %gvk, "watcher stream ended");
    Ok(())
}
