use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use rustc_hash::FxHashMap;
use sieve_core::{ObjectKey, ObjectKind};
use sieve_kubehub::{KubeStore, ObjectStore, WatchEvent};
use sieve_predicates::Predicate;
use sieve_reconcile::{DispatchError, Outcome};
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::WorkQueue;
use crate::Operator;

const WATCH_QUEUE_CAP: usize = 1024;

/// How events from one watch become queued identities.
enum Route {
    Primary(Predicate),
    Owned { predicate: Predicate, owner: OwnerMatch },
}

/// Identifies controller references pointing at the primary kind.
struct OwnerMatch {
    api_version: String,
    kind: String,
    namespaced: bool,
}

impl OwnerMatch {
    fn owner_key(&self, meta: &ObjectMeta) -> Option<ObjectKey> {
        let owner = meta.owner_references.as_ref()?.iter().find(|r| {
            r.controller == Some(true) && r.kind == self.kind && r.api_version == self.api_version
        })?;
        let namespace = if self.namespaced { meta.namespace.as_deref() } else { None };
        Some(ObjectKey::new(namespace, &owner.name))
    }
}

impl<K: Send + Sync + 'static> Operator<K> {
    /// Watch the primary and owned kinds and reconcile admitted identities
    /// until `cancel` fires.
    pub async fn run(&self, client: Client, cancel: CancellationToken) -> Result<()> {
        let (primary, namespaced) = sieve_kubehub::resolve(client.clone(), &self.kind).await?;
        let mut kinds = vec![(primary.clone(), namespaced)];
        for owned in &self.owns {
            kinds.push(sieve_kubehub::resolve(client.clone(), &owned.kind).await?);
        }

        let (tx, rx) = mpsc::channel::<WatchEvent>(WATCH_QUEUE_CAP);
        let mut watchers = JoinSet::new();
        for (source, (kind, kind_namespaced)) in kinds.into_iter().enumerate() {
            let (client, tx, ns) = (client.clone(), tx.clone(), self.options.namespace.clone());
            watchers.spawn(async move {
                if let Err(e) = sieve_kubehub::start_watcher(client, &kind, kind_namespaced, ns.as_deref(), source, tx).await {
                    warn!(gvk = %kind.gvk_key(), error = %e, "watcher failed");
                }
            });
        }
        drop(tx);

        let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client));
        let res = self.drive(store, &primary, namespaced, rx, cancel).await;
        watchers.shutdown().await;
        res
    }

    /// Consume watch events and reconcile. Source 0 is the primary kind,
    /// source `i + 1` is the i-th owned kind. `primary` is the served
    /// resource for the primary kind and is what fetches go to. Returns on
    /// cancellation, or once the event channel is closed and all work has
    /// drained.
    pub async fn drive(
        &self,
        store: Arc<dyn ObjectStore>,
        primary: &ObjectKind,
        primary_namespaced: bool,
        mut rx: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let dispatcher = Arc::new(self.dispatcher_for(primary.clone(), store));
        let routes = self.routes(primary, primary_namespaced);
        let concurrency = self.options.concurrency.max(1);
        let requeue_after = self.options.requeue_after;

        let mut queue = WorkQueue::default();
        let mut tasks: JoinSet<Result<Outcome, DispatchError>> = JoinSet::new();
        let mut running: FxHashMap<task::Id, ObjectKey> = FxHashMap::default();
        let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<ObjectKey>();
        let mut pending_requeues = 0usize;
        let mut open = true;
        info!(gvk = %self.kind.gvk_key(), concurrency, "dispatch loop started");

        loop {
            while tasks.len() < concurrency {
                let Some(key) = queue.pop() else { break };
                let (d, token, k) = (dispatcher.clone(), cancel.clone(), key.clone());
                let handle = tasks.spawn(async move { d.reconcile(&k, &token).await });
                running.insert(handle.id(), key);
            }
            metrics::gauge!("sieve_queue_depth", queue.len() as f64);
            if !open && queue.is_idle() && pending_requeues == 0 {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = rx.recv(), if open => match maybe {
                    Some(ev) => route(&routes, ev, &mut queue),
                    None => {
                        debug!("watch channel closed");
                        open = false;
                    }
                },
                Some(key) = requeue_rx.recv() => {
                    pending_requeues = pending_requeues.saturating_sub(1);
                    queue.push(key);
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    let (id, failure) = match joined {
                        Ok((id, Ok(_))) | Ok((id, Err(DispatchError::Cancelled))) => (id, None),
                        Ok((id, Err(e))) => (id, Some(e.to_string())),
                        Err(e) => (e.id(), Some(format!("reconcile task failed: {}", e))),
                    };
                    let Some(key) = running.remove(&id) else {
                        warn!(task = %id, "finished reconcile task without a key");
                        continue;
                    };
                    // a dirty identity already runs again; no delayed retry on top
                    let rerun = queue.done(&key);
                    if let Some(error) = failure {
                        if rerun {
                            warn!(key = %key, error = %error, "reconcile failed; already requeued");
                        } else {
                            warn!(key = %key, error = %error, requeue_secs = requeue_after.as_secs_f64(), "reconcile failed; requeueing");
                            pending_requeues += 1;
                            schedule_requeue(key, requeue_after, requeue_tx.clone(), cancel.clone());
                        }
                    }
                }
            }
        }

        // in-flight reconciles observe the token and return promptly
        while tasks.join_next().await.is_some() {}
        info!(gvk = %self.kind.gvk_key(), "dispatch loop stopped");
        Ok(())
    }

    fn routes(&self, primary: &ObjectKind, primary_namespaced: bool) -> Vec<Route> {
        let ar = primary.api_resource();
        let mut routes = vec![Route::Primary(self.predicate.clone())];
        routes.extend(self.owns.iter().map(|owned| Route::Owned {
            predicate: owned.predicate.clone(),
            owner: OwnerMatch { api_version: ar.api_version.clone(), kind: ar.kind.clone(), namespaced: primary_namespaced },
        }));
        routes
    }
}

fn route(routes: &[Route], ev: WatchEvent, queue: &mut WorkQueue) {
    let Some(route) = routes.get(ev.source) else {
        warn!(source = ev.source, "event from unknown watch");
        return;
    };
    let event = ev.change.event();
    let key = match route {
        Route::Primary(predicate) => predicate.admit(&event).then(|| ev.change.key()).flatten(),
        Route::Owned { predicate, owner } => predicate.admit(&event).then(|| owner.owner_key(ev.change.meta())).flatten(),
    };
    if let Some(key) = key {
        queue.push(key);
    }
}

fn schedule_requeue(key: ObjectKey, after: Duration, tx: mpsc::UnboundedSender<ObjectKey>, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                let _ = tx.send(key);
            }
        }
    });
}
