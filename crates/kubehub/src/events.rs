use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::watcher;
use kube::Resource;
use rustc_hash::FxHashMap;
use sieve_core::{Event, ObjectKey};

/// A change derived from the watch stream, owning the metadata involved.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Create(ObjectMeta),
    Update { old: ObjectMeta, new: ObjectMeta },
    Delete(ObjectMeta),
}

impl Observed {
    pub fn event(&self) -> Event<'_> {
        match self {
            Observed::Create(m) => Event::Create(m),
            Observed::Update { old, new } => Event::Update { old, new },
            Observed::Delete(m) => Event::Delete(m),
        }
    }

    pub fn meta(&self) -> &ObjectMeta { self.event().object() }

    pub fn key(&self) -> Option<ObjectKey> { ObjectKey::from_meta(self.meta()) }
}

/// Turns raw list+watch events into create/update/delete changes by
/// remembering the last metadata seen per identity.
#[derive(Debug, Default)]
pub struct EventSource {
    seen: FxHashMap<ObjectKey, ObjectMeta>,
}

impl EventSource {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.seen.len() }

    pub fn is_empty(&self) -> bool { self.seen.is_empty() }

    pub fn observe<K: Resource>(&mut self, event: watcher::Event<K>) -> Vec<Observed> {
        match event {
            watcher::Event::Applied(obj) => self.applied(obj.meta().clone()).into_iter().collect(),
            watcher::Event::Deleted(obj) => {
                let meta = obj.meta().clone();
                if let Some(key) = ObjectKey::from_meta(&meta) {
                    self.seen.remove(&key);
                }
                vec![Observed::Delete(meta)]
            }
            watcher::Event::Restarted(list) => self.relist(list.iter().map(|o| o.meta().clone()).collect()),
        }
    }

    fn applied(&mut self, meta: ObjectMeta) -> Option<Observed> {
        let key = ObjectKey::from_meta(&meta)?;
        match self.seen.insert(key, meta.clone()) {
            Some(old) => Some(Observed::Update { old, new: meta }),
            None => Some(Observed::Create(meta)),
        }
    }

    // A relist replaces the whole view: unchanged objects are silent, objects
    // missing from the list were deleted while the watch was down.
    fn relist(&mut self, listed: Vec<ObjectMeta>) -> Vec<Observed> {
        let mut previous = std::mem::take(&mut self.seen);
        let mut out = Vec::with_capacity(listed.len());
        for meta in listed {
            let Some(key) = ObjectKey::from_meta(&meta) else { continue };
            match previous.remove(&key) {
                Some(old) if old.resource_version == meta.resource_version && meta.resource_version.is_some() => {}
                Some(old) => out.push(Observed::Update { old, new: meta.clone() }),
                None => out.push(Observed::Create(meta.clone())),
            }
            self.seen.insert(key, meta);
        }
        let mut vanished: Vec<_> = previous.into_iter().collect();
        vanished.sort_by(|a, b| a.0.cmp(&b.0));
        out.extend(vanished.into_iter().map(|(_, meta)| Observed::Delete(meta)));
        out
    }
}
