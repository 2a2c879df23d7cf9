//! Sieve core types: event kinds, change events over object metadata,
//! object identities and the tracked object kind.

#![forbid(unsafe_code)]

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Resource;
use serde::{Deserialize, Serialize};

/// Reason a change notification was emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Generic,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [EventKind::Create, EventKind::Update, EventKind::Delete, EventKind::Generic];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Update => "UPDATE",
            EventKind::Delete => "DELETE",
            EventKind::Generic => "GENERIC",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A change notification borrowing the metadata of the object(s) it concerns.
///
/// Predicates only ever look at metadata, so events are cheap to build from
/// any `kube::Resource` without cloning.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Create(&'a ObjectMeta),
    Update { old: &'a ObjectMeta, new: &'a ObjectMeta },
    Delete(&'a ObjectMeta),
    Generic(&'a ObjectMeta),
}

impl<'a> Event<'a> {
    pub fn create<K: Resource>(obj: &'a K) -> Self { Event::Create(obj.meta()) }

    pub fn update<K: Resource>(old: &'a K, new: &'a K) -> Self {
        Event::Update { old: old.meta(), new: new.meta() }
    }

    pub fn delete<K: Resource>(obj: &'a K) -> Self { Event::Delete(obj.meta()) }

    pub fn generic<K: Resource>(obj: &'a K) -> Self { Event::Generic(obj.meta()) }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Create(_) => EventKind::Create,
            Event::Update { .. } => EventKind::Update,
            Event::Delete(_) => EventKind::Delete,
            Event::Generic(_) => EventKind::Generic,
        }
    }

    /// The object the event is about; for updates this is the new object.
    pub fn object(&self) -> &'a ObjectMeta {
        match *self {
            Event::Create(o) | Event::Delete(o) | Event::Generic(o) => o,
            Event::Update { new, .. } => new,
        }
    }
}

/// Identity of a tracked object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self { Self::new(Some(namespace), name) }

    pub fn cluster(name: &str) -> Self { Self::new(None, name) }

    /// Key for an object's metadata; `None` when the object carries no name.
    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        let name = meta.name.as_deref()?;
        Some(Self::new(meta.namespace.as_deref(), name))
    }

    pub fn from_resource<K: Resource>(obj: &K) -> Option<Self> { Self::from_meta(obj.meta()) }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
pub struct InvalidGvkKey(pub String);

/// How objects of the tracked kind are represented.
///
/// `Typed` kinds have a compiled Rust type and decode into it; `Dynamic` kinds
/// are only known by group/version/kind and stay schemaless. The choice is
/// made once when the operator is configured.
#[derive(Debug, Clone)]
pub enum ObjectKind {
    Typed(ApiResource),
    Dynamic(ApiResource),
}

impl ObjectKind {
    pub fn typed<K: Resource<DynamicType = ()>>() -> Self { ObjectKind::Typed(ApiResource::erase::<K>(&())) }

    pub fn dynamic(group: &str, version: &str, kind: &str) -> Self {
        Self::from_gvk(&GroupVersionKind::gvk(group, version, kind))
    }

    pub fn from_gvk(gvk: &GroupVersionKind) -> Self { ObjectKind::Dynamic(ApiResource::from_gvk(gvk)) }

    /// Parse a dynamic kind from `v1/Kind` or `group/v1/Kind`.
    pub fn parse_key(key: &str) -> Result<Self, InvalidGvkKey> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::dynamic("", version, kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::dynamic(group, version, kind)),
            _ => Err(InvalidGvkKey(key.to_string())),
        }
    }

    pub fn api_resource(&self) -> &ApiResource {
        match self {
            ObjectKind::Typed(ar) | ObjectKind::Dynamic(ar) => ar,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let ar = self.api_resource();
        GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)
    }

    pub fn is_dynamic(&self) -> bool { matches!(self, ObjectKind::Dynamic(_)) }

    /// Same format as accepted by [`ObjectKind::parse_key`].
    pub fn gvk_key(&self) -> String {
        let ar = self.api_resource();
        if ar.group.is_empty() {
            format!("{}/{}", ar.version, ar.kind)
        } else {
            format!("{}/{}/{}", ar.group, ar.version, ar.kind)
        }
    }

    /// An empty object of this kind, stamped with apiVersion/kind and the given identity.
    pub fn blank(&self, key: &ObjectKey) -> DynamicObject {
        let mut obj = DynamicObject::new(&key.name, self.api_resource());
        obj.metadata.namespace = key.namespace.clone();
        obj
    }
}

pub mod prelude {
    pub use super::{Event, EventKind, ObjectKey, ObjectKind};
}
