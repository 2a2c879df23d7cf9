use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use sieve_core::ObjectKind;
use sieve_predicates::Predicate;
use sieve_reconcile::{Handler, HandlerKind};
use sieve_selector::{Requirements, Selector};

use crate::{ConfigProblem, HandlerOptions, Operator, OperatorBuilder, RuntimeOptions};

/// Group/version/kind as written in config files; `group` defaults to core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindRef {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl KindRef {
    pub fn to_kind(&self) -> ObjectKind { ObjectKind::dynamic(&self.group, &self.version, &self.kind) }
}

/// An owned kind with optional selectors for its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OwnsRef {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default)]
    pub labels: Option<Requirements>,
    #[serde(default)]
    pub annotations: Option<Requirements>,
}

impl OwnsRef {
    pub fn kind_ref(&self) -> KindRef {
        KindRef { group: self.group.clone(), version: self.version.clone(), kind: self.kind.clone() }
    }

    pub fn to_kind(&self) -> ObjectKind { ObjectKind::dynamic(&self.group, &self.version, &self.kind) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub concurrency: Option<usize>,
    pub requeue_secs: Option<u64>,
    pub log_ignored: Option<bool>,
    pub field_manager: Option<String>,
}

/// Operator configuration file (YAML).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    pub kind: KindRef,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub on_create_or_update: Option<HandlerOptions>,
    #[serde(default)]
    pub on_delete: Option<HandlerOptions>,
    #[serde(default)]
    pub owns: Vec<OwnsRef>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl OperatorConfig {
    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> { serde_yaml::from_str(s) }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Defaults, then the file, then `SIEVE_*` environment overrides.
    pub fn runtime_options(&self) -> RuntimeOptions {
        let mut opts = RuntimeOptions::default();
        opts.namespace = self.namespace.clone();
        let rt = &self.runtime;
        if let Some(n) = rt.concurrency {
            opts.concurrency = n;
        }
        if let Some(secs) = rt.requeue_secs {
            opts.requeue_after = Duration::from_secs(secs);
        }
        if let Some(on) = rt.log_ignored {
            opts.log_ignored = on;
        }
        if let Some(fm) = &rt.field_manager {
            opts.field_manager = fm.clone();
        }
        opts.with_env()
    }

    /// Builder with the configured selectors. Each handler is registered only
    /// when its section is present in the file.
    pub fn builder(
        &self,
        on_create_or_update: impl Handler<DynamicObject> + 'static,
        on_delete: impl Handler<DynamicObject> + 'static,
    ) -> OperatorBuilder<DynamicObject> {
        let mut b = Operator::dynamic(self.kind.to_kind()).with_runtime_options(self.runtime_options());
        if let Some(opts) = &self.on_create_or_update {
            b.register(HandlerKind::CreateOrUpdate, Arc::new(on_create_or_update), opts.clone());
        }
        if let Some(opts) = &self.on_delete {
            b.register(HandlerKind::Delete, Arc::new(on_delete), opts.clone());
        }
        for owned in &self.owns {
            let kind = owned.to_kind();
            match owned_predicate(owned) {
                Ok(p) => b = b.with_owns(kind, p),
                Err(source) => b.push_problem(ConfigProblem::OwnedSelector { kind: kind.gvk_key(), source }),
            }
        }
        b
    }
}

// Owned kinds without selectors admit every event.
fn owned_predicate(owned: &OwnsRef) -> Result<Predicate, sieve_selector::SelectorError> {
    if owned.labels.is_none() && owned.annotations.is_none() {
        return Ok(Predicate::Const(true));
    }
    let selector = Selector::new(
        Some(owned.labels.clone().unwrap_or_default()),
        Some(owned.annotations.clone().unwrap_or_default()),
    )?;
    Ok(Predicate::object(move |meta| {
        let empty = Default::default();
        selector.matches(
            Some(meta.labels.as_ref().unwrap_or(&empty)),
            Some(meta.annotations.as_ref().unwrap_or(&empty)),
        )
    }))
}
