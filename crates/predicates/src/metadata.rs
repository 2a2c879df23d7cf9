use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sieve_core::Event;
use sieve_selector::{Requirements, Selector, SelectorError};

use crate::Predicate;

/// Which event kinds a metadata predicate decides. Kinds outside the scope
/// are admitted and left to other predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataScope {
    CreateOrUpdate,
    Delete,
}

#[derive(Debug, Clone)]
pub struct MetadataPredicate {
    selector: Selector,
    scope: MetadataScope,
}

impl MetadataPredicate {
    pub fn new(selector: Selector, scope: MetadataScope) -> Self { Self { selector, scope } }

    pub fn selector(&self) -> &Selector { &self.selector }

    pub fn scope(&self) -> MetadataScope { self.scope }

    pub fn admit(&self, event: &Event<'_>) -> bool {
        match (self.scope, event) {
            (MetadataScope::CreateOrUpdate, Event::Create(o)) => self.matches(o),
            // an object moving out of the selection is still observed
            (MetadataScope::CreateOrUpdate, Event::Update { old, new }) => self.matches(old) || self.matches(new),
            (MetadataScope::Delete, Event::Delete(o)) => self.matches(o),
            _ => true,
        }
    }

    // Objects without labels/annotations are evaluated as empty maps.
    fn matches(&self, meta: &ObjectMeta) -> bool {
        let empty = BTreeMap::new();
        self.selector.matches(
            Some(meta.labels.as_ref().unwrap_or(&empty)),
            Some(meta.annotations.as_ref().unwrap_or(&empty)),
        )
    }
}

/// Predicate deciding Create and Update events by labels and annotations.
pub fn create_or_update_by_metadata(
    labels: Option<Requirements>,
    annotations: Option<Requirements>,
) -> Result<Predicate, SelectorError> {
    let selector = Selector::new(labels, annotations)?;
    Ok(Predicate::Metadata(MetadataPredicate::new(selector, MetadataScope::CreateOrUpdate)))
}

/// Predicate deciding Delete events by labels and annotations.
pub fn delete_by_metadata(
    labels: Option<Requirements>,
    annotations: Option<Requirements>,
) -> Result<Predicate, SelectorError> {
    let selector = Selector::new(labels, annotations)?;
    Ok(Predicate::Metadata(MetadataPredicate::new(selector, MetadataScope::Delete)))
}
