//! Sieve selector: label/annotation requirements with literal, presence and
//! absence matching.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod validation;

pub use validation::{is_dns1123_subdomain, is_qualified_name, is_valid_label_value};

/// A single requirement on a label or annotation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RequirementRepr", into = "RequirementRepr")]
pub enum Requirement {
    /// Key must exist with exactly this value.
    Literal(String),
    /// Key must exist; value is ignored.
    Present,
    /// Key must not exist.
    Absent,
}

impl Requirement {
    fn satisfied_by(&self, data: &BTreeMap<String, String>, key: &str) -> bool {
        match self {
            Requirement::Absent => !data.contains_key(key),
            Requirement::Present => data.contains_key(key),
            Requirement::Literal(want) => data.get(key).map(|v| v == want).unwrap_or(false),
        }
    }
}

impl From<&str> for Requirement {
    fn from(v: &str) -> Self { Requirement::Literal(v.to_string()) }
}

impl From<String> for Requirement {
    fn from(v: String) -> Self { Requirement::Literal(v) }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Literal(v) => write!(f, "={}", v),
            Requirement::Present => f.write_str("(present)"),
            Requirement::Absent => f.write_str("(absent)"),
        }
    }
}

// Config files write literals as plain strings and markers as `{present: true}` / `{absent: true}`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RequirementRepr {
    Literal(String),
    Marker(Marker),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Marker {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    present: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    absent: bool,
}

impl TryFrom<RequirementRepr> for Requirement {
    type Error = String;

    fn try_from(r: RequirementRepr) -> Result<Self, Self::Error> {
        match r {
            RequirementRepr::Literal(v) => Ok(Requirement::Literal(v)),
            RequirementRepr::Marker(Marker { present: true, absent: false }) => Ok(Requirement::Present),
            RequirementRepr::Marker(Marker { present: false, absent: true }) => Ok(Requirement::Absent),
            RequirementRepr::Marker(_) => Err("requirement marker must set exactly one of `present` or `absent`".into()),
        }
    }
}

impl From<Requirement> for RequirementRepr {
    fn from(r: Requirement) -> Self {
        match r {
            Requirement::Literal(v) => RequirementRepr::Literal(v),
            Requirement::Present => RequirementRepr::Marker(Marker { present: true, absent: false }),
            Requirement::Absent => RequirementRepr::Marker(Marker { present: false, absent: true }),
        }
    }
}

/// Requirement map keyed by label or annotation key.
pub type Requirements = BTreeMap<String, Requirement>;

/// One invalid key or value found while building a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub value: String,
    pub reasons: SmallVec<[String; 2]>,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Invalid value: {:?}: {}", self.path, self.value, self.reasons.join("; "))
    }
}

/// Every problem found while validating a selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid selector: {}", render_errors(.errors))]
pub struct SelectorError {
    pub errors: Vec<FieldError>,
}

fn render_errors(errors: &[FieldError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// Immutable set of label and annotation requirements.
///
/// An unset requirement map never matches; an empty one matches any present
/// data (including empty maps) but not missing data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    labels: Option<Requirements>,
    annotations: Option<Requirements>,
}

impl Selector {
    /// Validate and build a selector. All invalid keys and literal label values
    /// are reported together.
    pub fn new(labels: Option<Requirements>, annotations: Option<Requirements>) -> Result<Self, SelectorError> {
        let mut errors = Vec::new();
        for (key, req) in labels.iter().flatten() {
            check_key("labels", key, &mut errors);
            if let Requirement::Literal(value) = req {
                let reasons = is_valid_label_value(value);
                if !reasons.is_empty() {
                    errors.push(FieldError { path: format!("labels[{}]", key), value: value.clone(), reasons: reasons.into() });
                }
            }
        }
        for key in annotations.iter().flatten().map(|(k, _)| k) {
            check_key("annotations", key, &mut errors);
        }
        if errors.is_empty() {
            Ok(Self { labels, annotations })
        } else {
            Err(SelectorError { errors })
        }
    }

    /// Selector that matches any present label and annotation maps.
    pub fn everything() -> Self { Self { labels: Some(Requirements::new()), annotations: Some(Requirements::new()) } }

    pub fn labels(&self) -> Option<&Requirements> { self.labels.as_ref() }

    pub fn annotations(&self) -> Option<&Requirements> { self.annotations.as_ref() }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>, annotations: Option<&BTreeMap<String, String>>) -> bool {
        self.matches_labels(labels) && self.matches_annotations(annotations)
    }

    pub fn matches_labels(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        matches(labels, self.labels.as_ref())
    }

    pub fn matches_annotations(&self, annotations: Option<&BTreeMap<String, String>>) -> bool {
        matches(annotations, self.annotations.as_ref())
    }
}

fn check_key(field: &str, key: &str, errors: &mut Vec<FieldError>) {
    let reasons = is_qualified_name(key);
    if !reasons.is_empty() {
        errors.push(FieldError { path: format!("{}.key", field), value: key.to_string(), reasons: reasons.into() });
    }
}

fn matches(data: Option<&BTreeMap<String, String>>, sel: Option<&Requirements>) -> bool {
    let (data, sel) = match (data, sel) {
        (Some(d), Some(s)) => (d, s),
        _ => return false,
    };
    sel.iter().all(|(key, req)| req.satisfied_by(data, key))
}

/// Build a requirement map from `(key, requirement)` pairs.
pub fn requirements<K, R, I>(pairs: I) -> Requirements
where
    K: Into<String>,
    R: Into<Requirement>,
    I: IntoIterator<Item = (K, R)>,
{
    pairs.into_iter().map(|(k, r)| (k.into(), r.into())).collect()
}
