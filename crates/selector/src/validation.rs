//! Key and value format checks for labels and annotations.
//!
//! Messages follow the wording of the Kubernetes apimachinery validators so
//! users see the same text the API server would report.

use once_cell::sync::Lazy;
use regex::Regex;

const QUALIFIED_NAME_FMT: &str = "([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]";
const QUALIFIED_NAME_ERR: &str =
    "must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character";
const QUALIFIED_NAME_MAX_LEN: usize = 63;

const DNS1123_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";
const DNS1123_SUBDOMAIN_ERR: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character";
const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;

const LABEL_VALUE_ERR: &str = "a valid label value must be an empty string or consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character";
const LABEL_VALUE_MAX_LEN: usize = 63;

static QUALIFIED_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^(?:{})$", QUALIFIED_NAME_FMT)).expect("static regex"));

static DNS1123_SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^(?:{lbl}(\\.{lbl})*)$", lbl = DNS1123_LABEL_FMT)).expect("static regex")
});

static LABEL_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^(?:({})?)$", QUALIFIED_NAME_FMT)).expect("static regex"));

fn max_len_error(n: usize) -> String { format!("must be no more than {} characters", n) }

fn regex_error(msg: &str, fmt: &str) -> String {
    format!("{} (regex used for validation is '{}')", msg, fmt)
}

/// Check that `value` is a qualified name: an optional DNS subdomain prefix
/// followed by `/` and a name of at most 63 characters.
///
/// Returns every problem found; an empty list means the value is valid.
pub fn is_qualified_name(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    let parts: Vec<&str> = value.split('/').collect();
    let name = match parts.as_slice() {
        [name] => *name,
        [prefix, name] => {
            if prefix.is_empty() {
                errs.push("prefix part must be non-empty".to_string());
            } else {
                errs.extend(is_dns1123_subdomain(prefix).into_iter().map(|m| format!("prefix part {}", m)));
            }
            *name
        }
        _ => {
            errs.push(format!(
                "a qualified name {} with an optional DNS subdomain prefix and '/' (e.g. 'example.com/MyName')",
                regex_error(QUALIFIED_NAME_ERR, QUALIFIED_NAME_FMT)
            ));
            return errs;
        }
    };

    if name.is_empty() {
        errs.push("name part must be non-empty".to_string());
    } else if name.len() > QUALIFIED_NAME_MAX_LEN {
        errs.push(format!("name part {}", max_len_error(QUALIFIED_NAME_MAX_LEN)));
    }
    if !QUALIFIED_NAME_RE.is_match(name) {
        errs.push(format!("name part {}", regex_error(QUALIFIED_NAME_ERR, QUALIFIED_NAME_FMT)));
    }
    errs
}

/// Check that `value` is a lowercase RFC 1123 subdomain.
pub fn is_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        errs.push(max_len_error(DNS1123_SUBDOMAIN_MAX_LEN));
    }
    if !DNS1123_SUBDOMAIN_RE.is_match(value) {
        errs.push(regex_error(DNS1123_SUBDOMAIN_ERR, DNS1123_LABEL_FMT));
    }
    errs
}

/// Check that `value` can be used as a label value (annotation values are free-form).
pub fn is_valid_label_value(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > LABEL_VALUE_MAX_LEN {
        errs.push(max_len_error(LABEL_VALUE_MAX_LEN));
    }
    if !LABEL_VALUE_RE.is_match(value) {
        errs.push(regex_error(LABEL_VALUE_ERR, QUALIFIED_NAME_FMT));
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cases mirror the apimachinery validation tests.
    fn key_success_cases() -> Vec<String> {
        vec![
            "simple".into(),
            "now-with-dashes".into(),
            "1-starts-with-num".into(),
            "1234".into(),
            "simple/simple".into(),
            "now-with-dashes/simple".into(),
            "now-with-dashes/now-with-dashes".into(),
            "now.with.dots/simple".into(),
            "now-with.dashes-and.dots/simple".into(),
            "1-num.2-num/3-num".into(),
            "1234/5678".into(),
            "1.2.3.4/5678".into(),
            "Uppercase_Is_OK_123".into(),
            "example.com/Uppercase_Is_OK_123".into(),
            "requests.storage-foo".into(),
            "a".repeat(63),
            format!("{}/{}", "a".repeat(253), "b".repeat(63)),
        ]
    }

    fn key_error_cases() -> Vec<String> {
        vec![
            "nospecialchars%^=@".into(),
            "Tama-nui-te-rā.is.Māori.sun".into(),
            "\\backslashes\\are\\bad".into(),
            "-starts-with-dash".into(),
            "ends-with-dash-".into(),
            ".starts.with.dot".into(),
            "ends.with.dot.".into(),
            "a".repeat(64),
            "only/one/slash/too/many".into(),
            "/simple".into(),
            "Example.com/abc".into(),
            format!("{}/abc", "a".repeat(254)),
        ]
    }

    #[test]
    fn qualified_names_accepted() {
        for key in key_success_cases() {
            assert!(is_qualified_name(&key).is_empty(), "expected {:?} to be valid", key);
        }
    }

    #[test]
    fn qualified_names_rejected() {
        for key in key_error_cases() {
            assert!(!is_qualified_name(&key).is_empty(), "expected {:?} to be invalid", key);
        }
    }

    #[test]
    fn label_values() {
        for ok in ["simple", "now-with-dashes", "1-starts-with-num", "end-with-num-1", "1234", ""] {
            assert!(is_valid_label_value(ok).is_empty(), "expected {:?} to be valid", ok);
        }
        assert!(is_valid_label_value(&"a".repeat(63)).is_empty());
        for bad in ["nospecialchars%^=@", "cantendwithadash-", "-cantstartwithadash-", "only/one/slash", "example.com/"] {
            assert!(!is_valid_label_value(bad).is_empty(), "expected {:?} to be invalid", bad);
        }
        assert!(!is_valid_label_value(&"a".repeat(64)).is_empty());
    }

    #[test]
    fn too_long_name_reports_length() {
        let errs = is_qualified_name(&"a".repeat(64));
        assert_eq!(errs, vec!["name part must be no more than 63 characters".to_string()]);
    }

    #[test]
    fn empty_prefix_is_reported() {
        let errs = is_qualified_name("/simple");
        assert_eq!(errs, vec!["prefix part must be non-empty".to_string()]);
    }
}
