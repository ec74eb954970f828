//! # Name translation
//!
//! The naming scheme that maps virtual identities onto the host cluster.
//!
//! All workloads of one virtual cluster instance land in a single host
//! workload namespace, so translated names must stay unique across virtual
//! namespaces. Names are joined with `-x-` separators and hash-suffixed
//! when they exceed the Kubernetes name length limit.

use std::fmt;

use kube::core::DynamicObject;
use sha2::{Digest, Sha256};

use crate::constants::{MARKER_LABEL, MAX_NAME_LENGTH};

/// Identity of an object within one cluster. An empty namespace means the
/// object is cluster-scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Identity of a live object.
    #[must_use]
    pub fn from_object(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }

    /// An empty name means "nothing to address"; callers treat it as a
    /// missing identity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Read one label off an object.
#[must_use]
pub fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

/// Read one annotation off an object.
#[must_use]
pub fn annotation<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// The `apiVersion/Kind` string recorded in the kind annotation.
#[must_use]
pub fn api_kind(obj: &DynamicObject) -> String {
    match &obj.types {
        Some(t) => format!("{}/{}", t.api_version, t.kind),
        None => String::new(),
    }
}

/// Join name parts with `-`, truncating and hash-suffixing results that
/// exceed the Kubernetes name length limit. The suffix is derived from the
/// full joined name, so distinct long names stay distinct.
#[must_use]
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let digest = format!("{:x}", Sha256::digest(full.as_bytes()));
    format!("{}-{}", &full[..MAX_NAME_LENGTH - 11], &digest[..10])
}

/// Translates names between the virtual cluster and the single host
/// workload namespace all synced objects live in.
///
/// One instance is created at startup from the loaded configuration and
/// injected everywhere a translation is needed.
#[derive(Debug, Clone)]
pub struct NameTranslator {
    target_namespace: String,
    instance_name: String,
}

impl NameTranslator {
    #[must_use]
    pub fn new(target_namespace: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            target_namespace: target_namespace.into(),
            instance_name: instance_name.into(),
        }
    }

    /// The virtual cluster instance name. Doubles as the marker label value
    /// on managed host objects.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Host namespace a virtual namespace maps to. In single-namespace mode
    /// every virtual namespace maps to the workload namespace.
    #[must_use]
    pub fn physical_namespace(&self, _virtual_namespace: &str) -> &str {
        &self.target_namespace
    }

    /// Host name for a namespaced virtual object.
    #[must_use]
    pub fn physical_name(&self, name: &str, namespace: &str) -> String {
        if name.is_empty() {
            return String::new();
        }

        safe_concat_name(&[name, "x", namespace, "x", &self.instance_name])
    }

    /// Host name for a cluster-scoped virtual object. Prefixed so two
    /// instances sharing a host cluster cannot collide on short names.
    #[must_use]
    pub fn physical_name_cluster_scoped(&self, name: &str) -> String {
        if name.is_empty() {
            return String::new();
        }

        safe_concat_name(&[
            "vc",
            name,
            "x",
            &self.target_namespace,
            "x",
            &self.instance_name,
        ])
    }

    /// Whether a namespaced host object is managed by this instance: it
    /// lives in the workload namespace and carries our marker label.
    #[must_use]
    pub fn is_managed(&self, p_obj: &DynamicObject) -> bool {
        if p_obj.metadata.namespace.as_deref() != Some(self.target_namespace.as_str()) {
            return false;
        }

        label(p_obj, MARKER_LABEL) == Some(self.instance_name.as_str())
    }

    /// Whether a cluster-scoped host object is managed by this instance.
    #[must_use]
    pub fn is_managed_cluster_scoped(&self, p_obj: &DynamicObject) -> bool {
        label(p_obj, MARKER_LABEL) == Some(self.instance_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> NameTranslator {
        NameTranslator::new("workload", "suffix")
    }

    #[test]
    fn test_physical_name() {
        assert_eq!(
            translator().physical_name("a", "default"),
            "a-x-default-x-suffix"
        );
        assert_eq!(translator().physical_name("", "default"), "");
    }

    #[test]
    fn test_physical_name_cluster_scoped() {
        assert_eq!(
            translator().physical_name_cluster_scoped("testsc"),
            "vc-testsc-x-workload-x-suffix"
        );
    }

    #[test]
    fn test_physical_name_distinct_across_namespaces() {
        let t = translator();
        assert_ne!(t.physical_name("a", "ns1"), t.physical_name("a", "ns2"));
    }

    #[test]
    fn test_safe_concat_short_names_pass_through() {
        assert_eq!(safe_concat_name(&["a", "x", "default"]), "a-x-default");
    }

    #[test]
    fn test_safe_concat_long_names_are_hashed() {
        let long = "a".repeat(80);
        let result = safe_concat_name(&[&long, "x", "default"]);
        assert_eq!(result.len(), MAX_NAME_LENGTH);
        assert!(result.starts_with("aaaa"));

        // same input hashes identically, different input differently
        assert_eq!(result, safe_concat_name(&[&long, "x", "default"]));
        assert_ne!(result, safe_concat_name(&[&long, "x", "other"]));
    }

    #[test]
    fn test_namespaced_name_display() {
        assert_eq!(NamespacedName::new("default", "a").to_string(), "default/a");
        assert_eq!(NamespacedName::cluster_scoped("sc").to_string(), "sc");
    }
}
