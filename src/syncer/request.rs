//! # Reconcile requests and the provenance tag codec
//!
//! A single work queue carries reconciles for both clusters. Because the
//! queue element is a bare `(namespace, name)`, provenance is piggy-backed
//! on the namespace with two commutative sentinel prefixes:
//!
//! ```text
//! base:        ns
//! host:        host#ns
//! delete:      delete#ns
//! host+delete: delete#host#ns
//! ```
//!
//! This is what preserves the information needed to clean up the opposite
//! side once a cache has emitted a deletion and the object is gone.

use std::fmt;

use crate::constants::{DELETE_REQUEST_PREFIX, HOST_REQUEST_PREFIX};
use crate::translate::NamespacedName;

/// One queued reconcile. The namespace field may carry sentinel tags; use
/// the codec functions below before interpreting it as an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SyncRequest {
    pub namespace: String,
    pub name: String,
}

impl SyncRequest {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The identity this request addresses, assuming all tags have been
    /// stripped.
    #[must_use]
    pub fn to_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }
}

impl From<NamespacedName> for SyncRequest {
    fn from(name: NamespacedName) -> Self {
        Self {
            namespace: name.namespace,
            name: name.name,
        }
    }
}

impl fmt::Display for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Tag a request as carrying a host identity.
#[must_use]
pub fn to_host_request(req: SyncRequest) -> SyncRequest {
    SyncRequest {
        namespace: format!("{HOST_REQUEST_PREFIX}{}", req.namespace),
        name: req.name,
    }
}

/// Tag a request as generated by a delete event.
#[must_use]
pub fn to_delete_request(req: SyncRequest) -> SyncRequest {
    SyncRequest {
        namespace: format!("{DELETE_REQUEST_PREFIX}{}", req.namespace),
        name: req.name,
    }
}

/// Strip the delete tag if present and report whether it was.
#[must_use]
pub fn from_delete_request(req: SyncRequest) -> (SyncRequest, bool) {
    match req.namespace.strip_prefix(DELETE_REQUEST_PREFIX) {
        Some(rest) => (
            SyncRequest {
                namespace: rest.to_string(),
                name: req.name,
            },
            true,
        ),
        None => (req, false),
    }
}

/// Whether the request carries a host identity. Call after delete
/// stripping.
#[must_use]
pub fn is_host_request(req: &SyncRequest) -> bool {
    req.namespace.starts_with(HOST_REQUEST_PREFIX)
}

/// Strip the host tag.
#[must_use]
pub fn from_host_request(req: SyncRequest) -> SyncRequest {
    SyncRequest {
        namespace: req
            .namespace
            .strip_prefix(HOST_REQUEST_PREFIX)
            .map(str::to_string)
            .unwrap_or(req.namespace),
        name: req.name,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_host_tag_round_trip() {
        let req = SyncRequest::new("workload", "a");
        let tagged = to_host_request(req.clone());
        assert_eq!(tagged.namespace, "host#workload");
        assert!(is_host_request(&tagged));
        assert_eq!(from_host_request(tagged), req);
    }

    #[test]
    fn test_delete_tag_round_trip() {
        let req = SyncRequest::new("default", "a");
        let (stripped, was_delete) = from_delete_request(to_delete_request(req.clone()));
        assert_eq!(stripped, req);
        assert!(was_delete);

        let (untouched, was_delete) = from_delete_request(req.clone());
        assert_eq!(untouched, req);
        assert!(!was_delete);
    }

    #[test]
    fn test_tags_compose() {
        let req = SyncRequest::new("workload", "a");
        let tagged = to_delete_request(to_host_request(req.clone()));
        assert_eq!(tagged.namespace, "delete#host#workload");

        let (stripped, was_delete) = from_delete_request(tagged);
        assert!(was_delete);
        assert!(is_host_request(&stripped));
        assert_eq!(from_host_request(stripped), req);
    }

    #[test]
    fn test_cluster_scoped_requests_tag_cleanly() {
        let req = SyncRequest::new("", "standard");
        let tagged = to_delete_request(to_host_request(req.clone()));
        let (stripped, was_delete) = from_delete_request(tagged);
        assert!(was_delete);
        assert!(is_host_request(&stripped));
        let restored = from_host_request(stripped);
        assert_eq!(restored, req);
        assert!(restored.namespace.is_empty());
    }

    proptest! {
        #[test]
        fn prop_codec_round_trip(
            namespace in "[a-z0-9-]{0,20}",
            name in "[a-z0-9-]{1,30}",
            host in any::<bool>(),
            delete in any::<bool>(),
        ) {
            let mut req = SyncRequest::new(namespace.clone(), name.clone());
            if host {
                req = to_host_request(req);
            }
            if delete {
                req = to_delete_request(req);
            }

            let (req, decoded_delete) = from_delete_request(req);
            prop_assert_eq!(decoded_delete, delete);

            let decoded_host = is_host_request(&req);
            prop_assert_eq!(decoded_host, host);

            let req = from_host_request(req);
            prop_assert_eq!(req.namespace, namespace);
            prop_assert_eq!(req.name, name);
        }
    }
}
