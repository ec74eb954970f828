//! # Constants
//!
//! Shared constants used throughout the syncer engine.
//!
//! The marker keys form the wire format of ownership on host objects and
//! must not change without a migration.

/// Label on host objects identifying the virtual cluster instance that
/// manages them. Objects without this label are foreign and never mutated.
pub const MARKER_LABEL: &str = "virtual-cluster.microscaler.io/managed-by";

/// Label on host objects recording the virtual namespace of namespaced
/// objects.
pub const NAMESPACE_LABEL: &str = "virtual-cluster.microscaler.io/namespace";

/// Label that excludes an object from syncing entirely (it belongs to a
/// different controller).
pub const CONTROLLER_LABEL: &str = "virtual-cluster.microscaler.io/controller";

/// Annotation recording the original virtual object name.
pub const NAME_ANNOTATION: &str = "virtual-cluster.microscaler.io/object-name";

/// Annotation recording the original virtual object namespace (namespaced
/// kinds only).
pub const NAMESPACE_ANNOTATION: &str = "virtual-cluster.microscaler.io/object-namespace";

/// Annotation recording the virtual object UID at the time of the last
/// successful sync.
pub const UID_ANNOTATION: &str = "virtual-cluster.microscaler.io/object-uid";

/// Annotation recording the virtual object apiVersion/kind.
pub const KIND_ANNOTATION: &str = "virtual-cluster.microscaler.io/object-kind";

/// Annotation identifying which syncer owns an object when multiple syncers
/// could claim it.
pub const CONTROLLER_ANNOTATION: &str = "virtual-cluster.microscaler.io/controlled-by";

/// Annotation that, when set to `"true"`, suppresses deletion of the host
/// object when its virtual counterpart disappears.
pub const SKIP_BACK_SYNC_ANNOTATION: &str = "virtual-cluster.microscaler.io/skip-back-sync";

/// Annotation on virtual volume snapshot contents recording the host-side
/// content name they were adopted from.
pub const HOST_CONTENT_NAME_ANNOTATION: &str = "virtual-cluster.microscaler.io/host-content-name";

/// Request-namespace sentinel marking a request that carries a host
/// identity. `#` is not a valid DNS label character, so the sentinels can
/// never collide with a real namespace.
pub const HOST_REQUEST_PREFIX: &str = "host#";

/// Request-namespace sentinel marking a request generated by a delete event.
pub const DELETE_REQUEST_PREFIX: &str = "delete#";

/// Maximum number of concurrent reconciles per syncer.
pub const MAX_CONCURRENT_RECONCILES: usize = 10;

/// Number of shards in the per-key lock table.
pub const LOCK_SHARD_COUNT: usize = 64;

/// Deadline for initial cache sync at startup (seconds).
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 120;

/// Minimum backoff after a failed reconcile (seconds).
pub const DEFAULT_RETRY_MIN_SECS: u64 = 1;

/// Maximum backoff after repeated reconcile failures (seconds).
pub const DEFAULT_RETRY_MAX_SECS: u64 = 300;

/// Kubernetes object names are limited to 63 characters; longer translated
/// names are truncated and hash-suffixed.
pub const MAX_NAME_LENGTH: usize = 63;
