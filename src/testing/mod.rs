//! # Test harness
//!
//! In-memory fakes for both clusters, an event recorder that captures
//! instead of publishing, object builders, and a scenario runner that
//! seeds initial state, fires reconcile requests, and compares resulting
//! cluster state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};

use crate::client::{
    ClientError, ClusterClient, DeleteOptions, EventRecorder, EventType, NoopEventRecorder,
};
use crate::config::SyncConfig;
use crate::mappings::MapperRegistry;
use crate::syncer::context::RegisterContext;
use crate::syncer::controller::SyncController;
use crate::syncer::request::SyncRequest;
use crate::syncer::types::{SyncError, Syncer};
use crate::translate::{NameTranslator, NamespacedName};

/// Install a compact tracing subscriber honoring `RUST_LOG`, for debugging
/// test runs. Safe to call from multiple tests.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "virtual_cluster_syncer=info".into()),
        )
        .try_init();
}

/// Workload namespace used by all fake contexts.
pub const TEST_TARGET_NAMESPACE: &str = "workload";

/// Instance name used by all fake contexts; doubles as the translated name
/// suffix.
pub const TEST_INSTANCE_NAME: &str = "suffix";

fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

fn object_key(obj: &DynamicObject) -> String {
    NamespacedName::from_object(obj).to_string()
}

/// Parse the GVK back out of an object's type metadata.
fn gvk_of(obj: &DynamicObject) -> GroupVersionKind {
    let Some(types) = &obj.types else {
        return GroupVersionKind::gvk("", "", "");
    };

    match types.api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, &types.kind),
        None => GroupVersionKind::gvk("", &types.api_version, &types.kind),
    }
}

/// Merge-patch semantics: objects merge recursively, null deletes, scalars
/// and arrays replace.
fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(key);
                } else {
                    merge_json(
                        target_map
                            .entry(key.clone())
                            .or_insert(serde_json::Value::Null),
                        value,
                    );
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// One recorded delete call, for asserting grace periods and preconditions.
#[derive(Debug, Clone)]
pub struct RecordedDelete {
    pub name: NamespacedName,
    pub options: DeleteOptions,
}

/// In-memory `ClusterClient`.
///
/// Deletes respect finalizers: an object with finalizers is only marked as
/// terminating (deletion timestamp set), matching how a real API server
/// keeps such objects around.
#[derive(Default)]
pub struct FakeClusterClient {
    state: Mutex<HashMap<String, BTreeMap<String, DynamicObject>>>,
    deletes: Mutex<Vec<RecordedDelete>>,
}

impl FakeClusterClient {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed initial cluster state. Objects must carry type metadata.
    pub fn seed(&self, objects: Vec<DynamicObject>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for obj in objects {
            let gvk = gvk_of(&obj);
            state
                .entry(gvk_key(&gvk))
                .or_default()
                .insert(object_key(&obj), obj);
        }
    }

    /// All delete calls issued so far.
    #[must_use]
    pub fn recorded_deletes(&self) -> Vec<RecordedDelete> {
        self.deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
    ) -> Result<DynamicObject, ClientError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .get(&gvk_key(gvk))
            .and_then(|objects| objects.get(&name.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            })
    }

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let mut created = obj.clone();
        if created.types.is_none() {
            created.types = Some(TypeMeta {
                api_version: if gvk.group.is_empty() {
                    gvk.version.clone()
                } else {
                    format!("{}/{}", gvk.group, gvk.version)
                },
                kind: gvk.kind.clone(),
            });
        }

        let key = object_key(&created);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let objects = state.entry(gvk_key(gvk)).or_default();
        if objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                kind: gvk.kind.clone(),
                name: key,
            });
        }

        objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let key = object_key(obj);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let objects = state.entry(gvk_key(gvk)).or_default();
        if !objects.contains_key(&key) {
            return Err(ClientError::NotFound {
                kind: gvk.kind.clone(),
                name: key,
            });
        }

        objects.insert(key, obj.clone());
        Ok(obj.clone())
    }

    async fn update_status(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let key = object_key(obj);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let objects = state.entry(gvk_key(gvk)).or_default();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(ClientError::NotFound {
                kind: gvk.kind.clone(),
                name: key,
            });
        };

        if let Some(data) = stored.data.as_object_mut() {
            match obj.data.get("status") {
                Some(status) => {
                    data.insert("status".to_string(), status.clone());
                }
                None => {
                    data.remove("status");
                }
            }
        }

        Ok(stored.clone())
    }

    async fn patch_merge(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
        patch: serde_json::Value,
    ) -> Result<DynamicObject, ClientError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let objects = state.entry(gvk_key(gvk)).or_default();
        let Some(stored) = objects.get_mut(&name.to_string()) else {
            return Err(ClientError::NotFound {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            });
        };

        let mut value = serde_json::to_value(&*stored).map_err(|err| {
            ClientError::Api(anyhow::anyhow!("serialize object for patch: {err}"))
        })?;
        merge_json(&mut value, &patch);
        *stored = serde_json::from_value(value).map_err(|err| {
            ClientError::Api(anyhow::anyhow!("deserialize patched object: {err}"))
        })?;

        Ok(stored.clone())
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        self.deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedDelete {
                name: name.clone(),
                options: opts.clone(),
            });

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let objects = state.entry(gvk_key(gvk)).or_default();
        let Some(stored) = objects.get_mut(&name.to_string()) else {
            return Err(ClientError::NotFound {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            });
        };

        if let Some(expected_uid) = &opts.uid_precondition {
            if stored.metadata.uid.as_deref() != Some(expected_uid.as_str()) {
                return Err(ClientError::Conflict {
                    kind: gvk.kind.clone(),
                    name: name.to_string(),
                    message: "uid precondition failed".to_string(),
                });
            }
        }

        let has_finalizers = stored
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| !finalizers.is_empty());
        if has_finalizers {
            if stored.metadata.deletion_timestamp.is_none() {
                stored.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                stored.metadata.deletion_grace_period_seconds = opts.grace_period_seconds;
            }
            return Ok(());
        }

        objects.remove(&name.to_string());
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let objects = state
            .get(&gvk_key(gvk))
            .map(|objects| {
                objects
                    .values()
                    .filter(|obj| match namespace {
                        Some(ns) => obj.metadata.namespace.as_deref() == Some(ns),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(objects)
    }
}

/// One event captured by the fake recorder.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Event recorder that captures events for assertions.
#[derive(Default)]
pub struct FakeEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeEventRecorder {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventRecorder for FakeEventRecorder {
    async fn event(&self, obj: &DynamicObject, event_type: EventType, reason: &str, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedEvent {
                object: object_key(obj),
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
            });
    }
}

/// Register context wired to fakes, with direct access to them.
pub struct FakeContext {
    pub register: RegisterContext,
    pub virtual_client: Arc<FakeClusterClient>,
    pub physical_client: Arc<FakeClusterClient>,
    pub recorder: Arc<FakeEventRecorder>,
}

impl std::ops::Deref for FakeContext {
    type Target = RegisterContext;

    fn deref(&self) -> &Self::Target {
        &self.register
    }
}

/// Fresh fake context with empty clusters and an empty mapper registry.
#[must_use]
pub fn new_fake_register_context(config: SyncConfig) -> FakeContext {
    let virtual_client = FakeClusterClient::new();
    let physical_client = FakeClusterClient::new();
    let recorder = FakeEventRecorder::new();

    let register = RegisterContext {
        config: Arc::new(config),
        current_namespace: TEST_TARGET_NAMESPACE.to_string(),
        virtual_client: virtual_client.clone(),
        physical_client: physical_client.clone(),
        virtual_event_recorder: recorder.clone(),
        translator: Arc::new(NameTranslator::new(TEST_TARGET_NAMESPACE, TEST_INSTANCE_NAME)),
        mappers: Arc::new(MapperRegistry::new()),
    };

    FakeContext {
        register,
        virtual_client,
        physical_client,
        recorder,
    }
}

/// Context with a recorder that drops events, for benchmarks and tests
/// that do not assert on them.
#[must_use]
pub fn new_silent_register_context(config: SyncConfig) -> RegisterContext {
    let mut ctx = new_fake_register_context(config).register;
    ctx.virtual_event_recorder = Arc::new(NoopEventRecorder);
    ctx
}

/// Bare object of the given kind. An empty namespace produces a
/// cluster-scoped object.
#[must_use]
pub fn test_object(api_version: &str, kind: &str, namespace: &str, name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(name.to_string()),
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            ..Default::default()
        },
        data: serde_json::Value::Object(Default::default()),
    }
}

#[must_use]
pub fn with_uid(mut obj: DynamicObject, uid: &str) -> DynamicObject {
    obj.metadata.uid = Some(uid.to_string());
    obj
}

#[must_use]
pub fn with_labels(mut obj: DynamicObject, labels: &[(&str, &str)]) -> DynamicObject {
    let map = obj.metadata.labels.get_or_insert_with(Default::default);
    for (key, value) in labels {
        map.insert((*key).to_string(), (*value).to_string());
    }
    obj
}

#[must_use]
pub fn with_annotations(mut obj: DynamicObject, annotations: &[(&str, &str)]) -> DynamicObject {
    let map = obj.metadata.annotations.get_or_insert_with(Default::default);
    for (key, value) in annotations {
        map.insert((*key).to_string(), (*value).to_string());
    }
    obj
}

/// Merge fields into the object body (spec, status, data, ...).
#[must_use]
pub fn with_data(mut obj: DynamicObject, data: serde_json::Value) -> DynamicObject {
    merge_json(&mut obj.data, &data);
    obj
}

#[must_use]
pub fn with_finalizers(mut obj: DynamicObject, finalizers: &[&str]) -> DynamicObject {
    obj.metadata.finalizers = Some(finalizers.iter().map(|f| (*f).to_string()).collect());
    obj
}

#[must_use]
pub fn with_deletion_timestamp(mut obj: DynamicObject) -> DynamicObject {
    obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    obj
}

#[must_use]
pub fn with_deletion_grace_period(mut obj: DynamicObject, seconds: i64) -> DynamicObject {
    obj.metadata.deletion_grace_period_seconds = Some(seconds);
    obj
}

/// One scenario: seed both clusters, fire requests, compare final state.
pub struct SyncTest {
    pub name: &'static str,
    pub initial_virtual: Vec<DynamicObject>,
    pub initial_physical: Vec<DynamicObject>,
    pub requests: Vec<SyncRequest>,
    /// Full expected state of the syncer's kind on the virtual cluster.
    pub expected_virtual: Option<Vec<DynamicObject>>,
    /// Full expected state of the syncer's kind on the host cluster.
    pub expected_physical: Option<Vec<DynamicObject>>,
    /// Substring the last reconcile error must contain; `None` means every
    /// reconcile must succeed.
    pub expected_error: Option<&'static str>,
}

impl Default for SyncTest {
    fn default() -> Self {
        Self {
            name: "",
            initial_virtual: Vec::new(),
            initial_physical: Vec::new(),
            requests: Vec::new(),
            expected_virtual: None,
            expected_physical: None,
            expected_error: None,
        }
    }
}

fn sorted_values(mut objects: Vec<DynamicObject>) -> Vec<serde_json::Value> {
    objects.sort_by_key(object_key);
    objects
        .into_iter()
        .map(|obj| serde_json::to_value(obj).unwrap_or_default())
        .collect()
}

async fn compare_state(
    test_name: &str,
    side: &str,
    client: &FakeClusterClient,
    gvk: &GroupVersionKind,
    expected: Vec<DynamicObject>,
) {
    let actual = client.list(gvk, None).await.unwrap_or_default();
    assert_eq!(
        sorted_values(expected),
        sorted_values(actual),
        "{test_name}: {side} state mismatch"
    );
}

/// Run a table of scenarios against a syncer built by `factory`. Each
/// scenario gets a fresh context and controller.
pub async fn run_sync_tests<F>(config: SyncConfig, factory: F, tests: Vec<SyncTest>)
where
    F: Fn(&RegisterContext) -> Result<Arc<dyn Syncer>, SyncError>,
{
    for test in tests {
        let ctx = new_fake_register_context(config.clone());
        crate::mappings::resources::register_mappings(&ctx)
            .unwrap_or_else(|err| panic!("{}: register mappings: {err}", test.name));

        ctx.virtual_client.seed(test.initial_virtual.clone());
        ctx.physical_client.seed(test.initial_physical.clone());

        let syncer = factory(&ctx.register)
            .unwrap_or_else(|err| panic!("{}: build syncer: {err}", test.name));
        let gvk = syncer.gvk().clone();
        let controller = SyncController::new(&ctx.register, syncer);

        let mut last_error: Option<SyncError> = None;
        for request in test.requests.clone() {
            match controller.reconcile(request).await {
                Ok(_) => {}
                Err(err) => last_error = Some(err),
            }
        }

        match (&test.expected_error, &last_error) {
            (Some(expected), Some(actual)) => {
                let message = actual.to_string();
                assert!(
                    message.contains(expected),
                    "{}: error {message:?} does not contain {expected:?}",
                    test.name
                );
            }
            (Some(expected), None) => {
                panic!("{}: expected error containing {expected:?}, got success", test.name)
            }
            (None, Some(actual)) => panic!("{}: unexpected error: {actual}", test.name),
            (None, None) => {}
        }

        if let Some(expected) = test.expected_virtual {
            compare_state(test.name, "virtual", &ctx.virtual_client, &gvk, expected).await;
        }
        if let Some(expected) = test.expected_physical {
            compare_state(test.name, "physical", &ctx.physical_client, &gvk, expected).await;
        }
    }
}
