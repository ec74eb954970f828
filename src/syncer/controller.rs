//! # SyncController
//!
//! The generic reconciliation engine. One controller services one syncer:
//! it receives change events from both clusters, tags requests with their
//! provenance, serializes work per logical object, fetches both sides,
//! decides which transition applies, and delegates to the syncer's hooks.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use futures::StreamExt;
use kube::core::{DynamicObject, GroupVersionKind};
use tokio::sync::mpsc;
use tokio::sync::{Semaphore, MutexGuard as AsyncMutexGuard, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::{ClusterClient, DeleteOptions, EventRecorder, EventType, WatchEvent};
use crate::config::SyncerOptions;
use crate::constants::{
    CONTROLLER_ANNOTATION, CONTROLLER_LABEL, DEFAULT_RETRY_MAX_SECS, DEFAULT_RETRY_MIN_SECS,
    LOCK_SHARD_COUNT, MAX_CONCURRENT_RECONCILES, SKIP_BACK_SYNC_ANNOTATION, UID_ANNOTATION,
};
use crate::mappings::MapperRegistry;
use crate::observability::metrics;
use crate::syncer::backoff::FibonacciBackoff;
use crate::syncer::context::{EventSource, RegisterContext, SyncContext};
use crate::syncer::request::{
    from_delete_request, from_host_request, is_host_request, to_delete_request, to_host_request,
    SyncRequest,
};
use crate::syncer::types::{SyncError, SyncOutcome, Syncer};
use crate::translate::{annotation, label, NameTranslator, NamespacedName};

/// Sharded per-key lock table. Bounds memory with a fixed shard array while
/// keeping throughput across unrelated keys.
struct KeyLocker {
    shards: Vec<AsyncMutex<()>>,
}

impl KeyLocker {
    fn new() -> Self {
        Self {
            shards: (0..LOCK_SHARD_COUNT).map(|_| AsyncMutex::new(())).collect(),
        }
    }

    async fn lock(&self, key: &str) -> AsyncMutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index].lock().await
    }
}

/// Event streams feeding one controller. A [`ControllerModifier`] may push
/// extra host sources at registration.
///
/// [`ControllerModifier`]: crate::syncer::types::ControllerModifier
#[derive(Default)]
pub struct EventSources {
    pub virtual_events: Option<BoxStream<'static, WatchEvent>>,
    pub host_events: Vec<BoxStream<'static, WatchEvent>>,
}

impl EventSources {
    #[must_use]
    pub fn new(
        virtual_events: BoxStream<'static, WatchEvent>,
        host_events: BoxStream<'static, WatchEvent>,
    ) -> Self {
        Self {
            virtual_events: Some(virtual_events),
            host_events: vec![host_events],
        }
    }
}

/// Per-key retry state, reset on the first successful reconcile.
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(DEFAULT_RETRY_MIN_SECS, DEFAULT_RETRY_MAX_SECS),
            error_count: 0,
        }
    }
}

enum Fetched {
    Excluded,
    Object(Option<DynamicObject>),
}

/// The reconciliation engine for one syncer.
pub struct SyncController {
    syncer: Arc<dyn Syncer>,
    options: SyncerOptions,

    virtual_client: Arc<dyn ClusterClient>,
    physical_client: Arc<dyn ClusterClient>,
    v_event_recorder: Arc<dyn EventRecorder>,

    current_namespace: String,
    translator: Arc<NameTranslator>,
    mappers: Arc<MapperRegistry>,

    locker: KeyLocker,
    queue_tx: mpsc::UnboundedSender<SyncRequest>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncRequest>>>,
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl SyncController {
    #[must_use]
    pub fn new(ctx: &RegisterContext, syncer: Arc<dyn Syncer>) -> Arc<Self> {
        let options = syncer.options();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            syncer,
            options,
            virtual_client: ctx.virtual_client.clone(),
            physical_client: ctx.physical_client.clone(),
            v_event_recorder: ctx.virtual_event_recorder.clone(),
            current_namespace: ctx.current_namespace.clone(),
            translator: ctx.translator.clone(),
            mappers: ctx.mappers.clone(),
            locker: KeyLocker::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            backoff_states: Mutex::new(HashMap::new()),
        })
    }

    fn sync_context(&self, event_source: EventSource, is_delete: bool) -> SyncContext {
        SyncContext {
            virtual_client: self.virtual_client.clone(),
            physical_client: self.physical_client.clone(),
            current_namespace: self.current_namespace.clone(),
            event_source,
            is_delete,
            translator: self.translator.clone(),
            mappers: self.mappers.clone(),
        }
    }

    /// One pass of the engine on a single request.
    pub async fn reconcile(&self, orig_req: SyncRequest) -> Result<SyncOutcome, SyncError> {
        // extract whether this was a delete request
        let (req, is_delete) = from_delete_request(orig_req);

        // if it is a host request we need to find the virtual identity first
        let Some((v_req, p_req)) = self.extract_request(&req).await? else {
            return Ok(SyncOutcome::done());
        };
        if v_req.is_empty() {
            return Ok(SyncOutcome::done());
        }

        // serialize on the virtual identity: a host event and a virtual
        // event for the same logical object may be queued at the same time
        let _guard = self.locker.lock(&v_req.to_string()).await;

        let event_source = if is_host_request(&req) {
            EventSource::Host
        } else {
            EventSource::Virtual
        };
        let ctx = self.sync_context(event_source, is_delete);

        // plugin pre-hook may pre-empt the reconcile entirely
        if let Some(starter) = self.syncer.starter() {
            let skip = starter.reconcile_start(&ctx, &SyncRequest::from(v_req.clone())).await;
            let result = match skip {
                Ok(true) => Ok(SyncOutcome::done()),
                Err(err) => Err(err),
                Ok(false) => self.reconcile_objects(&ctx, &v_req, &p_req).await,
            };
            starter.reconcile_end();
            return result;
        }

        self.reconcile_objects(&ctx, &v_req, &p_req).await
    }

    async fn reconcile_objects(
        &self,
        ctx: &SyncContext,
        v_req: &NamespacedName,
        p_req: &NamespacedName,
    ) -> Result<SyncOutcome, SyncError> {
        let Some((v_obj, p_obj)) = self.get_objects(v_req, p_req).await? else {
            return Ok(SyncOutcome::done());
        };

        match (v_obj, p_obj) {
            (Some(v_obj), Some(p_obj)) => {
                // a stale host object (recorded virtual UID no longer
                // matches) is deleted and recreated on the next pass
                let recorded_uid = annotation(&p_obj, UID_ANNOTATION).unwrap_or_default();
                let live_uid = v_obj.metadata.uid.as_deref().unwrap_or_default();
                if !self.options.disable_uid_deletion
                    && !recorded_uid.is_empty()
                    && recorded_uid != live_uid
                {
                    if p_obj.metadata.deletion_timestamp.is_some() {
                        return Ok(SyncOutcome::requeue_after(Duration::from_secs(1)));
                    }

                    return delete_host_object(
                        ctx,
                        self.syncer.gvk(),
                        &p_obj,
                        "virtual object uid is different",
                    )
                    .await;
                }

                self.syncer.sync(ctx, p_obj, v_obj).await
            }
            (Some(v_obj), None) => self.syncer.sync_to_host(ctx, v_obj).await,
            (None, Some(p_obj)) => {
                if annotation(&p_obj, SKIP_BACK_SYNC_ANNOTATION) == Some("true") {
                    return Ok(SyncOutcome::done());
                }

                if let Some(to_virtual) = self.syncer.to_virtual() {
                    return to_virtual.sync_to_virtual(ctx, p_obj).await;
                }

                delete_host_object(ctx, self.syncer.gvk(), &p_obj, "virtual object was deleted")
                    .await
            }
            (None, None) => Ok(SyncOutcome::done()),
        }
    }

    /// Resolve the virtual identity a request addresses. Host requests are
    /// resolved through the live host object; if that object is excluded
    /// the whole reconcile is a no-op.
    async fn extract_request(
        &self,
        req: &SyncRequest,
    ) -> Result<Option<(NamespacedName, NamespacedName)>, SyncError> {
        if !is_host_request(req) {
            return Ok(Some((req.to_name(), NamespacedName::default())));
        }

        let p_req = from_host_request(req.clone()).to_name();
        let p_obj = match self.get_physical_object(&p_req, None).await? {
            Fetched::Excluded => return Ok(None),
            Fetched::Object(p_obj) => p_obj,
        };

        let v_req = self.syncer.host_to_virtual(&p_req, p_obj.as_ref());
        Ok(Some((v_req, p_req)))
    }

    /// Fetch both objects, host-first for host-originated requests,
    /// virtual-first otherwise. `None` means an exclusion rule fired.
    async fn get_objects(
        &self,
        v_req: &NamespacedName,
        p_req: &NamespacedName,
    ) -> Result<Option<(Option<DynamicObject>, Option<DynamicObject>)>, SyncError> {
        if !p_req.is_empty() {
            return self.get_objects_from_physical(v_req, p_req).await;
        }

        self.get_objects_from_virtual(v_req).await
    }

    async fn get_objects_from_physical(
        &self,
        v_req: &NamespacedName,
        p_req: &NamespacedName,
    ) -> Result<Option<(Option<DynamicObject>, Option<DynamicObject>)>, SyncError> {
        let p_obj = match self.get_physical_object(p_req, None).await? {
            Fetched::Excluded => return Ok(None),
            Fetched::Object(p_obj) => p_obj,
        };

        let v_obj = match self.get_virtual_object(v_req).await? {
            Fetched::Excluded => return Ok(None),
            Fetched::Object(v_obj) => v_obj,
        };

        Ok(Some((v_obj, p_obj)))
    }

    async fn get_objects_from_virtual(
        &self,
        v_req: &NamespacedName,
    ) -> Result<Option<(Option<DynamicObject>, Option<DynamicObject>)>, SyncError> {
        let v_obj = match self.get_virtual_object(v_req).await? {
            Fetched::Excluded => return Ok(None),
            Fetched::Object(v_obj) => v_obj,
        };

        let p_req = self.syncer.virtual_to_host(v_req, v_obj.as_ref());
        let p_obj = match self.get_physical_object(&p_req, v_obj.as_ref()).await? {
            Fetched::Excluded => return Ok(None),
            Fetched::Object(p_obj) => p_obj,
        };

        Ok(Some((v_obj, p_obj)))
    }

    async fn get_virtual_object(&self, req: &NamespacedName) -> Result<Fetched, SyncError> {
        if req.is_empty() {
            return Ok(Fetched::Excluded);
        }

        let v_obj = match self.virtual_client.get(self.syncer.gvk(), req).await {
            Ok(obj) => Some(obj),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(SyncError::Other(anyhow::anyhow!("get virtual object: {err}"))),
        };

        match v_obj {
            Some(v_obj) if self.exclude_virtual(&v_obj) => Ok(Fetched::Excluded),
            other => Ok(Fetched::Object(other)),
        }
    }

    async fn get_physical_object(
        &self,
        req: &NamespacedName,
        v_obj: Option<&DynamicObject>,
    ) -> Result<Fetched, SyncError> {
        if req.is_empty() {
            return Ok(Fetched::Excluded);
        }

        let p_obj = match self.physical_client.get(self.syncer.gvk(), req).await {
            Ok(obj) => Some(obj),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                return Err(SyncError::Other(anyhow::anyhow!("get physical object: {err}")))
            }
        };

        match p_obj {
            Some(p_obj) => {
                if self.exclude_physical(&p_obj, v_obj).await? {
                    Ok(Fetched::Excluded)
                } else {
                    Ok(Fetched::Object(Some(p_obj)))
                }
            }
            None => Ok(Fetched::Object(None)),
        }
    }

    /// Exclusion rules for the host side. A foreign object shadowing a
    /// live virtual object is a conflict, not a silent skip, unless the
    /// plugin brought its own exclusion rules.
    async fn exclude_physical(
        &self,
        p_obj: &DynamicObject,
        v_obj: Option<&DynamicObject>,
    ) -> Result<bool, SyncError> {
        let excluder = self.syncer.excluder();

        if !self.syncer.is_managed(p_obj) {
            if excluder.is_none() {
                if let Some(v_obj) = v_obj {
                    let message = format!(
                        "conflict: cannot sync virtual object {} as unmanaged physical object {} exists with desired name",
                        NamespacedName::from_object(v_obj),
                        NamespacedName::from_object(p_obj),
                    );
                    self.v_event_recorder
                        .event(v_obj, EventType::Warning, "SyncError", &message)
                        .await;
                    return Err(SyncError::Conflict(message));
                }
            }

            return Ok(true);
        }

        if let Some(excluder) = excluder {
            return Ok(excluder.exclude_physical(p_obj));
        }

        if label(p_obj, CONTROLLER_LABEL).is_some_and(|v| !v.is_empty()) {
            return Ok(true);
        }
        if annotation(p_obj, CONTROLLER_ANNOTATION)
            .is_some_and(|owner| !owner.is_empty() && owner != self.syncer.name())
        {
            return Ok(true);
        }

        Ok(false)
    }

    fn exclude_virtual(&self, v_obj: &DynamicObject) -> bool {
        if let Some(excluder) = self.syncer.excluder() {
            return excluder.exclude_virtual(v_obj);
        }

        if label(v_obj, CONTROLLER_LABEL).is_some_and(|v| !v.is_empty()) {
            return true;
        }
        if annotation(v_obj, CONTROLLER_ANNOTATION)
            .is_some_and(|owner| !owner.is_empty() && owner != self.syncer.name())
        {
            return true;
        }

        false
    }

    /// Enqueue policy for virtual cluster events. Deletions fan out into a
    /// host-side cleanup request (with the computed host identity, which
    /// would otherwise be lost) plus a virtual-side delete request.
    pub fn enqueue_virtual(&self, obj: &DynamicObject, is_delete: bool) {
        let name = NamespacedName::from_object(obj);
        if name.is_empty() {
            return;
        }

        if is_delete {
            let p_name = self.syncer.virtual_to_host(&name, Some(obj));
            if !p_name.is_empty() {
                self.enqueue(to_delete_request(to_host_request(SyncRequest::from(p_name))));
            }

            self.enqueue(to_delete_request(SyncRequest::from(name)));
            return;
        }

        self.enqueue(SyncRequest::from(name));
    }

    /// Enqueue policy for host cluster events. Foreign objects are ignored
    /// outright; managed deletions fan out into both follow-up requests.
    pub fn enqueue_physical(&self, obj: &DynamicObject, is_delete: bool) {
        let name = NamespacedName::from_object(obj);
        if name.is_empty() || !self.syncer.is_managed(obj) {
            return;
        }

        if is_delete {
            let v_name = self.syncer.host_to_virtual(&name, Some(obj));
            if !v_name.is_empty() {
                self.enqueue(to_delete_request(SyncRequest::from(v_name)));
            }

            self.enqueue(to_delete_request(to_host_request(SyncRequest::from(name))));
            return;
        }

        self.enqueue(to_host_request(SyncRequest::from(name)));
    }

    pub fn handle_virtual_event(&self, event: &WatchEvent) {
        self.enqueue_virtual(event.object(), event.is_delete());
    }

    pub fn handle_host_event(&self, event: &WatchEvent) {
        self.enqueue_physical(event.object(), event.is_delete());
    }

    fn enqueue(&self, req: SyncRequest) {
        // send only fails after shutdown, when dropping the event is fine
        let _ = self.queue_tx.send(req);
    }

    fn requeue_later(&self, req: SyncRequest, delay: Duration) {
        let queue_tx = self.queue_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue_tx.send(req);
        });
    }

    fn next_backoff(&self, key: &str) -> (Duration, u32) {
        let mut states = self.backoff_states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
        state.error_count += 1;
        (state.backoff.next_backoff(), state.error_count)
    }

    fn reset_backoff(&self, key: &str) {
        let mut states = self.backoff_states.lock().unwrap_or_else(|e| e.into_inner());
        states.remove(key);
    }

    /// Drive event streams into the queue and process requests with up to
    /// [`MAX_CONCURRENT_RECONCILES`] workers. Failed reconciles are retried
    /// with per-key Fibonacci backoff.
    pub fn start(self: Arc<Self>, mut sources: EventSources) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(mut stream) = sources.virtual_events.take() {
            let controller = self.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    controller.handle_virtual_event(&event);
                }
            }));
        }

        for mut stream in sources.host_events.drain(..) {
            let controller = self.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    controller.handle_host_event(&event);
                }
            }));
        }

        let controller = self.clone();
        handles.push(tokio::spawn(async move {
            controller.run_workers().await;
        }));

        handles
    }

    async fn run_workers(self: Arc<Self>) {
        let Some(mut queue_rx) = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            error!(syncer = self.syncer.name(), "controller is already running");
            return;
        };

        info!(syncer = self.syncer.name(), "starting syncer workers");
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_RECONCILES));

        while let Some(req) = queue_rx.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let controller = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                controller.process_request(req).await;
            });
        }

        info!(syncer = self.syncer.name(), "syncer workers stopped");
    }

    async fn process_request(&self, req: SyncRequest) {
        let key = req.to_string();
        let started = Instant::now();
        metrics::inc_reconciliations();

        match self.reconcile(req.clone()).await {
            Ok(outcome) => {
                self.reset_backoff(&key);
                metrics::observe_reconcile_duration(started.elapsed());
                if let Some(delay) = outcome.requeue_after {
                    self.requeue_later(req, delay);
                }
            }
            Err(err) => {
                metrics::inc_reconciliation_errors();
                let (delay, error_count) = self.next_backoff(&key);
                warn!(
                    syncer = self.syncer.name(),
                    request = %key,
                    error_count,
                    "reconcile failed, retrying in {}s: {err}",
                    delay.as_secs()
                );
                self.requeue_later(req, delay);
            }
        }
    }
}

/// Register a syncer: apply its controller modifier to the event sources,
/// build the controller, and start it.
pub fn register_syncer(
    ctx: &RegisterContext,
    syncer: Arc<dyn Syncer>,
    mut sources: EventSources,
) -> Result<(Arc<SyncController>, Vec<JoinHandle<()>>), SyncError> {
    if let Some(modifier) = syncer.modifier() {
        modifier.modify(ctx, &mut sources)?;
    }

    let controller = SyncController::new(ctx, syncer);
    let handles = controller.clone().start(sources);
    Ok((controller, handles))
}

/// Delete a host object, logging the user-visible reason. NotFound is
/// swallowed: the object is already gone.
pub async fn delete_host_object(
    ctx: &SyncContext,
    gvk: &GroupVersionKind,
    obj: &DynamicObject,
    reason: &str,
) -> Result<SyncOutcome, SyncError> {
    delete_object(ctx, gvk, obj, reason, false).await
}

/// Delete a virtual object, logging the user-visible reason.
pub async fn delete_virtual_object(
    ctx: &SyncContext,
    gvk: &GroupVersionKind,
    obj: &DynamicObject,
    reason: &str,
) -> Result<SyncOutcome, SyncError> {
    delete_object(ctx, gvk, obj, reason, true).await
}

async fn delete_object(
    ctx: &SyncContext,
    gvk: &GroupVersionKind,
    obj: &DynamicObject,
    reason: &str,
    virtual_side: bool,
) -> Result<SyncOutcome, SyncError> {
    let (side, client) = if virtual_side {
        ("virtual", &ctx.virtual_client)
    } else {
        ("host", &ctx.physical_client)
    };

    let name = NamespacedName::from_object(obj);
    info!("delete {side} {name}, because {reason}");

    match client.delete(gvk, &name, &DeleteOptions::default()).await {
        Ok(()) => Ok(SyncOutcome::done()),
        Err(err) if err.is_not_found() => Ok(SyncOutcome::done()),
        Err(err) => {
            info!("error deleting {side} object {name} in {side} cluster: {err}");
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::mappings::resources::{register_mappings, secrets_gvk};
    use crate::testing::{new_fake_register_context, test_object, with_uid};

    /// Tracks how many sync invocations overlap in time.
    struct OverlapSyncer {
        gvk: GroupVersionKind,
        mapper: Arc<dyn crate::mappings::Mapper>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl OverlapSyncer {
        fn new(ctx: &RegisterContext) -> Arc<Self> {
            Arc::new(Self {
                gvk: secrets_gvk(),
                mapper: ctx.mappers.by_gvk(&secrets_gvk()).unwrap(),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }

        async fn enter(&self) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Syncer for OverlapSyncer {
        fn name(&self) -> &str {
            "overlap"
        }

        fn gvk(&self) -> &GroupVersionKind {
            &self.gvk
        }

        fn mapper(&self) -> &dyn crate::mappings::Mapper {
            self.mapper.as_ref()
        }

        async fn sync_to_host(
            &self,
            _ctx: &SyncContext,
            _v_obj: DynamicObject,
        ) -> Result<SyncOutcome, SyncError> {
            self.enter().await;
            Ok(SyncOutcome::done())
        }

        async fn sync(
            &self,
            _ctx: &SyncContext,
            _p_obj: DynamicObject,
            _v_obj: DynamicObject,
        ) -> Result<SyncOutcome, SyncError> {
            self.enter().await;
            Ok(SyncOutcome::done())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reconciles_on_same_key_are_serialized() {
        let ctx = new_fake_register_context(crate::config::SyncConfig::default());
        register_mappings(&ctx).unwrap();

        ctx.virtual_client
            .seed(vec![with_uid(test_object("v1", "Secret", "default", "a"), "123")]);

        let syncer = OverlapSyncer::new(&ctx);
        let controller = SyncController::new(&ctx, syncer.clone());

        let req = || SyncRequest::new("default", "a");
        let (first, second, third) = tokio::join!(
            controller.reconcile(req()),
            controller.reconcile(req()),
            controller.reconcile(req()),
        );
        first.unwrap();
        second.unwrap();
        third.unwrap();

        assert_eq!(syncer.max_active.load(Ordering::SeqCst), 1);
    }
}
