//! End-to-end engine tests: event fan-out on deletions and the
//! skip-back-sync escape hatch.

use std::time::Duration;

use futures::StreamExt;
use virtual_cluster_syncer::client::{ClusterClient, WatchEvent};
use virtual_cluster_syncer::config::SyncConfig;
use virtual_cluster_syncer::constants::{
    KIND_ANNOTATION, MARKER_LABEL, NAME_ANNOTATION, NAMESPACE_ANNOTATION, NAMESPACE_LABEL,
    SKIP_BACK_SYNC_ANNOTATION, UID_ANNOTATION,
};
use virtual_cluster_syncer::mappings::resources::{register_mappings, secrets_gvk};
use virtual_cluster_syncer::resources::secrets;
use virtual_cluster_syncer::syncer::request::{to_delete_request, to_host_request};
use virtual_cluster_syncer::syncer::{EventSources, SyncController, SyncRequest};
use virtual_cluster_syncer::testing::{
    new_fake_register_context, test_object, with_annotations, with_labels, with_uid,
};

fn managed_host_secret() -> kube::core::DynamicObject {
    with_labels(
        with_annotations(
            test_object("v1", "Secret", "workload", "a-x-default-x-suffix"),
            &[
                (NAME_ANNOTATION, "a"),
                (NAMESPACE_ANNOTATION, "default"),
                (UID_ANNOTATION, "123"),
                (KIND_ANNOTATION, "v1/Secret"),
            ],
        ),
        &[(MARKER_LABEL, "suffix"), (NAMESPACE_LABEL, "default")],
    )
}

/// A virtual deletion event must clean up the host counterpart even though
/// the virtual cache no longer holds the object: the enqueue policy records
/// the computed host identity in the follow-up request.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_virtual_delete_event_cleans_up_host_object() {
    let ctx = new_fake_register_context(SyncConfig::default());
    register_mappings(&ctx).unwrap();
    ctx.physical_client.seed(vec![managed_host_secret()]);

    let syncer = secrets::new(&ctx).unwrap();
    let controller = SyncController::new(&ctx, syncer);

    let deleted = with_uid(test_object("v1", "Secret", "default", "a"), "123");
    let sources = EventSources {
        virtual_events: Some(futures::stream::iter(vec![WatchEvent::Deleted(deleted)]).boxed()),
        host_events: Vec::new(),
    };
    let handles = controller.start(sources);

    // both follow-up requests drain through the worker pool
    tokio::time::sleep(Duration::from_millis(300)).await;

    let remaining = ctx
        .physical_client
        .list(&secrets_gvk(), None)
        .await
        .unwrap();
    assert!(remaining.is_empty(), "host counterpart should be deleted");

    for handle in handles {
        handle.abort();
    }
}

/// Same fan-out driven synchronously through the codec: the host-tagged
/// delete request alone must remove the host object once the virtual side
/// is gone.
#[tokio::test]
async fn test_host_tagged_delete_request_removes_orphaned_host_object() {
    let ctx = new_fake_register_context(SyncConfig::default());
    register_mappings(&ctx).unwrap();
    ctx.physical_client.seed(vec![managed_host_secret()]);

    let syncer = secrets::new(&ctx).unwrap();
    let controller = SyncController::new(&ctx, syncer);

    controller
        .reconcile(to_delete_request(to_host_request(SyncRequest::new(
            "workload",
            "a-x-default-x-suffix",
        ))))
        .await
        .unwrap();

    let remaining = ctx
        .physical_client
        .list(&secrets_gvk(), None)
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_skip_back_sync_annotation_preserves_host_object() {
    let ctx = new_fake_register_context(SyncConfig::default());
    register_mappings(&ctx).unwrap();
    ctx.physical_client.seed(vec![with_annotations(
        managed_host_secret(),
        &[(SKIP_BACK_SYNC_ANNOTATION, "true")],
    )]);

    let syncer = secrets::new(&ctx).unwrap();
    let controller = SyncController::new(&ctx, syncer);

    controller
        .reconcile(to_host_request(SyncRequest::new(
            "workload",
            "a-x-default-x-suffix",
        )))
        .await
        .unwrap();

    let remaining = ctx
        .physical_client
        .list(&secrets_gvk(), None)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1, "host object must not be deleted");
}

/// A syncer with a controller modifier can contribute extra host event
/// sources; events from those sources run through the same enqueue policy.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_modifier_adds_extra_host_source() {
    use async_trait::async_trait;
    use kube::core::{DynamicObject, GroupVersionKind};
    use virtual_cluster_syncer::mappings::Mapper;
    use virtual_cluster_syncer::syncer::types::{ControllerModifier, SyncError, SyncOutcome, Syncer};
    use virtual_cluster_syncer::syncer::{register_syncer, RegisterContext, SyncContext};

    /// Delegates everything to the secret syncer but wires in an extra
    /// host-side event source.
    struct ExtraSourceSyncer {
        inner: std::sync::Arc<dyn Syncer>,
    }

    #[async_trait]
    impl Syncer for ExtraSourceSyncer {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn gvk(&self) -> &GroupVersionKind {
            self.inner.gvk()
        }

        fn mapper(&self) -> &dyn Mapper {
            self.inner.mapper()
        }

        fn modifier(&self) -> Option<&dyn ControllerModifier> {
            Some(self)
        }

        async fn sync_to_host(
            &self,
            ctx: &SyncContext,
            v_obj: DynamicObject,
        ) -> Result<SyncOutcome, SyncError> {
            self.inner.sync_to_host(ctx, v_obj).await
        }

        async fn sync(
            &self,
            ctx: &SyncContext,
            p_obj: DynamicObject,
            v_obj: DynamicObject,
        ) -> Result<SyncOutcome, SyncError> {
            self.inner.sync(ctx, p_obj, v_obj).await
        }
    }

    impl ControllerModifier for ExtraSourceSyncer {
        fn modify(
            &self,
            _ctx: &RegisterContext,
            sources: &mut EventSources,
        ) -> Result<(), SyncError> {
            sources.host_events.push(
                futures::stream::iter(vec![WatchEvent::Updated(managed_host_secret())]).boxed(),
            );
            Ok(())
        }
    }

    let ctx = new_fake_register_context(SyncConfig::default());
    register_mappings(&ctx).unwrap();
    // the virtual counterpart is gone, so the host event must trigger the
    // host object's deletion
    ctx.physical_client.seed(vec![managed_host_secret()]);

    let syncer = std::sync::Arc::new(ExtraSourceSyncer {
        inner: secrets::new(&ctx).unwrap(),
    });
    let (_controller, handles) =
        register_syncer(&ctx, syncer, EventSources::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let remaining = ctx
        .physical_client
        .list(&secrets_gvk(), None)
        .await
        .unwrap();
    assert!(remaining.is_empty());

    for handle in handles {
        handle.abort();
    }
}

/// A host object whose identity annotations are gone cannot be mapped back
/// to a virtual identity; the reconcile is a no-op rather than an error.
#[tokio::test]
async fn test_unmappable_host_request_is_a_noop() {
    let ctx = new_fake_register_context(SyncConfig::default());
    register_mappings(&ctx).unwrap();

    let syncer = secrets::new(&ctx).unwrap();
    let controller = SyncController::new(&ctx, syncer);

    let outcome = controller
        .reconcile(to_host_request(SyncRequest::new("workload", "does-not-exist")))
        .await
        .unwrap();
    assert_eq!(outcome.requeue_after, None);
}
