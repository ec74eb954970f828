//! Tests for volume snapshot deletion propagation.

use virtual_cluster_syncer::client::ClusterClient;
use virtual_cluster_syncer::config::SyncConfig;
use virtual_cluster_syncer::constants::{
    KIND_ANNOTATION, MARKER_LABEL, NAME_ANNOTATION, NAMESPACE_ANNOTATION, NAMESPACE_LABEL,
    UID_ANNOTATION,
};
use virtual_cluster_syncer::mappings::resources::register_mappings;
use virtual_cluster_syncer::resources::volumesnapshots;
use virtual_cluster_syncer::syncer::{SyncController, SyncRequest};
use virtual_cluster_syncer::testing::{
    new_fake_register_context, run_sync_tests, test_object, with_annotations, with_data,
    with_deletion_grace_period, with_deletion_timestamp, with_finalizers, with_labels, with_uid,
    SyncTest,
};

const SNAPSHOT_API_VERSION: &str = "snapshot.storage.k8s.io/v1";

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.to_host.volume_snapshots.enabled = true;
    config
}

fn virtual_snapshot() -> kube::core::DynamicObject {
    with_data(
        with_uid(
            test_object(SNAPSHOT_API_VERSION, "VolumeSnapshot", "default", "snap"),
            "v-uid",
        ),
        serde_json::json!({ "spec": { "source": { "persistentVolumeClaimName": "data" } } }),
    )
}

fn managed_host_snapshot() -> kube::core::DynamicObject {
    with_uid(
        with_labels(
            with_annotations(
                with_data(
                    test_object(
                        SNAPSHOT_API_VERSION,
                        "VolumeSnapshot",
                        "workload",
                        "snap-x-default-x-suffix",
                    ),
                    serde_json::json!({ "spec": { "source": { "persistentVolumeClaimName": "data" } } }),
                ),
                &[
                    (NAME_ANNOTATION, "snap"),
                    (NAMESPACE_ANNOTATION, "default"),
                    (UID_ANNOTATION, "v-uid"),
                    (
                        KIND_ANNOTATION,
                        "snapshot.storage.k8s.io/v1/VolumeSnapshot",
                    ),
                ],
            ),
            &[(MARKER_LABEL, "suffix"), (NAMESPACE_LABEL, "default")],
        ),
        "p-uid",
    )
}

#[tokio::test]
async fn test_virtual_deletion_propagates_exactly_once() {
    let ctx = new_fake_register_context(config());
    register_mappings(&ctx).unwrap();

    let v_obj = with_deletion_grace_period(
        with_deletion_timestamp(with_finalizers(
            virtual_snapshot(),
            &["snapshot.storage.kubernetes.io/volumesnapshot-protection"],
        )),
        15,
    );
    let p_obj = with_finalizers(
        managed_host_snapshot(),
        &["snapshot.storage.kubernetes.io/volumesnapshot-protection"],
    );

    ctx.virtual_client.seed(vec![v_obj]);
    ctx.physical_client.seed(vec![p_obj]);

    let syncer = volumesnapshots::new(&ctx).unwrap();
    let controller = SyncController::new(&ctx, syncer);
    let request = SyncRequest::new("default", "snap");

    // first pass issues the delete with the virtual grace period and the
    // host uid as precondition
    controller.reconcile(request.clone()).await.unwrap();
    let deletes = ctx.physical_client.recorded_deletes();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].name.to_string(), "workload/snap-x-default-x-suffix");
    assert_eq!(deletes[0].options.grace_period_seconds, Some(15));
    assert_eq!(deletes[0].options.uid_precondition.as_deref(), Some("p-uid"));

    // the host snapshot is now terminating (it holds a finalizer); further
    // reconciles must not issue another delete
    controller.reconcile(request.clone()).await.unwrap();
    controller.reconcile(request).await.unwrap();
    assert_eq!(ctx.physical_client.recorded_deletes().len(), 1);
}

#[tokio::test]
async fn test_snapshot_class_change_is_synced_forward() {
    let updated_virtual = with_data(
        virtual_snapshot(),
        serde_json::json!({ "spec": { "volumeSnapshotClassName": "fast" } }),
    );
    let expected_host = with_data(
        managed_host_snapshot(),
        serde_json::json!({ "spec": { "volumeSnapshotClassName": "fast" } }),
    );

    run_sync_tests(
        config(),
        volumesnapshots::new,
        vec![SyncTest {
            name: "snapshot class flows virtual to host",
            initial_virtual: vec![updated_virtual.clone()],
            initial_physical: vec![managed_host_snapshot()],
            requests: vec![SyncRequest::new("default", "snap")],
            expected_virtual: Some(vec![updated_virtual]),
            expected_physical: Some(vec![expected_host]),
            ..Default::default()
        }],
    )
    .await;
}

#[tokio::test]
async fn test_host_status_is_synced_backward() {
    let host_with_status = with_data(
        managed_host_snapshot(),
        serde_json::json!({ "status": { "readyToUse": true } }),
    );
    let expected_virtual = with_data(
        virtual_snapshot(),
        serde_json::json!({ "status": { "readyToUse": true } }),
    );

    run_sync_tests(
        config(),
        volumesnapshots::new,
        vec![SyncTest {
            name: "status flows host to virtual",
            initial_virtual: vec![virtual_snapshot()],
            initial_physical: vec![host_with_status.clone()],
            requests: vec![SyncRequest::new("default", "snap")],
            expected_virtual: Some(vec![expected_virtual]),
            expected_physical: Some(vec![host_with_status]),
            ..Default::default()
        }],
    )
    .await;
}

#[tokio::test]
async fn test_delete_event_clears_virtual_finalizers_when_host_is_gone() {
    let terminating = with_deletion_timestamp(with_finalizers(
        virtual_snapshot(),
        &["snapshot.storage.kubernetes.io/volumesnapshot-protection"],
    ));

    let ctx = new_fake_register_context(config());
    register_mappings(&ctx).unwrap();
    ctx.virtual_client.seed(vec![terminating]);

    let syncer = volumesnapshots::new(&ctx).unwrap();
    let controller = SyncController::new(&ctx, syncer);
    controller
        .reconcile(SyncRequest::new("default", "snap"))
        .await
        .unwrap();

    let stored = ctx
        .virtual_client
        .list(
            &kube::core::GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshot"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].metadata.finalizers.as_deref(), Some(&[][..]));
    assert_eq!(stored[0].metadata.deletion_grace_period_seconds, Some(0));
}
