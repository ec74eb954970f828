//! Scenario tests for the host -> virtual mirror archetype (storage
//! classes).

use virtual_cluster_syncer::config::SyncConfig;
use virtual_cluster_syncer::resources::storageclasses;
use virtual_cluster_syncer::syncer::request::to_host_request;
use virtual_cluster_syncer::syncer::SyncRequest;
use virtual_cluster_syncer::testing::{run_sync_tests, test_object, with_data, SyncTest};

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.from_host.storage_classes.enabled = true;
    config
}

fn host_storage_class() -> kube::core::DynamicObject {
    with_data(
        test_object("storage.k8s.io/v1", "StorageClass", "", "testsc"),
        serde_json::json!({ "provisioner": "my-provisioner" }),
    )
}

fn host_storage_class_with_parameters() -> kube::core::DynamicObject {
    with_data(
        host_storage_class(),
        serde_json::json!({ "parameters": { "TEST": "TEST" } }),
    )
}

#[tokio::test]
async fn test_host_storage_class_is_projected_into_virtual_cluster() {
    run_sync_tests(
        config(),
        storageclasses::new,
        vec![SyncTest {
            name: "project new host storage class",
            initial_physical: vec![host_storage_class()],
            requests: vec![to_host_request(SyncRequest::new("", "testsc"))],
            expected_virtual: Some(vec![host_storage_class()]),
            expected_physical: Some(vec![host_storage_class()]),
            ..Default::default()
        }],
    )
    .await;
}

#[tokio::test]
async fn test_host_update_converges_virtual_projection() {
    run_sync_tests(
        config(),
        storageclasses::new,
        vec![SyncTest {
            name: "host parameter update reaches the virtual object",
            initial_virtual: vec![host_storage_class()],
            initial_physical: vec![host_storage_class_with_parameters()],
            requests: vec![to_host_request(SyncRequest::new("", "testsc"))],
            expected_virtual: Some(vec![host_storage_class_with_parameters()]),
            expected_physical: Some(vec![host_storage_class_with_parameters()]),
            ..Default::default()
        }],
    )
    .await;
}

#[tokio::test]
async fn test_host_deletion_removes_virtual_projection() {
    run_sync_tests(
        config(),
        storageclasses::new,
        vec![SyncTest {
            name: "virtual projection is deleted when the host object is gone",
            initial_virtual: vec![host_storage_class()],
            requests: vec![SyncRequest::new("", "testsc")],
            expected_virtual: Some(vec![]),
            expected_physical: Some(vec![]),
            ..Default::default()
        }],
    )
    .await;
}
