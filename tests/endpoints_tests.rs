//! Scenario tests for the endpoints bridge: management is handed back and
//! forth with the in-cluster endpoints controller based on the service
//! selector.

use virtual_cluster_syncer::config::SyncConfig;
use virtual_cluster_syncer::constants::{
    KIND_ANNOTATION, MARKER_LABEL, NAME_ANNOTATION, NAMESPACE_ANNOTATION, NAMESPACE_LABEL,
    UID_ANNOTATION,
};
use virtual_cluster_syncer::resources::endpoints;
use virtual_cluster_syncer::syncer::SyncRequest;
use virtual_cluster_syncer::testing::{
    run_sync_tests, test_object, with_annotations, with_data, with_labels, with_uid, SyncTest,
};

fn virtual_service(selector: Option<serde_json::Value>) -> kube::core::DynamicObject {
    let spec = match selector {
        Some(selector) => serde_json::json!({ "spec": { "selector": selector } }),
        None => serde_json::json!({ "spec": {} }),
    };
    with_data(test_object("v1", "Service", "default", "foo"), spec)
}

fn managed_host_endpoints() -> kube::core::DynamicObject {
    with_labels(
        with_annotations(
            test_object("v1", "Endpoints", "workload", "foo-x-default-x-suffix"),
            &[
                (NAME_ANNOTATION, "foo"),
                (NAMESPACE_ANNOTATION, "default"),
                (UID_ANNOTATION, "e-1"),
                (KIND_ANNOTATION, "v1/Endpoints"),
            ],
        ),
        &[(MARKER_LABEL, "suffix"), (NAMESPACE_LABEL, "default")],
    )
}

fn native_host_endpoints() -> kube::core::DynamicObject {
    test_object("v1", "Endpoints", "workload", "foo-x-default-x-suffix")
}

#[tokio::test]
async fn test_selector_service_hands_endpoints_back_to_native_controller() {
    run_sync_tests(
        SyncConfig::default(),
        endpoints::new,
        vec![SyncTest {
            name: "managed host endpoints are deleted when the service gains a selector",
            initial_virtual: vec![
                virtual_service(Some(serde_json::json!({ "app": "foo" }))),
                with_uid(test_object("v1", "Endpoints", "default", "foo"), "e-1"),
            ],
            initial_physical: vec![managed_host_endpoints()],
            requests: vec![SyncRequest::new("default", "foo")],
            // skip=true: nothing is recreated, the native controller takes
            // over
            expected_physical: Some(vec![]),
            ..Default::default()
        }],
    )
    .await;
}

#[tokio::test]
async fn test_selectorless_service_takes_over_native_endpoints() {
    run_sync_tests(
        SyncConfig::default(),
        endpoints::new,
        vec![SyncTest {
            name: "native host endpoints are deleted when the service loses its selector",
            initial_virtual: vec![virtual_service(None)],
            initial_physical: vec![native_host_endpoints()],
            requests: vec![SyncRequest::new("default", "foo")],
            expected_physical: Some(vec![]),
            ..Default::default()
        }],
    )
    .await;
}

#[tokio::test]
async fn test_selectorless_service_endpoints_are_synced_down() {
    let virtual_endpoints = with_data(
        with_uid(test_object("v1", "Endpoints", "default", "foo"), "e-1"),
        serde_json::json!({
            "subsets": [{
                "addresses": [{
                    "ip": "10.0.0.7",
                    "nodeName": "virtual-node",
                    "targetRef": { "kind": "Pod", "name": "foo-0", "namespace": "default" }
                }],
                "ports": [{ "port": 8080 }]
            }]
        }),
    );

    let expected_host = with_data(
        managed_host_endpoints(),
        serde_json::json!({
            "subsets": [{
                "addresses": [{ "ip": "10.0.0.7" }],
                "ports": [{ "port": 8080 }]
            }]
        }),
    );

    run_sync_tests(
        SyncConfig::default(),
        endpoints::new,
        vec![SyncTest {
            name: "endpoints of a selectorless service are created on the host",
            initial_virtual: vec![virtual_service(None), virtual_endpoints],
            requests: vec![SyncRequest::new("default", "foo")],
            expected_physical: Some(vec![expected_host]),
            ..Default::default()
        }],
    )
    .await;
}

#[tokio::test]
async fn test_missing_service_skips_reconcile() {
    run_sync_tests(
        SyncConfig::default(),
        endpoints::new,
        vec![SyncTest {
            name: "no service, no sync",
            initial_physical: vec![managed_host_endpoints()],
            requests: vec![SyncRequest::new("default", "foo")],
            expected_physical: Some(vec![managed_host_endpoints()]),
            ..Default::default()
        }],
    )
    .await;
}
