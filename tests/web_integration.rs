// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the REST client, version gate and HTTP reporter
//! using wiremock.

use std::time::Duration;

use duer_bridge::Credentials;
use duer_bridge::ProtocolError;
use duer_bridge::host::StateSnapshot;
use duer_bridge::sync::{DrainLoop, HttpReporter, ReportSink, StateSyncQueue};
use duer_bridge::version::VersionGate;
use duer_bridge::web::WebClient;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> WebClient {
    WebClient::new(server.uri(), Duration::from_secs(5)).unwrap()
}

async fn mount_plugin_config(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/plugin/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ============================================================================
// WebClient Tests
// ============================================================================

mod web_client {
    use super::*;

    #[tokio::test]
    async fn fetch_plugin_config() {
        let server = MockServer::start().await;
        mount_plugin_config(
            &server,
            serde_json::json!({"code": 0, "msg": "ok", "data": {"plugin_version": "2024.7.1"}}),
        )
        .await;

        let config = client(&server).plugin_config().await.unwrap();
        assert_eq!(config.plugin_version, "2024.7.1");
    }

    #[tokio::test]
    async fn nonzero_code_is_rejected() {
        let server = MockServer::start().await;
        mount_plugin_config(&server, serde_json::json!({"code": 500, "msg": "maintenance"})).await;

        let err = client(&server).plugin_config().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Rejected { code: 500, .. }));
    }

    #[tokio::test]
    async fn http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).plugin_config().await.unwrap_err();
        assert!(matches!(err, ProtocolError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn non_json_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        assert!(client(&server).plugin_config().await.is_err());
    }
}

// ============================================================================
// VersionGate Tests
// ============================================================================

mod version_gate {
    use super::*;

    #[tokio::test]
    async fn older_requirement_allows_sync() {
        let server = MockServer::start().await;
        mount_plugin_config(
            &server,
            serde_json::json!({"code": 0, "data": {"plugin_version": "2024.7.1"}}),
        )
        .await;

        assert!(VersionGate::new("2024.7.8").check(&client(&server)).await);
    }

    #[tokio::test]
    async fn newer_requirement_disables_sync() {
        let server = MockServer::start().await;
        mount_plugin_config(
            &server,
            serde_json::json!({"code": 0, "data": {"plugin_version": "2024.8.1"}}),
        )
        .await;

        assert!(!VersionGate::new("2024.7.8").check(&client(&server)).await);
    }

    #[tokio::test]
    async fn garbage_version_disables_sync() {
        let server = MockServer::start().await;
        mount_plugin_config(
            &server,
            serde_json::json!({"code": 0, "data": {"plugin_version": "next"}}),
        )
        .await;

        assert!(!VersionGate::new("2024.7.8").check(&client(&server)).await);
    }

    #[tokio::test]
    async fn missing_data_disables_sync() {
        let server = MockServer::start().await;
        mount_plugin_config(&server, serde_json::json!({"code": 0})).await;

        assert!(!VersionGate::new("2024.7.8").check(&client(&server)).await);
    }

    #[tokio::test]
    async fn unreachable_backend_disables_sync() {
        let web = WebClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(!VersionGate::new("2024.7.8").check(&web).await);
    }
}

// ============================================================================
// HttpReporter Tests
// ============================================================================

mod http_reporter {
    use super::*;

    fn reporter(server: &MockServer) -> HttpReporter {
        let credentials = Credentials::new("broker", 1883, server.uri(), "alice", "s3cret");
        HttpReporter::new(client(server), &credentials)
    }

    #[tokio::test]
    async fn change_is_posted_with_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/device/change_state"))
            .and(body_partial_json(serde_json::json!({
                "type": "state_changed",
                "openid": "alice",
                "secret": "s3cret",
                "data": {"entity_id": "light.kitchen", "state": "on"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        reporter(&server)
            .deliver_change(&StateSnapshot::new("light.kitchen", "on"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn batch_is_posted_to_sync_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/device/sync_entity_v1"))
            .and(body_partial_json(serde_json::json!({
                "type": "syncentity",
                "openid": "alice",
                "data": [{"entity_id": "light.a"}, {"entity_id": "switch.b"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        reporter(&server)
            .deliver_batch(&[
                StateSnapshot::new("light.a", "on"),
                StateSnapshot::new("switch.b", "off"),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_report_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": 403, "msg": "bad secret"})),
            )
            .mount(&server)
            .await;

        let err = reporter(&server)
            .deliver_change(&StateSnapshot::new("light.kitchen", "on"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Rejected { code: 403, .. }));
    }

    #[tokio::test]
    async fn drained_changes_are_posted_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/device/change_state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0})))
            .expect(4)
            .mount(&server)
            .await;

        let (queue, receiver) = StateSyncQueue::bounded(16);
        for id in ["light.a", "switch.b", "sensor.c", "light.d"] {
            queue.offer(StateSnapshot::new(id, "on")).unwrap();
        }
        drop(queue);

        DrainLoop::new(receiver, reporter(&server))
            .with_pause(Duration::from_millis(1))
            .run()
            .await;

        let bodies: Vec<serde_json::Value> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert_eq!(bodies.len(), 4);
        assert!(bodies.iter().all(|b| b["type"] == "state_changed"));
        let order: Vec<&str> = bodies
            .iter()
            .map(|b| b["data"]["entity_id"].as_str().unwrap())
            .collect();
        assert_eq!(order, ["light.a", "switch.b", "sensor.c", "light.d"]);
    }
}
