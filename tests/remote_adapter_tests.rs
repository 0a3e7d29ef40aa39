//! Tests for the remote lifecycle adapter against a scripted service.

mod common;

use common::ScriptedService;
use podbridge::rpc::{Call, RemoteErrorCode, Reply};
use podbridge::{
    Error, ErrorKind, EventOptions, EntityKind, KillOptions, LifecycleAdapter, PruneOptions,
    RemoteAdapter, RemoveOptions, Selector, StopOptions, WaitOptions,
};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;

/// Resolves `web` and `db` containers and the `p1` pod by name.
fn resolve(call: &Call) -> Option<Reply> {
    let key = match call.method.as_str() {
        "GetContainersByContext" => "containers",
        "GetPodsByContext" => "pods",
        _ => return None,
    };
    let known: &[(&str, &str)] = if key == "containers" {
        &[("web", "id-web"), ("db", "id-db")]
    } else {
        &[("p1", "id-p1")]
    };
    let params = &call.parameters;
    let ids: Vec<&str> = if params["all"] == true {
        known.iter().map(|(_, id)| *id).collect()
    } else if params["latest"] == true {
        known.last().map(|(_, id)| *id).into_iter().collect()
    } else {
        let token = params["args"][0].as_str().unwrap_or_default();
        match known.iter().find(|(name, id)| *name == token || *id == token) {
            Some((_, id)) => vec![*id],
            None => {
                return Some(Reply::failure(
                    RemoteErrorCode::NoSuchContainer,
                    format!("no container with name or ID {token} found"),
                ));
            }
        }
    };
    let mut payload = serde_json::Map::new();
    payload.insert(key.to_string(), json!(ids));
    Some(Reply::ok(Value::Object(payload)))
}

fn adapter(service: &ScriptedService) -> RemoteAdapter {
    RemoteAdapter::new(Box::new(service.clone())).with_stop_timeout(Duration::from_secs(7))
}

// =============================================================================
// Bulk Operations
// =============================================================================

#[tokio::test]
async fn test_stop_resolves_each_token() {
    let service = ScriptedService::new(|call| {
        if let Some(reply) = resolve(call) {
            return vec![reply];
        }
        match call.parameters["name"].as_str() {
            Some("id-db") => vec![Reply::failure(
                RemoteErrorCode::ContainerNotRunning,
                "container already stopped",
            )],
            _ => vec![Reply::ok(json!({"container": call.parameters["name"]}))],
        }
    });
    let adapter = adapter(&service);
    let selector = Selector::names(["web", "db", "ghost", "id-web"]);

    let batch = adapter
        .stop(EntityKind::Container, &selector, StopOptions::default())
        .await
        .unwrap();
    assert!(batch.is_succeeded("id-web"));
    assert!(batch.is_succeeded("id-db"));
    assert_eq!(
        batch.failure("ghost").unwrap()[0].kind(),
        ErrorKind::NoSuchEntity
    );
    assert_eq!(batch.len(), 3);

    let stops: Vec<Call> = service
        .calls()
        .into_iter()
        .filter(|c| c.method == "StopContainer")
        .collect();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[0].parameters["timeout"], 7);
    assert_eq!(service.connects(), 1);
}

#[tokio::test]
async fn test_strict_stop_reports_not_running() {
    let service = ScriptedService::new(|call| {
        resolve(call).map_or_else(
            || {
                vec![Reply::failure(
                    RemoteErrorCode::ContainerNotRunning,
                    "not running",
                )]
            },
            |reply| vec![reply],
        )
    });
    let adapter = adapter(&service);

    let batch = adapter
        .stop(
            EntityKind::Container,
            &Selector::names(["db"]),
            StopOptions::default().strict(),
        )
        .await
        .unwrap();
    let errors = batch.failure("id-db").unwrap();
    assert_eq!(errors[0].kind(), ErrorKind::NotRunning);
    assert!(matches!(errors[0], Error::Remote { .. }));
}

#[tokio::test]
async fn test_latest_with_nothing_present_fails_call() {
    let service = ScriptedService::new(|_| vec![Reply::ok(json!({"containers": []}))]);
    let adapter = adapter(&service);

    let err = adapter
        .pause(EntityKind::Container, &Selector::Latest)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoLatest);
}

#[tokio::test]
async fn test_all_with_nothing_present_issues_no_entity_calls() {
    let service = ScriptedService::new(|_| vec![Reply::ok(json!({"pods": []}))]);
    let adapter = adapter(&service);

    let batch = adapter
        .kill(EntityKind::Pod, &Selector::All, KillOptions::default())
        .await
        .unwrap();
    assert!(batch.is_empty());
    assert_eq!(service.methods(), vec!["GetPodsByContext".to_string()]);
}

#[tokio::test]
async fn test_kill_sends_signal_number() {
    let service = ScriptedService::new(|call| {
        resolve(call).map_or_else(|| vec![Reply::ok(json!({}))], |reply| vec![reply])
    });
    let adapter = adapter(&service);

    adapter
        .kill(
            EntityKind::Container,
            &Selector::Latest,
            KillOptions::default().with_signal(podbridge::Signal::Term),
        )
        .await
        .unwrap();
    let kill = service
        .calls()
        .into_iter()
        .find(|c| c.method == "KillContainer")
        .unwrap();
    assert_eq!(kill.parameters["name"], "id-db");
    assert_eq!(kill.parameters["signal"], 15);
}

#[tokio::test]
async fn test_pod_member_errors_are_merged_under_pod() {
    let service = ScriptedService::new(|call| {
        if let Some(reply) = resolve(call) {
            return vec![reply];
        }
        vec![Reply::ok(json!({
            "pod": "id-p1",
            "errors": [
                {"id": "id-c1", "error": {"code": "runtime_failure", "message": "stuck"}},
            ],
        }))]
    });
    let adapter = adapter(&service);

    let batch = adapter
        .stop(EntityKind::Pod, &Selector::names(["p1"]), StopOptions::default())
        .await
        .unwrap();
    assert!(!batch.is_succeeded("id-p1"));
    let errors = batch.failure("id-p1").unwrap();
    assert_eq!(errors[0].kind(), ErrorKind::RuntimeFailure);
    assert!(matches!(&errors[0], Error::MemberFailed { container, .. } if container == "id-c1"));
}

#[tokio::test]
async fn test_tolerance_applies_to_pod_members() {
    let service = ScriptedService::new(|call| {
        if let Some(reply) = resolve(call) {
            return vec![reply];
        }
        vec![Reply::ok(json!({
            "pod": "id-p1",
            "errors": [
                {"id": "id-c1", "error": {"code": "container_not_running", "message": "stopped"}},
            ],
        }))]
    });
    let adapter = adapter(&service);
    let selector = Selector::names(["p1"]);

    let batch = adapter
        .stop(EntityKind::Pod, &selector, StopOptions::default())
        .await
        .unwrap();
    assert!(batch.is_succeeded("id-p1"));

    let batch = adapter
        .stop(EntityKind::Pod, &selector, StopOptions::default().strict())
        .await
        .unwrap();
    let errors = batch.failure("id-p1").unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::NotRunning);
    assert!(matches!(&errors[0], Error::MemberFailed { container, .. } if container == "id-c1"));
}

#[tokio::test]
async fn test_undecodable_pod_reply_is_a_failure() {
    let service = ScriptedService::new(|call| {
        if let Some(reply) = resolve(call) {
            return vec![reply];
        }
        vec![Reply::ok(json!({"errors": "member id-c1 failed"}))]
    });
    let adapter = adapter(&service);

    let batch = adapter
        .start(EntityKind::Pod, &Selector::names(["p1"]))
        .await
        .unwrap();
    assert!(!batch.is_succeeded("id-p1"));
    assert_eq!(
        batch.failure("id-p1").unwrap()[0].kind(),
        ErrorKind::Protocol
    );
}

#[tokio::test]
async fn test_sub_second_timeouts_round_up() {
    let service = ScriptedService::new(|call| {
        resolve(call).map_or_else(|| vec![Reply::ok(json!({}))], |reply| vec![reply])
    });
    let adapter = adapter(&service);
    let web = Selector::names(["web"]);

    adapter
        .stop(
            EntityKind::Container,
            &web,
            StopOptions::default().with_timeout(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    adapter
        .restart(EntityKind::Container, &web, Some(Duration::from_millis(1500)))
        .await
        .unwrap();

    let timeouts: Vec<Value> = service
        .calls()
        .into_iter()
        .filter(|c| c.method == "StopContainer" || c.method == "RestartContainer")
        .map(|c| c.parameters["timeout"].clone())
        .collect();
    assert_eq!(timeouts, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_ignore_drops_missing_names() {
    let service = ScriptedService::new(|call| {
        resolve(call).map_or_else(|| vec![Reply::ok(json!({}))], |reply| vec![reply])
    });
    let adapter = adapter(&service);
    let selector = Selector::names(["web", "ghost"]);

    let batch = adapter
        .remove(
            EntityKind::Container,
            &selector,
            RemoveOptions::default().ignore(),
        )
        .await
        .unwrap();
    assert_eq!(batch.succeeded(), ["id-web".to_string()]);
    assert!(batch.failed().is_empty());

    let batch = adapter
        .stop(EntityKind::Container, &selector, StopOptions::default())
        .await
        .unwrap();
    assert_eq!(
        batch.failure("ghost").unwrap()[0].kind(),
        ErrorKind::NoSuchEntity
    );
}

#[tokio::test]
async fn test_remove_pod_error_reply_recorded_per_pod() {
    let service = ScriptedService::new(|call| {
        resolve(call).map_or_else(
            || {
                vec![Reply::failure(
                    RemoteErrorCode::PodNotStopped,
                    "pod has running containers",
                )]
            },
            |reply| vec![reply],
        )
    });
    let adapter = adapter(&service);

    let batch = adapter
        .remove(EntityKind::Pod, &Selector::All, RemoveOptions::default())
        .await
        .unwrap();
    assert_eq!(
        batch.failure("id-p1").unwrap()[0].kind(),
        ErrorKind::NotStopped
    );
    let remove = service
        .calls()
        .into_iter()
        .find(|c| c.method == "RemovePod")
        .unwrap();
    assert_eq!(remove.parameters["force"], false);
}

#[tokio::test]
async fn test_prune_is_one_call() {
    let service = ScriptedService::new(|call| {
        assert_eq!(call.method, "PruneContainers");
        assert_eq!(call.parameters["force"], true);
        vec![Reply::ok(json!({
            "pruned": ["a", "b"],
            "failed": {"c": {"code": "container_not_stopped", "message": "busy"}},
        }))]
    });
    let adapter = adapter(&service);

    let batch = adapter
        .prune(
            EntityKind::Container,
            PruneOptions {
                force: true,
                workers: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(batch.succeeded(), ["a".to_string(), "b".to_string()]);
    assert_eq!(batch.failure("c").unwrap()[0].kind(), ErrorKind::NotStopped);
    assert_eq!(service.calls().len(), 1);
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_exists_maps_missing_to_false() {
    let service = ScriptedService::new(|call| resolve(call).into_iter().collect());
    let adapter = adapter(&service);

    assert!(adapter.exists(EntityKind::Container, "web").await.unwrap());
    assert!(adapter.exists(EntityKind::Pod, "p1").await.unwrap());
    assert!(!adapter.exists(EntityKind::Container, "ghost").await.unwrap());
}

#[tokio::test]
async fn test_wait_reports_exit_code() {
    let service = ScriptedService::new(|call| {
        if let Some(reply) = resolve(call) {
            return vec![reply];
        }
        vec![Reply::ok(json!({
            "containers": [{
                "id": "id-web",
                "name": "web",
                "state": "exited",
                "created_at": "2024-05-01T10:00:00Z",
                "exit_code": 3,
            }],
        }))]
    });
    let adapter = adapter(&service);

    let reports = adapter
        .wait(&Selector::names(["web", "ghost"]), WaitOptions::default())
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].id, "id-web");
    assert_eq!(reports[0].exit_code, Some(3));
    assert!(reports[0].error.is_none());
    assert_eq!(reports[1].id, "ghost");
    assert_eq!(
        reports[1].error.as_ref().map(Error::kind),
        Some(ErrorKind::NoSuchEntity)
    );
}

// =============================================================================
// Channel Recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_transport_failure_fails_rest_of_batch() {
    let service = ScriptedService::new(|call| match call.method.as_str() {
        "GetContainersByContext" => vec![Reply::ok(json!({"containers": ["a", "b", "c"]}))],
        // The service never answers the stop of "b".
        "StopContainer" if call.parameters["name"] == "b" => Vec::new(),
        "ListContainers" => vec![Reply::ok(json!({"containers": []}))],
        _ => vec![Reply::ok(json!({}))],
    })
    .with_call_timeout(Duration::from_millis(200));
    let adapter = adapter(&service);

    let batch = adapter
        .stop(EntityKind::Container, &Selector::All, StopOptions::default())
        .await
        .unwrap();
    assert_eq!(batch.succeeded(), ["a".to_string()]);
    assert_eq!(batch.failure("b").unwrap()[0].kind(), ErrorKind::Timeout);
    assert!(matches!(
        batch.failure("c").unwrap()[0],
        Error::ChannelPoisoned
    ));
    let stops = service
        .methods()
        .into_iter()
        .filter(|m| m == "StopContainer")
        .count();
    assert_eq!(stops, 2);

    assert!(adapter.list_containers().await.unwrap().is_empty());
    assert_eq!(service.connects(), 2);
}

#[tokio::test]
async fn test_poisoned_channel_is_reopened() {
    let service = ScriptedService::new(|call| match call.method.as_str() {
        // A continued reply to a single call is a protocol violation.
        "ListPods" => vec![Reply::chunk(json!({}))],
        _ => vec![Reply::ok(json!({"containers": []}))],
    });
    let adapter = adapter(&service);

    let err = adapter.list_pods().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(adapter.list_containers().await.unwrap().is_empty());
    assert_eq!(service.connects(), 2);
}

#[tokio::test]
async fn test_list_containers_decodes_snapshots() {
    let service = ScriptedService::new(|_| {
        vec![Reply::ok(json!({
            "containers": [{
                "id": "id-web",
                "name": "web",
                "image": "nginx",
                "state": "paused",
                "pod": "id-p1",
                "created_at": "2024-05-01T10:00:00Z",
            }],
        }))]
    });
    let adapter = adapter(&service);

    let containers = adapter.list_containers().await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].status(), podbridge::DisplayStatus::Paused);
    assert_eq!(containers[0].pod.as_deref(), Some("id-p1"));
}

// =============================================================================
// Remote-Only Operations
// =============================================================================

#[tokio::test]
async fn test_export_pulls_tarball_and_reconnects() {
    let service = ScriptedService::new(|call| match call.method.as_str() {
        "ExportContainer" => vec![Reply::ok(json!({"tarfile": "/var/tmp/web.tar"}))],
        "ReceiveFile" => {
            assert_eq!(call.parameters["path"], "/var/tmp/web.tar");
            assert_eq!(call.parameters["delete"], true);
            vec![Reply::ok(json!({"len": 7}))]
        }
        _ => vec![Reply::ok(json!({"pods": []}))],
    })
    .with_raw(b"tarball");
    let adapter = adapter(&service);
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("web.tar");

    let written = adapter.export_container("web", &dest).await.unwrap();
    assert_eq!(written, 7);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"tarball");

    assert!(adapter.list_pods().await.unwrap().is_empty());
    assert_eq!(service.connects(), 2);
}

#[tokio::test]
async fn test_events_consumer_can_stop_early() {
    let record = |status: &str| -> Value {
        json!({
            "id": "id-web",
            "name": "web",
            "status": status,
            "time": "2024-05-01T10:00:00.000000001Z",
            "type": "container",
        })
    };
    let chunks = vec![record("create"), record("start"), record("stop")];
    let service = ScriptedService::new(move |call| match call.method.as_str() {
        "GetEvents" => chunks.iter().cloned().map(Reply::chunk).collect(),
        _ => vec![Reply::ok(json!({"containers": []}))],
    });
    let adapter = adapter(&service);
    let options = EventOptions {
        stream: true,
        ..EventOptions::default()
    };

    let mut seen = Vec::new();
    let delivered = adapter
        .events(&options, |event| {
            seen.push(event.status);
            seen.len() < 2
        })
        .await
        .unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(seen.len(), 2);

    // The unfinished stream poisoned the channel; the next call reconnects.
    adapter.list_containers().await.unwrap();
    assert_eq!(service.connects(), 2);
}
