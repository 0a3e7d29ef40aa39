//! Tests for status derivation and the tabular pod and container views.

use chrono::{Duration, Utc};
use podbridge::status::view::{
    CONTAINER_FIELDS, MAX_MEMBER_INFO, POD_FIELDS, SortKey, ViewOptions, container_rows, header,
    pod_rows,
};
use podbridge::status::pod_status;
use podbridge::{ContainerSnapshot, DisplayStatus, LifecycleState, PodSnapshot};

const LONG_ID: &str = "4f1c2a9d8e7b6a5f4e3d2c1b0a9f8e7d6c5b4a3f2e1d0c9b8a7f6e5d4c3b2a1f";

fn member(n: usize, state: LifecycleState) -> ContainerSnapshot {
    ContainerSnapshot {
        id: format!("{n:02}{}", &LONG_ID[2..]),
        name: format!("c{n}"),
        image: "busybox".to_string(),
        state,
        pod: Some(LONG_ID.to_string()),
        created_at: Utc::now() - Duration::minutes(5),
        exit_code: None,
    }
}

fn pod(name: &str, members: Vec<ContainerSnapshot>, age: Duration) -> PodSnapshot {
    PodSnapshot {
        id: LONG_ID.to_string(),
        name: name.to_string(),
        created_at: Utc::now() - age,
        members,
    }
}

// =============================================================================
// Derivation
// =============================================================================

#[test]
fn test_running_member_wins_over_paused() {
    use LifecycleState::*;
    assert_eq!(pod_status([Paused, Running, Exited]), DisplayStatus::Running);
    assert_eq!(pod_status([Paused, Created]), DisplayStatus::Paused);
    assert_eq!(pod_status([Stopped]), DisplayStatus::Exited);
    assert_eq!(pod_status([Exited, Configured]), DisplayStatus::Created);
    assert_eq!(pod_status(Vec::new()), DisplayStatus::Created);
}

#[test]
fn test_error_state_member_keeps_pod_created() {
    use LifecycleState::*;
    assert_eq!(pod_status([Exited, ErrorState]), DisplayStatus::Created);
}

// =============================================================================
// Pod View
// =============================================================================

#[test]
fn test_pod_row_truncates_ids_and_members() {
    let members = (0..12).map(|n| member(n, LifecycleState::Running)).collect();
    let opts = ViewOptions {
        ctr_names: true,
        ctr_status: true,
        ..ViewOptions::default()
    };
    let rows = pod_rows(vec![pod("big", members, Duration::hours(3))], &opts, Utc::now());

    let row = &rows[0];
    assert_eq!(row.id, &LONG_ID[..12]);
    assert_eq!(row.number_of_containers, 12);
    assert_eq!(row.status, DisplayStatus::Running);
    assert_eq!(row.created, "3 hours ago");
    assert_eq!(row.container_info.matches('[').count(), MAX_MEMBER_INFO);
    assert!(row.container_info.starts_with("[c0,RUNNING] [c1,RUNNING] "));
    assert!(row.container_info.ends_with("..."));
}

#[test]
fn test_pod_row_no_trunc_shows_everything() {
    let members = (0..12).map(|n| member(n, LifecycleState::Exited)).collect();
    let opts = ViewOptions {
        ctr_ids: true,
        ..ViewOptions::default()
    }
    .with_no_trunc(true);
    let rows = pod_rows(vec![pod("big", members, Duration::hours(1))], &opts, Utc::now());

    let row = &rows[0];
    assert_eq!(row.id, LONG_ID);
    assert_eq!(row.container_info.matches('[').count(), 12);
    assert!(!row.container_info.contains("..."));
    assert!(row.container_info.contains(&format!("[03{}]", &LONG_ID[2..])));
}

#[test]
fn test_pod_row_without_member_options_has_no_info() {
    let rows = pod_rows(
        vec![pod("p", vec![member(0, LifecycleState::Paused)], Duration::days(3))],
        &ViewOptions::default(),
        Utc::now(),
    );
    assert_eq!(rows[0].container_info, "");
    assert_eq!(rows[0].status, DisplayStatus::Paused);
    assert_eq!(rows[0].created, "3 days ago");
    assert_eq!(rows[0].field("NumberOfContainers").as_deref(), Some("1"));
}

#[test]
fn test_pod_sorting() {
    let pods = vec![
        pod("b", vec![member(0, LifecycleState::Running); 3], Duration::hours(5)),
        pod("a", vec![], Duration::hours(1)),
        pod("c", vec![member(1, LifecycleState::Exited)], Duration::hours(9)),
    ];
    let names = |key: SortKey| -> Vec<String> {
        pod_rows(pods.clone(), &ViewOptions::default().with_sort(key), Utc::now())
            .into_iter()
            .map(|r| r.name)
            .collect()
    };
    assert_eq!(names(SortKey::Created), ["a", "b", "c"]);
    assert_eq!(names(SortKey::Name), ["a", "b", "c"]);
    assert_eq!(names(SortKey::Number), ["a", "c", "b"]);
    assert_eq!(names(SortKey::Status), ["a", "c", "b"]);
}

#[test]
fn test_header_tables() {
    assert_eq!(header(POD_FIELDS, "ID"), Some("POD ID"));
    assert_eq!(header(POD_FIELDS, "ContainerInfo"), Some("CONTAINER INFO"));
    assert_eq!(header(CONTAINER_FIELDS, "Names"), Some("NAMES"));
    assert_eq!(header(CONTAINER_FIELDS, "NumberOfContainers"), None);
}

// =============================================================================
// Container View
// =============================================================================

#[test]
fn test_container_rows_shorten_pod_id() {
    let rows = container_rows(
        vec![member(7, LifecycleState::Stopped)],
        &ViewOptions::default(),
        Utc::now(),
    );
    assert_eq!(rows[0].pod, &LONG_ID[..12]);
    assert_eq!(rows[0].status, DisplayStatus::Exited);
    assert_eq!(rows[0].field("Names").as_deref(), Some("c7"));
    assert_eq!(rows[0].created, "5 minutes ago");
}
