// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::panic)]

use super::*;
use crate::clock::ManualClock;
use crate::device::{Device, DeviceCapabilities, DeviceType, Platform};
use yare::parameterized;

/// Push double that records every message it is asked to deliver.
#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<PushMessage>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, message: PushMessage) -> Result<PushReceipt> {
        self.sent.lock().unwrap().push(message);
        Ok(PushReceipt { ok: true, count: Some(1) })
    }
}

/// Push double whose delivery always fails.
struct FailingPush;

#[async_trait]
impl PushSender for FailingPush {
    async fn send(&self, _message: PushMessage) -> Result<PushReceipt> {
        Err(Error::Rpc("fcm unreachable".to_string()))
    }
}

struct Fixture {
    coordinator: HandoffCoordinator,
    db: Arc<Mutex<Database>>,
    clock: Arc<ManualClock>,
    push: Arc<RecordingPush>,
}

fn device(id: &str, user_id: &str, push: bool, token: Option<&str>) -> Device {
    let mut d = Device::new(
        id,
        user_id,
        DeviceType::Desktop,
        Platform::Mac,
        DeviceCapabilities { push, deeplink: true, clipboard: true, offline: true },
        "1.0.0",
    );
    d.fcm_token = token.map(String::from);
    d
}

fn fixture() -> Fixture {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    {
        let db = db.lock().unwrap();
        db.register_device(&device("dev-a", "user-1", true, Some("tok-a"))).unwrap();
        db.register_device(&device("dev-b", "user-1", true, Some("tok-b"))).unwrap();
        db.register_device(&device("dev-mute", "user-1", false, Some("tok-m"))).unwrap();
        db.register_device(&device("dev-untok", "user-1", true, None)).unwrap();
        db.register_device(&device("dev-other", "user-2", true, Some("tok-o"))).unwrap();
    }
    let clock = Arc::new(ManualClock::new(1_000_000));
    let push = Arc::new(RecordingPush::default());
    let coordinator = HandoffCoordinator::new(db.clone(), push.clone(), clock.clone());
    Fixture { coordinator, db, clock, push }
}

fn project_payload() -> HandoffPayload {
    HandoffPayload::OpenProject { project_id: "proj-7".to_string(), metadata: None }
}

#[parameterized(
    project = {
        HandoffPayload::OpenProject { project_id: "p1".into(), metadata: None },
        "f0://open?project=p1",
    },
    session = {
        HandoffPayload::OpenSession { job_id: "j9".into(), metadata: None },
        "f0://session/j9",
    },
    file = {
        HandoffPayload::OpenFile { file_id: "f3".into(), metadata: None },
        "f0://file/f3",
    },
    unknown = { HandoffPayload::Unknown, "f0://" },
)]
fn deep_link_is_total(payload: HandoffPayload, expected: &str) {
    assert_eq!(deep_link(&payload), expected);
}

#[test]
fn unknown_payload_type_decodes_to_unknown_variant() {
    let payload: HandoffPayload =
        serde_json::from_str(r#"{"type": "open_whiteboard", "board_id": "w1"}"#).unwrap();
    assert_eq!(payload, HandoffPayload::Unknown);
    assert_eq!(deep_link(&payload), "f0://");
}

#[test]
fn payload_serializes_with_type_tag() {
    let json = serde_json::to_string(&project_payload()).unwrap();
    assert!(json.contains(r#""type":"open_project""#));
    assert!(json.contains(r#""project_id":"proj-7""#));
}

#[tokio::test]
async fn create_persists_handshake_with_ttl() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();
    assert_eq!(ticket.deep_link, "f0://open?project=proj-7");

    let handshake = f.db.lock().unwrap().get_handshake(&ticket.id).unwrap();
    assert_eq!(handshake.from_device, "dev-a");
    assert_eq!(handshake.to_device, "dev-b");
    assert_eq!(handshake.user_id, "user-1");
    assert_eq!(handshake.created_at_ms, 1_000_000);
    assert_eq!(handshake.expires_at_ms, 1_000_000 + HANDSHAKE_TTL_MS);
    assert!(!handshake.consumed);
}

#[tokio::test]
async fn create_notifies_push_capable_target() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    let sent = f.push.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].token, "tok-b");
    assert_eq!(sent[0].title, "Continue your project");
    assert_eq!(sent[0].click_action, ticket.deep_link);
    assert_eq!(sent[0].data["handoff_id"], ticket.id.as_str());
    assert_eq!(sent[0].data["type"], "open_project");
    assert_eq!(sent[0].data["deep_link"], ticket.deep_link.as_str());
}

#[tokio::test]
async fn create_skips_push_without_capability() {
    let f = fixture();
    f.coordinator.create("dev-a", "dev-mute", project_payload()).await.unwrap();
    assert!(f.push.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn create_skips_push_without_token() {
    let f = fixture();
    f.coordinator.create("dev-a", "dev-untok", project_payload()).await.unwrap();
    assert!(f.push.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn push_failure_does_not_fail_create() {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    {
        let db = db.lock().unwrap();
        db.register_device(&device("dev-a", "user-1", true, Some("tok-a"))).unwrap();
        db.register_device(&device("dev-b", "user-1", true, Some("tok-b"))).unwrap();
    }
    let clock = Arc::new(ManualClock::new(1_000));
    let coordinator = HandoffCoordinator::new(db.clone(), Arc::new(FailingPush), clock);

    let ticket = coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();
    assert!(db.lock().unwrap().get_handshake(&ticket.id).is_ok());
}

#[tokio::test]
async fn create_rejects_unknown_target() {
    let f = fixture();
    let result = f.coordinator.create("dev-a", "dev-ghost", project_payload()).await;
    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
}

#[tokio::test]
async fn create_rejects_target_of_another_user() {
    let f = fixture();
    let result = f.coordinator.create("dev-a", "dev-other", project_payload()).await;
    // Reported as not-found, without revealing the foreign device exists.
    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
}

#[tokio::test]
async fn create_rejects_same_device() {
    let f = fixture();
    let result = f.coordinator.create("dev-a", "dev-a", project_payload()).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn create_rejects_empty_ids() {
    let f = fixture();
    let result = f.coordinator.create("", "dev-b", project_payload()).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn consume_returns_payload_once() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    let payload = f.coordinator.consume(&ticket.id, "dev-b", "user-1").unwrap();
    assert_eq!(payload, project_payload());

    let again = f.coordinator.consume(&ticket.id, "dev-b", "user-1");
    assert!(matches!(again, Err(Error::HandshakeConsumed(_))));
}

#[tokio::test]
async fn consume_records_consumption_time() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    f.clock.advance(60_000);
    f.coordinator.consume(&ticket.id, "dev-b", "user-1").unwrap();

    let handshake = f.db.lock().unwrap().get_handshake(&ticket.id).unwrap();
    assert!(handshake.consumed);
    assert_eq!(handshake.consumed_at_ms, Some(1_060_000));
}

#[test]
fn consume_missing_handshake_fails() {
    let f = fixture();
    let result = f.coordinator.consume("nope", "dev-b", "user-1");
    assert!(matches!(result, Err(Error::HandshakeNotFound(_))));
}

#[tokio::test]
async fn consume_rejects_wrong_user() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    let result = f.coordinator.consume(&ticket.id, "dev-b", "user-2");
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

#[tokio::test]
async fn consume_rejects_wrong_device() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    // Even the source device may not consume its own handoff.
    let result = f.coordinator.consume(&ticket.id, "dev-a", "user-1");
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
}

#[tokio::test]
async fn consume_after_expiry_fails_even_if_never_consumed() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    f.clock.advance(HANDSHAKE_TTL_MS + 1);
    let result = f.coordinator.consume(&ticket.id, "dev-b", "user-1");
    assert!(matches!(result, Err(Error::HandshakeExpired(_))));
}

#[tokio::test]
async fn consume_exactly_at_expiry_still_succeeds() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    // Unusable only once now > expires_at.
    f.clock.advance(HANDSHAKE_TTL_MS);
    assert!(f.coordinator.consume(&ticket.id, "dev-b", "user-1").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_consumers_race_to_exactly_one_winner() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();
    let coordinator = Arc::new(f.coordinator);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let coordinator = coordinator.clone();
        let id = ticket.id.clone();
        handles.push(tokio::spawn(async move { coordinator.consume(&id, "dev-b", "user-1") }));
    }

    let mut wins = 0;
    let mut already_consumed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(payload) => {
                assert_eq!(payload, project_payload());
                wins += 1;
            }
            Err(Error::HandshakeConsumed(_)) => already_consumed += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(already_consumed, 1);
}

#[tokio::test]
async fn cleanup_sweeps_only_expired_handshakes() {
    let f = fixture();
    let expired = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    f.clock.advance(HANDSHAKE_TTL_MS / 2);
    let live = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();

    f.clock.advance(HANDSHAKE_TTL_MS / 2 + 1);
    assert_eq!(f.coordinator.cleanup().unwrap(), 1);

    let db = f.db.lock().unwrap();
    assert!(matches!(db.get_handshake(&expired.id), Err(Error::HandshakeNotFound(_))));
    assert!(db.get_handshake(&live.id).is_ok());
}

#[tokio::test]
async fn cleanup_is_capped_per_run() {
    let f = fixture();
    {
        let db = f.db.lock().unwrap();
        for i in 0..(CLEANUP_BATCH + 25) {
            let handshake = Handshake {
                id: format!("hs-{i}"),
                user_id: "user-1".to_string(),
                from_device: "dev-a".to_string(),
                to_device: "dev-b".to_string(),
                payload: HandoffPayload::Unknown,
                created_at_ms: 0,
                expires_at_ms: 1,
                consumed: false,
                consumed_at_ms: None,
            };
            db.insert_handshake(&handshake).unwrap();
        }
    }

    assert_eq!(f.coordinator.cleanup().unwrap(), CLEANUP_BATCH);
    assert_eq!(f.coordinator.cleanup().unwrap(), 25);
    assert_eq!(f.coordinator.cleanup().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn cleanup_task_sweeps_on_interval() {
    let f = fixture();
    let ticket = f.coordinator.create("dev-a", "dev-b", project_payload()).await.unwrap();
    f.clock.advance(HANDSHAKE_TTL_MS + 1);

    let coordinator = Arc::new(f.coordinator);
    let task = spawn_cleanup_task(coordinator, Duration::from_secs(60));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let db = f.db.lock().unwrap();
    assert!(matches!(db.get_handshake(&ticket.id), Err(Error::HandshakeNotFound(_))));
    drop(db);
    task.abort();
}

#[parameterized(
    project = { HandoffPayload::OpenProject { project_id: "p".into(), metadata: None }, "open_project" },
    session = { HandoffPayload::OpenSession { job_id: "j".into(), metadata: None }, "open_session" },
    file = { HandoffPayload::OpenFile { file_id: "f".into(), metadata: None }, "open_file" },
    unknown = { HandoffPayload::Unknown, "unknown" },
)]
fn payload_kind_tags(payload: HandoffPayload, expected: &str) {
    assert_eq!(payload.kind(), expected);
}

#[test]
fn push_copy_is_total_over_payload_types() {
    for payload in [
        HandoffPayload::OpenProject { project_id: "p".into(), metadata: None },
        HandoffPayload::OpenSession { job_id: "j".into(), metadata: None },
        HandoffPayload::OpenFile { file_id: "f".into(), metadata: None },
        HandoffPayload::Unknown,
    ] {
        assert!(!push_title(&payload).is_empty());
        assert!(!push_body(&payload).is_empty());
    }
}
