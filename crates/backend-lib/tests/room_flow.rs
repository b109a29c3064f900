//! Room flow tests: joins, relays, side channel and teardown driven
//! through the registry and room-actor API, with a capturing record store
//! standing in for the external appointment system.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use teleconsult_backend_lib::config::RoomConfig;
use teleconsult_backend_lib::error::AppError;
use teleconsult_backend_lib::records::{AppointmentRecord, RecordStore};
use teleconsult_backend_lib::registry::RoomRegistry;
use teleconsult_backend_lib::room_actor::{RelayKind, RoomHandle};
use teleconsult_backend_lib::session::SessionHandle;
use teleconsult_common::{EndReason, Role, ServerEvent, UserProfile};

#[derive(Default)]
struct CapturingStore {
    records: Mutex<Vec<AppointmentRecord>>,
}

#[async_trait]
impl RecordStore for CapturingStore {
    async fn store_summary(&self, record: &AppointmentRecord) -> Result<(), AppError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

fn quick_config() -> RoomConfig {
    RoomConfig {
        heartbeat: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(200),
        forming_timeout: Duration::from_millis(300),
        record_handoff: Duration::from_secs(1),
        session_queue: 64,
        candidate_buffer: 8,
    }
}

fn setup() -> (Arc<CapturingStore>, RoomRegistry) {
    let store = Arc::new(CapturingStore::default());
    let registry = RoomRegistry::new(quick_config(), store.clone());
    (store, registry)
}

fn doctor() -> UserProfile {
    UserProfile {
        id: "u-doc".to_string(),
        name: "Dr. Okafor".to_string(),
        role: Role::Doctor,
        avatar: None,
    }
}

fn patient() -> UserProfile {
    UserProfile {
        id: "u-pat".to_string(),
        name: "Sam".to_string(),
        role: Role::Patient,
        avatar: Some("https://cdn.example/av/sam.png".to_string()),
    }
}

/// Drain everything currently queued on a session.
async fn drain(session: &SessionHandle) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while session.queued() > 0 {
        match session.recv().await {
            Some(event) => events.push(event),
            None => break,
        }
    }
    events
}

fn kinds(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::kind).collect()
}

async fn join(room: &RoomHandle, profile: UserProfile, session: &SessionHandle) {
    room.join(profile, None, session.clone()).await.unwrap();
}

#[tokio::test]
async fn test_scenario_first_and_second_join() {
    let (_store, registry) = setup();
    let (room, created) = registry.get_or_create("231-556-789").unwrap();
    assert!(created);

    // P1 joins: created event plus a snapshot containing exactly P1
    let p1 = SessionHandle::new(64);
    room.join(doctor(), Some(json!({"appointmentId": "apt-42"})), p1.clone())
        .await
        .unwrap();
    let events = drain(&p1).await;
    assert_eq!(kinds(&events), vec!["room-created", "room-participants"]);
    match &events[1] {
        ServerEvent::RoomParticipants {
            participants,
            metadata,
            ..
        } => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].user_id, "u-doc");
            assert_eq!(metadata["appointmentId"], "apt-42");
        },
        other => panic!("Expected RoomParticipants, got {other:?}"),
    }

    // P2 joins: P1 hears user-connected, P2's snapshot holds both in order
    let p2 = SessionHandle::new(64);
    join(&room, patient(), &p2).await;

    let p1_events = drain(&p1).await;
    assert_eq!(kinds(&p1_events), vec!["user-connected"]);
    match &p1_events[0] {
        ServerEvent::UserConnected { participant } => {
            assert_eq!(participant.user_id, "u-pat");
            assert_eq!(participant.role, Role::Patient);
        },
        other => panic!("Expected UserConnected, got {other:?}"),
    }

    let p2_events = drain(&p2).await;
    assert_eq!(kinds(&p2_events), vec!["room-participants"]);
    match &p2_events[0] {
        ServerEvent::RoomParticipants { participants, .. } => {
            let ids: Vec<&str> = participants.iter().map(|p| p.user_id.as_str()).collect();
            assert_eq!(ids, vec!["u-doc", "u-pat"]);
        },
        other => panic!("Expected RoomParticipants, got {other:?}"),
    }
}

#[tokio::test]
async fn test_scenario_offer_to_absent_target() {
    let (_store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;

    let err = room
        .relay(
            "u-doc".to_string(),
            RelayKind::Offer,
            "u-pat".to_string(),
            json!({"sdp": "v=0"}),
        )
        .await
        .unwrap_err();
    match err {
        AppError::TargetUnreachable { target } => assert_eq!(target, "u-pat"),
        other => panic!("Expected TargetUnreachable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_scenario_chat_order_and_sequence() {
    let (_store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    let p2 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    join(&room, patient(), &p2).await;
    drain(&p2).await;

    let first = room.chat("u-doc".to_string(), "hello".to_string()).await.unwrap();
    let second = room.chat("u-doc".to_string(), "world".to_string()).await.unwrap();
    assert_eq!(second, first + 1);

    let observed: Vec<(u64, String)> = drain(&p2)
        .await
        .into_iter()
        .map(|event| match event {
            ServerEvent::ChatMessage { seq, body, .. } => (seq, body),
            other => panic!("Expected ChatMessage, got {other:?}"),
        })
        .collect();
    assert_eq!(
        observed,
        vec![(first, "hello".to_string()), (second, "world".to_string())]
    );
}

#[tokio::test]
async fn test_scenario_record_is_doctor_only() {
    let (_store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    let p2 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    join(&room, patient(), &p2).await;
    drain(&p1).await;
    drain(&p2).await;

    room.update_record("u-doc".to_string(), "BP 120/80".to_string())
        .await
        .unwrap();

    let err = room
        .update_record("u-pat".to_string(), "self-diagnosis".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "UNAUTHORIZED_ACTION");

    // Both sides saw exactly one update, authored by the doctor
    for session in [&p1, &p2] {
        let events = drain(session).await;
        assert_eq!(kinds(&events), vec!["medical-record-updated"]);
        match &events[0] {
            ServerEvent::MedicalRecordUpdated { record } => {
                assert_eq!(record.author.user_id, "u-doc");
                assert_eq!(record.notes, "BP 120/80");
            },
            other => panic!("Expected MedicalRecordUpdated, got {other:?}"),
        }
    }

    // A late joiner gets the surviving note in its snapshot
    let p3 = SessionHandle::new(64);
    join(
        &room,
        UserProfile {
            id: "u-nurse".to_string(),
            name: "Ada".to_string(),
            role: Role::Doctor,
            avatar: None,
        },
        &p3,
    )
    .await;
    let events = drain(&p3).await;
    match &events[0] {
        ServerEvent::RoomParticipants { medical_record, .. } => {
            assert_eq!(medical_record.as_ref().unwrap().notes, "BP 120/80");
        },
        other => panic!("Expected RoomParticipants, got {other:?}"),
    }
}

#[tokio::test]
async fn test_early_candidates_flush_after_offer() {
    let (_store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    let p2 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    join(&room, patient(), &p2).await;
    drain(&p2).await;

    let candidate = |n: u32| json!({"candidate": format!("candidate:{n}")});

    // Candidates before the offer are held, not delivered
    for n in 1..=2 {
        room.relay(
            "u-doc".to_string(),
            RelayKind::IceCandidate,
            "u-pat".to_string(),
            candidate(n),
        )
        .await
        .unwrap();
    }
    assert_eq!(p2.queued(), 0);

    room.relay(
        "u-doc".to_string(),
        RelayKind::Offer,
        "u-pat".to_string(),
        json!({"sdp": "v=0"}),
    )
    .await
    .unwrap();
    // A later candidate flows straight through the open pair
    room.relay(
        "u-doc".to_string(),
        RelayKind::IceCandidate,
        "u-pat".to_string(),
        candidate(3),
    )
    .await
    .unwrap();

    let events = drain(&p2).await;
    assert_eq!(
        kinds(&events),
        vec!["offer", "ice-candidate", "ice-candidate", "ice-candidate"]
    );
    let payloads: Vec<&Value> = events
        .iter()
        .skip(1)
        .map(|event| match event {
            ServerEvent::IceCandidate { payload, .. } => payload,
            other => panic!("Expected IceCandidate, got {other:?}"),
        })
        .collect();
    assert_eq!(payloads, vec![&candidate(1), &candidate(2), &candidate(3)]);
}

#[tokio::test]
async fn test_reconnect_does_not_duplicate_user_connected() {
    let (_store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    let p2 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    join(&room, patient(), &p2).await;
    drain(&p2).await;

    // The doctor reconnects on a fresh socket
    let p1_again = SessionHandle::new(64);
    join(&room, doctor(), &p1_again).await;

    // The replaced session was evicted, the new one got a snapshot with
    // both members and no duplicate roster entry
    assert!(p1.is_closed());
    let events = drain(&p1_again).await;
    assert_eq!(kinds(&events), vec!["room-participants"]);
    match &events[0] {
        ServerEvent::RoomParticipants { participants, .. } => {
            assert_eq!(participants.len(), 2)
        },
        other => panic!("Expected RoomParticipants, got {other:?}"),
    }

    // The patient heard exactly one user-connected for the doctor overall
    let p2_events = drain(&p2).await;
    assert!(kinds(&p2_events).is_empty());

    // The stale socket's disconnect notice must not evict the new session
    room.disconnect("u-doc".to_string(), p1.connection_id());
    room.chat("u-pat".to_string(), "still there?".to_string())
        .await
        .unwrap();
    assert!(!p1_again.is_closed());
    let events = drain(&p1_again).await;
    assert_eq!(kinds(&events), vec!["chat-message"]);
}

#[tokio::test]
async fn test_scenario_transport_loss_prunes_participant() {
    let (_store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    let p2 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    join(&room, patient(), &p2).await;
    drain(&p2).await;

    // P1's transport vanishes without a leave message
    room.disconnect("u-doc".to_string(), p1.connection_id());
    room.chat("u-pat".to_string(), "hello?".to_string()).await.unwrap();

    let events = drain(&p2).await;
    assert_eq!(kinds(&events), vec!["user-disconnected", "chat-message"]);
    match &events[0] {
        ServerEvent::UserDisconnected { user_id } => assert_eq!(user_id, "u-doc"),
        other => panic!("Expected UserDisconnected, got {other:?}"),
    }
    assert!(p1.is_closed());

    // Back in Forming: the room is still open for the doctor to return
    let p1_again = SessionHandle::new(64);
    join(&room, doctor(), &p1_again).await;
    let events = drain(&p2).await;
    assert_eq!(kinds(&events), vec!["user-connected"]);
}

#[tokio::test]
async fn test_concurrent_ends_tear_down_once() {
    let (store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    let p2 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    join(&room, patient(), &p2).await;
    drain(&p1).await;
    drain(&p2).await;

    // Both sides race to end the appointment
    let (doc_end, pat_end) = tokio::join!(
        room.end("u-doc".to_string(), Some("all clear".to_string()), None),
        room.end("u-pat".to_string(), None, None),
    );
    doc_end.unwrap();
    pat_end.unwrap();

    // Exactly one ended/room-ended pair per member, one stored record
    for session in [&p1, &p2] {
        let events = drain(session).await;
        assert_eq!(kinds(&events), vec!["appointment-ended", "room-ended"]);
        assert!(session.is_closed());
    }
    assert_eq!(store.records.lock().len(), 1);
    assert!(registry.get("231-556-789").is_none());
}

#[tokio::test]
async fn test_repeated_end_from_same_participant_is_acknowledged() {
    let (store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;

    room.end("u-doc".to_string(), None, None).await.unwrap();
    // The second end is a no-op that still succeeds
    room.end("u-doc".to_string(), None, None).await.unwrap();

    assert_eq!(store.records.lock().len(), 1);
    assert!(registry.get("231-556-789").is_none());
}

#[tokio::test]
async fn test_closed_room_id_is_retired() {
    let (_store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    room.end("u-doc".to_string(), None, None).await.unwrap();

    match registry.get_or_create("231-556-789") {
        Err(AppError::RoomNotFound { room_id }) => assert_eq!(room_id, "231-556-789"),
        other => panic!("Expected RoomNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_lone_joiner_times_out_as_no_counterpart() {
    let (store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    drain(&p1).await;

    // Forming timeout is 300ms in the test config
    tokio::time::sleep(Duration::from_millis(600)).await;

    let events = drain(&p1).await;
    assert_eq!(kinds(&events), vec!["appointment-ended", "room-ended"]);
    match &events[1] {
        ServerEvent::RoomEnded { reason, .. } => assert_eq!(*reason, EndReason::NoCounterpart),
        other => panic!("Expected RoomEnded, got {other:?}"),
    }
    assert_eq!(store.records.lock()[0].reason, EndReason::NoCounterpart);
    assert!(registry.get("231-556-789").is_none());
}

#[tokio::test]
async fn test_abandoned_room_closes_on_idle_timeout() {
    let (store, registry) = setup();
    let (room, _) = registry.get_or_create("231-556-789").unwrap();

    let p1 = SessionHandle::new(64);
    let p2 = SessionHandle::new(64);
    join(&room, doctor(), &p1).await;
    join(&room, patient(), &p2).await;

    room.disconnect("u-doc".to_string(), p1.connection_id());
    room.disconnect("u-pat".to_string(), p2.connection_id());

    // Idle timeout is 200ms in the test config
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(registry.get("231-556-789").is_none());
    assert_eq!(store.records.lock()[0].reason, EndReason::IdleTimeout);
}
