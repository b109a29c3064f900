// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! shared between the TeleConsult browser client and the signaling server.
//! This module defines the WebSocket protocol messages and supporting types.
//!
//! Every frame on the wire is a JSON object with a `type` discriminator in
//! kebab-case and camelCase payload fields. WebRTC payloads (SDP blobs and
//! ICE candidates) are treated as opaque JSON and never inspected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sequence number type for ordering side-channel messages within a room
pub type Seq = u64;

/// Room identifier, unique for the lifetime of the deployment
pub type RoomId = String;

/// Stable participant identifier issued by the upstream identity provider
pub type UserId = String;

/// Participant role inside a consultation room
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }
}

/// Identity presented by a client when joining a room
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Stable user id, also the signaling address for relays
    pub id: UserId,
    /// Display name shown to the counterpart
    pub name: String,
    pub role: Role,
    /// Optional avatar URL
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Convert a join-time profile into the roster entry the server tracks.
    pub fn into_participant(self, joined_at: DateTime<Utc>) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.id,
            display_name: self.name,
            role: self.role,
            avatar: self.avatar,
            joined_at,
        }
    }
}

/// A room member as reported in roster snapshots and join broadcasts
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub avatar: Option<String>,
    /// When this participant first joined; preserved across reconnects
    pub joined_at: DateTime<Utc>,
}

impl ParticipantInfo {
    /// Lightweight reference used to attribute chat and record authorship.
    pub fn as_ref_info(&self) -> ParticipantRef {
        ParticipantRef {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Minimal participant reference embedded in authored events
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    pub user_id: UserId,
    pub display_name: String,
}

/// Shared clinical-note state, last-writer-wins per room
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    /// Clinician who wrote the current revision
    pub author: ParticipantRef,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

/// Why a room was torn down
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// A participant ended the appointment explicitly
    Ended,
    /// The room sat at zero participants past the idle timeout
    IdleTimeout,
    /// A lone joiner waited out the forming window without a counterpart
    NoCounterpart,
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a room, creating it if the id has never been used
    /// # Fields
    /// * `room_id` - Target room id
    /// * `user` - The joiner's identity profile
    /// * `metadata` - Free-form appointment metadata, only honoured on creation
    JoinRoom {
        room_id: RoomId,
        user: UserProfile,
        metadata: Option<Value>,
    },
    /// Relay an SDP offer to one other participant
    Offer {
        room_id: RoomId,
        target: UserId,
        payload: Value,
    },
    /// Relay an SDP answer to one other participant
    Answer {
        room_id: RoomId,
        target: UserId,
        payload: Value,
    },
    /// Relay an ICE candidate to one other participant
    IceCandidate {
        room_id: RoomId,
        target: UserId,
        payload: Value,
    },
    /// Post a chat line to everyone in the room
    ChatMessage { room_id: RoomId, text: String },
    /// Overwrite the room's shared clinical notes (doctor only)
    UpdateMedicalRecord { room_id: RoomId, notes: String },
    /// End the appointment for everyone
    /// # Fields
    /// * `summary` - Optional visit summary handed to the record store
    /// * `follow_up` - Optional follow-up instructions
    EndAppointment {
        room_id: RoomId,
        summary: Option<String>,
        follow_up: Option<String>,
    },
}

impl ClientMessage {
    /// The room this message addresses.
    pub fn room_id(&self) -> &str {
        match self {
            ClientMessage::JoinRoom { room_id, .. }
            | ClientMessage::Offer { room_id, .. }
            | ClientMessage::Answer { room_id, .. }
            | ClientMessage::IceCandidate { room_id, .. }
            | ClientMessage::ChatMessage { room_id, .. }
            | ClientMessage::UpdateMedicalRecord { room_id, .. }
            | ClientMessage::EndAppointment { room_id, .. } => room_id,
        }
    }

    /// Wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
            ClientMessage::ChatMessage { .. } => "chat-message",
            ClientMessage::UpdateMedicalRecord { .. } => "update-medical-record",
            ClientMessage::EndAppointment { .. } => "end-appointment",
        }
    }
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// First-ever join of a room id succeeded and the room now exists
    RoomCreated { room_id: RoomId, metadata: Value },
    /// Roster snapshot sent to a joiner after admission
    /// # Fields
    /// * `participants` - Current members in join order, the joiner included
    /// * `medical_record` - Latest clinical notes, if any were written
    RoomParticipants {
        room_id: RoomId,
        participants: Vec<ParticipantInfo>,
        metadata: Value,
        medical_record: Option<MedicalRecord>,
    },
    /// A new participant entered the room
    UserConnected { participant: ParticipantInfo },
    /// A participant's session ended or was pruned
    UserDisconnected { user_id: UserId },
    /// SDP offer relayed from another participant
    Offer { from: UserId, payload: Value },
    /// SDP answer relayed from another participant
    Answer { from: UserId, payload: Value },
    /// ICE candidate relayed from another participant
    IceCandidate { from: UserId, payload: Value },
    /// Chat line, ordered by `seq` within the room
    ChatMessage {
        seq: Seq,
        author: ParticipantRef,
        body: String,
        sent_at: DateTime<Utc>,
    },
    /// The shared clinical notes changed
    MedicalRecordUpdated { record: MedicalRecord },
    /// The appointment concluded; `ended_by` is absent for timeout teardowns
    AppointmentEnded {
        ended_by: Option<UserId>,
        summary: Option<String>,
        follow_up: Option<String>,
        ended_at: DateTime<Utc>,
    },
    /// Terminal event: the room id is retired and will never be reused
    RoomEnded { room_id: RoomId, reason: EndReason },
    /// Request-scoped failure, delivered only to the offending sender
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::RoomCreated { .. } => "room-created",
            ServerEvent::RoomParticipants { .. } => "room-participants",
            ServerEvent::UserConnected { .. } => "user-connected",
            ServerEvent::UserDisconnected { .. } => "user-disconnected",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::IceCandidate { .. } => "ice-candidate",
            ServerEvent::ChatMessage { .. } => "chat-message",
            ServerEvent::MedicalRecordUpdated { .. } => "medical-record-updated",
            ServerEvent::AppointmentEnded { .. } => "appointment-ended",
            ServerEvent::RoomEnded { .. } => "room-ended",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// True for negotiation traffic that may be shed under backpressure.
    ///
    /// A stale offer or candidate is recoverable (WebRTC renegotiates), a
    /// lost chat line or lifecycle event is not, so overflow handling drops
    /// signaling frames first.
    pub fn is_signaling(&self) -> bool {
        matches!(
            self,
            ServerEvent::Offer { .. }
                | ServerEvent::Answer { .. }
                | ServerEvent::IceCandidate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_deserializes_from_wire_shape() {
        let raw = r#"{
            "type": "join-room",
            "roomId": "231-556-789",
            "user": {"id": "u-doc", "name": "Dr. Okafor", "role": "doctor", "avatar": null},
            "metadata": {"appointmentId": "apt-42"}
        }"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::JoinRoom { room_id, user, metadata } => {
                assert_eq!(room_id, "231-556-789");
                assert_eq!(user.id, "u-doc");
                assert_eq!(user.role, Role::Doctor);
                assert_eq!(metadata.unwrap()["appointmentId"], "apt-42");
            }
            other => panic!("Expected JoinRoom, got {other:?}"),
        }
    }

    #[test]
    fn test_join_room_metadata_is_optional() {
        let raw = r#"{
            "type": "join-room",
            "roomId": "231-556-789",
            "user": {"id": "u-pat", "name": "Sam", "role": "patient", "avatar": null}
        }"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::JoinRoom { metadata, .. } => assert!(metadata.is_none()),
            other => panic!("Expected JoinRoom, got {other:?}"),
        }
    }

    #[test]
    fn test_signaling_payloads_stay_opaque() {
        let raw = r#"{
            "type": "ice-candidate",
            "roomId": "231-556-789",
            "target": "u-pat",
            "payload": {"candidate": "candidate:1 1 UDP 2122252543 192.0.2.1 54400 typ host", "sdpMid": "0"}
        }"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::IceCandidate { target, payload, .. } => {
                assert_eq!(target, "u-pat");
                assert_eq!(payload["sdpMid"], "0");
            }
            other => panic!("Expected IceCandidate, got {other:?}"),
        }
    }

    #[test]
    fn test_server_event_serializes_kebab_kinds_and_camel_fields() {
        let event = ServerEvent::UserDisconnected {
            user_id: "u-pat".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"user-disconnected""#));
        assert!(json.contains(r#""userId":"u-pat""#));

        let event = ServerEvent::MedicalRecordUpdated {
            record: MedicalRecord {
                author: ParticipantRef {
                    user_id: "u-doc".into(),
                    display_name: "Dr. Okafor".into(),
                },
                notes: "BP normal".into(),
                updated_at: Utc::now(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"medical-record-updated""#));
        assert!(json.contains(r#""displayName":"Dr. Okafor""#));
        assert!(json.contains(r#""updatedAt""#));
    }

    #[test]
    fn test_end_reason_uses_kebab_case() {
        let event = ServerEvent::RoomEnded {
            room_id: "231-556-789".into(),
            reason: EndReason::NoCounterpart,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""reason":"no-counterpart""#));

        let value = json!({"type": "room-ended", "roomId": "x", "reason": "idle-timeout"});
        let event: ServerEvent = serde_json::from_value(value).unwrap();
        match event {
            ServerEvent::RoomEnded { reason, .. } => assert_eq!(reason, EndReason::IdleTimeout),
            other => panic!("Expected RoomEnded, got {other:?}"),
        }
    }

    #[test]
    fn test_chat_event_carries_sequence_and_author() {
        let event = ServerEvent::ChatMessage {
            seq: 7,
            author: ParticipantRef {
                user_id: "u-pat".into(),
                display_name: "Sam".into(),
            },
            body: "see you Thursday".into(),
            sent_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chat-message""#));
        assert!(json.contains(r#""seq":7"#));
        assert!(json.contains(r#""sentAt""#));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = r#"{"type": "start-recording", "roomId": "x"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_signaling_classification() {
        let offer = ServerEvent::Offer {
            from: "u-doc".into(),
            payload: json!({"sdp": "v=0"}),
        };
        assert!(offer.is_signaling());

        let chat = ServerEvent::ChatMessage {
            seq: 1,
            author: ParticipantRef {
                user_id: "u-doc".into(),
                display_name: "Dr. Okafor".into(),
            },
            body: "hello".into(),
            sent_at: Utc::now(),
        };
        assert!(!chat.is_signaling());
    }
}
