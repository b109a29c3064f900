// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_CLOSED: &str = "room.closed";
pub const ROOMS_ACTIVE: &str = "rooms.active";
pub const ROOM_JOINED: &str = "room.joined";
pub const ROOM_RECONNECTED: &str = "room.reconnected";
pub const SIGNAL_RELAYED: &str = "signal.relayed";
pub const SIGNAL_BUFFERED: &str = "signal.buffered";
pub const SIGNAL_EXPIRED: &str = "signal.expired";
pub const CHAT_MESSAGES: &str = "chat.messages";
pub const RECORD_UPDATES: &str = "record.updates";
pub const RECORD_HANDOFF_FAILED: &str = "record.handoff_failed";
pub const SESSION_EVENTS_DROPPED: &str = "session.events_dropped";
pub const HEARTBEAT_PRUNED: &str = "heartbeat.pruned";
