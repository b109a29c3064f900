// ============================
// crates/backend-lib/src/room_actor.rs
// ============================
//! Per-room actor.
//!
//! Every room is one task owning all of that room's state: the roster, the
//! lifecycle machine, the side channel and the negotiation gates. All
//! mutation flows through the actor's command channel, so room state needs
//! no locks and cross-room operations never contend. The actor exits once
//! the room is closed and the last handle is dropped.

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use teleconsult_common::{EndReason, RoomId, Seq, ServerEvent, UserId, UserProfile};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RoomConfig;
use crate::error::AppError;
use crate::lifecycle::{Lifecycle, RoomState};
use crate::metrics::{
    CHAT_MESSAGES, RECORD_HANDOFF_FAILED, RECORD_UPDATES, ROOM_JOINED, ROOM_RECONNECTED,
    SIGNAL_BUFFERED, SIGNAL_EXPIRED, SIGNAL_RELAYED,
};
use crate::negotiation::NegotiationGate;
use crate::records::{AppointmentRecord, RecordStore};
use crate::registry::RoomRegistry;
use crate::roster::{Admission, Roster};
use crate::session::SessionHandle;
use crate::side_channel::SideChannel;

/// Which half of the peer handshake a relay command carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Message sent *into* the actor
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        profile: UserProfile,
        metadata: Option<Value>,
        session: SessionHandle,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    Relay {
        from: UserId,
        kind: RelayKind,
        target: UserId,
        payload: Value,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    Chat {
        from: UserId,
        body: String,
        reply: oneshot::Sender<Result<Seq, AppError>>,
    },
    UpdateRecord {
        from: UserId,
        notes: String,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    End {
        from: UserId,
        summary: Option<String>,
        follow_up: Option<String>,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    Disconnect {
        user_id: UserId,
        connection_id: Uuid,
    },
}

/// Handle that connections and the registry keep to a room's actor
#[derive(Clone, Debug)]
pub struct RoomHandle {
    room_id: RoomId,
    cmd_tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Whether two handles point at the same actor.
    pub fn same_actor(&self, other: &RoomHandle) -> bool {
        self.cmd_tx.same_channel(&other.cmd_tx)
    }

    /// Send a command and await its reply. A gone actor means the room
    /// already closed, which surfaces as `RoomNotFound`.
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, AppError>>) -> RoomCommand,
    ) -> Result<T, AppError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(make(reply)).map_err(|_| AppError::RoomNotFound {
            room_id: self.room_id.clone(),
        })?;
        rx.await.map_err(|_| AppError::RoomNotFound {
            room_id: self.room_id.clone(),
        })?
    }

    pub async fn join(
        &self,
        profile: UserProfile,
        metadata: Option<Value>,
        session: SessionHandle,
    ) -> Result<(), AppError> {
        self.request(|reply| RoomCommand::Join {
            profile,
            metadata,
            session,
            reply,
        })
        .await
    }

    pub async fn relay(
        &self,
        from: UserId,
        kind: RelayKind,
        target: UserId,
        payload: Value,
    ) -> Result<(), AppError> {
        self.request(|reply| RoomCommand::Relay {
            from,
            kind,
            target,
            payload,
            reply,
        })
        .await
    }

    pub async fn chat(&self, from: UserId, body: String) -> Result<Seq, AppError> {
        self.request(|reply| RoomCommand::Chat { from, body, reply }).await
    }

    pub async fn update_record(&self, from: UserId, notes: String) -> Result<(), AppError> {
        self.request(|reply| RoomCommand::UpdateRecord { from, notes, reply })
            .await
    }

    pub async fn end(
        &self,
        from: UserId,
        summary: Option<String>,
        follow_up: Option<String>,
    ) -> Result<(), AppError> {
        self.request(|reply| RoomCommand::End {
            from,
            summary,
            follow_up,
            reply,
        })
        .await
    }

    /// Fire-and-forget: a transport noticed its participant is gone.
    pub fn disconnect(&self, user_id: UserId, connection_id: Uuid) {
        let _ = self.cmd_tx.send(RoomCommand::Disconnect {
            user_id,
            connection_id,
        });
    }
}

pub struct RoomActor {
    room_id: RoomId,
    config: RoomConfig,
    records: Arc<dyn RecordStore>,
    registry: RoomRegistry,
    /// The actor's own handle, used to identify its registry entry at
    /// close. Dropped during teardown so the command channel can close
    /// once the last outside handle is released.
    handle: Option<RoomHandle>,
    roster: Roster,
    lifecycle: Lifecycle,
    side_channel: SideChannel,
    negotiation: NegotiationGate,
    /// Set by the creating join, immutable afterwards
    metadata: Option<Value>,
}

impl RoomActor {
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
        // Tick often enough that short test timeouts still fire promptly
        let tick = (self.config.idle_timeout.min(self.config.forming_timeout) / 4)
            .clamp(Duration::from_millis(10), Duration::from_secs(1));
        let mut timer = interval(tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Registry entry and every connection handle dropped
                    None => break,
                },
                _ = timer.tick() => self.on_tick().await,
            }
        }

        debug!(room_id = %self.room_id, "room actor stopped");
    }

    async fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                profile,
                metadata,
                session,
                reply,
            } => {
                let _ = reply.send(self.handle_join(profile, metadata, session));
            },
            RoomCommand::Relay {
                from,
                kind,
                target,
                payload,
                reply,
            } => {
                let _ = reply.send(self.handle_relay(&from, kind, target, payload));
            },
            RoomCommand::Chat { from, body, reply } => {
                let _ = reply.send(self.handle_chat(&from, body));
            },
            RoomCommand::UpdateRecord { from, notes, reply } => {
                let _ = reply.send(self.handle_update_record(&from, notes));
            },
            RoomCommand::End {
                from,
                summary,
                follow_up,
                reply,
            } => {
                let _ = reply.send(self.handle_end(from, summary, follow_up).await);
            },
            RoomCommand::Disconnect {
                user_id,
                connection_id,
            } => self.handle_disconnect(&user_id, connection_id),
        }
    }

    fn handle_join(
        &mut self,
        profile: UserProfile,
        metadata: Option<Value>,
        session: SessionHandle,
    ) -> Result<(), AppError> {
        if !self.lifecycle.is_open() {
            return Err(AppError::RoomNotFound {
                room_id: self.room_id.clone(),
            });
        }

        let user_id = profile.id.clone();

        // The first-ever join is what actually creates the room; only its
        // metadata is honoured.
        if self.metadata.is_none() {
            let metadata = metadata.unwrap_or_else(|| Value::Object(Default::default()));
            self.metadata = Some(metadata.clone());
            session.send(ServerEvent::RoomCreated {
                room_id: self.room_id.clone(),
                metadata,
            });
            info!(room_id = %self.room_id, user_id = %user_id, "room created");
        }

        match self.roster.upsert(profile, session.clone()) {
            Admission::Joined => {
                counter!(ROOM_JOINED).increment(1);
                if let Some(member) = self.roster.get(&user_id) {
                    let event = ServerEvent::UserConnected {
                        participant: member.info.clone(),
                    };
                    self.roster.broadcast(&event, Some(&user_id));
                }
                info!(room_id = %self.room_id, user_id = %user_id, "participant joined");
            },
            Admission::Reconnected { evicted } => {
                counter!(ROOM_RECONNECTED).increment(1);
                evicted.close();
                // Stale handshake state must not leak into the new socket
                self.negotiation.forget_user(&user_id);
                debug!(room_id = %self.room_id, user_id = %user_id, "participant reconnected");
            },
        }

        // Snapshot reflects the roster *after* this join
        session.send(ServerEvent::RoomParticipants {
            room_id: self.room_id.clone(),
            participants: self.roster.snapshot(),
            metadata: self.metadata.clone().unwrap_or_default(),
            medical_record: self.side_channel.record().cloned(),
        });

        if let Some(state) = self.lifecycle.on_occupancy(self.roster.len()) {
            debug!(room_id = %self.room_id, ?state, "room state changed");
        }

        Ok(())
    }

    fn handle_relay(
        &mut self,
        from: &str,
        kind: RelayKind,
        target: UserId,
        payload: Value,
    ) -> Result<(), AppError> {
        if self.roster.get(from).is_none() {
            return Err(AppError::Protocol(
                "sender is not a member of this room".to_string(),
            ));
        }

        let target_session = self.roster.get(&target).map(|m| m.session.clone());

        match kind {
            RelayKind::Offer | RelayKind::Answer => {
                let Some(target_session) = target_session else {
                    return Err(AppError::TargetUnreachable { target });
                };

                let event = if kind == RelayKind::Offer {
                    ServerEvent::Offer {
                        from: from.to_string(),
                        payload,
                    }
                } else {
                    ServerEvent::Answer {
                        from: from.to_string(),
                        payload,
                    }
                };
                target_session.send(event);
                counter!(SIGNAL_RELAYED).increment(1);

                // The pair is negotiated now: release candidates held back
                // for it, after the SDP frame and in arrival order
                for held in self.negotiation.open_pair(from, &target) {
                    target_session.send(ServerEvent::IceCandidate {
                        from: from.to_string(),
                        payload: held,
                    });
                    counter!(SIGNAL_RELAYED).increment(1);
                }
                Ok(())
            },
            RelayKind::IceCandidate => {
                match target_session {
                    Some(session) if self.negotiation.is_open(from, &target) => {
                        session.send(ServerEvent::IceCandidate {
                            from: from.to_string(),
                            payload,
                        });
                        counter!(SIGNAL_RELAYED).increment(1);
                    },
                    // Early candidate: held until the pair's first
                    // offer/answer is relayed
                    _ => {
                        if self.negotiation.buffer(from, &target, payload).is_some() {
                            counter!(SIGNAL_EXPIRED).increment(1);
                        }
                        counter!(SIGNAL_BUFFERED).increment(1);
                    },
                }
                Ok(())
            },
        }
    }

    fn handle_chat(&mut self, from: &str, body: String) -> Result<Seq, AppError> {
        let Some(member) = self.roster.get(from) else {
            return Err(AppError::Protocol(
                "sender is not a member of this room".to_string(),
            ));
        };

        let author = member.info.clone();
        let (seq, event) = self.side_channel.chat(&author, body);
        self.roster.broadcast(&event, None);
        counter!(CHAT_MESSAGES).increment(1);
        Ok(seq)
    }

    fn handle_update_record(&mut self, from: &str, notes: String) -> Result<(), AppError> {
        let Some(member) = self.roster.get(from) else {
            return Err(AppError::Protocol(
                "sender is not a member of this room".to_string(),
            ));
        };

        // Role comes from the roster entry recorded at join, never from the
        // client's claim on this message
        let author = member.info.clone();
        let event = self.side_channel.update_record(&author, notes)?;
        self.roster.broadcast(&event, None);
        counter!(RECORD_UPDATES).increment(1);
        Ok(())
    }

    async fn handle_end(
        &mut self,
        from: UserId,
        summary: Option<String>,
        follow_up: Option<String>,
    ) -> Result<(), AppError> {
        if self.lifecycle.is_open() && self.roster.get(&from).is_none() {
            return Err(AppError::Protocol(
                "sender is not a member of this room".to_string(),
            ));
        }

        // A duplicate end is acknowledged by the Ok reply alone; the
        // teardown broadcast already reached this participant's session
        if self.lifecycle.begin_ending() {
            self.teardown(Some(from), EndReason::Ended, summary, follow_up).await;
        }
        Ok(())
    }

    fn handle_disconnect(&mut self, user_id: &str, connection_id: Uuid) {
        // A notice from an already-replaced socket is stale and ignored
        let Some(member) = self.roster.remove_if_connection(user_id, connection_id) else {
            return;
        };

        member.session.close();
        self.negotiation.forget_user(user_id);
        info!(room_id = %self.room_id, user_id = %user_id, "participant disconnected");

        let event = ServerEvent::UserDisconnected {
            user_id: user_id.to_string(),
        };
        self.roster.broadcast(&event, None);

        if let Some(state) = self.lifecycle.on_occupancy(self.roster.len()) {
            debug!(room_id = %self.room_id, ?state, "room state changed");
        }
    }

    async fn on_tick(&mut self) {
        // Safety net for sessions closed out from under the roster
        let pruned = self.roster.prune_closed();
        for member in pruned {
            self.negotiation.forget_user(&member.info.user_id);
            let event = ServerEvent::UserDisconnected {
                user_id: member.info.user_id.clone(),
            };
            self.roster.broadcast(&event, None);
        }

        if !self.lifecycle.is_open() {
            return;
        }
        self.lifecycle.on_occupancy(self.roster.len());

        // Teardown hangs off winning the Ending transition, same as an
        // explicit end
        if self.lifecycle.empty_for() >= Some(self.config.idle_timeout) {
            if self.lifecycle.begin_ending() {
                info!(room_id = %self.room_id, "room idle, closing");
                self.teardown(None, EndReason::IdleTimeout, None, None).await;
            }
        } else if self.lifecycle.lone_for() >= Some(self.config.forming_timeout) {
            if self.lifecycle.begin_ending() {
                info!(room_id = %self.room_id, "no counterpart arrived, closing");
                self.teardown(None, EndReason::NoCounterpart, None, None).await;
            }
        }
    }

    /// Runs exactly once per room: the caller must have won the
    /// `begin_ending` transition.
    async fn teardown(
        &mut self,
        ended_by: Option<UserId>,
        reason: EndReason,
        summary: Option<String>,
        follow_up: Option<String>,
    ) {
        let ended_at = Utc::now();
        info!(room_id = %self.room_id, ?reason, "room tearing down");

        let ended = ServerEvent::AppointmentEnded {
            ended_by: ended_by.clone(),
            summary: summary.clone(),
            follow_up: follow_up.clone(),
            ended_at,
        };
        let room_ended = ServerEvent::RoomEnded {
            room_id: self.room_id.clone(),
            reason,
        };
        self.roster.broadcast(&ended, None);
        self.roster.broadcast(&room_ended, None);

        // The handoff is bounded and advisory: a dead record store warns the
        // initiator but never holds the room open
        let record = AppointmentRecord {
            room_id: self.room_id.clone(),
            metadata: self.metadata.clone().unwrap_or_default(),
            ended_by: ended_by.clone(),
            reason,
            summary,
            follow_up,
            ended_at,
        };
        let handoff = timeout(self.config.record_handoff, self.records.store_summary(&record)).await;
        let failure = match handoff {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("record store timed out".to_string()),
        };
        if let Some(cause) = failure {
            counter!(RECORD_HANDOFF_FAILED).increment(1);
            warn!(room_id = %self.room_id, %cause, "appointment summary handoff failed");
            if let Some(initiator) = ended_by.as_deref().and_then(|id| self.roster.get(id)) {
                initiator.session.send(AppError::RecordStore(cause).to_event());
            }
        }

        for member in self.roster.drain() {
            member.session.close();
        }
        self.lifecycle.finish_closed();
        if let Some(handle) = self.handle.take() {
            self.registry.finalize_close(&self.room_id, &handle);
        }
        debug_assert_eq!(self.lifecycle.state(), RoomState::Closed);
    }
}

/// Spawn a new room actor and return its handle.
pub fn spawn_room_actor(
    room_id: RoomId,
    config: RoomConfig,
    records: Arc<dyn RecordStore>,
    registry: RoomRegistry,
) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = RoomHandle {
        room_id: room_id.clone(),
        cmd_tx,
    };

    let negotiation = NegotiationGate::new(config.candidate_buffer);
    let actor = RoomActor {
        room_id,
        config,
        records,
        registry,
        handle: Some(handle.clone()),
        roster: Roster::new(),
        lifecycle: Lifecycle::new(),
        side_channel: SideChannel::new(),
        negotiation,
        metadata: None,
    };
    tokio::spawn(actor.run(cmd_rx));

    handle
}
