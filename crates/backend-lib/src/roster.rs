// ============================
// crates/backend-lib/src/roster.rs
// ============================
//! Join-ordered room membership.
//!
//! The roster is plain data owned by a single room actor, so it needs no
//! locking of its own. Iteration order is join order, which is also the
//! order roster snapshots report.

use chrono::Utc;
use teleconsult_common::{ParticipantInfo, UserProfile};
use uuid::Uuid;

use crate::session::SessionHandle;

/// One admitted participant: their public info plus the live socket queue
#[derive(Debug)]
pub struct Member {
    pub info: ParticipantInfo,
    pub session: SessionHandle,
}

/// Outcome of admitting a profile into the roster
#[derive(Debug)]
pub enum Admission {
    /// First time this user id appears in the room
    Joined,
    /// Same user id arrived on a new socket; the old session was replaced
    Reconnected { evicted: SessionHandle },
}

#[derive(Debug, Default)]
pub struct Roster {
    members: Vec<Member>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.info.user_id == user_id)
    }

    /// Admit a profile. A duplicate user id is a reconnect: the member keeps
    /// its roster position and original join time, its profile fields are
    /// refreshed, and the superseded session is handed back for eviction.
    pub fn upsert(&mut self, profile: UserProfile, session: SessionHandle) -> Admission {
        if let Some(member) = self
            .members
            .iter_mut()
            .find(|m| m.info.user_id == profile.id)
        {
            let joined_at = member.info.joined_at;
            member.info = profile.into_participant(joined_at);
            let evicted = std::mem::replace(&mut member.session, session);
            Admission::Reconnected { evicted }
        } else {
            self.members.push(Member {
                info: profile.into_participant(Utc::now()),
                session,
            });
            Admission::Joined
        }
    }

    /// Remove a member, but only if the departing socket is still the one on
    /// file. A disconnect notice from an already-replaced socket is stale
    /// and must not evict the reconnected member.
    pub fn remove_if_connection(&mut self, user_id: &str, connection_id: Uuid) -> Option<Member> {
        let idx = self.members.iter().position(|m| {
            m.info.user_id == user_id && m.session.connection_id() == connection_id
        })?;
        Some(self.members.remove(idx))
    }

    /// Remove every member whose session has been closed out from under it.
    pub fn prune_closed(&mut self) -> Vec<Member> {
        let mut pruned = Vec::new();
        let mut idx = 0;
        while idx < self.members.len() {
            if self.members[idx].session.is_closed() {
                pruned.push(self.members.remove(idx));
            } else {
                idx += 1;
            }
        }
        pruned
    }

    /// Current members in join order.
    pub fn snapshot(&self) -> Vec<ParticipantInfo> {
        self.members.iter().map(|m| m.info.clone()).collect()
    }

    /// Fan an event out to every member, optionally skipping one user id.
    pub fn broadcast(&self, event: &teleconsult_common::ServerEvent, except: Option<&str>) {
        for member in &self.members {
            if except == Some(member.info.user_id.as_str()) {
                continue;
            }
            member.session.send(event.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    /// Empty the roster, handing back every member.
    pub fn drain(&mut self) -> Vec<Member> {
        self.members.drain(..).collect()
    }
}
