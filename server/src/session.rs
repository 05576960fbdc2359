//! Session bookkeeping for connected players
//!
//! This module tracks which entity ids are currently claimed and by whom:
//! - Session lifecycle (join, leave, expiry)
//! - Token validation for every authenticated request
//! - Per-session move sequence numbers
//! - Capacity limits
//!
//! The session table and the entity store are always locked in that order.
//! Every operation that creates or destroys a session also creates or
//! destroys its entity while the table lock is held, so the store never
//! holds an entity whose session is gone.

use crate::store::EntityStore;
use log::{info, warn};
use parking_lot::Mutex;
use rand::Rng;
use shared::{Color, Position, SessionToken, SyncError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The live binding between a client and the entity it controls
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub entity_id: String,
    pub joined_at: Instant,
    /// Last time any request arrived with this session's token
    pub last_seen: Instant,
    /// Sequence number of the last applied move, 0 before the first move
    pub last_move_seq: u32,
}

impl Session {
    pub fn new(token: SessionToken, entity_id: &str, now: Instant) -> Self {
        Self {
            token,
            entity_id: entity_id.to_string(),
            joined_at: now,
            last_seen: now,
            last_move_seq: 0,
        }
    }

    /// Checks whether the session has been silent for longer than `timeout`
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// The only sequence number the next move may carry
    pub fn expected_move_seq(&self) -> u32 {
        self.last_move_seq.wrapping_add(1)
    }
}

#[derive(Debug, Default)]
struct SessionTable {
    by_token: HashMap<SessionToken, Session>,
    by_id: HashMap<String, SessionToken>,
}

impl SessionTable {
    fn remove(&mut self, token: SessionToken) -> Option<Session> {
        let session = self.by_token.remove(&token)?;
        self.by_id.remove(&session.entity_id);
        Some(session)
    }
}

/// Tracks live sessions and cascades their removal into the entity store
///
/// Duplicate joins are rejected: while a session for an id is live, any
/// further `join` for that id fails with `AlreadyJoined` and the existing
/// session is left untouched. A session silent for longer than
/// `session_timeout` is dead even before the sweep removes it.
pub struct SessionManager {
    store: Arc<EntityStore>,
    table: Mutex<SessionTable>,
    max_sessions: usize,
    session_timeout: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<EntityStore>, max_sessions: usize, session_timeout: Duration) -> Self {
        Self {
            store,
            table: Mutex::new(SessionTable::default()),
            max_sessions,
            session_timeout,
        }
    }

    /// Registers `id` as active and places its entity in the store
    pub fn join(
        &self,
        id: &str,
        spawn: Position,
        color: Color,
        now: Instant,
    ) -> Result<SessionToken, SyncError> {
        let mut table = self.table.lock();

        if let Some(&holder) = table.by_id.get(id) {
            let live = table
                .by_token
                .get(&holder)
                .map_or(false, |session| !session.is_expired(now, self.session_timeout));
            if live {
                return Err(SyncError::AlreadyJoined { id: id.to_string() });
            }
            // Timed out but not swept yet; the name is free again
            if let Some(stale) = table.remove(holder) {
                self.store.remove(&stale.entity_id);
                info!("{} expired", stale.entity_id);
            }
        }
        if table.by_token.len() >= self.max_sessions {
            return Err(SyncError::ServerFull {
                max_sessions: self.max_sessions,
            });
        }

        let mut rng = rand::thread_rng();
        let token = loop {
            let candidate = SessionToken(rng.gen_range(1..=u64::MAX));
            if !table.by_token.contains_key(&candidate) {
                break candidate;
            }
        };

        table.by_token.insert(token, Session::new(token, id, now));
        table.by_id.insert(id.to_string(), token);
        self.store.upsert(id, Some(spawn), Some(color));

        info!("{} joined at ({}, {})", id, spawn.x, spawn.y);
        Ok(token)
    }

    /// Validates `token`, refreshes it, and runs `f` with the session and store
    ///
    /// `f` runs under the session table lock, so it must stay short and must
    /// not block. Any request that reaches `f` counts as a heartbeat for both
    /// the session and its entity. A session already past its timeout is
    /// removed here instead of being revived.
    pub fn with_session<R>(
        &self,
        token: SessionToken,
        now: Instant,
        f: impl FnOnce(&mut Session, &EntityStore) -> Result<R, SyncError>,
    ) -> Result<R, SyncError> {
        let mut table = self.table.lock();
        let expired = match table.by_token.get(&token) {
            Some(session) => session.is_expired(now, self.session_timeout),
            None => return Err(SyncError::UnknownSession),
        };
        if expired {
            if let Some(session) = table.remove(token) {
                self.store.remove(&session.entity_id);
                info!("{} expired", session.entity_id);
            }
            return Err(SyncError::UnknownSession);
        }

        let session = table
            .by_token
            .get_mut(&token)
            .ok_or(SyncError::UnknownSession)?;
        session.last_seen = now;
        if !self.store.touch(&session.entity_id) {
            warn!("Session {} has no entity {}", token, session.entity_id);
        }
        f(session, &self.store)
    }

    /// Refreshes the session and its entity's `last_seen`
    pub fn heartbeat(&self, token: SessionToken, now: Instant) -> Result<(), SyncError> {
        self.with_session(token, now, |_, _| Ok(()))
    }

    /// Ends a session and removes its entity. Returns the entity id.
    pub fn leave(&self, token: SessionToken) -> Result<String, SyncError> {
        let mut table = self.table.lock();
        let session = table.remove(token).ok_or(SyncError::UnknownSession)?;
        self.store.remove(&session.entity_id);
        info!("{} left", session.entity_id);
        Ok(session.entity_id)
    }

    /// Expires every session silent for longer than `timeout`
    ///
    /// Best-effort: never fails. Returns the ids of the removed entities.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut table = self.table.lock();
        let expired: Vec<SessionToken> = table
            .by_token
            .values()
            .filter(|session| session.is_expired(now, timeout))
            .map(|session| session.token)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for token in expired {
            if let Some(session) = table.remove(token) {
                if !self.store.remove(&session.entity_id) {
                    warn!(
                        "Expired session for {} had no entity in the store",
                        session.entity_id
                    );
                }
                info!("{} expired", session.entity_id);
                removed.push(session.entity_id);
            }
        }
        removed
    }

    pub fn entity_id(&self, token: SessionToken) -> Option<String> {
        self.table
            .lock()
            .by_token
            .get(&token)
            .map(|session| session.entity_id.clone())
    }

    pub fn is_joined(&self, id: &str) -> bool {
        self.table.lock().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.lock().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().by_token.is_empty()
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }
}
