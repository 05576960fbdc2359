//! Request handling: validation at the boundary, then store mutation
//!
//! `SyncService` is the explicitly constructed server context. The network
//! layer hands it decoded requests and sends back whatever it returns; a
//! malformed request only ever produces an error response for its sender.

use crate::session::SessionManager;
use crate::store::EntityStore;
use log::{debug, warn};
use shared::{
    validate_id, Color, EntityView, MoveDelta, Position, Request, Response, SessionToken,
    SyncError, WorldConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a successful join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinAccepted {
    pub token: SessionToken,
    pub entity: EntityView,
}

pub struct SyncService {
    sessions: SessionManager,
    config: WorldConfig,
}

impl SyncService {
    pub fn new(store: Arc<EntityStore>, config: WorldConfig) -> Self {
        Self {
            sessions: SessionManager::new(store, config.max_sessions, config.session_timeout),
            config,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Claims `id` and spawns its entity at a random cell with a random color
    pub fn join(&self, id: &str) -> Result<JoinAccepted, SyncError> {
        validate_id(id)?;
        let mut rng = rand::thread_rng();
        let spawn = self.config.bounds().random_position(&mut rng);
        let color = Color::random(&mut rng);

        let token = self.sessions.join(id, spawn, color, Instant::now())?;
        Ok(JoinAccepted {
            token,
            entity: EntityView {
                id: id.to_string(),
                position: spawn,
                color,
            },
        })
    }

    /// Applies one unit-step move carrying sequence number `seq`
    ///
    /// Checks run in order: session, delta, sequence. Only `seq == last + 1`
    /// is applied; duplicates and gaps are answered with `StaleMove` so a
    /// retried datagram can never move the entity twice. Rejected moves do
    /// not consume a sequence number.
    pub fn push_move(
        &self,
        token: SessionToken,
        dx: i32,
        dy: i32,
        seq: u32,
    ) -> Result<Position, SyncError> {
        let bounds = self.config.bounds();
        self.sessions
            .with_session(token, Instant::now(), |session, store| {
                let delta = MoveDelta::new(dx, dy)?;

                let expected = session.expected_move_seq();
                if seq != expected {
                    return Err(SyncError::StaleMove { expected, got: seq });
                }

                match store.translate(&session.entity_id, delta, bounds) {
                    Some(position) => {
                        session.last_move_seq = seq;
                        Ok(position)
                    }
                    None => {
                        warn!(
                            "Move for {} found no entity; treating session as gone",
                            session.entity_id
                        );
                        Err(SyncError::UnknownSession)
                    }
                }
            })
    }

    pub fn push_color(&self, token: SessionToken, rgb: [i32; 3]) -> Result<Color, SyncError> {
        self.sessions
            .with_session(token, Instant::now(), |session, store| {
                let color = Color::from_components(rgb)?;
                store.upsert(&session.entity_id, None, Some(color));
                Ok(color)
            })
    }

    /// Every entity in the world, optionally without the caller's own
    pub fn pull_snapshot(
        &self,
        token: SessionToken,
        include_self: bool,
    ) -> Result<Vec<EntityView>, SyncError> {
        self.sessions
            .with_session(token, Instant::now(), |session, store| {
                Ok(store
                    .get_all()
                    .iter()
                    .filter(|entity| include_self || entity.id != session.entity_id)
                    .map(|entity| entity.view())
                    .collect())
            })
    }

    pub fn heartbeat(&self, token: SessionToken) -> Result<(), SyncError> {
        self.sessions.heartbeat(token, Instant::now())
    }

    /// Ends the session. Unknown tokens are ignored so a retried leave still succeeds.
    pub fn leave(&self, token: SessionToken) {
        if let Err(e) = self.sessions.leave(token) {
            debug!("Leave for session {} ignored: {}", token, e);
        }
    }

    pub fn sweep(&self, now: Instant) -> Vec<String> {
        self.sessions.sweep(now, self.config.session_timeout)
    }

    /// Dispatches one decoded request to the matching operation
    pub fn handle(&self, request: Request) -> Response {
        let kind = request.kind();
        let response: Response = match request {
            Request::Join { id } => self
                .join(&id)
                .map(|accepted| Response::Joined {
                    token: accepted.token,
                    entity: accepted.entity,
                    bounds: self.config.bounds(),
                    session_timeout_ms: duration_ms(self.config.session_timeout),
                })
                .into(),
            Request::Move { token, dx, dy, seq } => self
                .push_move(token, dx, dy, seq)
                .map(|position| Response::Moved { position })
                .into(),
            Request::SetColor { token, rgb } => self
                .push_color(token, rgb)
                .map(|color| Response::ColorSet { color })
                .into(),
            Request::Snapshot {
                token,
                include_self,
            } => self
                .pull_snapshot(token, include_self)
                .map(|entities| Response::Snapshot { entities })
                .into(),
            Request::Heartbeat { token } => self.heartbeat(token).map(|_| Response::Ok).into(),
            Request::Leave { token } => {
                self.leave(token);
                Response::Ok
            }
        };

        if let Response::Error(e) = &response {
            debug!("{} rejected: {}", kind, e);
        }
        response
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
