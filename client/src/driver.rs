//! Fixed-rate client loop: join, pull, predict, push, display
//!
//! The loop is a small state machine:
//!
//! ```text
//! Disconnected -> Joining -> Active -> (Leaving | Expired) -> Disconnected
//! ```
//!
//! Every tick pulls a snapshot and hands it to the display. Every
//! `move_divisor_k`-th tick consumes buffered input (or picks a random step
//! when auto-move is on) and pushes at most one move. Moves carry a session
//! sequence number; a move whose reply was lost is resent with the same
//! number, and the server's `StaleMove` answer tells us where to resume.

use crate::input::InputEvent;
use crate::network::{ClientError, Transport};
use crate::rendering::Display;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    ClientConfig, Color, EntityView, MoveDelta, Request, Response, SessionToken, SyncError,
    WorldBounds, WorldConfig,
};
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

const MAX_BUFFERED_INPUT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Disconnected,
    Joining,
    Active,
    Leaving,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Quit,
}

/// Source of input events for [`ClientLoop::run_blocking`]
pub trait InputSource {
    fn poll(&mut self) -> Vec<InputEvent>;
}

/// Decides when the next tick is due at a fixed period
///
/// Missed ticks are skipped rather than replayed in a burst.
#[derive(Debug, Clone)]
pub struct TickPacer {
    period: Duration,
    next: Instant,
}

impl TickPacer {
    pub fn new(period: Duration, now: Instant) -> Self {
        Self { period, next: now }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
        true
    }

    /// Sleeps until the next tick is due
    pub fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            thread::sleep(self.next - now);
        }
        while !self.due(Instant::now()) {
            thread::yield_now();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    token: SessionToken,
    bounds: WorldBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingMove {
    seq: u32,
    delta: MoveDelta,
}

pub struct ClientLoop<T: Transport> {
    transport: T,
    config: ClientConfig,
    name: String,
    state: LoopState,
    session: Option<ActiveSession>,

    local: Option<EntityView>,
    others: Vec<EntityView>,

    move_counter: u32,
    auto_move: bool,
    input: VecDeque<InputEvent>,
    next_seq: u32,
    pending_move: Option<PendingMove>,
    pending_color: Option<Color>,

    consecutive_failures: u32,
    /// When the last unanswered join gave up; the server may still hold our name
    unconfirmed_join: Option<Instant>,
    /// Learned from the last successful join
    server_session_timeout: Option<Duration>,
    rng: StdRng,
}

impl<T: Transport> ClientLoop<T> {
    pub fn new(transport: T, name: &str, config: ClientConfig) -> Self {
        Self {
            transport,
            name: name.to_string(),
            state: LoopState::Disconnected,
            session: None,
            local: None,
            others: Vec::new(),
            move_counter: 0,
            auto_move: config.auto_move_default,
            input: VecDeque::new(),
            next_seq: 1,
            pending_move: None,
            pending_color: None,
            consecutive_failures: 0,
            unconfirmed_join: None,
            server_session_timeout: None,
            rng: StdRng::from_entropy(),
            config,
        }
    }

    /// Fixes the random source used for auto-move and colors
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auto_move(&self) -> bool {
        self.auto_move
    }

    pub fn bounds(&self) -> Option<WorldBounds> {
        self.session.map(|session| session.bounds)
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.session.map(|session| session.token)
    }

    pub fn local(&self) -> Option<&EntityView> {
        self.local.as_ref()
    }

    pub fn others(&self) -> &[EntityView] {
        &self.others
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn server_session_timeout(&self) -> Option<Duration> {
        self.server_session_timeout
    }

    /// Whether the server expires sessions faster than this loop's pacing
    /// reliably keeps them alive
    pub fn server_timeout_is_short(&self) -> bool {
        self.server_session_timeout
            .map_or(false, |timeout| timeout < self.config.min_safe_session_timeout())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Everything the display should show: our predicted self first, then the others
    pub fn visible_entities(&self) -> Vec<EntityView> {
        self.local
            .iter()
            .chain(self.others.iter())
            .cloned()
            .collect()
    }

    /// Runs one display tick
    ///
    /// Transient failures skip the rest of the tick and are retried on the
    /// next one; the last known state is still displayed. Only rejections
    /// that retrying cannot fix are returned as errors.
    pub fn tick<D: Display + ?Sized>(
        &mut self,
        events: &[InputEvent],
        display: &mut D,
    ) -> Result<TickOutcome, ClientError> {
        if events.contains(&InputEvent::Quit) {
            self.quit();
            return Ok(TickOutcome::Quit);
        }
        self.buffer_input(events);

        match self.step() {
            Ok(()) => self.consecutive_failures = 0,
            Err(e) if e.is_transient() => {
                self.consecutive_failures += 1;
                debug!("Tick skipped: {}", e);
            }
            Err(e) => {
                self.quit();
                return Err(e);
            }
        }

        display.display(&self.visible_entities());

        let limit = self.config.max_consecutive_timeouts.max(1);
        if self.consecutive_failures >= limit {
            if self.consecutive_failures % limit == 0 {
                warn!(
                    "{} consecutive requests failed; server may be unreachable",
                    self.consecutive_failures
                );
            }
            display.connectivity_warning(self.consecutive_failures);
        }

        Ok(TickOutcome::Continue)
    }

    /// Ticks at the configured display rate until a quit event arrives
    pub fn run_blocking<D, I>(&mut self, display: &mut D, input: &mut I) -> Result<(), ClientError>
    where
        D: Display + ?Sized,
        I: InputSource + ?Sized,
    {
        let mut pacer = TickPacer::new(self.config.tick_period(), Instant::now());
        loop {
            pacer.wait();
            let events = input.poll();
            if self.tick(&events, display)? == TickOutcome::Quit {
                return Ok(());
            }
        }
    }

    /// Leaves the session, if any. Never fails; an unacknowledged leave is
    /// cleaned up by the server's expiry sweep.
    pub fn quit(&mut self) {
        if let Some(session) = self.session.take() {
            self.state = LoopState::Leaving;
            match self.transport.request(Request::Leave {
                token: session.token,
            }) {
                Ok(_) => info!("{} left the world", self.name),
                Err(e) => warn!("Leave failed ({}); session will expire on the server", e),
            }
        }
        self.reset_session_state();
        self.state = LoopState::Disconnected;
    }

    fn buffer_input(&mut self, events: &[InputEvent]) {
        for event in events {
            if self.input.len() >= MAX_BUFFERED_INPUT {
                self.input.pop_front();
            }
            self.input.push_back(*event);
        }
    }

    fn step(&mut self) -> Result<(), ClientError> {
        if self.state == LoopState::Expired {
            self.state = LoopState::Disconnected;
        }
        if self.state != LoopState::Active {
            self.join()?;
            if self.state != LoopState::Active {
                return Ok(());
            }
        }

        self.pull()?;
        if self.state != LoopState::Active {
            return Ok(());
        }

        self.move_counter += 1;
        if self.move_counter >= self.config.move_divisor_k {
            self.move_counter = 0;
            self.move_tick()?;
        }
        Ok(())
    }

    fn join(&mut self) -> Result<(), ClientError> {
        self.state = LoopState::Joining;
        let response = match self.transport.request(Request::Join {
            id: self.name.clone(),
        }) {
            Ok(response) => response,
            Err(e) => {
                self.state = LoopState::Disconnected;
                if e.is_transient() {
                    self.unconfirmed_join = Some(Instant::now());
                }
                return Err(e);
            }
        };

        match response {
            Response::Joined {
                token,
                entity,
                bounds,
                session_timeout_ms,
            } => {
                let session_timeout = Duration::from_millis(session_timeout_ms);
                self.server_session_timeout = Some(session_timeout);
                if self.server_timeout_is_short() {
                    warn!(
                        "Server session timeout {:?} is short for a {:?} push interval",
                        session_timeout,
                        self.config.push_interval()
                    );
                }
                info!(
                    "Joined as {} at ({}, {}) in a {}x{} world",
                    entity.id, entity.position.x, entity.position.y, bounds.width, bounds.height
                );

                self.reset_session_state();
                self.session = Some(ActiveSession { token, bounds });
                self.local = Some(entity);
                self.unconfirmed_join = None;
                self.state = LoopState::Active;
                Ok(())
            }
            Response::Error(SyncError::AlreadyJoined { .. }) if self.orphan_may_hold_name() => {
                // Our own earlier join probably succeeded; wait for it to expire
                self.state = LoopState::Disconnected;
                debug!("Name still held by an unconfirmed session; retrying");
                Ok(())
            }
            Response::Error(e) => {
                self.state = LoopState::Disconnected;
                Err(e.into())
            }
            other => {
                self.state = LoopState::Disconnected;
                Err(ClientError::UnexpectedResponse {
                    request: "JOIN",
                    response: other,
                })
            }
        }
    }

    /// Whether a session created by an unanswered join could still be live
    ///
    /// Such a session expires one session timeout after the server saw the
    /// join. Until the server has told us its timeout, assume the default.
    fn orphan_may_hold_name(&self) -> bool {
        let Some(gave_up) = self.unconfirmed_join else {
            return false;
        };
        let timeout = self.server_session_timeout.unwrap_or_else(|| {
            WorldConfig::default()
                .session_timeout
                .max(self.config.min_safe_session_timeout())
        });
        gave_up.elapsed() <= timeout + self.config.request_timeout
    }

    fn pull(&mut self) -> Result<(), ClientError> {
        let token = self.active_token()?;
        match self.transport.request(Request::Snapshot {
            token,
            include_self: true,
        })? {
            Response::Snapshot { entities } => {
                self.merge_snapshot(entities);
                Ok(())
            }
            Response::Error(SyncError::UnknownSession) => {
                self.expire();
                Ok(())
            }
            Response::Error(e) => Err(e.into()),
            other => Err(ClientError::UnexpectedResponse {
                request: "SNAPSHOT",
                response: other,
            }),
        }
    }

    /// Replaces remote state; our own entity only follows the server when
    /// nothing local is still waiting for acknowledgement.
    fn merge_snapshot(&mut self, entities: Vec<EntityView>) {
        let (mut own, others): (Vec<EntityView>, Vec<EntityView>) =
            entities.into_iter().partition(|entity| entity.id == self.name);
        self.others = others;

        if let Some(server_self) = own.pop() {
            match self.local.as_mut() {
                Some(local) => {
                    if self.pending_move.is_none() {
                        local.position = server_self.position;
                    }
                    if self.pending_color.is_none() {
                        local.color = server_self.color;
                    }
                }
                None => self.local = Some(server_self),
            }
        }
    }

    fn move_tick(&mut self) -> Result<(), ClientError> {
        let mut chosen = None;
        let mut deferred = VecDeque::new();

        for event in self.input.drain(..) {
            match event {
                InputEvent::ToggleAutoMove => {
                    self.auto_move = !self.auto_move;
                    info!("Auto-move: {}", self.auto_move);
                }
                InputEvent::RandomColor => {
                    self.pending_color = Some(Color::random(&mut self.rng));
                }
                InputEvent::Move(delta) if chosen.is_none() => chosen = Some(delta),
                InputEvent::Move(_) => deferred.push_back(event),
                InputEvent::Quit => {}
            }
        }
        self.input = deferred;

        if let Some(color) = self.pending_color {
            if let Some(local) = self.local.as_mut() {
                local.color = color;
            }
        }

        let pending = match self.pending_move {
            Some(retry) => {
                if let Some(delta) = chosen {
                    self.input.push_front(InputEvent::Move(delta));
                }
                Some(retry)
            }
            None => {
                let delta = if self.auto_move {
                    Some(MoveDelta::random(&mut self.rng))
                } else {
                    chosen
                };
                delta.map(|delta| self.predict(delta))
            }
        };

        if let Some(pending) = pending {
            self.send_move(pending)?;
        }
        if self.state == LoopState::Active {
            self.send_color()?;
        }
        Ok(())
    }

    /// Applies `delta` locally and records it as awaiting acknowledgement
    fn predict(&mut self, delta: MoveDelta) -> PendingMove {
        let pending = PendingMove {
            seq: self.next_seq,
            delta,
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        if let (Some(local), Some(session)) = (self.local.as_mut(), self.session) {
            local.position = local.position.step(delta, session.bounds);
        }
        self.pending_move = Some(pending);
        pending
    }

    fn send_move(&mut self, pending: PendingMove) -> Result<(), ClientError> {
        let token = self.active_token()?;
        let response = self.transport.request(Request::Move {
            token,
            dx: pending.delta.dx(),
            dy: pending.delta.dy(),
            seq: pending.seq,
        })?;

        match response {
            Response::Moved { position } => {
                self.pending_move = None;
                if let Some(local) = self.local.as_mut() {
                    local.position = position;
                }
                Ok(())
            }
            Response::Error(SyncError::StaleMove { expected, got }) => {
                // Either the move already landed or we skipped ahead; the next
                // snapshot carries the authoritative position.
                debug!("Move {} was stale, resuming at {}", got, expected);
                self.pending_move = None;
                self.next_seq = expected;
                Ok(())
            }
            Response::Error(SyncError::InvalidMove { dx, dy }) => {
                warn!("Server rejected move ({}, {})", dx, dy);
                self.pending_move = None;
                Ok(())
            }
            Response::Error(SyncError::UnknownSession) => {
                self.expire();
                Ok(())
            }
            Response::Error(e) => Err(e.into()),
            other => Err(ClientError::UnexpectedResponse {
                request: "MOVE",
                response: other,
            }),
        }
    }

    fn send_color(&mut self) -> Result<(), ClientError> {
        let Some(color) = self.pending_color else {
            return Ok(());
        };
        let token = self.active_token()?;
        let response = self.transport.request(Request::SetColor {
            token,
            rgb: color.components(),
        })?;

        match response {
            Response::ColorSet { color } => {
                self.pending_color = None;
                if let Some(local) = self.local.as_mut() {
                    local.color = color;
                }
                Ok(())
            }
            Response::Error(SyncError::UnknownSession) => {
                self.expire();
                Ok(())
            }
            Response::Error(SyncError::InvalidColor { rgb }) => {
                warn!("Server rejected color {:?}", rgb);
                self.pending_color = None;
                Ok(())
            }
            Response::Error(e) => Err(e.into()),
            other => Err(ClientError::UnexpectedResponse {
                request: "SET_COLOR",
                response: other,
            }),
        }
    }

    fn expire(&mut self) {
        warn!("Session for {} expired on the server; rejoining", self.name);
        self.session = None;
        self.reset_session_state();
        self.state = LoopState::Expired;
    }

    fn reset_session_state(&mut self) {
        self.local = None;
        self.others.clear();
        self.next_seq = 1;
        self.pending_move = None;
        self.pending_color = None;
        self.move_counter = 0;
    }

    fn active_token(&self) -> Result<SessionToken, ClientError> {
        self.session
            .map(|session| session.token)
            .ok_or(ClientError::Sync(SyncError::UnknownSession))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use server::protocol::SyncService;
    use server::store::EntityStore;
    use shared::{Position, WorldConfig};
    use std::sync::Arc;

    /// Calls the service in-process
    struct LocalTransport {
        service: Arc<SyncService>,
        /// Fail this many upcoming requests with a timeout, without delivering them
        drop_next: u32,
        /// Lose the next move before it reaches the service
        drop_next_move: bool,
        /// Deliver the next move but lose its reply
        lose_next_move_reply: bool,
        requests: Vec<&'static str>,
    }

    impl LocalTransport {
        fn new(service: &Arc<SyncService>) -> Self {
            Self {
                service: Arc::clone(service),
                drop_next: 0,
                drop_next_move: false,
                lose_next_move_reply: false,
                requests: Vec::new(),
            }
        }
    }

    impl Transport for LocalTransport {
        fn request(&mut self, request: Request) -> Result<Response, ClientError> {
            self.requests.push(request.kind());
            if self.drop_next > 0 {
                self.drop_next -= 1;
                return Err(SyncError::Timeout.into());
            }
            let is_move = matches!(request, Request::Move { .. });
            if is_move && self.drop_next_move {
                self.drop_next_move = false;
                return Err(SyncError::Timeout.into());
            }
            let response = self.service.handle(request);
            if is_move && self.lose_next_move_reply {
                self.lose_next_move_reply = false;
                return Err(SyncError::Timeout.into());
            }
            Ok(response)
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        frames: Vec<Vec<EntityView>>,
        warnings: Vec<u32>,
    }

    impl Display for RecordingDisplay {
        fn display(&mut self, entities: &[EntityView]) {
            self.frames.push(entities.to_vec());
        }

        fn connectivity_warning(&mut self, consecutive: u32) {
            self.warnings.push(consecutive);
        }
    }

    fn service() -> Arc<SyncService> {
        Arc::new(SyncService::new(
            Arc::new(EntityStore::new()),
            WorldConfig {
                world_width: 10,
                world_height: 10,
                ..WorldConfig::default()
            },
        ))
    }

    fn short_lived_service(timeout_ms: u64) -> Arc<SyncService> {
        Arc::new(SyncService::new(
            Arc::new(EntityStore::new()),
            WorldConfig {
                world_width: 10,
                world_height: 10,
                session_timeout: Duration::from_millis(timeout_ms),
                sweep_interval: Duration::from_millis(timeout_ms / 4),
                ..WorldConfig::default()
            },
        ))
    }

    fn config(k: u32, auto_move: bool) -> ClientConfig {
        ClientConfig {
            move_divisor_k: k,
            auto_move_default: auto_move,
            max_consecutive_timeouts: 3,
            ..ClientConfig::default()
        }
    }

    fn client(service: &Arc<SyncService>, name: &str, config: ClientConfig) -> ClientLoop<LocalTransport> {
        ClientLoop::new(LocalTransport::new(service), name, config).with_seed(11)
    }

    fn server_position(service: &SyncService, id: &str) -> Position {
        service.sessions().store().get(id).unwrap().position
    }

    fn pin(service: &SyncService, id: &str, position: Position) {
        service.sessions().store().upsert(id, Some(position), None);
    }

    #[test]
    fn test_pacer_skips_missed_ticks() {
        let start = Instant::now();
        let period = Duration::from_millis(100);
        let mut pacer = TickPacer::new(period, start);

        assert!(pacer.due(start));
        assert!(!pacer.due(start + Duration::from_millis(50)));
        assert!(pacer.due(start + Duration::from_millis(100)));
        // Far behind: one tick fires, the backlog is dropped
        assert!(pacer.due(start + Duration::from_millis(1000)));
        assert!(!pacer.due(start + Duration::from_millis(1050)));
        assert!(pacer.due(start + Duration::from_millis(1100)));
    }

    #[test]
    fn test_first_tick_joins_and_displays_self() {
        let service = service();
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        assert_eq!(client.state(), LoopState::Disconnected);
        assert_eq!(client.tick(&[], &mut display).unwrap(), TickOutcome::Continue);

        assert_eq!(client.state(), LoopState::Active);
        assert_eq!(client.bounds(), Some(WorldBounds::new(10, 10)));
        assert_eq!(display.frames.len(), 1);
        assert_eq!(display.frames[0].len(), 1);
        assert_eq!(display.frames[0][0].id, "alice");
        assert_eq!(client.transport().requests, vec!["JOIN", "SNAPSHOT"]);
    }

    #[test]
    fn test_moves_only_on_every_kth_tick() {
        let service = service();
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap(); // move counter 1
        pin(&service, "alice", Position::new(5, 5));

        client
            .tick(&[InputEvent::Move(MoveDelta::RIGHT)], &mut display)
            .unwrap(); // counter 2: buffered only
        assert_eq!(server_position(&service, "alice"), Position::new(5, 5));
        assert_eq!(client.local().unwrap().position, Position::new(5, 5));

        client.tick(&[], &mut display).unwrap(); // counter 3: move tick
        assert_eq!(server_position(&service, "alice"), Position::new(6, 5));
        assert_eq!(client.local().unwrap().position, Position::new(6, 5));

        let moves = client
            .transport()
            .requests
            .iter()
            .filter(|kind| **kind == "MOVE")
            .count();
        assert_eq!(moves, 1);
    }

    #[test]
    fn test_one_push_per_move_tick() {
        let service = service();
        let mut client = client(&service, "alice", config(1, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        pin(&service, "alice", Position::new(0, 0));

        let burst = [
            InputEvent::Move(MoveDelta::DOWN),
            InputEvent::Move(MoveDelta::DOWN),
        ];
        client.tick(&burst, &mut display).unwrap();
        assert_eq!(server_position(&service, "alice"), Position::new(0, 1));

        // The second press is applied on the following move tick
        client.tick(&[], &mut display).unwrap();
        assert_eq!(server_position(&service, "alice"), Position::new(0, 2));
    }

    #[test]
    fn test_auto_move_pushes_each_move_tick() {
        let service = service();
        let mut client = client(&service, "bot", config(1, true));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        let mut previous = server_position(&service, "bot");
        let bounds = WorldBounds::new(10, 10);

        for _ in 0..20 {
            client.tick(&[], &mut display).unwrap();
            let current = server_position(&service, "bot");
            let neighbours: Vec<Position> = MoveDelta::ALL
                .iter()
                .map(|delta| previous.step(*delta, bounds))
                .collect();
            assert!(neighbours.contains(&current), "{:?} -> {:?}", previous, current);
            previous = current;
        }
    }

    #[test]
    fn test_toggle_auto_move() {
        let service = service();
        let mut client = client(&service, "alice", config(1, false));
        let mut display = RecordingDisplay::default();

        client
            .tick(&[InputEvent::ToggleAutoMove], &mut display)
            .unwrap();
        assert!(client.auto_move());

        client
            .tick(&[InputEvent::ToggleAutoMove], &mut display)
            .unwrap();
        assert!(!client.auto_move());
    }

    #[test]
    fn test_quit_leaves_the_world() {
        let service = service();
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        assert!(service.sessions().is_joined("alice"));

        let outcome = client.tick(&[InputEvent::Quit], &mut display).unwrap();
        assert_eq!(outcome, TickOutcome::Quit);
        assert_eq!(client.state(), LoopState::Disconnected);
        assert!(!service.sessions().is_joined("alice"));
        assert!(service.sessions().store().is_empty());
    }

    #[test]
    fn test_lost_move_reply_is_not_applied_twice() {
        let service = service();
        let mut client = client(&service, "alice", config(1, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        pin(&service, "alice", Position::new(2, 2));
        client.tick(&[], &mut display).unwrap();

        client.transport_mut().lose_next_move_reply = true;
        client
            .tick(&[InputEvent::Move(MoveDelta::RIGHT)], &mut display)
            .unwrap();
        assert_eq!(server_position(&service, "alice"), Position::new(3, 2));
        assert_eq!(client.consecutive_failures(), 1);

        // The retry carries the same sequence number and is answered StaleMove
        client.tick(&[], &mut display).unwrap();
        assert_eq!(server_position(&service, "alice"), Position::new(3, 2));
        assert_eq!(client.local().unwrap().position, Position::new(3, 2));

        // Sequencing resumed correctly
        client
            .tick(&[InputEvent::Move(MoveDelta::RIGHT)], &mut display)
            .unwrap();
        assert_eq!(server_position(&service, "alice"), Position::new(4, 2));
    }

    #[test]
    fn test_dropped_move_is_retried() {
        let service = service();
        let mut client = client(&service, "alice", config(1, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        pin(&service, "alice", Position::new(2, 2));
        client.tick(&[], &mut display).unwrap();

        // Snapshot goes through, the move never reaches the server
        client.transport_mut().drop_next_move = true;
        client
            .tick(&[InputEvent::Move(MoveDelta::UP)], &mut display)
            .unwrap();
        assert_eq!(server_position(&service, "alice"), Position::new(2, 2));
        assert_eq!(client.local().unwrap().position, Position::new(2, 1));

        client.transport_mut().requests.clear();
        client.tick(&[], &mut display).unwrap();
        assert_eq!(server_position(&service, "alice"), Position::new(2, 1));
        assert_eq!(client.transport().requests, vec!["SNAPSHOT", "MOVE"]);
        assert_eq!(client.consecutive_failures(), 0);
    }

    #[test]
    fn test_timeouts_warn_but_never_stop_the_loop() {
        let service = service();
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        client.transport_mut().drop_next = 5;

        for _ in 0..5 {
            assert_eq!(client.tick(&[], &mut display).unwrap(), TickOutcome::Continue);
        }
        assert_eq!(display.warnings, vec![3, 4, 5]);
        assert_eq!(display.frames.len(), 6);
        assert_eq!(client.state(), LoopState::Active);

        client.tick(&[], &mut display).unwrap();
        assert_eq!(client.consecutive_failures(), 0);
        assert_eq!(display.warnings.len(), 3);
    }

    #[test]
    fn test_expired_session_rejoins() {
        let service = service();
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        let first_token = client.token().unwrap();

        let far_future = Instant::now() + Duration::from_secs(3600);
        assert_eq!(service.sweep(far_future), vec!["alice".to_string()]);

        client.tick(&[], &mut display).unwrap();
        assert_eq!(client.state(), LoopState::Expired);
        assert!(client.local().is_none());

        client.tick(&[], &mut display).unwrap();
        assert_eq!(client.state(), LoopState::Active);
        assert_ne!(client.token(), Some(first_token));
        assert!(service.sessions().is_joined("alice"));
    }

    #[test]
    fn test_name_taken_is_fatal() {
        let service = service();
        service.join("alice").unwrap();
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        let err = client.tick(&[], &mut display).unwrap_err();
        assert_eq!(
            err.sync_error(),
            Some(&SyncError::AlreadyJoined {
                id: "alice".to_string()
            })
        );
        assert_eq!(client.state(), LoopState::Disconnected);
    }

    #[test]
    fn test_unconfirmed_join_waits_for_expiry() {
        let service = service();
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        // Join timed out on our side, but pretend the server got it
        client.transport_mut().drop_next = 1;
        client.tick(&[], &mut display).unwrap();
        service.join("alice").unwrap();

        // AlreadyJoined is now expected and retried, not fatal
        client.tick(&[], &mut display).unwrap();
        assert_eq!(client.state(), LoopState::Disconnected);

        service.sweep(Instant::now() + Duration::from_secs(3600));
        client.tick(&[], &mut display).unwrap();
        assert_eq!(client.state(), LoopState::Active);
    }

    #[test]
    fn test_name_held_by_live_player_is_reported() {
        let service = short_lived_service(200);
        let mut client = client(&service, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        // A first join teaches the client the server's timeout
        client.tick(&[], &mut display).unwrap();
        assert_eq!(
            client.server_session_timeout(),
            Some(Duration::from_millis(200))
        );
        client.tick(&[InputEvent::Quit], &mut display).unwrap();

        // The next join goes unanswered while someone else takes the name
        client.transport_mut().drop_next = 1;
        client.tick(&[], &mut display).unwrap();
        let holder = service.join("alice").unwrap().token;

        let started = Instant::now();
        let err = loop {
            service.heartbeat(holder).unwrap();
            match client.tick(&[], &mut display) {
                Ok(_) => assert_eq!(client.state(), LoopState::Disconnected),
                Err(e) => break e,
            }
            assert!(
                started.elapsed() < Duration::from_secs(2),
                "taken name was never reported"
            );
            thread::sleep(Duration::from_millis(20));
        };

        assert_eq!(
            err.sync_error(),
            Some(&SyncError::AlreadyJoined {
                id: "alice".to_string()
            })
        );
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(service.sessions().is_joined("alice"));
    }

    #[test]
    fn test_short_server_timeout_is_flagged() {
        let hasty_server = short_lived_service(400);
        let mut hasty = client(&hasty_server, "alice", config(3, false));
        let mut display = RecordingDisplay::default();

        assert!(!hasty.server_timeout_is_short());
        hasty.tick(&[], &mut display).unwrap();
        assert_eq!(hasty.state(), LoopState::Active);
        assert_eq!(
            hasty.server_session_timeout(),
            Some(Duration::from_millis(400))
        );
        assert!(hasty.server_timeout_is_short());

        let patient_server = service();
        let mut patient = client(&patient_server, "bob", config(3, false));
        patient.tick(&[], &mut display).unwrap();
        assert!(!patient.server_timeout_is_short());
    }

    #[test]
    fn test_random_color_reaches_server() {
        let service = service();
        let mut client = client(&service, "alice", config(1, false));
        let mut display = RecordingDisplay::default();

        client.tick(&[], &mut display).unwrap();
        client.tick(&[InputEvent::RandomColor], &mut display).unwrap();

        let local = client.local().unwrap().color;
        assert_eq!(service.sessions().store().get("alice").unwrap().color, local);
    }

    #[test]
    fn test_sees_other_players() {
        let service = service();
        let mut alice = client(&service, "alice", config(1, false));
        let mut bob = client(&service, "bob", config(1, false));
        let mut display = RecordingDisplay::default();

        alice.tick(&[], &mut display).unwrap();
        bob.tick(&[], &mut display).unwrap();
        pin(&service, "bob", Position::new(7, 7));

        alice.tick(&[], &mut display).unwrap();
        assert_eq!(alice.others().len(), 1);
        assert_eq!(alice.others()[0].id, "bob");
        assert_eq!(alice.others()[0].position, Position::new(7, 7));

        let shown: Vec<String> = alice
            .visible_entities()
            .into_iter()
            .map(|entity| entity.id)
            .collect();
        assert_eq!(shown, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_run_blocking_stops_on_quit() {
        struct QuitAfter(u32);
        impl InputSource for QuitAfter {
            fn poll(&mut self) -> Vec<InputEvent> {
                if self.0 == 0 {
                    return vec![InputEvent::Quit];
                }
                self.0 -= 1;
                Vec::new()
            }
        }

        let service = service();
        let mut config = config(1, true);
        config.display_rate_hz = 200;
        let mut client = client(&service, "alice", config);
        let mut display = RecordingDisplay::default();

        client
            .run_blocking(&mut display, &mut QuitAfter(4))
            .unwrap();
        assert_eq!(display.frames.len(), 4);
        assert!(service.sessions().is_empty());
    }
}
