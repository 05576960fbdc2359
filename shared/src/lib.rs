use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod protocol;

pub use config::{ClientConfig, ConfigError, WorldConfig};
pub use error::SyncError;
pub use protocol::{Packet, Request, Response};

pub const DEFAULT_WORLD_WIDTH: u32 = 64;
pub const DEFAULT_WORLD_HEIGHT: u32 = 48;
pub const MAX_ID_LEN: usize = 32;
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Opaque handle identifying a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(pub u64);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub width: u32,
    pub height: u32,
}

impl WorldBounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn contains(&self, position: Position) -> bool {
        position.x < self.width && position.y < self.height
    }

    pub fn random_position<R: Rng + ?Sized>(&self, rng: &mut R) -> Position {
        Position {
            x: rng.gen_range(0..self.width),
            y: rng.gen_range(0..self.height),
        }
    }
}

/// Grid cell occupied by an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Applies a unit step, wrapping around the world edges.
    pub fn step(self, delta: MoveDelta, bounds: WorldBounds) -> Position {
        Position {
            x: wrap(self.x, delta.dx(), bounds.width),
            y: wrap(self.y, delta.dy(), bounds.height),
        }
    }
}

fn wrap(value: u32, delta: i32, size: u32) -> u32 {
    (i64::from(value) + i64::from(delta)).rem_euclid(i64::from(size)) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Builds a color from untrusted wire components, each of which must lie in `[0, 255]`.
    pub fn from_components(rgb: [i32; 3]) -> Result<Self, SyncError> {
        let channel = |c: i32| u8::try_from(c).map_err(|_| SyncError::InvalidColor { rgb });
        Ok(Self {
            r: channel(rgb[0])?,
            g: channel(rgb[1])?,
            b: channel(rgb[2])?,
        })
    }

    pub fn components(&self) -> [i32; 3] {
        [i32::from(self.r), i32::from(self.g), i32::from(self.b)]
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(rng.gen(), rng.gen(), rng.gen())
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// A validated unit step: exactly one axis moves by exactly one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDelta {
    dx: i8,
    dy: i8,
}

impl MoveDelta {
    pub const UP: MoveDelta = MoveDelta { dx: 0, dy: -1 };
    pub const DOWN: MoveDelta = MoveDelta { dx: 0, dy: 1 };
    pub const LEFT: MoveDelta = MoveDelta { dx: -1, dy: 0 };
    pub const RIGHT: MoveDelta = MoveDelta { dx: 1, dy: 0 };
    pub const ALL: [MoveDelta; 4] = [Self::UP, Self::DOWN, Self::LEFT, Self::RIGHT];

    pub fn new(dx: i32, dy: i32) -> Result<Self, SyncError> {
        let unit = |v: i32| (-1..=1).contains(&v);
        if !unit(dx) || !unit(dy) || dx.abs() + dy.abs() != 1 {
            return Err(SyncError::InvalidMove { dx, dy });
        }
        Ok(Self {
            dx: dx as i8,
            dy: dy as i8,
        })
    }

    pub fn dx(&self) -> i32 {
        i32::from(self.dx)
    }

    pub fn dy(&self) -> i32 {
        i32::from(self.dy)
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// Public state of one entity as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: String,
    pub position: Position,
    pub color: Color,
}

/// Checks a player name before it becomes an entity id.
pub fn validate_id(id: &str) -> Result<(), SyncError> {
    let len = id.chars().count();
    if len == 0 || len > MAX_ID_LEN || id.chars().any(char::is_control) {
        return Err(SyncError::InvalidId { id: id.to_string() });
    }
    Ok(())
}
