//! Wire protocol shared by server and client.
//!
//! Every datagram is one bincode-encoded [`Packet`]. Requests carry a
//! client-chosen id that the server echoes back, so a client can tell a late
//! reply to an abandoned request from the reply it is waiting for.

use crate::{
    Color, EntityView, Position, SessionToken, SyncError, WorldBounds, MAX_DATAGRAM_SIZE,
    MAX_ID_LEN,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Request { id: u32, body: Request },
    Response { id: u32, body: Response },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Join {
        id: String,
    },
    Move {
        token: SessionToken,
        dx: i32,
        dy: i32,
        seq: u32,
    },
    SetColor {
        token: SessionToken,
        rgb: [i32; 3],
    },
    Snapshot {
        token: SessionToken,
        include_self: bool,
    },
    Heartbeat {
        token: SessionToken,
    },
    Leave {
        token: SessionToken,
    },
}

impl Request {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Join { .. } => "JOIN",
            Request::Move { .. } => "MOVE",
            Request::SetColor { .. } => "SET_COLOR",
            Request::Snapshot { .. } => "SNAPSHOT",
            Request::Heartbeat { .. } => "HEARTBEAT",
            Request::Leave { .. } => "LEAVE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Joined {
        token: SessionToken,
        entity: EntityView,
        bounds: WorldBounds,
        session_timeout_ms: u64,
    },
    Moved {
        position: Position,
    },
    ColorSet {
        color: Color,
    },
    Snapshot {
        entities: Vec<EntityView>,
    },
    Ok,
    Error(SyncError),
}

/// Largest number of entities whose snapshot reply always fits in one datagram
///
/// Sized for the widest possible entity: an id of `MAX_ID_LEN` four-byte
/// characters.
pub fn max_snapshot_entities() -> usize {
    let widest = widest_entity();
    let empty = Packet::Response {
        id: u32::MAX,
        body: Response::Snapshot {
            entities: Vec::new(),
        },
    };

    match (
        bincode::serialized_size(&widest),
        bincode::serialized_size(&empty),
    ) {
        (Ok(per_entity), Ok(header)) if per_entity > 0 => {
            let room = (MAX_DATAGRAM_SIZE as u64).saturating_sub(header);
            usize::try_from(room / per_entity).unwrap_or(usize::MAX)
        }
        _ => 0,
    }
}

fn widest_entity() -> EntityView {
    EntityView {
        id: char::MAX.to_string().repeat(MAX_ID_LEN),
        position: Position::new(u32::MAX, u32::MAX),
        color: Color::WHITE,
    }
}

impl From<Result<Response, SyncError>> for Response {
    fn from(result: Result<Response, SyncError>) -> Self {
        result.unwrap_or_else(Response::Error)
    }
}
