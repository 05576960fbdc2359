//! Authoritative in-memory entity state.
//!
//! The store is the only shared mutable resource on the server. A single
//! `RwLock` guards the whole map; every operation holds it for a bounded,
//! I/O-free critical section so readers always see whole entities.

use parking_lot::RwLock;
use shared::{Color, EntityView, MoveDelta, Position, WorldBounds};
use std::collections::HashMap;
use std::time::Instant;

/// Server-side record for one player
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub position: Position,
    pub color: Color,
    /// Last time any request touched this entity
    pub last_seen: Instant,
}

impl Entity {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            position: Position::default(),
            color: Color::default(),
            last_seen: Instant::now(),
        }
    }

    pub fn view(&self) -> EntityView {
        EntityView {
            id: self.id.clone(),
            position: self.position,
            color: self.color,
        }
    }
}

#[derive(Debug, Default)]
pub struct EntityStore {
    entities: RwLock<HashMap<String, Entity>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the provided fields into the entity, creating it if needed
    ///
    /// Fields passed as `None` keep their previous value (or the default for
    /// a fresh entity). Always refreshes `last_seen`.
    pub fn upsert(&self, id: &str, position: Option<Position>, color: Option<Color>) -> Entity {
        let mut entities = self.entities.write();
        let entity = entities
            .entry(id.to_string())
            .or_insert_with(|| Entity::new(id));

        if let Some(position) = position {
            entity.position = position;
        }
        if let Some(color) = color {
            entity.color = color;
        }
        entity.last_seen = Instant::now();
        entity.clone()
    }

    /// Moves an existing entity by one wrapped step
    ///
    /// The read-modify-write happens under one write lock so concurrent moves
    /// of the same entity never lose an update. Returns `None` when the entity
    /// is absent; moves never create entities.
    pub fn translate(&self, id: &str, delta: MoveDelta, bounds: WorldBounds) -> Option<Position> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(id)?;
        entity.position = entity.position.step(delta, bounds);
        entity.last_seen = Instant::now();
        Some(entity.position)
    }

    pub fn touch(&self, id: &str) -> bool {
        match self.entities.write().get_mut(id) {
            Some(entity) => {
                entity.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Entity> {
        self.entities.read().get(id).cloned()
    }

    /// Point-in-time copy of every entity, ordered by id
    pub fn get_all(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Removes an entity. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.entities.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}
