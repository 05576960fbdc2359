//! Keyboard input mapped to client loop events

use macroquad::prelude::*;
use shared::MoveDelta;

/// Local input understood by the client loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Move(MoveDelta),
    ToggleAutoMove,
    RandomColor,
    Quit,
}

/// Maps a pressed key to an event: arrows move, `A` toggles auto-move,
/// `C` picks a new color, `Q`/`Escape` quits.
pub fn map_key(key: KeyCode) -> Option<InputEvent> {
    match key {
        KeyCode::Up => Some(InputEvent::Move(MoveDelta::UP)),
        KeyCode::Down => Some(InputEvent::Move(MoveDelta::DOWN)),
        KeyCode::Left => Some(InputEvent::Move(MoveDelta::LEFT)),
        KeyCode::Right => Some(InputEvent::Move(MoveDelta::RIGHT)),
        KeyCode::A => Some(InputEvent::ToggleAutoMove),
        KeyCode::C => Some(InputEvent::RandomColor),
        KeyCode::Q | KeyCode::Escape => Some(InputEvent::Quit),
        _ => None,
    }
}

/// Collects key presses every frame and hands them out once per tick
///
/// Frames run faster than ticks, so presses are buffered until the client
/// loop drains them.
pub struct InputManager {
    pending: Vec<InputEvent>,
}

impl InputManager {
    pub fn new() -> Self {
        prevent_quit();
        Self {
            pending: Vec::new(),
        }
    }

    /// Samples this frame's key presses and window close requests
    pub fn collect(&mut self) {
        let mut keys: Vec<KeyCode> = get_keys_pressed().into_iter().collect();
        // HashSet order is arbitrary; keep a stable order within a frame
        keys.sort_by_key(|key| *key as u16);
        self.pending.extend(keys.into_iter().filter_map(map_key));

        if is_quit_requested() {
            self.pending.push(InputEvent::Quit);
        }
    }

    pub fn drain(&mut self) -> Vec<InputEvent> {
        std::mem::take(&mut self.pending)
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
