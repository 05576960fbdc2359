use macroquad::prelude::*;
use shared::{EntityView, WorldBounds};

/// Receives the entities to show after every tick
pub trait Display {
    /// Replaces what is shown with `entities`. Must accept an empty slice.
    fn display(&mut self, entities: &[EntityView]);

    /// Called once the loop has seen `consecutive` timeouts in a row
    fn connectivity_warning(&mut self, _consecutive: u32) {}
}

#[derive(Debug, Clone)]
pub struct HudState {
    pub name: String,
    pub auto_move: bool,
    pub connected: bool,
}

/// Draws the shared grid with macroquad
///
/// `display` only records the latest entities; `draw` must run every frame
/// because macroquad clears the screen between frames.
pub struct Renderer {
    entities: Vec<EntityView>,
    warning: Option<u32>,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            warning: None,
        }
    }

    pub fn draw(&self, bounds: Option<WorldBounds>, hud: &HudState) {
        clear_background(Color::from_rgba(26, 26, 26, 255));

        if let Some(bounds) = bounds {
            let cell = cell_size(screen_width(), screen_height() - 24.0, bounds);
            self.draw_world(bounds, cell, &hud.name);
        }

        self.draw_hud(hud);
    }

    fn draw_world(&self, bounds: WorldBounds, cell: f32, local_id: &str) {
        draw_rectangle_lines(
            0.0,
            24.0,
            bounds.width as f32 * cell,
            bounds.height as f32 * cell,
            1.0,
            Color::from_rgba(68, 68, 68, 255),
        );

        for entity in &self.entities {
            let x = entity.position.x as f32 * cell;
            let y = 24.0 + entity.position.y as f32 * cell;
            let c = entity.color;
            draw_rectangle(x, y, cell, cell, Color::from_rgba(c.r, c.g, c.b, 255));

            if entity.id == local_id {
                draw_rectangle_lines(x, y, cell, cell, 2.0, WHITE);
            }
        }
    }

    fn draw_hud(&self, hud: &HudState) {
        let status = if hud.connected { "online" } else { "offline" };
        let text = format!(
            "{} | {} | players: {} | auto-move: {} [A] | color [C] | quit [Q]",
            hud.name,
            status,
            self.entities.len(),
            if hud.auto_move { "on" } else { "off" },
        );
        draw_text(&text, 6.0, 17.0, 18.0, WHITE);

        if let Some(count) = self.warning {
            let warning = format!("Connection problems: {} requests timed out", count);
            draw_text(&warning, 6.0, screen_height() - 8.0, 18.0, YELLOW);
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Renderer {
    fn display(&mut self, entities: &[EntityView]) {
        self.entities = entities.to_vec();
        self.warning = None;
    }

    fn connectivity_warning(&mut self, consecutive: u32) {
        self.warning = Some(consecutive);
    }
}

/// Largest square cell that fits the whole world into the given area
pub fn cell_size(width: f32, height: f32, bounds: WorldBounds) -> f32 {
    let per_column = width / bounds.width.max(1) as f32;
    let per_row = height / bounds.height.max(1) as f32;
    per_column.min(per_row).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Position;

    #[test]
    fn test_cell_size_fits_smaller_axis() {
        assert_eq!(cell_size(800.0, 600.0, WorldBounds::new(80, 30)), 10.0);
        assert_eq!(cell_size(800.0, 600.0, WorldBounds::new(40, 60)), 10.0);
        assert_eq!(cell_size(10.0, 10.0, WorldBounds::new(1000, 1000)), 1.0);
    }

    #[test]
    fn test_display_accepts_empty_and_clears_warning() {
        let mut renderer = Renderer::new();
        renderer.connectivity_warning(12);
        assert_eq!(renderer.warning, Some(12));

        renderer.display(&[]);
        assert!(renderer.entities.is_empty());
        assert_eq!(renderer.warning, None);

        renderer.display(&[EntityView {
            id: "a".into(),
            position: Position::new(1, 2),
            color: shared::Color::WHITE,
        }]);
        assert_eq!(renderer.entities.len(), 1);
    }
}
