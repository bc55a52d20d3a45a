//! Pointer overlay drawn on top of the sandbox during replay.

use serde::Serialize;

use crate::dom::Point;

use super::SandboxGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClickMarker {
    pub position: Point,
    /// Index of the click event that produced the marker
    pub event_index: usize,
}

/// Last replayed pointer position, in container coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CursorOverlay {
    visible: bool,
    position: Option<Point>,
    last_click: Option<ClickMarker>,
}

impl CursorOverlay {
    pub fn new(visible: bool) -> Self {
        Self {
            visible,
            ..Self::default()
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn position(&self) -> Option<Point> {
        self.position
    }

    pub fn last_click(&self) -> Option<ClickMarker> {
        self.last_click
    }

    pub fn move_to(&mut self, point: Point, geometry: &SandboxGeometry) {
        self.position = Some(geometry.project(point));
    }

    pub fn click(&mut self, point: Point, event_index: usize, geometry: &SandboxGeometry) {
        let position = geometry.project(point);
        self.position = Some(position);
        self.last_click = Some(ClickMarker {
            position,
            event_index,
        });
    }

    pub fn reset(&mut self) {
        self.position = None;
        self.last_click = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_projected_into_the_container() {
        let geometry = SandboxGeometry {
            scale: 0.5,
            offset_x: 10.0,
            offset_y: 0.0,
            width: 800.0,
            height: 600.0,
        };
        let mut cursor = CursorOverlay::new(true);
        cursor.move_to(Point::new(100.0, 40.0), &geometry);
        assert_eq!(cursor.position(), Some(Point::new(60.0, 20.0)));

        cursor.click(Point::new(0.0, 0.0), 7, &geometry);
        let marker = cursor.last_click().unwrap();
        assert_eq!(marker.event_index, 7);
        assert_eq!(marker.position, Point::new(10.0, 0.0));

        cursor.reset();
        assert_eq!(cursor.position(), None);
        assert!(cursor.is_visible());
    }
}
