//! Map geometry and the collision oracle.
//!
//! The wall layout is opaque data as far as the rest of the server is
//! concerned: the position-update path only asks whether an actor rectangle
//! overlaps any obstacle rectangle.

use crate::game::constants::{actor, station};
use crate::util::vec2::Vec2;

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Square rectangle centered on a position
    pub fn centered(center: Vec2, size: f32) -> Self {
        Self {
            x: center.x - size / 2.0,
            y: center.y - size / 2.0,
            w: size,
            h: size,
        }
    }

    /// Strict AABB overlap; rectangles that merely touch do not collide
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }
}

/// Whether an actor rectangle overlaps any obstacle
pub fn collides(actor: &Rect, obstacles: &[Rect]) -> bool {
    obstacles.iter().any(|o| actor.overlaps(o))
}

/// Static geometry snapshot held by each lobby
#[derive(Debug, Clone)]
pub struct MapGeometry {
    /// Solid walls every role collides with
    pub walls: Vec<Rect>,
    /// Window walls; GOATs pass through these
    pub window_walls: Vec<Rect>,
    /// Playable x range; a GOAT outside it has escaped (once the door is open)
    pub bounds_x: (f32, f32),
    /// One spawn point per member slot
    pub spawn_points: [Vec2; crate::game::constants::lobby::CAPACITY],
    /// Holding location for caught players
    pub jail: Vec2,
    /// Where caught GOATs are revived to when the door opens
    pub rally_point: Vec2,
    /// Revival station coordinates, indexed by station id
    pub stations: [Vec2; station::COUNT],
}

impl MapGeometry {
    /// Collision box for a player at the given position
    pub fn actor_rect(position: Vec2) -> Rect {
        Rect::centered(position, actor::PLAYER_SIZE)
    }

    /// Station within activation radius of the position, if any
    pub fn station_in_range(&self, position: Vec2) -> Option<usize> {
        self.stations
            .iter()
            .position(|s| position.distance_to(*s) <= station::RADIUS)
    }

    /// Whether an x coordinate lies outside the playable bounds
    pub fn out_of_bounds(&self, x: f32) -> bool {
        x < self.bounds_x.0 || x > self.bounds_x.1
    }
}

impl Default for MapGeometry {
    fn default() -> Self {
        Self {
            walls: vec![
                // Perimeter, with a gap in the right wall for the exit door
                Rect::new(0.0, 0.0, 800.0, 16.0),
                Rect::new(0.0, 584.0, 800.0, 16.0),
                Rect::new(0.0, 0.0, 16.0, 600.0),
                Rect::new(784.0, 0.0, 16.0, 260.0),
                Rect::new(784.0, 340.0, 16.0, 260.0),
                // Interior partitions
                Rect::new(250.0, 16.0, 16.0, 220.0),
                Rect::new(250.0, 380.0, 16.0, 204.0),
                Rect::new(500.0, 200.0, 16.0, 200.0),
            ],
            window_walls: vec![
                Rect::new(250.0, 236.0, 16.0, 144.0),
                Rect::new(500.0, 80.0, 16.0, 120.0),
            ],
            bounds_x: (0.0, 800.0),
            spawn_points: [
                Vec2::new(60.0, 300.0),
                Vec2::new(120.0, 120.0),
                Vec2::new(120.0, 480.0),
                Vec2::new(180.0, 300.0),
            ],
            jail: Vec2::new(700.0, 60.0),
            rally_point: Vec2::new(400.0, 300.0),
            stations: [Vec2::new(120.0, 520.0), Vec2::new(680.0, 520.0)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn test_no_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 0.0, 10.0, 10.0);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_touching_edges_do_not_collide() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_collides_any() {
        let actor = Rect::new(0.0, 0.0, 10.0, 10.0);
        let clear = vec![Rect::new(50.0, 50.0, 5.0, 5.0)];
        let blocked = vec![Rect::new(50.0, 50.0, 5.0, 5.0), Rect::new(5.0, 5.0, 5.0, 5.0)];
        assert!(!collides(&actor, &clear));
        assert!(collides(&actor, &blocked));
    }

    #[test]
    fn test_centered() {
        let r = Rect::centered(Vec2::new(100.0, 100.0), 32.0);
        assert_eq!(r.x, 84.0);
        assert_eq!(r.y, 84.0);
        assert_eq!(r.w, 32.0);
    }

    #[test]
    fn test_spawn_points_are_clear() {
        let map = MapGeometry::default();
        for spawn in map.spawn_points {
            let rect = MapGeometry::actor_rect(spawn);
            assert!(!collides(&rect, &map.walls), "spawn {:?} inside a wall", spawn);
            assert!(!collides(&rect, &map.window_walls));
        }
    }

    #[test]
    fn test_jail_and_rally_are_clear() {
        let map = MapGeometry::default();
        for pos in [map.jail, map.rally_point] {
            let rect = MapGeometry::actor_rect(pos);
            assert!(!collides(&rect, &map.walls));
            assert!(!collides(&rect, &map.window_walls));
        }
    }

    #[test]
    fn test_station_in_range() {
        let map = MapGeometry::default();
        assert_eq!(map.station_in_range(map.stations[0]), Some(0));
        assert_eq!(map.station_in_range(map.stations[1]), Some(1));
        assert_eq!(map.station_in_range(Vec2::new(400.0, 100.0)), None);
    }

    #[test]
    fn test_out_of_bounds() {
        let map = MapGeometry::default();
        assert!(map.out_of_bounds(-1.0));
        assert!(map.out_of_bounds(801.0));
        assert!(!map.out_of_bounds(400.0));
    }
}
