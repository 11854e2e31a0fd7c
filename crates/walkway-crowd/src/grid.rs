//! Uniform proximity grid rebuilt once per simulation tick.

use glam::Vec3;
use std::collections::HashMap;

/// One registered item (an agent) in the grid.
#[derive(Debug, Clone, Copy)]
pub struct GridItem {
    /// Owner id.
    pub id: usize,
    /// Position snapshot at registration time.
    pub pos: Vec3,
    /// Radius of the owner.
    pub radius: f32,
}

/// Spatial hash over the XZ plane.
#[derive(Debug)]
pub struct ProximityGrid {
    cell_size: f32,
    inv_cell_size: f32,
    cells: HashMap<(i32, i32), Vec<GridItem>>,
}

impl ProximityGrid {
    /// Creates a grid with the given cell size.
    pub fn new(cell_size: f32) -> Self {
        let cell_size = cell_size.max(0.01);
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::new(),
        }
    }

    /// Cell size the grid was built with.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Drops every item; called at the start of a tick.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    #[inline]
    fn cell_of(&self, x: f32, z: f32) -> (i32, i32) {
        (
            (x * self.inv_cell_size).floor() as i32,
            (z * self.inv_cell_size).floor() as i32,
        )
    }

    /// Registers an item over every cell its radius touches.
    pub fn add(&mut self, item: GridItem) {
        let (min_x, min_z) = self.cell_of(item.pos.x - item.radius, item.pos.z - item.radius);
        let (max_x, max_z) = self.cell_of(item.pos.x + item.radius, item.pos.z + item.radius);
        for z in min_z..=max_z {
            for x in min_x..=max_x {
                self.cells.entry((x, z)).or_default().push(item);
            }
        }
    }

    /// Items within `radius` of a position, deduplicated.
    pub fn query(&self, pos: Vec3, radius: f32) -> Vec<GridItem> {
        let (min_x, min_z) = self.cell_of(pos.x - radius, pos.z - radius);
        let (max_x, max_z) = self.cell_of(pos.x + radius, pos.z + radius);

        let mut seen = Vec::new();
        let mut out = Vec::new();
        for z in min_z..=max_z {
            for x in min_x..=max_x {
                let Some(items) = self.cells.get(&(x, z)) else {
                    continue;
                };
                for item in items {
                    if seen.contains(&item.id) {
                        continue;
                    }
                    let d = walkway_common::dist_sqr_2d(item.pos, pos);
                    let r = radius + item.radius;
                    if d <= r * r {
                        seen.push(item.id);
                        out.push(*item);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_finds_nearby_items() {
        let mut grid = ProximityGrid::new(2.0);
        grid.add(GridItem {
            id: 0,
            pos: Vec3::new(1.0, 0.0, 1.0),
            radius: 0.5,
        });
        grid.add(GridItem {
            id: 1,
            pos: Vec3::new(10.0, 0.0, 10.0),
            radius: 0.5,
        });

        let near = grid.query(Vec3::new(1.5, 0.0, 1.5), 1.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].id, 0);
    }

    #[test]
    fn test_query_deduplicates_spanning_items() {
        let mut grid = ProximityGrid::new(1.0);
        // Radius large enough to span several cells.
        grid.add(GridItem {
            id: 7,
            pos: Vec3::new(0.0, 0.0, 0.0),
            radius: 3.0,
        });
        let near = grid.query(Vec3::ZERO, 5.0);
        assert_eq!(near.len(), 1);
    }

    #[test]
    fn test_clear_empties_grid() {
        let mut grid = ProximityGrid::new(1.0);
        grid.add(GridItem {
            id: 0,
            pos: Vec3::ZERO,
            radius: 1.0,
        });
        grid.clear();
        assert!(grid.query(Vec3::ZERO, 10.0).is_empty());
    }
}
