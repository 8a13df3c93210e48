//! Bounds-checked occupancy grid for static warehouse fixtures.
//!
//! Only fixtures (charging stations, racks) are placed here. Moving robots
//! are never marked, so two robots may share a cell.

use crate::types::{GridEntity, Point};

/// Fixed-size 2D grid of optional entity ids.
#[derive(Clone, Debug)]
pub struct GridModel {
    rows: usize,
    cols: usize,
    slots: Vec<Option<String>>,
}

impl GridModel {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            slots: vec![None; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn in_bounds(&self, row: i32, col: i32) -> bool {
        row >= 0 && (row as usize) < self.rows && col >= 0 && (col as usize) < self.cols
    }

    fn index(&self, point: Point) -> Option<usize> {
        if self.in_bounds(point.x, point.y) {
            Some(point.x as usize * self.cols + point.y as usize)
        } else {
            None
        }
    }

    /// In bounds and unoccupied.
    pub fn is_free(&self, point: Point) -> bool {
        self.index(point)
            .is_some_and(|idx| self.slots[idx].is_none())
    }

    /// Place an entity, overwriting whatever occupied the cell. Out-of-bounds
    /// placements are ignored and reported as `false`.
    pub fn place(&mut self, entity: &dyn GridEntity, point: Point) -> bool {
        match self.index(point) {
            Some(idx) => {
                self.slots[idx] = Some(entity.entity_id());
                true
            }
            None => {
                tracing::warn!(%point, entity = %entity.entity_id(), "placement outside grid ignored");
                false
            }
        }
    }

    /// Id of the entity occupying `point`, if any.
    pub fn at(&self, point: Point) -> Option<&str> {
        self.index(point).and_then(|idx| self.slots[idx].as_deref())
    }
}
