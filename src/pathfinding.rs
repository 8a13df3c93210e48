//! A* path planner over the warehouse grid.
//!
//! 4-connected moves with unit cost and a Manhattan heuristic. The goal cell
//! is always enterable even when a fixture occupies it, so robots can path
//! onto charging stations.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::grid::GridModel;
use crate::types::Point;

/// Ordered cells from start to goal, both included.
pub type Path = VecDeque<Point>;

/// Route planning seam used by robot agents.
pub trait PathPlanner: Send + Sync {
    /// Plan a route. `None` means the goal is unreachable, which callers
    /// treat as a recoverable condition.
    fn find_path(&self, start: Point, goal: Point) -> Option<Path>;
}

#[derive(Clone, Debug)]
struct SearchNode {
    point: Point,
    f_score: u32,
    /// Insertion sequence; breaks f-score ties so results are reproducible.
    seq: u64,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.f_score == other.f_score && self.seq == other.seq
    }
}

impl Eq for SearchNode {}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: lowest f first, then earliest insertion.
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A* planner reading a frozen grid.
#[derive(Clone, Debug)]
pub struct AStarPlanner {
    grid: Arc<GridModel>,
}

impl AStarPlanner {
    pub fn new(grid: Arc<GridModel>) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &GridModel {
        &self.grid
    }

    fn neighbors(&self, point: Point) -> impl Iterator<Item = Point> + '_ {
        [(0, 1), (0, -1), (1, 0), (-1, 0)]
            .into_iter()
            .map(move |(dx, dy)| Point::new(point.x + dx, point.y + dy))
            .filter(|p| self.grid.in_bounds(p.x, p.y))
    }

    fn reconstruct(parent: &HashMap<Point, Point>, end: Point) -> Path {
        let mut path = VecDeque::new();
        let mut current = end;
        path.push_front(current);
        while let Some(&prev) = parent.get(&current) {
            path.push_front(prev);
            current = prev;
        }
        path
    }
}

impl PathPlanner for AStarPlanner {
    fn find_path(&self, start: Point, goal: Point) -> Option<Path> {
        let mut open_set = BinaryHeap::new();
        let mut g_score: HashMap<Point, u32> = HashMap::new();
        let mut parent: HashMap<Point, Point> = HashMap::new();
        let mut closed: HashSet<Point> = HashSet::new();
        let mut seq = 0u64;

        g_score.insert(start, 0);
        open_set.push(SearchNode {
            point: start,
            f_score: start.manhattan(&goal),
            seq,
        });

        while let Some(node) = open_set.pop() {
            let current = node.point;
            if current == goal {
                return Some(Self::reconstruct(&parent, current));
            }
            // Stale heap entries for already-expanded cells.
            if !closed.insert(current) {
                continue;
            }

            let current_g = g_score.get(&current).copied().unwrap_or(u32::MAX);
            for neighbor in self.neighbors(current) {
                if neighbor != goal && !self.grid.is_free(neighbor) {
                    continue;
                }
                if closed.contains(&neighbor) {
                    continue;
                }
                let tentative = current_g + 1;
                if tentative < g_score.get(&neighbor).copied().unwrap_or(u32::MAX) {
                    g_score.insert(neighbor, tentative);
                    parent.insert(neighbor, current);
                    seq += 1;
                    open_set.push(SearchNode {
                        point: neighbor,
                        f_score: tentative + neighbor.manhattan(&goal),
                        seq,
                    });
                }
            }
        }

        tracing::debug!(%start, %goal, "no path found");
        None
    }
}
