//! Shared identifiers, grid coordinates and the task/order model.

use serde::{Deserialize, Serialize};

/// Unique identifier for a task in the store.
pub type TaskId = u64;
/// Unique identifier for a robot control loop.
pub type RobotId = u64;
/// Unique identifier for a charging station.
pub type StationId = u64;

/// Grid coordinate. `x` indexes rows, `y` indexes columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// |dx| + |dy|.
    pub fn manhattan(&self, other: &Point) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Anything with a fixed identity and a location on the grid.
pub trait GridEntity {
    fn location(&self) -> Point;
    fn entity_id(&self) -> String;
}

/// Lifecycle status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A stored item, optionally tied to the storage unit it lives in.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub storage_unit_id: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
            storage_unit_id: None,
        }
    }

    pub fn stored_in(mut self, storage_unit_id: impl Into<String>) -> Self {
        self.storage_unit_id = Some(storage_unit_id.into());
        self
    }
}

/// A customer order: a bag of items that become one task each.
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: String,
    pub items: Vec<Item>,
}

impl Order {
    pub fn new(id: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            id: id.into(),
            items,
        }
    }
}

/// Unit of work assigned to robots.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    /// Stable task identifier.
    pub id: TaskId,
    /// Pickup point; `None` means the item is picked up wherever the robot stands.
    pub destination: Option<Point>,
    pub item: Option<Item>,
    pub order_id: Option<String>,
    pub status: TaskStatus,
    pub robot_id: Option<RobotId>,
    /// Number of times the task was handed to a robot by battery-aware assignment.
    pub attempts: u32,
}

impl Task {
    /// Construct a pending task with no item or order attached.
    pub fn new(id: TaskId, destination: Option<Point>) -> Self {
        Self {
            id,
            destination,
            item: None,
            order_id: None,
            status: TaskStatus::Pending,
            robot_id: None,
            attempts: 0,
        }
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan_is_symmetric() {
        let a = Point::new(0, 0);
        let b = Point::new(2, -3);
        assert_eq!(a.manhattan(&b), 5);
        assert_eq!(b.manhattan(&a), 5);
    }

    #[test]
    fn new_task_is_pending_without_robot() {
        let task = Task::new(4, Some(Point::new(1, 2))).with_order("o-1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.robot_id, None);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.order_id.as_deref(), Some("o-1"));
    }
}
