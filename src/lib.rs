//! Warehouse robot fleet: battery-aware task assignment, A* routing, a
//! bounded charging pool and one control loop per robot.

pub mod charging;
pub mod config;
pub mod error;
pub mod grid;
pub mod logging;
pub mod pathfinding;
pub mod robot;
pub mod sim;
pub mod task_store;
pub mod types;
pub mod warehouse;

pub use charging::{ChargingPool, ChargingStation, StationGrant};
pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use grid::GridModel;
pub use pathfinding::{AStarPlanner, Path, PathPlanner};
pub use robot::{RobotAgent, RobotHandle, RobotSnapshot, RobotState, WorkingState};
pub use task_store::{AssignmentPolicy, ListenerId, OrderObserver, StorageLocator, TaskListener, TaskStore};
pub use types::{GridEntity, Item, Order, Point, RobotId, StationId, Task, TaskId, TaskStatus};
pub use warehouse::{StopSignal, Warehouse};
