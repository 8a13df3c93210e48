//! Fleet configuration loaded from TOML.
//!
//! Every field has a serde default, so a partial file (or none at all) yields
//! the stock 10x10 warehouse with five robots and two chargers.

use std::path::Path;

use serde::Deserialize;

use crate::error::{FleetError, Result};
use crate::task_store::AssignmentPolicy;
use crate::types::Point;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
}

/// Grid dimensions.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GridConfig {
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_cols")]
    pub cols: usize,
}

/// Fixed warehouse locations.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LayoutConfig {
    /// Where robots start and return between jobs.
    #[serde(default = "default_idle")]
    pub idle: Point,
    #[serde(default = "default_drop_off")]
    pub drop_off: Point,
    /// Location of every charging station.
    #[serde(default = "default_charging")]
    pub charging: Point,
    /// Number of stations placed at `charging`.
    #[serde(default = "default_stations")]
    pub stations: usize,
}

/// Robot physics and control-loop pacing.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RobotConfig {
    #[serde(default = "default_count")]
    pub count: usize,
    /// Control-loop period in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_max_battery")]
    pub max_battery: f64,
    /// Below this level a robot abandons its task and seeks a charger.
    #[serde(default = "default_low_battery")]
    pub low_battery_threshold: f64,
    #[serde(default = "default_cost_per_move")]
    pub battery_cost_per_move: f64,
    #[serde(default = "default_charge_rate")]
    pub charge_rate_per_tick: f64,
    /// How long a robot waits in the charging queue before giving up.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

/// Assignment policy knobs.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TasksConfig {
    #[serde(default = "default_move_cost")]
    pub move_cost_per_block: f64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default = "default_max_attempts")]
    pub max_assign_attempts: u32,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            idle: default_idle(),
            drop_off: default_drop_off(),
            charging: default_charging(),
            stations: default_stations(),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            tick_ms: default_tick_ms(),
            max_battery: default_max_battery(),
            low_battery_threshold: default_low_battery(),
            battery_cost_per_move: default_cost_per_move(),
            charge_rate_per_tick: default_charge_rate(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            move_cost_per_block: default_move_cost(),
            safety_margin: default_safety_margin(),
            max_assign_attempts: default_max_attempts(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl From<&TasksConfig> for AssignmentPolicy {
    fn from(cfg: &TasksConfig) -> Self {
        AssignmentPolicy {
            move_cost_per_block: cfg.move_cost_per_block,
            safety_margin: cfg.safety_margin,
            max_assign_attempts: cfg.max_assign_attempts,
            history_capacity: cfg.history_capacity,
        }
    }
}

// Default value functions
fn default_rows() -> usize {
    10
}
fn default_cols() -> usize {
    10
}
fn default_idle() -> Point {
    Point::new(3, 1)
}
fn default_drop_off() -> Point {
    Point::new(1, 1)
}
fn default_charging() -> Point {
    Point::new(2, 1)
}
fn default_stations() -> usize {
    2
}
fn default_count() -> usize {
    5
}
fn default_tick_ms() -> u64 {
    1000
}
fn default_max_battery() -> f64 {
    100.0
}
fn default_low_battery() -> f64 {
    50.0
}
fn default_cost_per_move() -> f64 {
    3.0
}
fn default_charge_rate() -> f64 {
    4.0
}
fn default_max_wait_ms() -> u64 {
    30_000
}
fn default_move_cost() -> f64 {
    0.5
}
fn default_safety_margin() -> f64 {
    8.0
}
fn default_max_attempts() -> u32 {
    3
}
fn default_history_capacity() -> usize {
    1000
}

impl FleetConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts the fleet cannot operate in.
    pub fn validate(&self) -> Result<()> {
        if self.grid.rows == 0 || self.grid.cols == 0 {
            return Err(FleetError::Config("grid must have at least one cell".into()));
        }
        let in_grid = |p: Point| {
            p.x >= 0 && (p.x as usize) < self.grid.rows && p.y >= 0 && (p.y as usize) < self.grid.cols
        };
        for (name, point) in [
            ("idle", self.layout.idle),
            ("drop_off", self.layout.drop_off),
            ("charging", self.layout.charging),
        ] {
            if !in_grid(point) {
                return Err(FleetError::Config(format!(
                    "layout.{name} {point} is outside the {}x{} grid",
                    self.grid.rows, self.grid.cols
                )));
            }
        }
        if self.robot.count == 0 {
            return Err(FleetError::Config("robot.count must be positive".into()));
        }
        if self.robot.tick_ms == 0 {
            return Err(FleetError::Config("robot.tick_ms must be positive".into()));
        }
        if self.robot.max_battery <= 0.0 {
            return Err(FleetError::Config("robot.max_battery must be positive".into()));
        }
        if !(0.0..=self.robot.max_battery).contains(&self.robot.low_battery_threshold) {
            return Err(FleetError::Config(format!(
                "robot.low_battery_threshold {} outside 0..={}",
                self.robot.low_battery_threshold, self.robot.max_battery
            )));
        }
        if self.robot.battery_cost_per_move < 0.0 || self.robot.charge_rate_per_tick <= 0.0 {
            return Err(FleetError::Config(
                "robot.battery_cost_per_move must be non-negative and robot.charge_rate_per_tick positive"
                    .into(),
            ));
        }
        if self.tasks.move_cost_per_block < 0.0 || self.tasks.safety_margin < 0.0 {
            return Err(FleetError::Config(
                "tasks.move_cost_per_block and tasks.safety_margin must be non-negative".into(),
            ));
        }
        if self.tasks.max_assign_attempts == 0 {
            return Err(FleetError::Config("tasks.max_assign_attempts must be positive".into()));
        }
        if self.tasks.history_capacity == 0 {
            return Err(FleetError::Config("tasks.history_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Tick period as a `Duration`.
    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.robot.tick_ms)
    }

    pub fn assignment_policy(&self) -> AssignmentPolicy {
        AssignmentPolicy::from(&self.tasks)
    }
}
