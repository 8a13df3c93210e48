//! Fleet orchestrator: builds the warehouse and runs one loop per robot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::charging::{ChargingPool, ChargingStation};
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::grid::GridModel;
use crate::pathfinding::{AStarPlanner, PathPlanner};
use crate::robot::{RobotAgent, RobotHandle, RobotSnapshot};
use crate::task_store::TaskStore;
use crate::types::{GridEntity, Point, RobotId};

/// Cancellation signal shared by every robot loop.
///
/// Loops sleep on the condvar between ticks, so `signal` wakes them at once
/// instead of waiting out the tick interval.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.stopped.lock() = false;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep up to `timeout`; returns true if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Owns the grid, charging pool and robots; shares the task store.
pub struct Warehouse {
    config: FleetConfig,
    grid: Arc<GridModel>,
    tasks: Arc<TaskStore>,
    pool: Arc<ChargingPool>,
    robots: Vec<Arc<Mutex<RobotAgent>>>,
    handles: Vec<Arc<RobotHandle>>,
    stop: Arc<StopSignal>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Warehouse {
    /// Build a warehouse with its own task store.
    pub fn new(config: FleetConfig) -> Result<Self> {
        let tasks = Arc::new(TaskStore::new(config.assignment_policy()));
        Self::with_task_store(config, tasks)
    }

    /// Build a warehouse around an existing task store, e.g. one a UI also
    /// holds.
    ///
    /// The store keeps the assignment policy it was built with; `config.tasks`
    /// only applies to stores created by [`Warehouse::new`].
    pub fn with_task_store(config: FleetConfig, tasks: Arc<TaskStore>) -> Result<Self> {
        config.validate()?;
        if *tasks.policy() != config.assignment_policy() {
            warn!(
                store = ?tasks.policy(),
                configured = ?config.assignment_policy(),
                "shared task store keeps its own assignment policy; [tasks] settings ignored"
            );
        }
        let layout = &config.layout;

        let locations = vec![layout.charging; layout.stations];
        let pool = Arc::new(ChargingPool::new(&locations));

        let mut grid = GridModel::new(config.grid.rows, config.grid.cols);
        for station in pool.stations() {
            grid.place(&station, station.location());
        }
        let grid = Arc::new(grid);
        let planner: Arc<dyn PathPlanner> = Arc::new(AStarPlanner::new(Arc::clone(&grid)));

        let mut robots = Vec::with_capacity(config.robot.count);
        let mut handles = Vec::with_capacity(config.robot.count);
        for id in 1..=config.robot.count as RobotId {
            let agent = RobotAgent::new(
                id,
                layout.idle,
                config.robot.clone(),
                Arc::clone(&tasks),
                Arc::clone(&pool),
                Arc::clone(&planner),
                layout.idle,
                layout.drop_off,
            );
            handles.push(agent.handle());
            robots.push(Arc::new(Mutex::new(agent)));
        }

        info!(
            rows = config.grid.rows,
            cols = config.grid.cols,
            robots = robots.len(),
            stations = layout.stations,
            "warehouse created"
        );

        Ok(Self {
            config,
            grid,
            tasks,
            pool,
            robots,
            handles,
            stop: Arc::new(StopSignal::new()),
            threads: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn one control loop per robot. A no-op while already running.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("start ignored; fleet already running");
            return Ok(());
        }
        self.stop.reset();
        let tick = self.config.tick();

        let mut threads = self.threads.lock();
        for agent in &self.robots {
            let id = agent.lock().id();
            let agent = Arc::clone(agent);
            let stop = Arc::clone(&self.stop);
            let spawned = thread::Builder::new()
                .name(format!("robot-{id}"))
                .spawn(move || run_loop(agent, stop, tick));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    drop(threads);
                    self.stop();
                    return Err(FleetError::Spawn(format!("robot-{id}: {e}")));
                }
            }
        }
        info!(robots = threads.len(), tick_ms = self.config.robot.tick_ms, "fleet started");
        Ok(())
    }

    /// Signal every loop and wait for it to finish its current tick.
    pub fn stop(&self) {
        self.stop.signal();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        let count = threads.len();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("robot").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "robot loop panicked");
            }
        }
        if self.running.swap(false, Ordering::SeqCst) {
            info!(robots = count, "fleet stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tick every robot once on the calling thread, in id order.
    pub fn tick_all(&self) {
        for agent in &self.robots {
            agent.lock().tick();
        }
    }

    /// Stop the fleet, clear all tasks, free every station and send every
    /// robot back to the idle point with a full battery.
    pub fn flush(&self) {
        self.stop();
        self.tasks.clear_all();
        self.pool.reset();
        let idle = self.config.layout.idle;
        for agent in &self.robots {
            agent.lock().reset_to_idle(idle);
        }
        info!("warehouse flushed");
    }

    pub fn robots(&self) -> Vec<RobotSnapshot> {
        self.handles.iter().map(|h| h.snapshot()).collect()
    }

    pub fn robot_count(&self) -> usize {
        self.robots.len()
    }

    pub fn stations(&self) -> Vec<ChargingStation> {
        self.pool.stations()
    }

    pub fn charging_queue(&self) -> Vec<RobotId> {
        self.pool.queue()
    }

    pub fn idle_location(&self) -> Point {
        self.config.layout.idle
    }

    pub fn drop_off_location(&self) -> Point {
        self.config.layout.drop_off
    }

    pub fn charging_location(&self) -> Point {
        self.config.layout.charging
    }

    pub fn task_store(&self) -> Arc<TaskStore> {
        Arc::clone(&self.tasks)
    }

    pub fn grid(&self) -> Arc<GridModel> {
        Arc::clone(&self.grid)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }
}

impl Drop for Warehouse {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(agent: Arc<Mutex<RobotAgent>>, stop: Arc<StopSignal>, tick: Duration) {
    debug!("control loop started");
    while !stop.is_stopped() {
        agent.lock().tick();
        if stop.wait_timeout(tick) {
            break;
        }
    }
    debug!("control loop exiting");
}
