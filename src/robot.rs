//! Per-robot finite-state machine and its lock-free published view.
//!
//! A [`RobotAgent`] is driven by exactly one control loop. Its primary state
//! lives in the shared [`RobotHandle`] so the charging pool can move a waiting
//! robot straight to charging (compare-and-set) without ever locking the
//! agent itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::charging::{ChargingPool, StationGrant};
use crate::config::RobotConfig;
use crate::pathfinding::{Path, PathPlanner};
use crate::task_store::TaskStore;
use crate::types::{GridEntity, Point, RobotId, TaskId};

/// Primary robot state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RobotState {
    Idle = 0,
    Working = 1,
    MovingToCharge = 2,
    Charging = 3,
    WaitingForCharge = 4,
    MovingToIdlePoint = 5,
}

impl RobotState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RobotState::Working,
            2 => RobotState::MovingToCharge,
            3 => RobotState::Charging,
            4 => RobotState::WaitingForCharge,
            5 => RobotState::MovingToIdlePoint,
            _ => RobotState::Idle,
        }
    }

    /// States in which the low-battery branch must not fire again.
    pub fn is_charging_related(self) -> bool {
        matches!(
            self,
            RobotState::Charging | RobotState::MovingToCharge | RobotState::WaitingForCharge
        )
    }
}

/// Leg of a delivery while [`RobotState::Working`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkingState {
    GoingToPickup,
    GoingToDropoff,
}

/// Read-only copy of a robot for display and inspection.
#[derive(Clone, Debug, PartialEq)]
pub struct RobotSnapshot {
    pub id: RobotId,
    pub state: RobotState,
    pub working: Option<WorkingState>,
    pub battery: f64,
    pub position: Point,
    pub task_id: Option<TaskId>,
}

#[derive(Clone, Copy, Debug)]
struct Telemetry {
    position: Point,
    working: Option<WorkingState>,
    task_id: Option<TaskId>,
}

/// Shared, thread-safe view of one robot.
#[derive(Debug)]
pub struct RobotHandle {
    id: RobotId,
    state: AtomicU8,
    /// f64 bit pattern.
    battery: AtomicU64,
    telemetry: Mutex<Telemetry>,
    grant: Mutex<Option<StationGrant>>,
}

impl RobotHandle {
    pub fn new(id: RobotId, position: Point, battery: f64) -> Self {
        Self {
            id,
            state: AtomicU8::new(RobotState::Idle as u8),
            battery: AtomicU64::new(battery.to_bits()),
            telemetry: Mutex::new(Telemetry {
                position,
                working: None,
                task_id: None,
            }),
            grant: Mutex::new(None),
        }
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    pub fn state(&self) -> RobotState {
        RobotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RobotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: RobotState, to: RobotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn battery(&self) -> f64 {
        f64::from_bits(self.battery.load(Ordering::Acquire))
    }

    pub fn position(&self) -> Point {
        self.telemetry.lock().position
    }

    /// Called by the pool, under its lock, when a charging request is denied.
    pub(crate) fn enter_waiting(&self) {
        self.set_state(RobotState::WaitingForCharge);
    }

    /// Hand a station to this robot if it is still waiting. The grant is
    /// parked before the state flips so the agent always finds it.
    pub(crate) fn offer_station(&self, grant: StationGrant) -> bool {
        let mut slot = self.grant.lock();
        *slot = Some(grant);
        if self.transition(RobotState::WaitingForCharge, RobotState::Charging) {
            true
        } else {
            *slot = None;
            false
        }
    }

    fn take_grant(&self) -> Option<StationGrant> {
        self.grant.lock().take()
    }

    pub fn snapshot(&self) -> RobotSnapshot {
        let telemetry = *self.telemetry.lock();
        RobotSnapshot {
            id: self.id,
            state: self.state(),
            working: telemetry.working,
            battery: self.battery(),
            position: telemetry.position,
            task_id: telemetry.task_id,
        }
    }

    #[cfg(test)]
    pub(crate) fn transition_for_test(&self, state: RobotState) {
        self.set_state(state);
    }

    #[cfg(test)]
    pub(crate) fn take_grant_for_test(&self) -> Option<StationGrant> {
        self.take_grant()
    }
}

/// One robot's control logic. Not shared: exactly one loop drives it.
pub struct RobotAgent {
    handle: Arc<RobotHandle>,
    config: RobotConfig,
    tasks: Arc<TaskStore>,
    pool: Arc<ChargingPool>,
    planner: Arc<dyn PathPlanner>,
    idle_point: Point,
    drop_off: Point,
    position: Point,
    battery: f64,
    working: Option<WorkingState>,
    /// Carried task; the store keeps the task itself.
    task: Option<TaskId>,
    path: Path,
    station: Option<StationGrant>,
    charge_ticks: u32,
    wait_started: Option<Instant>,
}

impl RobotAgent {
    /// Build an idle, fully charged robot at `start` and register it with
    /// the charging pool.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RobotId,
        start: Point,
        config: RobotConfig,
        tasks: Arc<TaskStore>,
        pool: Arc<ChargingPool>,
        planner: Arc<dyn PathPlanner>,
        idle_point: Point,
        drop_off: Point,
    ) -> Self {
        let handle = Arc::new(RobotHandle::new(id, start, config.max_battery));
        pool.register(Arc::clone(&handle));
        Self {
            handle,
            battery: config.max_battery,
            config,
            tasks,
            pool,
            planner,
            idle_point,
            drop_off,
            position: start,
            working: None,
            task: None,
            path: Path::new(),
            station: None,
            charge_ticks: 0,
            wait_started: None,
        }
    }

    pub fn id(&self) -> RobotId {
        self.handle.id()
    }

    pub fn handle(&self) -> Arc<RobotHandle> {
        Arc::clone(&self.handle)
    }

    pub fn state(&self) -> RobotState {
        self.handle.state()
    }

    pub fn working_state(&self) -> Option<WorkingState> {
        self.working
    }

    pub fn battery(&self) -> f64 {
        self.battery
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn current_task_id(&self) -> Option<TaskId> {
        self.task
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn station(&self) -> Option<StationGrant> {
        self.station
    }

    pub fn charge_ticks(&self) -> u32 {
        self.charge_ticks
    }

    /// One control-loop iteration: evaluate transitions, then act.
    pub fn tick(&mut self) {
        self.update_state();
        self.perform_action();
        self.publish();
    }

    fn publish(&self) {
        self.handle
            .battery
            .store(self.battery.to_bits(), Ordering::Release);
        let mut telemetry = self.handle.telemetry.lock();
        telemetry.position = self.position;
        telemetry.working = self.working;
        telemetry.task_id = self.current_task_id();
    }

    fn set_state(&self, state: RobotState) {
        let prev = self.handle.state();
        if prev != state {
            debug!(robot = self.id(), from = ?prev, to = ?state, battery = self.battery, "state change");
        }
        self.handle.set_state(state);
    }

    fn plan(&self, goal: Point) -> Option<Path> {
        self.planner.find_path(self.position, goal)
    }

    fn requeue_current_task(&mut self) {
        if let Some(task_id) = self.task.take() {
            self.tasks.requeue_task(task_id);
        }
        self.working = None;
    }

    /// The pool flipped us to charging while we waited; take the station.
    fn accept_station(&mut self, grant: StationGrant) {
        info!(robot = self.id(), station = grant.station_id, "station handed over from queue");
        self.station = Some(grant);
        self.position = grant.location;
        self.path.clear();
        self.charge_ticks = 0;
        self.wait_started = None;
    }

    /// Leave the charging queue after a timeout, unless the pool handed us a
    /// station in the meantime.
    fn abandon_wait(&mut self) {
        if self.handle.transition(RobotState::WaitingForCharge, RobotState::Idle) {
            self.pool.leave_queue(self.id());
            self.wait_started = None;
            info!(robot = self.id(), "charging wait timed out; left the queue");
        } else if let Some(grant) = self.handle.take_grant() {
            // A station arrived at the last moment.
            self.accept_station(grant);
        }
    }

    pub fn update_state(&mut self) {
        let state = self.handle.state();

        if state == RobotState::Charging && self.station.is_none() {
            if let Some(grant) = self.handle.take_grant() {
                self.accept_station(grant);
            }
        }

        if state == RobotState::WaitingForCharge {
            let started = *self.wait_started.get_or_insert_with(Instant::now);
            if started.elapsed() > Duration::from_millis(self.config.max_wait_ms) {
                self.abandon_wait();
            }
            return;
        }

        if self.battery < self.config.low_battery_threshold && !state.is_charging_related() {
            self.requeue_current_task();
            self.path.clear();
            match self.pool.request_charging(self.id()) {
                Some(grant) => {
                    self.station = Some(grant);
                    self.set_state(RobotState::MovingToCharge);
                    let path = self.plan(grant.location);
                    if path.is_none() {
                        warn!(robot = self.id(), station = grant.station_id, "no path to charging station");
                    }
                    self.path = path.unwrap_or_default();
                    info!(robot = self.id(), station = grant.station_id, battery = self.battery, "moving to charge");
                }
                None => {
                    // The pool has already published WaitingForCharge.
                    self.wait_started = Some(Instant::now());
                    info!(robot = self.id(), battery = self.battery, "waiting in charging queue");
                }
            }
            return;
        }

        match state {
            RobotState::MovingToCharge if self.path.is_empty() => {
                self.set_state(RobotState::Charging);
                self.charge_ticks = 0;
            }
            RobotState::Charging if self.battery >= self.config.max_battery => {
                self.battery = self.config.max_battery;
                self.charge_ticks = 0;
                if let Some(grant) = self.station.take() {
                    self.pool.release_station(grant.station_id);
                }
                self.set_state(RobotState::MovingToIdlePoint);
                self.path = self.plan(self.idle_point).unwrap_or_default();
            }
            RobotState::MovingToIdlePoint if self.path.is_empty() => {
                self.position = self.idle_point;
                self.set_state(RobotState::Idle);
                debug!(robot = self.id(), battery = self.battery, "back at idle point");
            }
            RobotState::Working if self.path.is_empty() => self.advance_delivery(),
            _ => {}
        }
    }

    fn advance_delivery(&mut self) {
        if self.working == Some(WorkingState::GoingToPickup) {
            self.working = Some(WorkingState::GoingToDropoff);
            match self.plan(self.drop_off) {
                Some(path) => self.path = path,
                None => {
                    warn!(robot = self.id(), task = ?self.current_task_id(), "drop-off unreachable; requeueing");
                    self.requeue_current_task();
                    self.set_state(RobotState::Idle);
                }
            }
        } else {
            if let Some(task_id) = self.task.take() {
                self.position = self.drop_off;
                self.tasks.complete_task(task_id);
                info!(robot = self.id(), task = task_id, "delivered");
            }
            self.working = None;
            self.set_state(RobotState::MovingToIdlePoint);
            self.path = self.plan(self.idle_point).unwrap_or_default();
        }
    }

    pub fn perform_action(&mut self) {
        match self.handle.state() {
            RobotState::Idle => self.try_take_task(),
            RobotState::Working | RobotState::MovingToCharge | RobotState::MovingToIdlePoint => {
                self.step()
            }
            RobotState::Charging => self.charge(),
            RobotState::WaitingForCharge => {}
        }
    }

    fn step(&mut self) {
        if let Some(next) = self.path.pop_front() {
            self.position = next;
            self.battery = (self.battery - self.config.battery_cost_per_move).max(0.0);
        }
    }

    fn charge(&mut self) {
        self.charge_ticks += 1;
        self.battery = (self.battery + self.config.charge_rate_per_tick).min(self.config.max_battery);
    }

    fn try_take_task(&mut self) {
        let Some(task) = self
            .tasks
            .take_next_for(self.id(), self.position, self.battery)
        else {
            return;
        };
        let pickup = task.destination.unwrap_or(self.position);
        match self.plan(pickup) {
            Some(path) => {
                self.task = Some(task.id);
                self.path = path;
                self.working = Some(WorkingState::GoingToPickup);
                self.set_state(RobotState::Working);
                info!(robot = self.id(), task = task.id, %pickup, "starting task");
            }
            None => {
                warn!(robot = self.id(), task = task.id, %pickup, "pickup unreachable; requeueing");
                self.tasks.requeue_task(task.id);
            }
        }
    }

    /// Drop task, path and station and restore a full battery at `idle`.
    /// Intended for flushing a stopped fleet.
    pub fn reset_to_idle(&mut self, idle: Point) {
        self.task = None;
        self.working = None;
        self.path.clear();
        self.station = None;
        self.charge_ticks = 0;
        self.wait_started = None;
        self.handle.take_grant();
        self.handle.set_state(RobotState::Idle);
        self.battery = self.config.max_battery;
        self.position = idle;
        self.publish();
    }

    pub fn snapshot(&self) -> RobotSnapshot {
        RobotSnapshot {
            id: self.id(),
            state: self.state(),
            working: self.working,
            battery: self.battery,
            position: self.position,
            task_id: self.current_task_id(),
        }
    }

    #[cfg(test)]
    fn set_battery_for_test(&mut self, battery: f64) {
        self.battery = battery;
    }

    #[cfg(test)]
    fn set_state_for_test(&mut self, state: RobotState) {
        self.handle.set_state(state);
    }

    #[cfg(test)]
    fn set_wait_started_for_test(&mut self, started: Instant) {
        self.wait_started = Some(started);
    }

    #[cfg(test)]
    fn set_path_for_test(&mut self, path: Path) {
        self.path = path;
    }
}

impl GridEntity for RobotAgent {
    fn location(&self) -> Point {
        self.position
    }

    fn entity_id(&self) -> String {
        format!("robot-{}", self.id())
    }
}

impl std::fmt::Debug for RobotAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotAgent")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("working", &self.working)
            .field("battery", &self.battery)
            .field("position", &self.position)
            .field("task", &self.task)
            .finish()
    }
}
