//! Charging stations and the pool that arbitrates them.
//!
//! Request, release and leave are one critical section: a single mutex
//! covers station occupancy and the waiting queue, so a station can never be
//! handed to two robots and a queue entry is consumed at most once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::robot::{RobotHandle, RobotState};
use crate::types::{GridEntity, Point, RobotId, StationId};

/// What a robot receives when it is given a station.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StationGrant {
    pub station_id: StationId,
    pub location: Point,
}

/// A single charger. `occupant` is set exactly when `available` is false.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargingStation {
    id: StationId,
    location: Point,
    available: bool,
    occupant: Option<RobotId>,
}

impl ChargingStation {
    pub fn new(id: StationId, location: Point) -> Self {
        Self {
            id,
            location,
            available: true,
            occupant: None,
        }
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn occupant(&self) -> Option<RobotId> {
        self.occupant
    }

    /// Occupy if free; an occupied station is left untouched.
    pub fn occupy(&mut self, robot: RobotId) -> bool {
        if !self.available {
            return false;
        }
        self.available = false;
        self.occupant = Some(robot);
        true
    }

    pub fn release(&mut self) {
        self.available = true;
        self.occupant = None;
    }

    fn grant(&self) -> StationGrant {
        StationGrant {
            station_id: self.id,
            location: self.location,
        }
    }
}

impl GridEntity for ChargingStation {
    fn location(&self) -> Point {
        self.location
    }

    fn entity_id(&self) -> String {
        format!("station-{}", self.id)
    }
}

struct PoolState {
    stations: Vec<ChargingStation>,
    queue: VecDeque<RobotId>,
    robots: HashMap<RobotId, Arc<RobotHandle>>,
}

/// Bounded set of stations plus a FIFO queue of robots waiting for one.
pub struct ChargingPool {
    inner: Mutex<PoolState>,
}

impl ChargingPool {
    /// One station per location, ids assigned in order from 0.
    pub fn new(locations: &[Point]) -> Self {
        let stations = locations
            .iter()
            .enumerate()
            .map(|(idx, &loc)| ChargingStation::new(idx as StationId, loc))
            .collect();
        Self {
            inner: Mutex::new(PoolState {
                stations,
                queue: VecDeque::new(),
                robots: HashMap::new(),
            }),
        }
    }

    /// Make a robot eligible for queueing and direct hand-off.
    pub fn register(&self, robot: Arc<RobotHandle>) {
        let mut guard = self.inner.lock();
        guard.robots.insert(robot.id(), robot);
    }

    /// Occupy the first free station, or enrol the robot in the waiting
    /// queue (at most once) and mark it as waiting.
    pub fn request_charging(&self, robot_id: RobotId) -> Option<StationGrant> {
        let mut guard = self.inner.lock();
        if let Some(station) = guard.stations.iter_mut().find(|s| s.is_available()) {
            station.occupy(robot_id);
            info!(robot = robot_id, station = station.id, "station occupied");
            return Some(station.grant());
        }

        if !guard.queue.contains(&robot_id) {
            guard.queue.push_back(robot_id);
        }
        match guard.robots.get(&robot_id) {
            Some(handle) => handle.enter_waiting(),
            None => warn!(robot = robot_id, "unregistered robot queued; it can never be handed a station"),
        }
        debug!(robot = robot_id, queue = guard.queue.len(), "no free station; queued");
        None
    }

    /// Give the station to the first queued robot that is still waiting, or
    /// free it. Returns the robot it was handed to.
    pub fn release_station(&self, station_id: StationId) -> Option<RobotId> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let Some(station) = state.stations.iter_mut().find(|s| s.id == station_id) else {
            warn!(station = station_id, "release of unknown station ignored");
            return None;
        };

        let grant = station.grant();
        // Entries whose robot timed out stay put; the robot removes itself.
        let taker = state.queue.iter().position(|rid| {
            state
                .robots
                .get(rid)
                .is_some_and(|h| h.state() == RobotState::WaitingForCharge && h.offer_station(grant))
        });

        match taker.and_then(|pos| state.queue.remove(pos)) {
            Some(robot_id) => {
                station.occupant = Some(robot_id);
                station.available = false;
                info!(station = station_id, robot = robot_id, "station handed to queued robot");
                Some(robot_id)
            }
            None => {
                station.release();
                info!(station = station_id, "station available again");
                None
            }
        }
    }

    /// Remove a robot from the waiting queue; no-op if absent.
    pub fn leave_queue(&self, robot_id: RobotId) -> bool {
        let mut guard = self.inner.lock();
        let before = guard.queue.len();
        guard.queue.retain(|&rid| rid != robot_id);
        let removed = guard.queue.len() != before;
        if removed {
            debug!(robot = robot_id, "left charging queue");
        }
        removed
    }

    /// Free every station and empty the queue.
    pub fn reset(&self) {
        let mut guard = self.inner.lock();
        for station in guard.stations.iter_mut() {
            station.release();
        }
        guard.queue.clear();
    }

    pub fn stations(&self) -> Vec<ChargingStation> {
        self.inner.lock().stations.clone()
    }

    pub fn queue(&self) -> Vec<RobotId> {
        self.inner.lock().queue.iter().copied().collect()
    }
}
