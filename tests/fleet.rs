//! Library-level scenarios driven through the public API.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use warehouse_fleet::config::RobotConfig;
use warehouse_fleet::{
    AStarPlanner, ChargingPool, FleetConfig, GridModel, PathPlanner, Point, RobotAgent, RobotHandle,
    RobotState, Task, TaskStatus, TaskStore, Warehouse,
};

fn agent(
    id: u64,
    config: RobotConfig,
    tasks: &Arc<TaskStore>,
    pool: &Arc<ChargingPool>,
) -> RobotAgent {
    let planner: Arc<dyn PathPlanner> = Arc::new(AStarPlanner::new(Arc::new(GridModel::new(10, 10))));
    RobotAgent::new(
        id,
        Point::new(3, 1),
        config,
        Arc::clone(tasks),
        Arc::clone(pool),
        planner,
        Point::new(3, 1),
        Point::new(1, 1),
    )
}

#[test]
fn fifo_and_requeue_priority() {
    let store = TaskStore::with_defaults();
    store.add_task(Task::new(1, None));
    store.add_task(Task::new(2, None));

    let a = store.take_next().expect("task A");
    assert_eq!(a.id, 1);
    assert!(store.requeue_task(a.id));
    assert_eq!(store.take_next().map(|t| t.id), Some(1));
    assert_eq!(store.take_next().map(|t| t.id), Some(2));
    assert!(store.take_next().is_none());
}

#[test]
fn battery_gate() {
    let store = TaskStore::with_defaults();
    store.add_task(Task::new(1, Some(Point::new(2, 0))));
    assert!(store.take_next_for(1, Point::new(0, 0), 5.0).is_none());
    let task = store.take_next_for(1, Point::new(0, 0), 20.0).expect("affordable");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.robot_id, Some(1));
}

#[test]
fn attempt_ceiling_retires_task() {
    let store = TaskStore::with_defaults();
    store.add_task(Task::new(9, None));
    for _ in 0..3 {
        let task = store.take_next_for(1, Point::new(0, 0), 100.0).expect("assignable");
        assert!(store.requeue_task(task.id));
    }
    assert!(store.take_next_for(1, Point::new(0, 0), 100.0).is_none());
    let history = store.completed_tasks();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TaskStatus::Failed);
    assert_eq!(history[0].attempts, 3);
}

#[test]
fn charging_contention_hands_station_over() {
    let pool = ChargingPool::new(&[Point::new(2, 1)]);
    let first = Arc::new(RobotHandle::new(1, Point::new(0, 0), 10.0));
    let second = Arc::new(RobotHandle::new(2, Point::new(0, 0), 10.0));
    pool.register(Arc::clone(&first));
    pool.register(Arc::clone(&second));

    let grant = pool.request_charging(1).expect("station free");
    assert!(pool.request_charging(2).is_none());
    assert_eq!(second.state(), RobotState::WaitingForCharge);
    assert_eq!(pool.queue(), vec![2]);

    assert_eq!(pool.release_station(grant.station_id), Some(2));
    let station = &pool.stations()[0];
    assert_eq!(station.occupant(), Some(2));
    assert!(!station.is_available());
    assert_eq!(second.state(), RobotState::Charging);
}

#[test]
fn charging_queue_times_out_to_idle() {
    let tasks = Arc::new(TaskStore::with_defaults());
    let pool = Arc::new(ChargingPool::new(&[]));
    // Starts below threshold, so the first tick asks for a station.
    let config = RobotConfig {
        max_battery: 40.0,
        max_wait_ms: 1,
        ..RobotConfig::default()
    };
    let mut robot = agent(1, config, &tasks, &pool);

    robot.tick();
    assert_eq!(robot.state(), RobotState::WaitingForCharge);
    assert_eq!(pool.queue(), vec![1]);

    thread::sleep(Duration::from_millis(10));
    robot.tick();
    assert_eq!(robot.state(), RobotState::Idle);
    assert!(pool.queue().is_empty());
}

#[test]
fn pathfinding_is_deterministic() {
    let planner = AStarPlanner::new(Arc::new(GridModel::new(5, 5)));
    let path = planner
        .find_path(Point::new(0, 0), Point::new(4, 4))
        .expect("open grid");
    assert_eq!(path.len(), 9);
    assert_eq!(path.front(), Some(&Point::new(0, 0)));
    assert_eq!(path.back(), Some(&Point::new(4, 4)));
    assert_eq!(Some(path), planner.find_path(Point::new(0, 0), Point::new(4, 4)));
}

#[test]
fn threaded_fleet_completes_work() {
    let mut config = FleetConfig::default();
    config.robot.tick_ms = 2;
    let wh = Warehouse::new(config).expect("valid config");
    let store = wh.task_store();
    for (x, y) in [(4, 2), (5, 1), (3, 3), (4, 4), (5, 2), (3, 4)] {
        store.add_task(Task::new(store.next_task_id(), Some(Point::new(x, y))));
    }

    wh.start().expect("start fleet");
    let deadline = Instant::now() + Duration::from_secs(20);
    while (store.pending_count() > 0 || store.active_count() > 0) && Instant::now() < deadline {
        assert!(store.check_partition().is_ok());
        thread::sleep(Duration::from_millis(5));
    }
    wh.stop();

    assert_eq!(store.pending_count(), 0);
    assert_eq!(store.active_count(), 0);
    assert_eq!(store.completed_count(), 6);
    assert!(store.check_partition().is_ok());
    let stations = wh.stations();
    assert!(stations.iter().all(|s| s.is_available() == s.occupant().is_none()));
}

#[test]
fn snapshots_are_copies() {
    let wh = Warehouse::new(FleetConfig::default()).expect("valid config");
    let mut robots = wh.robots();
    robots.clear();
    assert_eq!(wh.robots().len(), 5);
    let mut stations = wh.stations();
    stations[0].occupy(99);
    assert!(wh.stations()[0].is_available());
}
