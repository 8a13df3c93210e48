//! Demo and benchmark runners for the CLI.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::charging::ChargingStation;
use crate::config::FleetConfig;
use crate::error::Result;
use crate::types::{Item, Order, Point, Task, TaskStatus};
use crate::warehouse::Warehouse;

// Demo timing knobs (small for quick CLI feedback).
const DEMO_TICK_MS: u64 = 5;
const DEMO_MAX_WAIT: Duration = Duration::from_secs(30);
const DEMO_POLL: Duration = Duration::from_millis(2);
// Upper bound on synchronous bench ticks so unreachable work cannot spin forever.
const BENCH_MAX_TICKS: usize = 200_000;

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    use libc::{RUSAGE_SELF, getrusage, rusage};
    // SAFETY: rusage is plain old data; getrusage fills it in.
    let mut usage: rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { getrusage(RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let user = usage.ru_utime.tv_sec as f64 + (usage.ru_utime.tv_usec as f64 / 1_000_000.0);
    let sys = usage.ru_stime.tv_sec as f64 + (usage.ru_stime.tv_usec as f64 / 1_000_000.0);
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// A station snapshot is consistent when every occupied station has exactly
/// one occupant and no robot holds two stations.
fn station_conflict(stations: &[ChargingStation]) -> bool {
    let mut seen = HashSet::new();
    stations.iter().any(|s| match s.occupant() {
        Some(robot) => s.is_available() || !seen.insert(robot),
        None => !s.is_available(),
    })
}

/// Point offset from `base`, clamped into the grid.
fn near(cfg: &FleetConfig, base: Point, dx: i32, dy: i32) -> Point {
    let max_x = cfg.grid.rows as i32 - 1;
    let max_y = cfg.grid.cols as i32 - 1;
    Point::new((base.x + dx).clamp(0, max_x), (base.y + dy).clamp(0, max_y))
}

#[derive(Debug, Default)]
struct Outcome {
    completed: usize,
    failed: usize,
}

fn outcome(wh: &Warehouse) -> Outcome {
    let mut out = Outcome::default();
    for task in wh.task_store().completed_tasks() {
        match task.status {
            TaskStatus::Completed => out.completed += 1,
            TaskStatus::Failed => out.failed += 1,
            _ => {}
        }
    }
    out
}

fn all_terminal(wh: &Warehouse) -> bool {
    let store = wh.task_store();
    store.pending_count() == 0 && store.active_count() == 0
}

/// Run a short threaded demo: one order fanned out into tasks, the fleet
/// started, then stopped once every task is terminal.
pub fn run_demo(mut config: FleetConfig) -> Result<()> {
    config.robot.tick_ms = DEMO_TICK_MS;
    let idle = config.layout.idle;

    let shelves = [
        ("A1", near(&config, idle, 1, 2)),
        ("A2", near(&config, idle, 2, 1)),
        ("B1", near(&config, idle, 0, 3)),
        ("B2", near(&config, idle, 3, 0)),
        ("C1", near(&config, idle, 1, 3)),
    ];
    let units: HashMap<String, Point> = shelves
        .iter()
        .map(|&(id, p)| (id.to_string(), p))
        .collect();

    let mut items: Vec<Item> = shelves
        .iter()
        .enumerate()
        .map(|(i, &(unit, _))| Item::new(format!("item-{i}"), format!("Parcel {i}"), 1.5).stored_in(unit))
        .collect();
    // Unknown unit still yields a task, with no destination.
    items.push(Item::new("item-x", "Loose parcel", 0.5).stored_in("Z9"));
    items.push(Item::new("item-y", "Unfiled parcel", 0.5));
    let order = Order::new("demo-order", items);

    let wh = Warehouse::new(config)?;
    let store = wh.task_store();
    let created = store.create_tasks_from_order(&order, &units);
    info!(tasks = created.len(), robots = wh.robot_count(), "demo order loaded");

    let start = Instant::now();
    wh.start()?;
    let mut conflict = false;
    while !all_terminal(&wh) && start.elapsed() < DEMO_MAX_WAIT {
        conflict |= station_conflict(&wh.stations());
        thread::sleep(DEMO_POLL);
    }
    wh.stop();
    if !all_terminal(&wh) {
        warn!(elapsed_ms = start.elapsed().as_millis() as u64, "demo deadline reached with open tasks");
    }

    let out = outcome(&wh);
    let partition_ok = store.check_partition().is_ok();
    println!("DEMO SUMMARY");
    println!("robots={} stations={}", wh.robot_count(), wh.stations().len());
    println!("tasks_total={}", created.len());
    println!("completed={}", out.completed);
    println!("failed={}", out.failed);
    println!("pending={}", store.pending_count());
    println!("active={}", store.active_count());
    println!("charging_queue={:?}", wh.charging_queue());
    println!("elapsed_ms={}", start.elapsed().as_millis());
    println!("partition_ok={partition_ok}");
    println!("station_conflict={conflict}");
    Ok(())
}

/// Aggregated metrics from a single benchmark run.
struct BenchResult {
    robots: usize,
    tasks: usize,
    stations: usize,
    ticks: usize,
    elapsed_ms: f64,
    throughput: f64,
    cpu_user_s: Option<f64>,
    cpu_sys_s: Option<f64>,
    completed: usize,
    failed: usize,
    max_queue_len: usize,
    partition_ok: bool,
    station_conflict: bool,
}

fn benchmark_once(mut config: FleetConfig, robots: usize, tasks: usize, stations: usize) -> Result<BenchResult> {
    config.robot.count = robots;
    config.layout.stations = stations;
    config.tasks.history_capacity = config.tasks.history_capacity.max(tasks);
    let idle = config.layout.idle;
    let wh = Warehouse::new(config.clone())?;
    let store = wh.task_store();
    for n in 0..tasks as i32 {
        let dest = near(&config, idle, 1 + n % 2, n % 3);
        store.add_task(Task::new(store.next_task_id(), Some(dest)));
    }

    let mut ticks = 0usize;
    let mut max_queue_len = 0usize;
    let mut conflict = false;
    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    while !all_terminal(&wh) && ticks < BENCH_MAX_TICKS {
        wh.tick_all();
        ticks += 1;
        max_queue_len = max_queue_len.max(wh.charging_queue().len());
        conflict |= station_conflict(&wh.stations());
    }
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    if ticks >= BENCH_MAX_TICKS {
        warn!(ticks, "bench tick cap reached");
    }

    let out = outcome(&wh);
    let throughput = if elapsed_ms > 0.0 {
        out.completed as f64 / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };

    Ok(BenchResult {
        robots,
        tasks,
        stations,
        ticks,
        elapsed_ms,
        throughput,
        cpu_user_s,
        cpu_sys_s,
        completed: out.completed,
        failed: out.failed,
        max_queue_len,
        partition_ok: store.check_partition().is_ok(),
        station_conflict: conflict,
    })
}

/// Run a synchronous benchmark with optional parameter overrides and print
/// one CSV row.
pub fn run_benchmark(
    config: FleetConfig,
    robots: Option<usize>,
    tasks: Option<usize>,
    stations: Option<usize>,
) -> Result<()> {
    let robots = robots.unwrap_or(config.robot.count);
    let tasks = tasks.unwrap_or(100);
    let stations = stations.unwrap_or(config.layout.stations);
    let result = benchmark_once(config, robots, tasks, stations)?;

    println!(
        "robots,tasks,stations,ticks,elapsed_ms,throughput_tasks_per_s,cpu_user_s,cpu_sys_s,completed,failed,max_charging_queue,partition_ok,station_conflict"
    );
    let cpu_user = result
        .cpu_user_s
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "NA".to_string());
    let cpu_sys = result
        .cpu_sys_s
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "NA".to_string());
    println!(
        "{},{},{},{},{:.2},{:.2},{},{},{},{},{},{},{}",
        result.robots,
        result.tasks,
        result.stations,
        result.ticks,
        result.elapsed_ms,
        result.throughput,
        cpu_user,
        cpu_sys,
        result.completed,
        result.failed,
        result.max_queue_len,
        result.partition_ok,
        result.station_conflict
    );
    if result.completed + result.failed < result.tasks {
        eprintln!("# warning,open_tasks,{}", result.tasks - result.completed - result.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_inconsistent_station_snapshots() {
        let mut a = ChargingStation::new(0, Point::new(2, 1));
        let mut b = ChargingStation::new(1, Point::new(2, 1));
        assert!(!station_conflict(&[a.clone(), b.clone()]));
        a.occupy(1);
        b.occupy(2);
        assert!(!station_conflict(&[a.clone(), b.clone()]));
        b.release();
        b.occupy(1);
        assert!(station_conflict(&[a, b]));
    }

    #[test]
    fn near_clamps_into_grid() {
        let cfg = FleetConfig::default();
        assert_eq!(near(&cfg, Point::new(8, 8), 3, 3), Point::new(9, 9));
        assert_eq!(near(&cfg, Point::new(0, 0), -2, 1), Point::new(0, 1));
    }

    #[test]
    fn benchmark_drains_all_tasks() {
        let result = benchmark_once(FleetConfig::default(), 3, 30, 1).expect("bench runs");
        assert_eq!(result.completed + result.failed, 30);
        assert!(result.completed > 0);
        assert!(result.partition_ok);
        assert!(!result.station_conflict);
    }
}
