//! Shared task lifecycle store with battery-aware assignment.
//!
//! Every task lives in exactly one of three collections: the pending queue,
//! the active map, or the terminal history. Each collection has its own lock;
//! operations that move a task between collections take the locks in the
//! fixed order pending -> active -> history so the move is never observable
//! half-done.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::types::{Order, Point, RobotId, Task, TaskId, TaskStatus};

/// Receives aggregate count changes, synchronously, on the mutating call.
pub trait TaskListener: Send + Sync {
    fn on_pending_count_changed(&self, pending: usize);
    fn on_completed_count_changed(&self, completed: usize);
}

/// Told when the last outstanding task of an order completes.
pub trait OrderObserver: Send + Sync {
    fn on_order_fulfilled(&self, order_id: &str);
}

/// Resolves a storage-unit id to the grid point robots pick from.
pub trait StorageLocator {
    fn locate(&self, storage_unit_id: &str) -> Option<Point>;
}

impl<F> StorageLocator for F
where
    F: Fn(&str) -> Option<Point>,
{
    fn locate(&self, storage_unit_id: &str) -> Option<Point> {
        self(storage_unit_id)
    }
}

impl StorageLocator for HashMap<String, Point> {
    fn locate(&self, storage_unit_id: &str) -> Option<Point> {
        self.get(storage_unit_id).copied()
    }
}

/// Handle returned by [`TaskStore::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Tunables for assignment and history retention.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignmentPolicy {
    /// Estimated battery drain per grid block travelled.
    pub move_cost_per_block: f64,
    /// Battery reserve required on top of the estimate.
    pub safety_margin: f64,
    /// Assignment attempts after which a task is retired as failed.
    pub max_assign_attempts: u32,
    /// Terminal tasks kept in history; oldest are evicted first.
    pub history_capacity: usize,
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self {
            move_cost_per_block: 0.5,
            safety_margin: 8.0,
            max_assign_attempts: 3,
            history_capacity: 1000,
        }
    }
}

impl AssignmentPolicy {
    /// Battery a robot at `from` needs before it may take `task`.
    pub fn required_battery(&self, from: Point, task: &Task) -> f64 {
        let est_cost = task
            .destination
            .map(|dest| f64::from(from.manhattan(&dest)) * self.move_cost_per_block)
            .unwrap_or(0.0);
        est_cost + self.safety_margin
    }
}

/// The single source of truth for task lifecycle.
pub struct TaskStore {
    policy: AssignmentPolicy,
    pending: Mutex<VecDeque<Task>>,
    active: Mutex<HashMap<TaskId, Task>>,
    history: Mutex<VecDeque<Task>>,
    /// Robots currently holding (or being handed) a task.
    busy: DashSet<RobotId>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TaskListener>)>>,
    order_observer: Option<Arc<dyn OrderObserver>>,
    next_listener_id: AtomicU64,
    next_task_id: AtomicU64,
}

impl TaskStore {
    pub fn new(policy: AssignmentPolicy) -> Self {
        Self {
            policy,
            pending: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            busy: DashSet::new(),
            listeners: RwLock::new(Vec::new()),
            order_observer: None,
            next_listener_id: AtomicU64::new(0),
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AssignmentPolicy::default())
    }

    /// Attach the collaborator told about fully fulfilled orders.
    pub fn with_order_observer(mut self, observer: Arc<dyn OrderObserver>) -> Self {
        self.order_observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &AssignmentPolicy {
        &self.policy
    }

    /// Allocate a fresh task id.
    pub fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    // ---------------------------------------------------------------- listeners

    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.write();
        let before = guard.len();
        guard.retain(|(lid, _)| *lid != id);
        guard.len() != before
    }

    /// Deliver to every listener in registration order; a panicking listener
    /// is logged and skipped.
    fn notify(&self, event: impl Fn(&dyn TaskListener)) {
        // Snapshot so listeners may call back into the store.
        let listeners: Vec<(ListenerId, Arc<dyn TaskListener>)> = self.listeners.read().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| event(listener.as_ref()))).is_err() {
                warn!(listener = id.0, "task listener panicked; continuing");
            }
        }
    }

    fn notify_pending(&self, pending: usize) {
        self.notify(|l| l.on_pending_count_changed(pending));
    }

    fn notify_completed(&self, completed: usize) {
        self.notify(|l| l.on_completed_count_changed(completed));
    }

    fn notify_order_fulfilled(&self, order_id: &str) {
        if let Some(observer) = &self.order_observer {
            if catch_unwind(AssertUnwindSafe(|| observer.on_order_fulfilled(order_id))).is_err() {
                warn!(order_id, "order observer panicked");
            }
        }
    }

    fn push_history(&self, history: &mut VecDeque<Task>, task: Task) {
        history.push_back(task);
        while history.len() > self.policy.history_capacity {
            history.pop_front();
        }
    }

    fn release_claim(&self, robot_id: Option<RobotId>) {
        if let Some(robot_id) = robot_id {
            self.busy.remove(&robot_id);
        }
    }

    // ---------------------------------------------------------------- insertion

    /// Append a task to the tail of the pending queue.
    pub fn add_task(&self, mut task: Task) -> TaskId {
        task.status = TaskStatus::Pending;
        task.robot_id = None;
        let id = task.id;
        let pending = {
            let mut queue = self.pending.lock();
            debug!(task = id, order = ?task.order_id, dest = ?task.destination, "task added");
            queue.push_back(task);
            queue.len()
        };
        self.notify_pending(pending);
        id
    }

    /// One task per order item; an item whose storage unit cannot be located
    /// still yields a task, without a destination.
    pub fn create_tasks_from_order(
        &self,
        order: &Order,
        locator: &dyn StorageLocator,
    ) -> Vec<TaskId> {
        let ids: Vec<TaskId> = order
            .items
            .iter()
            .map(|item| {
                let destination = item
                    .storage_unit_id
                    .as_deref()
                    .filter(|su| !su.trim().is_empty())
                    .and_then(|su| locator.locate(su));
                if destination.is_none() {
                    debug!(order = %order.id, item = %item.id, "item has no resolvable storage location");
                }
                let task = Task::new(self.next_task_id(), destination)
                    .with_item(item.clone())
                    .with_order(order.id.clone());
                self.add_task(task)
            })
            .collect();
        info!(order = %order.id, tasks = ids.len(), "order translated into tasks");
        ids
    }

    // ---------------------------------------------------------------- assignment

    /// Plain FIFO dequeue, ignoring battery and attempt counters.
    pub fn take_next(&self) -> Option<Task> {
        let (task, pending) = {
            let mut queue = self.pending.lock();
            let mut active = self.active.lock();
            let mut task = queue.pop_front()?;
            task.status = TaskStatus::InProgress;
            active.insert(task.id, task.clone());
            (task, queue.len())
        };
        debug!(task = task.id, "task taken");
        self.notify_pending(pending);
        Some(task)
    }

    /// Battery-aware assignment for one robot.
    ///
    /// Scans the queue in FIFO order and takes the first task the robot can
    /// afford. Tasks that already used every assignment attempt are retired as
    /// failed during the scan. Returns `None` if the robot already holds a
    /// claim, i.e. another assignment for it is in flight or it owns a task.
    pub fn take_next_for(&self, robot_id: RobotId, robot_pos: Point, battery: f64) -> Option<Task> {
        if !self.busy.insert(robot_id) {
            debug!(robot = robot_id, "robot already claimed; no assignment");
            return None;
        }

        let (chosen, failed, pending, completed) = {
            let mut queue = self.pending.lock();
            let mut active = self.active.lock();

            let mut exhausted = Vec::new();
            let mut chosen_idx = None;
            for (idx, task) in queue.iter().enumerate() {
                if task.attempts >= self.policy.max_assign_attempts {
                    exhausted.push(idx);
                    continue;
                }
                if battery >= self.policy.required_battery(robot_pos, task) {
                    chosen_idx = Some(idx);
                    break;
                }
            }

            let chosen = chosen_idx.and_then(|idx| queue.remove(idx)).map(|mut task| {
                task.attempts += 1;
                task.status = TaskStatus::InProgress;
                task.robot_id = Some(robot_id);
                active.insert(task.id, task.clone());
                task
            });

            // Exhausted entries all precede the chosen one, so their indices
            // are still valid; remove back to front.
            let mut failed = Vec::with_capacity(exhausted.len());
            for idx in exhausted.into_iter().rev() {
                if let Some(mut task) = queue.remove(idx) {
                    task.status = TaskStatus::Failed;
                    failed.push(task);
                }
            }

            let completed = if failed.is_empty() {
                None
            } else {
                let mut history = self.history.lock();
                for task in failed.iter().rev() {
                    self.push_history(&mut history, task.clone());
                }
                Some(history.len())
            };
            (chosen, failed, queue.len(), completed)
        };

        for task in &failed {
            warn!(task = task.id, attempts = task.attempts, "task exceeded assignment attempts; marked failed");
        }

        match &chosen {
            Some(task) => {
                info!(task = task.id, robot = robot_id, attempts = task.attempts, dest = ?task.destination, "task assigned");
            }
            None => {
                self.busy.remove(&robot_id);
            }
        }

        if chosen.is_some() || !failed.is_empty() {
            self.notify_pending(pending);
        }
        if let Some(completed) = completed {
            self.notify_completed(completed);
        }
        chosen
    }

    // ---------------------------------------------------------------- terminal / requeue

    /// Finish an active task. Returns `false` if the task is not active (for
    /// instance after `clear_all`).
    pub fn complete_task(&self, task_id: TaskId) -> bool {
        let (task, completed, fulfilled_order) = {
            let queue = self.pending.lock();
            let mut active = self.active.lock();
            let mut history = self.history.lock();

            let Some(mut task) = active.remove(&task_id) else {
                debug!(task = task_id, "complete ignored; task not active");
                return false;
            };
            task.status = TaskStatus::Completed;

            let fulfilled_order = task.order_id.clone().filter(|order_id| {
                let outstanding = |t: &Task| t.order_id.as_deref() == Some(order_id.as_str());
                !queue.iter().any(outstanding) && !active.values().any(outstanding)
            });

            self.push_history(&mut history, task.clone());
            (task, history.len(), fulfilled_order)
        };
        self.release_claim(task.robot_id);

        info!(task = task.id, robot = ?task.robot_id, order = ?task.order_id, "task completed");
        self.notify_completed(completed);
        if let Some(order_id) = fulfilled_order {
            info!(order = %order_id, "order fulfilled");
            self.notify_order_fulfilled(&order_id);
        }
        true
    }

    /// Return an active task to the front of the pending queue.
    pub fn requeue_task(&self, task_id: TaskId) -> bool {
        let (prev_robot, pending) = {
            let mut queue = self.pending.lock();
            let mut active = self.active.lock();

            let Some(mut task) = active.remove(&task_id) else {
                debug!(task = task_id, "requeue ignored; task not active");
                return false;
            };
            let prev_robot = task.robot_id.take();
            task.status = TaskStatus::Pending;
            if !queue.iter().any(|t| t.id == task_id) {
                queue.push_front(task);
            }
            (prev_robot, queue.len())
        };
        self.release_claim(prev_robot);

        info!(task = task_id, previous_robot = ?prev_robot, "task requeued");
        self.notify_pending(pending);
        true
    }

    /// Retire a pending or active task as failed.
    pub fn mark_failed(&self, task_id: TaskId) -> bool {
        let (task, was_pending, pending, completed) = {
            let mut queue = self.pending.lock();
            let mut active = self.active.lock();
            let mut history = self.history.lock();

            let (mut task, was_pending) = match active.remove(&task_id) {
                Some(task) => (task, false),
                None => match queue.iter().position(|t| t.id == task_id) {
                    Some(idx) => match queue.remove(idx) {
                        Some(task) => (task, true),
                        None => return false,
                    },
                    None => {
                        debug!(task = task_id, "mark_failed ignored; task not live");
                        return false;
                    }
                },
            };
            task.status = TaskStatus::Failed;
            self.push_history(&mut history, task.clone());
            (task, was_pending, queue.len(), history.len())
        };
        self.release_claim(task.robot_id);

        warn!(task = task.id, robot = ?task.robot_id, order = ?task.order_id, "task failed");
        if was_pending {
            self.notify_pending(pending);
        }
        self.notify_completed(completed);
        true
    }

    /// Drop every task and claim.
    pub fn clear_all(&self) {
        {
            let mut queue = self.pending.lock();
            let mut active = self.active.lock();
            let mut history = self.history.lock();
            queue.clear();
            active.clear();
            history.clear();
            self.busy.clear();
        }
        info!("task store cleared");
        self.notify_pending(0);
        self.notify_completed(0);
    }

    // ---------------------------------------------------------------- snapshots

    pub fn pending_tasks(&self) -> Vec<Task> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn active_tasks(&self) -> HashMap<TaskId, Task> {
        self.active.lock().clone()
    }

    /// Completed and failed tasks, oldest first.
    pub fn completed_tasks(&self) -> Vec<Task> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn completed_count(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_claimed(&self, robot_id: RobotId) -> bool {
        self.busy.contains(&robot_id)
    }

    /// Verify that no task sits in two collections and that each task's
    /// status matches the collection holding it.
    pub fn check_partition(&self) -> Result<(), String> {
        let queue = self.pending.lock();
        let active = self.active.lock();
        let history = self.history.lock();

        let mut seen = HashSet::new();
        for task in queue.iter() {
            if task.status != TaskStatus::Pending {
                return Err(format!("pending task {} has status {:?}", task.id, task.status));
            }
            if !seen.insert(task.id) {
                return Err(format!("task {} queued twice", task.id));
            }
        }
        for (id, task) in active.iter() {
            if task.status != TaskStatus::InProgress {
                return Err(format!("active task {id} has status {:?}", task.status));
            }
            if !seen.insert(*id) {
                return Err(format!("task {id} both pending and active"));
            }
        }
        for task in history.iter() {
            if !task.status.is_terminal() {
                return Err(format!("history task {} has status {:?}", task.id, task.status));
            }
            if !seen.insert(task.id) {
                return Err(format!("task {} is live and terminal at once", task.id));
            }
        }
        Ok(())
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Item;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, mpsc};
    use std::thread;

    fn task(id: TaskId, dest: Option<Point>) -> Task {
        Task::new(id, dest)
    }

    #[derive(Default)]
    struct CountingListener {
        pending: Mutex<Vec<usize>>,
        completed: Mutex<Vec<usize>>,
    }

    impl TaskListener for CountingListener {
        fn on_pending_count_changed(&self, pending: usize) {
            self.pending.lock().push(pending);
        }
        fn on_completed_count_changed(&self, completed: usize) {
            self.completed.lock().push(completed);
        }
    }

    /// Appends `(name, count)` to a log shared with other listeners.
    struct RecordingListener {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, usize)>>>,
    }

    impl TaskListener for RecordingListener {
        fn on_pending_count_changed(&self, pending: usize) {
            self.log.lock().push((self.name, pending));
        }
        fn on_completed_count_changed(&self, completed: usize) {
            self.log.lock().push((self.name, completed));
        }
    }

    struct PanickingListener;

    impl TaskListener for PanickingListener {
        fn on_pending_count_changed(&self, _pending: usize) {
            panic!("listener failure");
        }
        fn on_completed_count_changed(&self, _completed: usize) {
            panic!("listener failure");
        }
    }

    #[test]
    fn take_next_is_fifo() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        store.add_task(task(2, None));
        let first = store.take_next().expect("task available");
        assert_eq!(first.id, 1);
        assert_eq!(first.status, TaskStatus::InProgress);
        assert!(store.active_tasks().contains_key(&1));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn take_next_on_empty_queue_is_none() {
        let store = TaskStore::with_defaults();
        assert!(store.take_next().is_none());
    }

    #[test]
    fn requeued_task_jumps_the_queue() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        store.add_task(task(2, None));
        let a = store.take_next().expect("A");
        assert!(store.requeue_task(a.id));
        assert_eq!(store.take_next().map(|t| t.id), Some(1));
        assert_eq!(store.take_next().map(|t| t.id), Some(2));
    }

    #[test]
    fn requeue_of_unknown_task_is_noop() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        assert!(!store.requeue_task(1));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn battery_gate_rejects_expensive_task() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, Some(Point::new(2, 0))));
        // 2 blocks * 0.5 + 8.0 = 9.0 required
        assert!(store.take_next_for(7, Point::new(0, 0), 5.0).is_none());
        assert!(!store.is_claimed(7));
        assert_eq!(store.pending_count(), 1);

        let assigned = store
            .take_next_for(7, Point::new(0, 0), 20.0)
            .expect("enough battery");
        assert_eq!(assigned.id, 1);
        assert_eq!(assigned.robot_id, Some(7));
        assert_eq!(assigned.attempts, 1);
        assert!(store.is_claimed(7));
    }

    #[test]
    fn battery_gate_skips_to_affordable_task() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, Some(Point::new(9, 9))));
        store.add_task(task(2, Some(Point::new(1, 0))));
        let assigned = store
            .take_next_for(1, Point::new(0, 0), 10.0)
            .expect("near task affordable");
        assert_eq!(assigned.id, 2);
        assert_eq!(store.pending_tasks()[0].id, 1);
    }

    #[test]
    fn destinationless_task_only_needs_safety_margin() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        assert!(store.take_next_for(1, Point::new(0, 0), 7.9).is_none());
        assert!(store.take_next_for(1, Point::new(0, 0), 8.0).is_some());
    }

    #[test]
    fn claimed_robot_gets_no_second_task() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        store.add_task(task(2, None));
        assert!(store.take_next_for(3, Point::new(0, 0), 100.0).is_some());
        assert!(store.take_next_for(3, Point::new(0, 0), 100.0).is_none());
        assert!(store.complete_task(1));
        assert!(!store.is_claimed(3));
        assert_eq!(store.take_next_for(3, Point::new(0, 0), 100.0).map(|t| t.id), Some(2));
    }

    #[test]
    fn attempt_ceiling_retires_task() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        for attempt in 1..=3 {
            let t = store
                .take_next_for(1, Point::new(0, 0), 100.0)
                .expect("assignable");
            assert_eq!(t.attempts, attempt);
            assert!(store.requeue_task(t.id));
        }
        assert!(store.take_next_for(1, Point::new(0, 0), 100.0).is_none());
        let history = store.completed_tasks();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Failed);
        assert_eq!(store.pending_count(), 0);
        assert!(store.check_partition().is_ok());
    }

    #[test]
    fn exhausted_tasks_are_retired_while_later_task_is_assigned() {
        let store = TaskStore::with_defaults();
        let mut worn = task(1, None);
        worn.attempts = 3;
        store.add_task(worn);
        store.add_task(task(2, None));
        let assigned = store.take_next_for(1, Point::new(0, 0), 100.0);
        assert_eq!(assigned.map(|t| t.id), Some(2));
        assert_eq!(store.completed_tasks()[0].id, 1);
        assert!(store.check_partition().is_ok());
    }

    #[test]
    fn history_is_bounded_oldest_first() {
        let store = TaskStore::new(AssignmentPolicy {
            history_capacity: 2,
            ..AssignmentPolicy::default()
        });
        for id in 1..=3 {
            store.add_task(task(id, None));
            let t = store.take_next().expect("task");
            store.complete_task(t.id);
        }
        let ids: Vec<TaskId> = store.completed_tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn complete_twice_is_rejected() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        store.take_next();
        assert!(store.complete_task(1));
        assert!(!store.complete_task(1));
        assert_eq!(store.completed_count(), 1);
    }

    #[test]
    fn mark_failed_removes_from_pending() {
        let store = TaskStore::with_defaults();
        store.add_task(task(1, None));
        assert!(store.mark_failed(1));
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.completed_tasks()[0].status, TaskStatus::Failed);
        assert!(!store.mark_failed(1));
    }

    #[test]
    fn clear_all_resets_and_notifies_zero() {
        let store = TaskStore::with_defaults();
        let listener = Arc::new(CountingListener::default());
        store.add_listener(listener.clone());
        store.add_task(task(1, None));
        store.add_task(task(2, None));
        store.take_next_for(4, Point::new(0, 0), 100.0);
        store.clear_all();
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.completed_count(), 0);
        assert!(!store.is_claimed(4));
        assert_eq!(listener.pending.lock().last(), Some(&0));
        assert_eq!(listener.completed.lock().last(), Some(&0));
    }

    #[test]
    fn listeners_see_counts_in_order() {
        let store = TaskStore::with_defaults();
        let listener = Arc::new(CountingListener::default());
        store.add_listener(listener.clone());
        store.add_task(task(1, None));
        store.add_task(task(2, None));
        store.take_next();
        store.complete_task(1);
        assert_eq!(*listener.pending.lock(), vec![1, 2, 1]);
        assert_eq!(*listener.completed.lock(), vec![1]);
    }

    #[test]
    fn listeners_are_notified_in_registration_order() {
        let store = TaskStore::with_defaults();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            store.add_listener(Arc::new(RecordingListener {
                name,
                log: Arc::clone(&log),
            }));
        }
        store.add_task(task(1, None));
        store.take_next();
        store.complete_task(1);
        assert_eq!(
            *log.lock(),
            vec![
                ("first", 1),
                ("second", 1),
                ("first", 0),
                ("second", 0),
                ("first", 1),
                ("second", 1),
            ]
        );
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let store = TaskStore::with_defaults();
        let good = Arc::new(CountingListener::default());
        store.add_listener(Arc::new(PanickingListener));
        store.add_listener(good.clone());
        store.add_task(task(1, None));
        assert_eq!(store.pending_count(), 1);
        assert_eq!(*good.pending.lock(), vec![1]);
    }

    #[test]
    fn removed_listener_is_silent() {
        let store = TaskStore::with_defaults();
        let listener = Arc::new(CountingListener::default());
        let id = store.add_listener(listener.clone());
        assert!(store.remove_listener(id));
        assert!(!store.remove_listener(id));
        store.add_task(task(1, None));
        assert!(listener.pending.lock().is_empty());
    }

    struct FulfilledOrders(Mutex<Vec<String>>);

    impl OrderObserver for FulfilledOrders {
        fn on_order_fulfilled(&self, order_id: &str) {
            self.0.lock().push(order_id.to_string());
        }
    }

    #[test]
    fn order_is_fulfilled_after_last_task() {
        let observer = Arc::new(FulfilledOrders(Mutex::new(Vec::new())));
        let store = TaskStore::with_defaults().with_order_observer(observer.clone());
        let mut units = HashMap::new();
        units.insert("su-1".to_string(), Point::new(5, 5));
        let order = Order::new(
            "order-9",
            vec![
                Item::new("i1", "bolt", 0.1).stored_in("su-1"),
                Item::new("i2", "nut", 0.1).stored_in("missing"),
            ],
        );
        let ids = store.create_tasks_from_order(&order, &units);
        assert_eq!(ids.len(), 2);
        let pending = store.pending_tasks();
        assert_eq!(pending[0].destination, Some(Point::new(5, 5)));
        assert_eq!(pending[1].destination, None);
        assert!(pending.iter().all(|t| t.order_id.as_deref() == Some("order-9")));

        let first = store.take_next().expect("first");
        store.complete_task(first.id);
        assert!(observer.0.lock().is_empty());
        let second = store.take_next().expect("second");
        store.complete_task(second.id);
        assert_eq!(*observer.0.lock(), vec!["order-9".to_string()]);
    }

    #[test]
    fn closure_locator_resolves_destinations() {
        let store = TaskStore::with_defaults();
        let order = Order::new("o", vec![Item::new("i", "box", 1.0).stored_in("rack-a")]);
        let locate = |su: &str| (su == "rack-a").then_some(Point::new(4, 2));
        store.create_tasks_from_order(&order, &locate);
        assert_eq!(store.pending_tasks()[0].destination, Some(Point::new(4, 2)));
    }

    #[test]
    fn concurrent_claims_for_same_robot_assign_once() {
        let store = Arc::new(TaskStore::with_defaults());
        for id in 0..16 {
            store.add_task(task(id, None));
        }
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));
        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..contenders {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let wins = Arc::clone(&wins);
            handles.push(thread::spawn(move || {
                barrier.wait();
                if store.take_next_for(42, Point::new(0, 0), 100.0).is_some() {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("claim thread panicked");
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn concurrent_robots_never_share_a_task() {
        let store = Arc::new(TaskStore::with_defaults());
        let total = 200u64;
        for id in 0..total {
            store.add_task(task(id, Some(Point::new((id % 10) as i32, 0))));
        }
        let robots = 6u64;
        let barrier = Arc::new(Barrier::new(robots as usize));
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for robot in 0..robots {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                while let Some(t) = store.take_next_for(robot, Point::new(0, 0), 100.0) {
                    assert_eq!(t.robot_id, Some(robot));
                    tx.send(t.id).expect("send id");
                    assert!(store.complete_task(t.id));
                }
            }));
        }
        drop(tx);
        for handle in handles {
            handle.join().expect("robot thread panicked");
        }
        let mut seen = HashSet::new();
        for id in rx.iter() {
            assert!(seen.insert(id), "task {id} assigned twice");
        }
        assert_eq!(seen.len() as u64, total);
        assert!(store.check_partition().is_ok());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add,
        Take,
        TakeFor(u64, f64),
        Complete(usize),
        Requeue(usize),
        Fail(usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Add),
            Just(Op::Take),
            (0u64..3, 0.0f64..30.0).prop_map(|(r, b)| Op::TakeFor(r, b)),
            (0usize..8).prop_map(Op::Complete),
            (0usize..8).prop_map(Op::Requeue),
            (0usize..8).prop_map(Op::Fail),
        ]
    }

    proptest! {
        #[test]
        fn every_task_lives_in_exactly_one_collection(ops in prop::collection::vec(arb_op(), 1..60)) {
            let store = TaskStore::with_defaults();
            let mut ids = Vec::new();
            for op in ops {
                match op {
                    Op::Add => {
                        let id = store.next_task_id();
                        ids.push(id);
                        store.add_task(Task::new(id, Some(Point::new((id % 7) as i32, 3))));
                    }
                    Op::Take => { store.take_next(); }
                    Op::TakeFor(robot, battery) => { store.take_next_for(robot, Point::new(0, 0), battery); }
                    Op::Complete(i) => if let Some(&id) = ids.get(i) { store.complete_task(id); },
                    Op::Requeue(i) => if let Some(&id) = ids.get(i) { store.requeue_task(id); },
                    Op::Fail(i) => if let Some(&id) = ids.get(i) { store.mark_failed(id); },
                }
                prop_assert!(store.check_partition().is_ok());
            }
            let tracked = store.pending_count() + store.active_count() + store.completed_count();
            prop_assert_eq!(tracked, ids.len());
        }
    }
}
