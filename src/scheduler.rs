//! Cooperative task scheduler capability.
//!
//! The reconciler never runs its own event loop. It hands priority-tagged
//! [`Task`]s to a [`Scheduler`] and asks [`Scheduler::should_yield`] between
//! units of work. A task may return a continuation, which the scheduler keeps
//! in the task's slot so the same handle stays valid across slices.
//!
//! [`ManualScheduler`] is a deterministic single-threaded implementation that
//! only runs tasks when asked:
//!
//! ```ignore
//! let scheduler = Rc::new(ManualScheduler::new().slice_budget(Some(3)));
//! let root = create_root(host.clone(), scheduler.clone(), container);
//! root.render(app);
//! scheduler.run_next();   // renders at most three units, then yields
//! scheduler.flush_all();  // runs everything that is left
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;

/// The five fixed priority levels, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    /// Must run as soon as possible.
    Immediate,
    /// Result of user interaction.
    UserBlocking,
    /// Ordinary work.
    Normal,
    /// Work that can wait.
    Low,
    /// Work that runs only when idle.
    Idle,
}

/// Opaque handle identifying a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    /// Create a handle from a raw id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// A schedulable unit of work.
///
/// The argument tells the task whether it ran past its deadline. A returned
/// task is the continuation of the same job.
pub struct Task(Box<dyn FnOnce(bool) -> Option<Task>>);

impl Task {
    /// Wrap a closure as a task.
    pub fn new(f: impl FnOnce(bool) -> Option<Task> + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Run the task, returning its continuation if it has more work.
    pub fn run(self, did_timeout: bool) -> Option<Task> {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}

/// The scheduler services the reconciler consumes.
pub trait Scheduler {
    /// Queue `task` at `priority` and return a handle that can cancel it.
    fn schedule_callback(&self, priority: PriorityLevel, task: Task) -> CallbackHandle;

    /// Cancel a scheduled callback. Cancelling a finished or unknown handle is a no-op.
    fn cancel_callback(&self, handle: CallbackHandle);

    /// Whether the running task should hand control back.
    fn should_yield(&self) -> bool;

    /// The handle of the task that would run next.
    fn first_callback_node(&self) -> Option<CallbackHandle>;

    /// The priority of the task currently running, used to pick lanes for
    /// updates dispatched from inside it.
    fn current_priority_level(&self) -> PriorityLevel {
        PriorityLevel::Normal
    }
}

/// Default number of `should_yield` checks a task gets before it must yield.
///
/// `None` means tasks are never asked to yield.
pub const DEFAULT_SLICE_BUDGET: Option<usize> = None;

struct ScheduledTask {
    handle: CallbackHandle,
    priority: PriorityLevel,
    task: Task,
}

#[derive(Default)]
struct QueueState {
    tasks: Vec<ScheduledTask>,
    next_id: u64,
    running: Option<CallbackHandle>,
    running_cancelled: bool,
}

/// A deterministic scheduler driven explicitly by the embedder.
///
/// Tasks run in priority order, ties in scheduling order. The slice budget
/// models time: each run gets `budget` `should_yield` checks answered with
/// `false`, after which the running task is told to yield.
pub struct ManualScheduler {
    queue: RefCell<QueueState>,
    slice_budget: Cell<Option<usize>>,
    remaining: Cell<usize>,
    current_priority: Cell<PriorityLevel>,
    timed_out: Cell<bool>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Create an empty scheduler with [`DEFAULT_SLICE_BUDGET`].
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(QueueState::default()),
            slice_budget: Cell::new(DEFAULT_SLICE_BUDGET),
            remaining: Cell::new(0),
            current_priority: Cell::new(PriorityLevel::Normal),
            timed_out: Cell::new(false),
        }
    }

    /// Set how many units of work a task may perform per run.
    ///
    /// A budget of zero is treated as one so every run makes progress.
    pub fn slice_budget(self, budget: Option<usize>) -> Self {
        self.set_slice_budget(budget);
        self
    }

    /// Change the slice budget of an existing scheduler.
    pub fn set_slice_budget(&self, budget: Option<usize>) {
        self.slice_budget.set(budget.map(|b| b.max(1)));
    }

    /// Run the next task as if its deadline had expired.
    pub fn set_timed_out(&self, timed_out: bool) {
        self.timed_out.set(timed_out);
    }

    /// Run `f` with the current priority level set to `priority`.
    pub fn run_with_priority<R>(&self, priority: PriorityLevel, f: impl FnOnce() -> R) -> R {
        let _guard = PriorityGuard::enter(&self.current_priority, priority);
        f()
    }

    /// Number of queued tasks.
    pub fn pending_count(&self) -> usize {
        self.queue.borrow().tasks.len()
    }

    /// Priorities of the queued tasks in run order.
    pub fn pending_priorities(&self) -> Vec<PriorityLevel> {
        let queue = self.queue.borrow();
        let mut entries: Vec<_> = queue
            .tasks
            .iter()
            .map(|t| (t.priority, t.handle))
            .collect();
        entries.sort();
        entries.into_iter().map(|(priority, _)| priority).collect()
    }

    /// Run the most urgent task. Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        let scheduled = {
            let mut queue = self.queue.borrow_mut();
            let Some(position) = next_position(&queue.tasks) else {
                return false;
            };
            let scheduled = queue.tasks.remove(position);
            queue.running = Some(scheduled.handle);
            queue.running_cancelled = false;
            scheduled
        };

        self.remaining.set(self.slice_budget.get().unwrap_or(0));
        let ScheduledTask {
            handle,
            priority,
            task,
        } = scheduled;
        let continuation = {
            let _guard = PriorityGuard::enter(&self.current_priority, priority);
            task.run(self.timed_out.get())
        };

        let mut queue = self.queue.borrow_mut();
        let cancelled = std::mem::take(&mut queue.running_cancelled);
        queue.running = None;
        match continuation {
            Some(task) if !cancelled => {
                tracing::trace!(handle = handle.id(), "task yielded with continuation");
                queue.tasks.push(ScheduledTask {
                    handle,
                    priority,
                    task,
                });
            }
            Some(_) => {
                tracing::trace!(handle = handle.id(), "dropping continuation of cancelled task");
            }
            None => {}
        }
        true
    }

    /// Run tasks until the queue is empty. Returns how many runs happened.
    pub fn flush_all(&self) -> usize {
        let mut runs = 0;
        while self.run_next() {
            runs += 1;
        }
        runs
    }
}

fn next_position(tasks: &[ScheduledTask]) -> Option<usize> {
    tasks
        .iter()
        .enumerate()
        .min_by_key(|(_, t)| (t.priority, t.handle))
        .map(|(position, _)| position)
}

impl Scheduler for ManualScheduler {
    fn schedule_callback(&self, priority: PriorityLevel, task: Task) -> CallbackHandle {
        let mut queue = self.queue.borrow_mut();
        queue.next_id += 1;
        let handle = CallbackHandle::new(queue.next_id);
        queue.tasks.push(ScheduledTask {
            handle,
            priority,
            task,
        });
        handle
    }

    fn cancel_callback(&self, handle: CallbackHandle) {
        let mut queue = self.queue.borrow_mut();
        if queue.running == Some(handle) {
            queue.running_cancelled = true;
        }
        queue.tasks.retain(|t| t.handle != handle);
    }

    fn should_yield(&self) -> bool {
        if self.slice_budget.get().is_none() {
            return false;
        }
        match self.remaining.get() {
            0 => true,
            n => {
                self.remaining.set(n - 1);
                false
            }
        }
    }

    fn first_callback_node(&self) -> Option<CallbackHandle> {
        let queue = self.queue.borrow();
        next_position(&queue.tasks).map(|position| queue.tasks[position].handle)
    }

    fn current_priority_level(&self) -> PriorityLevel {
        self.current_priority.get()
    }
}

/// Restores the previous priority level on drop, including during unwinding.
struct PriorityGuard<'a> {
    slot: &'a Cell<PriorityLevel>,
    prev: PriorityLevel,
}

impl<'a> PriorityGuard<'a> {
    fn enter(slot: &'a Cell<PriorityLevel>, priority: PriorityLevel) -> Self {
        let prev = slot.replace(priority);
        Self { slot, prev }
    }
}

impl Drop for PriorityGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recording_task(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = log.clone();
        Task::new(move |_| {
            log.borrow_mut().push(name);
            None
        })
    }

    #[test]
    fn tasks_run_in_priority_then_fifo_order() {
        let scheduler = ManualScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        scheduler.schedule_callback(PriorityLevel::Normal, recording_task(&log, "normal-1"));
        scheduler.schedule_callback(PriorityLevel::Idle, recording_task(&log, "idle"));
        scheduler.schedule_callback(PriorityLevel::Immediate, recording_task(&log, "immediate"));
        scheduler.schedule_callback(PriorityLevel::Normal, recording_task(&log, "normal-2"));

        assert_eq!(scheduler.flush_all(), 4);
        assert_eq!(
            *log.borrow(),
            vec!["immediate", "normal-1", "normal-2", "idle"]
        );
    }

    #[test]
    fn cancelled_task_never_runs() {
        let scheduler = ManualScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let handle = scheduler.schedule_callback(PriorityLevel::Normal, recording_task(&log, "a"));
        scheduler.schedule_callback(PriorityLevel::Normal, recording_task(&log, "b"));
        scheduler.cancel_callback(handle);

        scheduler.flush_all();
        assert_eq!(*log.borrow(), vec!["b"]);
    }

    #[test]
    fn continuation_keeps_handle() {
        let scheduler = ManualScheduler::new();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let handle = scheduler.schedule_callback(
            PriorityLevel::Normal,
            Task::new(move |_| {
                runs_clone.set(runs_clone.get() + 1);
                let runs_clone = runs_clone.clone();
                Some(Task::new(move |_| {
                    runs_clone.set(runs_clone.get() + 1);
                    None
                }))
            }),
        );

        assert!(scheduler.run_next());
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduler.first_callback_node(), Some(handle));
        assert!(scheduler.run_next());
        assert_eq!(runs.get(), 2);
        assert!(!scheduler.run_next());
    }

    #[test]
    fn slice_budget_limits_checks_per_run() {
        let scheduler = ManualScheduler::new().slice_budget(Some(2));
        scheduler.remaining.set(2);
        assert!(!scheduler.should_yield());
        assert!(!scheduler.should_yield());
        assert!(scheduler.should_yield());

        let unbounded = ManualScheduler::new();
        assert!(!unbounded.should_yield());
    }

    #[test]
    fn priority_is_visible_inside_running_task() {
        let scheduler = Rc::new(ManualScheduler::new());
        let seen = Rc::new(Cell::new(PriorityLevel::Idle));
        let seen_clone = seen.clone();
        let scheduler_clone = scheduler.clone();

        scheduler.schedule_callback(
            PriorityLevel::UserBlocking,
            Task::new(move |_| {
                seen_clone.set(scheduler_clone.current_priority_level());
                None
            }),
        );
        scheduler.flush_all();

        assert_eq!(seen.get(), PriorityLevel::UserBlocking);
        assert_eq!(scheduler.current_priority_level(), PriorityLevel::Normal);
        let inside = scheduler.run_with_priority(PriorityLevel::Immediate, || {
            scheduler.current_priority_level()
        });
        assert_eq!(inside, PriorityLevel::Immediate);
    }
}
