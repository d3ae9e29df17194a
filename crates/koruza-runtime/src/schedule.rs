//! [`Schedule`] – per-task period timers for the control loops.
//!
//! Each periodic task is registered under a name with its period.  A loop
//! asks [`Schedule::due`] on every tick; the answer is `true` the first time
//! and then at most once per period.  The timers only give soft upper bounds:
//! a task runs on the first tick after its period has elapsed.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use koruza_runtime::schedule::Schedule;
//!
//! let mut schedule = Schedule::new();
//! schedule.register("heartbeat", Duration::from_secs(30));
//!
//! assert!(schedule.due("heartbeat"));
//! assert!(!schedule.due("heartbeat"));
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct TaskEntry {
    period: Duration,
    last_run: Option<Instant>,
}

/// Named period timers.
#[derive(Default)]
pub struct Schedule {
    tasks: HashMap<&'static str, TaskEntry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` with its `period`.  Re-registering resets the timer.
    pub fn register(&mut self, task: &'static str, period: Duration) {
        self.tasks.insert(
            task,
            TaskEntry {
                period,
                last_run: None,
            },
        );
    }

    /// Whether `task` should run now; a `true` answer starts its next period.
    ///
    /// Unregistered tasks are never due.
    pub fn due(&mut self, task: &str) -> bool {
        self.due_at(task, Instant::now())
    }

    pub(crate) fn due_at(&mut self, task: &str, now: Instant) -> bool {
        let Some(entry) = self.tasks.get_mut(task) else {
            return false;
        };
        let ready = entry
            .last_run
            .is_none_or(|last| now.saturating_duration_since(last) >= entry.period);
        if ready {
            entry.last_run = Some(now);
        }
        ready
    }
}
