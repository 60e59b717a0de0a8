use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ordis_core::error::{OrdisError, Result};
use ordis_core::event::EventBus;
use ordis_core::types::RuntimeEvent;
use ordis_eventlog::{EventLog, EventLogEntry};

/// Context handed to a task handler on each firing.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub payload: serde_json::Value,
    pub bus: Arc<EventBus>,
}

impl TaskContext {
    /// Request outside work (e.g. a channel message) via the event bus.
    pub fn request_work(&self, payload: serde_json::Value) {
        self.bus.publish(RuntimeEvent::TaskExecute {
            task_id: self.task_id.clone(),
            payload,
        });
    }
}

/// Handler invoked on each task firing. Shared by reference; the task
/// itself is owned by the scheduler.
pub trait TaskHandler: Send + Sync + 'static {
    fn run(&self, ctx: TaskContext) -> BoxFuture<'static, Result<()>>;
}

impl<F> TaskHandler for F
where
    F: Fn(TaskContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    fn run(&self, ctx: TaskContext) -> BoxFuture<'static, Result<()>> {
        self(ctx)
    }
}

/// Parse a 5- or 6-field cron expression. Five-field expressions get a
/// leading seconds field of `0`; anything else in the expression (ranges,
/// lists, steps, names, out-of-range values) is validated by the parser.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr),
        6 => expr.to_string(),
        n => {
            return Err(OrdisError::Schedule(format!(
                "cron expression '{}' has {} fields, expected 5 or 6",
                expr, n
            )))
        }
    };
    Schedule::from_str(&normalized)
        .map_err(|e| OrdisError::Schedule(format!("invalid cron expression '{}': {}", expr, e)))
}

enum ScheduleSpec {
    Cron(Box<Schedule>),
    Interval(chrono::Duration),
}

struct TaskState {
    id: String,
    spec: ScheduleSpec,
    enabled: bool,
    payload: serde_json::Value,
    handler: Arc<dyn TaskHandler>,
    running: Arc<AtomicBool>,
    last_run: Mutex<Option<DateTime<Utc>>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

impl TaskState {
    /// Recompute `next_run` from the wall clock after a firing instead of
    /// accumulating offsets, so timers do not drift.
    fn advance(&self, now: DateTime<Utc>) {
        let mut next = self.next_run.lock().expect("next_run lock");
        *next = match &self.spec {
            ScheduleSpec::Cron(schedule) => schedule.after(&now).next(),
            ScheduleSpec::Interval(interval) => {
                let mut candidate = next.unwrap_or(now);
                while candidate <= now {
                    candidate += *interval;
                }
                Some(candidate)
            }
        };
    }
}

/// Runs named recurring tasks with at-most-one concurrent execution per
/// task id. State is in-memory only; a restart starts fresh.
pub struct Scheduler {
    tasks: Mutex<Vec<Arc<TaskState>>>,
    bus: Arc<EventBus>,
    event_log: Arc<EventLog>,
    cancel: Mutex<Option<CancellationToken>>,
    notify: Arc<tokio::sync::Notify>,
}

impl Scheduler {
    pub fn new(bus: Arc<EventBus>, event_log: Arc<EventLog>) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            bus,
            event_log,
            cancel: Mutex::new(None),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Register a cron-scheduled task.
    pub fn add_cron_task(
        &self,
        id: &str,
        expr: &str,
        payload: serde_json::Value,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        let schedule = parse_cron(expr)?;
        let next = schedule.upcoming(Utc).next();
        self.push_task(TaskState {
            id: id.to_string(),
            spec: ScheduleSpec::Cron(Box::new(schedule)),
            enabled: true,
            payload,
            handler,
            running: Arc::new(AtomicBool::new(false)),
            last_run: Mutex::new(None),
            next_run: Mutex::new(next),
        });
        info!(task = id, schedule = expr, "Task registered");
        Ok(())
    }

    /// Register an interval task; it first fires one interval from now.
    pub fn add_interval_task(
        &self,
        id: &str,
        interval_ms: u64,
        payload: serde_json::Value,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        if interval_ms == 0 {
            return Err(OrdisError::Schedule(format!(
                "task '{}': interval_ms must be positive",
                id
            )));
        }
        let interval = chrono::Duration::milliseconds(interval_ms as i64);
        self.push_task(TaskState {
            id: id.to_string(),
            spec: ScheduleSpec::Interval(interval),
            enabled: true,
            payload,
            handler,
            running: Arc::new(AtomicBool::new(false)),
            last_run: Mutex::new(None),
            next_run: Mutex::new(Some(Utc::now() + interval)),
        });
        info!(task = id, interval_ms, "Task registered");
        Ok(())
    }

    fn push_task(&self, task: TaskState) {
        self.tasks.lock().expect("task list lock").push(Arc::new(task));
        self.notify.notify_one();
    }

    pub fn next_run(&self, id: &str) -> Option<DateTime<Utc>> {
        self.tasks
            .lock()
            .expect("task list lock")
            .iter()
            .find(|t| t.id == id)
            .and_then(|t| *t.next_run.lock().expect("next_run lock"))
    }

    pub fn last_run(&self, id: &str) -> Option<DateTime<Utc>> {
        self.tasks
            .lock()
            .expect("task list lock")
            .iter()
            .find(|t| t.id == id)
            .and_then(|t| *t.last_run.lock().expect("last_run lock"))
    }

    /// Start the firing loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut cancel_slot = self.cancel.lock().expect("cancel lock");
        if cancel_slot.as_ref().is_some_and(|c| !c.is_cancelled()) {
            return;
        }
        let cancel = CancellationToken::new();
        *cancel_slot = Some(cancel.clone());

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_loop(cancel).await;
        });
        info!("Scheduler started");
    }

    /// Stop future firings. Idempotent; an in-flight handler is not
    /// cancelled.
    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().expect("cancel lock").take() {
            cancel.cancel();
            info!("Scheduler stopped");
        }
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let now = Utc::now();

            let due: Vec<Arc<TaskState>> = {
                let tasks = self.tasks.lock().expect("task list lock");
                tasks
                    .iter()
                    .filter(|t| {
                        t.enabled
                            && t.next_run
                                .lock()
                                .expect("next_run lock")
                                .map(|n| n <= now)
                                .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            };

            for task in due {
                self.fire(&task, now);
                task.advance(now);
            }

            let next: Option<DateTime<Utc>> = {
                let tasks = self.tasks.lock().expect("task list lock");
                tasks
                    .iter()
                    .filter(|t| t.enabled)
                    .filter_map(|t| *t.next_run.lock().expect("next_run lock"))
                    .min()
            };
            let delay = match next {
                Some(n) => (n - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_millis(0)),
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.notify.notified() => {}
            }
        }
    }

    fn fire(&self, task: &Arc<TaskState>, now: DateTime<Utc>) {
        // At most one concurrent execution per task id: an overlapping
        // firing is skipped, not queued.
        if task.running.load(Ordering::SeqCst) {
            warn!(task = %task.id, "Previous run still in progress, skipping firing");
            self.bus.publish(RuntimeEvent::TaskSkipped {
                task_id: task.id.clone(),
            });
            let entry = EventLogEntry::system(
                format!("task:{}", task.id),
                serde_json::json!({"skipped": "previous run still in progress"}),
            );
            if let Err(e) = self.event_log.insert(entry) {
                error!(error = %e, "Failed to record task skip");
            }
            return;
        }

        task.running.store(true, Ordering::SeqCst);
        *task.last_run.lock().expect("last_run lock") = Some(now);

        let ctx = TaskContext {
            task_id: task.id.clone(),
            payload: task.payload.clone(),
            bus: Arc::clone(&self.bus),
        };
        let handler = Arc::clone(&task.handler);
        let running = Arc::clone(&task.running);
        let bus = Arc::clone(&self.bus);
        let event_log = Arc::clone(&self.event_log);
        let task_id = task.id.clone();

        tokio::spawn(async move {
            let result = handler.run(ctx).await;
            running.store(false, Ordering::SeqCst);
            match result {
                Ok(()) => {
                    bus.publish(RuntimeEvent::TaskCompleted {
                        task_id: task_id.clone(),
                    });
                }
                Err(e) => {
                    error!(task = %task_id, error = %e, "Task handler failed");
                    bus.publish(RuntimeEvent::TaskError {
                        task_id: task_id.clone(),
                        error: e.to_string(),
                    });
                    let entry =
                        EventLogEntry::error(format!("task:{}", task_id), e.to_string());
                    if let Err(log_err) = event_log.insert(entry) {
                        error!(error = %log_err, "Failed to record task error");
                    }
                }
            }
        });
    }
}
