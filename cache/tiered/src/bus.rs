//! The background bus that runs trim passes and refresh notifications.
//!
//! One named thread drains a deadline-ordered queue. Tasks run with the
//! queue lock released, so a task may post follow-up work. The trim tasks
//! re-post themselves this way, which also guarantees that at most one
//! instance of each is ever in flight. Panicking tasks are caught and
//! logged; the bus keeps running.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::error;

type Task = Box<dyn FnOnce() + Send>;

/// Identifies a pending task for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(u64);

struct BusState {
    /// Deadline-ordered queue; the id makes same-instant keys unique.
    queue: BTreeMap<(Instant, u64), Task>,
    /// Pending task id → deadline, for cancellation.
    pending: HashMap<u64, Instant>,
    next_id: u64,
    shutdown: bool,
}

struct BusInner {
    state: Mutex<BusState>,
    condvar: Condvar,
}

/// Handle to the shared bus thread. Clones post to the same queue.
#[derive(Clone)]
pub struct TrimBus {
    inner: Arc<BusInner>,
}

impl TrimBus {
    /// Spawn the bus thread and return a handle to it.
    pub fn new() -> Self {
        let inner = Arc::new(BusInner {
            state: Mutex::new(BusState {
                queue: BTreeMap::new(),
                pending: HashMap::new(),
                next_id: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_inner = inner.clone();
        thread::Builder::new()
            .name("cache-trim".to_string())
            .spawn(move || run_worker(worker_inner))
            .expect("failed to spawn cache-trim thread");

        Self { inner }
    }

    /// Queue `task` to run after `delay`. A zero delay runs it as soon as
    /// the bus thread is free.
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let due = Instant::now() + delay;
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.insert((due, id), Box::new(task));
        state.pending.insert(id, due);
        self.inner.condvar.notify_one();
        TaskHandle(id)
    }

    /// Drop a pending task. Returns false when the task already ran or was
    /// already cancelled.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let mut state = self.inner.state.lock();
        match state.pending.remove(&handle.0) {
            Some(due) => {
                state.queue.remove(&(due, handle.0));
                true
            }
            None => false,
        }
    }

    /// Stop the bus thread. Pending tasks are dropped unrun; later posts
    /// are accepted but never execute.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        self.inner.condvar.notify_all();
    }
}

impl Default for TrimBus {
    fn default() -> Self {
        Self::new()
    }
}

fn run_worker(inner: Arc<BusInner>) {
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            return;
        }

        let next_due = state.queue.keys().next().map(|(due, _)| *due);
        match next_due {
            None => {
                inner.condvar.wait(&mut state);
            }
            Some(due) if due > Instant::now() => {
                let _ = inner.condvar.wait_until(&mut state, due);
            }
            Some(_) => {
                if let Some(((_, id), task)) = state.queue.pop_first() {
                    state.pending.remove(&id);
                    MutexGuard::unlocked(&mut state, || {
                        if catch_unwind(AssertUnwindSafe(task)).is_err() {
                            error!("cache trim task panicked");
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;

    #[test]
    fn task_fires_after_delay() {
        let bus = TrimBus::new();
        let (tx, rx) = mpsc::channel();
        bus.post_delayed(Duration::from_millis(10), move || {
            tx.send(42u32).expect("test channel closed");
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(42));
        bus.shutdown();
    }

    #[test]
    fn tasks_fire_in_deadline_order() {
        let bus = TrimBus::new();
        let (tx, rx) = mpsc::channel();
        let late = tx.clone();
        bus.post_delayed(Duration::from_millis(60), move || {
            late.send("late").expect("test channel closed");
        });
        bus.post_delayed(Duration::from_millis(10), move || {
            tx.send("early").expect("test channel closed");
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("early"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("late"));
        bus.shutdown();
    }

    #[test]
    fn cancelled_task_never_runs() {
        let bus = TrimBus::new();
        let ran = Arc::new(AtomicU32::new(0));
        let flag = ran.clone();
        let handle = bus.post_delayed(Duration::from_millis(50), move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert!(bus.cancel(handle));
        assert!(!bus.cancel(handle));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        bus.shutdown();
    }

    #[test]
    fn task_can_repost_itself() {
        let bus = TrimBus::new();
        let (tx, rx) = mpsc::channel();
        let chained = bus.clone();
        bus.post_delayed(Duration::from_millis(5), move || {
            chained.post_delayed(Duration::from_millis(5), move || {
                tx.send("second hop").expect("test channel closed");
            });
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("second hop"));
        bus.shutdown();
    }

    #[test]
    fn panicking_task_does_not_kill_the_bus() {
        let bus = TrimBus::new();
        bus.post_delayed(Duration::from_millis(1), || panic!("boom"));
        let (tx, rx) = mpsc::channel();
        bus.post_delayed(Duration::from_millis(20), move || {
            tx.send("still alive").expect("test channel closed");
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("still alive"));
        bus.shutdown();
    }
}
