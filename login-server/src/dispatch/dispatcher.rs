use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use slog::{debug, info};

use super::task::Task;

struct State {
    queue: VecDeque<Task>,
}

/// The single worker that serializes all scripted execution against
/// concurrent I/O and bus traffic. Everything that needs to touch the
/// event registry or the scripting bridge funnels through `add_task`.
pub struct Dispatcher {
    state: Mutex<State>,
    cond: Condvar,
    terminated: AtomicBool,
    cycle: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
    logger: slog::Logger,
}

impl Dispatcher {
    pub fn start(logger: slog::Logger) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher {
            state: Mutex::new(State { queue: VecDeque::new() }),
            cond: Condvar::new(),
            terminated: AtomicBool::new(false),
            cycle: AtomicU64::new(0),
            handle: Mutex::new(None),
            logger,
        });

        let worker = dispatcher.clone();
        let handle = thread::spawn(move || worker.run());
        *dispatcher.handle.lock().unwrap() = Some(handle);
        dispatcher
    }

    /// Appends under the lock and signals the worker only on the
    /// empty-to-non-empty transition; subsequent enqueues before the
    /// worker wakes are free of condvar overhead.
    pub fn add_task(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        let was_empty = state.queue.is_empty();
        state.queue.push_back(task);
        if was_empty {
            self.cond.notify_one();
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    fn run(self: Arc<Self>) {
        loop {
            let batch = {
                let mut state = self.state.lock().unwrap();
                while state.queue.is_empty() {
                    state = self.cond.wait(state).unwrap();
                }
                std::mem::take(&mut state.queue)
            };

            let now = Instant::now();
            for task in batch {
                if task.is_expired(now) {
                    debug!(self.logger, "dropping expired task");
                    continue;
                }
                task.run();
                self.cycle.fetch_add(1, Ordering::Relaxed);
            }

            if self.terminated.load(Ordering::SeqCst) {
                break;
            }
        }
        info!(self.logger, "dispatcher worker stopped");
    }

    /// Enqueues a terminal sentinel that flips the dispatcher to
    /// `Terminated` once it actually runs, then joins the worker thread.
    pub fn shutdown(self: &Arc<Self>) {
        let flag = self.clone();
        self.add_task(Task::new(move || {
            flag.terminated.store(true, Ordering::SeqCst);
        }));
        self.join();
    }

    fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_logger() -> slog::Logger {
        flux::logging::init("critical")
    }

    #[test]
    fn preserves_fifo_order() {
        let dispatcher = Dispatcher::start(test_logger());
        let (tx, rx) = mpsc::channel();
        for i in 0..50 {
            let tx = tx.clone();
            dispatcher.add_task(Task::new(move || tx.send(i).unwrap()));
        }
        dispatcher.shutdown();

        let received: Vec<i32> = rx.try_iter().collect();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn drops_expired_tasks_without_running() {
        let dispatcher = Dispatcher::start(test_logger());
        let (tx, rx) = mpsc::channel();
        let past = Instant::now() - Duration::from_secs(1);
        dispatcher.add_task(Task::with_deadline(past, move || tx.send(()).unwrap()));
        dispatcher.shutdown();

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn bumps_cycle_once_per_executed_task() {
        let dispatcher = Dispatcher::start(test_logger());
        for _ in 0..10 {
            dispatcher.add_task(Task::new(|| {}));
        }
        dispatcher.shutdown();
        // 10 real tasks + the shutdown sentinel itself.
        assert_eq!(dispatcher.cycle(), 11);
    }
}
