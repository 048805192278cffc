//! The shared background clock for every periodic protocol.
//!
//! One worker thread drains a deadline-ordered heap of cancellable jobs:
//! movement polls, rotation steps, indicator animations, and the respawn
//! checker all run here. Jobs only ever *submit* work to world contexts,
//! so a tick is cheap and the single thread never becomes a bottleneck.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

/// What a repeating job tells the clock after one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

type Job = Box<dyn FnMut() -> Flow + Send + 'static>;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cancellation handle for a scheduled job. Dropping the handle does not
/// cancel the job; call [`TaskHandle::cancel`].
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn live() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle born cancelled, for work refused after shutdown.
    fn dead() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Deadline heap
// ---------------------------------------------------------------------------

/// Heap entry ordered by (due, seq). The sequence number keeps equal
/// deadlines FIFO and makes the ordering total.
struct DueJob {
    due: Instant,
    seq: u64,
    every: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    job: Job,
}

impl PartialEq for DueJob {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DueJob {}

impl PartialOrd for DueJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct ClockShared {
    queue: Mutex<BinaryHeap<Reverse<DueJob>>>,
    wakeup: Condvar,
    accepting: AtomicBool,
    next_seq: AtomicU64,
}

impl ClockShared {
    /// A poisoned queue lock only means some job panicked mid-tick; the
    /// heap itself is still coherent, so keep going.
    fn lock_queue(&self) -> MutexGuard<'_, BinaryHeap<Reverse<DueJob>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// TaskScheduler
// ---------------------------------------------------------------------------

/// The single background clock shared by every protocol in the director.
pub struct TaskScheduler {
    shared: Arc<ClockShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    done_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl TaskScheduler {
    pub fn start() -> Self {
        let shared = Arc::new(ClockShared {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            accepting: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
        });

        let (done_tx, done_rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("npc-clock".into())
            .spawn(move || {
                run_worker(worker_shared, done_tx);
            })
            .expect("failed to spawn clock worker thread");

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
            done_rx: Mutex::new(Some(done_rx)),
        }
    }

    /// Run `job` once after `delay`.
    pub fn schedule_once(&self, delay: Duration, job: impl FnOnce() + Send + 'static) -> TaskHandle {
        let mut job = Some(job);
        self.push(delay, None, move || {
            if let Some(job) = job.take() {
                job();
            }
            Flow::Stop
        })
    }

    /// Run `job` every `every`, starting after `initial_delay`, until it
    /// returns [`Flow::Stop`] or its handle is cancelled. Repeats are
    /// re-armed from completion, so a slow tick delays the next one rather
    /// than bunching.
    pub fn schedule_repeating(
        &self,
        initial_delay: Duration,
        every: Duration,
        job: impl FnMut() -> Flow + Send + 'static,
    ) -> TaskHandle {
        self.push(initial_delay, Some(every), job)
    }

    fn push(
        &self,
        delay: Duration,
        every: Option<Duration>,
        job: impl FnMut() -> Flow + Send + 'static,
    ) -> TaskHandle {
        if !self.shared.accepting.load(AtomicOrdering::SeqCst) {
            debug!("clock refused job: scheduler stopped");
            return TaskHandle::dead();
        }

        let handle = TaskHandle::live();
        let entry = DueJob {
            due: Instant::now() + delay,
            seq: self.shared.next_seq.fetch_add(1, AtomicOrdering::SeqCst),
            every,
            cancelled: Arc::clone(&handle.cancelled),
            job: Box::new(job),
        };

        self.shared.lock_queue().push(Reverse(entry));
        self.shared.wakeup.notify_all();
        handle
    }

    /// Number of queued (not yet fired) jobs, cancelled ones included.
    pub fn pending(&self) -> usize {
        self.shared.lock_queue().len()
    }

    /// Stop accepting work, wake the worker, and wait up to `wait` for it
    /// to exit. Queued jobs that have not fired are dropped.
    pub fn stop(&self, wait: Duration) {
        self.shared.accepting.store(false, AtomicOrdering::SeqCst);
        self.shared.wakeup.notify_all();

        let done_rx = self.done_rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(done_rx) = done_rx else {
            return; // already stopped
        };

        match done_rx.recv_timeout(wait) {
            Ok(()) => {
                if let Some(worker) = self
                    .worker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                {
                    let _ = worker.join();
                }
            }
            Err(_) => {
                // A job is wedged mid-tick. Leave the thread detached; the
                // shared flag keeps it from firing anything further.
                warn!("clock worker did not stop within {:?}; detaching", wait);
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shared.accepting.store(false, AtomicOrdering::SeqCst);
        self.shared.wakeup.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

fn run_worker(shared: Arc<ClockShared>, done_tx: mpsc::Sender<()>) {
    let mut guard = shared.lock_queue();

    loop {
        if !shared.accepting.load(AtomicOrdering::SeqCst) {
            break;
        }

        let now = Instant::now();
        let next_due = guard.peek().map(|Reverse(entry)| entry.due);

        match next_due {
            None => {
                guard = shared
                    .wakeup
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(due) if due > now => {
                let (g, _) = shared
                    .wakeup
                    .wait_timeout(guard, due - now)
                    .unwrap_or_else(PoisonError::into_inner);
                guard = g;
            }
            Some(_) => {
                let Some(Reverse(mut entry)) = guard.pop() else {
                    continue;
                };
                drop(guard);

                let flow = if entry.cancelled.load(AtomicOrdering::SeqCst) {
                    Flow::Stop
                } else {
                    run_one(&mut entry)
                };

                guard = shared.lock_queue();
                if flow == Flow::Continue {
                    if let Some(every) = entry.every {
                        if !entry.cancelled.load(AtomicOrdering::SeqCst)
                            && shared.accepting.load(AtomicOrdering::SeqCst)
                        {
                            entry.due = Instant::now() + every;
                            entry.seq = shared.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
                            guard.push(Reverse(entry));
                        }
                    }
                }
            }
        }
    }

    let _ = done_tx.send(());
}

/// Run one tick. A panicking job is dropped instead of taking the whole
/// clock down with it.
fn run_one(entry: &mut DueJob) -> Flow {
    match panic::catch_unwind(AssertUnwindSafe(|| (entry.job)())) {
        Ok(flow) => flow,
        Err(_) => {
            error!("clock job panicked; dropping the task");
            Flow::Stop
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn one_shot_fires_once() {
        let clock = TaskScheduler::start();
        let (tx, rx) = mpsc::channel();

        clock.schedule_once(Duration::from_millis(20), move || {
            tx.send("fired").unwrap();
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "fired");
        // Sender is dropped after the single run, so the channel closes.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        clock.stop(Duration::from_secs(1));
    }

    #[test]
    fn jobs_fire_in_deadline_order() {
        let clock = TaskScheduler::start();
        let (tx, rx) = mpsc::channel();

        for (delay_ms, tag) in [(150u64, "c"), (50, "a"), (100, "b")] {
            let tx = tx.clone();
            clock.schedule_once(Duration::from_millis(delay_ms), move || {
                tx.send(tag).unwrap();
            });
        }

        let mut fired = Vec::new();
        for _ in 0..3 {
            fired.push(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        }
        assert_eq!(fired, vec!["a", "b", "c"]);
        clock.stop(Duration::from_secs(1));
    }

    #[test]
    fn cancelled_one_shot_never_runs() {
        let clock = TaskScheduler::start();
        let (tx, rx) = mpsc::channel::<&str>();

        let handle = clock.schedule_once(Duration::from_millis(50), move || {
            tx.send("should not fire").unwrap();
        });
        handle.cancel();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        clock.stop(Duration::from_secs(1));
    }

    #[test]
    fn repeating_job_stops_itself_via_flow() {
        let clock = TaskScheduler::start();
        let (tx, rx) = mpsc::channel();

        let mut count = 0u32;
        clock.schedule_repeating(Duration::from_millis(10), Duration::from_millis(10), move || {
            count += 1;
            tx.send(count).unwrap();
            if count >= 3 {
                Flow::Stop
            } else {
                Flow::Continue
            }
        });

        let mut seen = Vec::new();
        while let Ok(n) = rx.recv_timeout(Duration::from_secs(2)) {
            seen.push(n);
            if seen.len() == 3 {
                break;
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
        // Job returned Stop; its sender is gone.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        clock.stop(Duration::from_secs(1));
    }

    #[test]
    fn repeating_job_cancel_stops_future_ticks() {
        let clock = TaskScheduler::start();
        let (tx, rx) = mpsc::channel();

        let handle = clock.schedule_repeating(
            Duration::from_millis(10),
            Duration::from_millis(10),
            move || {
                let _ = tx.send(());
                Flow::Continue
            },
        );

        // Let it tick a couple of times, then cancel.
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        handle.cancel();

        // Drain anything already in flight, then expect silence.
        std::thread::sleep(Duration::from_millis(100));
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        clock.stop(Duration::from_secs(1));
    }

    #[test]
    fn stopped_clock_refuses_new_work() {
        let clock = TaskScheduler::start();
        clock.stop(Duration::from_secs(1));

        let (tx, rx) = mpsc::channel::<&str>();
        let handle = clock.schedule_once(Duration::from_millis(10), move || {
            tx.send("late").unwrap();
        });

        assert!(handle.is_cancelled());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn stop_drops_queued_jobs() {
        let clock = TaskScheduler::start();
        let (tx, rx) = mpsc::channel::<&str>();

        clock.schedule_once(Duration::from_secs(30), move || {
            tx.send("far future").unwrap();
        });
        assert_eq!(clock.pending(), 1);

        clock.stop(Duration::from_secs(1));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn panicking_job_does_not_kill_the_clock() {
        let clock = TaskScheduler::start();
        let (tx, rx) = mpsc::channel();

        clock.schedule_once(Duration::from_millis(10), || {
            panic!("tick gone wrong");
        });
        clock.schedule_once(Duration::from_millis(60), move || {
            tx.send("survivor").unwrap();
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "survivor");
        clock.stop(Duration::from_secs(1));
    }
}
