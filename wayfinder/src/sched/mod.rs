use crate::cache::clock;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send>;
/// A timing task returns its next absolute due time (steady ms) to re-arm,
/// or `None` to retire itself.
type TimingJob = Box<dyn FnMut() -> Option<u64> + Send>;

struct TimerEntry {
    due: u64,
    seq: u64,
    job: TimingJob,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    name: &'static str,
    state: Mutex<State>,
    cond: Condvar,
}

/// A named single-threaded run loop with a submit queue and a min-heap of
/// timing tasks. Timing tasks re-arm themselves through their returned next
/// run time. All background work of the library runs on a small, fixed set
/// of these.
pub struct Executor {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl Executor {
    pub fn new(name: &'static str) -> Arc<Self> {
        let shared = Arc::new(Shared {
            name,
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("wayfinder-{name}"))
            .spawn(move || run_loop(loop_shared))
            .expect("spawn executor thread");
        Arc::new(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Runs `job` on the executor thread as soon as possible.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        state.jobs.push(Box::new(job));
        self.shared.cond.notify_one();
    }

    /// Schedules `job` after `delay`; the job re-arms itself by returning
    /// its next absolute due time.
    pub fn submit_timing(&self, delay: Duration, job: impl FnMut() -> Option<u64> + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(Reverse(TimerEntry {
            due: clock::steady_ms() + delay.as_millis() as u64,
            seq,
            job: Box::new(job),
        }));
        self.shared.cond.notify_one();
    }

    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            // A task may drop the last owner of this executor; never join
            // the run loop from itself.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(shared: Arc<Shared>) {
    debug!(executor = shared.name, "executor started");
    loop {
        enum Work {
            Jobs(Vec<Job>),
            Timer(TimerEntry),
        }

        let work = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    debug!(executor = shared.name, "executor stopped");
                    return;
                }
                if !state.jobs.is_empty() {
                    break Work::Jobs(std::mem::take(&mut state.jobs));
                }
                let now = clock::steady_ms();
                match state.timers.peek() {
                    Some(Reverse(entry)) if entry.due <= now => {
                        let Reverse(entry) = state.timers.pop().unwrap();
                        break Work::Timer(entry);
                    }
                    Some(Reverse(entry)) => {
                        let wait = Duration::from_millis(entry.due - now);
                        let (next, _) = shared.cond.wait_timeout(state, wait).unwrap();
                        state = next;
                    }
                    None => {
                        state = shared.cond.wait(state).unwrap();
                    }
                }
            }
        };

        match work {
            Work::Jobs(jobs) => {
                for job in jobs {
                    job();
                }
            }
            Work::Timer(mut entry) => {
                if let Some(next_due) = (entry.job)() {
                    let mut state = shared.state.lock().unwrap();
                    if !state.shutdown {
                        entry.due = next_due;
                        state.timers.push(Reverse(entry));
                    }
                }
            }
        }
    }
}
