//! The simulation host.
//!
//! A single-threaded executor whose clock only moves when every task is blocked: tasks run until
//! they await a mailbox, a lock, a condition or a [`Sleep`], and once nothing is runnable the
//! clock jumps to the earliest pending timer. Simulated time therefore costs nothing, and a run
//! is fully determined by the tasks and the order they were spawned in.
//!
//! Tasks talk to each other through [`Mailbox`]es looked up by name in a [`PostOffice`], and
//! protect shared records with [`Mutex`] and [`Condvar`].

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

use itertools::Itertools;

use crate::types::{Duration, Time};
use crate::utils::prelude::*;

pub mod mailbox;
pub mod sync;

pub use mailbox::{Mailbox, PostOffice};
pub use sync::{Condvar, Mutex, MutexGuard};

thread_local! {
    /// Clock of the simulation currently running on this thread, read by the log formatter
    static CURRENT_TIME: Cell<Option<Time>> = Cell::new(None);
}

/// The simulated time, if a simulation is running on this thread
pub fn current_time() -> Option<Time> {
    CURRENT_TIME.with(|t| t.get())
}

type TaskId = usize;

struct Timer {
    at: Time,
    /// registration order, breaks ties between timers due at the same time
    seq: u64,
    waker: Waker,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .0
            .total_cmp(&other.at.0)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct Clock {
    now: Time,
    timers: BinaryHeap<Reverse<Timer>>,
    next_seq: u64,
}

impl Clock {
    fn schedule(&mut self, at: Time, waker: Waker) {
        assert!(at >= self.now, "timer at {} is in the past (now {})", at, self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Reverse(Timer { at, seq, waker }));
    }

    /// Move to the earliest timer and hand out its waker
    fn advance(&mut self) -> Option<Waker> {
        let Reverse(timer) = self.timers.pop()?;
        assert!(timer.at >= self.now, "clock must not go backwards");
        self.now = timer.at;
        Some(timer.waker)
    }
}

/// What tasks get to see of the simulation: the clock and a way to sleep on it
#[derive(Clone)]
pub struct Handle {
    clock: Rc<RefCell<Clock>>,
}

impl Handle {
    pub fn now(&self) -> Time {
        self.clock.borrow().now
    }

    /// Suspend the calling task for `duration` of simulated time
    pub fn sleep(&self, duration: Duration) -> Sleep {
        self.sleep_until(self.now() + duration)
    }

    pub fn sleep_until(&self, until: Time) -> Sleep {
        Sleep {
            clock: self.clock.clone(),
            until,
            armed: false,
        }
    }
}

/// Future returned by [`Handle::sleep`]
pub struct Sleep {
    clock: Rc<RefCell<Clock>>,
    until: Time,
    armed: bool,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut clock = this.clock.borrow_mut();
        if clock.now >= this.until {
            return Poll::Ready(());
        }
        if !this.armed {
            clock.schedule(this.until, cx.waker().clone());
            this.armed = true;
        }
        Poll::Pending
    }
}

/// Ids of tasks that were woken and wait to be polled
type RunQueue = Arc<StdMutex<VecDeque<TaskId>>>;

struct TaskWaker {
    id: TaskId,
    run_queue: RunQueue,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.run_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(self.id);
    }
}

struct Task {
    name: String,
    future: Pin<Box<dyn Future<Output = ()>>>,
    waker: Waker,
}

/// Owns all tasks and drives them on the simulated clock
pub struct Simulation {
    clock: Rc<RefCell<Clock>>,
    tasks: HashMap<TaskId, Task>,
    next_id: TaskId,
    run_queue: RunQueue,
    polls: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self {
            clock: Default::default(),
            tasks: Default::default(),
            next_id: 0,
            run_queue: Default::default(),
            polls: 0,
        }
    }

    pub fn handle(&self) -> Handle {
        Handle {
            clock: self.clock.clone(),
        }
    }

    pub fn now(&self) -> Time {
        self.clock.borrow().now
    }

    /// Register a named task. It first runs when [`Simulation::run`] is called, tasks spawned
    /// earlier run first.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        let name = name.into();

        let span = debug_span!("task", %name);
        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            run_queue: self.run_queue.clone(),
        }));
        self.tasks.insert(
            id,
            Task {
                name,
                future: Box::pin(future.instrument(span)),
                waker,
            },
        );
        self.push_runnable(id);
    }

    fn push_runnable(&self, id: TaskId) {
        self.run_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
    }

    fn pop_runnable(&self) -> Option<TaskId> {
        self.run_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn poll_task(&mut self, id: TaskId) {
        // woken after it finished
        let task = match self.tasks.get_mut(&id) {
            Some(task) => task,
            None => return,
        };

        self.polls += 1;
        let mut cx = Context::from_waker(&task.waker);
        if task.future.as_mut().poll(&mut cx).is_ready() {
            trace!(task = %task.name, "task finished");
            self.tasks.remove(&id);
        }
    }

    /// Run until every task finished. Returns the clock at that point.
    ///
    /// Fails if tasks are left that wait for something that can no longer happen.
    #[instrument(level = "debug", skip(self))]
    pub fn run(&mut self) -> Result<Time> {
        let _reset = CurrentTimeGuard;
        loop {
            CURRENT_TIME.with(|t| t.set(Some(self.now())));
            while let Some(id) = self.pop_runnable() {
                self.poll_task(id);
            }

            // nothing runnable, move the clock
            let next = self.clock.borrow_mut().advance();
            match next {
                Some(waker) => waker.wake(),
                None => break,
            }
        }

        let now = self.now();
        debug!(%now, polls = self.polls, "simulation drained");
        if self.tasks.is_empty() {
            Ok(now)
        } else {
            let blocked = self.tasks.values().map(|t| t.name.clone()).sorted().collect();
            Err(Error::Stalled { time: now.0, blocked })
        }
    }
}

/// Clears the thread local clock when the run ends, also on panic
struct CurrentTimeGuard;

impl Drop for CurrentTimeGuard {
    fn drop(&mut self) {
        CURRENT_TIME.with(|t| t.set(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Rc<RefCell<Vec<(&'static str, f64)>>> {
        Default::default()
    }

    #[test]
    fn sleep_advances_clock() {
        let mut sim = Simulation::new();
        let h = sim.handle();
        let events = log();
        let e = events.clone();
        sim.spawn("sleeper", async move {
            e.borrow_mut().push(("start", h.now().0));
            h.sleep(Duration(1.5)).await;
            e.borrow_mut().push(("woke", h.now().0));
            h.sleep(Duration(2.0)).await;
            e.borrow_mut().push(("done", h.now().0));
        });

        let end = sim.run().unwrap();
        assert_eq!(end, Time(3.5));
        assert_eq!(*events.borrow(), vec![("start", 0.0), ("woke", 1.5), ("done", 3.5)]);
    }

    #[test]
    fn tasks_interleave_by_time() {
        let mut sim = Simulation::new();
        let events = log();

        for (name, delay) in [("slow", 3.0), ("fast", 1.0), ("mid", 2.0)].iter().copied() {
            let h = sim.handle();
            let e = events.clone();
            sim.spawn(name, async move {
                h.sleep(Duration(delay)).await;
                e.borrow_mut().push((name, h.now().0));
            });
        }

        sim.run().unwrap();
        assert_eq!(*events.borrow(), vec![("fast", 1.0), ("mid", 2.0), ("slow", 3.0)]);
    }

    #[test]
    fn equal_deadlines_fire_in_registration_order() {
        let mut sim = Simulation::new();
        let events = log();

        for name in ["a", "b", "c"].iter().copied() {
            let h = sim.handle();
            let e = events.clone();
            sim.spawn(name, async move {
                h.sleep(Duration(1.0)).await;
                e.borrow_mut().push((name, h.now().0));
            });
        }

        sim.run().unwrap();
        let names: Vec<_> = events.borrow().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn zero_sleep_does_not_yield_time() {
        let mut sim = Simulation::new();
        let h = sim.handle();
        sim.spawn("zero", async move {
            h.sleep(Duration(0.0)).await;
            assert_eq!(h.now(), Time(0.0));
        });
        assert_eq!(sim.run().unwrap(), Time(0.0));
    }

    #[test]
    fn stalled_tasks_are_reported() {
        let mut sim = Simulation::new();
        let office: PostOffice<u32> = PostOffice::new();
        let inbox = office.mailbox("never-fed");
        sim.spawn("waiter", async move {
            inbox.get().await;
        });

        match sim.run() {
            Err(Error::Stalled { blocked, .. }) => assert_eq!(blocked, vec!["waiter".to_string()]),
            other => panic!("expected a stall, got {:?}", other.map(|t| t.0)),
        }
    }

    #[test]
    fn current_time_is_cleared_after_run() {
        let mut sim = Simulation::new();
        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        let h = sim.handle();
        sim.spawn("peek", async move {
            h.sleep(Duration(4.0)).await;
            s.set(current_time());
        });
        sim.run().unwrap();
        assert_eq!(seen.get(), Some(Time(4.0)));
        assert_eq!(current_time(), None);
    }
}
