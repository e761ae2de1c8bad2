//! Mutex and condition variable for tasks of a [`Simulation`](super::Simulation).
//!
//! Same contract as their `std::sync` namesakes, except that blocking means suspending the task.
//! A lock must not be held across a [`Sleep`](super::Sleep), or other tasks stall behind it.

use std::cell::{Cell, RefCell, RefMut};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

pub struct Mutex<T> {
    locked: Cell<bool>,
    waiters: RefCell<Vec<Waker>>,
    value: RefCell<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: Cell::new(false),
            waiters: RefCell::new(Vec::new()),
            value: RefCell::new(value),
        }
    }

    pub fn lock(&self) -> Lock<'_, T> {
        Lock { mutex: self }
    }

    /// Take the lock if it is free, without suspending
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.locked.replace(true) {
            None
        } else {
            Some(MutexGuard {
                value: self.value.borrow_mut(),
                mutex: self,
            })
        }
    }

    fn unlock(&self) {
        self.locked.set(false);
        // everyone retries, losers queue up again
        for waker in self.waiters.borrow_mut().drain(..) {
            waker.wake();
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Future returned by [`Mutex::lock`]
pub struct Lock<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mutex: &'a Mutex<T> = self.mutex;
        match mutex.try_lock() {
            Some(guard) => Poll::Ready(guard),
            None => {
                mutex.waiters.borrow_mut().push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

pub struct MutexGuard<'a, T> {
    value: RefMut<'a, T>,
    mutex: &'a Mutex<T>,
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        // the RefMut is released right after this, before any woken task can run
        self.mutex.unlock();
    }
}

#[derive(Default)]
struct Waiter {
    notified: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl Waiter {
    fn notify(&self) {
        self.notified.set(true);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

#[derive(Default)]
pub struct Condvar {
    waiters: RefCell<VecDeque<Rc<Waiter>>>,
}

impl Condvar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `guard`, suspend until notified, then re-acquire the lock.
    ///
    /// The caller is queued before the lock is released, so a notification sent by whoever
    /// takes the lock next is never lost.
    pub async fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex;
        let waiter = Rc::new(Waiter::default());
        self.waiters.borrow_mut().push_back(waiter.clone());
        drop(guard);

        Notified { waiter }.await;
        mutex.lock().await
    }

    /// Wake the longest waiting task, if any
    pub fn notify_one(&self) {
        let waiter = self.waiters.borrow_mut().pop_front();
        if let Some(waiter) = waiter {
            waiter.notify();
        }
    }

    pub fn notify_all(&self) {
        let waiters: Vec<_> = self.waiters.borrow_mut().drain(..).collect();
        for waiter in waiters {
            waiter.notify();
        }
    }

    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.waiters.borrow().len()
    }
}

struct Notified {
    waiter: Rc<Waiter>,
}

impl Future for Notified {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.waiter.notified.get() {
            Poll::Ready(())
        } else {
            *self.waiter.waker.borrow_mut() = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Simulation;
    use crate::types::Duration;

    #[test]
    fn guard_releases_on_drop() {
        let m = Mutex::new(1);
        {
            let mut g = m.try_lock().unwrap();
            *g += 1;
            assert!(m.try_lock().is_none());
        }
        assert_eq!(*m.try_lock().unwrap(), 2);
    }

    #[test]
    fn lock_suspends_until_released() {
        let mut sim = Simulation::new();
        let m = Rc::new(Mutex::new(Vec::new()));

        // holds the lock across a sleep, which tasks should not do, but shows the exclusion
        let (m1, h1) = (m.clone(), sim.handle());
        sim.spawn("holder", async move {
            let mut g = m1.lock().await;
            g.push(("holder", h1.now().0));
            h1.sleep(Duration(2.0)).await;
        });
        let (m2, h2) = (m.clone(), sim.handle());
        sim.spawn("contender", async move {
            let mut g = m2.lock().await;
            g.push(("contender", h2.now().0));
        });

        sim.run().unwrap();
        assert_eq!(*m.try_lock().unwrap(), vec![("holder", 0.0), ("contender", 2.0)]);
    }

    #[test]
    fn wait_and_notify() {
        let mut sim = Simulation::new();
        let state = Rc::new((Mutex::new((0u32, false)), Condvar::new()));
        let seen = Rc::new(RefCell::new(vec![]));

        let (s, out, h) = (state.clone(), seen.clone(), sim.handle());
        sim.spawn("consumer", async move {
            let (m, cv) = &*s;
            loop {
                let mut g = m.lock().await;
                while g.0 == 0 && !g.1 {
                    g = cv.wait(g).await;
                }
                if g.0 == 0 {
                    break;
                }
                g.0 -= 1;
                out.borrow_mut().push(h.now().0);
            }
        });

        let (s, h) = (state.clone(), sim.handle());
        sim.spawn("producer", async move {
            let (m, cv) = &*s;
            for _ in 0..3 {
                h.sleep(Duration(1.0)).await;
                let mut g = m.lock().await;
                g.0 += 1;
                cv.notify_one();
            }
            let mut g = m.lock().await;
            g.1 = true;
            cv.notify_all();
        });

        sim.run().unwrap();
        assert_eq!(*seen.borrow(), vec![1.0, 2.0, 3.0]);
        assert_eq!(state.1.waiting(), 0);
    }

    #[test]
    fn notify_without_waiters_is_a_no_op() {
        let cv = Condvar::new();
        cv.notify_one();
        cv.notify_all();
        assert_eq!(cv.waiting(), 0);
    }
}
