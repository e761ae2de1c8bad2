//! Named FIFO mailboxes. Putting never blocks, getting suspends until a message is there.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use itertools::Itertools;

struct Slot<T> {
    queue: VecDeque<T>,
    receivers: Vec<Waker>,
}

/// An unbounded mailbox. Clones refer to the same mailbox.
pub struct Mailbox<T> {
    name: Rc<str>,
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T> Mailbox<T> {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            slot: Rc::new(RefCell::new(Slot {
                queue: VecDeque::new(),
                receivers: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deposit a message, waking whoever waits on this mailbox
    pub fn put(&self, msg: T) {
        let mut slot = self.slot.borrow_mut();
        slot.queue.push_back(msg);
        for waker in slot.receivers.drain(..) {
            waker.wake();
        }
    }

    /// Take the oldest message, waiting for one if the mailbox is empty
    pub fn get(&self) -> Get<'_, T> {
        Get { mailbox: self }
    }

    /// Take the oldest message if there is one, without suspending
    #[cfg(test)]
    pub(crate) fn try_get(&self) -> Option<T> {
        self.slot.borrow_mut().queue.pop_front()
    }

    /// Number of messages not yet received
    pub fn len(&self) -> usize {
        self.slot.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Future returned by [`Mailbox::get`]
pub struct Get<'a, T> {
    mailbox: &'a Mailbox<T>,
}

impl<'a, T> Future for Get<'a, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.mailbox.slot.borrow_mut();
        match slot.queue.pop_front() {
            Some(msg) => Poll::Ready(msg),
            None => {
                if !slot.receivers.iter().any(|w| w.will_wake(cx.waker())) {
                    slot.receivers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// Hands out mailboxes by name, creating them on first use
pub struct PostOffice<T> {
    boxes: RefCell<HashMap<String, Mailbox<T>>>,
}

impl<T> Default for PostOffice<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PostOffice<T> {
    pub fn new() -> Self {
        Self {
            boxes: RefCell::new(HashMap::new()),
        }
    }

    pub fn mailbox(&self, name: &str) -> Mailbox<T> {
        self.boxes
            .borrow_mut()
            .entry(name.to_owned())
            .or_insert_with(|| Mailbox::new(name))
            .clone()
    }

    /// Names of mailboxes still holding undelivered messages
    pub fn undelivered(&self) -> Vec<String> {
        self.boxes
            .borrow()
            .values()
            .filter(|m| !m.is_empty())
            .map(|m| m.name().to_owned())
            .sorted()
            .collect()
    }
}
