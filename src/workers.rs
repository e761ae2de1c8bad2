//! Servers: a queue per server, fed by an ingress task and drained by a worker task.
//!
//! The two tasks of a server only share its [`ServerQueue`], behind the server's own lock. The
//! worker blocks on the server's condition while there is nothing to do.

use std::collections::VecDeque;
use std::ops::Index;
use std::rc::Rc;

use parse_display::{Display, FromStr};
use serde::Serialize;

use crate::sim::{Condvar, Handle, Mailbox, Mutex};
use crate::types::{Completion, Job, Message, ServerId};
use crate::utils::float;
use crate::utils::prelude::*;

/// Order of the pending jobs of a server. The worker always takes the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromStr)]
#[display(style = "lowercase")]
pub enum QueueDiscipline {
    /// arrival order
    Fcfs,
    /// shortest demand first
    Sjf,
    /// longest demand first
    Ljf,
}

impl Default for QueueDiscipline {
    fn default() -> Self {
        QueueDiscipline::Fcfs
    }
}

impl QueueDiscipline {
    /// Parse a user supplied token, falling back to the default with a warning
    pub fn parse_or_default(token: &str) -> Self {
        token.parse().unwrap_or_else(|_| {
            let fallback = Self::default();
            warn!(token, %fallback, "unknown queue policy, falling back to `{}`", fallback);
            fallback
        })
    }

    /// Append `job`, then restore the order. Equal demands may end up in any order.
    pub fn insert(&self, pending: &mut VecDeque<Job>, job: Job) {
        pending.push_back(job);
        match self {
            QueueDiscipline::Fcfs => {}
            QueueDiscipline::Sjf => pending
                .make_contiguous()
                .sort_by(|a, b| float::ascending(&a.demand, &b.demand)),
            QueueDiscipline::Ljf => pending
                .make_contiguous()
                .sort_by(|a, b| float::descending(&a.demand, &b.demand)),
        }
    }
}

/// Running averages of the queue length and the number of jobs in system.
///
/// Sampled once per dequeue rather than integrated over time, so these are means over dequeue
/// events and not time averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Occupancy {
    pub processed: usize,
    pub avg_queue_len: f64,
    pub avg_system_len: f64,
}

impl Occupancy {
    pub fn observe(&mut self, queued: usize, in_system: usize) {
        self.processed += 1;
        let n = self.processed as f64;
        self.avg_queue_len = (self.avg_queue_len * (n - 1.0) + queued as f64) / n;
        self.avg_system_len = (self.avg_system_len * (n - 1.0) + in_system as f64) / n;
    }
}

/// The state of a server shared by its ingress and its worker
#[derive(Debug, Default)]
pub struct ServerQueue {
    pending: VecDeque<Job>,
    /// jobs waiting in `pending`
    queued: usize,
    /// jobs waiting or in service
    in_system: usize,
    closed: bool,
    occupancy: Occupancy,
    completions: Vec<Completion>,
}

impl ServerQueue {
    pub fn admit(&mut self, job: Job, discipline: QueueDiscipline) {
        assert!(!self.closed, "{} arrived after shutdown", job);
        discipline.insert(&mut self.pending, job);
        self.queued += 1;
        self.in_system += 1;
        self.check();
    }

    /// No more jobs will be admitted
    pub fn close(&mut self) {
        assert!(!self.closed, "server closed twice");
        self.closed = true;
    }

    /// Remove the head job and sample the occupancy. `None` once closed and empty.
    pub fn dequeue(&mut self) -> Option<Job> {
        let job = self.pending.pop_front()?;
        self.queued -= 1;
        self.occupancy.observe(self.queued, self.in_system);
        self.check();
        Some(job)
    }

    /// The job in service is done
    pub fn finish(&mut self, completion: Completion) {
        assert!(self.in_system > self.queued, "no job in service");
        self.in_system -= 1;
        self.completions.push(completion);
        self.check();
    }

    pub fn queued(&self) -> usize {
        self.queued
    }

    pub fn in_system(&self) -> usize {
        self.in_system
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closed with nothing queued or in service
    pub fn is_drained(&self) -> bool {
        self.closed && self.in_system == 0
    }

    pub fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    fn check(&self) {
        assert_eq!(self.pending.len(), self.queued, "queue length out of sync");
        assert!(self.in_system >= self.queued, "{} in system but {} queued", self.in_system, self.queued);
        assert!(self.in_system <= self.queued + 1, "more than one job in service");
    }
}

/// What a server leaves behind once its worker terminated
#[derive(Debug, Clone, Serialize)]
pub struct ServerReport {
    pub server: ServerId,
    #[serde(flatten)]
    pub occupancy: Occupancy,
    #[serde(skip)]
    pub completions: Vec<Completion>,
}

pub struct Server {
    id: ServerId,
    /// workload units processed per time unit
    speed: f64,
    discipline: QueueDiscipline,
    queue: Mutex<ServerQueue>,
    wake: Condvar,
}

impl Server {
    pub fn new(id: ServerId, speed: f64, discipline: QueueDiscipline) -> Self {
        Self {
            id,
            speed,
            discipline,
            queue: Mutex::default(),
            wake: Condvar::new(),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Number of jobs queued or in service, read under the lock
    pub async fn in_system(&self) -> usize {
        self.queue.lock().await.in_system()
    }

    /// The final state, `None` while some task holds the lock
    pub fn report(&self) -> Option<ServerReport> {
        let queue = self.queue.try_lock()?;
        assert!(queue.is_drained(), "server {} reported before it drained", self.id);
        Some(ServerReport {
            server: self.id,
            occupancy: queue.occupancy(),
            completions: queue.completions().to_vec(),
        })
    }
}

/// All servers, indexed by id
pub struct Cluster {
    servers: Vec<Server>,
}

impl Cluster {
    pub fn new(servers: usize, speed: f64, discipline: QueueDiscipline) -> Self {
        Self {
            servers: (0..servers).map(|id| Server::new(id, speed, discipline)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter()
    }
}

impl Index<ServerId> for Cluster {
    type Output = Server;

    fn index(&self, id: ServerId) -> &Server {
        &self.servers[id]
    }
}

/// Receive the jobs routed to server `id` and queue them, until the shutdown marker arrives.
pub async fn ingress(cluster: Rc<Cluster>, id: ServerId, inbox: Mailbox<Message>) {
    let server = &cluster[id];
    let mut received = 0usize;
    loop {
        match inbox.get().await {
            Message::Job(job) => {
                trace!(%job, "admit");
                let mut queue = server.queue.lock().await;
                queue.admit(job, server.discipline);
                server.wake.notify_one();
                received += 1;
            }
            Message::Shutdown => {
                let mut queue = server.queue.lock().await;
                queue.close();
                server.wake.notify_all();
                break;
            }
        }
    }
    debug!(server = id, received, "ingress closed");
}

/// Serve the jobs of server `id` one at a time, until it is closed and empty.
pub async fn worker(sim: Handle, cluster: Rc<Cluster>, id: ServerId) {
    let server = &cluster[id];
    loop {
        let job = {
            let mut queue = server.queue.lock().await;
            while queue.queued() == 0 && !queue.is_closed() {
                queue = server.wake.wait(queue).await;
            }
            match queue.dequeue() {
                Some(job) => job,
                None => break,
            }
        };

        let service = job.service_time(server.speed);
        trace!(%job, %service, "start");
        sim.sleep(service).await;

        let sojourn = sim.now() - job.arrival;
        server.queue.lock().await.finish(Completion {
            job: job.id,
            server: id,
            sojourn,
        });
        trace!(job = job.id, %sojourn, "done");
    }
    debug!(server = id, "worker terminated");
}
