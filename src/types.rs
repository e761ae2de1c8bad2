use std::fmt;
use std::ops::{Add, AddAssign, Deref, Sub};

use parse_display::Display;
use serde::{Deserialize, Serialize};

/// A time point in simulation
#[derive(Debug, Clone, Copy, Default, PartialOrd, PartialEq, Serialize, Deserialize)]
pub struct Time(pub f64);

/// A duration of time in simulation
#[derive(Debug, Clone, Copy, Default, PartialOrd, PartialEq, Serialize, Deserialize)]
pub struct Duration(pub f64);

// forward the formatter so that precision flags like `{:.2}` apply
impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Deref for Duration {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Self::Output {
        Time(self.0 + rhs.0)
    }
}

impl AddAssign<Duration> for Time {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl Sub for Time {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration(self.0 - rhs.0)
    }
}

/// Sequence number of a job, unique within a run
pub type JobId = usize;

/// Index of a server in the cluster table
pub type ServerId = usize;

/// A job travelling from the generator to a worker
#[derive(Debug, Clone, PartialEq, Display)]
#[display("Job({id}, @{arrival:.4}, demand={demand:.4})")]
pub struct Job {
    pub id: JobId,
    /// Simulated clock when the job was created
    pub arrival: Time,
    /// Positive amount of work, in workload units
    pub demand: f64,
}

impl Job {
    /// Time it takes a server processing `speed` workload units per time unit
    pub fn service_time(&self, speed: f64) -> Duration {
        Duration(self.demand / speed)
    }
}

/// What flows through the mailboxes
#[derive(Debug, Clone, PartialEq, Display)]
pub enum Message {
    #[display("{0}")]
    Job(Job),
    /// End of stream. Every recipient gets its own value.
    Shutdown,
}

/// Written once per job by the worker that finished it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Completion {
    pub job: JobId,
    pub server: ServerId,
    /// Time in system: completion minus arrival
    pub sojourn: Duration,
}
