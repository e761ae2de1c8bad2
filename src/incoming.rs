//! The job generator, a.k.a. the client.

use rand::distributions::Distribution;
use rand::Rng;
use crate::randvars::{exponential, RandomVariable};
use crate::sim::{Handle, Mailbox};
use crate::types::{Duration, Job, Message};
use crate::utils::prelude::*;

/// One planned arrival: wait `gap`, then emit a job with `demand`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrival {
    pub gap: Duration,
    pub demand: f64,
}

impl Arrival {
    pub fn new(gap: f64, demand: f64) -> Self {
        Self {
            gap: Duration(gap),
            demand,
        }
    }
}

/// A finite arrival plan
pub struct Incoming<'a> {
    jobs: usize,
    plan: Box<dyn Iterator<Item = Arrival> + 'a>,
}

impl<'a> Incoming<'a> {
    /// `jobs` arrivals of a Poisson process with `rate`, each with a demand drawn from `service`.
    ///
    /// Gap and demand of a job are drawn one after the other from the same `rng`.
    pub fn poisson<R>(mut rng: R, jobs: usize, rate: f64, service: &RandomVariable) -> Result<Self>
    where
        R: Rng + 'a,
    {
        if !(rate > 0.0) {
            return Err(Error::invalid("arrival_rate", format!("must be positive, got {}", rate)));
        }
        let gaps = exponential(rate)?;
        let service = service.sampler()?;
        let plan = std::iter::from_fn(move || {
            let gap = Duration(gaps.sample(&mut rng));
            let demand = service.sample(&mut rng);
            Some(Arrival { gap, demand })
        })
        .take(jobs);
        Ok(Self {
            jobs,
            plan: Box::new(plan),
        })
    }

    /// A fixed list of arrivals, mostly for tests and replays
    pub fn trace(arrivals: impl IntoIterator<Item = Arrival>) -> Incoming<'static> {
        let arrivals: Vec<_> = arrivals.into_iter().collect();
        Incoming {
            jobs: arrivals.len(),
            plan: Box::new(arrivals.into_iter()),
        }
    }

    /// Number of jobs this plan emits, the shutdown marker not included
    pub fn jobs(&self) -> usize {
        self.jobs
    }
}

/// Emit every planned job to `dispatcher`, pacing by the planned gaps, then one shutdown marker.
pub async fn client(sim: Handle, incoming: Incoming<'_>, dispatcher: Mailbox<Message>) {
    let mut emitted = 0;
    for (id, arrival) in incoming.plan.enumerate() {
        sim.sleep(arrival.gap).await;
        let job = Job {
            id,
            arrival: sim.now(),
            demand: arrival.demand,
        };
        trace!(%job, "emit");
        dispatcher.put(Message::Job(job));
        emitted += 1;
    }
    assert_eq!(emitted, incoming.jobs, "arrival plan ended early");

    dispatcher.put(Message::Shutdown);
    debug!(emitted, "client done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PostOffice, Simulation};
    use crate::types::Time;
    use rand_seeder::{Seeder, SipRng};

    fn drain(mailbox: &Mailbox<Message>) -> Vec<Message> {
        std::iter::from_fn(|| mailbox.try_get()).collect()
    }

    #[test]
    fn trace_is_paced_and_terminated() {
        let mut sim = Simulation::new();
        let office = PostOffice::new();
        let dispatcher = office.mailbox("dispatcher");

        let plan = Incoming::trace(vec![Arrival::new(1.0, 5.0), Arrival::new(0.0, 1.0), Arrival::new(2.5, 3.0)]);
        assert_eq!(plan.jobs(), 3);
        sim.spawn("client", client(sim.handle(), plan, dispatcher.clone()));
        assert_eq!(sim.run().unwrap(), Time(3.5));

        let msgs = drain(&dispatcher);
        let expected = vec![
            Message::Job(Job { id: 0, arrival: Time(1.0), demand: 5.0 }),
            Message::Job(Job { id: 1, arrival: Time(1.0), demand: 1.0 }),
            Message::Job(Job { id: 2, arrival: Time(3.5), demand: 3.0 }),
            Message::Shutdown,
        ];
        assert_eq!(msgs, expected);
    }

    #[test]
    fn poisson_emits_exactly_n_jobs_then_one_shutdown() {
        let mut sim = Simulation::new();
        let office = PostOffice::new();
        let dispatcher = office.mailbox("dispatcher");

        let rng: SipRng = Seeder::from("incoming").make_rng();
        let service = RandomVariable::Exp { rate: 1.0, scale: 1.0 };
        let plan = Incoming::poisson(rng, 100, 2.0, &service).unwrap();
        sim.spawn("client", client(sim.handle(), plan, dispatcher.clone()));
        let end = sim.run().unwrap();

        let msgs = drain(&dispatcher);
        assert_eq!(msgs.len(), 101);
        assert_eq!(msgs.last(), Some(&Message::Shutdown));

        let mut last = Time(0.0);
        for (k, msg) in msgs[..100].iter().enumerate() {
            match msg {
                Message::Job(job) => {
                    assert_eq!(job.id, k);
                    assert!(job.arrival >= last);
                    assert!(job.demand > 0.0);
                    last = job.arrival;
                }
                Message::Shutdown => panic!("shutdown before job {}", k),
            }
        }
        // the first job also waited for a gap
        assert!(matches!(&msgs[0], Message::Job(j) if j.arrival > Time(0.0)));
        assert_eq!(end, last);
    }

    #[test]
    fn rejects_non_positive_rate() {
        let rng: SipRng = Seeder::from("incoming").make_rng();
        let service = RandomVariable::Constant { value: 1.0 };
        assert!(Incoming::poisson(rng.clone(), 10, 0.0, &service).is_err());
        assert!(Incoming::poisson(rng, 10, f64::NAN, &service).is_err());
    }
}
