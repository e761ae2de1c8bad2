use std::rc::Rc;

use rand::Rng;

use crate::incoming::{client, Incoming};
use crate::output::{summarize, Summary};
use crate::schedulers::{dispatcher, Router, RoutingPolicy};
use crate::sim::{PostOffice, Simulation};
use crate::types::Message;
use crate::utils::prelude::*;
use crate::workers::{ingress, worker, Cluster, QueueDiscipline};

/// Everything a single run needs
pub struct Scenario<R> {
    pub servers: usize,
    /// workload units per time unit, the same for every server
    pub speed: f64,
    pub routing: RoutingPolicy,
    pub discipline: QueueDiscipline,
    pub incoming: Incoming<'static>,
    /// random source of the router
    pub rng: R,
}

impl<R: Rng + 'static> Scenario<R> {
    /// Run to completion and aggregate the results
    pub fn simulate(self) -> Result<Summary> {
        if self.servers == 0 {
            return Err(Error::invalid("servers", "need at least one server"));
        }
        if !(self.speed > 0.0) {
            return Err(Error::invalid("speed", format!("must be positive, got {}", self.speed)));
        }

        let jobs = self.incoming.jobs();
        if jobs == 0 {
            return Err(Error::invalid("jobs", "need at least one job"));
        }
        let cluster = Rc::new(Cluster::new(self.servers, self.speed, self.discipline));
        let office = PostOffice::<Message>::new();
        let mut sim = Simulation::new();

        let mut outboxes = Vec::with_capacity(self.servers);
        for id in 0..self.servers {
            let inbox = office.mailbox(&format!("server-{}", id));
            sim.spawn(format!("ingress-{}", id), ingress(cluster.clone(), id, inbox.clone()));
            sim.spawn(format!("worker-{}", id), worker(sim.handle(), cluster.clone(), id));
            outboxes.push(inbox);
        }

        let inbox = office.mailbox("dispatcher");
        sim.spawn("client", client(sim.handle(), self.incoming, inbox.clone()));

        let router = Router::new(self.routing, self.servers, self.rng);
        sim.spawn("dispatcher", dispatcher(inbox, router, cluster.clone(), outboxes));

        info!(
            servers = self.servers,
            jobs,
            routing = %self.routing,
            discipline = %self.discipline,
            "simulation start"
        );
        let finished_at = sim.run()?;

        let undelivered = office.undelivered();
        assert!(undelivered.is_empty(), "messages left in {:?}", undelivered);

        let reports = cluster
            .iter()
            .map(|server| {
                server
                    .report()
                    .ok_or_else(|| Error::Others(anyhow::anyhow!("server {} still locked", server.id())))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(%finished_at, "simulation done");
        summarize(jobs, finished_at, reports)
    }
}
