use rand::distributions::Alphanumeric;
use rand::Rng;
use rand_seeder::{Seeder, SipRng};
use serde::{Deserialize, Serialize};

use crate::incoming::Incoming;
use crate::output::Format;
use crate::randvars::RandomVariable;
use crate::schedulers::RoutingPolicy;
use crate::simulator::Scenario;
use crate::utils::prelude::*;
use crate::workers::QueueDiscipline;

/// The server pool, usually given by the platform description
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub servers: usize,
    /// workload units per time unit
    pub speed: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkloadConfig {
    pub jobs: usize,
    /// per server, the generator runs at `arrival_rate * servers`
    pub arrival_rate: f64,
    pub service: RandomVariable,
}

/// Policy names are kept as given, unknown ones fall back to the default when the run is built
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    pub dispatch: String,
    pub queue: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: Format,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub seed: Option<String>,
    pub cluster: ClusterConfig,
    pub workload: WorkloadConfig,
    pub policy: PolicyConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimConfig {
    /// Read the `SimConfig` part of the global configuration
    pub fn load() -> Result<Self> {
        config().fetch()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.servers == 0 {
            return Err(Error::invalid("cluster.servers", "need at least one server"));
        }
        if !(self.cluster.speed > 0.0) {
            return Err(Error::invalid(
                "cluster.speed",
                format!("must be positive, got {}", self.cluster.speed),
            ));
        }
        if self.workload.jobs == 0 {
            return Err(Error::invalid("workload.jobs", "need at least one job"));
        }
        if !(self.workload.arrival_rate > 0.0) {
            return Err(Error::invalid(
                "workload.arrival_rate",
                format!("must be positive, got {}", self.workload.arrival_rate),
            ));
        }
        // also checks the distribution parameters
        self.workload.service.sampler()?;
        Ok(())
    }

    /// The configured seed, or a fresh one
    pub fn seed(&self) -> String {
        match &self.seed {
            Some(seed) => seed.clone(),
            None => {
                let seed: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(16)
                    .map(char::from)
                    .collect();
                info!(%seed, "no seed configured, drew a fresh one");
                seed
            }
        }
    }

    /// Aggregate arrival rate of the generator
    pub fn total_arrival_rate(&self) -> f64 {
        self.workload.arrival_rate * self.cluster.servers as f64
    }

    /// Expected utilization of each server, `arrival_rate * E[demand] / speed`
    pub fn offered_load(&self) -> f64 {
        self.workload.arrival_rate * self.workload.service.mean() / self.cluster.speed
    }

    /// Build a runnable scenario. The generator and the router draw from separate streams
    /// derived from the same seed.
    pub fn scenario(&self) -> Result<Scenario<SipRng>> {
        self.validate()?;
        let load = self.offered_load();
        if load >= 1.0 {
            warn!(load, "offered load per server is not below 1, queues will keep growing");
        } else {
            debug!(load, "offered load per server");
        }

        let seed = self.seed();
        let client_rng: SipRng = Seeder::from((seed.as_str(), "client")).make_rng();
        let router_rng: SipRng = Seeder::from((seed.as_str(), "router")).make_rng();

        let incoming = Incoming::poisson(
            client_rng,
            self.workload.jobs,
            self.total_arrival_rate(),
            &self.workload.service,
        )?;

        Ok(Scenario {
            servers: self.cluster.servers,
            speed: self.cluster.speed,
            routing: RoutingPolicy::parse_or_default(&self.policy.dispatch),
            discipline: QueueDiscipline::parse_or_default(&self.policy.queue),
            incoming,
            rng: router_rng,
        })
    }
}
