use std::path::PathBuf;

use structopt::StructOpt;

use dispatchsim::output::Format;
use dispatchsim::utils::logging::GlobalLoggingContext;
use dispatchsim::utils::prelude::*;

use crate::commands::{Cmd, DumpConfig, Run};

/// Simulate an open queueing network: Poisson arrivals dispatched to a pool of servers
#[derive(StructOpt, Debug)]
#[structopt(name = "dispatchsim")]
pub struct Opt {
    /// Platform description, a TOML or YAML file with at least the `cluster` table
    #[structopt(parse(from_os_str))]
    platform: PathBuf,

    /// Arrival rate per server
    lambda: f64,

    /// random | sqf | rr | two-random-choices | two-rr-random-choices
    dispatch_policy: Option<String>,

    /// fcfs | sjf | ljf
    queue_policy: Option<String>,

    /// Extra config file, merged before the platform description
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Apply the preset `presets.<NAME>`
    #[structopt(long)]
    preset: Option<String>,

    /// Seed of every random stream in the run
    #[structopt(long)]
    seed: Option<String>,

    /// Number of jobs to generate
    #[structopt(long)]
    jobs: Option<usize>,

    /// Render the summary as `table` or `json`
    #[structopt(long)]
    format: Option<Format>,

    /// Print the resolved configuration and exit
    #[structopt(long)]
    dump_config: bool,
}

impl Opt {
    /// Layer the sources named on the command line over the defaults
    fn apply(&self) -> Result<()> {
        let mut cfg = config_mut();
        if let Some(path) = &self.config {
            cfg.use_file(path)?;
        }
        cfg.use_file(&self.platform)?;
        if let Some(name) = &self.preset {
            cfg.use_preset(name)?;
        }

        cfg.set("workload.arrival_rate", self.lambda)?;
        if let Some(dispatch) = &self.dispatch_policy {
            cfg.set("policy.dispatch", dispatch.as_str())?;
        }
        if let Some(queue) = &self.queue_policy {
            cfg.set("policy.queue", queue.as_str())?;
        }
        if let Some(seed) = &self.seed {
            cfg.set("seed", seed.as_str())?;
        }
        if let Some(jobs) = self.jobs {
            cfg.set("workload.jobs", jobs as i64)?;
        }
        if let Some(format) = self.format {
            cfg.set("output.format", format.to_string())?;
        }
        Ok(())
    }
}

pub fn execute(logging: &mut GlobalLoggingContext) -> Result<()> {
    let opt = Opt::from_args();
    debug!(?opt, "parsed arguments");
    opt.apply()?;

    // the config may carry its own logging table, and stdout is ours from here
    logging.reconfigure(true)?;

    if opt.dump_config {
        DumpConfig.run()
    } else {
        Run.run()
    }
}
