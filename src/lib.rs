use crate::config::SimConfig;
use crate::output::Summary;
use crate::utils::prelude::*;

pub mod config;
pub mod incoming;
pub mod output;
pub mod randvars;
pub mod schedulers;
pub mod sim;
pub mod simulator;
pub mod types;
pub mod utils;
pub mod workers;

/// Run the simulation described by the global configuration
pub fn run_sim() -> Result<Summary> {
    let _g = info_span!("sim").entered();

    let cfg = SimConfig::load()?;
    let scenario = {
        let _g = info_span!("setup").entered();
        cfg.scenario()?
    };

    let summary = {
        let _g = info_span!("run").entered();
        scenario.simulate()?
    };

    info!(
        mean_sojourn = summary.mean_sojourn,
        mean_queue_len = summary.mean_queue_len,
        mean_system_len = summary.mean_system_len,
        jobs = summary.jobs,
        "done"
    );
    Ok(summary)
}
