use dispatchsim::utils;
use dispatchsim::utils::prelude::*;

mod cli;
mod commands;

fn main() -> Result<()> {
    // panic setup should be done early
    utils::panic::setup();
    // basic logging setup, reconfigured once the config is complete
    let mut logging = utils::logging::setup()?;

    // initialize Configuration
    utils::app_config::init()?;

    trace!("Start cli execution");

    cli::execute(&mut logging)
}
