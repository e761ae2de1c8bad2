use std::io::{self, Write};

use dispatchsim::config::SimConfig;
use dispatchsim::output::Format;
use dispatchsim::utils::prelude::*;

pub trait Cmd {
    fn run(self) -> Result<()>;
}

/// Show the resolved configuration
pub struct DumpConfig;

impl Cmd for DumpConfig {
    fn run(self) -> Result<()> {
        let cfg = SimConfig::load()?;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(serde_yaml::to_string(&cfg)?.as_bytes())?;
        Ok(())
    }
}

/// Run the simulation end-to-end and print the summary
pub struct Run;

impl Cmd for Run {
    fn run(self) -> Result<()> {
        let format: Format = config().get("output.format")?;
        let summary = dispatchsim::run_sim()?;

        let stdout = io::stdout();
        summary.render(format, stdout.lock())
    }
}
