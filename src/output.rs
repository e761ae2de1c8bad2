use std::collections::HashSet;
use std::io;

use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::types::Time;
use crate::utils::prelude::*;
use crate::workers::ServerReport;

/// How the summary is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Deserialize, Serialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Table,
    Json,
}

impl Default for Format {
    fn default() -> Self {
        Format::Table
    }
}

/// The aggregate result of a run
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// mean time in system over all jobs
    pub mean_sojourn: f64,
    /// mean over servers of their average queue length
    pub mean_queue_len: f64,
    /// mean over servers of their average number of jobs in system
    pub mean_system_len: f64,
    pub jobs: usize,
    pub servers: usize,
    /// sample standard deviation of the sojourn times, 0 for a single job
    pub sojourn_std_dev: f64,
    pub max_sojourn: f64,
    pub finished_at: Time,
    pub per_server: Vec<ServerReport>,
}

/// Reduce the per server reports, checking that each of the `jobs` jobs completed exactly once.
pub fn summarize(jobs: usize, finished_at: Time, per_server: Vec<ServerReport>) -> Result<Summary> {
    let mut seen = HashSet::with_capacity(jobs);
    let mut sojourns = Vec::with_capacity(jobs);
    for c in per_server.iter().flat_map(|r| r.completions.iter()) {
        assert!(seen.insert(c.job), "job {} completed twice", c.job);
        sojourns.push(c.sojourn.0);
    }
    if sojourns.len() != jobs {
        return Err(Error::Incomplete {
            expected: jobs,
            found: sojourns.len(),
        });
    }
    if per_server.is_empty() {
        return Err(Error::invalid("servers", "no server reported"));
    }

    let sojourn_std_dev = if sojourns.len() > 1 {
        sojourns.iter().std_dev()
    } else {
        0.0
    };
    let summary = Summary {
        mean_sojourn: sojourns.iter().mean(),
        mean_queue_len: per_server.iter().map(|r| r.occupancy.avg_queue_len).mean(),
        mean_system_len: per_server.iter().map(|r| r.occupancy.avg_system_len).mean(),
        jobs,
        servers: per_server.len(),
        sojourn_std_dev,
        max_sojourn: Statistics::max(sojourns.iter()),
        finished_at,
        per_server,
    };

    for r in &summary.per_server {
        debug!(
            server = r.server,
            processed = r.occupancy.processed,
            avg_queue_len = r.occupancy.avg_queue_len,
            avg_system_len = r.occupancy.avg_system_len,
            "server summary"
        );
    }
    Ok(summary)
}

impl Summary {
    pub fn render(&self, format: Format, mut writer: impl io::Write) -> Result<()> {
        match format {
            Format::Table => writeln!(
                writer,
                "mean sojourn time: {:.6} mean queue length: {:.6} mean system occupancy: {:.6} jobs: {}",
                self.mean_sojourn, self.mean_queue_len, self.mean_system_len, self.jobs
            )?,
            Format::Json => {
                serde_json::to_writer(&mut writer, self)?;
                writeln!(writer)?;
            }
        }
        Ok(())
    }
}
