//! Speedup and efficiency of the parallel flavours, computed from the appended result files.
//!
//! Repeated runs of one configuration are averaged first. A parallel configuration is compared
//! against the mean sequential time of the same size, sizes without a sequential measurement are
//! left out.
use crate::bench::{DIST_RESULTS, SEQ_RESULTS, SHARED_RESULTS};
use crate::env_var::Config;

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::*;

/// Mean `Time_s` per (size, workers)
pub type MeanTimes = BTreeMap<(usize, usize), f64>;

/// One parallel configuration against the sequential baseline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Speedup {
    pub size: usize,
    /// threads or participants
    pub workers: usize,
    pub seq_time: f64,
    pub time: f64,
    /// `seq_time / time`
    pub speedup: f64,
    /// `speedup / workers`
    pub efficiency: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub shared: Vec<Speedup>,
    pub dist: Vec<Speedup>,
}

fn column(header: &[&str], name: &str) -> anyhow::Result<usize> {
    match header.iter().position(|h| *h == name) {
        Some(idx) => Ok(idx),
        None => bail!("missing column {} in header {:?}", name, header.join(",")),
    }
}

/// Average `Time_s` over all rows of a result file, grouped by `Size` and the `workers` column.
///
/// Without a `workers` column (the sequential file) every row counts as one worker.
pub fn mean_times<R: BufRead>(reader: R, workers: Option<&str>) -> anyhow::Result<MeanTimes> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(header) => header?,
        None => return Ok(MeanTimes::new()),
    };
    let header: Vec<&str> = header.trim().split(',').collect();
    let size_col = column(&header, "Size")?;
    let time_col = column(&header, "Time_s")?;
    let workers_col = workers.map(|name| column(&header, name)).transpose()?;

    let mut sums: BTreeMap<(usize, usize), (f64, usize)> = BTreeMap::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 2;
        let fields: Vec<&str> = line.split(',').collect();
        let field = |col: usize| {
            fields
                .get(col)
                .copied()
                .with_context(|| format!("line {}: too few fields", line_no))
        };
        let size = field(size_col)?
            .parse::<usize>()
            .with_context(|| format!("line {}: bad size", line_no))?;
        let time = field(time_col)?
            .parse::<f64>()
            .with_context(|| format!("line {}: bad time", line_no))?;
        let workers = match workers_col {
            Some(col) => field(col)?
                .parse::<usize>()
                .with_context(|| format!("line {}: bad worker count", line_no))?,
            None => 1,
        };
        let entry = sums.entry((size, workers)).or_insert((0.0, 0));
        entry.0 += time;
        entry.1 += 1;
    }
    Ok(sums
        .into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect())
}

/// Speedup and efficiency of every parallel configuration that has a sequential baseline
pub fn speedups(seq: &MeanTimes, par: &MeanTimes) -> Vec<Speedup> {
    par.iter()
        .filter_map(|(&(size, workers), &time)| {
            let seq_time = *seq.get(&(size, 1))?;
            let speedup = seq_time / time;
            Some(Speedup {
                size,
                workers,
                seq_time,
                time,
                speedup,
                efficiency: speedup / workers as f64,
            })
        })
        .collect()
}

/// `None` when the file does not exist
fn open(path: &Path) -> anyhow::Result<Option<BufReader<File>>> {
    match File::open(path) {
        Ok(file) => Ok(Some(BufReader::new(file))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("unable to open {}", path.display())),
    }
}

fn parallel(path: &Path, workers: &str, seq: &MeanTimes) -> anyhow::Result<Vec<Speedup>> {
    let Some(reader) = open(path)? else {
        warn!("{} not found, skipping", path.display());
        return Ok(Vec::new());
    };
    let par = mean_times(reader, Some(workers))
        .with_context(|| format!("unable to read {}", path.display()))?;
    let rows = speedups(seq, &par);
    for s in &rows {
        info!(
            "[N={}, {}={}] mean time: {:.6} s (seq {:.6} s), speedup: {:.2}, efficiency: {:.2}",
            s.size, workers, s.workers, s.time, s.seq_time, s.speedup, s.efficiency
        );
    }
    Ok(rows)
}

/// Summarize the result files in the configured output directory.
///
/// The sequential file is required, a missing parallel file only skips its flavour.
pub fn run_summary(config: &Config) -> anyhow::Result<Summary> {
    let seq_path = config.output_dir.join(SEQ_RESULTS);
    let Some(reader) = open(&seq_path)? else {
        bail!(
            "{} not found, run the sequential benchmark first",
            seq_path.display()
        );
    };
    let seq = mean_times(reader, None)
        .with_context(|| format!("unable to read {}", seq_path.display()))?;
    for (&(size, _), time) in &seq {
        info!("[N={}] mean sequential time: {:.6} s", size, time);
    }
    Ok(Summary {
        shared: parallel(&config.output_dir.join(SHARED_RESULTS), "Threads", &seq)?,
        dist: parallel(&config.output_dir.join(DIST_RESULTS), "Participants", &seq)?,
    })
}
