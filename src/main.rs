use dgemm_lamellae::{bench, summary, Config};

use anyhow::{bail, Context};
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Mode {
    Seq,
    Shared,
    Dist,
    Summary,
    All,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seq" => Ok(Mode::Seq),
            "shared" => Ok(Mode::Shared),
            "dist" => Ok(Mode::Dist),
            "summary" => Ok(Mode::Summary),
            "all" => Ok(Mode::All),
            other => bail!(
                "unknown mode '{}', usage: dgemm-bench [seq|shared|dist|summary|all]",
                other
            ),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        bail!("usage: dgemm-bench [seq|shared|dist|summary|all]");
    }
    let mode = match args.get(1) {
        Some(arg) => arg.parse::<Mode>()?,
        None => Mode::Dist,
    };
    let config = Config::from_env().context("invalid DGEMM_ configuration")?;
    debug!("{:?}", config);

    if matches!(mode, Mode::Seq | Mode::All) {
        bench::run_seq(&config)?;
    }
    if matches!(mode, Mode::Shared | Mode::All) {
        bench::run_shared(&config)?;
    }
    if matches!(mode, Mode::Dist | Mode::All) {
        bench::run_dist(&config)?;
    }
    if matches!(mode, Mode::Summary | Mode::All) {
        summary::run_summary(&config)?;
    }
    info!("done, results in {}", config.output_dir.display());
    Ok(())
}
