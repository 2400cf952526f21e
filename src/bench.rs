//! Benchmark drivers: one trial per matrix size, for each flavour of parallelism.
//!
//! Trials generate fresh operands, time only the multiplication (plus reassembly for the
//! distributed flavour), validate against the sequential reference where there is something to
//! validate, and produce one record. The `run_*` sweeps iterate over the configured sizes and
//! append the records to the flavour's CSV file.
use crate::engine::{dist_dgemm, Operands};
use crate::env_var::Config;
use crate::error::{AllocError, DgemmError};
use crate::kernel::{dgemm_par, dgemm_seq, gflops};
use crate::lamellae::Backend;
use crate::matrix::Matrix;
use crate::oracle::{validate, Validation};
use crate::report::{DistRecord, ResultSink, SeqRecord, SharedRecord};
use crate::world::{World, WorldBuilder};

use anyhow::Context;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::time::Instant;
use tracing::*;

pub const DIST_RESULTS: &str = "results_dist.csv";
pub const SEQ_RESULTS: &str = "results_seq.csv";
pub const SHARED_RESULTS: &str = "results_shared.csv";

/// Operand generator for a trial of size `n`, reproducible when a seed is configured
pub fn operand_rng(seed: Option<u64>, n: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n as u64)),
        None => StdRng::from_entropy(),
    }
}

/// One distributed trial of size `n`. Collective over `world`.
///
/// The coordinator generates the operands and computes the sequential reference before the
/// distributed run, then validates the gathered result. Returns the record on the coordinator,
/// `None` on workers and, on every PE, `None` when `n` cannot be split across the group.
pub fn dist_trial(
    world: &World,
    n: usize,
    seed: Option<u64>,
) -> Result<Option<DistRecord>, DgemmError> {
    if let Err(e) = world.partition(n) {
        if world.is_coordinator() {
            warn!("{}, skipping", e);
        }
        return Ok(None);
    }

    let mut trial = if world.is_coordinator() {
        let prepared = Operands::random(n, &mut operand_rng(seed, n)).and_then(|ops| {
            let mut c_seq = Matrix::try_zeros(n, n, world.my_pe())?;
            dgemm_seq(ops.a.as_slice(), ops.b.as_slice(), c_seq.as_mut_slice(), n);
            Ok((ops, c_seq))
        });
        match prepared {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                error!("[pe {}] allocation failed for n = {}: {}", world.my_pe(), n, e);
                world.abort();
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let output = dist_dgemm(world, n, trial.as_mut().map(|(ops, _)| ops))?;

    let (Some(output), Some((_, c_seq))) = (output, trial) else {
        return Ok(None);
    };
    let validation = validate(c_seq.as_slice(), output.c.as_slice());
    let record = DistRecord {
        size: n,
        participants: world.num_pes(),
        time_s: output.elapsed,
        delta_max: validation.delta_max(),
        gflops: gflops(n, output.elapsed),
    };
    info!(
        "[N={}, P={}] Time: {:.6} s, GFLOPS: {:.2}, Delta: {:e}",
        n, record.participants, record.time_s, record.gflops, record.delta_max
    );
    debug!(
        "[pe {}] {:.3} MB sent so far on the {} backend",
        world.my_pe(),
        world.MB_sent(),
        world.backend()
    );
    if let Validation::Suspect { delta_max } = validation {
        warn!(
            "[N={}, P={}] difference ({:.3e}) above the limit ({:e})",
            n,
            record.participants,
            delta_max,
            crate::oracle::THRESHOLD
        );
    }
    Ok(Some(record))
}

/// Distributed trials for every size, in order. Collective over `world`.
///
/// The coordinator appends each record to `sink` as soon as its trial is done, so a later fatal
/// trial does not lose the finished ones.
pub fn dist_sweep<W: Write + Send>(
    world: &World,
    sizes: &[usize],
    seed: Option<u64>,
    sink: &Mutex<ResultSink<W>>,
) -> Result<Vec<DistRecord>, DgemmError> {
    let mut records = Vec::new();
    for &n in sizes {
        if let Some(record) = dist_trial(world, n, seed)? {
            if let Err(e) = sink.lock().append(&record) {
                world.abort();
                return Err(e.into());
            }
            records.push(record);
        }
    }
    Ok(records)
}

/// Launch one group per configured participant count and sweep the sizes on it.
pub fn run_dist(config: &Config) -> anyhow::Result<Vec<DistRecord>> {
    let backend = config
        .backend
        .parse::<Backend>()
        .map_err(anyhow::Error::msg)?;
    let path = config.output_dir.join(DIST_RESULTS);
    let sink = Mutex::new(
        ResultSink::open_append(&path)
            .with_context(|| format!("unable to open {}", path.display()))?,
    );
    let mut all = Vec::new();
    for &num_pes in &config.participants {
        if num_pes == 0 || (backend == Backend::Local && num_pes != 1) {
            warn!(
                "the {} backend cannot run {} participants, skipping",
                backend, num_pes
            );
            continue;
        }
        info!("running distributed benchmarks with {} participants", num_pes);
        let mut per_pe = WorldBuilder::new()
            .with_backend(backend)
            .with_num_pes(num_pes)
            .with_deadlock_timeout(config.deadlock_timeout)
            .with_pinned_threads(config.pin_threads)
            .launch(|world| dist_sweep(world, &config.sizes, config.seed, &sink))
            .with_context(|| format!("distributed run with {} participants failed", num_pes))?;
        all.append(&mut per_pe[0]);
    }
    Ok(all)
}

/// One sequential trial of size `n`
pub fn seq_trial(n: usize, seed: Option<u64>) -> Result<SeqRecord, AllocError> {
    let ops = Operands::random(n, &mut operand_rng(seed, n))?;
    let mut c = Matrix::try_zeros(n, n, 0)?;
    let start = Instant::now();
    dgemm_seq(ops.a.as_slice(), ops.b.as_slice(), c.as_mut_slice(), n);
    let elapsed = start.elapsed().as_secs_f64();
    Ok(SeqRecord {
        size: n,
        time_s: elapsed,
        gflops: gflops(n, elapsed),
    })
}

/// Sequential trials for every configured size
pub fn run_seq(config: &Config) -> anyhow::Result<Vec<SeqRecord>> {
    let path = config.output_dir.join(SEQ_RESULTS);
    let mut sink = ResultSink::open_append(&path)
        .with_context(|| format!("unable to open {}", path.display()))?;
    info!("running sequential benchmarks");
    let mut records = Vec::new();
    for &n in &config.sizes {
        match seq_trial(n, config.seed) {
            Ok(record) => {
                info!(
                    "[N={}] Time: {:.6} s, GFLOPS: {:.2}",
                    n, record.time_s, record.gflops
                );
                sink.append(&record)
                    .with_context(|| format!("unable to write {}", path.display()))?;
                records.push(record);
            }
            Err(e) => warn!("{}, skipping n = {}", e, n),
        }
    }
    Ok(records)
}

/// One shared memory trial of size `n` on `pool`, validated against the sequential reference
pub fn shared_trial(
    n: usize,
    pool: &rayon::ThreadPool,
    seed: Option<u64>,
) -> Result<(SharedRecord, Validation), AllocError> {
    let ops = Operands::random(n, &mut operand_rng(seed, n))?;
    let mut c = Matrix::try_zeros(n, n, 0)?;
    let mut c_seq = Matrix::try_zeros(n, n, 0)?;
    let start = Instant::now();
    dgemm_par(ops.a.as_slice(), ops.b.as_slice(), c.as_mut_slice(), n, pool);
    let elapsed = start.elapsed().as_secs_f64();
    dgemm_seq(ops.a.as_slice(), ops.b.as_slice(), c_seq.as_mut_slice(), n);
    let validation = validate(c_seq.as_slice(), c.as_slice());
    Ok((
        SharedRecord {
            size: n,
            threads: pool.current_num_threads(),
            time_s: elapsed,
            gflops: gflops(n, elapsed),
        },
        validation,
    ))
}

/// Shared memory trials for every configured thread count and size
pub fn run_shared(config: &Config) -> anyhow::Result<Vec<SharedRecord>> {
    let path = config.output_dir.join(SHARED_RESULTS);
    let mut sink = ResultSink::open_append(&path)
        .with_context(|| format!("unable to open {}", path.display()))?;
    let mut records = Vec::new();
    for &threads in &config.threads {
        info!("running shared memory benchmarks with {} threads", threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("dgemm_worker_{}", i))
            .build()
            .with_context(|| format!("unable to build a pool of {} threads", threads))?;
        for &n in &config.sizes {
            match shared_trial(n, &pool, config.seed) {
                Ok((record, validation)) => {
                    info!(
                        "[N={}, T={}] Time: {:.6} s, GFLOPS: {:.2}",
                        n, threads, record.time_s, record.gflops
                    );
                    if !validation.is_valid() {
                        warn!(
                            "[N={}, T={}] difference ({:.3e}) above the limit ({:e})",
                            n,
                            threads,
                            validation.delta_max(),
                            crate::oracle::THRESHOLD
                        );
                    }
                    sink.append(&record)
                        .with_context(|| format!("unable to write {}", path.display()))?;
                    records.push(record);
                }
                Err(e) => warn!("{}, skipping n = {}", e, n),
            }
        }
    }
    Ok(records)
}
