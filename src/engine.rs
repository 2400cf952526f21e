//! The distributed DGEMM protocol.
//!
//! Every PE of a group calls [dist_dgemm] with the same `n`. The coordinator additionally
//! supplies the full operands. The right operand is broadcast whole, the left operand is
//! scattered in contiguous row-blocks (the coordinator keeps and computes the first block
//! itself), every PE multiplies its block with [dgemm_local], and the output blocks are gathered
//! back into the coordinator's global result in scatter order.
//!
//! Only the section between the post-distribution barrier and the end of the gather is timed.
use crate::error::{AllocError, DgemmError};
use crate::kernel::dgemm_local;
use crate::matrix::Matrix;
use crate::world::{World, COORDINATOR};

use rand::Rng;
use std::time::Instant;
use tracing::*;

/// The full left and right operands, only ever held by the coordinator
#[derive(Clone, Debug)]
pub struct Operands {
    pub a: Matrix,
    pub b: Matrix,
}

impl Operands {
    /// # Panics
    /// if the operands are not square matrices of the same size
    pub fn new(a: Matrix, b: Matrix) -> Operands {
        assert!(a.is_square() && b.is_square(), "operands must be square");
        assert_eq!(a.rows(), b.rows(), "operands must have the same size");
        Operands { a, b }
    }

    /// Two n x n matrices with elements drawn uniformly from `[0, 1]`
    pub fn random<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Operands, AllocError> {
        let a = Matrix::try_random(n, rng, COORDINATOR)?;
        let b = Matrix::try_random(n, rng, COORDINATOR)?;
        Ok(Operands { a, b })
    }

    pub fn n(&self) -> usize {
        self.a.rows()
    }
}

/// What the coordinator gets back from a distributed multiplication
#[derive(Clone, Debug)]
pub struct DistOutput {
    /// the reassembled global result
    pub c: Matrix,
    /// seconds from the post-distribution barrier to the end of the gather
    pub elapsed: f64,
}

/// Allocate or abort the whole group.
fn alloc_or_abort(world: &World, rows: usize, n: usize) -> Result<Matrix, DgemmError> {
    Matrix::try_zeros(rows, n, world.my_pe()).map_err(|e| {
        error!("[pe {}] allocation failed for n = {}: {}", world.my_pe(), n, e);
        world.abort();
        DgemmError::Alloc(e)
    })
}

/// Multiply the coordinator's operands across the group.
///
/// Collective: every PE must call this with the same `n`. `operands` must be `Some` on the
/// coordinator (it is only read, the mutable borrow lets the right operand double as the
/// broadcast buffer) and is ignored elsewhere.
///
/// Returns `Ok(Some(_))` on the coordinator and `Ok(None)` on workers.
/// Returns [DgemmError::Config] on every PE, without communicating, when `n` cannot be split evenly.
/// An allocation failure on any PE aborts the whole group.
///
/// # Panics
/// if the coordinator passes no operands or operands that are not n x n
pub fn dist_dgemm(
    world: &World,
    n: usize,
    operands: Option<&mut Operands>,
) -> Result<Option<DistOutput>, DgemmError> {
    let partition = world.partition(n)?;
    let rows = partition.rows_per_pe();
    let my_pe = world.my_pe();

    let (a_global, b_root) = match operands {
        Some(ops) if world.is_coordinator() => {
            assert_eq!(ops.n(), n, "coordinator operands must be {}x{}", n, n);
            (Some(&ops.a), Some(&mut ops.b))
        }
        Some(_) => (None, None),
        None => {
            assert!(
                !world.is_coordinator(),
                "the coordinator must provide the operands"
            );
            (None, None)
        }
    };

    // workers need their own copy of the whole right operand
    let mut b_recv = match b_root {
        Some(_) => None,
        None => Some(alloc_or_abort(world, n, n)?),
    };
    let mut a_local = alloc_or_abort(world, rows, n)?;
    let mut c_local = alloc_or_abort(world, rows, n)?;
    let mut c_global = if world.is_coordinator() {
        Some(alloc_or_abort(world, n, n)?)
    } else {
        None
    };

    let b: &Matrix = match (b_root, b_recv.as_mut()) {
        (Some(b), _) => {
            world.broadcast(b.as_mut_slice(), COORDINATOR)?;
            b
        }
        (None, Some(b)) => {
            world.broadcast(b.as_mut_slice(), COORDINATOR)?;
            b
        }
        (None, None) => unreachable!("workers always allocate a broadcast buffer"),
    };
    world.scatter(
        a_global.map(|a| a.as_slice()),
        a_local.as_mut_slice(),
        COORDINATOR,
    )?;
    debug!(
        "[pe {}] holds rows {:?} of {}",
        my_pe,
        partition.rows(my_pe),
        n
    );

    world.barrier()?;
    let start = Instant::now();

    dgemm_local(
        a_local.as_slice(),
        b.as_slice(),
        c_local.as_mut_slice(),
        n,
        rows,
    );
    world.gather(
        c_local.as_slice(),
        c_global.as_mut().map(|c| c.as_mut_slice()),
        COORDINATOR,
    )?;

    let elapsed = start.elapsed().as_secs_f64();
    Ok(c_global.map(|c| DistOutput { c, elapsed }))
}
