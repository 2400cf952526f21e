use crate::arch::RowPartition;
use crate::error::{CommError, CommResult, DgemmError, PartitionError};
use crate::lamellae::{
    create_lamellae, AbortFlag, Backend, CollectiveOp, Lamellae, LamellaeComm, SerializeHeader,
};
use crate::Dist;

use tracing::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The PE that owns the global operands, reassembles results and validates them
pub const COORDINATOR: usize = 0;

/// An abstraction representing one PE (participant) of a fixed size group.
///
/// Each PE of the group gets its own `World`, the only way data moves between PEs is through the
/// collectives below. Collectives are blocking, every PE of the group must call the same
/// collectives in the same order.
#[derive(Debug)]
pub struct World {
    lamellae: Lamellae,
    my_pe: usize,
    num_pes: usize,
    collective_cnt: AtomicUsize,
}

impl World {
    fn new(lamellae: Lamellae) -> World {
        World {
            my_pe: lamellae.my_pe(),
            num_pes: lamellae.num_pes(),
            lamellae,
            collective_cnt: AtomicUsize::new(0),
        }
    }

    /// Returns the id of this PE (roughly equivalent to MPI Rank)
    pub fn my_pe(&self) -> usize {
        self.my_pe
    }

    /// Returns the number of PEs in the group
    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    /// True on the single coordinator PE, false on workers
    pub fn is_coordinator(&self) -> bool {
        self.my_pe == COORDINATOR
    }

    pub fn backend(&self) -> Backend {
        self.lamellae.backend()
    }

    /// The row decomposition of an n x n matrix across this group
    pub fn partition(&self, n: usize) -> Result<RowPartition, PartitionError> {
        RowPartition::new(n, self.num_pes)
    }

    #[doc(hidden)]
    #[allow(non_snake_case)]
    pub fn MB_sent(&self) -> f64 {
        self.lamellae.MB_sent()
    }

    /// Terminate the whole group: every pending and future collective on every PE fails with [CommError::Aborted]
    pub fn abort(&self) {
        self.lamellae.abort();
    }

    fn next_header(&self, op: CollectiveOp, src_pe: usize) -> SerializeHeader {
        SerializeHeader {
            op,
            seq: self.collective_cnt.fetch_add(1, Ordering::SeqCst),
            src_pe,
        }
    }

    fn send_slice<T: Dist>(&self, dst: usize, header: &SerializeHeader, data: &[T]) -> CommResult<()> {
        let bytes = crate::serialize(&(header, data))?;
        self.lamellae.send(dst, bytes)
    }

    fn recv_into<T: Dist>(&self, src: usize, expected: &SerializeHeader, buf: &mut [T]) -> CommResult<()> {
        let bytes = self.lamellae.recv(src)?;
        let (header, data): (SerializeHeader, Vec<T>) = crate::deserialize(&bytes)?;
        header.check(expected)?;
        if data.len() != buf.len() {
            return Err(CommError::LengthMismatch {
                expected: buf.len(),
                found: data.len(),
            });
        }
        buf.copy_from_slice(&data);
        Ok(())
    }

    /// Block until every PE of the group has entered the barrier
    #[tracing::instrument(skip_all)]
    pub fn barrier(&self) -> CommResult<()> {
        self.lamellae.barrier()
    }

    /// Copy `buf` from `root` into `buf` on every other PE
    ///
    /// `buf` is only read on `root`, all PEs must pass buffers of the same length.
    /// Non-root PEs block until their copy has arrived. The root only blocks until its sends are
    /// queued, so it may leave the broadcast before the others have entered it; follow with
    /// [World::barrier] when every PE must be past this point.
    #[tracing::instrument(skip_all)]
    pub fn broadcast<T: Dist>(&self, buf: &mut [T], root: usize) -> CommResult<()> {
        let header = self.next_header(CollectiveOp::Broadcast, root);
        if self.my_pe == root {
            for pe in (0..self.num_pes).filter(|pe| *pe != root) {
                self.send_slice(pe, &header, buf)?;
            }
        } else {
            self.recv_into(root, &header, buf)?;
        }
        trace!("[pe {}] broadcast {} elems from {}", self.my_pe, buf.len(), root);
        Ok(())
    }

    /// Split `send` (only present on `root`) into `num_pes` equal contiguous blocks, block `i`
    /// lands in `recv` on PE `i`.
    ///
    /// Like [World::broadcast], the root returns once its blocks are queued while every other PE
    /// blocks until its block has arrived.
    ///
    /// # Panics
    /// if `root` passes no send buffer, or one that is not `num_pes * recv.len()` long
    #[tracing::instrument(skip_all)]
    pub fn scatter<T: Dist>(&self, send: Option<&[T]>, recv: &mut [T], root: usize) -> CommResult<()> {
        let header = self.next_header(CollectiveOp::Scatter, root);
        if self.my_pe == root {
            let Some(send) = send else {
                panic!("root pe {} must provide the scatter send buffer", root);
            };
            let block = recv.len();
            assert_eq!(
                send.len(),
                block * self.num_pes,
                "scatter send buffer must hold one block per pe"
            );
            for (pe, chunk) in send.chunks(block.max(1)).enumerate().take(self.num_pes) {
                if pe == root {
                    recv.copy_from_slice(chunk);
                } else {
                    self.send_slice(pe, &header, chunk)?;
                }
            }
        } else {
            self.recv_into(root, &header, recv)?;
        }
        trace!("[pe {}] scatter {} elems", self.my_pe, recv.len());
        Ok(())
    }

    /// Collect `send` from every PE into `recv` (only present on `root`), block `i` of `recv`
    /// comes from PE `i`.
    ///
    /// # Panics
    /// if `root` passes no receive buffer, or one that is not `num_pes * send.len()` long
    #[tracing::instrument(skip_all)]
    pub fn gather<T: Dist>(&self, send: &[T], recv: Option<&mut [T]>, root: usize) -> CommResult<()> {
        if self.my_pe == root {
            let Some(recv) = recv else {
                panic!("root pe {} must provide the gather receive buffer", root);
            };
            let block = send.len();
            assert_eq!(
                recv.len(),
                block * self.num_pes,
                "gather receive buffer must hold one block per pe"
            );
            let seq = self.collective_cnt.fetch_add(1, Ordering::SeqCst);
            for (pe, chunk) in recv.chunks_mut(block.max(1)).enumerate().take(self.num_pes) {
                if pe == root {
                    chunk.copy_from_slice(send);
                } else {
                    let expected = SerializeHeader {
                        op: CollectiveOp::Gather,
                        seq,
                        src_pe: pe,
                    };
                    self.recv_into(pe, &expected, chunk)?;
                }
            }
        } else {
            let header = self.next_header(CollectiveOp::Gather, self.my_pe);
            self.send_slice(root, &header, send)?;
        }
        trace!("[pe {}] gather {} elems", self.my_pe, send.len());
        Ok(())
    }
}

/// Errors a PE sees only because some other PE went away first
fn is_collateral(e: &DgemmError) -> bool {
    matches!(
        e,
        DgemmError::Comm(CommError::Aborted { .. }) | DgemmError::Comm(CommError::Disconnected { .. })
    )
}

/// Raises the group abort flag if the PE thread unwinds, so its peers do not wait forever.
struct AbortOnPanic {
    abort: Arc<AbortFlag>,
    pe: usize,
}

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("[pe {}] panicked, aborting group", self.pe);
            self.abort.raise(self.pe);
        }
    }
}

/// An implementation of the Builder design pattern, used to launch a fixed size group of PEs.
///
/// # Examples
///
///```
/// use dgemm_lamellae::{Backend, WorldBuilder};
///
/// let pes = WorldBuilder::new()
///                 .with_backend(Backend::Channel)
///                 .with_num_pes(4)
///                 .launch(|world| Ok(world.my_pe()))
///                 .unwrap();
/// assert_eq!(pes, vec![0, 1, 2, 3]);
///```
#[derive(Debug, Clone)]
pub struct WorldBuilder {
    backend: Backend,
    num_pes: usize,
    deadlock_timeout: f64,
    pin_threads: bool,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        WorldBuilder::new()
    }
}

impl WorldBuilder {
    /// Construct a new world builder, a single PE on the default backend
    pub fn new() -> WorldBuilder {
        WorldBuilder {
            backend: Default::default(),
            num_pes: 1,
            deadlock_timeout: 600.0,
            pin_threads: false,
        }
    }

    /// Specify the lamellae backend to use for this group
    pub fn with_backend(mut self, backend: Backend) -> WorldBuilder {
        self.backend = backend;
        self
    }

    /// Specify the number of PEs, fixed for the lifetime of the group
    pub fn with_num_pes(mut self, num_pes: usize) -> WorldBuilder {
        self.num_pes = num_pes;
        self
    }

    /// Seconds a PE waits in a barrier before reporting a potential deadlock, 0 disables the report
    pub fn with_deadlock_timeout(mut self, secs: f64) -> WorldBuilder {
        self.deadlock_timeout = secs;
        self
    }

    /// Pin every PE thread to its own core
    pub fn with_pinned_threads(mut self, pin: bool) -> WorldBuilder {
        self.pin_threads = pin;
        self
    }

    /// Run `f` once on every PE, each on its own thread, and return the results in PE order.
    ///
    /// A PE whose `f` returns an error aborts the group. In that case the error of the PE that
    /// caused the abort is returned in preference to the [CommError::Aborted] seen by its peers.
    /// A PE thread that cannot be spawned aborts the group and is reported as [DgemmError::Spawn].
    /// A panic on any PE is resumed on the caller after the group has been torn down.
    ///
    /// # Panics
    /// if the backend does not support the requested number of PEs
    pub fn launch<F, R>(self, f: F) -> Result<Vec<R>, DgemmError>
    where
        F: Fn(&World) -> Result<R, DgemmError> + Sync,
        R: Send,
    {
        let lamellae = create_lamellae(self.backend, self.num_pes, self.deadlock_timeout);
        let core_ids = if self.pin_threads {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        debug!(
            "launching {} pes on the {} backend",
            self.num_pes, self.backend
        );
        let f = &f;
        let core_ids = &core_ids;
        let results = std::thread::scope(|s| {
            let handles = lamellae
                .into_iter()
                .map(|lamellae| {
                    let world = World::new(lamellae);
                    let pe = world.my_pe();
                    let abort = world.lamellae.abort_flag();
                    let handle = std::thread::Builder::new()
                        .name(format!("pe_{}", pe))
                        .spawn_scoped(s, {
                            let abort = abort.clone();
                            move || {
                                if !core_ids.is_empty() {
                                    core_affinity::set_for_current(core_ids[pe % core_ids.len()]);
                                }
                                let _guard = AbortOnPanic {
                                    abort: abort.clone(),
                                    pe,
                                };
                                let res = f(&world);
                                if let Err(e) = &res {
                                    if !is_collateral(e) {
                                        error!("[pe {}] {}", pe, e);
                                    }
                                    abort.raise(pe);
                                }
                                res
                            }
                        });
                    if handle.is_err() {
                        abort.raise(pe);
                    }
                    handle
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.map(|h| h.join()))
                .collect::<Vec<_>>()
        });

        collect_outputs(results)
    }
}

type PeOutcome<R> = std::io::Result<std::thread::Result<Result<R, DgemmError>>>;

/// Unwrap the per-PE outcomes of a launch in PE order, preferring the error that caused an abort
/// over the errors of the PEs that were only torn down by it. Panics are resumed.
fn collect_outputs<R>(results: Vec<PeOutcome<R>>) -> Result<Vec<R>, DgemmError> {
    let mut outputs = Vec::with_capacity(results.len());
    let mut first_err: Option<DgemmError> = None;
    for (pe, res) in results.into_iter().enumerate() {
        let e = match res {
            Err(source) => DgemmError::Spawn { pe, source },
            Ok(Err(payload)) => std::panic::resume_unwind(payload),
            Ok(Ok(Ok(out))) => {
                outputs.push(out);
                continue;
            }
            Ok(Ok(Err(e))) => e,
        };
        let replace = match &first_err {
            None => true,
            Some(prev) => is_collateral(prev) && !is_collateral(&e),
        };
        if replace {
            first_err = Some(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(outputs),
    }
}
