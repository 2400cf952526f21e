//! Dense matrix-matrix multiplication (DGEMM) benchmarks under increasing levels of parallelism.
//!
//! Three flavours are measured with the same unrolled inner loop:
//! - sequential, a single call to [kernel::dgemm_seq] over the full operands
//! - shared memory, rows of the output split over a fixed size thread pool ([kernel::dgemm_par])
//! - distributed, row-blocks of the left operand scattered across a fixed group of participants (PEs)
//!   that share no memory and only exchange data through collectives ([engine::dist_dgemm])
//!
//! The distributed path is validated against the sequential reference by the [oracle]. The
//! [summary] turns the appended result files into speedup and efficiency figures.
//!
//! Participants communicate through a "lamellae" backend. Two such backends exist, one for a single PE ("local")
//! and one connecting a group of PEs with message channels ("channel"), useful for emulating a distributed environment on one node.
//!
//! EXAMPLES
//! --------
//!
//! # Launching a group and running one distributed trial
//! ```
//! use dgemm_lamellae::{engine, Backend, Matrix, Operands, WorldBuilder};
//!
//! fn main(){
//!     let n = 8;
//!     let results = WorldBuilder::new()
//!         .with_backend(Backend::Channel)
//!         .with_num_pes(4)
//!         .launch(move |world| {
//!             let mut operands = if world.is_coordinator() {
//!                 Some(Operands::random(n, &mut rand::thread_rng())?)
//!             } else {
//!                 None
//!             };
//!             engine::dist_dgemm(world, n, operands.as_mut())
//!         })
//!         .expect("group aborted");
//!     let output = results[0].as_ref().expect("coordinator result");
//!     println!("elapsed {} s", output.elapsed);
//! }
//! ```

pub mod arch;
mod barrier;
pub mod bench;
pub mod engine;
pub mod env_var;
pub mod error;
pub mod kernel;
mod lamellae;
pub mod matrix;
pub mod oracle;
pub mod report;
pub mod summary;
mod world;

pub use crate::arch::RowPartition;
pub use crate::engine::{DistOutput, Operands};
pub use crate::env_var::Config;
pub use crate::error::{AllocError, CommError, DgemmError, PartitionError, PartitionErrorKind};
pub use crate::lamellae::Backend;
pub use crate::matrix::Matrix;
pub use crate::world::{World, WorldBuilder, COORDINATOR};

/// Element types that can travel through the collectives.
///
/// Blanket implemented for every plain-old-data type that serde can move.
pub trait Dist:
    Copy + serde::ser::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
}
impl<T: Copy + serde::ser::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static> Dist
    for T
{
}

#[doc(hidden)]
pub fn serialize<T: ?Sized>(obj: &T) -> Result<Vec<u8>, bincode::Error>
where
    T: serde::Serialize,
{
    bincode::serialize(obj)
}

#[doc(hidden)]
pub fn deserialize<'a, T>(bytes: &'a [u8]) -> Result<T, bincode::Error>
where
    T: serde::Deserialize<'a>,
{
    bincode::deserialize(bytes)
}
