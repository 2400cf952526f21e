use std::collections::TryReserveError;

/// Why an (n, num_pes) pair cannot be decomposed into row-blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionErrorKind {
    /// n is not a multiple of the participant count
    NotDivisible,
    /// more participants than rows, every block would be empty
    TooManyParticipants,
    /// a group needs at least one participant
    NoParticipants,
}

/// An error that occurs when a matrix size cannot be split evenly across the participants.
///
/// This is a configuration error, the trial for that size is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionError {
    pub n: usize,
    pub num_pes: usize,
    pub kind: PartitionErrorKind,
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.kind {
            PartitionErrorKind::NotDivisible => write!(
                f,
                "size {} is not divisible by {} participants",
                self.n, self.num_pes
            ),
            PartitionErrorKind::TooManyParticipants => write!(
                f,
                "size {} has fewer rows than {} participants",
                self.n, self.num_pes
            ),
            PartitionErrorKind::NoParticipants => {
                write!(f, "size {} cannot be split across 0 participants", self.n)
            }
        }
    }
}

impl std::error::Error for PartitionError {}

/// A buffer allocation failed on a participant. Fatal to the whole group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocError {
    pub pe: usize,
    pub elems: usize,
    pub source: TryReserveError,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "pe {}: unable to allocate {} f64 elements",
            self.pe, self.elems
        )
    }
}

impl std::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Failures of the collective communication layer
#[derive(Debug)]
pub enum CommError {
    /// the group was torn down because a participant aborted
    Aborted { by_pe: usize },
    /// the channel to a participant closed underneath a collective
    Disconnected { pe: usize },
    /// a message from a different collective arrived
    Protocol { expected: String, found: String },
    /// a buffer does not have the length the collective requires
    LengthMismatch { expected: usize, found: usize },
    Serialization(bincode::Error),
}

impl std::fmt::Display for CommError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CommError::Aborted { by_pe } => write!(f, "group aborted by pe {}", by_pe),
            CommError::Disconnected { pe } => write!(f, "pe {} disconnected", pe),
            CommError::Protocol { expected, found } => {
                write!(f, "protocol error: expected {} found {}", expected, found)
            }
            CommError::LengthMismatch { expected, found } => write!(
                f,
                "buffer length mismatch: expected {} found {}",
                expected, found
            ),
            CommError::Serialization(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for CommError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bincode::Error> for CommError {
    fn from(e: bincode::Error) -> Self {
        CommError::Serialization(e)
    }
}

pub type CommResult<T> = Result<T, CommError>;

/// Everything a distributed trial can fail with
#[derive(Debug)]
pub enum DgemmError {
    Config(PartitionError),
    Alloc(AllocError),
    Comm(CommError),
    /// the coordinator could not record a finished trial
    Report(std::io::Error),
    /// a pe thread could not be started
    Spawn { pe: usize, source: std::io::Error },
}

impl std::fmt::Display for DgemmError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DgemmError::Config(e) => write!(f, "configuration error: {}", e),
            DgemmError::Alloc(e) => write!(f, "resource exhaustion: {}", e),
            DgemmError::Comm(e) => write!(f, "communication error: {}", e),
            DgemmError::Report(e) => write!(f, "unable to record result: {}", e),
            DgemmError::Spawn { pe, source } => {
                write!(f, "unable to spawn the thread of pe {}: {}", pe, source)
            }
        }
    }
}

impl std::error::Error for DgemmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DgemmError::Config(e) => Some(e),
            DgemmError::Alloc(e) => Some(e),
            DgemmError::Comm(e) => Some(e),
            DgemmError::Report(e) => Some(e),
            DgemmError::Spawn { source, .. } => Some(source),
        }
    }
}

impl From<PartitionError> for DgemmError {
    fn from(e: PartitionError) -> Self {
        DgemmError::Config(e)
    }
}

impl From<AllocError> for DgemmError {
    fn from(e: AllocError) -> Self {
        DgemmError::Alloc(e)
    }
}

impl From<CommError> for DgemmError {
    fn from(e: CommError) -> Self {
        DgemmError::Comm(e)
    }
}

impl From<std::io::Error> for DgemmError {
    fn from(e: std::io::Error) -> Self {
        DgemmError::Report(e)
    }
}
