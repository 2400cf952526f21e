use crate::error::{CommError, CommResult};

use enum_dispatch::enum_dispatch;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) mod channel_lamellae;
use channel_lamellae::{Channel, ChannelBuilder};
pub(crate) mod local_lamellae;
use local_lamellae::Local;

/// The list of available lamellae backends, used to specify how data is transferred between PEs
#[derive(
    serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy,
)]
pub enum Backend {
    /// The Local backend -- a single PE, collectives reduce to copies
    Local,
    /// The Channel backend -- a fixed group of PEs exchanging serialized messages over channels
    Channel,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Channel
    }
}

impl std::str::FromStr for Backend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "channel" => Ok(Backend::Channel),
            other => Err(format!(
                "unknown backend '{}', expected 'local' or 'channel'",
                other
            )),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Backend::Local => write!(f, "local"),
            Backend::Channel => write!(f, "channel"),
        }
    }
}

/// Which collective a message belongs to
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CollectiveOp {
    Broadcast,
    Scatter,
    Gather,
}

/// Prepended to every message. `seq` counts the collectives a PE has entered, every PE enters
/// them in the same order so the counters agree across the group.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SerializeHeader {
    pub(crate) op: CollectiveOp,
    pub(crate) seq: usize,
    pub(crate) src_pe: usize,
}

impl SerializeHeader {
    pub(crate) fn check(&self, expected: &SerializeHeader) -> CommResult<()> {
        if self == expected {
            Ok(())
        } else {
            Err(CommError::Protocol {
                expected: format!("{:?}", expected),
                found: format!("{:?}", self),
            })
        }
    }
}

const NOT_ABORTED: usize = usize::MAX;

/// Group wide abort flag, the first PE to raise it is recorded.
#[derive(Debug)]
pub(crate) struct AbortFlag {
    by_pe: AtomicUsize,
}

impl AbortFlag {
    pub(crate) fn new() -> AbortFlag {
        AbortFlag {
            by_pe: AtomicUsize::new(NOT_ABORTED),
        }
    }

    pub(crate) fn raise(&self, pe: usize) {
        let _ = self
            .by_pe
            .compare_exchange(NOT_ABORTED, pe, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> Option<usize> {
        match self.by_pe.load(Ordering::SeqCst) {
            NOT_ABORTED => None,
            pe => Some(pe),
        }
    }

    pub(crate) fn check(&self) -> CommResult<()> {
        match self.get() {
            Some(by_pe) => Err(CommError::Aborted { by_pe }),
            None => Ok(()),
        }
    }
}

#[enum_dispatch(LamellaeComm)]
#[derive(Debug)]
pub(crate) enum Lamellae {
    Local,
    Channel,
}

/// Point to point transport and synchronization for one PE
#[enum_dispatch]
pub(crate) trait LamellaeComm {
    fn my_pe(&self) -> usize;
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
    /// blocks until every PE of the group has entered the barrier
    fn barrier(&self) -> CommResult<()>;
    /// queue `data` for `dst`, never blocks
    fn send(&self, dst: usize, data: Vec<u8>) -> CommResult<()>;
    /// blocks until the next message from `src` arrives
    fn recv(&self, src: usize) -> CommResult<Vec<u8>>;
    /// tear down the whole group
    fn abort(&self);
    fn abort_flag(&self) -> Arc<AbortFlag>;
    #[allow(non_snake_case)]
    fn MB_sent(&self) -> f64;
}

/// Create one lamellae endpoint per PE of a group of `num_pes`
///
/// # Panics
/// if the local backend is asked for more than one PE
pub(crate) fn create_lamellae(
    backend: Backend,
    num_pes: usize,
    deadlock_timeout: f64,
) -> Vec<Lamellae> {
    assert!(num_pes > 0, "a group needs at least one pe");
    match backend {
        Backend::Local => {
            assert!(
                num_pes == 1,
                "the local backend only supports a single pe, requested {}",
                num_pes
            );
            vec![Lamellae::Local(Local::new())]
        }
        Backend::Channel => ChannelBuilder::new(num_pes, deadlock_timeout)
            .build()
            .into_iter()
            .map(Lamellae::Channel)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_str() {
        assert_eq!("local".parse::<Backend>().unwrap(), Backend::Local);
        assert_eq!("Channel".parse::<Backend>().unwrap(), Backend::Channel);
        assert!("rofi".parse::<Backend>().is_err());
    }

    #[test]
    fn first_abort_wins() {
        let flag = AbortFlag::new();
        assert!(flag.check().is_ok());
        flag.raise(2);
        flag.raise(0);
        assert_eq!(flag.get(), Some(2));
        assert!(matches!(flag.check(), Err(CommError::Aborted { by_pe: 2 })));
    }

    #[test]
    fn header_mismatch_is_protocol_error() {
        let expected = SerializeHeader {
            op: CollectiveOp::Scatter,
            seq: 3,
            src_pe: 0,
        };
        let found = SerializeHeader {
            op: CollectiveOp::Broadcast,
            ..expected
        };
        assert!(expected.check(&expected).is_ok());
        assert!(matches!(
            found.check(&expected),
            Err(CommError::Protocol { .. })
        ));
    }
}
