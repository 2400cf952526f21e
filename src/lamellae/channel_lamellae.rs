use super::{AbortFlag, Backend, LamellaeComm};
use crate::barrier::Barrier;
use crate::error::{CommError, CommResult};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wires up a fully connected group: one unbounded channel per ordered (src, dst) pair,
/// a shared barrier and a shared abort flag.
pub(crate) struct ChannelBuilder {
    num_pes: usize,
    deadlock_timeout: f64,
}

impl ChannelBuilder {
    pub(crate) fn new(num_pes: usize, deadlock_timeout: f64) -> ChannelBuilder {
        ChannelBuilder {
            num_pes,
            deadlock_timeout,
        }
    }

    pub(crate) fn build(self) -> Vec<Channel> {
        let num_pes = self.num_pes;
        let abort = Arc::new(AbortFlag::new());
        let barrier = Arc::new(Barrier::new(
            num_pes,
            self.deadlock_timeout,
            abort.clone(),
        ));
        // senders[src][dst], receivers[dst][src]
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = (0..num_pes).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Receiver<Vec<u8>>>> =
            (0..num_pes).map(|_| Vec::new()).collect();
        for src in 0..num_pes {
            for dst in 0..num_pes {
                let (tx, rx) = unbounded();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(my_pe, (senders, receivers))| Channel {
                my_pe,
                num_pes,
                senders,
                receivers,
                barrier: barrier.clone(),
                abort: abort.clone(),
                bytes_sent: AtomicUsize::new(0),
            })
            .collect()
    }
}

/// One PE's endpoint of a channel group
pub(crate) struct Channel {
    my_pe: usize,
    num_pes: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
    barrier: Arc<Barrier>,
    abort: Arc<AbortFlag>,
    bytes_sent: AtomicUsize,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Channel {{ pe: {} of {} }}", self.my_pe, self.num_pes)
    }
}

impl LamellaeComm for Channel {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Channel
    }
    fn barrier(&self) -> CommResult<()> {
        self.barrier.barrier(self.my_pe)
    }
    fn send(&self, dst: usize, data: Vec<u8>) -> CommResult<()> {
        self.abort.check()?;
        let len = data.len();
        self.senders[dst]
            .send(data)
            .map_err(|_| match self.abort.get() {
                Some(by_pe) => CommError::Aborted { by_pe },
                None => CommError::Disconnected { pe: dst },
            })?;
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }
    fn recv(&self, src: usize) -> CommResult<Vec<u8>> {
        loop {
            match self.receivers[src].recv_timeout(POLL_INTERVAL) {
                Ok(data) => return Ok(data),
                Err(RecvTimeoutError::Timeout) => self.abort.check()?,
                Err(RecvTimeoutError::Disconnected) => {
                    self.abort.check()?;
                    return Err(CommError::Disconnected { pe: src });
                }
            }
        }
    }
    fn abort(&self) {
        tracing::error!("[pe {}] aborting group of {} pes", self.my_pe, self.num_pes);
        self.abort.raise(self.my_pe);
    }
    fn abort_flag(&self) -> Arc<AbortFlag> {
        self.abort.clone()
    }
    fn MB_sent(&self) -> f64 {
        self.bytes_sent.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}
