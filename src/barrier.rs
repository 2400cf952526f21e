use crate::error::CommResult;
use crate::lamellae::AbortFlag;

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: usize,
}

/// A reusable counting barrier shared by every PE of a channel group.
///
/// Waiters wake up periodically to notice a group abort, and report a potential deadlock when
/// they have been waiting longer than the deadlock timeout.
#[derive(Debug)]
pub(crate) struct Barrier {
    num_pes: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
    deadlock_timeout: f64,
    abort: Arc<AbortFlag>,
}

impl Barrier {
    pub(crate) fn new(num_pes: usize, deadlock_timeout: f64, abort: Arc<AbortFlag>) -> Barrier {
        Barrier {
            num_pes,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cvar: Condvar::new(),
            deadlock_timeout,
            abort,
        }
    }

    pub(crate) fn barrier(&self, my_pe: usize) -> CommResult<()> {
        let mut state = self.state.lock();
        self.abort.check()?;
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.num_pes {
            state.arrived = 0;
            state.generation = generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(());
        }
        let mut s = Instant::now();
        while state.generation == generation {
            if let Err(e) = self.abort.check() {
                state.arrived -= 1;
                return Err(e);
            }
            self.cvar.wait_for(&mut state, POLL_INTERVAL);
            if self.deadlock_timeout > 0.0 && s.elapsed().as_secs_f64() > self.deadlock_timeout {
                tracing::warn!(
                    "[pe {}] Potential deadlock detected. \
                    Barrier is a collective operation requiring all PEs of the group to enter the barrier call, \
                    {} of {} have arrived. \
                    The deadlock timeout can be set via the DGEMM_DEADLOCK_TIMEOUT environment variable, the current timeout is {} seconds",
                    my_pe,
                    state.arrived,
                    self.num_pes,
                    self.deadlock_timeout
                );
                s = Instant::now();
            }
        }
        Ok(())
    }
}
