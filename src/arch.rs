use crate::error::{PartitionError, PartitionErrorKind};

use std::ops::Range;

type ArchResult<T> = Result<T, PartitionError>;

/// Blocked row decomposition of an n x n matrix across a fixed group of PEs.
///
/// PE `pe` owns rows `[pe * rows_per_pe, (pe + 1) * rows_per_pe)`. Blocks are contiguous,
/// do not overlap and together cover `[0, n)`. Only exact divisions are representable,
/// there is no remainder block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RowPartition {
    n: usize,
    num_pes: usize,
    rows_per_pe: usize,
}

impl RowPartition {
    /// Decompose `n` rows over `num_pes` participants
    ///
    /// Returns an error if `num_pes` is zero, larger than `n`, or does not divide `n`
    pub fn new(n: usize, num_pes: usize) -> ArchResult<RowPartition> {
        let err = |kind| PartitionError { n, num_pes, kind };
        if num_pes == 0 {
            return Err(err(PartitionErrorKind::NoParticipants));
        }
        if num_pes > n {
            return Err(err(PartitionErrorKind::TooManyParticipants));
        }
        if n % num_pes != 0 {
            return Err(err(PartitionErrorKind::NotDivisible));
        }
        Ok(RowPartition {
            n,
            num_pes,
            rows_per_pe: n / num_pes,
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn num_pes(&self) -> usize {
        self.num_pes
    }

    pub fn rows_per_pe(&self) -> usize {
        self.rows_per_pe
    }

    /// The half-open row range owned by `pe`
    pub fn rows(&self, pe: usize) -> Range<usize> {
        assert!(pe < self.num_pes, "invalid pe: {:?}", pe);
        pe * self.rows_per_pe..(pe + 1) * self.rows_per_pe
    }

    /// iterate over the row ranges in pe order
    pub fn iter(&self) -> RowPartitionIter {
        RowPartitionIter {
            partition: *self,
            cur_pe: 0,
        }
    }
}

pub struct RowPartitionIter {
    partition: RowPartition,
    cur_pe: usize,
}

impl Iterator for RowPartitionIter {
    type Item = (usize, Range<usize>);
    fn next(&mut self) -> Option<Self::Item> {
        if self.cur_pe < self.partition.num_pes {
            let pe = self.cur_pe;
            self.cur_pe += 1;
            Some((pe, self.partition.rows(pe)))
        } else {
            None
        }
    }
}
