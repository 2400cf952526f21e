//! Owned, row-major matrices of `f64`.
//!
//! A [Matrix] is either *global* (all `n` rows, only ever held by the coordinator) or *local*
//! (one row-block of `rows_per_pe` rows, held by every participant). In both cases the buffer
//! length is exactly `rows * n`. Buffers are released when the matrix is dropped, so nothing
//! outlives the trial that allocated it.
use crate::error::AllocError;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Allocate a zeroed `rows x cols` matrix, reporting allocation failure instead of aborting the process.
    ///
    /// `pe` is only used to attribute the failure.
    pub fn try_zeros(rows: usize, cols: usize, pe: usize) -> Result<Matrix, AllocError> {
        let mut data = Vec::new();
        let elems = rows.checked_mul(cols).unwrap_or(usize::MAX);
        data.try_reserve_exact(elems)
            .map_err(|source| AllocError { pe, elems, source })?;
        data.resize(elems, 0.0);
        Ok(Matrix { rows, cols, data })
    }

    /// Allocate an n x n matrix with elements drawn uniformly from `[0, 1]`
    pub fn try_random<R: Rng + ?Sized>(
        n: usize,
        rng: &mut R,
        pe: usize,
    ) -> Result<Matrix, AllocError> {
        let mut mat = Matrix::try_zeros(n, n, pe)?;
        let dist = Uniform::new_inclusive(0.0, 1.0);
        for elem in mat.data.iter_mut() {
            *elem = dist.sample(rng);
        }
        Ok(mat)
    }

    /// Wrap an existing row-major buffer
    ///
    /// # Panics
    /// if `data.len() != rows * cols`
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Matrix {
        assert_eq!(
            data.len(),
            rows * cols,
            "buffer of {} elements cannot hold a {}x{} matrix",
            data.len(),
            rows,
            cols
        );
        Matrix { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.cols + col] = val;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// The elements of rows `[start, end)`
    pub fn row_block(&self, start: usize, end: usize) -> &[f64] {
        &self.data[start * self.cols..end * self.cols]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zeros_has_exact_length() {
        let mat = Matrix::try_zeros(3, 5, 0).unwrap();
        assert_eq!(mat.len(), 15);
        assert!(mat.as_slice().iter().all(|x| *x == 0.0));
        assert!(!mat.is_square());
    }

    #[test]
    fn oversized_allocation_is_reported() {
        let err = Matrix::try_zeros(usize::MAX / 2, 4, 3).unwrap_err();
        assert_eq!(err.pe, 3);
        assert_eq!(err.elems, usize::MAX);
    }

    #[test]
    fn random_elements_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        let mat = Matrix::try_random(16, &mut rng, 0).unwrap();
        assert!(mat.is_square());
        assert!(mat.as_slice().iter().all(|x| (0.0..=1.0).contains(x)));
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(mat, Matrix::try_random(16, &mut rng, 0).unwrap());
    }

    #[test]
    fn row_block_is_contiguous() {
        let mat = Matrix::from_vec(3, 2, (0..6).map(|x| x as f64).collect());
        assert_eq!(mat.row_block(1, 3), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(mat.get(2, 1), 5.0);
    }
}
