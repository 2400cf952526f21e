//! DGEMM kernels, `C += A x B` on square row-major operands.
//!
//! Every kernel here walks an output row with the same i-k-j order: for each element `a[i][k]`
//! of a row of A, the scaled row `k` of B is accumulated into row `i` of C. The innermost loop
//! is unrolled by [UNROLL] with a scalar remainder for the columns left over when `n` is not a
//! multiple of it. Since a row of C is always produced start-to-finish by one call with the same
//! order, the sequential, shared-memory and distributed paths round identically.
use rayon::prelude::*;

/// Columns processed per inner-loop iteration
pub const UNROLL: usize = 4;

/// `y += alpha * x`, four columns at a time then the remainder.
#[inline(always)]
fn axpy_unrolled(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    let mut y_quads = y.chunks_exact_mut(UNROLL);
    let mut x_quads = x.chunks_exact(UNROLL);
    for (yq, xq) in (&mut y_quads).zip(&mut x_quads) {
        yq[0] += alpha * xq[0];
        yq[1] += alpha * xq[1];
        yq[2] += alpha * xq[2];
        yq[3] += alpha * xq[3];
    }
    for (yr, xr) in y_quads.into_remainder().iter_mut().zip(x_quads.remainder()) {
        *yr += alpha * xr;
    }
}

/// Multiply a row-block of A (`rows x n`) by the full B (`n x n`), accumulating into the
/// matching row-block of C (`rows x n`).
///
/// Only `c_block` is written.
///
/// # Panics
/// if any buffer length disagrees with `rows` and `n`
pub fn dgemm_local(a_block: &[f64], b: &[f64], c_block: &mut [f64], n: usize, rows: usize) {
    assert_eq!(a_block.len(), rows * n, "a block must be rows x n");
    assert_eq!(b.len(), n * n, "b must be n x n");
    assert_eq!(c_block.len(), rows * n, "c block must be rows x n");
    if n == 0 {
        return;
    }
    for (a_row, c_row) in a_block.chunks_exact(n).zip(c_block.chunks_exact_mut(n)) {
        for (b_row, &a_ik) in b.chunks_exact(n).zip(a_row) {
            axpy_unrolled(a_ik, b_row, c_row);
        }
    }
}

/// The sequential reference: [dgemm_local] applied to all `n` rows at once.
pub fn dgemm_seq(a: &[f64], b: &[f64], c: &mut [f64], n: usize) {
    dgemm_local(a, b, c, n, n)
}

/// Textbook triple loop with no unrolling, kept as a baseline for the unrolled kernels.
pub fn dgemm_naive(a: &[f64], b: &[f64], c: &mut [f64], n: usize) {
    assert_eq!(a.len(), n * n);
    assert_eq!(b.len(), n * n);
    assert_eq!(c.len(), n * n);
    for i in 0..n {
        for k in 0..n {
            let a_ik = a[i * n + k];
            for j in 0..n {
                c[i * n + j] += a_ik * b[k * n + j];
            }
        }
    }
}

/// Loop-parallel DGEMM on the given pool.
///
/// Rows of C are split into one contiguous block per pool thread (a static schedule), each block
/// computed with [dgemm_local].
pub fn dgemm_par(a: &[f64], b: &[f64], c: &mut [f64], n: usize, pool: &rayon::ThreadPool) {
    assert_eq!(a.len(), n * n);
    assert_eq!(b.len(), n * n);
    assert_eq!(c.len(), n * n);
    if n == 0 {
        return;
    }
    let threads = pool.current_num_threads().max(1);
    let rows_per_thread = (n + threads - 1) / threads;
    let block = rows_per_thread * n;
    pool.install(|| {
        c.par_chunks_mut(block)
            .zip(a.par_chunks(block))
            .for_each(|(c_block, a_block)| {
                let rows = c_block.len() / n;
                dgemm_local(a_block, b, c_block, n, rows);
            });
    });
}

/// Throughput of an n x n DGEMM that took `elapsed` seconds, `2 n^3 / (elapsed * 1e9)`
pub fn gflops(n: usize, elapsed: f64) -> f64 {
    let n = n as f64;
    (2.0 * n * n * n) / (elapsed * 1e9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random(n: usize, rng: &mut StdRng) -> Vec<f64> {
        (0..n * n).map(|_| rng.gen::<f64>()).collect()
    }

    #[test]
    fn known_product() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0; 4];
        dgemm_seq(&a, &b, &mut c, 2);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn accumulates_into_output() {
        let a = [1.0, 0.0, 0.0, 1.0];
        let b = [2.0, 3.0, 4.0, 5.0];
        let mut c = [1.0; 4];
        dgemm_seq(&a, &b, &mut c, 2);
        assert_eq!(c, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn unrolled_matches_naive_for_every_remainder() {
        let mut rng = StdRng::seed_from_u64(0xd6e);
        for n in 1..=13 {
            let a = random(n, &mut rng);
            let b = random(n, &mut rng);
            let mut c_unrolled = vec![0.0; n * n];
            let mut c_naive = vec![0.0; n * n];
            dgemm_seq(&a, &b, &mut c_unrolled, n);
            dgemm_naive(&a, &b, &mut c_naive, n);
            for (x, y) in c_unrolled.iter().zip(&c_naive) {
                assert!((x - y).abs() <= 1e-12 * y.abs().max(1.0), "n={} {} vs {}", n, x, y);
            }
        }
    }

    #[test]
    fn row_blocks_reproduce_full_product_exactly() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 10;
        let a = random(n, &mut rng);
        let b = random(n, &mut rng);
        let mut c_full = vec![0.0; n * n];
        dgemm_seq(&a, &b, &mut c_full, n);

        let rows = 5;
        let mut c_blocks = vec![0.0; n * n];
        for (a_block, c_block) in a.chunks(rows * n).zip(c_blocks.chunks_mut(rows * n)) {
            dgemm_local(a_block, &b, c_block, n, rows);
        }
        assert_eq!(c_full, c_blocks);
    }

    #[test]
    fn parallel_matches_sequential_exactly() {
        let mut rng = StdRng::seed_from_u64(3);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(3)
            .build()
            .unwrap();
        for n in [1, 7, 16, 30] {
            let a = random(n, &mut rng);
            let b = random(n, &mut rng);
            let mut c_seq = vec![0.0; n * n];
            let mut c_par = vec![0.0; n * n];
            dgemm_seq(&a, &b, &mut c_seq, n);
            dgemm_par(&a, &b, &mut c_par, n, &pool);
            assert_eq!(c_seq, c_par, "n={}", n);
        }
    }

    #[test]
    #[should_panic(expected = "c block must be rows x n")]
    fn rejects_short_output_block() {
        let a = [0.0; 4];
        let b = [0.0; 4];
        let mut c = [0.0; 3];
        dgemm_local(&a, &b, &mut c, 2, 2);
    }

    #[test]
    fn gflops_of_one_second() {
        assert!((gflops(1000, 1.0) - 2.0).abs() < 1e-12);
    }
}
