use dgemm_lamellae::bench::{dist_trial, run_dist, DIST_RESULTS};
use dgemm_lamellae::engine::dist_dgemm;
use dgemm_lamellae::kernel::{dgemm_local, dgemm_seq};
use dgemm_lamellae::oracle::{max_relative_diff, validate, THRESHOLD};
use dgemm_lamellae::{
    AllocError, Backend, Config, DgemmError, Matrix, Operands, PartitionErrorKind, RowPartition,
    WorldBuilder, COORDINATOR,
};

use rand::rngs::StdRng;
use rand::SeedableRng;

fn group(num_pes: usize) -> WorldBuilder {
    WorldBuilder::new()
        .with_backend(Backend::Channel)
        .with_num_pes(num_pes)
        .with_deadlock_timeout(0.0)
}

fn counting(n: usize) -> Matrix {
    Matrix::from_vec(n, n, (1..=n * n).map(|x| x as f64).collect())
}

fn scaled_identity(n: usize, s: f64) -> Matrix {
    let mut m = Matrix::try_zeros(n, n, 0).unwrap();
    for i in 0..n {
        m.set(i, i, s);
    }
    m
}

fn reference(ops: &Operands) -> Vec<f64> {
    let n = ops.n();
    let mut c = vec![0.0; n * n];
    dgemm_seq(ops.a.as_slice(), ops.b.as_slice(), &mut c, n);
    c
}

#[test]
fn four_by_four_on_two_pes() {
    let partition = RowPartition::new(4, 2).unwrap();
    let blocks: Vec<_> = partition.iter().collect();
    assert_eq!(blocks, vec![(0, 0..2), (1, 2..4)]);

    let outputs = group(2)
        .launch(|world| {
            let mut ops = world
                .is_coordinator()
                .then(|| Operands::new(counting(4), scaled_identity(4, 2.0)));
            dist_dgemm(world, 4, ops.as_mut())
        })
        .unwrap();
    let c = outputs[0].as_ref().unwrap().c.as_slice().to_vec();
    let expected: Vec<f64> = (1..=16).map(|x| 2.0 * x as f64).collect();
    assert_eq!(c, expected);
    assert!(outputs[1].is_none());
}

#[test]
fn result_matches_an_independent_gemm() {
    // sizes that exercise the unroll remainder
    for (num_pes, n) in [(1, 7), (3, 6), (5, 15)] {
        let ops = Operands::random(n, &mut StdRng::seed_from_u64(n as u64)).unwrap();
        let mut expected = vec![0.0; n * n];
        unsafe {
            matrixmultiply::dgemm(
                n,
                n,
                n,
                1.0,
                ops.a.as_slice().as_ptr(),
                n as isize,
                1,
                ops.b.as_slice().as_ptr(),
                n as isize,
                1,
                0.0,
                expected.as_mut_ptr(),
                n as isize,
                1,
            );
        }
        let outputs = group(num_pes)
            .launch(|world| {
                let mut mine = world.is_coordinator().then(|| ops.clone());
                dist_dgemm(world, n, mine.as_mut())
            })
            .unwrap();
        let c = &outputs[0].as_ref().unwrap().c;
        assert!(max_relative_diff(&expected, c.as_slice()) <= THRESHOLD);
        assert_eq!(c.as_slice(), reference(&ops).as_slice());
    }
}

#[test]
fn zero_operand_gives_zero_product() {
    let n = 8;
    let outputs = group(4)
        .launch(|world| {
            let mut ops = world.is_coordinator().then(|| {
                Operands::new(counting(n), Matrix::try_zeros(n, n, 0).unwrap())
            });
            dist_dgemm(world, n, ops.as_mut())
        })
        .unwrap();
    let c = &outputs[0].as_ref().unwrap().c;
    assert!(c.as_slice().iter().all(|x| *x == 0.0));
    assert_eq!(max_relative_diff(&vec![0.0; n * n], c.as_slice()), 0.0);
}

#[test]
fn corrupted_block_is_caught_by_the_oracle() {
    let n = 4;
    let ops = Operands::random(n, &mut StdRng::seed_from_u64(3)).unwrap();
    let expected = reference(&ops);
    let outputs = group(2)
        .launch(|world| {
            let partition = world.partition(n)?;
            let rows = partition.rows_per_pe();
            let mut b = if world.is_coordinator() {
                ops.b.clone()
            } else {
                Matrix::try_zeros(n, n, world.my_pe())?
            };
            world.broadcast(b.as_mut_slice(), COORDINATOR)?;
            let mut a_local = vec![0.0; rows * n];
            let a = world.is_coordinator().then(|| ops.a.as_slice());
            world.scatter(a, &mut a_local, COORDINATOR)?;
            let mut c_local = vec![0.0; rows * n];
            dgemm_local(&a_local, b.as_slice(), &mut c_local, n, rows);
            if world.my_pe() == 1 {
                c_local[0] += 1e-6;
            }
            let mut c = vec![0.0; n * n];
            let recv = world.is_coordinator().then(|| c.as_mut_slice());
            world.gather(&c_local, recv, COORDINATOR)?;
            Ok(c)
        })
        .unwrap();
    let validation = validate(&expected, &outputs[0]);
    assert!(!validation.is_valid());
    assert!(validation.delta_max() > THRESHOLD);
    // only the corrupted element differs
    let differing = expected
        .iter()
        .zip(&outputs[0])
        .filter(|(e, c)| e != c)
        .count();
    assert_eq!(differing, 1);
}

#[test]
fn coordinator_reports_one_record_per_trial() {
    let records = group(4)
        .launch(|world| dist_trial(world, 16, Some(11)))
        .unwrap();
    let record = records[0].unwrap();
    assert_eq!(record.size, 16);
    assert_eq!(record.participants, 4);
    assert_eq!(record.delta_max, 0.0);
    assert!(record.gflops > 0.0);
    assert!(records[1..].iter().all(|r| r.is_none()));
}

#[test]
fn too_many_participants_is_rejected() {
    let err = group(5)
        .launch(|world| dist_dgemm(world, 4, None::<&mut Operands>).map(|_| ()))
        .unwrap_err();
    match err {
        DgemmError::Config(e) => assert_eq!(e.kind, PartitionErrorKind::TooManyParticipants),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn oracle_grid_over_sizes_and_group_sizes() {
    for num_pes in 1..=4usize {
        for n in (num_pes..=12).filter(|n| n % num_pes == 0) {
            let ops = Operands::random(n, &mut StdRng::seed_from_u64((n * 31 + num_pes) as u64))
                .unwrap();
            let outputs = group(num_pes)
                .launch(|world| {
                    let mut mine = world.is_coordinator().then(|| ops.clone());
                    dist_dgemm(world, n, mine.as_mut())
                })
                .unwrap();
            let c = &outputs[0].as_ref().unwrap().c;
            let v = validate(&reference(&ops), c.as_slice());
            assert!(v.is_valid(), "n={} pes={} delta={}", n, num_pes, v.delta_max());
        }
    }
}

#[test]
fn scatter_gather_of_a_matrix_is_identity() {
    let n = 9;
    let original = counting(n);
    let out = group(3)
        .launch(|world| {
            let partition = world.partition(n)?;
            let mut block = Matrix::try_zeros(partition.rows_per_pe(), n, world.my_pe())?;
            let send = world.is_coordinator().then(|| original.as_slice());
            world.scatter(send, block.as_mut_slice(), COORDINATOR)?;
            let mine = partition.rows(world.my_pe());
            assert_eq!(block.as_slice(), original.row_block(mine.start, mine.end));
            let mut back = Matrix::try_zeros(n, n, world.my_pe())?;
            let recv = world.is_coordinator().then(|| back.as_mut_slice());
            world.gather(block.as_slice(), recv, COORDINATOR)?;
            Ok(back)
        })
        .unwrap();
    assert_eq!(out[0], original);
}

#[test]
fn allocation_failure_in_a_trial_aborts_the_group() {
    // far beyond any address space, every pe fails to allocate
    let err = group(4)
        .launch(|world| dist_trial(world, 1 << 31, Some(1)))
        .unwrap_err();
    assert!(matches!(err, DgemmError::Alloc(AllocError { .. })), "{:?}", err);
}

#[test]
fn allocation_failure_on_a_worker_only_aborts_the_group() {
    let n = 8;
    let err = group(2)
        .launch(|world| {
            let mut ops = world
                .is_coordinator()
                .then(|| Operands::new(counting(n), counting(n)));
            if world.my_pe() == 1 {
                // the worker's share of a size the coordinator never allocated
                return dist_dgemm(world, 1 << 31, None).map(|_| ());
            }
            dist_dgemm(world, n, ops.as_mut()).map(|_| ())
        })
        .unwrap_err();
    assert!(
        matches!(err, DgemmError::Alloc(AllocError { pe: 1, .. })),
        "{:?}",
        err
    );
}

#[test]
fn finished_sizes_are_kept_when_a_later_size_aborts() {
    let mut dir = std::env::temp_dir();
    dir.push(format!("dgemm-dist-abort-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let config = Config {
        sizes: vec![8, 1 << 31],
        participants: vec![2],
        seed: Some(3),
        output_dir: dir.clone(),
        deadlock_timeout: 0.0,
        ..Config::default()
    };
    assert!(run_dist(&config).is_err());
    let csv = std::fs::read_to_string(dir.join(DIST_RESULTS)).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2, "{}", csv);
    assert!(lines[1].starts_with("8,2,"), "{}", csv);
    std::fs::remove_dir_all(&dir).unwrap();
}
