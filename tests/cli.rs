use assert_cmd::Command;
use serial_test::serial;
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let mut d = std::env::temp_dir();
    d.push(format!("dgemm-bench-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&d);
    std::fs::create_dir_all(&d).unwrap();
    d
}

fn bench(dir: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("dgemm-bench").unwrap();
    cmd.env("DGEMM_OUTPUT_DIR", dir)
        .env("DGEMM_SEED", "7")
        .env("DGEMM_DEADLOCK_TIMEOUT", "0")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
#[serial]
fn dist_appends_one_row_per_divisible_size() {
    let dir = scratch_dir("dist");
    bench(&dir)
        .arg("dist")
        .env("DGEMM_SIZES", "6,8")
        .env("DGEMM_PARTICIPANTS", "4")
        .assert()
        .success();
    let csv = std::fs::read_to_string(dir.join("results_dist.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2, "{}", csv);
    assert_eq!(lines[0], "Size,Participants,Time_s,Delta_Max,GFLOPS");
    assert!(lines[1].starts_with("8,4,"), "{}", lines[1]);
    assert_eq!(lines[1].split(',').nth(3), Some("0.000000e+00"));

    // a second run appends without repeating the header
    bench(&dir)
        .env("DGEMM_SIZES", "8")
        .env("DGEMM_PARTICIPANTS", "1,2")
        .assert()
        .success();
    let csv = std::fs::read_to_string(dir.join("results_dist.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4, "{}", csv);
    assert_eq!(csv.matches("Size,").count(), 1);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn seq_and_shared_write_their_own_files() {
    let dir = scratch_dir("all");
    bench(&dir)
        .arg("all")
        .env("DGEMM_SIZES", "8")
        .env("DGEMM_PARTICIPANTS", "2")
        .env("DGEMM_THREADS", "1,3")
        .assert()
        .success();
    let seq = std::fs::read_to_string(dir.join("results_seq.csv")).unwrap();
    assert_eq!(seq.lines().next(), Some("Size,Time_s,GFLOPS"));
    assert_eq!(seq.lines().count(), 2);
    let shared = std::fs::read_to_string(dir.join("results_shared.csv")).unwrap();
    assert_eq!(shared.lines().next(), Some("Size,Threads,Time_s,GFLOPS"));
    let threads: Vec<&str> = shared
        .lines()
        .skip(1)
        .filter_map(|l| l.split(',').nth(1))
        .collect();
    assert_eq!(threads, vec!["1", "3"]);
    assert!(dir.join("results_dist.csv").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn bad_mode_fails() {
    let dir = scratch_dir("bad");
    bench(&dir).arg("mpi").assert().failure();
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn bad_backend_fails() {
    let dir = scratch_dir("backend");
    bench(&dir)
        .env("DGEMM_BACKEND", "rofi")
        .env("DGEMM_SIZES", "4")
        .assert()
        .failure();
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn summary_reads_existing_results() {
    let dir = scratch_dir("summary");
    std::fs::write(
        dir.join("results_seq.csv"),
        "Size,Time_s,GFLOPS\n8,2.000000,1.000000\n8,4.000000,1.000000\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("results_dist.csv"),
        "Size,Participants,Time_s,Delta_Max,GFLOPS\n8,2,1.500000,0.000000e+00,1.000000\n",
    )
    .unwrap();
    let out = bench(&dir)
        .arg("summary")
        .env("RUST_LOG", "info")
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("speedup: 2.00"), "{}", stdout);
    assert!(stdout.contains("efficiency: 1.00"), "{}", stdout);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn summary_needs_sequential_results() {
    let dir = scratch_dir("summary-empty");
    bench(&dir).arg("summary").assert().failure();
    std::fs::remove_dir_all(&dir).unwrap();
}
