use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use tempfile::TempDir;

fn rasterblock() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rasterblock"));
    for var in [
        "RASTERBLOCK_RANK",
        "RASTERBLOCK_SIZE",
        "RASTERBLOCK_COORDINATOR",
        "RASTERBLOCK_BACKEND",
        "RASTERBLOCK_WORKERS",
        "OMPI_COMM_WORLD_RANK",
        "OMPI_COMM_WORLD_SIZE",
        "PMI_RANK",
        "PMI_SIZE",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn free_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

struct Ramps {
    dir: TempDir,
    ramp: PathBuf,
    mirror: PathBuf,
}

impl Ramps {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ramp = dir.path().join("ramp1.raw");
        let mirror = dir.path().join("ramp2.raw");

        assert!(rasterblock().arg("ramp").arg(&ramp).status().unwrap().success());
        assert!(rasterblock()
            .arg("ramp")
            .arg(&mirror)
            .arg("--reverse")
            .status()
            .unwrap()
            .success());
        Self { dir, ramp, mirror }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn average(&self, first: &Path, output: &Path) -> Command {
        let mut cmd = rasterblock();
        cmd.arg("average")
            .arg(first)
            .arg(&self.mirror)
            .arg("--output")
            .arg(output)
            .arg("--window")
            .arg("4x4");
        cmd
    }
}

fn participant(mut cmd: Command, rank: usize, coordinator: &str) -> Child {
    cmd.arg("--backend")
        .arg("distributed")
        .env("RASTERBLOCK_RANK", rank.to_string())
        .env("RASTERBLOCK_SIZE", "2")
        .env("RASTERBLOCK_COORDINATOR", coordinator)
        .env("RASTERBLOCK_CONNECT_TIMEOUT", "5")
        .spawn()
        .unwrap()
}

fn wait(children: Vec<Child>) -> Vec<ExitStatus> {
    children.into_iter().map(|mut c| c.wait().unwrap()).collect()
}

#[test]
fn test_serial_average_exits_zero() {
    let ramps = Ramps::new();
    let output = ramps.path("serial.raw");

    let status = ramps.average(&ramps.ramp, &output).status().unwrap();
    assert!(status.success());

    let bytes = fs::read(&output).unwrap();
    assert_eq!(bytes.len(), 100);
    assert_eq!(bytes[0], 4);
}

#[test]
fn test_launched_participants_match_serial() {
    let ramps = Ramps::new();
    let serial = ramps.path("serial.raw");
    assert!(ramps.average(&ramps.ramp, &serial).status().unwrap().success());

    let output = ramps.path("distributed.raw");
    let coordinator = free_address();
    let children = (0..2)
        .map(|rank| participant(ramps.average(&ramps.ramp, &output), rank, &coordinator))
        .collect();

    let statuses = wait(children);
    assert!(statuses.iter().all(|s| s.success()), "{:?}", statuses);
    assert_eq!(fs::read(&output).unwrap(), fs::read(&serial).unwrap());
}

#[test]
fn test_failed_participant_gives_nonzero_exit() {
    let ramps = Ramps::new();
    let output = ramps.path("distributed.raw");
    let missing = ramps.path("missing.raw");
    let coordinator = free_address();

    let children = vec![
        participant(ramps.average(&ramps.ramp, &output), 0, &coordinator),
        participant(ramps.average(&missing, &output), 1, &coordinator),
    ];

    let statuses = wait(children);
    assert!(!statuses[0].success());
    assert!(!statuses[1].success());
}

#[test]
fn test_missing_input_exits_nonzero() {
    let ramps = Ramps::new();
    let status = ramps
        .average(&ramps.path("missing.raw"), &ramps.path("out.raw"))
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn test_workers_with_distributed_backend_is_rejected() {
    let ramps = Ramps::new();
    let status = ramps
        .average(&ramps.ramp, &ramps.path("out.raw"))
        .args(["--backend", "distributed", "--workers", "2"])
        .status()
        .unwrap();
    assert!(!status.success());
}
