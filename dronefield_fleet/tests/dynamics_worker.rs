//! Drives a real `dronefield worker dynamics` process over pipes.

use dronefield_core::protocol::POSITION_REPLY_LEN;
use dronefield_core::{Cell, Grid, KinematicMessage, Position, PositionReply, Thrust};
use dronefield_fleet::SharedLog;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const BIN: &str = env!("CARGO_BIN_EXE_dronefield");

/// Keeps the test's own pipe ends out of every child.
fn private(fd: &OwnedFd) {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).unwrap();
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> ExitStatus {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if started.elapsed() > limit {
            let _ = child.kill();
            panic!("worker did not exit within {:?}", limit);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn exchange(to_engine: &mut File, from_engine: &mut File, grid: &Grid, msg: &KinematicMessage) -> Position {
    to_engine.write_all(&grid.to_bytes()).unwrap();
    to_engine.write_all(&msg.encode().unwrap()).unwrap();
    let mut reply = [0u8; POSITION_REPLY_LEN];
    from_engine.read_exact(&mut reply).unwrap();
    PositionReply::decode(&reply).unwrap().position
}

#[test]
fn test_dynamics_worker_answers_frames_until_eof() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("fleet.log");
    let log = SharedLog::open(&log_path).unwrap();

    let (cmd_read, cmd_write) = nix::unistd::pipe().unwrap();
    let (reply_read, reply_write) = nix::unistd::pipe().unwrap();
    private(&cmd_write);
    private(&reply_read);

    let mut child = Command::new(BIN)
        .args([
            "worker".to_string(),
            "--seed".to_string(),
            "1".to_string(),
            "dynamics".to_string(),
            cmd_read.as_raw_fd().to_string(),
            reply_write.as_raw_fd().to_string(),
            log.raw_fd().to_string(),
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    drop(cmd_read);
    drop(reply_write);

    let mut to_engine = File::from(cmd_write);
    let mut from_engine = File::from(reply_read);

    let mut grid = Grid::empty();
    grid.set(Position::new(50, 52), Cell::Obstacle);
    grid.set(Position::new(50, 40), Cell::Target(9));
    let centre = Position::centre();

    // Net force (0, -0.0078125) is too weak to leave the centre cell
    let first = exchange(
        &mut to_engine,
        &mut from_engine,
        &grid,
        &KinematicMessage::new(centre, centre, Thrust::default()),
    );
    assert_eq!(first, centre);

    // A probe between frames is answered without disturbing the exchange
    kill(Pid::from_raw(child.id() as i32), Signal::SIGUSR1).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let second = exchange(
        &mut to_engine,
        &mut from_engine,
        &grid,
        &KinematicMessage::new(centre, first, Thrust::new(1, 0)),
    );
    assert_eq!(second, Position::new(51, 50));

    drop(to_engine);
    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.success(), "{:?}", status);

    let text = std::fs::read_to_string(&log_path).unwrap();
    assert!(text.contains("dynamics is active"), "{}", text);
    assert!(text.contains("after 2 frames"), "{}", text);
}

#[test]
fn test_worker_rejects_bad_descriptors() {
    let status = Command::new(BIN)
        .args(["worker", "dynamics", "abc", "17", "18"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));

    let status = Command::new(BIN)
        .args(["worker", "targets", "17"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
