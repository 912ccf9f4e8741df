//! A worker killed mid-run makes the supervisor terminate the rest of the
//! group, and the reaper collects every child.

use dronefield_core::{LivenessSource, Supervisor, SupervisorConfig};
use dronefield_env::{NixProcessControl, TokioContext, WorkerPid};
use dronefield_fleet::{LaunchedProcess, Reaper};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{Command, Stdio};
use std::time::Duration;

/// A worker stand-in that ignores probes and dies on the graceful signal.
fn stand_in(role: &str) -> LaunchedProcess {
    let child = Command::new("sh")
        .args(["-c", "trap '' USR1; exec sleep 30"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    LaunchedProcess::new(role, child)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_killed_worker_terminates_the_group() {
    let processes: Vec<LaunchedProcess> = ["input", "obstacles", "dynamics"].iter().map(|r| stand_in(r)).collect();
    let pids: Vec<WorkerPid> = processes.iter().map(|p| p.pid()).collect();

    // Let the shells install their trap before the first probe
    tokio::time::sleep(Duration::from_millis(200)).await;

    let reaper = Reaper::new(processes, Duration::from_millis(20));
    let reaping = tokio::spawn(reaper.run(std::future::pending::<()>(), Duration::from_secs(2)));

    let config = SupervisorConfig {
        poll_interval: Duration::from_millis(100),
        timeout: Duration::from_millis(500),
        grace: Duration::from_millis(300),
        jitter: Duration::ZERO,
        source: LivenessSource::Probe,
    };
    let mut supervisor = Supervisor::new(TokioContext::shared(), NixProcessControl::new(), &pids, config);
    for _ in 0..3 {
        assert!(supervisor.cycle().await.is_none());
    }

    let victim = pids[1];
    kill(Pid::from_raw(victim.as_raw()), Signal::SIGKILL).unwrap();

    let report = supervisor.run().await;
    assert_eq!(report.stale, vec![victim]);
    // Scheduling slack on top of the timeout + interval bound
    let slack = Duration::from_millis(300);
    let bound = config.timeout + config.poll_interval + slack;
    assert!(report.graceful_at - report.last_activity <= bound);
    assert!(report.forced_at - report.last_activity <= bound);
    // The grace period is cut short to meet the forced-signal bound
    assert!(report.forced_at >= report.graceful_at);
    assert!(report.forced_at - report.graceful_at <= config.grace);

    let (exits, interrupted) = tokio::time::timeout(Duration::from_secs(10), reaping)
        .await
        .unwrap()
        .unwrap();
    assert!(!interrupted);
    assert_eq!(exits.len(), 3);
    for exit in exits {
        let expected = if exit.pid == victim.as_raw() {
            libc::SIGKILL
        } else {
            libc::SIGTERM
        };
        assert_eq!(exit.signal, Some(expected), "{:?}", exit);
    }
}
