//! Worker roles, their descriptor sets and process launch.
//!
//! The orchestrator launches every fleet member by re-executing its own
//! binary. Between fork and exec the child closes every fabric descriptor
//! its role does not retain, so each pipe ends up with exactly one reader
//! and one writer process. Retained descriptor numbers travel as
//! positional arguments and are rebuilt into a typed [`WorkerSpec`] on the
//! other side.

use crate::fabric::{ChannelFabric, ChannelId, Direction};
use dronefield_core::{FleetError, SupervisorConfig};
use dronefield_env::{ControlSignal, NixProcessControl, ProcessControl, WorkerPid};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::collections::HashSet;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a terminating child is polled for exit.
const REAP_POLL: Duration = Duration::from_millis(20);

/// The five fleet roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Input,
    Obstacles,
    Targets,
    Dynamics,
    Blackboard,
}

impl WorkerRole {
    /// Every role, in launch order.
    pub const ALL: [WorkerRole; 5] = [
        WorkerRole::Input,
        WorkerRole::Obstacles,
        WorkerRole::Targets,
        WorkerRole::Dynamics,
        WorkerRole::Blackboard,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkerRole::Input => "input",
            WorkerRole::Obstacles => "obstacles",
            WorkerRole::Targets => "targets",
            WorkerRole::Dynamics => "dynamics",
            WorkerRole::Blackboard => "blackboard",
        }
    }

    /// Channel ends this role keeps, in argument order.
    pub fn endpoints(&self) -> &'static [(ChannelId, Direction)] {
        use ChannelId::*;
        use Direction::*;
        match self {
            WorkerRole::Input => &[(InputToArbiter, Write)],
            WorkerRole::Obstacles => &[(ObstaclesToArbiter, Write)],
            WorkerRole::Targets => &[(ArbiterToTargets, Read), (TargetsToArbiter, Write)],
            WorkerRole::Dynamics => &[(ArbiterToDynamics, Read), (DynamicsToArbiter, Write)],
            WorkerRole::Blackboard => &[
                (InputToArbiter, Read),
                (ObstaclesToArbiter, Read),
                (ArbiterToTargets, Write),
                (TargetsToArbiter, Read),
                (ArbiterToDynamics, Write),
                (DynamicsToArbiter, Read),
            ],
        }
    }
}

impl std::str::FromStr for WorkerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerRole::ALL
            .into_iter()
            .find(|role| role.name() == s)
            .ok_or_else(|| format!("Unknown worker role: {}", s))
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Options forwarded to every worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Episode seed
    pub seed: u64,
    /// Status FIFO written by the blackboard
    pub status_fifo: PathBuf,
    /// Inspector command launched by the blackboard
    pub inspector_cmd: Option<String>,
    pub verbose: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            status_fifo: PathBuf::from(dronefield_core::config::STATUS_FIFO),
            inspector_cmd: None,
            verbose: false,
        }
    }
}

impl WorkerOptions {
    /// Full argument vector of `dronefield worker` for `role`.
    pub fn worker_args(&self, role: WorkerRole, descriptors: &[RawFd], log_fd: RawFd) -> Vec<String> {
        let mut args = vec!["worker".to_string(), "--seed".to_string(), self.seed.to_string()];
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if role == WorkerRole::Blackboard {
            args.push("--status-fifo".to_string());
            args.push(self.status_fifo.display().to_string());
            if let Some(cmd) = &self.inspector_cmd {
                args.push("--inspector-cmd".to_string());
                args.push(cmd.clone());
            }
        }
        args.push(role.name().to_string());
        args.extend(descriptors.iter().map(|fd| fd.to_string()));
        args.push(log_fd.to_string());
        args
    }

    /// Full argument vector of `dronefield supervise`.
    pub fn supervisor_args(&self, pids: &[WorkerPid], config: &SupervisorConfig, log_fd: RawFd) -> Vec<String> {
        let mut args = vec![
            "supervise".to_string(),
            "--poll-ms".to_string(),
            config.poll_interval.as_millis().to_string(),
            "--timeout-ms".to_string(),
            config.timeout.as_millis().to_string(),
            "--grace-ms".to_string(),
            config.grace.as_millis().to_string(),
            "--jitter-ms".to_string(),
            config.jitter.as_millis().to_string(),
            "--source".to_string(),
            config.source.to_string(),
            "--seed".to_string(),
            self.seed.to_string(),
        ];
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args.extend(pids.iter().map(|pid| pid.to_string()));
        args.push(log_fd.to_string());
        args
    }
}

/// A worker's resolved endpoints, rebuilt from its positional arguments.
#[derive(Debug)]
pub struct WorkerSpec {
    role: WorkerRole,
    endpoints: Vec<(ChannelId, Option<OwnedFd>)>,
    log: Option<OwnedFd>,
}

impl WorkerSpec {
    /// Rebuilds the spec from `<fd>... <log_fd>`.
    ///
    /// Every descriptor must parse, be open, be distinct and lie outside
    /// standard I/O; the count must match the role's endpoint set plus the
    /// log. Nothing is adopted unless all of them pass.
    pub fn from_args(role: WorkerRole, descriptors: &[String]) -> Result<Self, FleetError> {
        let expected = role.endpoints().len() + 1;
        if descriptors.len() != expected {
            return Err(FleetError::argument(format!(
                "{} expects {} descriptors, got {}",
                role,
                expected,
                descriptors.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut raw = Vec::with_capacity(expected);
        for arg in descriptors {
            let fd = parse_descriptor(arg)?;
            if !seen.insert(fd) {
                return Err(FleetError::argument(format!("descriptor {} given twice", fd)));
            }
            raw.push(fd);
        }
        // Helpers this worker launches must not inherit channel ends
        for fd in &raw {
            fcntl(*fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                .map_err(|e| FleetError::argument(format!("descriptor {}: {}", fd, e)))?;
        }

        // SAFETY: every descriptor was inherited across exec for this
        // process, is open and appears once, so each is owned exactly once.
        let mut owned: Vec<OwnedFd> = raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }).collect();
        let log = owned.pop();
        let endpoints = role
            .endpoints()
            .iter()
            .zip(owned)
            .map(|((id, _), fd)| (*id, Some(fd)))
            .collect();
        Ok(Self { role, endpoints, log })
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Takes ownership of the endpoint for `channel`.
    pub fn take(&mut self, channel: ChannelId) -> Result<OwnedFd, FleetError> {
        self.endpoints
            .iter_mut()
            .find(|(id, _)| *id == channel)
            .and_then(|(_, fd)| fd.take())
            .ok_or_else(|| FleetError::argument(format!("{} holds no endpoint for {}", self.role, channel)))
    }

    /// Takes ownership of the shared log descriptor.
    pub fn take_log(&mut self) -> Result<OwnedFd, FleetError> {
        self.log
            .take()
            .ok_or_else(|| FleetError::argument("log descriptor already taken"))
    }
}

/// Adopts the inherited shared log descriptor passed as `arg`.
pub fn adopt_log(arg: &str) -> Result<OwnedFd, FleetError> {
    let fd = parse_descriptor(arg)?;
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(|e| FleetError::argument(format!("descriptor {}: {}", fd, e)))?;
    // SAFETY: the descriptor was inherited for this process and is open
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn parse_descriptor(arg: &str) -> Result<RawFd, FleetError> {
    let fd: RawFd = arg
        .parse()
        .map_err(|_| FleetError::argument(format!("'{}' is not a descriptor number", arg)))?;
    if fd < 3 {
        return Err(FleetError::argument(format!("descriptor {} is reserved for standard I/O", fd)));
    }
    fcntl(fd, FcntlArg::F_GETFD).map_err(|e| FleetError::argument(format!("descriptor {} is not open: {}", fd, e)))?;
    Ok(fd)
}

/// A child the orchestrator launched and must reap.
#[derive(Debug)]
pub struct LaunchedProcess {
    role: String,
    child: Child,
}

impl LaunchedProcess {
    pub fn new(role: impl Into<String>, child: Child) -> Self {
        Self {
            role: role.into(),
            child,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn pid(&self) -> WorkerPid {
        WorkerPid::from(self.child.id())
    }

    /// Non-blocking reap.
    pub fn try_reap(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("Cannot poll {} ({}): {}", self.role, self.pid(), e);
                None
            }
        }
    }

    /// Graceful signal, up to `grace` for the exit, then forced kill.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_reap() {
            return Some(status);
        }
        if let Err(e) = NixProcessControl.deliver(self.pid(), ControlSignal::Shutdown) {
            debug!("Shutdown to {} failed: {}", self.role, e);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.try_reap() {
                return Some(status);
            }
            tokio::time::sleep(REAP_POLL).await;
        }

        warn!("{} ({}) ignored shutdown, killing", self.role, self.pid());
        if let Err(e) = self.child.kill() {
            debug!("Kill of {} failed: {}", self.role, e);
        }
        self.child.wait().ok()
    }
}

/// Launches fleet members by re-executing `program`.
pub struct Launcher {
    program: PathBuf,
    log_fd: RawFd,
    options: WorkerOptions,
    launched: Vec<LaunchedProcess>,
}

impl Launcher {
    pub fn new(program: impl Into<PathBuf>, log_fd: RawFd, options: WorkerOptions) -> Self {
        Self {
            program: program.into(),
            log_fd,
            options,
            launched: Vec::new(),
        }
    }

    pub fn launched(&self) -> &[LaunchedProcess] {
        &self.launched
    }

    pub fn pids(&self) -> Vec<WorkerPid> {
        self.launched.iter().map(|p| p.pid()).collect()
    }

    /// Launches one worker holding only its role's channel ends.
    pub fn spawn_worker(&mut self, role: WorkerRole, fabric: &ChannelFabric) -> Result<WorkerPid, FleetError> {
        let retained: Vec<RawFd> = role.endpoints().iter().map(|(id, dir)| fabric.raw(*id, *dir)).collect();
        let close: Vec<RawFd> = fabric
            .all_raw()
            .into_iter()
            .filter(|fd| !retained.contains(fd))
            .collect();
        let args = self.options.worker_args(role, &retained, self.log_fd);
        self.spawn(role.name(), args, close)
    }

    /// Launches the supervisor over `pids`; it holds no channel ends.
    pub fn spawn_supervisor(
        &mut self,
        pids: &[WorkerPid],
        config: &SupervisorConfig,
        fabric: &ChannelFabric,
    ) -> Result<WorkerPid, FleetError> {
        let args = self.options.supervisor_args(pids, config, self.log_fd);
        self.spawn("supervisor", args, fabric.all_raw())
    }

    fn spawn(&mut self, name: &str, args: Vec<String>, close: Vec<RawFd>) -> Result<WorkerPid, FleetError> {
        let mut command = Command::new(&self.program);
        command.args(&args);
        // SAFETY: the closure only calls close(2), which is async-signal-safe,
        // and touches no memory allocated after fork.
        unsafe {
            command.pre_exec(move || {
                for fd in &close {
                    libc::close(*fd);
                }
                Ok(())
            });
        }

        let child = command
            .spawn()
            .map_err(|e| FleetError::setup(format!("cannot launch {}: {}", name, e)))?;
        let process = LaunchedProcess::new(name, child);
        let pid = process.pid();
        info!("Launched {} as pid {}", name, pid);
        self.launched.push(process);
        Ok(pid)
    }

    /// Terminates everything launched so far, newest first.
    pub async fn abort(&mut self, grace: Duration) {
        while let Some(mut process) = self.launched.pop() {
            let status = process.terminate(grace).await;
            info!("Aborted {} ({}): {:?}", process.role(), process.pid(), status);
        }
    }

    pub fn into_processes(self) -> Vec<LaunchedProcess> {
        self.launched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SharedLog;
    use nix::sys::stat::fstat;
    use std::collections::HashMap;
    use std::os::fd::IntoRawFd;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::str::FromStr;

    /// Writes an executable shell script standing in for the fleet binary.
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A script written moments ago can still be busy in a sibling test's
    /// forked child, so launches are retried briefly.
    fn launch(mut spawn: impl FnMut() -> Result<WorkerPid, FleetError>) -> WorkerPid {
        for _ in 0..20 {
            if let Ok(pid) = spawn() {
                return pid;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        spawn().unwrap()
    }

    /// Open descriptors of an exited child, as listed by `ls -l /proc/self/fd`.
    fn open_descriptors(listing: &Path) -> HashMap<RawFd, String> {
        let text = std::fs::read_to_string(listing).unwrap();
        text.lines()
            .filter_map(|line| {
                let (left, target) = line.split_once(" -> ")?;
                let fd = left.split_whitespace().last()?.parse().ok()?;
                Some((fd, target.to_string()))
            })
            .collect()
    }

    fn pipe_name(fabric: &ChannelFabric, id: ChannelId) -> String {
        format!("pipe:[{}]", fstat(fabric.raw(id, Direction::Read)).unwrap().st_ino)
    }

    #[test]
    fn test_role_round_trip_and_order() {
        for role in WorkerRole::ALL {
            assert_eq!(WorkerRole::from_str(role.name()).unwrap(), role);
        }
        assert!(WorkerRole::from_str("watchdog").is_err());
        assert_eq!(WorkerRole::ALL.last(), Some(&WorkerRole::Blackboard));
    }

    #[test]
    fn test_every_channel_has_one_reader_and_one_writer() {
        for id in ChannelId::ALL {
            let holders: Vec<Direction> = WorkerRole::ALL
                .iter()
                .flat_map(|role| role.endpoints().iter())
                .filter(|(c, _)| *c == id)
                .map(|(_, d)| *d)
                .collect();
            assert_eq!(holders.len(), 2, "{}", id);
            assert!(holders.contains(&Direction::Read) && holders.contains(&Direction::Write));
        }
    }

    #[test]
    fn test_worker_args_layout() {
        let options = WorkerOptions {
            seed: 9,
            ..WorkerOptions::default()
        };
        let args = options.worker_args(WorkerRole::Dynamics, &[7, 10], 3);
        assert_eq!(args, vec!["worker", "--seed", "9", "dynamics", "7", "10", "3"]);

        let args = options.worker_args(WorkerRole::Blackboard, &[4, 5, 6, 7, 8, 9], 3);
        assert!(args.contains(&"--status-fifo".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("3"));
    }

    #[test]
    fn test_supervisor_args_end_with_pids_and_log() {
        let args = WorkerOptions::default().supervisor_args(
            &[WorkerPid(11), WorkerPid(12)],
            &SupervisorConfig::default(),
            5,
        );
        assert_eq!(args[0], "supervise");
        assert_eq!(&args[args.len() - 3..], &["11", "12", "5"]);
        assert!(args.windows(2).any(|w| w == ["--timeout-ms", "5000"]));
    }

    #[test]
    fn test_spec_count_mismatch() {
        let err = WorkerSpec::from_args(WorkerRole::Targets, &["7".to_string()]).unwrap_err();
        assert!(matches!(err, FleetError::Argument(_)));
    }

    #[test]
    fn test_spec_rejects_bad_descriptors() {
        let bad = |args: &[&str]| {
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            WorkerSpec::from_args(WorkerRole::Input, &args).unwrap_err()
        };
        assert!(matches!(bad(&["abc", "5"]), FleetError::Argument(_)));
        assert!(matches!(bad(&["1", "5"]), FleetError::Argument(_)));
        assert!(matches!(bad(&["999999", "5"]), FleetError::Argument(_)));
    }

    #[test]
    fn test_spec_adopts_descriptors() {
        let (read, write) = nix::unistd::pipe().unwrap();
        let (log_read, log_write) = nix::unistd::pipe().unwrap();
        drop(log_read);
        let args = vec![
            read.into_raw_fd().to_string(),
            write.into_raw_fd().to_string(),
            log_write.into_raw_fd().to_string(),
        ];

        let mut spec = WorkerSpec::from_args(WorkerRole::Dynamics, &args).unwrap();
        assert_eq!(spec.role(), WorkerRole::Dynamics);
        assert!(spec.take(ChannelId::ArbiterToDynamics).is_ok());
        assert!(spec.take(ChannelId::ArbiterToDynamics).is_err());
        assert!(spec.take(ChannelId::InputToArbiter).is_err());
        assert!(spec.take(ChannelId::DynamicsToArbiter).is_ok());
        assert!(spec.take_log().is_ok());
    }

    #[test]
    fn test_spec_rejects_duplicates() {
        let (read, _write) = nix::unistd::pipe().unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&read).to_string();
        let err = WorkerSpec::from_args(WorkerRole::Input, &[fd.clone(), fd]).unwrap_err();
        assert!(matches!(err, FleetError::Argument(_)));
        // Still owned by the test
        drop(read);
    }

    #[test]
    fn test_children_keep_only_their_retained_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("fleet.log");
        let log = SharedLog::open(&log_path).unwrap();
        let log_target = std::fs::canonicalize(&log_path).unwrap().display().to_string();
        let worker = script(dir.path(), "worker", "exec ls -l /proc/self/fd > \"$0.fds\"");
        let supervisor = script(dir.path(), "supervisor", "exec ls -l /proc/self/fd > \"$0.fds\"");

        let fabric = ChannelFabric::allocate().unwrap();
        let mut launcher = Launcher::new(&worker, log.raw_fd(), WorkerOptions::default());
        let pid = launch(|| launcher.spawn_worker(WorkerRole::Dynamics, &fabric));
        launcher.program = supervisor.clone();
        launch(|| launcher.spawn_supervisor(&[pid], &SupervisorConfig::default(), &fabric));
        // ls may complain about its own directory handle; only the listing matters
        for mut process in launcher.into_processes() {
            process.child.wait().unwrap();
        }

        let retained = WorkerRole::Dynamics.endpoints();
        let open = open_descriptors(&dir.path().join("worker.fds"));
        for (id, direction) in retained {
            assert_eq!(open.get(&fabric.raw(*id, *direction)), Some(&pipe_name(&fabric, *id)), "{}", id);
        }
        for id in ChannelId::ALL {
            let name = pipe_name(&fabric, id);
            let held = open.values().filter(|target| **target == name).count();
            let expected = retained.iter().filter(|(c, _)| *c == id).count();
            assert_eq!(held, expected, "{} in {:?}", id, open);
        }
        assert_eq!(open.get(&log.raw_fd()), Some(&log_target));

        let open = open_descriptors(&dir.path().join("supervisor.fds"));
        for id in ChannelId::ALL {
            let name = pipe_name(&fabric, id);
            assert!(open.values().all(|target| *target != name), "{} in {:?}", id, open);
        }
        assert_eq!(open.get(&log.raw_fd()), Some(&log_target));
    }

    #[tokio::test]
    async fn test_abort_stops_siblings_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::open(&dir.path().join("fleet.log")).unwrap();
        let order = dir.path().join("order");
        // Arguments are `worker --seed N <role> ...`
        let program = script(
            dir.path(),
            "resident",
            &format!("trap 'echo $4 >> {}; exit 0' TERM\nwhile :; do sleep 0.05; done", order.display()),
        );

        let fabric = ChannelFabric::allocate().unwrap();
        let mut launcher = Launcher::new(&program, log.raw_fd(), WorkerOptions::default());
        launch(|| launcher.spawn_worker(WorkerRole::Input, &fabric));
        launch(|| launcher.spawn_worker(WorkerRole::Obstacles, &fabric));

        launcher.program = dir.path().join("missing");
        let err = launcher.spawn_worker(WorkerRole::Targets, &fabric).unwrap_err();
        assert!(matches!(err, FleetError::Setup(_)));
        assert_eq!(launcher.launched().len(), 2);

        // Let both shells install their trap
        tokio::time::sleep(Duration::from_millis(200)).await;
        launcher.abort(Duration::from_secs(2)).await;

        assert!(launcher.launched().is_empty());
        let stopped = std::fs::read_to_string(&order).unwrap();
        assert_eq!(stopped.lines().collect::<Vec<_>>(), vec!["obstacles", "input"]);
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        let mut process = LaunchedProcess::new("stubborn", child);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = process.terminate(Duration::from_millis(200)).await.unwrap();
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }
}
