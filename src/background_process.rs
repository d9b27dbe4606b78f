//! Spawns and stops the background processes this harness drives.
//!
//! The spawned process gets its stdout/stderr appended to `<name>.log` in its
//! datadir and its pid recorded in a pid file, which a later invocation uses
//! to stop it.

use std::fs;
use std::io;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use camino::Utf8Path;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

// Start and stop both poll every 100ms for at most 10 seconds.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);
const START_RETRIES: u32 = 100;
const STOP_RETRIES: u32 = 100;

/// Start a background process and wait until `status_check` reports it ready.
///
/// `status_check` returning `Ok(false)` means "not up yet, keep polling";
/// an `Err` aborts the startup. If the process never becomes ready it is
/// killed and reaped before the error is returned.
pub fn start_process(
    process_name: &str,
    datadir: &Utf8Path,
    command: &Utf8Path,
    args: &[&str],
    pid_file: &Utf8Path,
    status_check: impl Fn() -> anyhow::Result<bool>,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        datadir.is_dir(),
        "`datadir` must be a directory when starting {process_name}: {datadir}"
    );
    let log_path = datadir.join(format!("{process_name}.log"));
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("open {process_name} log file {log_path}"))?;
    let stderr_file = log_file
        .try_clone()
        .with_context(|| format!("reuse {process_name} log file for stderr"))?;

    let spawned = Command::new(command)
        .args(args)
        .stdout(log_file)
        .stderr(stderr_file)
        // Spawn in the datadir, so stray children are attributable to it.
        .current_dir(datadir)
        .spawn()
        .with_context(|| format!("spawn {process_name} from {command}"))?;
    let pid = Pid::from_raw(
        i32::try_from(spawned.id())
            .with_context(|| format!("{process_name} has invalid pid {}", spawned.id()))?,
    );
    fs::write(pid_file, format!("{pid}\n"))
        .with_context(|| format!("write pid file {pid_file}"))?;

    // Until the status check passes, the child is ours to kill and reap.
    let spawned = scopeguard::guard(spawned, |mut child| {
        let _ = child.kill();
        let _ = child.wait();
    });

    for _ in 0..START_RETRIES {
        match status_check() {
            Ok(true) => {
                tracing::info!("{process_name} started, pid {pid}");
                // Leak the child handle, the process outlives this call.
                drop(scopeguard::ScopeGuard::into_inner(spawned));
                return Ok(());
            }
            Ok(false) => thread::sleep(RETRY_INTERVAL),
            Err(e) => return Err(e.context(format!("{process_name} failed to start"))),
        }
    }
    anyhow::bail!(
        "{process_name} did not pass its status check within {:?}",
        RETRY_INTERVAL * START_RETRIES
    );
}

/// Stop the process recorded in `pid_file`. Returns `Ok` if it is already
/// gone. `immediate` sends SIGQUIT instead of SIGTERM, skipping graceful
/// shutdown.
pub fn stop_process(immediate: bool, process_name: &str, pid_file: &Utf8Path) -> anyhow::Result<()> {
    let pid = match fs::read_to_string(pid_file) {
        Ok(content) => Pid::from_raw(
            content
                .trim()
                .parse::<i32>()
                .with_context(|| format!("parse pid file {pid_file}"))?,
        ),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!("{process_name} is already stopped: no pid file at {pid_file}");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("read pid file {pid_file}")),
    };

    let sig = if immediate {
        Signal::SIGQUIT
    } else {
        Signal::SIGTERM
    };
    tracing::info!("stopping {process_name} with pid {pid} ({sig})");
    match kill(pid, sig) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            // Stale pid file; the pid may since have been recycled, so do not
            // try anything else with it.
            tracing::info!("{process_name} with pid {pid} does not exist");
            return Ok(());
        }
        Err(e) => anyhow::bail!("failed to signal {process_name} with pid {pid}: {e}"),
    }

    wait_until_stopped(process_name, pid)
}

pub fn wait_until_stopped(process_name: &str, pid: Pid) -> anyhow::Result<()> {
    for _ in 0..STOP_RETRIES {
        // If the process is our own child, reap it; a zombie would keep
        // answering the liveness poll below.
        let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
        match process_has_stopped(pid)? {
            true => {
                tracing::info!("{process_name} stopped");
                return Ok(());
            }
            false => thread::sleep(RETRY_INTERVAL),
        }
    }
    anyhow::bail!(
        "{process_name} with pid {pid} did not stop within {:?}",
        RETRY_INTERVAL * STOP_RETRIES
    );
}

fn process_has_stopped(pid: Pid) -> anyhow::Result<bool> {
    match kill(pid, None) {
        Ok(_) => Ok(false),
        Err(Errno::ESRCH) => Ok(true),
        Err(e) => anyhow::bail!("failed to poll process with pid {pid}: {e}"),
    }
}
