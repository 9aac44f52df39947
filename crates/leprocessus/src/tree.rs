//! Process tree operations
//!
//! Killing only the engine process is not enough: engines start helper
//! processes of their own, and those keep file locks and a worker slot busy
//! if they survive. Everything here targets the whole tree.

use tracing::debug;

/// Process IDs of every live descendant of `pid`, breadth-first.
///
/// Returns an empty list if the process table cannot be read.
#[cfg(unix)]
pub fn descendants(pid: u32) -> Vec<u32> {
    descendant_processes(pid).iter().map(|p| p.pid()).collect()
}

#[cfg(unix)]
fn descendant_processes(pid: u32) -> Vec<psutil::process::Process> {
    use std::collections::{HashMap, VecDeque};

    let all = match psutil::process::processes() {
        Ok(all) => all,
        Err(e) => {
            debug!(pid, "cannot list processes: {}", e);
            return Vec::new();
        }
    };

    let mut by_parent: HashMap<u32, Vec<psutil::process::Process>> = HashMap::new();
    for process in all.into_iter().flatten() {
        if let Ok(Some(ppid)) = process.ppid() {
            by_parent.entry(ppid).or_default().push(process);
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([pid]);
    while let Some(parent) = queue.pop_front() {
        if let Some(children) = by_parent.remove(&parent) {
            for child in children {
                queue.push_back(child.pid());
                found.push(child);
            }
        }
    }
    found
}

/// Kill `pid` and all of its descendants with SIGKILL.
///
/// The process group led by `pid` is signalled first, then every descendant
/// found through the parent chain (some may have left the group). Returns
/// the descendant IDs observed before the kill, for later liveness checks.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> Vec<u32> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let descendants = descendant_processes(pid);
    let observed: Vec<u32> = descendants.iter().map(|p| p.pid()).collect();

    signal_group(pid);
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, "kill: {}", e);
    }
    for process in &descendants {
        if let Err(e) = process.kill() {
            debug!(pid = process.pid(), "kill descendant: {}", e);
        }
    }

    observed
}

/// Signal whatever is left of the process group led by `pgid`.
///
/// Used after a normal exit, when the leader is gone but helpers it started
/// may still be running.
#[cfg(unix)]
pub fn signal_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "signalled process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => debug!(pgid, "killpg: {}", e),
    }
}

/// Whether `pid` still refers to a live process.
///
/// A zombie (exited, not yet reaped) counts as dead: it holds no locks and
/// runs no code.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use psutil::process::{Process, Status};

    match Process::new(pid) {
        Ok(process) => !matches!(
            process.status(),
            Ok(Status::Zombie) | Ok(Status::Dead) | Err(_)
        ),
        Err(_) => false,
    }
}

/// Process IDs of every live descendant of `pid`.
///
/// Windows has no cheap parent walk here; `taskkill /T` resolves the tree
/// itself, so nothing is tracked.
#[cfg(windows)]
pub fn descendants(_pid: u32) -> Vec<u32> {
    Vec::new()
}

/// Kill `pid` and all of its descendants.
#[cfg(windows)]
pub fn kill_tree(pid: u32) -> Vec<u32> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output();
    if let Err(e) = status {
        debug!(pid, "taskkill: {}", e);
    }
    Vec::new()
}

/// No process groups on Windows; the tree kill already covered helpers.
#[cfg(windows)]
pub fn signal_group(_pgid: u32) {}

/// Whether `pid` still refers to a live process.
#[cfg(windows)]
pub fn is_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&format!("\"{pid}\"")))
        .unwrap_or(false)
}

/// Poll until none of `pids` is alive or `timeout` elapses.
///
/// Returns the IDs still alive at the end.
pub async fn wait_until_dead(pids: &[u32], timeout: std::time::Duration) -> Vec<u32> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let alive: Vec<u32> = pids.iter().copied().filter(|p| is_alive(*p)).collect();
        if alive.is_empty() || tokio::time::Instant::now() >= deadline {
            return alive;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn test_unknown_pid_is_dead() {
        // Above the default Linux pid_max ceiling (2^22)
        assert!(!is_alive(4_194_304 + 12_345));
    }

    #[tokio::test]
    async fn test_kill_tree_reaches_grandchildren() {
        let mut child = tokio::process::Command::new("/bin/sh")
            .args(["-c", "sleep 30 & sleep 30 & wait"])
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        // Give the shell time to fork its sleeps
        let mut seen = Vec::new();
        for _ in 0..40 {
            seen = descendants(pid);
            if seen.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(seen.len() >= 2, "expected two sleep children, saw {:?}", seen);

        let observed = kill_tree(pid);
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());

        let survivors = wait_until_dead(&observed, Duration::from_secs(5)).await;
        assert!(survivors.is_empty(), "survivors: {:?}", survivors);
    }

    #[tokio::test]
    async fn test_wait_until_dead_returns_immediately_for_dead() {
        let started = std::time::Instant::now();
        let alive = wait_until_dead(&[4_194_304 + 54_321], Duration::from_secs(5)).await;
        assert!(alive.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
