//! Unix process-group and signal plumbing.
//!
//! The shell ignores the keyboard signals so terminal-control operations can
//! never stop it; children reset them to `SIG_DFL` before exec. The SIGCHLD
//! handler only sets an atomic flag (async-signal-safe); the main loop
//! drains the actual wait statuses in normal context at prompt time.

#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use crate::jobs::ChildEvent;
#[cfg(unix)]
use crate::status;

/// Set by the SIGCHLD handler; cleared by [`drain_child_events`].
#[cfg(unix)]
static CHILD_STATUS_CHANGED: AtomicBool = AtomicBool::new(false);

/// Keyboard and terminal-control signals the shell itself must survive.
#[cfg(unix)]
const SHELL_IGNORED_SIGNALS: [libc::c_int; 5] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
];

/// Install the shell's signal dispositions. Called once at startup.
#[cfg(unix)]
pub(crate) fn install_shell_signals() -> io::Result<()> {
    for &sig in &SHELL_IGNORED_SIGNALS {
        if unsafe { libc::signal(sig, libc::SIG_IGN) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }

    // SAFETY: the handler only stores into an atomic, which is
    // async-signal-safe. The returned SigId is intentionally leaked; the
    // handler lives for the life of the process.
    let _ = unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGCHLD, || {
            CHILD_STATUS_CHANGED.store(true, Ordering::SeqCst);
        })?
    };

    log::debug!("signal dispositions installed");
    Ok(())
}

/// Drain every pending child status change without blocking.
///
/// Runs in normal context from the main loop (never from the handler), so
/// the job table, allocation, and stdio are all fair game for the caller.
#[cfg(unix)]
pub(crate) fn drain_child_events() -> Vec<(u32, ChildEvent)> {
    if !CHILD_STATUS_CHANGED.swap(false, Ordering::SeqCst) {
        return Vec::new();
    }

    let mut events = Vec::new();
    loop {
        let mut raw_status: libc::c_int = 0;
        let waited = unsafe {
            libc::waitpid(
                -1,
                &mut raw_status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };

        if waited == 0 {
            break; // children exist, none changed state
        }
        if waited < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break; // ECHILD: nothing left to reap
        }

        events.push((waited as u32, classify_status(raw_status)));
    }

    if !events.is_empty() {
        log::debug!("drained {} child status change(s)", events.len());
    }
    events
}

#[cfg(not(unix))]
pub(crate) fn drain_child_events() -> Vec<(u32, crate::jobs::ChildEvent)> {
    Vec::new()
}

#[cfg(unix)]
fn classify_status(raw_status: libc::c_int) -> ChildEvent {
    if libc::WIFSTOPPED(raw_status) {
        ChildEvent::Stopped
    } else if libc::WIFCONTINUED(raw_status) {
        ChildEvent::Continued
    } else {
        ChildEvent::Exited(status::exit_code_from_wait_status(raw_status).unwrap_or(1))
    }
}

// ── Process groups ────────────────────────────────────────────────────────────

#[cfg(unix)]
pub(crate) fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; the child-side setpgid won the race.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

/// Deliver `sig` to every member of the process group `pgid`.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: libc::pid_t, sig: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(-pgid, sig) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Deliver `sig` to a single process.
#[cfg(unix)]
pub(crate) fn signal_pid(pid: libc::pid_t, sig: libc::c_int) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::kill(pid, sig) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

// ── Terminal ownership ────────────────────────────────────────────────────────

/// RAII handover of the controlling terminal to a job's process group.
///
/// Construction calls `tcsetpgrp(tty, target_pgid)`; drop hands the terminal
/// back to the shell's group on every exit path, including errors and
/// panics. When stdin is not a terminal both directions are no-ops.
#[cfg(unix)]
pub(crate) struct ForegroundTerminalGuard {
    tty_fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
}

#[cfg(unix)]
impl ForegroundTerminalGuard {
    pub(crate) fn new(target_pgid: libc::pid_t) -> io::Result<Self> {
        let tty_fd = if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
            Some(libc::STDIN_FILENO)
        } else {
            None
        };

        let shell_pgid = unsafe { libc::getpgrp() };
        let guard = Self { tty_fd, shell_pgid };

        if let Some(fd) = guard.tty_fd {
            set_terminal_foreground(fd, target_pgid)?;
        }

        Ok(guard)
    }
}

#[cfg(unix)]
impl Drop for ForegroundTerminalGuard {
    fn drop(&mut self) {
        if let Some(fd) = self.tty_fd {
            if let Err(e) = set_terminal_foreground(fd, self.shell_pgid) {
                log::warn!("failed to reclaim terminal: {e}");
            }
        }
    }
}

// The shell holds SIGTTOU at SIG_IGN for its whole lifetime, so tcsetpgrp
// from a non-foreground shell cannot stop us here.
#[cfg(unix)]
fn set_terminal_foreground(fd: libc::c_int, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

// ── Foreground waiting ────────────────────────────────────────────────────────

/// Outcome of one `waitpid(-pgid, WUNTRACED)` round.
#[cfg(unix)]
pub(crate) enum GroupWait {
    /// A member changed state; stops arrive here as [`ChildEvent::Stopped`].
    Member(u32, ChildEvent),
    /// ECHILD: every member is gone.
    NoChildren,
}

/// Block until one member of `pgid` exits, dies, or stops. EINTR retried.
#[cfg(unix)]
pub(crate) fn wait_group_member(pgid: libc::pid_t) -> io::Result<GroupWait> {
    loop {
        let mut raw_status: libc::c_int = 0;
        let waited = unsafe { libc::waitpid(-pgid, &mut raw_status, libc::WUNTRACED) };

        if waited < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EINTR => continue,
                Some(code) if code == libc::ECHILD => return Ok(GroupWait::NoChildren),
                _ => return Err(err),
            }
        }

        return Ok(GroupWait::Member(
            waited as u32,
            classify_status(raw_status),
        ));
    }
}
