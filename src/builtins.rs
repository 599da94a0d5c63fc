use std::io::Write;

use crate::state::ShellState;

#[cfg(unix)]
use crate::executor;
#[cfg(unix)]
use crate::job_control;
#[cfg(unix)]
use crate::jobs::JobState;

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["cd", "exit", "history", "jobs", "fg", "bg", "kill", "echo"];

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// What the REPL should do after a builtin ran.
#[derive(Debug, PartialEq)]
pub enum BuiltinAction {
    Continue(i32),
    Exit(i32),
}

/// Execute a builtin command, writing output to the provided streams.
///
/// When `state.subshell` is set the builtin is running in fork-equivalent
/// isolation (piped, redirected, or backgrounded): state-changing commands
/// behave as they would in a forked child — their effects never reach the
/// shell.
pub fn execute(
    program: &str,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    state: &mut ShellState,
) -> BuiltinAction {
    match program {
        "cd" => BuiltinAction::Continue(builtin_cd(args, stderr, state)),
        "exit" => builtin_exit(args, stderr),
        "history" => BuiltinAction::Continue(builtin_history(stdout, state)),
        "jobs" => BuiltinAction::Continue(builtin_jobs(stdout, state)),
        "fg" => BuiltinAction::Continue(builtin_fg(args, stdout, stderr, state)),
        "bg" => BuiltinAction::Continue(builtin_bg(args, stdout, stderr, state)),
        "kill" => BuiltinAction::Continue(builtin_kill(args, stderr, state)),
        "echo" => BuiltinAction::Continue(builtin_echo(args, stdout)),
        _ => {
            let _ = writeln!(stderr, "msh: unknown builtin: {program}");
            BuiltinAction::Continue(1)
        }
    }
}

// ── cd ────────────────────────────────────────────────────────────────────────

/// `cd [dir|-]` — no argument falls back to `$HOME`; `-` swaps with OLDPWD.
fn builtin_cd(args: &[String], stderr: &mut dyn Write, state: &ShellState) -> i32 {
    let target = match args.first() {
        Some(dir) if dir == "-" => match std::env::var("OLDPWD") {
            Ok(prev) => prev,
            Err(_) => {
                let _ = writeln!(stderr, "cd: OLDPWD not set");
                return 1;
            }
        },
        Some(dir) => dir.clone(),
        None => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(stderr, "cd: HOME not set");
                return 1;
            }
        },
    };

    if state.subshell {
        // A forked cd changes only the child's directory, which then exits;
        // the observable effect is just the error check.
        if std::fs::metadata(&target).map(|m| m.is_dir()).unwrap_or(false) {
            return 0;
        }
        let _ = writeln!(stderr, "cd: {target}: no such directory");
        return 1;
    }

    // SAFETY: env vars are only mutated from the main thread; pipeline
    // threads run builtins in subshell mode and never get here.
    if let Ok(cwd) = std::env::current_dir() {
        unsafe { std::env::set_var("OLDPWD", cwd) };
    }

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }

    0
}

// ── exit ──────────────────────────────────────────────────────────────────────

fn builtin_exit(args: &[String], stderr: &mut dyn Write) -> BuiltinAction {
    match args.first() {
        None => BuiltinAction::Exit(0),
        Some(s) => match s.parse::<i32>() {
            Ok(code) => BuiltinAction::Exit(code),
            Err(_) => {
                let _ = writeln!(stderr, "exit: {s}: numeric argument required");
                BuiltinAction::Exit(2)
            }
        },
    }
}

// ── history / jobs ────────────────────────────────────────────────────────────

fn builtin_history(stdout: &mut dyn Write, state: &ShellState) -> i32 {
    for (index, line) in state.history.list() {
        let _ = writeln!(stdout, "{index:5}  {line}");
    }
    0
}

fn builtin_jobs(stdout: &mut dyn Write, state: &ShellState) -> i32 {
    for job in state.jobs.list() {
        let _ = writeln!(stdout, "[{}]  {}  {}", job.id, job.state, job.cmdline);
    }
    0
}

// ── fg / bg ───────────────────────────────────────────────────────────────────

/// Parse a job reference: `%3` or `3`.
fn parse_job_ref(arg: &str) -> Option<usize> {
    arg.strip_prefix('%').unwrap_or(arg).parse().ok()
}

fn resolve_job(
    name: &str,
    args: &[String],
    default: Option<usize>,
    stderr: &mut dyn Write,
    state: &ShellState,
) -> Option<usize> {
    let id = match args.first() {
        Some(arg) => match parse_job_ref(arg) {
            Some(id) => id,
            None => {
                let _ = writeln!(stderr, "{name}: {arg}: invalid job id");
                return None;
            }
        },
        None => match default {
            Some(id) => id,
            None => {
                let _ = writeln!(stderr, "{name}: no current job");
                return None;
            }
        },
    };

    if state.jobs.by_id(id).is_none() {
        let _ = writeln!(stderr, "{name}: %{id}: no such job");
        return None;
    }
    Some(id)
}

#[cfg(unix)]
fn builtin_fg(
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    state: &mut ShellState,
) -> i32 {
    if state.subshell {
        let _ = writeln!(stderr, "fg: no job control in this context");
        return 1;
    }

    let Some(id) = resolve_job("fg", args, state.jobs.most_recent_id(), stderr, state) else {
        return 1;
    };

    let job = state.jobs.by_id(id).expect("job resolved above");
    let pgid = job.pgid;
    let _ = writeln!(stdout, "{}", job.cmdline);
    let _ = stdout.flush();

    if let Err(e) = job_control::signal_group(pgid as libc::pid_t, libc::SIGCONT) {
        let _ = writeln!(stderr, "fg: failed to resume job %{id}: {e}");
        return 1;
    }
    state.jobs.update_state(pgid, JobState::Running);

    executor::wait_in_foreground(pgid, state);
    0
}

#[cfg(unix)]
fn builtin_bg(
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    state: &mut ShellState,
) -> i32 {
    if state.subshell {
        let _ = writeln!(stderr, "bg: no job control in this context");
        return 1;
    }

    let Some(id) = resolve_job("bg", args, state.jobs.most_recent_stopped_id(), stderr, state)
    else {
        return 1;
    };

    let job = state.jobs.by_id(id).expect("job resolved above");
    if job.state == JobState::Running {
        let _ = writeln!(stderr, "bg: job %{id} already running");
        return 1;
    }
    let pgid = job.pgid;
    let cmdline = job.cmdline.clone();

    if let Err(e) = job_control::signal_group(pgid as libc::pid_t, libc::SIGCONT) {
        let _ = writeln!(stderr, "bg: failed to resume job %{id}: {e}");
        return 1;
    }
    state.jobs.update_state(pgid, JobState::Running);
    let _ = writeln!(stdout, "[{id}]  {cmdline} &");
    0
}

#[cfg(not(unix))]
fn builtin_fg(
    _args: &[String],
    _stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    _state: &mut ShellState,
) -> i32 {
    let _ = writeln!(stderr, "fg: job control requires a Unix platform");
    1
}

#[cfg(not(unix))]
fn builtin_bg(
    _args: &[String],
    _stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    _state: &mut ShellState,
) -> i32 {
    let _ = writeln!(stderr, "bg: job control requires a Unix platform");
    1
}

// ── kill ──────────────────────────────────────────────────────────────────────

/// Signal names accepted by `kill`, with or without a `SIG` prefix.
#[cfg(unix)]
const SIGNALS: &[(&str, libc::c_int)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("ABRT", libc::SIGABRT),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("SEGV", libc::SIGSEGV),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("USR1", libc::SIGUSR1),
    ("USR2", libc::SIGUSR2),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
];

/// Parse the `SIG` part of `-SIG`: a number, or a name with or without the
/// `SIG` prefix, case-insensitive.
#[cfg(unix)]
fn parse_signal(arg: &str) -> Option<libc::c_int> {
    if let Ok(num) = arg.parse::<libc::c_int>() {
        return (num > 0).then_some(num);
    }
    let name = arg.to_ascii_uppercase();
    let name = name.strip_prefix("SIG").unwrap_or(&name);
    SIGNALS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, sig)| sig)
}

/// `kill [-SIG] pid|%id …` — signal a process or a whole job's group.
#[cfg(unix)]
fn builtin_kill(args: &[String], stderr: &mut dyn Write, state: &ShellState) -> i32 {
    let mut args = args.iter();
    let mut sig = libc::SIGTERM;
    let mut first_target = None;

    if let Some(first) = args.next() {
        if let Some(name) = first.strip_prefix('-') {
            match parse_signal(name) {
                Some(parsed) => sig = parsed,
                None => {
                    let _ = writeln!(stderr, "kill: {first}: invalid signal");
                    return 1;
                }
            }
        } else {
            first_target = Some(first);
        }
    }

    let targets: Vec<&String> = first_target.into_iter().chain(args).collect();
    if targets.is_empty() {
        let _ = writeln!(stderr, "kill: usage: kill [-SIG] pid | %id");
        return 1;
    }

    let mut exit_code = 0;
    for target in targets {
        let result = if let Some(job_ref) = target.strip_prefix('%') {
            match job_ref
                .parse::<usize>()
                .ok()
                .and_then(|id| state.jobs.by_id(id))
            {
                Some(job) => job_control::signal_group(job.pgid as libc::pid_t, sig),
                None => {
                    let _ = writeln!(stderr, "kill: {target}: no such job");
                    exit_code = 1;
                    continue;
                }
            }
        } else {
            match target.parse::<libc::pid_t>() {
                Ok(pid) => job_control::signal_pid(pid, sig),
                Err(_) => {
                    let _ = writeln!(stderr, "kill: {target}: arguments must be pids or %job ids");
                    exit_code = 1;
                    continue;
                }
            }
        };

        if let Err(e) = result {
            let _ = writeln!(stderr, "kill: {target}: {e}");
            exit_code = 1;
        }
    }
    exit_code
}

#[cfg(not(unix))]
fn builtin_kill(_args: &[String], stderr: &mut dyn Write, _state: &ShellState) -> i32 {
    let _ = writeln!(stderr, "kill: signals require a Unix platform");
    1
}

// ── echo ──────────────────────────────────────────────────────────────────────

fn builtin_echo(args: &[String], stdout: &mut dyn Write) -> i32 {
    let _ = writeln!(stdout, "{}", args.join(" "));
    0
}

// ── Unit tests ────────────────────────────────────────────────────────────────
