use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::process::{Command, Stdio};

use os_pipe::{PipeReader, PipeWriter, pipe};

use crate::builtins::{self, BuiltinAction};
use crate::error::ShellError;
#[cfg(unix)]
use crate::job_control;
#[cfg(unix)]
use crate::jobs::{ChildEvent, JobState};
use crate::parser::{Pipeline, Segment};
use crate::state::ShellState;

/// What the REPL should do after a pipeline ran.
#[derive(Debug, PartialEq)]
pub enum ExecutionAction {
    Continue,
    Exit(i32),
}

/// Launch a parsed pipeline.
///
/// A single-segment foreground builtin with no redirections runs in-process
/// against real shell state. Everything else is spawned: external commands
/// as children of a fresh process group, builtins on threads against a
/// fork-equivalent state snapshot with their output plumbed into the
/// pipeline.
pub fn execute(pipeline: &Pipeline, state: &mut ShellState, cmdline: &str) -> ExecutionAction {
    if let [segment] = pipeline.segments.as_slice() {
        let plain = segment.infile.is_none() && segment.outfile.is_none();
        if !pipeline.background && plain && builtins::is_builtin(&segment.argv[0]) {
            return run_builtin_in_process(segment, state);
        }
    }

    match launch(pipeline, state, cmdline) {
        Ok(action) => action,
        Err(e) => {
            eprintln!("msh: {e}");
            ExecutionAction::Continue
        }
    }
}

fn run_builtin_in_process(segment: &Segment, state: &mut ShellState) -> ExecutionAction {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let action = builtins::execute(
        &segment.argv[0],
        &segment.argv[1..],
        &mut stdout,
        &mut stderr,
        state,
    );
    let _ = stdout.flush();
    match action {
        BuiltinAction::Continue(_) => ExecutionAction::Continue,
        BuiltinAction::Exit(code) => ExecutionAction::Exit(code),
    }
}

// ── Pipeline launch ───────────────────────────────────────────────────────────

fn launch(
    pipeline: &Pipeline,
    state: &mut ShellState,
    cmdline: &str,
) -> Result<ExecutionAction, ShellError> {
    let n = pipeline.segments.len();

    // Process-group leader: the pid of the first external child. Stays None
    // for builtin-only pipelines, which spawn no processes at all.
    let mut pipeline_pgid: Option<u32> = None;
    let mut children: Vec<std::process::Child> = Vec::new();
    // Builtins run on threads so the pipe has a writer that closes when the
    // builtin finishes; dropping a JoinHandle detaches the thread.
    let mut builtin_threads: Vec<std::thread::JoinHandle<()>> = Vec::new();
    let mut prev_reader: Option<PipeReader> = None;

    for (idx, segment) in pipeline.segments.iter().enumerate() {
        let is_last = idx + 1 == n;

        let (stdout_handle, next_reader) = if is_last {
            match &segment.outfile {
                Some(path) => (Output::File(open_output_file(path, segment.append)?), None),
                None => (Output::Inherit, None),
            }
        } else {
            let (reader, writer) =
                pipe().map_err(|e| ShellError::io("failed to create pipe", e))?;
            (Output::Pipe(writer), Some(reader))
        };

        let stdin_handle = match prev_reader.take() {
            Some(reader) => Input::Pipe(reader),
            None if idx > 0 => Input::Inherit, // unreachable: every non-first stage has a pipe
            None => match &segment.infile {
                Some(path) => Input::File(
                    File::open(path).map_err(|e| ShellError::io(path.clone(), e))?,
                ),
                // A background pipeline must never compete for the terminal.
                None if pipeline.background => Input::Null,
                None => Input::Inherit,
            },
        };

        if builtins::is_builtin(&segment.argv[0]) {
            builtin_threads.push(spawn_builtin_stage(segment, stdin_handle, stdout_handle, state));
        } else {
            let child = spawn_external_stage(segment, stdin_handle, stdout_handle, pipeline_pgid)?;

            #[cfg(unix)]
            {
                let pid = child.id() as libc::pid_t;
                let pgid = pipeline_pgid.unwrap_or(child.id()) as libc::pid_t;
                // The child's pre_exec also calls setpgid; doing it here as
                // well closes the race where the child execs first.
                if let Err(e) = job_control::set_process_group(pid, pgid) {
                    log::warn!("setpgid({pid}, {pgid}) failed: {e}");
                }
            }

            if pipeline_pgid.is_none() {
                pipeline_pgid = Some(child.id());
            }
            children.push(child);
        }

        prev_reader = next_reader;
    }

    let Some(pgid) = pipeline_pgid else {
        // Builtin-only pipeline: no processes, no job to track.
        if pipeline.background {
            drop(builtin_threads);
        } else {
            for handle in builtin_threads {
                let _ = handle.join();
            }
        }
        return Ok(ExecutionAction::Continue);
    };

    let pids: Vec<u32> = children.iter().map(|c| c.id()).collect();
    let id = state.jobs.add(pgid, pids, cmdline.to_string());

    if pipeline.background {
        drop(builtin_threads);
        drop(children);
        println!("[{id}] {pgid}");
        return Ok(ExecutionAction::Continue);
    }

    // Join builtin stages first so every pipe writer is closed and the
    // external stages see EOF; they are already reading concurrently.
    for handle in builtin_threads {
        let _ = handle.join();
    }

    #[cfg(unix)]
    {
        drop(children);
        wait_in_foreground(pgid, state);
    }

    #[cfg(not(unix))]
    {
        for mut child in children {
            let _ = child.wait();
        }
        state.jobs.remove(id);
    }

    Ok(ExecutionAction::Continue)
}

/// Run a builtin pipeline stage on a thread against a state snapshot.
///
/// The stdin handle is dropped immediately: no builtin reads standard
/// input, and closing the pipe end lets an upstream writer see EPIPE rather
/// than blocking forever.
fn spawn_builtin_stage(
    segment: &Segment,
    stdin_handle: Input,
    stdout_handle: Output,
    state: &ShellState,
) -> std::thread::JoinHandle<()> {
    drop(stdin_handle);
    let program = segment.argv[0].clone();
    let args = segment.argv[1..].to_vec();
    let mut snapshot = state.snapshot();
    let mut writer = stdout_handle.into_writer();
    std::thread::spawn(move || {
        let _ = builtins::execute(
            &program,
            &args,
            writer.as_mut(),
            &mut io::stderr(),
            &mut snapshot,
        );
        let _ = writer.flush();
    })
}

fn spawn_external_stage(
    segment: &Segment,
    stdin_handle: Input,
    stdout_handle: Output,
    pipeline_pgid: Option<u32>,
) -> Result<std::process::Child, ShellError> {
    let mut process = Command::new(&segment.argv[0]);
    process.args(&segment.argv[1..]);
    process
        .stdin(stdin_handle.into_stdio())
        .stdout(stdout_handle.into_stdio());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Snapshot the pgid before spawning so the closure captures the
        // right leader (None = first stage, creates the group).
        let captured_pgid = pipeline_pgid;
        unsafe {
            process.pre_exec(move || {
                // The shell holds these at SIG_IGN (and Rust starts with
                // SIGPIPE ignored); SIG_IGN survives exec, so reset to the
                // defaults the command expects.
                let signals = [
                    libc::SIGINT,
                    libc::SIGQUIT,
                    libc::SIGTSTP,
                    libc::SIGTTIN,
                    libc::SIGTTOU,
                    libc::SIGCHLD,
                    libc::SIGPIPE,
                ];
                for &sig in &signals {
                    if libc::signal(sig, libc::SIG_DFL) == libc::SIG_ERR {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                // First stage: setpgid(0, 0) makes this child the leader.
                // Later stages: join the leader's group.
                let target_pgid = captured_pgid.map(|p| p as libc::pid_t).unwrap_or(0);
                if libc::setpgid(0, target_pgid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
    #[cfg(not(unix))]
    let _ = pipeline_pgid;

    process.spawn().map_err(|e| spawn_error(&segment.argv[0], e))
}

/// Map a spawn failure to the conventional diagnostic. Children that were
/// already spawned are not killed: their pipe ends close as the handles
/// drop, they finish on EOF, and the SIGCHLD drain reaps them.
fn spawn_error(program: &str, e: io::Error) -> ShellError {
    if e.kind() == io::ErrorKind::NotFound {
        ShellError::CommandNotFound(program.to_string())
    } else {
        ShellError::io(program.to_string(), e)
    }
}

// ── Foreground waiting ────────────────────────────────────────────────────────

/// Hand the terminal to `pgid`, wait for the whole group, and reclaim the
/// terminal on every exit path. Used for freshly launched foreground
/// pipelines and for `fg`.
#[cfg(unix)]
pub fn wait_in_foreground(pgid: u32, state: &mut ShellState) {
    let terminal_guard = match job_control::ForegroundTerminalGuard::new(pgid as libc::pid_t) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("msh: failed to hand terminal to job group {pgid}: {e}");
            None
        }
    };

    loop {
        match job_control::wait_group_member(pgid as libc::pid_t) {
            Err(e) => {
                eprintln!("msh: waitpid: {e}");
                break;
            }
            Ok(job_control::GroupWait::NoChildren) => {
                state.jobs.update_state(pgid, JobState::Done);
                break;
            }
            Ok(job_control::GroupWait::Member(_, ChildEvent::Stopped)) => {
                state.jobs.update_state(pgid, JobState::Stopped);
                break;
            }
            Ok(job_control::GroupWait::Member(pid, ChildEvent::Exited(_))) => {
                if state.jobs.note_foreground_reap(pgid, pid) {
                    break;
                }
            }
            Ok(job_control::GroupWait::Member(_, ChildEvent::Continued)) => {}
        }
    }

    // Reclaim the terminal before touching stdout again.
    drop(terminal_guard);

    let Some(job) = state.jobs.by_pgid(pgid) else {
        return;
    };
    match job.state {
        JobState::Stopped => {
            println!("[{}]  Stopped  {}", job.id, job.cmdline);
        }
        JobState::Done => {
            // A foreground job's completion needs no announcement.
            let id = job.id;
            state.jobs.remove(id);
        }
        JobState::Running => {}
    }
}

// ── File-descriptor handles ───────────────────────────────────────────────────

/// Where a stage's stdin comes from. Each handle has exactly one owner;
/// moving it into `Stdio` (or dropping it) closes our copy.
enum Input {
    Inherit,
    Null,
    Pipe(PipeReader),
    File(File),
}

/// Where a stage's stdout goes.
enum Output {
    Inherit,
    Pipe(PipeWriter),
    File(File),
}

impl Input {
    fn into_stdio(self) -> Stdio {
        match self {
            Input::Inherit => Stdio::inherit(),
            Input::Null => Stdio::null(),
            Input::Pipe(reader) => Stdio::from(reader),
            Input::File(file) => Stdio::from(file),
        }
    }
}

impl Output {
    fn into_stdio(self) -> Stdio {
        match self {
            Output::Inherit => Stdio::inherit(),
            Output::Pipe(writer) => Stdio::from(writer),
            Output::File(file) => Stdio::from(file),
        }
    }

    fn into_writer(self) -> Box<dyn Write + Send> {
        match self {
            Output::Inherit => Box::new(io::stdout()),
            Output::Pipe(writer) => Box::new(writer),
            Output::File(file) => Box::new(file),
        }
    }
}

fn open_output_file(path: &str, append: bool) -> Result<File, ShellError> {
    let mut opts = OpenOptions::new();
    opts.create(true).write(true);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    opts.open(path)
        .map_err(|e| ShellError::io(path.to_string(), e))
}
