mod builtins;
mod editor;
mod error;
mod executor;
mod expander;
mod history;
mod job_control;
mod jobs;
mod parser;
mod state;
mod status;

use crate::executor::ExecutionAction;
use crate::state::ShellState;

const PROMPT: &str = "msh> ";

fn main() {
    env_logger::init();

    #[cfg(unix)]
    if let Err(e) = job_control::install_shell_signals() {
        eprintln!("msh: failed to install signal handlers: {e}");
    }

    let mut editor = editor::LineEditor::new();
    let mut state = ShellState::new();
    let mut exit_code = 0;

    loop {
        // Background job notifications are printed at the prompt, never
        // while a line is being edited.
        report_finished_jobs(&mut state);

        let line = match editor.read_line(PROMPT, state.history.entries()) {
            Ok(Some(line)) => line,
            Ok(None) => break, // EOF
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("msh: error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        state.history.append(line);

        if let ExecutionAction::Exit(code) = run_line(line, &mut state) {
            exit_code = code;
            break;
        }
    }

    std::process::exit(exit_code);
}

/// Expand, parse, and execute one accepted line.
fn run_line(line: &str, state: &mut ShellState) -> ExecutionAction {
    let expanded = expander::expand(line);
    if expanded.trim().is_empty() {
        // The whole line expanded away, e.g. `$UNSET_VAR`.
        return ExecutionAction::Continue;
    }

    let pipeline = match parser::parse(&expanded) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("msh: {e}");
            return ExecutionAction::Continue;
        }
    };

    executor::execute(&pipeline, state, line)
}

/// Apply drained child status changes and announce finished jobs.
fn report_finished_jobs(state: &mut ShellState) {
    for (pid, event) in job_control::drain_child_events() {
        state.jobs.apply_event(pid, event);
    }
    for job in state.jobs.reap_done() {
        println!("[{}]  Done  {}", job.id, job.cmdline);
    }
}
