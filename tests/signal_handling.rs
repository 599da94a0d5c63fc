//! The shell must survive the keyboard signals it ignores, while its
//! children get default dispositions back.

#![cfg(unix)]

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

fn run_shell(lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_msh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn msh");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            // A line may race the shell exiting (e.g. an early `exit N`).
            let _ = writeln!(stdin, "{line}");
        }
        let _ = writeln!(stdin, "exit");
    }

    child.wait_with_output().expect("wait output")
}

/// Spawn the shell, deliver `sig` to it while idle, then feed `lines`.
fn run_shell_signaled(sig: libc::c_int, lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_msh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn msh");

    // Let the shell reach its prompt, then signal it directly.
    std::thread::sleep(Duration::from_millis(200));
    unsafe {
        libc::kill(child.id() as libc::pid_t, sig);
    }

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            // A line may race the shell exiting (e.g. an early `exit N`).
            let _ = writeln!(stdin, "{line}");
        }
        let _ = writeln!(stdin, "exit");
    }

    child.wait_with_output().expect("wait output")
}

#[test]
fn shell_survives_sigtstp() {
    let output = run_shell_signaled(libc::SIGTSTP, &["echo ALIVE"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn shell_survives_sigint() {
    let output = run_shell_signaled(libc::SIGINT, &["echo ALIVE"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn shell_survives_sigquit() {
    let output = run_shell_signaled(libc::SIGQUIT, &["echo ALIVE"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn pipeline_sigpipe_does_not_abort_shell() {
    // `yes` writes until `head` exits and closes the pipe; `yes` then dies
    // of SIGPIPE (restored to SIG_DFL in the child) and the shell carries on.
    let output = run_shell(&["yes | head -1", "echo ALIVE"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('y'), "stdout was: {stdout}");
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn foreground_child_can_be_killed_without_harming_the_shell() {
    // The child kills its own process group with SIGINT; the shell is in a
    // different group and must survive to run the next command.
    let output = run_shell(&["sh -c 'kill -INT $$'", "echo ALIVE"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}
