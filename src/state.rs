use crate::history::HistoryStore;
use crate::jobs::JobTable;

/// Mutable shell state threaded through the REPL and the built-ins.
#[derive(Clone)]
pub struct ShellState {
    pub jobs: JobTable,
    pub history: HistoryStore,
    /// True inside fork-equivalent isolation: a built-in that is piped,
    /// redirected, or backgrounded runs against a snapshot, and its
    /// mutations must not reach the real shell.
    pub subshell: bool,
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellState {
    pub fn new() -> Self {
        ShellState {
            jobs: JobTable::new(),
            history: HistoryStore::new(),
            subshell: false,
        }
    }

    /// A fork-equivalent copy for built-ins running outside the shell
    /// process proper (on a pipeline thread).
    pub fn snapshot(&self) -> ShellState {
        ShellState {
            jobs: self.jobs.clone(),
            history: self.history.clone(),
            subshell: true,
        }
    }
}
