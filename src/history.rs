use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum number of entries kept in memory; the oldest are dropped first.
pub const HISTORY_CAPACITY: usize = 1000;

/// Two-level command history: a bounded in-memory list backed by an
/// append-only file at `~/.myshell_history`.
///
/// The file is opened briefly for read at construction and briefly for
/// append per line; it is never held open across commands. A write failure
/// is reported once per session, after which history continues in memory
/// only.
#[derive(Clone)]
pub struct HistoryStore {
    entries: Vec<String>,
    /// Path to `~/.myshell_history`, or `None` when HOME is not set.
    path: Option<PathBuf>,
    write_error_reported: bool,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    /// Create a store and load existing entries from `~/.myshell_history`.
    /// A missing or unreadable file is treated as empty.
    pub fn new() -> Self {
        let path = history_file_path();
        let entries = path.as_deref().map(load_entries).unwrap_or_default();
        log::debug!("loaded {} history entries", entries.len());
        HistoryStore {
            entries,
            path,
            write_error_reported: false,
        }
    }

    /// Record `line` in memory and append it to the history file.
    ///
    /// Duplicates are permitted. The caller is responsible for skipping
    /// empty lines; this layer only enforces the capacity bound.
    pub fn append(&mut self, line: &str) {
        debug_assert!(!line.contains('\n'), "history entries are single lines");
        self.entries.push(line.to_string());
        if self.entries.len() > HISTORY_CAPACITY {
            let excess = self.entries.len() - HISTORY_CAPACITY;
            self.entries.drain(..excess);
        }

        let Some(path) = self.path.clone() else {
            return;
        };
        if let Err(e) = append_to_file(&path, line) {
            if !self.write_error_reported {
                eprintln!("msh: cannot write {}: {e}", path.display());
                eprintln!("msh: history will not persist this session");
                self.write_error_reported = true;
            }
        }
    }

    /// Enumerate `(1-based index, line)` pairs, oldest first.
    pub fn list(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, line)| (i + 1, line.as_str()))
    }

    /// All entries, oldest first. Used by the line editor for recall.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// A detached store for unit tests: nothing loaded, nothing persisted.
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self::with_path(None)
    }

    #[cfg(test)]
    fn with_path(path: Option<PathBuf>) -> Self {
        let entries = path.as_deref().map(load_entries).unwrap_or_default();
        HistoryStore {
            entries,
            path,
            write_error_reported: false,
        }
    }
}

fn history_file_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".myshell_history"))
}

/// Read the history file, stripping trailing CR/LF and keeping only the
/// newest `HISTORY_CAPACITY` lines.
fn load_entries(path: &Path) -> Vec<String> {
    let contents = std::fs::read_to_string(path).unwrap_or_default();
    let mut entries: Vec<String> = contents
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if entries.len() > HISTORY_CAPACITY {
        let excess = entries.len() - HISTORY_CAPACITY;
        entries.drain(..excess);
    }
    entries
}

fn append_to_file(path: &Path, line: &str) -> std::io::Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_list_with_one_based_indices() {
        let mut h = HistoryStore::with_path(None);
        h.append("echo one");
        h.append("echo two");
        let listed: Vec<(usize, String)> =
            h.list().map(|(i, l)| (i, l.to_string())).collect();
        assert_eq!(
            listed,
            vec![(1, "echo one".to_string()), (2, "echo two".to_string())]
        );
    }

    #[test]
    fn duplicates_are_kept() {
        let mut h = HistoryStore::with_path(None);
        h.append("ls");
        h.append("ls");
        h.append("ls");
        assert_eq!(h.entries().len(), 3);
    }

    #[test]
    fn capacity_drops_oldest() {
        let mut h = HistoryStore::with_path(None);
        for i in 0..HISTORY_CAPACITY + 5 {
            h.append(&format!("cmd-{i}"));
        }
        assert_eq!(h.entries().len(), HISTORY_CAPACITY);
        assert_eq!(h.entries()[0], "cmd-5");
        assert_eq!(
            h.entries().last().unwrap(),
            &format!("cmd-{}", HISTORY_CAPACITY + 4)
        );
    }

    #[test]
    fn load_strips_crlf_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".myshell_history");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            write!(f, "echo a\r\n\necho b\n").unwrap();
        }
        let h = HistoryStore::with_path(Some(path));
        assert_eq!(h.entries(), ["echo a".to_string(), "echo b".to_string()]);
    }

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let h = HistoryStore::with_path(Some(dir.path().join(".myshell_history")));
        assert!(h.entries().is_empty());
    }

    #[test]
    fn append_persists_to_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".myshell_history");
        let mut h = HistoryStore::with_path(Some(path.clone()));
        h.append("first");
        h.append("second");

        let reloaded = HistoryStore::with_path(Some(path));
        assert_eq!(
            reloaded.entries(),
            ["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn load_clips_to_capacity_keeping_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".myshell_history");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            for i in 0..HISTORY_CAPACITY + 10 {
                writeln!(f, "cmd-{i}").unwrap();
            }
        }
        let h = HistoryStore::with_path(Some(path));
        assert_eq!(h.entries().len(), HISTORY_CAPACITY);
        assert_eq!(h.entries()[0], "cmd-10");
    }
}
