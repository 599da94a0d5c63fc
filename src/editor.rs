use std::io::{self, BufRead, Write};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, ClearType},
    tty::IsTty,
};

/// Hard cap on a single input line.
const MAX_LINE_LEN: usize = 4096;

// ── Raw-mode guard ────────────────────────────────────────────────────────────

/// RAII guard: enables terminal raw mode on construction and restores it on
/// drop — even on panic — so the terminal is never left in a broken state.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

// ── Line editor ───────────────────────────────────────────────────────────────

/// Reads one logical line from the terminal with in-line editing and
/// history recall. The editor owns only its line buffer and a history
/// cursor; the history itself lives in [`crate::history::HistoryStore`].
pub struct LineEditor {
    /// Current line content, stored as `char`s for Unicode-safe cursor indexing.
    buffer: Vec<char>,
    /// Cursor position within `buffer` (0 = before the first char).
    cursor: usize,
    /// Index into the history during navigation; equals `history.len()` when
    /// not navigating (the "newest + 1" slot holding the line in progress).
    history_idx: usize,
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl LineEditor {
    pub fn new() -> Self {
        LineEditor {
            buffer: Vec::new(),
            cursor: 0,
            history_idx: 0,
        }
    }

    /// Read one line of input, displaying `prompt` to the left.
    ///
    /// Returns:
    /// - `Ok(Some(line))` — the user submitted a line (may be empty)
    /// - `Ok(None)` — EOF (Ctrl-D on an empty buffer, or stdin was closed)
    /// - `Err(_)` — I/O error
    ///
    /// When stdin is not a TTY (scripts, integration tests piping input)
    /// the method falls back to a plain `read_line()` call.
    pub fn read_line(&mut self, prompt: &str, history: &[String]) -> io::Result<Option<String>> {
        // Gate on stdin, not stdout: interactive editing requires a keyboard
        // on the *input* side. `printf 'cmd\n' | msh` has stdout on a
        // terminal but stdin on a pipe.
        if !io::stdin().is_tty() {
            return self.read_line_fallback(prompt);
        }

        self.buffer.clear();
        self.cursor = 0;
        self.history_idx = history.len();

        let _guard = RawModeGuard::enter()?;

        // Raw mode disables echo; we must display the prompt ourselves.
        print!("{prompt}");
        io::stdout().flush()?;

        loop {
            let ev = match event::read() {
                Ok(ev) => ev,
                // crossterm handles EINTR internally, but be defensive.
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            let Event::Key(key) = ev else {
                continue; // ignore mouse, resize, paste, etc.
            };

            if key.kind != KeyEventKind::Press && key.kind != KeyEventKind::Repeat {
                continue;
            }

            match self.handle_key(key, prompt, history)? {
                KeyAction::Submit(line) => return Ok(Some(line)),
                KeyAction::Eof => return Ok(None),
                KeyAction::Continue => {}
            }
        }
    }

    // ── Private ───────────────────────────────────────────────────────────────

    /// Non-TTY path: print prompt and delegate to `BufRead::read_line`.
    fn read_line_fallback(&mut self, prompt: &str) -> io::Result<Option<String>> {
        print!("{prompt}");
        io::stdout().flush()?;
        let stdin = io::stdin();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(e),
        }
    }

    fn handle_key(
        &mut self,
        key: crossterm::event::KeyEvent,
        prompt: &str,
        history: &[String],
    ) -> io::Result<KeyAction> {
        use KeyCode::*;
        use KeyModifiers as Mod;

        match (key.code, key.modifiers) {
            // ── Submit ────────────────────────────────────────────────────────
            (Enter, _) => {
                // Raw mode suppresses the terminal's automatic newline.
                print!("\r\n");
                io::stdout().flush()?;
                let line: String = self.buffer.iter().collect();
                return Ok(KeyAction::Submit(line));
            }

            // ── Ctrl-D: EOF or delete-at-cursor ───────────────────────────────
            (Char('d'), Mod::CONTROL) => {
                if self.buffer.is_empty() {
                    print!("\r\n");
                    io::stdout().flush()?;
                    return Ok(KeyAction::Eof);
                }
                self.delete_at_cursor();
                self.redraw(prompt)?;
            }

            // ── Ctrl-C: clear buffer, re-show prompt ──────────────────────────
            // In raw mode ISIG is off, so Ctrl-C arrives here as a key event
            // rather than SIGINT (which the shell ignores anyway).
            (Char('c'), Mod::CONTROL) => {
                print!("^C\r\n{prompt}");
                io::stdout().flush()?;
                self.buffer.clear();
                self.cursor = 0;
                self.history_idx = history.len();
            }

            // ── Ctrl-L: clear screen ──────────────────────────────────────────
            (Char('l'), Mod::CONTROL) => {
                execute!(
                    io::stdout(),
                    terminal::Clear(ClearType::All),
                    cursor::MoveTo(0, 0),
                )?;
                self.redraw(prompt)?;
            }

            // ── Ctrl-A / Home: jump to start of line ──────────────────────────
            (Char('a'), Mod::CONTROL) | (Home, _) => {
                self.cursor = 0;
                self.sync_cursor(prompt)?;
            }

            // ── Ctrl-E / End: jump to end of line ─────────────────────────────
            (Char('e'), Mod::CONTROL) | (End, _) => {
                self.cursor = self.buffer.len();
                self.sync_cursor(prompt)?;
            }

            // ── Ctrl-K: kill from cursor to end of line ───────────────────────
            (Char('k'), Mod::CONTROL) => {
                self.buffer.truncate(self.cursor);
                self.redraw(prompt)?;
            }

            // ── Ctrl-U: kill from start of line to cursor ─────────────────────
            (Char('u'), Mod::CONTROL) => {
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                self.redraw(prompt)?;
            }

            // ── Ctrl-W: delete previous word ──────────────────────────────────
            (Char('w'), Mod::CONTROL) => {
                self.delete_word_before_cursor();
                self.redraw(prompt)?;
            }

            // ── Arrow keys ────────────────────────────────────────────────────
            (Left, _) => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.sync_cursor(prompt)?;
                }
            }
            (Right, _) => {
                if self.cursor < self.buffer.len() {
                    self.cursor += 1;
                    self.sync_cursor(prompt)?;
                }
            }

            // ── History navigation ────────────────────────────────────────────
            (Up, _) => {
                self.history_prev(history);
                self.redraw(prompt)?;
            }
            (Down, _) => {
                self.history_next(history);
                self.redraw(prompt)?;
            }

            // ── Backspace / Delete ────────────────────────────────────────────
            (Backspace, _) => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.buffer.remove(self.cursor);
                    self.redraw(prompt)?;
                }
            }
            (Delete, _) => {
                self.delete_at_cursor();
                self.redraw(prompt)?;
            }

            // ── Printable characters ──────────────────────────────────────────
            (Char(c), Mod::NONE) | (Char(c), Mod::SHIFT) => {
                if self.buffer.len() < MAX_LINE_LEN {
                    self.buffer.insert(self.cursor, c);
                    self.cursor += 1;
                    self.redraw(prompt)?;
                }
            }

            // ── Everything else: ignore ───────────────────────────────────────
            _ => {}
        }

        Ok(KeyAction::Continue)
    }

    /// Erase the current line and redraw prompt + buffer, then reposition cursor.
    fn redraw(&self, prompt: &str) -> io::Result<()> {
        let line: String = self.buffer.iter().collect();
        // Prompt length measured in chars (not bytes) for correct column math.
        let col = (prompt.chars().count() + self.cursor) as u16;
        execute!(
            io::stdout(),
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::CurrentLine),
        )?;
        print!("{prompt}{line}");
        io::stdout().flush()?;
        execute!(io::stdout(), cursor::MoveToColumn(col))?;
        Ok(())
    }

    /// Move the terminal cursor to match `self.cursor` without redrawing text.
    /// Used for pure cursor moves (Left/Right/Home/End) to avoid flicker.
    fn sync_cursor(&self, prompt: &str) -> io::Result<()> {
        let col = (prompt.chars().count() + self.cursor) as u16;
        execute!(io::stdout(), cursor::MoveToColumn(col))?;
        Ok(())
    }

    fn delete_at_cursor(&mut self) {
        if self.cursor < self.buffer.len() {
            self.buffer.remove(self.cursor);
        }
    }

    fn delete_word_before_cursor(&mut self) {
        if self.cursor == 0 {
            return;
        }
        // Skip spaces immediately before the cursor, then the non-space word.
        let mut end = self.cursor;
        while end > 0 && self.buffer[end - 1] == ' ' {
            end -= 1;
        }
        let mut start = end;
        while start > 0 && self.buffer[start - 1] != ' ' {
            start -= 1;
        }
        self.buffer.drain(start..self.cursor);
        self.cursor = start;
    }

    /// Up: replace the line with the previous history entry, bounded at the
    /// oldest.
    fn history_prev(&mut self, history: &[String]) {
        if history.is_empty() || self.history_idx == 0 {
            return;
        }
        self.history_idx -= 1;
        self.buffer = history[self.history_idx].chars().collect();
        self.cursor = self.buffer.len();
    }

    /// Down: replace the line with the next history entry; moving past the
    /// newest entry yields an empty buffer.
    fn history_next(&mut self, history: &[String]) {
        if self.history_idx >= history.len() {
            return;
        }
        self.history_idx += 1;
        if self.history_idx == history.len() {
            self.buffer.clear();
        } else {
            self.buffer = history[self.history_idx].chars().collect();
        }
        self.cursor = self.buffer.len();
    }
}

// ── Internal return type ──────────────────────────────────────────────────────

enum KeyAction {
    Continue,
    Submit(String),
    Eof,
}

// ── Unit tests ────────────────────────────────────────────────────────────────
