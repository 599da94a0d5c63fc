use crate::error::ShellError;

/// One pipeline stage: its argument vector plus extracted redirections.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub argv: Vec<String>,
    pub infile: Option<String>,
    pub outfile: Option<String>,
    /// Only meaningful when `outfile` is set.
    pub append: bool,
}

/// A full parsed command line: one or more segments joined by pipes.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub segments: Vec<Segment>,
    pub background: bool,
}

/// Parse an (already expanded) line into a pipeline.
///
/// A trailing unquoted `&` marks the pipeline as background. The line is
/// split on unquoted `|`, each part tokenized with quote handling, and
/// redirection operators extracted. Unterminated quotes are accepted
/// leniently: the quote extends to the end of the line.
pub fn parse(line: &str) -> Result<Pipeline, ShellError> {
    let (line, background) = strip_background(line);
    if line.trim().is_empty() {
        return Err(ShellError::MissingCommand);
    }

    let mut segments = Vec::new();
    for part in split_pipes(line)? {
        segments.push(parse_segment(part)?);
    }

    Ok(Pipeline {
        segments,
        background,
    })
}

// ── Quote-aware scanning ──────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Tracks quoting across a left-to-right scan so callers can tell whether a
/// character is able to act as a shell operator.
struct QuoteScanner {
    quote: Quote,
    escaped: bool,
}

impl QuoteScanner {
    fn new() -> Self {
        QuoteScanner {
            quote: Quote::None,
            escaped: false,
        }
    }

    /// Advance over `ch`. Returns true when `ch` is quoted or escaped and
    /// therefore literal text.
    fn step(&mut self, ch: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return true;
        }
        match (self.quote, ch) {
            (Quote::None, '\'') => {
                self.quote = Quote::Single;
                true
            }
            (Quote::None, '"') => {
                self.quote = Quote::Double;
                true
            }
            (Quote::None, '\\') => {
                self.escaped = true;
                true
            }
            (Quote::None, _) => false,
            (Quote::Single, '\'') => {
                self.quote = Quote::None;
                true
            }
            (Quote::Single, _) => true,
            (Quote::Double, '"') => {
                self.quote = Quote::None;
                true
            }
            (Quote::Double, '\\') => {
                self.escaped = true;
                true
            }
            (Quote::Double, _) => true,
        }
    }
}

/// If the last non-whitespace character of the line is an unquoted `&`,
/// strip it and report the pipeline as background.
fn strip_background(line: &str) -> (&str, bool) {
    let trimmed = line.trim_end();
    let Some(last) = trimmed.chars().last() else {
        return (line, false);
    };
    if last != '&' {
        return (line, false);
    }

    // Replay the scan to check the `&` is outside all quoting.
    let mut scanner = QuoteScanner::new();
    let mut last_quoted = false;
    for ch in trimmed.chars() {
        last_quoted = scanner.step(ch);
    }
    if last_quoted {
        return (line, false);
    }

    (&trimmed[..trimmed.len() - 1], true)
}

/// Split on unquoted `|`, trimming each part. An empty part is a syntax
/// error.
fn split_pipes(line: &str) -> Result<Vec<&str>, ShellError> {
    let mut parts = Vec::new();
    let mut scanner = QuoteScanner::new();
    let mut start = 0;

    for (idx, ch) in line.char_indices() {
        let quoted = scanner.step(ch);
        if ch == '|' && !quoted {
            parts.push(&line[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    parts.push(&line[start..]);

    let parts: Vec<&str> = parts.iter().map(|p| p.trim()).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ShellError::EmptyPipelineSegment);
    }
    Ok(parts)
}

// ── Tokenization ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    /// `<`
    RedirIn,
    /// `>`
    RedirOut,
    /// `>>`
    RedirAppend,
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped
    Normal,
    /// Building an unquoted word — whitespace ends it
    InWord,
    /// Inside double quotes — whitespace is preserved
    InDoubleQuote,
    /// Inside single quotes — everything is literal
    InSingleQuote,
}

/// Tokenize one pipeline segment into tagged tokens.
///
/// Unquoted `<`, `>`, and `>>` become operator tokens in both attached
/// (`>file`) and detached (`> file`) form; inside quotes they are ordinary
/// word text. Quote removal happens here — expansion has already run.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut current = String::new();
    // Set once a quote opens so that `""` produces an (empty) word.
    let mut word_started = false;
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    let flush = |tokens: &mut Vec<Token>, current: &mut String, started: &mut bool| {
        if *started || !current.is_empty() {
            tokens.push(Token::Word(std::mem::take(current)));
            *started = false;
        }
    };

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            // ── Normal / InWord: operators and separators ──
            (State::Normal | State::InWord, ' ' | '\t') => {
                flush(&mut tokens, &mut current, &mut word_started);
                state = State::Normal;
            }
            (State::Normal | State::InWord, '<') => {
                flush(&mut tokens, &mut current, &mut word_started);
                tokens.push(Token::RedirIn);
                state = State::Normal;
            }
            (State::Normal | State::InWord, '>') => {
                flush(&mut tokens, &mut current, &mut word_started);
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::RedirAppend);
                } else {
                    tokens.push(Token::RedirOut);
                }
                state = State::Normal;
            }
            (State::Normal | State::InWord, '"') => {
                word_started = true;
                state = State::InDoubleQuote;
            }
            (State::Normal | State::InWord, '\'') => {
                word_started = true;
                state = State::InSingleQuote;
            }
            (State::Normal | State::InWord, '\\') => {
                // Escape: take the next character literally
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                word_started = true;
                state = State::InWord;
            }
            (State::Normal | State::InWord, c) => {
                current.push(c);
                word_started = true;
                state = State::InWord;
            }

            // ── InDoubleQuote: backslash escapes the next character ──
            (State::InDoubleQuote, '"') => {
                state = State::InWord;
            }
            (State::InDoubleQuote, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                } else {
                    current.push('\\');
                }
            }
            (State::InDoubleQuote, c) => {
                current.push(c);
            }

            // ── InSingleQuote: everything is literal ──
            (State::InSingleQuote, '\'') => {
                state = State::InWord;
            }
            (State::InSingleQuote, c) => {
                current.push(c);
            }
        }
    }

    // An unterminated quote falls out here with its text intact (lenient).
    flush(&mut tokens, &mut current, &mut word_started);

    tokens
}

// ── Redirection extraction ────────────────────────────────────────────────────

/// Turn a tokenized segment into a [`Segment`], pulling out redirections.
/// Last-wins when the same kind appears more than once.
fn parse_segment(part: &str) -> Result<Segment, ShellError> {
    let tokens = tokenize(part);

    let mut argv = Vec::new();
    let mut infile = None;
    let mut outfile = None;
    let mut append = false;

    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        let op = match token {
            Token::Word(w) => {
                argv.push(w);
                continue;
            }
            Token::RedirIn => "<",
            Token::RedirOut => ">",
            Token::RedirAppend => ">>",
        };

        let target = match iter.next() {
            Some(Token::Word(w)) => w,
            _ => return Err(ShellError::MissingRedirectTarget(op)),
        };
        match op {
            "<" => infile = Some(target),
            ">" => {
                outfile = Some(target);
                append = false;
            }
            _ => {
                outfile = Some(target);
                append = true;
            }
        }
    }

    if argv.is_empty() {
        return Err(ShellError::MissingCommand);
    }

    Ok(Segment {
        argv,
        infile,
        outfile,
        append,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn simple_command() {
        let p = parse("echo hello world").unwrap();
        assert_eq!(p.segments.len(), 1);
        assert_eq!(p.segments[0].argv, vec!["echo", "hello", "world"]);
        assert!(!p.background);
    }

    #[test]
    fn double_quotes_preserve_spaces() {
        let p = parse(r#"echo "hello   world""#).unwrap();
        assert_eq!(p.segments[0].argv, vec!["echo", "hello   world"]);
    }

    #[test]
    fn single_quotes_preserve_spaces() {
        let p = parse("echo 'hello   world'").unwrap();
        assert_eq!(p.segments[0].argv, vec!["echo", "hello   world"]);
    }

    #[test]
    fn backslash_escapes_space() {
        let p = parse(r"echo hello\ world").unwrap();
        assert_eq!(p.segments[0].argv, vec!["echo", "hello world"]);
    }

    #[test]
    fn quotes_mid_word_join() {
        let tokens = tokenize(r#"he"llo wor"ld"#);
        assert_eq!(words(&tokens), vec!["hello world"]);
    }

    #[test]
    fn empty_quotes_make_empty_word() {
        let tokens = tokenize(r#"echo """#);
        assert_eq!(tokens, vec![
            Token::Word("echo".into()),
            Token::Word(String::new()),
        ]);
    }

    #[test]
    fn unterminated_quote_is_lenient() {
        let p = parse("echo 'unclosed till end").unwrap();
        assert_eq!(p.segments[0].argv, vec!["echo", "unclosed till end"]);
    }

    #[test]
    fn pipe_splits_segments() {
        let p = parse("ls -l | grep foo | wc").unwrap();
        assert_eq!(p.segments.len(), 3);
        assert_eq!(p.segments[0].argv, vec!["ls", "-l"]);
        assert_eq!(p.segments[1].argv, vec!["grep", "foo"]);
        assert_eq!(p.segments[2].argv, vec!["wc"]);
    }

    #[test]
    fn quoted_pipe_is_literal() {
        let p = parse(r#"echo "a | b" | cat"#).unwrap();
        assert_eq!(p.segments.len(), 2);
        assert_eq!(p.segments[0].argv, vec!["echo", "a | b"]);
    }

    #[test]
    fn empty_pipe_segment_is_error() {
        assert!(matches!(
            parse("ls ||"),
            Err(ShellError::EmptyPipelineSegment)
        ));
        assert!(matches!(
            parse("| cat"),
            Err(ShellError::EmptyPipelineSegment)
        ));
    }

    #[test]
    fn trailing_ampersand_sets_background() {
        let p = parse("sleep 30 &").unwrap();
        assert!(p.background);
        assert_eq!(p.segments[0].argv, vec!["sleep", "30"]);

        let p = parse("sleep 30&").unwrap();
        assert!(p.background);
        assert_eq!(p.segments[0].argv, vec!["sleep", "30"]);
    }

    #[test]
    fn quoted_ampersand_is_literal() {
        let p = parse(r#"echo "fish & chips""#).unwrap();
        assert!(!p.background);
        assert_eq!(p.segments[0].argv, vec!["echo", "fish & chips"]);

        let p = parse(r"echo done\&").unwrap();
        assert!(!p.background);
        assert_eq!(p.segments[0].argv, vec!["echo", "done&"]);
    }

    #[test]
    fn redirections_detached_form() {
        let p = parse("sort < in.txt > out.txt").unwrap();
        let seg = &p.segments[0];
        assert_eq!(seg.argv, vec!["sort"]);
        assert_eq!(seg.infile.as_deref(), Some("in.txt"));
        assert_eq!(seg.outfile.as_deref(), Some("out.txt"));
        assert!(!seg.append);
    }

    #[test]
    fn redirections_attached_form() {
        let p = parse("sort <in.txt >>out.txt").unwrap();
        let seg = &p.segments[0];
        assert_eq!(seg.argv, vec!["sort"]);
        assert_eq!(seg.infile.as_deref(), Some("in.txt"));
        assert_eq!(seg.outfile.as_deref(), Some("out.txt"));
        assert!(seg.append);
    }

    #[test]
    fn redirection_last_wins() {
        let p = parse("echo hi > a > b").unwrap();
        let seg = &p.segments[0];
        assert_eq!(seg.outfile.as_deref(), Some("b"));
        assert!(!seg.append);

        let p = parse("echo hi > a >> b").unwrap();
        let seg = &p.segments[0];
        assert_eq!(seg.outfile.as_deref(), Some("b"));
        assert!(seg.append);
    }

    #[test]
    fn quoted_operator_chars_are_words() {
        let p = parse(r#"echo ">" '<'"#).unwrap();
        assert_eq!(p.segments[0].argv, vec!["echo", ">", "<"]);
        assert!(p.segments[0].outfile.is_none());
        assert!(p.segments[0].infile.is_none());
    }

    #[test]
    fn missing_redirect_target_is_error() {
        assert!(matches!(
            parse("echo hi >"),
            Err(ShellError::MissingRedirectTarget(">"))
        ));
        assert!(matches!(
            parse("echo hi > > out"),
            Err(ShellError::MissingRedirectTarget(">"))
        ));
    }

    #[test]
    fn segment_of_only_redirections_is_error() {
        assert!(matches!(parse("> out.txt"), Err(ShellError::MissingCommand)));
    }

    #[test]
    fn redirections_allowed_mid_pipeline() {
        let p = parse("cat < in.txt | sort > out.txt").unwrap();
        assert_eq!(p.segments[0].infile.as_deref(), Some("in.txt"));
        assert_eq!(p.segments[1].outfile.as_deref(), Some("out.txt"));
    }

    #[test]
    fn reparse_of_rendered_segment_roundtrips() {
        let original = parse("sort -r < in.txt >> out.txt").unwrap();
        let seg = &original.segments[0];

        // Pretty-print the segment back into a line and parse it again.
        let mut rendered = seg.argv.join(" ");
        if let Some(infile) = &seg.infile {
            rendered.push_str(&format!(" < {infile}"));
        }
        if let Some(outfile) = &seg.outfile {
            let op = if seg.append { ">>" } else { ">" };
            rendered.push_str(&format!(" {op} {outfile}"));
        }

        let reparsed = parse(&rendered).unwrap();
        assert_eq!(reparsed.segments[0], *seg);
    }

    #[test]
    fn backslash_in_double_quotes_escapes_next() {
        let tokens = tokenize(r#""hello\"world""#);
        assert_eq!(words(&tokens), vec![r#"hello"world"#]);
        let tokens = tokenize(r#""hello\\world""#);
        assert_eq!(words(&tokens), vec![r"hello\world"]);
    }

    #[test]
    fn single_quotes_no_escaping() {
        let tokens = tokenize(r"'hello\nworld'");
        assert_eq!(words(&tokens), vec![r"hello\nworld"]);
    }
}
