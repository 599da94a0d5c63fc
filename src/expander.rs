use std::process::{Command, Stdio};

use crate::status;

/// Expand a raw line in a single left-to-right pass.
///
/// Quote and escape characters are copied through untouched; quote removal
/// belongs to the tokenizer. This pass only decides where substitution
/// happens: nowhere inside `'…'`, variables and command substitution inside
/// `"…"`, everything outside. The result never carries word-splitting or
/// globbing; a failed substitution expands to the empty string.
pub fn expand(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut quote = Quote::None;

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            // ── Quote transitions: the quote chars themselves pass through ──
            (Quote::None, '\'') => {
                quote = Quote::Single;
                out.push(ch);
            }
            (Quote::Single, '\'') => {
                quote = Quote::None;
                out.push(ch);
            }
            (Quote::None, '"') => {
                quote = Quote::Double;
                out.push(ch);
            }
            (Quote::Double, '"') => {
                quote = Quote::None;
                out.push(ch);
            }

            // ── Single quotes: everything literal, unmatched runs to EOL ──
            (Quote::Single, c) => out.push(c),

            // ── Backslash: escape the next character (no substitution) ──
            (Quote::None | Quote::Double, '\\') => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }

            // ── Substitution points ──
            (Quote::None | Quote::Double, '$') => expand_dollar(&mut chars, &mut out),
            (Quote::None | Quote::Double, '`') => expand_backticks(&mut chars, &mut out),

            (Quote::None | Quote::Double, c) => out.push(c),
        }
    }

    out
}

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Handle the text following a `$`: `$NAME`, `${NAME}`, or `$(command)`.
/// Anything else leaves the `$` literal.
fn expand_dollar(chars: &mut std::iter::Peekable<std::str::Chars>, out: &mut String) {
    match chars.peek() {
        // ── $(command): balanced-paren command substitution ──
        Some(&'(') => {
            chars.next();
            match take_balanced_parens(chars) {
                Ok(body) => out.push_str(&run_substitution(&body)),
                Err(tail) => {
                    // Unclosed `$(` — keep everything literal.
                    out.push_str("$(");
                    out.push_str(&tail);
                }
            }
        }

        // ── ${NAME} ──
        Some(&'{') => {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                out.push_str("${");
                out.push_str(&name);
            } else if name.is_empty() {
                out.push_str("${}");
            } else {
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
        }

        // ── $NAME ──
        Some(&c) if is_name_start(c) => {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if is_name_char(c) {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }

        // ── Lone $ (end of line or invalid name start): literal ──
        _ => out.push('$'),
    }
}

/// Consume up to and including the `)` matching an already-consumed `(`.
/// Returns the body, or the consumed text as `Err` when the line ends
/// before the parentheses balance.
fn take_balanced_parens(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, String> {
    let mut body = String::new();
    let mut depth = 1usize;
    for c in chars.by_ref() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(body);
                }
            }
            _ => {}
        }
        body.push(c);
    }
    Err(body)
}

/// `` `command` `` — identical semantics to `$(command)`, no nesting.
fn expand_backticks(chars: &mut std::iter::Peekable<std::str::Chars>, out: &mut String) {
    let mut body = String::new();
    let mut closed = false;
    for c in chars.by_ref() {
        if c == '`' {
            closed = true;
            break;
        }
        body.push(c);
    }
    if closed {
        out.push_str(&run_substitution(&body));
    } else {
        // Unmatched backtick: keep everything literal.
        out.push('`');
        out.push_str(&body);
    }
}

/// Run a command substitution body through the subordinate interpreter,
/// capturing stdout. Stderr passes through to the terminal. Failures of any
/// kind expand to the empty string; the exit status is not propagated.
fn run_substitution(body: &str) -> String {
    let output = match Command::new("sh")
        .arg("-c")
        .arg(body)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            log::debug!("command substitution failed to run: {e}");
            return String::new();
        }
    };

    let code = status::exit_code(output.status);
    if code != 0 {
        log::debug!("command substitution exited with {code}");
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    while text.ends_with('\n') || text.ends_with('\r') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(expand("echo hello world"), "echo hello world");
    }

    #[test]
    fn single_quoted_text_is_identity() {
        assert_eq!(expand("'$HOME and $(echo hi)'"), "'$HOME and $(echo hi)'");
    }

    #[test]
    fn variable_expands_outside_quotes() {
        unsafe { std::env::set_var("MSH_TEST_A", "alpha") };
        assert_eq!(expand("echo $MSH_TEST_A"), "echo alpha");
        unsafe { std::env::remove_var("MSH_TEST_A") };
    }

    #[test]
    fn variable_expands_inside_double_quotes() {
        unsafe { std::env::set_var("MSH_TEST_B", "beta") };
        assert_eq!(expand(r#"echo "$MSH_TEST_B!""#), r#"echo "beta!""#);
        unsafe { std::env::remove_var("MSH_TEST_B") };
    }

    #[test]
    fn braced_variable_delimits_name() {
        unsafe { std::env::set_var("MSH_TEST_C", "sea") };
        assert_eq!(expand("echo ${MSH_TEST_C}shore"), "echo seashore");
        unsafe { std::env::remove_var("MSH_TEST_C") };
    }

    #[test]
    fn unset_variable_is_empty() {
        assert_eq!(expand("echo [$MSH_NOT_SET_XYZ]"), "echo []");
    }

    #[test]
    fn name_ends_at_non_name_char() {
        unsafe { std::env::set_var("MSH_TEST_D", "dir") };
        assert_eq!(expand("ls $MSH_TEST_D/sub"), "ls dir/sub");
        unsafe { std::env::remove_var("MSH_TEST_D") };
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand("price$"), "price$");
        assert_eq!(expand("a$ b"), "a$ b");
        assert_eq!(expand("$%"), "$%");
    }

    #[test]
    fn empty_braces_are_literal() {
        assert_eq!(expand("echo ${}"), "echo ${}");
    }

    #[test]
    fn backslash_blocks_expansion() {
        assert_eq!(expand(r"echo \$HOME"), r"echo \$HOME");
        assert_eq!(expand(r#"echo "\$HOME""#), r#"echo "\$HOME""#);
    }

    #[test]
    fn mixed_quoting_contexts() {
        unsafe { std::env::set_var("MSH_TEST_X", "foo") };
        assert_eq!(
            expand(r#"echo $MSH_TEST_X${MSH_TEST_X}"$MSH_TEST_X"'$MSH_TEST_X'"#),
            r#"echo foofoo"foo"'$MSH_TEST_X'"#
        );
        unsafe { std::env::remove_var("MSH_TEST_X") };
    }

    #[test]
    fn command_substitution_inlines_stdout() {
        assert_eq!(expand("echo $(echo nested)"), "echo nested");
    }

    #[test]
    fn command_substitution_strips_trailing_newlines() {
        assert_eq!(expand("$(printf 'hi\n\n')"), "hi");
    }

    #[test]
    fn command_substitution_keeps_inner_newlines() {
        assert_eq!(expand("$(printf 'a\nb\n')"), "a\nb");
    }

    #[test]
    fn command_substitution_with_balanced_parens() {
        assert_eq!(expand(r#"$(echo "(wrapped)")"#), "(wrapped)");
    }

    #[test]
    fn failed_substitution_is_empty() {
        assert_eq!(expand("echo [$(false)]"), "echo []");
    }

    #[test]
    fn backtick_substitution() {
        assert_eq!(expand("echo `echo ticked`"), "echo ticked");
    }

    #[test]
    fn backtick_inside_double_quotes() {
        assert_eq!(expand(r#"echo "`echo in`""#), r#"echo "in""#);
    }

    #[test]
    fn unmatched_backtick_is_literal() {
        assert_eq!(expand("echo `oops"), "echo `oops");
    }

    #[test]
    fn unclosed_command_substitution_is_literal() {
        assert_eq!(expand("echo $(oops"), "echo $(oops");
    }

    #[test]
    fn substitution_inside_double_quotes() {
        assert_eq!(expand(r#"echo "$(printf 'spaced  out')""#), r#"echo "spaced  out""#);
    }
}
