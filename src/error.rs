use std::io;

use thiserror::Error;

/// Errors a single REPL iteration can produce.
///
/// None of these cross a command boundary: the REPL prints the message as
/// `msh: <message>`, abandons the line, and returns to the prompt.
#[derive(Debug, Error)]
pub enum ShellError {
    /// A `|` with nothing (or only whitespace) on one side.
    #[error("syntax error: empty command between pipes")]
    EmptyPipelineSegment,

    /// A redirection operator at the end of a segment, e.g. `echo hi >`.
    #[error("syntax error: expected filename after '{0}'")]
    MissingRedirectTarget(&'static str),

    /// A segment whose words were all consumed by redirections, e.g. `> out`.
    #[error("syntax error: missing command")]
    MissingCommand,

    /// The child-side exec could not find the program (exit 127 by
    /// convention).
    #[error("{0}: command not found")]
    CommandNotFound(String),

    /// A resource-level failure: pipe creation, file open, spawn.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ShellError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ShellError::Io {
            context: context.into(),
            source,
        }
    }
}
