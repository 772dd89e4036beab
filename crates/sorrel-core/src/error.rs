use std::error::Error as StdError;

use thiserror::Error;

pub const ERROR_TAG: &str = "\x1b[31m[ERROR]\x1b[0m";

/// Error taxonomy shared by the reader, the compiler and the VM.
///
/// `Compile` and `Execution` errors may wrap the error that caused them so
/// the REPL can print the whole chain.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("read error at {line}:{col}: {message}")]
    Read {
        message: String,
        line: usize,
        col: usize,
    },

    #[error("compile error: {message}")]
    Compile {
        message: String,
        #[source]
        cause: Option<Box<Error>>,
    },

    #[error("type error: {message}")]
    Type { message: String },

    #[error("execution error: {message}")]
    Execution {
        message: String,
        #[source]
        cause: Option<Box<Error>>,
    },

    #[error("{message}")]
    Native { message: String },
}

impl Error {
    pub fn read(message: impl Into<String>, line: usize, col: usize) -> Self {
        Error::Read {
            message: message.into(),
            line,
            col,
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Error::Compile {
            message: message.into(),
            cause: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Error::Type {
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::Type {
            message: format!("expected {}, got {}", expected.into(), actual.into()),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution {
            message: message.into(),
            cause: None,
        }
    }

    pub fn native(message: impl Into<String>) -> Self {
        Error::Native {
            message: message.into(),
        }
    }

    /// Attach `cause` to a `Compile` or `Execution` error. Other kinds keep
    /// their message and drop the cause.
    pub fn wrap(mut self, inner: Error) -> Self {
        match &mut self {
            Error::Compile { cause, .. } | Error::Execution { cause, .. } => {
                *cause = Some(Box::new(inner));
            }
            _ => {}
        }
        self
    }

    pub fn cause(&self) -> Option<&Error> {
        match self {
            Error::Compile { cause, .. } | Error::Execution { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}

/// Render an error and its cause chain, one line per link.
pub fn format_error(err: &Error) -> Vec<String> {
    let mut lines = vec![format!("{} {}", ERROR_TAG, err)];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("  caused by: {}", cause));
        source = cause.source();
    }
    lines
}
