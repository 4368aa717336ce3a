use thiserror::Error;

use crate::Value;

/// Exit status used when the VM cannot continue.
pub const FATAL_EXIT_CODE: i32 = 70;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("unable to fulfill allocation request of {requested} words")]
    Exhausted { requested: usize },
    #[error("invalid heap settings: {0}")]
    InvalidSettings(&'static str),
}

/// Recoverable error conditions, raised as exceptions inside the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    BadArity,
    MissingArgument,
    IntegerExpected,
    StringExpected,
    VectorExpected,
    StackFrameExpected,
    NoMethod,
}

impl ExceptionKind {
    pub const COUNT: usize = 7;

    pub const ALL: [ExceptionKind; Self::COUNT] = [
        ExceptionKind::BadArity,
        ExceptionKind::MissingArgument,
        ExceptionKind::IntegerExpected,
        ExceptionKind::StringExpected,
        ExceptionKind::VectorExpected,
        ExceptionKind::StackFrameExpected,
        ExceptionKind::NoMethod,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::BadArity => "badArity",
            ExceptionKind::MissingArgument => "missingArgument",
            ExceptionKind::IntegerExpected => "integerExpected",
            ExceptionKind::StringExpected => "stringExpected",
            ExceptionKind::VectorExpected => "vectorExpected",
            ExceptionKind::StackFrameExpected => "stackFrameExpected",
            ExceptionKind::NoMethod => "noMethod",
        }
    }
}

/// An exception object travelling out of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception(pub Value);

/// Prints a diagnostic and terminates the process.
///
/// Used for allocation exhaustion and for states where no consistent
/// continuation can be guaranteed.
pub fn fatal(message: &str) -> ! {
    log::error!("fatal: {message}");
    eprintln!("herald: fatal: {message}");
    std::process::exit(FATAL_EXIT_CODE)
}
