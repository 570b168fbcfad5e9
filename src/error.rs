//! Diagnostics shared by every stage of the pipeline.
//!
//! Compilation is fail-fast: the first lexer or parser error that is
//! detected aborts the whole pipeline via `?`. `main` turns the returned
//! [`CompileError`]/[`RuntimeError`] into a single stderr line and the exit
//! code for its stage.

use std::fmt;

/// Which stage of the pipeline raised the error; determines the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Io,
    Lexer,
    Parser,
}

impl Stage {
    pub fn exit_code(self) -> i32 {
        match self {
            Stage::Io => 1,
            Stage::Lexer => 1,
            Stage::Parser => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    // --- io ---
    Io,

    // --- lexer ---
    UnterminatedComment,
    NumberTooLong,
    IdentifierTooLong,
    UnknownCharacter,
    ProgramIncomplete,

    // --- parser ---
    UnexpectedToken,
    DuplicateSymbol,
    UndefinedSymbol,
    NotAFunction,
    NotALabel,
    NotAnArray,
    TypeMismatch,
    InvalidArraySize,
    MissingStart,
    MissingEnd,
    UndefinedLabel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub stage: Stage,
    pub kind: ErrorKind,
    /// Name of the grammar production that detected the mismatch, e.g. `processAssignment`.
    pub production: &'static str,
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub fn lexer(kind: ErrorKind, production: &'static str, line: usize, message: impl Into<String>) -> Self {
        CompileError { stage: Stage::Lexer, kind, production, line, message: message.into() }
    }

    pub fn parser(kind: ErrorKind, production: &'static str, line: usize, message: impl Into<String>) -> Self {
        CompileError { stage: Stage::Parser, kind, production, line, message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        CompileError { stage: Stage::Io, kind: ErrorKind::Io, production: "io", line: 0, message: message.into() }
    }

    pub fn exit_code(&self) -> i32 {
        self.stage.exit_code()
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][#{}] {}", self.production, self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Traps raised while the VM executes a program. Always exit code 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub const EXIT_CODE: i32 = 3;

    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into() }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[vm] {}", self.message)
    }
}

impl std::error::Error for RuntimeError {}
