//! # fjp
//!
//! A single-pass compiler and stack virtual machine for a small PL/0-style
//! teaching language.
//!
//! ## Pipeline
//!
//! Unlike a textbook multi-pass compiler, grammar checking and code
//! generation happen in the same traversal — there is no separate AST stage.
//! A program moves through three stages:
//!
//! 1. **Lexer** ([`lexer`]) — tokenizes source text.
//! 2. **Parser** ([`parser`]) — a recursive-descent parser that walks the
//!    token stream once, maintaining a [`symbol_table`] of lexical scopes,
//!    and emits [`instruction`]s directly as it recognizes each production.
//!    Forward references (structural jumps, `goto`/label pairs) are
//!    recorded and backpatched once their target address is known.
//! 3. **VM** ([`vm`]) — executes the emitted instructions against a
//!    1024-slot integer stack using static-link activation records.
//!
//! ## Example
//!
//! ```rust,no_run
//! use fjp::{lexer::tokenize, parser::Parser, vm::Vm};
//!
//! let source = std::fs::read_to_string("program.pl0").unwrap();
//! let tokens = tokenize(&source).unwrap();
//! let program = Parser::new(&tokens).parse().unwrap();
//! let mut vm = Vm::new(&program.code);
//! vm.execute().unwrap();
//! ```

pub mod error;
pub mod instruction;
pub mod lexer;
pub mod parser;
pub mod symbol_table;
pub mod vm;
