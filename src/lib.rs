//! # Introduction
//!
//! crustcc compiles a small subset of C into x86-64 assembly (AT&T syntax,
//! System V calling convention). The output is meant to be assembled and
//! linked by a system toolchain such as `cc`.
//!
//! ## Compilation pipeline
//!
//! ```text
//! Source → Lexer → Parser → AST → Resolver → typed AST → Codegen → assembly
//! ```
//!
//! 1. [`parser`] tokenises the source, tracks scopes, and builds an untyped
//!    AST in which every name already points at its declaration.
//! 2. [`resolver`] types every expression and rewrites the tree: arrays
//!    decay, `sizeof` folds, pointer arithmetic is scaled.
//! 3. [`codegen`] lays out stack frames and prints the assembly.
//!
//! Each stage completes before the next begins, and the first error stops
//! the run; see [`error::CompileError`].
//!
//! ## Supported C subset
//!
//! Types: `char`, `short`, `int`, `long`, `void`, structs, pointers, arrays.
//! Control flow: `if/else`, `while`, `for`, `break`, `continue`, `return`.
//! Also: statement expressions `({ ... })`, string literals, global
//! initializers, and calls to external functions with up to six arguments.

pub mod codegen;
pub mod error;
pub mod parser;
pub mod resolver;

use error::CompileError;
use parser::ast::Program;
use parser::Parser;

/// Parse and type-resolve `source` without generating code
pub fn analyze(source: &str) -> Result<Program, CompileError> {
    let program = Parser::new(source)?.parse_program()?;
    resolver::resolve_program(program)
}

/// Compile C `source` into x86-64 assembly text
pub fn compile(source: &str) -> Result<String, CompileError> {
    let program = analyze(source)?;
    codegen::generate(&program)
}
