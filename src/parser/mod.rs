//! C source code parser
//!
//! This module transforms C source text into an Abstract Syntax Tree (AST):
//! - [`lexer`]: Tokenization (source text → tokens)
//! - [`parse`]: Parsing (tokens → AST), extended by `declarations`,
//!   `statements` and `expressions`
//! - [`scope`]: Block scopes for variables and struct tags
//! - [`ast`]: AST node and type definitions
//!
//! # Supported C Subset
//!
//! - Types: `char`, `short`, `int`, `long`, `void`, structs, pointers, arrays
//! - Statements: declarations, control flow (`if`, `while`, `for`), `return`,
//!   `break`, `continue`, statement expressions
//! - Expressions: arithmetic, comparison, logical, ternary, function calls
//! - No preprocessor: only empty `#` lines are accepted
//! - No typedefs, unions, enums, casts, or function pointers
//!
//! # Parser Implementation
//!
//! Hand-written recursive descent parser, one method per precedence level.
//! No external parser generator dependencies.

pub mod ast;
mod declarations;
mod expressions;
pub mod lexer;
pub mod parse;
pub mod scope;
mod statements;

pub use parse::Parser;
