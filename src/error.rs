//! Compile error types
//!
//! This module defines [`CompileError`], the single error type of the
//! pipeline. Every variant is fatal: the first one raised stops compilation
//! and nothing is emitted.

use crate::parser::ast::SourceLocation;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Unrecognised character, bad literal, or rejected directive line
    #[error("Lexer error at {location}: {message}")]
    Lex {
        message: String,
        location: SourceLocation,
    },

    /// Expected-token mismatch
    #[error("Syntax error at {location}: {message}")]
    Syntax {
        message: String,
        location: SourceLocation,
    },

    /// Redeclaration, redefinition, undeclared name, or invalid declared type
    #[error("Declaration error at {location}: {message}")]
    Declaration {
        message: String,
        location: SourceLocation,
    },

    /// Operand, lvalue, member or sizeof violation found by the type resolver
    #[error("Type error at {location}: {message}")]
    Type {
        message: String,
        location: SourceLocation,
    },

    /// Internal invariant broken while emitting assembly
    #[error("Code generation error: {message}")]
    Codegen { message: String },
}

impl CompileError {
    pub fn lex(message: impl Into<String>, location: SourceLocation) -> Self {
        CompileError::Lex {
            message: message.into(),
            location,
        }
    }

    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        CompileError::Syntax {
            message: message.into(),
            location,
        }
    }

    pub fn declaration(message: impl Into<String>, location: SourceLocation) -> Self {
        CompileError::Declaration {
            message: message.into(),
            location,
        }
    }

    pub fn type_error(message: impl Into<String>, location: SourceLocation) -> Self {
        CompileError::Type {
            message: message.into(),
            location,
        }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        CompileError::Codegen {
            message: message.into(),
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            CompileError::Lex { location, .. }
            | CompileError::Syntax { location, .. }
            | CompileError::Declaration { location, .. }
            | CompileError::Type { location, .. } => Some(location),
            CompileError::Codegen { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Lex { message, .. }
            | CompileError::Syntax { message, .. }
            | CompileError::Declaration { message, .. }
            | CompileError::Type { message, .. }
            | CompileError::Codegen { message } => message,
        }
    }

    /// Format the diagnostic with the offending source line and a caret
    /// under the error column.
    pub fn render(&self, source: &str) -> String {
        let Some(location) = self.location() else {
            return format!("error: {}", self);
        };

        let line_text = source.lines().nth(location.line.saturating_sub(1)).unwrap_or("");
        let gutter = location.line.to_string();
        let padding = " ".repeat(gutter.len());
        let caret_indent = " ".repeat(location.column.saturating_sub(1));

        format!(
            "error: {}\n{} |\n{} | {}\n{} | {}^ {}",
            self,
            padding,
            gutter,
            line_text,
            padding,
            caret_indent,
            self.message()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_points_at_column() {
        let source = "int main() {\n  return x;\n}\n";
        let err = CompileError::declaration("undeclared variable 'x'", SourceLocation::new(2, 10, 22));
        let rendered = err.render(source);

        assert!(rendered.starts_with("error: Declaration error at line 2, column 10"));
        assert!(rendered.contains("2 |   return x;"));
        assert!(rendered.ends_with("  |          ^ undeclared variable 'x'"));
    }

    #[test]
    fn test_codegen_error_has_no_location() {
        let err = CompileError::codegen("stack imbalance");
        assert!(err.location().is_none());
        assert_eq!(err.render(""), "error: Code generation error: stack imbalance");
    }
}
