//! Main parser coordinator
//!
//! This module provides the [`Parser`] struct and core parsing infrastructure:
//! the parsing context, token helpers, and the main parse entry point.
//!
//! # Parser Architecture
//!
//! The Parser uses a recursive descent approach with the following organization:
//! - This module: Parser struct, helper methods, and coordination
//! - `declarations`: types, struct/function/variable declarations, initializers
//! - `statements`: statements (if, while, for, blocks, ...)
//! - `expressions`: expressions, one method per precedence level
//!
//! # Implementation
//!
//! Parser methods are split across multiple files using `impl Parser` blocks,
//! allowing each module to extend the Parser with related functionality while
//! maintaining access to the shared parser state. All state that lives for
//! the duration of a parse (token position, scopes, the function being
//! parsed) is held here rather than in globals.
//!
//! The parser is type-unaware for expressions: it records which variable or
//! function each name refers to, and leaves typing to the resolver.

use crate::error::CompileError;
use crate::parser::ast::*;
use crate::parser::lexer::{Lexer, Token, TokenKind};
use crate::parser::scope::ScopeManager;

/// Recursive descent parser for the C subset
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) position: usize,
    pub(crate) scopes: ScopeManager,
    pub(crate) program: Program,
    /// Locals of the function currently being parsed; `None` at file scope
    pub(crate) locals: Option<Vec<VarId>>,
    /// Number of enclosing loops, for `break`/`continue` checks
    pub(crate) loop_depth: usize,
    pub(crate) next_struct_id: usize,
    pub(crate) string_count: usize,
}

impl Parser {
    /// Tokenize `source` and create a parser over the tokens
    pub fn new(source: &str) -> Result<Self, CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self::from_tokens(tokens))
    }

    /// Create a parser over an already tokenized stream
    pub fn from_tokens(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let location = tokens.last().map(|t| t.location).unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                location,
            });
        }

        Self {
            tokens,
            position: 0,
            scopes: ScopeManager::new(),
            program: Program::new(),
            locals: None,
            loop_depth: 0,
            next_struct_id: 0,
            string_count: 0,
        }
    }

    /// Parse the entire program (top-level declarations)
    pub fn parse_program(&mut self) -> Result<Program, CompileError> {
        while !self.is_at_end() {
            self.parse_top_level_declaration()?;
        }

        let program = std::mem::take(&mut self.program);
        tracing::debug!(
            functions = program.functions.len(),
            globals = program.globals.len(),
            "parsed program"
        );
        Ok(program)
    }

    // ===== Symbol helpers =====

    /// Declare a local of the current function in the innermost scope
    pub(crate) fn declare_local(
        &mut self,
        name: &str,
        ty: TypeRef,
        location: SourceLocation,
    ) -> Result<VarId, CompileError> {
        let id = self.program.add_var(Var {
            name: name.to_string(),
            ty,
            storage: Storage::Local,
        });

        if !self.scopes.declare_var(name, id) {
            return Err(CompileError::declaration(
                format!("redeclaration of '{}'", name),
                location,
            ));
        }

        match self.locals.as_mut() {
            Some(locals) => locals.push(id),
            None => {
                return Err(CompileError::declaration(
                    format!("local '{}' declared outside of a function", name),
                    location,
                ))
            }
        }
        Ok(id)
    }

    /// Create the anonymous global backing a string literal
    pub(crate) fn string_literal_var(&mut self, mut bytes: Vec<u8>) -> VarId {
        bytes.push(0);
        let name = format!(".L..str.{}", self.string_count);
        self.string_count += 1;

        let ty = Type::array_of(&Type::char(), Some(bytes.len()));
        let id = self.program.add_var(Var {
            name,
            ty,
            storage: Storage::Global { init: Some(bytes) },
        });
        self.program.globals.push(id);
        id
    }

    pub(crate) fn next_struct_id(&mut self) -> usize {
        self.next_struct_id += 1;
        self.next_struct_id
    }

    // ===== Token helpers =====

    pub(crate) fn is_type_keyword(&self) -> bool {
        self.is_type_keyword_ahead(0)
    }

    /// Whether the token `n` positions ahead starts a type name
    pub(crate) fn is_type_keyword_ahead(&self, n: usize) -> bool {
        ["int", "char", "short", "long", "void", "struct"]
            .iter()
            .any(|kw| self.check_ahead(n, kw))
    }

    /// Whether the current token is the reserved word or punctuator `text`
    pub(crate) fn check(&self, text: &str) -> bool {
        self.peek().is(text)
    }

    pub(crate) fn check_ahead(&self, n: usize, text: &str) -> bool {
        self.peek_ahead(n).is_some_and(|t| t.is(text))
    }

    pub(crate) fn match_token(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.position += 1;
        }
        self.previous()
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.position]
    }

    pub(crate) fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position + n)
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.position.saturating_sub(1)]
    }

    pub(crate) fn previous_location(&self) -> SourceLocation {
        self.previous().location
    }

    pub(crate) fn current_location(&self) -> SourceLocation {
        self.peek().location
    }

    pub(crate) fn error_here(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.current_location())
    }

    pub(crate) fn expect(&mut self, text: &str, ctx: &str) -> Result<(), CompileError> {
        if self.match_token(text) {
            Ok(())
        } else {
            Err(self.error_here(format!(
                "Expected '{}' {}, found {}",
                text,
                ctx,
                self.peek()
            )))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> Result<(String, SourceLocation), CompileError> {
        let token = self.peek();
        if token.kind == TokenKind::Ident {
            let result = (token.text.clone(), token.location);
            self.advance();
            Ok(result)
        } else {
            Err(self.error_here(format!("Expected identifier, found {}", token)))
        }
    }

    pub(crate) fn expect_number(&mut self) -> Result<i64, CompileError> {
        if let TokenKind::Num(n) = self.peek().kind {
            self.advance();
            Ok(n)
        } else {
            Err(self.error_here(format!("Expected a number, found {}", self.peek())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Program, CompileError> {
        Parser::new(source)?.parse_program()
    }

    fn main_body(program: &Program) -> &[Node] {
        match &program.function("main").unwrap().body {
            Some(Node {
                kind: NodeKind::Block(items),
                ..
            }) => items,
            other => panic!("Expected block body, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_function() {
        let program = parse("int main() { return 0; }").unwrap();

        assert_eq!(program.functions.len(), 1);
        let main = program.function("main").unwrap();
        assert_eq!(main.params.len(), 0);
        assert_eq!(*main.return_ty, *Type::int());
        assert_eq!(main_body(&program).len(), 1);
    }

    #[test]
    fn test_parse_expression_precedence() {
        let program = parse("int main() { return 1 + 2 * 3; }").unwrap();

        let NodeKind::Return(Some(expr)) = &main_body(&program)[0].kind else {
            panic!("Expected return");
        };
        let NodeKind::Binary { op: BinOp::Add, rhs, .. } = &expr.kind else {
            panic!("Expected addition at the root");
        };
        assert!(matches!(rhs.kind, NodeKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_binary_operators_are_left_associative() {
        let program = parse("int main() { return 10 - 4 - 3; }").unwrap();

        let NodeKind::Return(Some(expr)) = &main_body(&program)[0].kind else {
            panic!("Expected return");
        };
        let NodeKind::Binary { lhs, rhs, .. } = &expr.kind else {
            panic!("Expected subtraction");
        };
        assert!(matches!(lhs.kind, NodeKind::Binary { op: BinOp::Sub, .. }));
        assert!(matches!(rhs.kind, NodeKind::Num(3)));
    }

    #[test]
    fn test_parse_if_statement_defaults_else() {
        let program = parse("int main() { int x; if (x > 0) return 1; return 0; }").unwrap();

        let NodeKind::If { els, .. } = &main_body(&program)[1].kind else {
            panic!("Expected if statement");
        };
        assert!(matches!(els.kind, NodeKind::Empty));
    }

    #[test]
    fn test_parse_struct() {
        let program =
            parse("struct Point { int x; int y; }; int main() { struct Point p; return 0; }")
                .unwrap();

        let main = program.function("main").unwrap();
        let p = program.var(main.locals[0]);
        assert!(p.ty.is_struct());
        assert_eq!(p.ty.size, 8);
        assert_eq!(p.ty.member("y").unwrap().offset, 4);
    }

    #[test]
    fn test_undeclared_variable_is_rejected() {
        let err = parse("int main() { return y; }").unwrap_err();
        assert!(matches!(err, CompileError::Declaration { .. }));
        assert!(err.message().contains("'y'"));
    }

    #[test]
    fn test_missing_semicolon_is_a_syntax_error() {
        let err = parse("int main() { return 0 }").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }
}
