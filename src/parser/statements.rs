//! Statement parsing implementation
//!
//! This module handles parsing of all statement types:
//!
//! - Local declarations: `int x = 42;` (desugared to assignments)
//! - Control flow: `if`, `while`, `for`
//! - Jump statements: `return`, `break`, `continue`
//! - Compound statements: `{ ... }`
//! - Expression statements and the empty statement `;`
//!
//! # Grammar
//!
//! ```text
//! statement ::= if_stmt | while_stmt | for_stmt | return_stmt
//!             | break_stmt | continue_stmt | block | ";" | expr ";"
//! block     ::= "{" (declaration | statement)* "}"
//! ```
//!
//! All parsing methods are implemented as `pub(crate)` methods on the [`Parser`] struct.

use crate::error::CompileError;
use crate::parser::ast::*;
use crate::parser::parse::Parser;

impl Parser {
    /// Parse block items up to and including the closing `}`, in the current scope
    pub(crate) fn parse_compound_items(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut items = Vec::new();

        while !self.match_token("}") {
            if self.is_at_end() {
                return Err(self.error_here("Expected '}' before end of file"));
            }
            if self.is_type_keyword() {
                items.push(self.parse_local_declaration()?);
            } else {
                items.push(self.parse_statement()?);
            }
        }

        Ok(items)
    }

    /// Parse a statement
    pub(crate) fn parse_statement(&mut self) -> Result<Node, CompileError> {
        let loc = self.current_location();

        if self.match_token("return") {
            return self.parse_return_statement();
        }

        if self.match_token("if") {
            return self.parse_if_statement();
        }

        if self.match_token("while") {
            return self.parse_while_statement();
        }

        if self.match_token("for") {
            return self.parse_for_statement();
        }

        if self.match_token("break") {
            if self.loop_depth == 0 {
                return Err(CompileError::syntax("'break' outside of a loop", loc));
            }
            self.expect(";", "after 'break'")?;
            return Ok(Node::new(NodeKind::Break, loc));
        }

        if self.match_token("continue") {
            if self.loop_depth == 0 {
                return Err(CompileError::syntax("'continue' outside of a loop", loc));
            }
            self.expect(";", "after 'continue'")?;
            return Ok(Node::new(NodeKind::Continue, loc));
        }

        if self.match_token("{") {
            self.scopes.enter_scope();
            let items = self.parse_compound_items();
            self.scopes.leave_scope();
            return Ok(Node::new(NodeKind::Block(items?), loc));
        }

        if self.match_token(";") {
            return Ok(Node::new(NodeKind::Empty, loc));
        }

        // Otherwise, it's an expression statement
        let expr = self.parse_expression()?;
        self.expect(";", "after expression")?;
        Ok(Node::expr_stmt(expr))
    }

    /// Parse return statement
    fn parse_return_statement(&mut self) -> Result<Node, CompileError> {
        let loc = self.previous_location();

        let expr = if self.check(";") {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        self.expect(";", "after return")?;
        Ok(Node::new(NodeKind::Return(expr), loc))
    }

    /// Parse if statement; a missing `else` becomes an empty statement
    fn parse_if_statement(&mut self) -> Result<Node, CompileError> {
        let loc = self.previous_location();

        self.expect("(", "after 'if'")?;
        let cond = Box::new(self.parse_expression()?);
        self.expect(")", "after if condition")?;

        let then = Box::new(self.parse_statement()?);
        let els = if self.match_token("else") {
            self.parse_statement()?
        } else {
            Node::new(NodeKind::Empty, self.previous_location())
        };

        Ok(Node::new(
            NodeKind::If {
                cond,
                then,
                els: Box::new(els),
            },
            loc,
        ))
    }

    /// Parse while statement
    fn parse_while_statement(&mut self) -> Result<Node, CompileError> {
        let loc = self.previous_location();

        self.expect("(", "after 'while'")?;
        let cond = Box::new(self.parse_expression()?);
        self.expect(")", "after while condition")?;

        let body = Box::new(self.parse_loop_body()?);
        Ok(Node::new(NodeKind::While { cond, body }, loc))
    }

    /// Parse for statement. The header opens its own scope, so a variable
    /// declared in the init clause is visible only inside the loop.
    fn parse_for_statement(&mut self) -> Result<Node, CompileError> {
        let loc = self.previous_location();

        self.scopes.enter_scope();
        let result = self.parse_for_rest(loc);
        self.scopes.leave_scope();
        result
    }

    fn parse_for_rest(&mut self, loc: SourceLocation) -> Result<Node, CompileError> {
        self.expect("(", "after 'for'")?;

        // Init (optional)
        let init = if self.match_token(";") {
            None
        } else if self.is_type_keyword() {
            // Declaration includes semicolon, so don't expect another
            Some(Box::new(self.parse_local_declaration()?))
        } else {
            let expr = self.parse_expression()?;
            self.expect(";", "after for init")?;
            Some(Box::new(Node::expr_stmt(expr)))
        };

        // Condition (optional, defaults to always true)
        let cond = if self.check(";") {
            Node::num(1, self.current_location())
        } else {
            self.parse_expression()?
        };
        self.expect(";", "after for condition")?;

        // Update (optional)
        let update = if self.check(")") {
            None
        } else {
            Some(Box::new(Node::expr_stmt(self.parse_expression()?)))
        };
        self.expect(")", "after for clauses")?;

        let body = Box::new(self.parse_loop_body()?);
        Ok(Node::new(
            NodeKind::For {
                init,
                cond: Box::new(cond),
                update,
                body,
            },
            loc,
        ))
    }

    fn parse_loop_body(&mut self) -> Result<Node, CompileError> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        body
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CompileError;
    use crate::parser::ast::*;
    use crate::parser::parse::Parser;

    fn parse_main(body: &str) -> Result<Vec<Node>, CompileError> {
        let source = format!("int main() {{ {} }}", body);
        let mut program = Parser::new(&source)?.parse_program()?;
        let main = program.functions.remove(0);
        match main.body {
            Some(Node {
                kind: NodeKind::Block(items),
                ..
            }) => Ok(items),
            other => panic!("Expected block body, got {:?}", other),
        }
    }

    #[test]
    fn test_for_with_empty_clauses() {
        let items = parse_main("for (;;) break; return 0;").unwrap();
        let NodeKind::For {
            init, cond, update, ..
        } = &items[0].kind
        else {
            panic!("Expected for statement");
        };
        assert!(init.is_none());
        assert!(update.is_none());
        assert!(matches!(cond.kind, NodeKind::Num(1)));
    }

    #[test]
    fn test_for_declaration_is_scoped_to_loop() {
        assert!(parse_main("int s = 0; for (int i = 0; i < 3; i = i + 1) s = s + i; return s;").is_ok());

        let err = parse_main("for (int i = 0; i < 3; i = i + 1) ; return i;").unwrap_err();
        assert!(err.message().contains("undeclared variable 'i'"));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let err = parse_main("break; return 0;").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));

        let err = parse_main("while (1) {} continue; return 0;").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn test_block_scope_shadows() {
        let items = parse_main("int x = 1; { int x = 2; } return x;").unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[1].kind, NodeKind::Block(_)));
    }

    #[test]
    fn test_empty_statement_and_bare_return() {
        let items = parse_main("; return;").unwrap();
        assert!(matches!(items[0].kind, NodeKind::Empty));
        assert!(matches!(items[1].kind, NodeKind::Return(None)));
    }
}
