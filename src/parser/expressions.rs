//! Expression parsing implementation
//!
//! This module handles parsing of expressions using one method per
//! precedence level, each folding its operators left to right.
//!
//! # Supported Expressions
//!
//! - Literals: integers, characters, strings
//! - Variables and calls to already declared functions
//! - Binary operators: arithmetic, comparison, logical
//! - Unary operators: `+`, `-`, `!`, `&`, `*`, `++`, `--`, `sizeof`
//! - Postfix: `[]`, `.`, `->`, `++`, `--`
//! - Ternary: `? :`
//! - Statement expressions: `({ ... })`
//!
//! # Desugaring
//!
//! Several forms are rewritten on the spot so later stages see fewer node
//! kinds: `a[i]` becomes `*(a + i)`, `p->m` becomes `(*p).m`, `-x` becomes
//! `0 - x`, `x += y` becomes `x = x + y`, `++x` becomes `x = x + 1` and
//! `x++` becomes `(x = x + 1) - 1`. The duplicated operand is only accepted
//! when evaluating it twice cannot be observed.
//!
//! All parsing methods are implemented as `pub(crate)` methods on the [`Parser`] struct.

use crate::error::CompileError;
use crate::parser::ast::*;
use crate::parser::lexer::TokenKind;
use crate::parser::parse::Parser;

impl Parser {
    /// Parse expression (top-level entry point)
    pub(crate) fn parse_expression(&mut self) -> Result<Node, CompileError> {
        self.parse_assignment()
    }

    /// Parse assignment or ternary (right-associative)
    pub(crate) fn parse_assignment(&mut self) -> Result<Node, CompileError> {
        let expr = self.parse_ternary()?;

        let loc = self.current_location();
        if self.match_token("=") {
            let rhs = self.parse_assignment()?;
            return Ok(Node::assign(expr, rhs, loc));
        }

        // Compound assignments
        let compound_op = if self.match_token("+=") {
            Some(BinOp::Add)
        } else if self.match_token("-=") {
            Some(BinOp::Sub)
        } else if self.match_token("*=") {
            Some(BinOp::Mul)
        } else if self.match_token("/=") {
            Some(BinOp::Div)
        } else {
            None
        };

        if let Some(op) = compound_op {
            let rhs = self.parse_assignment()?;
            return read_modify_write(expr, op, rhs, loc);
        }

        Ok(expr)
    }

    /// Parse ternary: condition ? then : else
    fn parse_ternary(&mut self) -> Result<Node, CompileError> {
        let expr = self.parse_logical_or()?;

        if self.match_token("?") {
            let loc = self.previous_location();
            let then = Box::new(self.parse_expression()?);
            self.expect(":", "in ternary expression")?;
            let els = Box::new(self.parse_ternary()?);

            return Ok(Node::new(
                NodeKind::Ternary {
                    cond: Box::new(expr),
                    then,
                    els,
                },
                loc,
            ));
        }

        Ok(expr)
    }

    /// Parse logical OR (||)
    fn parse_logical_or(&mut self) -> Result<Node, CompileError> {
        let mut left = self.parse_logical_and()?;

        while self.match_token("||") {
            let loc = self.previous_location();
            let right = self.parse_logical_and()?;
            left = Node::binary(BinOp::LogOr, left, right, loc);
        }

        Ok(left)
    }

    /// Parse logical AND (&&)
    fn parse_logical_and(&mut self) -> Result<Node, CompileError> {
        let mut left = self.parse_equality()?;

        while self.match_token("&&") {
            let loc = self.previous_location();
            let right = self.parse_equality()?;
            left = Node::binary(BinOp::LogAnd, left, right, loc);
        }

        Ok(left)
    }

    /// Parse equality (== !=)
    fn parse_equality(&mut self) -> Result<Node, CompileError> {
        let mut left = self.parse_relational()?;

        loop {
            let loc = self.current_location();
            let op = if self.match_token("==") {
                BinOp::Eq
            } else if self.match_token("!=") {
                BinOp::Ne
            } else {
                break;
            };

            let right = self.parse_relational()?;
            left = Node::binary(op, left, right, loc);
        }

        Ok(left)
    }

    /// Parse relational (< <= > >=)
    fn parse_relational(&mut self) -> Result<Node, CompileError> {
        let mut left = self.parse_additive()?;

        loop {
            let loc = self.current_location();
            let op = if self.match_token("<") {
                BinOp::Lt
            } else if self.match_token("<=") {
                BinOp::Le
            } else if self.match_token(">") {
                BinOp::Gt
            } else if self.match_token(">=") {
                BinOp::Ge
            } else {
                break;
            };

            let right = self.parse_additive()?;
            left = Node::binary(op, left, right, loc);
        }

        Ok(left)
    }

    /// Parse additive (+ -)
    fn parse_additive(&mut self) -> Result<Node, CompileError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let loc = self.current_location();
            let op = if self.match_token("+") {
                BinOp::Add
            } else if self.match_token("-") {
                BinOp::Sub
            } else {
                break;
            };

            let right = self.parse_multiplicative()?;
            left = Node::binary(op, left, right, loc);
        }

        Ok(left)
    }

    /// Parse multiplicative (* / %)
    fn parse_multiplicative(&mut self) -> Result<Node, CompileError> {
        let mut left = self.parse_unary()?;

        loop {
            let loc = self.current_location();
            let op = if self.match_token("*") {
                BinOp::Mul
            } else if self.match_token("/") {
                BinOp::Div
            } else if self.match_token("%") {
                BinOp::Mod
            } else {
                break;
            };

            let right = self.parse_unary()?;
            left = Node::binary(op, left, right, loc);
        }

        Ok(left)
    }

    /// Parse unary operators
    fn parse_unary(&mut self) -> Result<Node, CompileError> {
        let loc = self.current_location();

        if self.match_token("+") {
            return self.parse_unary();
        }

        if self.match_token("-") {
            let operand = self.parse_unary()?;
            return Ok(Node::binary(BinOp::Sub, Node::num(0, loc), operand, loc));
        }

        if self.match_token("&") {
            let operand = self.parse_unary()?;
            return Ok(Node::new(NodeKind::Addr(Box::new(operand)), loc));
        }

        if self.match_token("*") {
            let operand = self.parse_unary()?;
            return Ok(Node::deref(operand, loc));
        }

        if self.match_token("!") {
            let operand = self.parse_unary()?;
            return Ok(Node::new(NodeKind::Not(Box::new(operand)), loc));
        }

        if self.match_token("++") {
            let operand = self.parse_unary()?;
            return read_modify_write(operand, BinOp::Add, Node::num(1, loc), loc);
        }

        if self.match_token("--") {
            let operand = self.parse_unary()?;
            return read_modify_write(operand, BinOp::Sub, Node::num(1, loc), loc);
        }

        if self.match_token("sizeof") {
            if self.check("(") && self.is_type_keyword_ahead(1) {
                self.advance();
                let ty = self.parse_type_name()?;
                self.expect(")", "after type name")?;
                if ty.is_void() || ty.is_incomplete_array() {
                    return Err(CompileError::type_error(
                        format!("invalid sizeof target '{}'", ty),
                        loc,
                    ));
                }
                return Ok(Node::num(ty.size as i64, loc));
            }

            let operand = self.parse_unary()?;
            return Ok(Node::new(NodeKind::Sizeof(Box::new(operand)), loc));
        }

        self.parse_postfix()
    }

    /// Parse postfix operators
    fn parse_postfix(&mut self) -> Result<Node, CompileError> {
        let mut expr = self.parse_primary()?;

        loop {
            let loc = self.current_location();
            if self.match_token("[") {
                let index = self.parse_expression()?;
                self.expect("]", "after array index")?;
                expr = Node::deref(Node::binary(BinOp::Add, expr, index, loc), loc);
            } else if self.match_token(".") {
                let (name, _) = self.expect_identifier()?;
                expr = member_access(expr, name, loc);
            } else if self.match_token("->") {
                let (name, _) = self.expect_identifier()?;
                expr = member_access(Node::deref(expr, loc), name, loc);
            } else if self.match_token("++") {
                let updated = read_modify_write(expr, BinOp::Add, Node::num(1, loc), loc)?;
                expr = Node::binary(BinOp::Sub, updated, Node::num(1, loc), loc);
            } else if self.match_token("--") {
                let updated = read_modify_write(expr, BinOp::Sub, Node::num(1, loc), loc)?;
                expr = Node::binary(BinOp::Add, updated, Node::num(1, loc), loc);
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse primary expressions
    fn parse_primary(&mut self) -> Result<Node, CompileError> {
        let loc = self.current_location();

        // Statement expression: ({ stmt; ... expr; })
        if self.check("(") && self.check_ahead(1, "{") {
            self.advance();
            self.advance();
            self.scopes.enter_scope();
            let items = self.parse_compound_items();
            self.scopes.leave_scope();
            let items = items?;
            self.expect(")", "after statement expression")?;

            if !matches!(items.last(), Some(Node { kind: NodeKind::ExprStmt(_), .. })) {
                return Err(CompileError::syntax(
                    "statement expression must end with an expression statement",
                    loc,
                ));
            }
            return Ok(Node::new(NodeKind::StmtExpr(items), loc));
        }

        if self.match_token("(") {
            let expr = self.parse_expression()?;
            self.expect(")", "after expression")?;
            return Ok(expr);
        }

        match self.peek().kind.clone() {
            TokenKind::Num(n) => {
                self.advance();
                Ok(Node::num(n, loc))
            }
            TokenKind::Str(bytes) => {
                self.advance();
                let id = self.string_literal_var(bytes);
                Ok(Node::new(NodeKind::Var(id), loc))
            }
            TokenKind::Ident => {
                let (name, _) = self.expect_identifier()?;
                if self.match_token("(") {
                    return self.parse_call(name, loc);
                }

                match self.scopes.lookup_var(&name) {
                    Some(id) => Ok(Node::new(NodeKind::Var(id), loc)),
                    None => Err(CompileError::declaration(
                        format!("undeclared variable '{}'", name),
                        loc,
                    )),
                }
            }
            _ => Err(self.error_here(format!("Expected expression, found {}", self.peek()))),
        }
    }

    /// Parse call arguments after `name(`
    fn parse_call(&mut self, name: String, loc: SourceLocation) -> Result<Node, CompileError> {
        if self.program.function(&name).is_none() {
            return Err(CompileError::declaration(
                format!("implicit declaration of function '{}'", name),
                loc,
            ));
        }

        let mut args = Vec::new();
        if !self.match_token(")") {
            loop {
                args.push(self.parse_assignment()?);
                if !self.match_token(",") {
                    break;
                }
            }
            self.expect(")", "after function arguments")?;
        }

        Ok(Node::new(NodeKind::Call { name, args }, loc))
    }
}

fn member_access(base: Node, name: String, loc: SourceLocation) -> Node {
    Node::new(
        NodeKind::Member {
            base: Box::new(base),
            name,
            member: None,
        },
        loc,
    )
}

/// Build `target = target op value`, refusing targets whose evaluation
/// would be observed twice.
fn read_modify_write(
    target: Node,
    op: BinOp,
    value: Node,
    loc: SourceLocation,
) -> Result<Node, CompileError> {
    if target.has_side_effects() {
        return Err(CompileError::type_error(
            "operand of compound assignment must not have side effects",
            target.location,
        ));
    }
    let current = target.clone();
    Ok(Node::assign(target, Node::binary(op, current, value, loc), loc))
}

#[cfg(test)]
mod tests {
    use crate::error::CompileError;
    use crate::parser::ast::*;
    use crate::parser::parse::Parser;

    fn parse_return(body: &str) -> Result<Node, CompileError> {
        let source = format!("int f(int a, int b) {{ return 0; }} int main() {{ {} }}", body);
        let mut program = Parser::new(&source)?.parse_program()?;
        let main = program.functions.remove(1);
        let Some(Node {
            kind: NodeKind::Block(mut items),
            ..
        }) = main.body
        else {
            panic!("Expected block body");
        };
        match items.pop().map(|n| n.kind) {
            Some(NodeKind::Return(Some(expr))) => Ok(*expr),
            other => panic!("Expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let expr = parse_return("int x; int y; return x = y = 3;").unwrap();
        let NodeKind::Assign { rhs, .. } = expr.kind else {
            panic!("Expected assignment");
        };
        assert!(matches!(rhs.kind, NodeKind::Assign { .. }));
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let expr = parse_return("int x; return x *= 2;").unwrap();
        let NodeKind::Assign { lhs, rhs } = expr.kind else {
            panic!("Expected assignment");
        };
        assert!(matches!(lhs.kind, NodeKind::Var(_)));
        assert!(matches!(rhs.kind, NodeKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_postfix_increment_desugars() {
        let expr = parse_return("int i; return i++;").unwrap();
        let NodeKind::Binary { op: BinOp::Sub, lhs, rhs } = expr.kind else {
            panic!("Expected subtraction");
        };
        assert!(matches!(lhs.kind, NodeKind::Assign { .. }));
        assert!(matches!(rhs.kind, NodeKind::Num(1)));
    }

    #[test]
    fn test_side_effecting_compound_target_rejected() {
        let err = parse_return("int a[2]; int i; return a[i = 1] += 2;").unwrap_err();
        assert!(matches!(err, CompileError::Type { .. }));
    }

    #[test]
    fn test_subscript_and_arrow_desugar() {
        let expr = parse_return("int a[3]; return a[1];").unwrap();
        let NodeKind::Deref(inner) = expr.kind else {
            panic!("Expected dereference");
        };
        assert!(matches!(inner.kind, NodeKind::Binary { op: BinOp::Add, .. }));

        let expr = parse_return("struct S { int v; } *p; return p->v;").unwrap();
        let NodeKind::Member { base, name, .. } = expr.kind else {
            panic!("Expected member access");
        };
        assert_eq!(name, "v");
        assert!(matches!(base.kind, NodeKind::Deref(_)));
    }

    #[test]
    fn test_sizeof_type_name_folds() {
        let expr = parse_return("return sizeof(int *[3]);").unwrap();
        assert!(matches!(expr.kind, NodeKind::Num(24)));

        let err = parse_return("return sizeof(void);").unwrap_err();
        assert!(err.message().contains("invalid sizeof target"));
    }

    #[test]
    fn test_logical_operators_bind_looser_than_equality() {
        let expr = parse_return("return 1 == 1 || 0 && 2;").unwrap();
        let NodeKind::Binary { op: BinOp::LogOr, rhs, .. } = expr.kind else {
            panic!("Expected ||");
        };
        assert!(matches!(rhs.kind, NodeKind::Binary { op: BinOp::LogAnd, .. }));
    }

    #[test]
    fn test_call_requires_declaration() {
        assert!(parse_return("return f(1, 2);").is_ok());
        let err = parse_return("return g(1);").unwrap_err();
        assert!(err.message().contains("implicit declaration of function 'g'"));
    }

    #[test]
    fn test_statement_expression_must_end_with_expression() {
        let expr = parse_return("return ({ int x = 2; x + 1; });").unwrap();
        assert!(matches!(expr.kind, NodeKind::StmtExpr(_)));

        let err = parse_return("return ({ int x = 2; { x; } });").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn test_string_literal_becomes_global() {
        let source = r#"int main() { char *s = "hi"; return 0; }"#;
        let program = Parser::new(source).unwrap().parse_program().unwrap();
        let s = program.var(program.globals[0]);
        assert_eq!(s.name, ".L..str.0");
        assert_eq!(s.ty.size, 3);
    }
}
