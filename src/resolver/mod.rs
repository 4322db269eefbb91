//! Type resolution
//!
//! The resolver takes the untyped tree produced by the parser and rebuilds it
//! bottom-up with a type on every expression. Nodes are replaced, not just
//! annotated: array values are wrapped in an address-of, `sizeof` collapses
//! to a literal, and pointer arithmetic gains explicit scaling (see [`arith`]).
//!
//! # Decay
//!
//! Every walk carries a [`Mode`]. In [`Mode::Decay`] an array-typed result is
//! converted to a pointer to its first element. [`Mode::NoDecay`] keeps the
//! array itself and is used for the operand of `sizeof` and `&`, the left side
//! of `=`, and the base of a member access.
//!
//! # Operand rules
//!
//! - `* / % == != < <= > >=` need integer-kind operands and yield `int`
//! - `&& || !` and conditions need scalar operands (integers or pointers)
//! - `=` and `&` need a referable operand: variable, dereference or member
//! - Array and struct values cannot be assigned or passed to functions

mod arith;

use crate::error::CompileError;
use crate::parser::ast::*;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Maximum number of arguments passed in registers
pub const MAX_CALL_ARGS: usize = 6;

/// Whether array-typed results convert to pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Decay,
    NoDecay,
}

/// Declared shape of a function, as seen by callers
#[derive(Debug, Clone)]
struct Signature {
    return_ty: TypeRef,
    params: Vec<TypeRef>,
    variadic: bool,
}

/// Resolve every function body of `program`
pub fn resolve_program(mut program: Program) -> Result<Program, CompileError> {
    let signatures: FxHashMap<String, Signature> = program
        .functions
        .iter()
        .map(|func| {
            let params = func
                .params
                .iter()
                .map(|&id| program.var(id).ty.clone())
                .collect();
            let sig = Signature {
                return_ty: func.return_ty.clone(),
                params,
                variadic: func.variadic,
            };
            (func.name.clone(), sig)
        })
        .collect();

    for func in program.functions.iter_mut() {
        let Some(body) = func.body.take() else {
            continue;
        };
        if func.params.len() > MAX_CALL_ARGS {
            return Err(CompileError::declaration(
                format!(
                    "function '{}' has {} parameters; at most {} are supported",
                    func.name,
                    func.params.len(),
                    MAX_CALL_ARGS
                ),
                func.location,
            ));
        }
        tracing::trace!(function = %func.name, "resolving types");
        let resolver = Resolver {
            vars: &program.vars,
            signatures: &signatures,
            return_ty: Rc::clone(&func.return_ty),
        };
        func.body = Some(resolver.resolve(body, Mode::Decay)?);
    }

    tracing::debug!(functions = program.functions.len(), "resolved program");
    Ok(program)
}

/// Resolves the body of one function
struct Resolver<'a> {
    vars: &'a [Var],
    signatures: &'a FxHashMap<String, Signature>,
    return_ty: TypeRef,
}

/// Type of an already resolved node
pub(crate) fn type_of(node: &Node) -> Result<TypeRef, CompileError> {
    node.ty
        .clone()
        .ok_or_else(|| CompileError::type_error("expression has no type", node.location))
}

impl Resolver<'_> {
    /// Rewrite `node` and its subtree, then apply array decay if `mode` asks for it
    fn resolve(&self, node: Node, mode: Mode) -> Result<Node, CompileError> {
        let node = self.rewrite(node)?;
        match mode {
            Mode::Decay => decay(node),
            Mode::NoDecay => Ok(node),
        }
    }

    fn rewrite(&self, node: Node) -> Result<Node, CompileError> {
        let loc = node.location;
        match node.kind {
            NodeKind::Num(n) => {
                let ty = if i32::try_from(n).is_ok() {
                    Type::int()
                } else {
                    Type::long()
                };
                Ok(Node::typed(NodeKind::Num(n), ty, loc))
            }

            NodeKind::Var(id) => {
                let ty = self.vars[id.0].ty.clone();
                Ok(Node::typed(NodeKind::Var(id), ty, loc))
            }

            NodeKind::Binary { op, lhs, rhs } => {
                let lhs = self.resolve(*lhs, Mode::Decay)?;
                let rhs = self.resolve(*rhs, Mode::Decay)?;
                match op {
                    BinOp::Add => arith::add(lhs, rhs, loc),
                    BinOp::Sub => arith::sub(lhs, rhs, loc),
                    BinOp::LogAnd | BinOp::LogOr => {
                        require_scalar(&lhs, op)?;
                        require_scalar(&rhs, op)?;
                        Ok(arith::int_binary(op, lhs, rhs, loc))
                    }
                    _ => {
                        require_integer(&lhs, op)?;
                        require_integer(&rhs, op)?;
                        Ok(arith::int_binary(op, lhs, rhs, loc))
                    }
                }
            }

            NodeKind::Not(inner) => {
                let inner = self.resolve(*inner, Mode::Decay)?;
                let ty = type_of(&inner)?;
                if !ty.is_scalar() {
                    return Err(CompileError::type_error(
                        format!("invalid operand to '!' (have '{}')", ty),
                        inner.location,
                    ));
                }
                Ok(Node::typed(NodeKind::Not(Box::new(inner)), Type::int(), loc))
            }

            NodeKind::Assign { lhs, rhs } => {
                let lhs = self.resolve(*lhs, Mode::NoDecay)?;
                if !lhs.is_referable() {
                    return Err(CompileError::type_error(
                        "left side of assignment is not assignable",
                        lhs.location,
                    ));
                }
                let lhs_ty = type_of(&lhs)?;
                if lhs_ty.is_array() || lhs_ty.is_struct() {
                    return Err(CompileError::type_error(
                        format!("cannot assign to a value of type '{}'", lhs_ty),
                        lhs.location,
                    ));
                }

                let rhs = self.resolve(*rhs, Mode::Decay)?;
                let rhs_ty = type_of(&rhs)?;
                if !rhs_ty.is_scalar() {
                    return Err(CompileError::type_error(
                        format!("cannot assign a value of type '{}'", rhs_ty),
                        rhs.location,
                    ));
                }

                Ok(Node::typed(
                    NodeKind::Assign {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    lhs_ty,
                    loc,
                ))
            }

            NodeKind::Ternary { cond, then, els } => {
                let cond = self.condition(*cond)?;
                let then = self.resolve(*then, Mode::Decay)?;
                let els = self.resolve(*els, Mode::Decay)?;
                let (then_ty, els_ty) = (type_of(&then)?, type_of(&els)?);

                let ty = if then_ty.is_integer() && els_ty.is_integer() {
                    Type::int()
                } else if then_ty == els_ty {
                    then_ty
                } else {
                    return Err(CompileError::type_error(
                        format!(
                            "mismatched types in conditional expression ('{}' and '{}')",
                            then_ty, els_ty
                        ),
                        loc,
                    ));
                };

                Ok(Node::typed(
                    NodeKind::Ternary {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els: Box::new(els),
                    },
                    ty,
                    loc,
                ))
            }

            NodeKind::Addr(inner) => {
                let inner = self.resolve(*inner, Mode::NoDecay)?;
                if !inner.is_referable() {
                    return Err(CompileError::type_error(
                        "cannot take the address of this expression",
                        inner.location,
                    ));
                }
                let ty = Type::pointer_to(&type_of(&inner)?);
                Ok(Node::typed(NodeKind::Addr(Box::new(inner)), ty, loc))
            }

            NodeKind::Deref(inner) => {
                let inner = self.resolve(*inner, Mode::Decay)?;
                let ty = type_of(&inner)?;
                let pointee = match &ty.kind {
                    TypeKind::Pointer(base) if base.is_void() => {
                        return Err(CompileError::type_error(
                            "dereferencing a 'void *' pointer",
                            loc,
                        ))
                    }
                    TypeKind::Pointer(base) => base.clone(),
                    _ => {
                        return Err(CompileError::type_error(
                            format!("cannot dereference a value of type '{}'", ty),
                            loc,
                        ))
                    }
                };
                Ok(Node::typed(NodeKind::Deref(Box::new(inner)), pointee, loc))
            }

            NodeKind::Member { base, name, .. } => {
                let base = self.resolve(*base, Mode::NoDecay)?;
                let base_ty = type_of(&base)?;
                if !base_ty.is_struct() {
                    return Err(CompileError::type_error(
                        format!("member access '{}' on non-struct type '{}'", name, base_ty),
                        loc,
                    ));
                }
                if !base.is_referable() {
                    return Err(CompileError::type_error(
                        format!("member access '{}' on a struct value that is not addressable", name),
                        base.location,
                    ));
                }
                let member = base_ty.member(&name).cloned().ok_or_else(|| {
                    CompileError::type_error(
                        format!("'{}' has no member named '{}'", base_ty, name),
                        loc,
                    )
                })?;

                let ty = member.ty.clone();
                Ok(Node::typed(
                    NodeKind::Member {
                        base: Box::new(base),
                        name,
                        member: Some(member),
                    },
                    ty,
                    loc,
                ))
            }

            NodeKind::Sizeof(inner) => {
                let inner = self.resolve(*inner, Mode::NoDecay)?;
                let ty = type_of(&inner)?;
                if ty.is_void() || ty.is_incomplete_array() {
                    return Err(CompileError::type_error(
                        format!("invalid sizeof target '{}'", ty),
                        loc,
                    ));
                }
                Ok(Node::typed(NodeKind::Num(ty.size as i64), Type::int(), loc))
            }

            NodeKind::Call { name, args } => self.call(name, args, loc),

            NodeKind::StmtExpr(items) => {
                let items = self.statements(items)?;
                let ty = last_type(&items);
                Ok(Node::typed(NodeKind::StmtExpr(items), ty, loc))
            }

            // Statements
            NodeKind::ExprStmt(expr) => {
                let expr = self.resolve(*expr, Mode::Decay)?;
                let ty = type_of(&expr)?;
                Ok(Node::typed(NodeKind::ExprStmt(Box::new(expr)), ty, loc))
            }

            NodeKind::Return(expr) => {
                let expr = match expr {
                    Some(expr) => Some(Box::new(self.returned_value(*expr)?)),
                    None => None,
                };
                Ok(Node::typed(NodeKind::Return(expr), Type::void(), loc))
            }

            NodeKind::Block(items) => {
                let items = self.statements(items)?;
                let ty = last_type(&items);
                Ok(Node::typed(NodeKind::Block(items), ty, loc))
            }

            NodeKind::If { cond, then, els } => {
                let kind = NodeKind::If {
                    cond: Box::new(self.condition(*cond)?),
                    then: Box::new(self.rewrite(*then)?),
                    els: Box::new(self.rewrite(*els)?),
                };
                Ok(Node::typed(kind, Type::void(), loc))
            }

            NodeKind::While { cond, body } => {
                let kind = NodeKind::While {
                    cond: Box::new(self.condition(*cond)?),
                    body: Box::new(self.rewrite(*body)?),
                };
                Ok(Node::typed(kind, Type::void(), loc))
            }

            NodeKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let init = match init {
                    Some(init) => Some(Box::new(self.rewrite(*init)?)),
                    None => None,
                };
                let cond = Box::new(self.condition(*cond)?);
                let update = match update {
                    Some(update) => Some(Box::new(self.rewrite(*update)?)),
                    None => None,
                };
                let body = Box::new(self.rewrite(*body)?);
                let kind = NodeKind::For {
                    init,
                    cond,
                    update,
                    body,
                };
                Ok(Node::typed(kind, Type::void(), loc))
            }

            kind @ (NodeKind::Break | NodeKind::Continue | NodeKind::Empty) => {
                Ok(Node::typed(kind, Type::void(), loc))
            }
        }
    }

    fn statements(&self, items: Vec<Node>) -> Result<Vec<Node>, CompileError> {
        items.into_iter().map(|item| self.rewrite(item)).collect()
    }

    /// Controlling expression of `if`, loops and `?:`
    fn condition(&self, cond: Node) -> Result<Node, CompileError> {
        let cond = self.resolve(cond, Mode::Decay)?;
        let ty = type_of(&cond)?;
        if !ty.is_scalar() {
            return Err(CompileError::type_error(
                format!("used '{}' where a scalar is required", ty),
                cond.location,
            ));
        }
        Ok(cond)
    }

    /// Operand of `return`: a scalar, or nothing but a `void` value in a
    /// `void` function
    fn returned_value(&self, expr: Node) -> Result<Node, CompileError> {
        let expr = self.resolve(expr, Mode::Decay)?;
        let ty = type_of(&expr)?;
        if self.return_ty.is_void() {
            if !ty.is_void() {
                return Err(CompileError::type_error(
                    "void function should not return a value",
                    expr.location,
                ));
            }
        } else if !ty.is_scalar() {
            return Err(CompileError::type_error(
                format!("cannot return a value of type '{}'", ty),
                expr.location,
            ));
        }
        Ok(expr)
    }

    fn call(
        &self,
        name: String,
        args: Vec<Node>,
        loc: SourceLocation,
    ) -> Result<Node, CompileError> {
        let sig = self.signatures.get(&name).ok_or_else(|| {
            CompileError::declaration(format!("implicit declaration of function '{}'", name), loc)
        })?;

        let arity_ok = if sig.variadic {
            args.len() >= sig.params.len()
        } else {
            args.len() == sig.params.len()
        };
        if !arity_ok {
            return Err(CompileError::type_error(
                format!(
                    "function '{}' expects {}{} argument(s), got {}",
                    name,
                    if sig.variadic { "at least " } else { "" },
                    sig.params.len(),
                    args.len()
                ),
                loc,
            ));
        }
        if args.len() > MAX_CALL_ARGS {
            return Err(CompileError::type_error(
                format!(
                    "call to '{}' passes {} arguments; at most {} are supported",
                    name,
                    args.len(),
                    MAX_CALL_ARGS
                ),
                loc,
            ));
        }

        let args = args
            .into_iter()
            .map(|arg| {
                let arg = self.resolve(arg, Mode::Decay)?;
                let ty = type_of(&arg)?;
                if !ty.is_scalar() {
                    return Err(CompileError::type_error(
                        format!("cannot pass a value of type '{}' as an argument", ty),
                        arg.location,
                    ));
                }
                Ok(arg)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ty = Rc::clone(&sig.return_ty);
        Ok(Node::typed(NodeKind::Call { name, args }, ty, loc))
    }
}

/// Convert an array value into a pointer to its first element
fn decay(node: Node) -> Result<Node, CompileError> {
    let ty = type_of(&node)?;
    let TypeKind::Array { base, .. } = &ty.kind else {
        return Ok(node);
    };
    if !node.is_referable() {
        return Err(CompileError::type_error(
            "array value is not addressable",
            node.location,
        ));
    }
    let loc = node.location;
    let pointer = Type::pointer_to(base);
    Ok(Node::typed(NodeKind::Addr(Box::new(node)), pointer, loc))
}

fn last_type(items: &[Node]) -> TypeRef {
    items
        .last()
        .and_then(|item| item.ty.clone())
        .unwrap_or_else(Type::void)
}

fn require_integer(node: &Node, op: BinOp) -> Result<(), CompileError> {
    let ty = type_of(node)?;
    if ty.is_integer() {
        Ok(())
    } else {
        Err(CompileError::type_error(
            format!("invalid operand to '{}' (have '{}')", op, ty),
            node.location,
        ))
    }
}

fn require_scalar(node: &Node, op: BinOp) -> Result<(), CompileError> {
    let ty = type_of(node)?;
    if ty.is_scalar() {
        Ok(())
    } else {
        Err(CompileError::type_error(
            format!("invalid operand to '{}' (have '{}')", op, ty),
            node.location,
        ))
    }
}
