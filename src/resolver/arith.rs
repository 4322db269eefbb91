//! Pointer arithmetic rewrites
//!
//! `p + n` and `p - n` scale `n` by the pointee size, so the generator only
//! ever adds byte offsets. `p - q` becomes the byte difference divided by the
//! pointee size.

use super::type_of;
use crate::error::CompileError;
use crate::parser::ast::*;

/// `op` applied to two operands, typed `int`
pub(super) fn int_binary(op: BinOp, lhs: Node, rhs: Node, loc: SourceLocation) -> Node {
    Node::typed(
        NodeKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        Type::int(),
        loc,
    )
}

/// `index * size`, typed `int`
fn scaled(index: Node, size: usize, loc: SourceLocation) -> Node {
    let size = Node::typed(NodeKind::Num(size as i64), Type::int(), loc);
    int_binary(BinOp::Mul, index, size, loc)
}

fn pointer_binary(op: BinOp, pointer: Node, offset: Node, ty: TypeRef, loc: SourceLocation) -> Node {
    Node::typed(
        NodeKind::Binary {
            op,
            lhs: Box::new(pointer),
            rhs: Box::new(offset),
        },
        ty,
        loc,
    )
}

pub(super) fn add(lhs: Node, rhs: Node, loc: SourceLocation) -> Result<Node, CompileError> {
    let (lhs_ty, rhs_ty) = (type_of(&lhs)?, type_of(&rhs)?);

    if lhs_ty.is_integer() && rhs_ty.is_integer() {
        return Ok(int_binary(BinOp::Add, lhs, rhs, loc));
    }

    // Keep the pointer on the left
    let (pointer, index, ty, index_ty) = match (lhs_ty.is_pointer(), rhs_ty.is_pointer()) {
        (true, false) => (lhs, rhs, lhs_ty, rhs_ty),
        (false, true) => (rhs, lhs, rhs_ty, lhs_ty),
        _ => {
            return Err(CompileError::type_error(
                format!("invalid operands to '+' ('{}' and '{}')", lhs_ty, rhs_ty),
                loc,
            ))
        }
    };

    if !index_ty.is_integer() {
        return Err(CompileError::type_error(
            format!("invalid operands to '+' ('{}' and '{}')", ty, index_ty),
            loc,
        ));
    }

    let size = ty.base().map(|base| base.size).unwrap_or(1);
    let offset = scaled(index, size, loc);
    Ok(pointer_binary(BinOp::Add, pointer, offset, ty, loc))
}

pub(super) fn sub(lhs: Node, rhs: Node, loc: SourceLocation) -> Result<Node, CompileError> {
    let (lhs_ty, rhs_ty) = (type_of(&lhs)?, type_of(&rhs)?);

    if lhs_ty.is_integer() && rhs_ty.is_integer() {
        return Ok(int_binary(BinOp::Sub, lhs, rhs, loc));
    }

    match (&lhs_ty.kind, &rhs_ty.kind) {
        (TypeKind::Pointer(a), TypeKind::Pointer(b)) => {
            if a != b {
                return Err(CompileError::type_error(
                    format!("subtracting incompatible pointers ('{}' and '{}')", lhs_ty, rhs_ty),
                    loc,
                ));
            }
            if a.size == 0 {
                return Err(CompileError::type_error(
                    format!("subtracting pointers to zero-sized type '{}'", a),
                    loc,
                ));
            }
            let size = Node::typed(NodeKind::Num(a.size as i64), Type::int(), loc);
            let bytes = pointer_binary(BinOp::Sub, lhs, rhs, Type::long(), loc);
            Ok(int_binary(BinOp::Div, bytes, size, loc))
        }
        (TypeKind::Pointer(base), _) if rhs_ty.is_integer() => {
            let offset = scaled(rhs, base.size, loc);
            Ok(pointer_binary(BinOp::Sub, lhs, offset, lhs_ty.clone(), loc))
        }
        _ => Err(CompileError::type_error(
            format!("invalid operands to '-' ('{}' and '{}')", lhs_ty, rhs_ty),
            loc,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed_var(id: usize, ty: TypeRef) -> Node {
        Node::typed(NodeKind::Var(VarId(id)), ty, SourceLocation::default())
    }

    fn int_num(n: i64) -> Node {
        Node::typed(NodeKind::Num(n), Type::int(), SourceLocation::default())
    }

    fn scale_of(node: &Node) -> i64 {
        let NodeKind::Binary { op: BinOp::Mul, rhs, .. } = &node.kind else {
            panic!("Expected scaling multiplication, got {:?}", node.kind);
        };
        match rhs.kind {
            NodeKind::Num(n) => n,
            _ => panic!("Expected literal scale"),
        }
    }

    #[test]
    fn test_integer_plus_pointer_is_reordered() {
        let p = typed_var(0, Type::pointer_to(&Type::long()));
        let node = add(int_num(3), p, SourceLocation::default()).unwrap();

        let NodeKind::Binary { lhs, rhs, .. } = &node.kind else {
            panic!("Expected addition");
        };
        assert!(matches!(lhs.kind, NodeKind::Var(VarId(0))));
        assert_eq!(scale_of(rhs), 8);
        assert!(node.ty.unwrap().is_pointer());
    }

    #[test]
    fn test_pointer_difference_divides_by_size() {
        let ty = Type::pointer_to(&Type::int());
        let node = sub(typed_var(0, ty.clone()), typed_var(1, ty), SourceLocation::default()).unwrap();

        let NodeKind::Binary { op: BinOp::Div, rhs, .. } = &node.kind else {
            panic!("Expected division");
        };
        assert!(matches!(rhs.kind, NodeKind::Num(4)));
        assert_eq!(*node.ty.unwrap(), *Type::int());
    }

    #[test]
    fn test_pointer_minus_integer_scales() {
        let p = typed_var(0, Type::pointer_to(&Type::short()));
        let node = sub(p, int_num(1), SourceLocation::default()).unwrap();
        let NodeKind::Binary { op: BinOp::Sub, rhs, .. } = &node.kind else {
            panic!("Expected subtraction");
        };
        assert_eq!(scale_of(rhs), 2);
    }

    #[test]
    fn test_invalid_pointer_arithmetic() {
        let p = || typed_var(0, Type::pointer_to(&Type::int()));
        let q = typed_var(1, Type::pointer_to(&Type::char()));

        assert!(add(p(), p(), SourceLocation::default()).is_err());
        assert!(sub(int_num(1), p(), SourceLocation::default()).is_err());
        assert!(sub(p(), q, SourceLocation::default()).is_err());
    }
}
