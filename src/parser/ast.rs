//! AST (Abstract Syntax Tree) and type definitions for the compiler
//!
//! Everything here is created by the parser and lives until the compilation
//! run ends. Types are immutable and shared through [`TypeRef`]; variables
//! live in the [`Program`]'s arena and are referenced from nodes by
//! [`VarId`].

use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;

/// Source location information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    /// Byte offset into the source text
    pub offset: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Shared handle to an immutable type
pub type TypeRef = Rc<Type>;

pub const POINTER_SIZE: usize = 8;

/// Type variants supported by the compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Char,
    Short,
    Int,
    Long,
    Void,
    Pointer(TypeRef),
    /// `len` is `None` until an initializer fixes the element count
    Array { base: TypeRef, len: Option<usize> },
    Struct(Rc<StructLayout>),
}

/// A type together with its size in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub kind: TypeKind,
    pub size: usize,
}

impl Type {
    fn scalar(kind: TypeKind, size: usize) -> TypeRef {
        Rc::new(Type { kind, size })
    }

    pub fn char() -> TypeRef {
        Self::scalar(TypeKind::Char, 1)
    }

    pub fn short() -> TypeRef {
        Self::scalar(TypeKind::Short, 2)
    }

    pub fn int() -> TypeRef {
        Self::scalar(TypeKind::Int, 4)
    }

    pub fn long() -> TypeRef {
        Self::scalar(TypeKind::Long, 8)
    }

    /// `void` has size 1 so that `void *` arithmetic moves byte by byte.
    pub fn void() -> TypeRef {
        Self::scalar(TypeKind::Void, 1)
    }

    pub fn pointer_to(base: &TypeRef) -> TypeRef {
        Rc::new(Type {
            kind: TypeKind::Pointer(Rc::clone(base)),
            size: POINTER_SIZE,
        })
    }

    pub fn array_of(base: &TypeRef, len: Option<usize>) -> TypeRef {
        Rc::new(Type {
            kind: TypeKind::Array {
                base: Rc::clone(base),
                len,
            },
            size: base.size * len.unwrap_or(0),
        })
    }

    pub fn struct_of(layout: StructLayout) -> TypeRef {
        let size = layout.size();
        Rc::new(Type {
            kind: TypeKind::Struct(Rc::new(layout)),
            size,
        })
    }

    /// Pointee of a pointer or element of an array
    pub fn base(&self) -> Option<&TypeRef> {
        match &self.kind {
            TypeKind::Pointer(base) | TypeKind::Array { base, .. } => Some(base),
            _ => None,
        }
    }

    /// Integer-kind types: the only operands accepted by `* / % == < ...`
    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Char | TypeKind::Short | TypeKind::Int | TypeKind::Long
        )
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn is_incomplete_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { len: None, .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    /// Values that fit in a register: integers and pointers
    pub fn is_scalar(&self) -> bool {
        self.is_integer() || self.is_pointer()
    }

    pub fn member(&self, name: &str) -> Option<&Rc<Member>> {
        match &self.kind {
            TypeKind::Struct(layout) => layout.member(name),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Char => write!(f, "char"),
            TypeKind::Short => write!(f, "short"),
            TypeKind::Int => write!(f, "int"),
            TypeKind::Long => write!(f, "long"),
            TypeKind::Void => write!(f, "void"),
            TypeKind::Pointer(base) => write!(f, "{} *", base),
            TypeKind::Array { base, len: Some(n) } => write!(f, "{}[{}]", base, n),
            TypeKind::Array { base, len: None } => write!(f, "{}[]", base),
            TypeKind::Struct(layout) => match &layout.tag {
                Some(tag) => write!(f, "struct {}", tag),
                None => write!(f, "struct <anonymous>"),
            },
        }
    }
}

/// Struct field with its byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub ty: TypeRef,
    pub offset: usize,
}

/// Member table of a struct type
///
/// Members are packed back to back with no padding, so a struct's size is
/// the last member's offset plus its size. `id` is unique per struct
/// declaration and makes two distinct declarations compare unequal even when
/// their members match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub id: usize,
    pub tag: Option<String>,
    pub members: Vec<Rc<Member>>,
    index: FxHashMap<String, usize>,
}

impl StructLayout {
    /// Lay out `fields` in order. Returns the duplicated name on conflict.
    pub fn new(
        id: usize,
        tag: Option<String>,
        fields: Vec<(String, TypeRef)>,
    ) -> Result<Self, String> {
        let mut members = Vec::with_capacity(fields.len());
        let mut index = FxHashMap::default();
        let mut offset = 0;

        for (name, ty) in fields {
            if index.insert(name.clone(), members.len()).is_some() {
                return Err(name);
            }
            let size = ty.size;
            members.push(Rc::new(Member { name, ty, offset }));
            offset += size;
        }

        Ok(Self {
            id,
            tag,
            members,
            index,
        })
    }

    pub fn size(&self) -> usize {
        self.members
            .last()
            .map(|m| m.offset + m.ty.size)
            .unwrap_or(0)
    }

    pub fn member(&self, name: &str) -> Option<&Rc<Member>> {
        self.index.get(name).map(|&i| &self.members[i])
    }
}

/// Index of a variable in [`Program::vars`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    Local,
    /// `init` holds the literal bytes of initialized data; `None` means zero-filled
    Global { init: Option<Vec<u8>> },
}

#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub ty: TypeRef,
    pub storage: Storage,
}

impl Var {
    pub fn is_local(&self) -> bool {
        matches!(self.storage, Storage::Local)
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
        };
        f.write_str(s)
    }
}

/// AST node kinds, statements and expressions alike
#[derive(Debug, Clone)]
pub enum NodeKind {
    // Expressions
    Num(i64),
    Var(VarId),
    /// `member` is filled in by the type resolver
    Member {
        base: Box<Node>,
        name: String,
        member: Option<Rc<Member>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Not(Box<Node>),
    Assign {
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Ternary {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    Addr(Box<Node>),
    Deref(Box<Node>),
    /// Replaced by a `Num` during type resolution
    Sizeof(Box<Node>),
    Call {
        name: String,
        args: Vec<Node>,
    },
    StmtExpr(Vec<Node>),

    // Statements
    ExprStmt(Box<Node>),
    Return(Option<Box<Node>>),
    Block(Vec<Node>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    For {
        init: Option<Box<Node>>,
        cond: Box<Node>,
        update: Option<Box<Node>>,
        body: Box<Node>,
    },
    Break,
    Continue,
    Empty,
}

/// A node with its (resolver-assigned) type and source location
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: Option<TypeRef>,
    pub location: SourceLocation,
}

impl Node {
    pub fn new(kind: NodeKind, location: SourceLocation) -> Self {
        Self {
            kind,
            ty: None,
            location,
        }
    }

    pub fn typed(kind: NodeKind, ty: TypeRef, location: SourceLocation) -> Self {
        Self {
            kind,
            ty: Some(ty),
            location,
        }
    }

    pub fn num(value: i64, location: SourceLocation) -> Self {
        Self::new(NodeKind::Num(value), location)
    }

    pub fn binary(op: BinOp, lhs: Node, rhs: Node, location: SourceLocation) -> Self {
        Self::new(
            NodeKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            location,
        )
    }

    pub fn assign(lhs: Node, rhs: Node, location: SourceLocation) -> Self {
        Self::new(
            NodeKind::Assign {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            location,
        )
    }

    pub fn deref(inner: Node, location: SourceLocation) -> Self {
        Self::new(NodeKind::Deref(Box::new(inner)), location)
    }

    pub fn expr_stmt(expr: Node) -> Self {
        let location = expr.location;
        Self::new(NodeKind::ExprStmt(Box::new(expr)), location)
    }

    /// Variable references, dereferences and member accesses denote storage
    pub fn is_referable(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Var(_) | NodeKind::Deref(_) | NodeKind::Member { .. }
        )
    }

    /// Whether evaluating this expression can write memory or call out
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            NodeKind::Assign { .. } | NodeKind::Call { .. } | NodeKind::StmtExpr(_) => true,
            NodeKind::Num(_) | NodeKind::Var(_) | NodeKind::Sizeof(_) => false,
            NodeKind::Member { base, .. } => base.has_side_effects(),
            NodeKind::Binary { lhs, rhs, .. } => lhs.has_side_effects() || rhs.has_side_effects(),
            NodeKind::Not(inner) | NodeKind::Addr(inner) | NodeKind::Deref(inner) => {
                inner.has_side_effects()
            }
            NodeKind::Ternary { cond, then, els } => {
                cond.has_side_effects() || then.has_side_effects() || els.has_side_effects()
            }
            _ => true,
        }
    }
}

/// Function signature and (optional) body
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub return_ty: TypeRef,
    pub params: Vec<VarId>,
    /// Every local in declaration order, parameters first
    pub locals: Vec<VarId>,
    pub variadic: bool,
    /// `None` for a prototype-only declaration
    pub body: Option<Node>,
    pub location: SourceLocation,
}

/// Parsed translation unit
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Functions in first-declaration order
    pub functions: Vec<Func>,
    function_index: FxHashMap<String, usize>,
    /// Global variables (string literals included) in declaration order
    pub globals: Vec<VarId>,
    /// Arena owning every variable of the run
    pub vars: Vec<Var>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn add_var(&mut self, var: Var) -> VarId {
        self.vars.push(var);
        VarId(self.vars.len() - 1)
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.0]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Var {
        &mut self.vars[id.0]
    }

    pub fn function(&self, name: &str) -> Option<&Func> {
        self.function_index.get(name).map(|&i| &self.functions[i])
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Func> {
        self.function_index
            .get(name)
            .copied()
            .map(move |i| &mut self.functions[i])
    }

    pub fn add_function(&mut self, func: Func) {
        self.function_index
            .insert(func.name.clone(), self.functions.len());
        self.functions.push(func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layout_has_no_padding() {
        let layout = StructLayout::new(
            0,
            None,
            vec![("a".to_string(), Type::int()), ("b".to_string(), Type::char())],
        )
        .unwrap();
        let ty = Type::struct_of(layout);

        assert_eq!(ty.size, 5);
        assert_eq!(ty.member("a").unwrap().offset, 0);
        assert_eq!(ty.member("b").unwrap().offset, 4);
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let result = StructLayout::new(
            0,
            Some("S".to_string()),
            vec![("x".to_string(), Type::int()), ("x".to_string(), Type::int())],
        );
        assert_eq!(result.unwrap_err(), "x");
    }

    #[test]
    fn test_wrapping_does_not_mutate_base() {
        let int = Type::int();
        let arr = Type::array_of(&int, Some(3));
        let ptr = Type::pointer_to(&arr);

        assert_eq!(int.size, 4);
        assert_eq!(arr.size, 12);
        assert_eq!(ptr.size, 8);
        assert_eq!(ptr.base().unwrap().base().unwrap().as_ref(), int.as_ref());
    }

    #[test]
    fn test_distinct_struct_declarations_differ() {
        let a = Type::struct_of(StructLayout::new(1, None, vec![]).unwrap());
        let b = Type::struct_of(StructLayout::new(2, None, vec![]).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_type_display() {
        let ty = Type::array_of(&Type::pointer_to(&Type::char()), Some(2));
        assert_eq!(ty.to_string(), "char *[2]");
    }
}
