//! Declaration parsing implementation
//!
//! This module handles every declaration form:
//!
//! - Struct types: `struct Tag { ... }`, `struct { ... }`, `struct Tag`
//! - Functions: prototypes and definitions, checked against each other
//! - Global and local variables, with multiple declarators
//! - Initializers, which are desugared into per-element assignments
//!
//! # Grammar
//!
//! ```text
//! declaration  ::= base_type declarator ("=" initializer)? ("," declarator ...)* ";"
//! base_type    ::= "int" | "char" | "short" | "long" | "void" | struct_type
//! struct_type  ::= "struct" identifier? ("{" (base_type declarator ";")* "}")?
//! declarator   ::= "*"* identifier ("[" number? "]")*
//! function     ::= base_type "*"* identifier "(" params ")" (block | ";")
//! initializer  ::= expression | string | "{" initializer ("," initializer)* ","? "}"
//! ```
//!
//! All parsing methods are implemented as `pub(crate)` methods on the [`Parser`] struct.

use crate::error::CompileError;
use crate::parser::ast::*;
use crate::parser::lexer::TokenKind;
use crate::parser::parse::Parser;

/// Objects must be addressable with a 32-bit frame displacement
const MAX_OBJECT_SIZE: usize = i32::MAX as usize;

/// The whole frame, rounded up to 16 bytes, must fit the same displacement
const MAX_FRAME_SIZE: usize = MAX_OBJECT_SIZE & !15;

/// A name bound to a fully wrapped type
pub(crate) struct Declarator {
    pub name: String,
    pub ty: TypeRef,
    pub location: SourceLocation,
}

/// Initializer as written, before desugaring against the target type
#[derive(Debug)]
enum Initializer {
    Expr(Node),
    Str(Vec<u8>, SourceLocation),
    List(Vec<Initializer>, SourceLocation),
}

impl Initializer {
    fn location(&self) -> SourceLocation {
        match self {
            Initializer::Expr(node) => node.location,
            Initializer::Str(_, loc) | Initializer::List(_, loc) => *loc,
        }
    }

    /// Element count used to size an array declared without one
    fn element_count(&self) -> Option<usize> {
        match self {
            Initializer::Expr(_) => None,
            Initializer::Str(bytes, _) => Some(bytes.len() + 1),
            Initializer::List(items, _) => Some(items.len()),
        }
    }
}

impl Parser {
    /// Parse one top-level declaration: struct, function, or global variables
    pub(crate) fn parse_top_level_declaration(&mut self) -> Result<(), CompileError> {
        let base = self.parse_base_type()?;

        // `struct Tag { ... };` declares only the tag
        if self.match_token(";") {
            return Ok(());
        }

        let first = self.parse_declarator(&base)?;
        if self.check("(") {
            return self.parse_function(first);
        }

        let mut declarator = first;
        loop {
            self.parse_global_variable(declarator)?;
            if !self.match_token(",") {
                break;
            }
            declarator = self.parse_declarator(&base)?;
        }

        self.expect(";", "after global declaration")
    }

    /// Parse a base type keyword or struct type
    pub(crate) fn parse_base_type(&mut self) -> Result<TypeRef, CompileError> {
        let ty = if self.match_token("int") {
            Type::int()
        } else if self.match_token("char") {
            Type::char()
        } else if self.match_token("short") {
            Type::short()
        } else if self.match_token("long") {
            Type::long()
        } else if self.match_token("void") {
            Type::void()
        } else if self.match_token("struct") {
            return self.parse_struct_type();
        } else {
            return Err(self.error_here(format!("Expected type, found {}", self.peek())));
        };
        Ok(ty)
    }

    /// Parse the rest of a struct type after the `struct` keyword
    fn parse_struct_type(&mut self) -> Result<TypeRef, CompileError> {
        let location = self.previous_location();
        let tag = if self.peek().kind == TokenKind::Ident {
            Some(self.expect_identifier()?.0)
        } else {
            None
        };

        if !self.match_token("{") {
            let Some(name) = tag else {
                return Err(self.error_here("Expected struct tag or '{' after 'struct'"));
            };
            return self.scopes.lookup_tag(&name).ok_or_else(|| {
                CompileError::declaration(format!("undeclared struct tag '{}'", name), location)
            });
        }

        let mut fields = Vec::new();
        while !self.match_token("}") {
            if self.is_at_end() {
                return Err(self.error_here("Expected '}' after struct members"));
            }
            let base = self.parse_base_type()?;
            loop {
                let member = self.parse_declarator(&base)?;
                self.check_object_type(&member)?;
                fields.push((member.name, member.ty));
                if !self.match_token(",") {
                    break;
                }
            }
            self.expect(";", "after struct member")?;
        }

        let id = self.next_struct_id();
        let layout = StructLayout::new(id, tag.clone(), fields).map_err(|name| {
            CompileError::declaration(format!("duplicate member '{}'", name), location)
        })?;
        let ty = Type::struct_of(layout);

        if let Some(name) = tag {
            if !self.scopes.declare_tag(&name, ty.clone()) {
                return Err(CompileError::declaration(
                    format!("redefinition of 'struct {}'", name),
                    location,
                ));
            }
        }
        Ok(ty)
    }

    /// Parse `*`s, a name, and array dimensions
    pub(crate) fn parse_declarator(&mut self, base: &TypeRef) -> Result<Declarator, CompileError> {
        let mut ty = base.clone();
        while self.match_token("*") {
            ty = Type::pointer_to(&ty);
        }

        let (name, location) = self.expect_identifier()?;
        let ty = self.parse_array_dimensions(ty)?;
        Ok(Declarator { name, ty, location })
    }

    /// Parse a type name without a declared identifier, as in `sizeof(int *)`
    pub(crate) fn parse_type_name(&mut self) -> Result<TypeRef, CompileError> {
        let mut ty = self.parse_base_type()?;
        while self.match_token("*") {
            ty = Type::pointer_to(&ty);
        }
        self.parse_array_dimensions(ty)
    }

    /// Wrap `ty` in the bracketed dimensions that follow. Dimensions are
    /// written outermost first; only the outermost may be left empty.
    fn parse_array_dimensions(&mut self, ty: TypeRef) -> Result<TypeRef, CompileError> {
        let mut dims = Vec::new();
        while self.match_token("[") {
            let location = self.previous_location();
            if self.match_token("]") {
                dims.push((None, location));
                continue;
            }
            let n = self.expect_number()?;
            if n < 0 {
                return Err(CompileError::declaration("array size is negative", location));
            }
            dims.push((Some(n as usize), location));
            self.expect("]", "after array size")?;
        }

        let mut ty = ty;
        for (i, (len, location)) in dims.into_iter().enumerate().rev() {
            if ty.is_void() {
                return Err(CompileError::declaration("array of void", location));
            }
            if len.is_none() && i > 0 {
                return Err(CompileError::declaration(
                    "only the first array dimension may be omitted",
                    location,
                ));
            }
            let too_large = match len {
                Some(n) => ty
                    .size
                    .checked_mul(n)
                    .map_or(true, |size| size > MAX_OBJECT_SIZE),
                None => false,
            };
            if too_large {
                return Err(CompileError::declaration("array is too large", location));
            }
            ty = Type::array_of(&ty, len);
        }
        Ok(ty)
    }

    /// Reject types no object can have
    fn check_object_type(&self, decl: &Declarator) -> Result<(), CompileError> {
        if decl.ty.is_void() {
            return Err(CompileError::declaration(
                format!("variable '{}' declared void", decl.name),
                decl.location,
            ));
        }
        Ok(())
    }

    /// Reject a function whose locals no longer fit in one stack frame
    fn check_frame_size(&self, location: SourceLocation) -> Result<(), CompileError> {
        let total = self
            .locals
            .iter()
            .flatten()
            .fold(0usize, |acc, &id| acc.saturating_add(self.program.var(id).ty.size));
        if total > MAX_FRAME_SIZE {
            return Err(CompileError::declaration(
                format!("stack frame is too large ({} bytes of locals)", total),
                location,
            ));
        }
        Ok(())
    }

    // ===== Functions =====

    fn parse_function(&mut self, decl: Declarator) -> Result<(), CompileError> {
        let Declarator {
            name,
            ty: return_ty,
            location,
        } = decl;
        if return_ty.is_array() || return_ty.is_struct() {
            return Err(CompileError::declaration(
                format!("function '{}' cannot return '{}'", name, return_ty),
                location,
            ));
        }

        self.scopes.enter_scope();
        self.locals = Some(Vec::new());
        let result = self.parse_function_rest(name, return_ty, location);
        self.locals = None;
        self.scopes.leave_scope();
        result
    }

    fn parse_function_rest(
        &mut self,
        name: String,
        return_ty: TypeRef,
        location: SourceLocation,
    ) -> Result<(), CompileError> {
        self.expect("(", "after function name")?;
        let (param_decls, variadic) = self.parse_parameter_list()?;

        let mut params = Vec::with_capacity(param_decls.len());
        for param in param_decls {
            params.push(self.declare_local(&param.name, param.ty, param.location)?);
        }
        self.check_frame_size(location)?;

        let func = Func {
            name: name.clone(),
            return_ty,
            params,
            locals: self.locals.clone().unwrap_or_default(),
            variadic,
            body: None,
            location,
        };

        let is_definition = !self.match_token(";");
        self.register_function(func, is_definition)?;
        if !is_definition {
            return Ok(());
        }

        self.expect("{", "before function body")?;
        let body_location = self.previous_location();
        let items = self.parse_compound_items()?;
        let body = Node::new(NodeKind::Block(items), body_location);

        let locals = self.locals.take().unwrap_or_default();
        tracing::trace!(function = %name, locals = locals.len(), "parsed function body");
        if let Some(func) = self.program.function_mut(&name) {
            func.locals = locals;
            func.body = Some(body);
        }
        Ok(())
    }

    /// Parse parameters up to and including `)`
    fn parse_parameter_list(&mut self) -> Result<(Vec<Declarator>, bool), CompileError> {
        let mut params = Vec::new();

        if self.match_token(")") {
            return Ok((params, false));
        }
        if self.check("void") && self.check_ahead(1, ")") {
            self.advance();
            self.advance();
            return Ok((params, false));
        }

        let mut variadic = false;
        loop {
            if self.match_token("...") {
                variadic = true;
                break;
            }

            let base = self.parse_base_type()?;
            let mut param = self.parse_declarator(&base)?;
            self.check_object_type(&param)?;
            if param.ty.is_struct() {
                return Err(CompileError::declaration(
                    format!("struct parameter '{}' is not supported", param.name),
                    param.location,
                ));
            }
            // Array parameters are pointers to their element type
            if param.ty.is_array() {
                if let Some(element) = param.ty.base().cloned() {
                    param.ty = Type::pointer_to(&element);
                }
            }
            params.push(param);

            if !self.match_token(",") {
                break;
            }
        }

        self.expect(")", "after parameters")?;
        Ok((params, variadic))
    }

    /// Record a prototype or definition, checking it against any earlier
    /// declaration of the same name.
    fn register_function(&mut self, func: Func, is_definition: bool) -> Result<(), CompileError> {
        if self.scopes.lookup_global_var(&func.name).is_some() {
            return Err(CompileError::declaration(
                format!("'{}' redeclared as a function", func.name),
                func.location,
            ));
        }

        let param_types: Vec<TypeRef> = func
            .params
            .iter()
            .map(|&id| self.program.var(id).ty.clone())
            .collect();

        let Some(existing) = self.program.function(&func.name) else {
            let mut func = func;
            if !is_definition {
                func.locals.clear();
            }
            self.program.add_function(func);
            return Ok(());
        };

        let existing_types: Vec<TypeRef> = existing
            .params
            .iter()
            .map(|&id| self.program.var(id).ty.clone())
            .collect();
        if existing.return_ty != func.return_ty
            || existing_types != param_types
            || existing.variadic != func.variadic
        {
            return Err(CompileError::declaration(
                format!("conflicting types for '{}'", func.name),
                func.location,
            ));
        }

        if is_definition {
            if existing.body.is_some() {
                return Err(CompileError::declaration(
                    format!("redefinition of '{}'", func.name),
                    func.location,
                ));
            }
            if let Some(slot) = self.program.function_mut(&func.name) {
                // Placeholder body marks the function as defined while its
                // own body is parsed; the real body replaces it afterwards.
                slot.params = func.params;
                slot.location = func.location;
                slot.body = Some(Node::new(NodeKind::Block(Vec::new()), func.location));
            }
        }
        Ok(())
    }

    // ===== Variables =====

    fn parse_global_variable(&mut self, decl: Declarator) -> Result<(), CompileError> {
        self.check_object_type(&decl)?;
        if self.program.function(&decl.name).is_some() {
            return Err(CompileError::declaration(
                format!("function '{}' redeclared as a variable", decl.name),
                decl.location,
            ));
        }

        let init = if self.match_token("=") {
            Some(self.parse_initializer()?)
        } else {
            None
        };

        let mut ty = decl.ty.clone();
        if ty.is_incomplete_array() {
            let count = init.as_ref().and_then(Initializer::element_count);
            let (Some(count), Some(base)) = (count, ty.base().cloned()) else {
                return Err(CompileError::declaration(
                    format!("array size missing in '{}'", decl.name),
                    decl.location,
                ));
            };
            ty = Type::array_of(&base, Some(count));
        }

        let payload = match &init {
            Some(init) => {
                let mut bytes = Vec::with_capacity(ty.size);
                self.global_payload(&ty, init, &mut bytes)?;
                Some(bytes)
            }
            None => None,
        };

        if let Some(id) = self.scopes.lookup_var_innermost(&decl.name) {
            let existing = self.program.var(id);
            if existing.ty != ty {
                return Err(CompileError::declaration(
                    format!("conflicting types for global '{}'", decl.name),
                    decl.location,
                ));
            }
            let already_initialized = matches!(existing.storage, Storage::Global { init: Some(_) });
            if payload.is_some() {
                if already_initialized {
                    return Err(CompileError::declaration(
                        format!("redefinition of '{}'", decl.name),
                        decl.location,
                    ));
                }
                self.program.var_mut(id).storage = Storage::Global { init: payload };
            }
            return Ok(());
        }

        let id = self.program.add_var(Var {
            name: decl.name.clone(),
            ty,
            storage: Storage::Global { init: payload },
        });
        if !self.scopes.declare_var(&decl.name, id) {
            return Err(CompileError::declaration(
                format!("redeclaration of '{}'", decl.name),
                decl.location,
            ));
        }
        self.program.globals.push(id);
        Ok(())
    }

    /// Parse a local declaration into a block of initializing assignments
    pub(crate) fn parse_local_declaration(&mut self) -> Result<Node, CompileError> {
        let location = self.current_location();
        let base = self.parse_base_type()?;
        let mut stmts = Vec::new();

        if self.match_token(";") {
            return Ok(Node::new(NodeKind::Block(stmts), location));
        }

        loop {
            let decl = self.parse_declarator(&base)?;
            let decl_location = decl.location;
            self.check_object_type(&decl)?;

            if self.match_token("=") {
                let id = self.declare_local(&decl.name, decl.ty.clone(), decl.location)?;
                let init = self.parse_initializer()?;

                let mut ty = decl.ty.clone();
                if ty.is_incomplete_array() {
                    if let (Some(count), Some(base)) = (init.element_count(), ty.base().cloned()) {
                        ty = Type::array_of(&base, Some(count));
                        self.program.var_mut(id).ty = ty.clone();
                    }
                }

                let target = Node::new(NodeKind::Var(id), decl.location);
                self.desugar_initializer(target, &ty, init, &mut stmts)?;
            } else {
                if decl.ty.is_incomplete_array() {
                    return Err(CompileError::declaration(
                        format!("array size missing in '{}'", decl.name),
                        decl.location,
                    ));
                }
                self.declare_local(&decl.name, decl.ty, decl.location)?;
            }
            self.check_frame_size(decl_location)?;

            if !self.match_token(",") {
                break;
            }
        }

        self.expect(";", "after variable declaration")?;
        Ok(Node::new(NodeKind::Block(stmts), location))
    }

    // ===== Initializers =====

    fn parse_initializer(&mut self) -> Result<Initializer, CompileError> {
        let location = self.current_location();

        if self.match_token("{") {
            let mut items = Vec::new();
            while !self.match_token("}") {
                items.push(self.parse_initializer()?);
                if !self.match_token(",") {
                    self.expect("}", "after initializer list")?;
                    break;
                }
            }
            return Ok(Initializer::List(items, location));
        }

        // A lone string literal may initialize an array element by element
        let lone_string = [",", ";", "}"].iter().any(|end| self.check_ahead(1, end));
        if lone_string {
            if let TokenKind::Str(bytes) = self.peek().kind.clone() {
                self.advance();
                return Ok(Initializer::Str(bytes, location));
            }
        }

        Ok(Initializer::Expr(self.parse_assignment()?))
    }

    /// Expand `init` into assignment statements that store into `target`.
    /// Array and struct elements without an initializer are zero-filled.
    fn desugar_initializer(
        &mut self,
        target: Node,
        ty: &TypeRef,
        init: Initializer,
        out: &mut Vec<Node>,
    ) -> Result<(), CompileError> {
        match (&ty.kind, init) {
            (TypeKind::Array { base, len }, Initializer::Str(bytes, location)) => {
                if !base.is_integer() {
                    return Err(CompileError::declaration(
                        "string initializer for an array of non-integer type",
                        location,
                    ));
                }
                let len = len.unwrap_or(0);
                let mut elements = bytes;
                elements.push(0);
                if elements.len() == len + 1 {
                    // the terminator may be dropped when the array is exactly full
                    elements.pop();
                }
                if elements.len() > len {
                    return Err(CompileError::declaration(
                        "initializer string is too long",
                        location,
                    ));
                }
                for i in 0..len {
                    let element = index_node(&target, i, location);
                    match elements.get(i) {
                        Some(&b) => {
                            let value = Node::num(b as i8 as i64, location);
                            out.push(Node::expr_stmt(Node::assign(element, value, location)));
                        }
                        None => zero_fill(element, base, out),
                    }
                }
                Ok(())
            }
            (TypeKind::Array { base, len }, Initializer::List(items, location)) => {
                let len = len.unwrap_or(0);
                if items.len() > len {
                    return Err(CompileError::declaration(
                        "excess elements in array initializer",
                        location,
                    ));
                }
                let mut items = items.into_iter();
                for i in 0..len {
                    let element = index_node(&target, i, location);
                    match items.next() {
                        Some(item) => self.desugar_initializer(element, base, item, out)?,
                        None => zero_fill(element, base, out),
                    }
                }
                Ok(())
            }
            (TypeKind::Array { .. }, Initializer::Expr(node)) => Err(CompileError::declaration(
                "array initializer must be a brace list or a string literal",
                node.location,
            )),
            (TypeKind::Struct(layout), Initializer::List(items, location)) => {
                if items.len() > layout.members.len() {
                    return Err(CompileError::declaration(
                        "excess elements in struct initializer",
                        location,
                    ));
                }
                let mut items = items.into_iter();
                for member in &layout.members {
                    let field = member_node(&target, &member.name, location);
                    match items.next() {
                        Some(item) => self.desugar_initializer(field, &member.ty, item, out)?,
                        None => zero_fill(field, &member.ty, out),
                    }
                }
                Ok(())
            }
            (TypeKind::Struct(_), init) => Err(CompileError::declaration(
                "struct initializer must be a brace list",
                init.location(),
            )),
            (_, Initializer::List(mut items, location)) => {
                if items.len() != 1 {
                    return Err(CompileError::declaration(
                        "scalar initializer must have exactly one element",
                        location,
                    ));
                }
                let item = items.remove(0);
                self.desugar_initializer(target, ty, item, out)
            }
            (_, Initializer::Str(bytes, location)) => {
                let id = self.string_literal_var(bytes);
                let value = Node::new(NodeKind::Var(id), location);
                out.push(Node::expr_stmt(Node::assign(target, value, location)));
                Ok(())
            }
            (_, Initializer::Expr(value)) => {
                let location = value.location;
                out.push(Node::expr_stmt(Node::assign(target, value, location)));
                Ok(())
            }
        }
    }

    /// Serialize a global initializer into exactly `ty.size` bytes
    fn global_payload(
        &self,
        ty: &TypeRef,
        init: &Initializer,
        out: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        match (&ty.kind, init) {
            (TypeKind::Array { base, len }, Initializer::Str(bytes, location))
                if base.is_integer() =>
            {
                let len = len.unwrap_or(0);
                if bytes.len() > len {
                    return Err(CompileError::declaration(
                        "initializer string is too long",
                        *location,
                    ));
                }
                for i in 0..len {
                    let value = bytes.get(i).map(|&b| b as i8 as i64).unwrap_or(0);
                    push_integer(out, value, base.size);
                }
                Ok(())
            }
            (TypeKind::Array { base, len }, Initializer::List(items, location)) => {
                let len = len.unwrap_or(0);
                if items.len() > len {
                    return Err(CompileError::declaration(
                        "excess elements in array initializer",
                        *location,
                    ));
                }
                for item in items {
                    self.global_payload(base, item, out)?;
                }
                out.resize(out.len() + base.size * (len - items.len()), 0);
                Ok(())
            }
            (TypeKind::Struct(layout), Initializer::List(items, location)) => {
                if items.len() > layout.members.len() {
                    return Err(CompileError::declaration(
                        "excess elements in struct initializer",
                        *location,
                    ));
                }
                for (i, member) in layout.members.iter().enumerate() {
                    match items.get(i) {
                        Some(item) => self.global_payload(&member.ty, item, out)?,
                        None => out.resize(out.len() + member.ty.size, 0),
                    }
                }
                Ok(())
            }
            (_, Initializer::List(items, location)) if ty.is_integer() => match items.as_slice() {
                [item] => self.global_payload(ty, item, out),
                _ => Err(CompileError::declaration(
                    "scalar initializer must have exactly one element",
                    *location,
                )),
            },
            (_, Initializer::Expr(node)) if ty.is_integer() => {
                let value = const_value(node).ok_or_else(|| {
                    CompileError::declaration(
                        "global initializer must be an integer constant",
                        node.location,
                    )
                })?;
                push_integer(out, value, ty.size);
                Ok(())
            }
            (_, init) => Err(CompileError::declaration(
                format!("unsupported initializer for global of type '{}'", ty),
                init.location(),
            )),
        }
    }
}

/// `target[i]`, spelled the way the parser spells subscripts
fn index_node(target: &Node, i: usize, location: SourceLocation) -> Node {
    let address = Node::binary(BinOp::Add, target.clone(), Node::num(i as i64, location), location);
    Node::deref(address, location)
}

fn member_node(target: &Node, name: &str, location: SourceLocation) -> Node {
    Node::new(
        NodeKind::Member {
            base: Box::new(target.clone()),
            name: name.to_string(),
            member: None,
        },
        location,
    )
}

/// Append assignments storing zero into every scalar inside `target`
fn zero_fill(target: Node, ty: &TypeRef, out: &mut Vec<Node>) {
    let location = target.location;
    match &ty.kind {
        TypeKind::Array { base, len } => {
            for i in 0..len.unwrap_or(0) {
                zero_fill(index_node(&target, i, location), base, out);
            }
        }
        TypeKind::Struct(layout) => {
            for member in &layout.members {
                zero_fill(member_node(&target, &member.name, location), &member.ty, out);
            }
        }
        _ => {
            let zero = Node::num(0, location);
            out.push(Node::expr_stmt(Node::assign(target, zero, location)));
        }
    }
}

/// Fold an integer constant expression
fn const_value(node: &Node) -> Option<i64> {
    match &node.kind {
        NodeKind::Num(n) => Some(*n),
        NodeKind::Binary { op, lhs, rhs } => {
            let (l, r) = (const_value(lhs)?, const_value(rhs)?);
            match op {
                BinOp::Add => Some(l.wrapping_add(r)),
                BinOp::Sub => Some(l.wrapping_sub(r)),
                BinOp::Mul => Some(l.wrapping_mul(r)),
                BinOp::Div if r != 0 => Some(l.wrapping_div(r)),
                BinOp::Mod if r != 0 => Some(l.wrapping_rem(r)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Little-endian, truncated to `size` bytes
fn push_integer(out: &mut Vec<u8>, value: i64, size: usize) {
    out.extend_from_slice(&value.to_le_bytes()[..size.min(8)]);
}
