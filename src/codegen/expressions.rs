//! Expression code generation
//!
//! Each method leaves the operand stack one slot deeper than it found it.

use super::{Codegen, ARG_REGS_64};
use crate::error::CompileError;
use crate::parser::ast::*;

impl Codegen<'_> {
    /// Evaluate `node` and push its value
    pub(super) fn expr(&mut self, node: &Node) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Num(n) => {
                if i32::try_from(*n).is_ok() {
                    self.emit(&format!("  mov ${}, %rax", n));
                } else {
                    self.emit(&format!("  movabs ${}, %rax", n));
                }
                self.push("%rax");
                Ok(())
            }

            NodeKind::Var(_) | NodeKind::Member { .. } | NodeKind::Deref(_) => {
                self.addr(node)?;
                self.load(node_type(node)?)
            }

            NodeKind::Addr(inner) => self.addr(inner),

            NodeKind::Assign { lhs, rhs } => {
                self.addr(lhs)?;
                self.expr(rhs)?;
                self.store(node_type(lhs)?)
            }

            NodeKind::Binary {
                op: op @ (BinOp::LogAnd | BinOp::LogOr),
                lhs,
                rhs,
            } => self.logical(*op, lhs, rhs),

            NodeKind::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.pop("%rdi")?;
                self.pop("%rax")?;
                self.binary(*op);
                self.push("%rax");
                Ok(())
            }

            NodeKind::Not(inner) => {
                self.expr(inner)?;
                self.pop("%rax")?;
                self.emit("  cmp $0, %rax");
                self.emit("  sete %al");
                self.emit("  movzb %al, %rax");
                self.push("%rax");
                Ok(())
            }

            NodeKind::Ternary { cond, then, els } => {
                let n = self.next_label();
                self.expr(cond)?;
                self.pop("%rax")?;
                self.emit("  cmp $0, %rax");
                self.emit(&format!("  je .L.else.{}", n));
                self.expr(then)?;
                self.pop("%rax")?;
                self.emit(&format!("  jmp .L.end.{}", n));
                self.emit(&format!(".L.else.{}:", n));
                self.expr(els)?;
                self.pop("%rax")?;
                self.emit(&format!(".L.end.{}:", n));
                self.push("%rax");
                Ok(())
            }

            NodeKind::Call { name, args } => self.call(name, args, node_type(node)?),

            NodeKind::StmtExpr(items) => {
                let Some((last, rest)) = items.split_last() else {
                    return Err(CompileError::codegen("empty statement expression"));
                };
                for item in rest {
                    self.stmt(item)?;
                }
                match &last.kind {
                    NodeKind::ExprStmt(expr) => self.expr(expr),
                    _ => Err(CompileError::codegen(
                        "statement expression does not end with an expression",
                    )),
                }
            }

            NodeKind::Sizeof(_) => Err(CompileError::codegen(format!(
                "unresolved sizeof at {}",
                node.location
            ))),

            _ => Err(CompileError::codegen(format!(
                "statement used as an expression at {}",
                node.location
            ))),
        }
    }

    /// Push the address of a referable expression
    pub(super) fn addr(&mut self, node: &Node) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Var(id) => {
                let vars = self.vars;
                let var = &vars[id.0];
                if var.is_local() {
                    let offset = self.local_offset(*id)?;
                    self.emit(&format!("  lea -{}(%rbp), %rax", offset));
                } else {
                    self.emit(&format!("  lea {}(%rip), %rax", var.name));
                }
                self.push("%rax");
                Ok(())
            }

            NodeKind::Deref(inner) => self.expr(inner),

            NodeKind::Member { base, member, name } => {
                let member = member.as_ref().ok_or_else(|| {
                    CompileError::codegen(format!("member '{}' was not resolved", name))
                })?;
                self.addr(base)?;
                self.pop("%rax")?;
                self.emit(&format!("  add ${}, %rax", member.offset));
                self.push("%rax");
                Ok(())
            }

            _ => Err(CompileError::codegen(format!(
                "expression at {} is not an lvalue",
                node.location
            ))),
        }
    }

    /// Replace the address on top of the stack with the value it points at.
    /// Arrays and structs are left as addresses.
    fn load(&mut self, ty: &TypeRef) -> Result<(), CompileError> {
        if ty.is_array() || ty.is_struct() {
            return Ok(());
        }

        let load = match ty.size {
            1 => "  movsbq (%rax), %rax",
            2 => "  movswq (%rax), %rax",
            4 => "  movslq (%rax), %rax",
            8 => "  mov (%rax), %rax",
            size => {
                return Err(CompileError::codegen(format!(
                    "cannot load a value of type '{}' ({} bytes)",
                    ty, size
                )))
            }
        };
        self.pop("%rax")?;
        self.emit(load);
        self.push("%rax");
        Ok(())
    }

    /// Pop a value and an address, store the value, and push it back
    fn store(&mut self, ty: &TypeRef) -> Result<(), CompileError> {
        let store = match ty.size {
            1 => "  mov %dil, (%rax)",
            2 => "  mov %di, (%rax)",
            4 => "  mov %edi, (%rax)",
            8 => "  mov %rdi, (%rax)",
            size => {
                return Err(CompileError::codegen(format!(
                    "cannot store a value of type '{}' ({} bytes)",
                    ty, size
                )))
            }
        };
        self.pop("%rdi")?;
        self.pop("%rax")?;
        self.emit(store);
        self.push("%rdi");
        Ok(())
    }

    /// Combine `%rax` (left) and `%rdi` (right) into `%rax`
    fn binary(&mut self, op: BinOp) {
        match op {
            BinOp::Add => self.emit("  add %rdi, %rax"),
            BinOp::Sub => self.emit("  sub %rdi, %rax"),
            BinOp::Mul => self.emit("  imul %rdi, %rax"),
            BinOp::Div => {
                self.emit("  cqo");
                self.emit("  idiv %rdi");
            }
            BinOp::Mod => {
                self.emit("  cqo");
                self.emit("  idiv %rdi");
                self.emit("  mov %rdx, %rax");
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let set = match op {
                    BinOp::Eq => "sete",
                    BinOp::Ne => "setne",
                    BinOp::Lt => "setl",
                    BinOp::Le => "setle",
                    BinOp::Gt => "setg",
                    _ => "setge",
                };
                self.emit("  cmp %rdi, %rax");
                self.emit(&format!("  {} %al", set));
                self.emit("  movzb %al, %rax");
            }
            // Short-circuit operators never reach here
            BinOp::LogAnd | BinOp::LogOr => {}
        }
    }

    /// `&&` and `||`: the right operand is skipped once the result is known
    fn logical(&mut self, op: BinOp, lhs: &Node, rhs: &Node) -> Result<(), CompileError> {
        let n = self.next_label();
        let (short_jump, short_value, full_value) = if op == BinOp::LogAnd {
            ("je", 0, 1)
        } else {
            ("jne", 1, 0)
        };

        for operand in [lhs, rhs] {
            self.expr(operand)?;
            self.pop("%rax")?;
            self.emit("  cmp $0, %rax");
            self.emit(&format!("  {} .L.short.{}", short_jump, n));
        }
        self.emit(&format!("  mov ${}, %rax", full_value));
        self.emit(&format!("  jmp .L.end.{}", n));
        self.emit(&format!(".L.short.{}:", n));
        self.emit(&format!("  mov ${}, %rax", short_value));
        self.emit(&format!(".L.end.{}:", n));
        self.push("%rax");
        Ok(())
    }

    /// Evaluate arguments left to right, move them into registers, and call
    fn call(&mut self, name: &str, args: &[Node], ret: &TypeRef) -> Result<(), CompileError> {
        if args.len() > ARG_REGS_64.len() {
            return Err(CompileError::codegen(format!(
                "call to '{}' passes {} arguments",
                name,
                args.len()
            )));
        }

        for arg in args {
            self.expr(arg)?;
        }
        for reg in ARG_REGS_64[..args.len()].iter().rev() {
            self.pop(reg)?;
        }

        // %rsp is 16-byte aligned when no operand slots are live
        let misaligned = self.depth % 2 == 1;
        if misaligned {
            self.emit("  sub $8, %rsp");
        }
        self.emit("  mov $0, %eax");
        self.emit(&format!("  call {}", name));
        if misaligned {
            self.emit("  add $8, %rsp");
        }

        // Only the low bytes of a narrow return value are defined
        if ret.is_integer() {
            match ret.size {
                1 => self.emit("  movsbq %al, %rax"),
                2 => self.emit("  movswq %ax, %rax"),
                4 => self.emit("  movslq %eax, %rax"),
                _ => {}
            }
        }
        self.push("%rax");
        Ok(())
    }
}

fn node_type(node: &Node) -> Result<&TypeRef, CompileError> {
    node.ty.as_ref().ok_or_else(|| {
        CompileError::codegen(format!("expression at {} has no type", node.location))
    })
}

#[cfg(test)]
mod tests {
    use crate::codegen::generate;
    use crate::parser::Parser;
    use crate::resolver::resolve_program;

    fn compile(source: &str) -> String {
        let program = Parser::new(source).unwrap().parse_program().unwrap();
        generate(&resolve_program(program).unwrap()).unwrap()
    }

    #[test]
    fn test_loads_sign_extend_by_width() {
        let asm = compile("int main() { char c; short s; int i; long l; return c + s + i + l; }");

        assert!(asm.contains("movsbq (%rax), %rax"));
        assert!(asm.contains("movswq (%rax), %rax"));
        assert!(asm.contains("movslq (%rax), %rax"));
        assert!(asm.contains("  mov (%rax), %rax"));
    }

    #[test]
    fn test_store_width_follows_target() {
        let asm = compile("int main() { char c; c = 1; short s; s = 2; return 0; }");
        assert!(asm.contains("  mov %dil, (%rax)"));
        assert!(asm.contains("  mov %di, (%rax)"));
    }

    #[test]
    fn test_pointer_addition_is_scaled() {
        let asm = compile("int main() { long a[3]; return *(a + 2); }");
        assert!(asm.contains("  mov $8, %rax"));
        assert!(asm.contains("  imul %rdi, %rax"));
    }

    #[test]
    fn test_call_pops_arguments_in_reverse() {
        let asm = compile("int add(int a, int b) { return a + b; } int main() { return add(1, 2); }");
        let pops = asm.find("  pop %rsi").unwrap();
        let first = asm[pops..].find("  pop %rdi").unwrap();
        assert!(first > 0);
        assert!(asm.contains("  call add"));
    }

    #[test]
    fn test_call_aligns_stack() {
        // one live slot (the address of x) while calling f
        let asm = compile("int f() { return 1; } int main() { int x; x = f(); return x; }");
        assert!(asm.contains("  sub $8, %rsp\n  mov $0, %eax\n  call f\n  add $8, %rsp"));
        assert!(asm.contains("  call f\n  add $8, %rsp\n  movslq %eax, %rax\n"));
    }

    #[test]
    fn test_large_literal_uses_movabs() {
        let asm = compile("int main() { long x; x = 4294967296; return 0; }");
        assert!(asm.contains("  movabs $4294967296, %rax"));
    }

    #[test]
    fn test_member_address_adds_offset() {
        let asm = compile("int main() { struct { char a; int b; } s; s.b = 3; return s.b; }");
        assert!(asm.contains("  add $1, %rax"));
    }
}
