//! Statement code generation
//!
//! Statements leave the operand stack exactly as deep as they found it; any
//! difference is reported as an internal error.

use super::{Codegen, LoopLabels};
use crate::error::CompileError;
use crate::parser::ast::*;

impl Codegen<'_> {
    pub(super) fn stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        let depth = self.depth;
        self.stmt_inner(node)?;
        if self.depth != depth {
            return Err(CompileError::codegen(format!(
                "operand stack imbalance after statement at {} ({} slots before, {} after)",
                node.location, depth, self.depth
            )));
        }
        Ok(())
    }

    fn stmt_inner(&mut self, node: &Node) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::ExprStmt(expr) => {
                self.expr(expr)?;
                self.pop("%rax")
            }

            NodeKind::Return(expr) => {
                if let Some(expr) = expr {
                    self.expr(expr)?;
                    self.pop("%rax")?;
                }
                self.emit(&format!("  jmp {}", self.return_label));
                Ok(())
            }

            NodeKind::Block(items) => {
                for item in items {
                    self.stmt(item)?;
                }
                Ok(())
            }

            NodeKind::If { cond, then, els } => {
                let n = self.next_label();
                self.condition(cond, &format!(".L.else.{}", n))?;
                self.stmt(then)?;
                self.emit(&format!("  jmp .L.end.{}", n));
                self.emit(&format!(".L.else.{}:", n));
                self.stmt(els)?;
                self.emit(&format!(".L.end.{}:", n));
                Ok(())
            }

            NodeKind::While { cond, body } => {
                let n = self.next_label();
                self.emit(&format!(".L.begin.{}:", n));
                self.condition(cond, &format!(".L.end.{}", n))?;
                self.loop_body(n, body)?;
                self.emit(&format!(".L.continue.{}:", n));
                self.emit(&format!("  jmp .L.begin.{}", n));
                self.emit(&format!(".L.end.{}:", n));
                Ok(())
            }

            NodeKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let n = self.next_label();
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                self.emit(&format!(".L.begin.{}:", n));
                self.condition(cond, &format!(".L.end.{}", n))?;
                self.loop_body(n, body)?;
                self.emit(&format!(".L.continue.{}:", n));
                if let Some(update) = update {
                    self.stmt(update)?;
                }
                self.emit(&format!("  jmp .L.begin.{}", n));
                self.emit(&format!(".L.end.{}:", n));
                Ok(())
            }

            NodeKind::Break => {
                let labels = self
                    .loops
                    .last()
                    .cloned()
                    .ok_or_else(|| CompileError::codegen("'break' outside of a loop"))?;
                self.jump_out(&labels.end, labels.depth)
            }

            NodeKind::Continue => {
                let labels = self
                    .loops
                    .last()
                    .cloned()
                    .ok_or_else(|| CompileError::codegen("'continue' outside of a loop"))?;
                self.jump_out(&labels.next, labels.depth)
            }

            NodeKind::Empty => Ok(()),

            _ => Err(CompileError::codegen(format!(
                "expression used as a statement at {}",
                node.location
            ))),
        }
    }

    /// Evaluate `cond` and jump to `target` when it is zero
    fn condition(&mut self, cond: &Node, target: &str) -> Result<(), CompileError> {
        self.expr(cond)?;
        self.pop("%rax")?;
        self.emit("  cmp $0, %rax");
        self.emit(&format!("  je {}", target));
        Ok(())
    }

    /// Jump to a loop target, dropping operand slots pushed since the loop
    /// was entered. Only a statement expression can leave such slots live.
    fn jump_out(&mut self, target: &str, depth: usize) -> Result<(), CompileError> {
        let extra = self.depth.checked_sub(depth).ok_or_else(|| {
            CompileError::codegen(format!("jump to {} from a shallower stack", target))
        })?;
        if extra > 0 {
            self.emit(&format!("  add ${}, %rsp", extra * 8));
        }
        self.emit(&format!("  jmp {}", target));
        Ok(())
    }

    fn loop_body(&mut self, n: usize, body: &Node) -> Result<(), CompileError> {
        self.loops.push(LoopLabels {
            end: format!(".L.end.{}", n),
            next: format!(".L.continue.{}", n),
            depth: self.depth,
        });
        let result = self.stmt(body);
        self.loops.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::generate;
    use crate::error::CompileError;
    use crate::parser::ast::*;
    use crate::parser::Parser;
    use crate::resolver::resolve_program;

    fn compile(source: &str) -> String {
        let program = Parser::new(source).unwrap().parse_program().unwrap();
        generate(&resolve_program(program).unwrap()).unwrap()
    }

    #[test]
    fn test_break_and_continue_target_innermost_loop() {
        let asm = compile(
            "int main() { int i; int j;
               for (i = 0; i < 3; i++) {
                 while (1) { break; }
                 continue;
               }
               return 0; }",
        );

        // the for loop takes label 1, the while loop label 2
        assert!(asm.contains(".L.begin.2:"));
        let while_body = asm.find(".L.begin.2:").unwrap();
        let while_end = asm.find(".L.end.2:").unwrap();
        assert!(asm[while_body..while_end].contains("  jmp .L.end.2"));
        assert!(asm[while_end..].contains("  jmp .L.continue.1"));
    }

    #[test]
    fn test_if_else_labels() {
        let asm = compile("int main() { if (1) return 2; else return 3; }");
        assert!(asm.contains("  je .L.else.1"));
        assert!(asm.contains("  jmp .L.end.1\n.L.else.1:"));
        assert!(asm.contains(".L.end.1:"));
    }

    #[test]
    fn test_stack_stays_balanced_across_statements() {
        // straight-line code: every push has a matching pop
        let source = "int f(int a, int b) { return a * b; }
                      int main() { int x; int a[2]; x = 1; f(1, 2);
                        a[1] = x * 2 + ({ int y = 3; y; }); return a[1] - x; }";
        let asm = compile(source);
        let pushes = asm.lines().filter(|l| l.starts_with("  push ")).count();
        let pops = asm.lines().filter(|l| l.starts_with("  pop ")).count();
        assert!(pushes > 10);
        assert_eq!(pushes, pops);
    }

    #[test]
    fn test_jumps_out_of_statement_expression_drop_live_slots() {
        let asm = compile(
            "int main() { int s = 0;
               for (int i = 0; i < 4; i++) { s = s + ({ if (i % 2) continue; 1; }); }
               while (1) { s = s + ({ break; 1; }); }
               return s; }",
        );

        // `&s` and the loaded `s` are live when the jumps are taken
        assert!(asm.contains("  add $16, %rsp\n  jmp .L.continue.1\n"));
        assert!(asm.contains("  add $16, %rsp\n  jmp .L.end.3\n"));
    }

    #[test]
    fn test_plain_break_adjusts_nothing() {
        let asm = compile("int main() { while (1) { break; } return 0; }");
        assert!(asm.contains("  je .L.end.1\n  jmp .L.end.1\n"));
    }

    #[test]
    fn test_break_without_loop_is_codegen_error() {
        // the parser rejects this, so build the tree by hand
        let mut program = Program::new();
        let loc = SourceLocation::default();
        program.add_function(Func {
            name: "main".to_string(),
            return_ty: Type::int(),
            params: Vec::new(),
            locals: Vec::new(),
            variadic: false,
            body: Some(Node::new(
                NodeKind::Block(vec![Node::new(NodeKind::Break, loc)]),
                loc,
            )),
            location: loc,
        });

        let err = generate(&program).unwrap_err();
        assert!(matches!(err, CompileError::Codegen { .. }));
    }
}
