//! x86-64 code generation
//!
//! Walks the resolved tree and prints AT&T-syntax assembly for the System V
//! ABI. Expressions are compiled against an operand stack that lives on the
//! machine stack: every expression pushes exactly one 8-byte slot holding its
//! value, and every consumer pops exactly the slots it uses. `depth` tracks
//! the number of live slots so that imbalances are caught per statement and
//! calls can keep `%rsp` 16-byte aligned.
//!
//! Output layout:
//!
//! ```text
//!   .data            one label per global: literal bytes or zero fill
//!   .text            one .globl label per defined function
//! ```

mod expressions;
mod statements;

use crate::error::CompileError;
use crate::parser::ast::*;
use rustc_hash::FxHashMap;

/// Integer argument registers by width, in argument order
const ARG_REGS_64: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];
const ARG_REGS_32: [&str; 6] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];
const ARG_REGS_16: [&str; 6] = ["%di", "%si", "%dx", "%cx", "%r8w", "%r9w"];
const ARG_REGS_8: [&str; 6] = ["%dil", "%sil", "%dl", "%cl", "%r8b", "%r9b"];

/// Stack frame of one function
///
/// Locals are laid out back to back below `%rbp` in declaration order, with
/// no padding between them. A variable's offset is the running total of the
/// sizes up to and including it, so it lives at `-offset(%rbp)`.
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    offsets: FxHashMap<VarId, usize>,
    /// Bytes reserved below `%rbp`, rounded up to 16
    pub stack_size: usize,
}

impl FrameLayout {
    pub fn new(locals: &[VarId], vars: &[Var]) -> Self {
        let mut offsets = FxHashMap::default();
        let mut total = 0;
        for &id in locals {
            total += vars[id.0].ty.size;
            offsets.insert(id, total);
        }

        FrameLayout {
            offsets,
            stack_size: align_to(total, 16),
        }
    }

    pub fn offset(&self, id: VarId) -> Option<usize> {
        self.offsets.get(&id).copied()
    }
}

pub fn align_to(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

/// Jump targets of an enclosing loop
#[derive(Debug, Clone)]
struct LoopLabels {
    end: String,
    next: String,
    /// Operand stack depth at both targets
    depth: usize,
}

/// Assembly generator for one program
pub struct Codegen<'a> {
    vars: &'a [Var],
    output: String,
    /// Live operand stack slots
    depth: usize,
    label_count: usize,
    loops: Vec<LoopLabels>,
    frame: FrameLayout,
    return_label: String,
}

/// Generate the assembly text for a resolved program
pub fn generate(program: &Program) -> Result<String, CompileError> {
    let mut codegen = Codegen::new(&program.vars);
    codegen.emit_data(program);
    for func in &program.functions {
        if func.body.is_some() {
            codegen.emit_function(func)?;
        }
    }
    codegen.emit("  .section .note.GNU-stack,\"\",@progbits");
    Ok(codegen.output)
}

impl<'a> Codegen<'a> {
    pub fn new(vars: &'a [Var]) -> Self {
        Codegen {
            vars,
            output: String::new(),
            depth: 0,
            label_count: 0,
            loops: Vec::new(),
            frame: FrameLayout::default(),
            return_label: String::new(),
        }
    }

    fn emit_data(&mut self, program: &Program) {
        let vars = self.vars;
        self.emit("  .data");
        for &id in &program.globals {
            let var = &vars[id.0];
            if !var.name.starts_with(".L") {
                self.emit(&format!("  .globl {}", var.name));
            }
            self.emit(&format!("{}:", var.name));
            match &var.storage {
                Storage::Global { init: Some(bytes) } => {
                    for b in bytes {
                        self.emit(&format!("  .byte {}", b));
                    }
                }
                _ => self.emit(&format!("  .zero {}", var.ty.size)),
            }
        }
    }

    fn emit_function(&mut self, func: &Func) -> Result<(), CompileError> {
        let Some(body) = &func.body else {
            return Ok(());
        };

        self.frame = FrameLayout::new(&func.locals, self.vars);
        self.return_label = format!(".L.return.{}", func.name);
        self.depth = 0;
        tracing::debug!(function = %func.name, frame = self.frame.stack_size, "generating function");

        self.emit("  .text");
        self.emit(&format!("  .globl {}", func.name));
        self.emit(&format!("{}:", func.name));

        // Prologue
        self.emit("  push %rbp");
        self.emit("  mov %rsp, %rbp");
        self.emit(&format!("  sub ${}, %rsp", self.frame.stack_size));

        for (i, &param) in func.params.iter().enumerate() {
            self.spill_param(i, param)?;
        }

        self.stmt(body)?;

        // Falling off the end returns 0
        self.emit("  mov $0, %rax");
        self.emit(&format!("{}:", self.return_label));
        self.emit("  mov %rbp, %rsp");
        self.emit("  pop %rbp");
        self.emit("  ret");
        Ok(())
    }

    /// Store incoming argument `index` into its frame slot
    fn spill_param(&mut self, index: usize, param: VarId) -> Result<(), CompileError> {
        let vars = self.vars;
        let var = &vars[param.0];
        let regs = match var.ty.size {
            1 => &ARG_REGS_8,
            2 => &ARG_REGS_16,
            4 => &ARG_REGS_32,
            8 => &ARG_REGS_64,
            size => {
                return Err(CompileError::codegen(format!(
                    "parameter '{}' has unsupported size {}",
                    var.name, size
                )))
            }
        };
        let reg = regs.get(index).ok_or_else(|| {
            CompileError::codegen(format!("parameter '{}' is not passed in a register", var.name))
        })?;
        let offset = self.local_offset(param)?;
        self.emit(&format!("  mov {}, -{}(%rbp)", reg, offset));
        Ok(())
    }

    fn local_offset(&self, id: VarId) -> Result<usize, CompileError> {
        self.frame.offset(id).ok_or_else(|| {
            CompileError::codegen(format!(
                "variable '{}' has no stack slot",
                self.vars[id.0].name
            ))
        })
    }

    // ===== Emission helpers =====

    fn emit(&mut self, line: &str) {
        self.output.push_str(line);
        self.output.push('\n');
    }

    fn push(&mut self, reg: &str) {
        self.emit(&format!("  push {}", reg));
        self.depth += 1;
    }

    fn pop(&mut self, reg: &str) -> Result<(), CompileError> {
        self.depth = self
            .depth
            .checked_sub(1)
            .ok_or_else(|| CompileError::codegen("operand stack underflow"))?;
        self.emit(&format!("  pop {}", reg));
        Ok(())
    }

    fn next_label(&mut self) -> usize {
        self.label_count += 1;
        self.label_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::resolve_program;

    fn compile(source: &str) -> Result<String, CompileError> {
        let program = Parser::new(source)?.parse_program()?;
        let program = resolve_program(program)?;
        generate(&program)
    }

    #[test]
    fn test_frame_layout_accumulates_sizes() {
        let vars = vec![
            Var {
                name: "c".to_string(),
                ty: Type::char(),
                storage: Storage::Local,
            },
            Var {
                name: "x".to_string(),
                ty: Type::int(),
                storage: Storage::Local,
            },
            Var {
                name: "a".to_string(),
                ty: Type::array_of(&Type::long(), Some(2)),
                storage: Storage::Local,
            },
        ];
        let frame = FrameLayout::new(&[VarId(0), VarId(1), VarId(2)], &vars);

        assert_eq!(frame.offset(VarId(0)), Some(1));
        assert_eq!(frame.offset(VarId(1)), Some(5));
        assert_eq!(frame.offset(VarId(2)), Some(21));
        assert_eq!(frame.stack_size, 32);
    }

    #[test]
    fn test_function_prologue_and_epilogue() {
        let asm = compile("int main() { return 42; }").unwrap();

        assert!(asm.contains("  .globl main\nmain:\n  push %rbp\n  mov %rsp, %rbp\n"));
        assert!(asm.contains("  mov $42, %rax"));
        assert!(asm.contains("  jmp .L.return.main"));
        assert!(asm.contains(".L.return.main:\n  mov %rbp, %rsp\n  pop %rbp\n  ret"));
    }

    #[test]
    fn test_parameters_spilled_by_width() {
        let asm = compile("int f(char a, int b, long c, char *d) { return b; }").unwrap();

        assert!(asm.contains("  mov %dil, -1(%rbp)"));
        assert!(asm.contains("  mov %esi, -5(%rbp)"));
        assert!(asm.contains("  mov %rdx, -13(%rbp)"));
        assert!(asm.contains("  mov %rcx, -21(%rbp)"));
        assert!(asm.contains("  sub $32, %rsp"));
    }

    #[test]
    fn test_globals_in_data_segment() {
        let asm = compile("int g; char s[] = \"ok\"; int main() { return g; }").unwrap();

        assert!(asm.starts_with("  .data\n"));
        assert!(asm.contains("  .globl g\ng:\n  .zero 4\n"));
        assert!(asm.contains("s:\n  .byte 111\n  .byte 107\n  .byte 0\n"));
        assert!(asm.contains("  lea g(%rip), %rax"));
    }

    #[test]
    fn test_string_literals_are_local_labels() {
        let asm = compile("int main() { char *p = \"a\"; return 0; }").unwrap();

        assert!(asm.contains(".L..str.0:\n  .byte 97\n  .byte 0\n"));
        assert!(!asm.contains(".globl .L..str.0"));
    }

    #[test]
    fn test_prototypes_emit_no_code() {
        let asm = compile("int f(int x); int main() { return f(1); }").unwrap();

        assert!(!asm.contains("f:\n"));
        assert!(asm.contains("  call f"));
    }
}
