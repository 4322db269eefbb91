//! Property-based tests for type layout, pointer scaling and robustness
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Struct members are packed back to back in declaration order
//! 2. Pointer arithmetic scales by the pointee size for every scalar type
//! 3. Stack frames hold every local without overlap
//! 4. The compiler returns an error instead of panicking on arbitrary input

use crustcc::codegen::FrameLayout;
use crustcc::parser::ast::*;
use crustcc::{analyze, compile};
use proptest::prelude::*;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

/// (C spelling, size in bytes) of the scalar types
fn scalar_type() -> impl Strategy<Value = (&'static str, usize)> {
    prop_oneof![
        Just(("char", 1)),
        Just(("short", 2)),
        Just(("int", 4)),
        Just(("long", 8)),
        Just(("char *", 8)),
        Just(("int *", 8)),
    ]
}

/// A member type, optionally as an array of up to 5 elements
fn member_type() -> impl Strategy<Value = (String, usize)> {
    (scalar_type(), prop::option::of(1usize..5)).prop_map(|((name, size), len)| match len {
        Some(n) => (format!("{}[{}]", name, n), size * n),
        None => (name.to_string(), size),
    })
}

fn declare(ty: &str, name: &str) -> String {
    // `T[n]` is spelled `T name[n]`
    match ty.find('[') {
        Some(i) => format!("{} {}{};", &ty[..i], name, &ty[i..]),
        None => format!("{} {};", ty, name),
    }
}

/// Printable ASCII snippets, short enough to keep recursion shallow
fn arbitrary_source_string() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[ -~\n]{0,64}").unwrap()
}

/// Token soup built from the language's own vocabulary
fn c_like_string() -> impl Strategy<Value = String> {
    let token = prop_oneof![
        Just("int"),
        Just("char"),
        Just("struct"),
        Just("main"),
        Just("x"),
        Just("("),
        Just(")"),
        Just("{"),
        Just("}"),
        Just("["),
        Just("]"),
        Just(";"),
        Just(","),
        Just("="),
        Just("+"),
        Just("*"),
        Just("&"),
        Just("->"),
        Just("."),
        Just("return"),
        Just("sizeof"),
        Just("1"),
        Just("\"s\""),
    ];
    prop::collection::vec(token, 0..40).prop_map(|tokens| tokens.join(" "))
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn struct_members_are_packed(members in prop::collection::vec(member_type(), 1..8)) {
        let fields: String = members
            .iter()
            .enumerate()
            .map(|(i, (ty, _))| declare(ty, &format!("m{}", i)))
            .collect();
        let source = format!("struct S {{ {} }} s;", fields);
        let program = analyze(&source).unwrap();
        let s = program.var(program.globals[0]);

        let mut expected_offset = 0;
        for (i, (_, size)) in members.iter().enumerate() {
            let member = s.ty.member(&format!("m{}", i)).unwrap();
            prop_assert_eq!(member.offset, expected_offset);
            expected_offset += size;
        }
        prop_assert_eq!(s.ty.size, expected_offset);
    }

    #[test]
    fn pointer_addition_scales_by_pointee((ty, size) in scalar_type(), k in 0i64..1000) {
        let source = format!("int main() {{ {} *p; p + {}; return 0; }}", ty, k);
        let mut program = analyze(&source).unwrap();
        let main = program.functions.pop().unwrap();
        let Some(Node { kind: NodeKind::Block(items), .. }) = main.body else {
            panic!("Expected block body");
        };
        let NodeKind::ExprStmt(expr) = &items[1].kind else {
            panic!("Expected expression statement");
        };
        let NodeKind::Binary { op: BinOp::Add, rhs, .. } = &expr.kind else {
            panic!("Expected addition");
        };
        let NodeKind::Binary { op: BinOp::Mul, lhs: index, rhs: scale } = &rhs.kind else {
            panic!("Expected scaled index");
        };
        prop_assert!(matches!(index.kind, NodeKind::Num(n) if n == k));
        let expected = size as i64;
        prop_assert!(matches!(scale.kind, NodeKind::Num(n) if n == expected));
    }

    #[test]
    fn frame_slots_do_not_overlap(sizes in prop::collection::vec(1usize..64, 0..16)) {
        let vars: Vec<Var> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| Var {
                name: format!("v{}", i),
                ty: Type::array_of(&Type::char(), Some(n)),
                storage: Storage::Local,
            })
            .collect();
        let ids: Vec<VarId> = (0..vars.len()).map(VarId).collect();
        let frame = FrameLayout::new(&ids, &vars);

        let mut previous = 0;
        for (i, &n) in sizes.iter().enumerate() {
            let offset = frame.offset(VarId(i)).unwrap();
            // slot i occupies [offset - n, offset) below %rbp
            prop_assert_eq!(offset - n, previous);
            previous = offset;
        }
        prop_assert!(frame.stack_size >= previous);
        prop_assert_eq!(frame.stack_size % 16, 0);
    }

    #[test]
    fn compiler_never_panics_on_arbitrary_input(source in arbitrary_source_string()) {
        let _ = compile(&source);
    }

    #[test]
    fn compiler_never_panics_on_token_soup(source in c_like_string()) {
        let _ = compile(&source);
    }
}
