//! End to end decompilation tests.
//!
//! These tests drive the public API the way a host does:
//! 1. Describe the method with a `MethodDescriptor`
//! 2. Assemble its body with `InstructionEncoder`
//! 3. Register referenced tokens in a `MapResolver`
//! 4. Decompile and inspect the rendered tree

use std::{cell::Cell, sync::Arc};

use cilexpr::{
    expr::{builder, coerce::coerce},
    prelude::*,
};

const TYPE_TOKEN: Token = Token(0x0100_0001);

/// Assemble a body from encoder calls.
fn body(locals: Vec<TypeSig>, build: impl FnOnce(&mut InstructionEncoder) -> Result<()>) -> Result<MethodBody> {
    let mut encoder = InstructionEncoder::new();
    build(&mut encoder)?;
    Ok(MethodBody::new(encoder.finalize()?, 8, locals))
}

/// A static method with the given signature.
fn method(name: &str, return_type: TypeSig, params: &[(&str, TypeSig)]) -> MethodDescriptor {
    let mut method = MethodDescriptor::new(Token::new(0x0600_0001), name, return_type);
    for (param, ty) in params {
        method = method.with_param(*param, ty.clone());
    }
    method.with_flags(MethodFlags::STATIC)
}

fn rendered(statements: &[ExprRc]) -> Vec<String> {
    statements.iter().map(ToString::to_string).collect()
}

fn count_calls(expr: &Expr) -> usize {
    let count = Cell::new(0);
    expr.any(&|node: &Expr| {
        if matches!(node.kind, ExprKind::Call { .. }) {
            count.set(count.get() + 1);
        }
        false
    });
    count.get()
}

#[test]
fn test_branch_free_keeps_evaluation_order() -> Result<()> {
    // (a - b) * c
    let method = method(
        "Scale",
        TypeSig::I32,
        &[("a", TypeSig::I32), ("b", TypeSig::I32), ("c", TypeSig::I32)],
    );
    let body = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::Ldarg1)?;
        il.emit(OpCode::Sub)?;
        il.emit(OpCode::Ldarg2)?;
        il.emit(OpCode::Mul)?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    assert_eq!(ast.statements.len(), 1);
    assert!(ast.variables.is_empty());
    assert_eq!(ast.to_string(), "(a, b, c) => ((a - b) * c)");
    Ok(())
}

#[test]
fn test_call_arguments_keep_push_order() -> Result<()> {
    let combine = MethodDescriptor::new(Token::new(0x0A00_0001), "Combine", TypeSig::I64)
        .with_param("first", TypeSig::I64)
        .with_param("second", TypeSig::I64)
        .with_flags(MethodFlags::STATIC);
    let resolver = MapResolver::new().with_method(combine);

    let method = method("Swap", TypeSig::I64, &[("a", TypeSig::I32), ("b", TypeSig::I64)]);
    let body = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg1)?;
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::ConvI8)?;
        il.emit_instruction(OpCode::Call, Operand::Token(Token::new(0x0A00_0001)))?;
        il.emit(OpCode::Ret)
    })?;

    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    assert_eq!(ast.body().to_string(), "Combine(b, ((int64)a))");
    Ok(())
}

#[test]
fn test_if_else_yields_one_conditional() -> Result<()> {
    // a > b ? a : b
    let method = method("Max", TypeSig::I32, &[("a", TypeSig::I32), ("b", TypeSig::I32)]);
    let body = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::Ldarg1)?;
        il.emit_branch(OpCode::BleS, "second")?;
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("second")?;
        il.emit(OpCode::Ldarg1)?;
        il.define_label("end")?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    let result = ast.body();
    assert!(matches!(result.kind, ExprKind::Conditional { .. }));
    assert_eq!(result.to_string(), "((a > b) ? a : b)");
    assert_eq!(result.ty, TypeSig::I32);
    Ok(())
}

#[test]
fn test_mismatched_branches_widen() -> Result<()> {
    let nullable = TypeSig::Nullable(Box::new(TypeSig::I32));
    let method = method(
        "Pick",
        nullable.clone(),
        &[("c", TypeSig::Bool), ("x", TypeSig::I32), ("y", nullable.clone())],
    );
    let body = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrfalseS, "other")?;
        il.emit(OpCode::Ldarg1)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("other")?;
        il.emit(OpCode::Ldarg2)?;
        il.define_label("end")?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    let result = ast.body();
    assert_eq!(result.ty, nullable);
    assert_eq!(result.to_string(), "(c ? ((int32?)x) : y)");
    Ok(())
}

#[test]
fn test_short_circuit_operators() -> Result<()> {
    let method = method("Both", TypeSig::Bool, &[("a", TypeSig::Bool), ("b", TypeSig::Bool)]);
    let and = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrfalseS, "no")?;
        il.emit(OpCode::Ldarg1)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("no")?;
        il.emit(OpCode::LdcI40)?;
        il.define_label("end")?;
        il.emit(OpCode::Ret)
    })?;
    let or = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrtrueS, "yes")?;
        il.emit(OpCode::Ldarg1)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("yes")?;
        il.emit(OpCode::LdcI41)?;
        il.define_label("end")?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let decompiler = Decompiler::new(&resolver);
    assert_eq!(decompiler.decompile(&method, &and)?.body().to_string(), "(a && b)");
    assert_eq!(decompiler.decompile(&method, &or)?.body().to_string(), "(a || b)");
    Ok(())
}

#[test]
fn test_coercion_is_idempotent() -> Result<()> {
    let x = Expr::parameter(0, "x", TypeSig::I64);
    let sum = builder::numeric(BinaryOp::Add, x.clone(), Expr::int(1))?;
    assert_eq!(sum.ty, TypeSig::I64);

    for node in [x, sum] {
        let coerced = coerce(&node, &node.ty)?;
        assert!(Arc::ptr_eq(&coerced, &node));
    }
    Ok(())
}

#[test]
fn test_boolean_constant_folding() -> Result<()> {
    let x = Expr::parameter(0, "x", TypeSig::Bool);
    let a = Expr::parameter(1, "a", TypeSig::Bool);
    let b = Expr::parameter(2, "b", TypeSig::Bool);

    let left = builder::equal(x.clone(), Expr::boolean(true))?;
    assert!(Arc::ptr_eq(&left, &x));
    let right = builder::equal(Expr::boolean(true), x.clone())?;
    assert!(Arc::ptr_eq(&right, &x));

    let twice = builder::logical_not(builder::logical_not(x.clone())?)?;
    assert!(Arc::ptr_eq(&twice, &x));

    let both = builder::logical_and(a, b)?;
    assert_eq!(builder::logical_not(both)?.to_string(), "(!a || !b)");
    Ok(())
}

#[test]
fn test_local_assigned_on_both_paths() -> Result<()> {
    // int x; if (c) x = 1; else x = 2; return x;
    let method = method("Select", TypeSig::I32, &[("c", TypeSig::Bool)]);
    let body = body(vec![TypeSig::I32], |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrfalseS, "else")?;
        il.emit(OpCode::LdcI41)?;
        il.emit(OpCode::Stloc0)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("else")?;
        il.emit(OpCode::LdcI42)?;
        il.emit(OpCode::Stloc0)?;
        il.define_label("end")?;
        il.emit(OpCode::Ldloc0)?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    assert_eq!(rendered(&ast.statements), vec!["(c ? 1 : 2)"]);
    assert!(ast.variables.is_empty());
    assert!(!ast.statements[0].any(&|node: &Expr| matches!(node.kind, ExprKind::Assign { .. })));
    Ok(())
}

#[test]
fn test_sequential_ifs_stay_independent() -> Result<()> {
    // int x = a ? 1 : 2; int y = b ? 3 : 4; return x + y;
    let method = method("Sum", TypeSig::I32, &[("a", TypeSig::Bool), ("b", TypeSig::Bool)]);
    let body = body(vec![TypeSig::I32, TypeSig::I32], |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrfalseS, "x2")?;
        il.emit(OpCode::LdcI41)?;
        il.emit(OpCode::Stloc0)?;
        il.emit_branch(OpCode::BrS, "x")?;
        il.define_label("x2")?;
        il.emit(OpCode::LdcI42)?;
        il.emit(OpCode::Stloc0)?;
        il.define_label("x")?;
        il.emit(OpCode::Ldarg1)?;
        il.emit_branch(OpCode::BrfalseS, "y4")?;
        il.emit(OpCode::LdcI43)?;
        il.emit(OpCode::Stloc1)?;
        il.emit_branch(OpCode::BrS, "y")?;
        il.define_label("y4")?;
        il.emit(OpCode::LdcI44)?;
        il.emit(OpCode::Stloc1)?;
        il.define_label("y")?;
        il.emit(OpCode::Ldloc0)?;
        il.emit(OpCode::Ldloc1)?;
        il.emit(OpCode::Add)?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    assert_eq!(
        rendered(&ast.statements),
        vec!["V_0 = (a ? 1 : 2)", "V_1 = (b ? 3 : 4)", "(V_0 + V_1)"]
    );
    assert_eq!(ast.variables.len(), 2);
    Ok(())
}

#[test]
fn test_nested_join_keeps_locals() -> Result<()> {
    // int x = 5; if (a) { x = 7; if (b) return 10; } return x;
    let method = method("Pick", TypeSig::I32, &[("a", TypeSig::Bool), ("b", TypeSig::Bool)]);
    let body = body(vec![TypeSig::I32], |il| {
        il.emit(OpCode::LdcI45)?;
        il.emit(OpCode::Stloc0)?;
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrfalseS, "end")?;
        il.emit(OpCode::LdcI47)?;
        il.emit(OpCode::Stloc0)?;
        il.emit(OpCode::Ldarg1)?;
        il.emit_branch(OpCode::BrfalseS, "end")?;
        il.emit_instruction(OpCode::LdcI4S, Operand::Int(10))?;
        il.emit(OpCode::Ret)?;
        il.define_label("end")?;
        il.emit(OpCode::Ldloc0)?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    assert_eq!(
        rendered(&ast.statements),
        vec!["V_0 = (a ? 7 : 5)", "((!a || !b) ? V_0 : 10)"]
    );
    assert_eq!(ast.variables.len(), 1);
    Ok(())
}

#[test]
fn test_reference_truth_test_is_kept_by_default() -> Result<()> {
    // return s != null ? 1 : 2;
    let method = method("Has", TypeSig::I32, &[("s", TypeSig::String)]);
    let body = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrtrueS, "yes")?;
        il.emit(OpCode::LdcI42)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("yes")?;
        il.emit(OpCode::LdcI41)?;
        il.define_label("end")?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    assert_eq!(ast.body().to_string(), "((s == null) ? 2 : 1)");

    let folding = DecompileOptions {
        fold_reference_tests: true,
        ..DecompileOptions::default()
    };
    let ast = Decompiler::new(&resolver)
        .with_options(folding)
        .decompile(&method, &body)?;
    assert_eq!(ast.body().to_string(), "1");
    Ok(())
}

#[test]
fn test_variables_of_one_slot_get_distinct_names() -> Result<()> {
    // int x; if (c) x = Foo(); else x = Bar(); return x;
    let foo = MethodDescriptor::new(Token::new(0x0A00_0001), "Foo", TypeSig::I32)
        .with_flags(MethodFlags::STATIC);
    let bar = MethodDescriptor::new(Token::new(0x0A00_0002), "Bar", TypeSig::I32)
        .with_flags(MethodFlags::STATIC);
    let resolver = MapResolver::new().with_method(foo).with_method(bar);

    let method = method("Choose", TypeSig::I32, &[("c", TypeSig::Bool)]);
    let body = body(vec![TypeSig::I32], |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrfalseS, "else")?;
        il.emit_instruction(OpCode::Call, Operand::Token(Token::new(0x0A00_0001)))?;
        il.emit(OpCode::Stloc0)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("else")?;
        il.emit_instruction(OpCode::Call, Operand::Token(Token::new(0x0A00_0002)))?;
        il.emit(OpCode::Stloc0)?;
        il.define_label("end")?;
        il.emit(OpCode::Ldloc0)?;
        il.emit(OpCode::Ret)
    })?;

    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    let names: Vec<String> = ast.variables.iter().map(ToString::to_string).collect();
    let mut unique = names.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), names.len(), "duplicate names in {names:?}");
    assert_eq!(rendered(&ast.statements[..2]), vec!["V_0 = Foo()", "V_1 = Bar()"]);
    Ok(())
}

#[test]
fn test_duplicated_call_is_evaluated_once() -> Result<()> {
    // var n = Next(); return n * n;
    let next = MethodDescriptor::new(Token::new(0x0A00_0001), "Next", TypeSig::I32)
        .with_flags(MethodFlags::STATIC);
    let resolver = MapResolver::new().with_method(next);

    let method = method("Square", TypeSig::I32, &[]);
    let body = body(Vec::new(), |il| {
        il.emit_instruction(OpCode::Call, Operand::Token(Token::new(0x0A00_0001)))?;
        il.emit(OpCode::Dup)?;
        il.emit(OpCode::Mul)?;
        il.emit(OpCode::Ret)
    })?;

    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    assert_eq!(rendered(&ast.statements), vec!["V_0 = Next()", "(V_0 * V_0)"]);
    assert_eq!(ast.variables.len(), 1);

    let calls: usize = ast.statements.iter().map(|s| count_calls(s)).sum();
    assert_eq!(calls, 1);

    let ExprKind::Binary { left, right, .. } = &ast.statements[1].kind else {
        panic!("expected a product, got {}", ast.statements[1]);
    };
    assert!(Arc::ptr_eq(left, right));
    assert!(Arc::ptr_eq(left, &ast.variables[0]));
    Ok(())
}

#[test]
fn test_switch_is_rejected() -> Result<()> {
    let method = method("Pick", TypeSig::I32, &[("a", TypeSig::I32)]);
    // ldarg.0; switch (0 targets); ldc.i4.0; ret
    let body = MethodBody::new(vec![0x02, 0x45, 0x00, 0x00, 0x00, 0x00, 0x16, 0x2A], 1, Vec::new());

    let resolver = MapResolver::new();
    match Decompiler::new(&resolver).decompile(&method, &body) {
        Err(Error::UnsupportedInstruction { mnemonic, offset }) => {
            assert_eq!(mnemonic, "switch");
            assert_eq!(offset, 1);
        }
        other => panic!("expected an unsupported instruction, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_loop_is_rejected() -> Result<()> {
    let method = method("Spin", TypeSig::Void, &[]);
    let body = body(Vec::new(), |il| {
        il.define_label("top")?;
        il.emit(OpCode::Nop)?;
        il.emit_branch(OpCode::BrS, "top")?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let result = Decompiler::new(&resolver).decompile(&method, &body);
    assert!(matches!(result, Err(Error::BackwardBranch { .. })));
    Ok(())
}

#[test]
fn test_backward_leave_is_unsupported() -> Result<()> {
    let method = method("Escape", TypeSig::Void, &[]);
    let body = body(Vec::new(), |il| {
        il.define_label("top")?;
        il.emit(OpCode::Nop)?;
        il.emit_branch(OpCode::LeaveS, "top")?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    match Decompiler::new(&resolver).decompile(&method, &body) {
        Err(Error::UnsupportedInstruction { mnemonic, offset }) => {
            assert_eq!(mnemonic, "leave.s");
            assert_eq!(offset, 1);
        }
        other => panic!("expected an unsupported instruction, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_unresolved_token_is_a_resolution_error() -> Result<()> {
    let method = method("Broken", TypeSig::I32, &[]);
    let body = body(Vec::new(), |il| {
        il.emit_instruction(OpCode::Call, Operand::Token(Token::new(0x0A00_0042)))?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let result = Decompiler::new(&resolver).decompile(&method, &body);
    assert!(matches!(result, Err(Error::Resolution(_))));
    Ok(())
}

#[test]
fn test_object_construction_and_fields() -> Result<()> {
    let point = TypeSig::Class(TypeRef(Token::new(0x0200_0005)));
    let ctor = MethodDescriptor::new(Token::new(0x0A00_0002), ".ctor", TypeSig::Void)
        .with_param("x", TypeSig::I32)
        .with_param("y", TypeSig::I32)
        .with_declaring_type(point.clone())
        .with_flags(MethodFlags::CONSTRUCTOR);
    let origin = FieldDescriptor::new(Token::new(0x0400_0001), "Origin", point.clone())
        .with_flags(FieldFlags::STATIC);
    let x = FieldDescriptor::new(Token::new(0x0400_0002), "X", TypeSig::I32);
    let resolver = MapResolver::new()
        .with_method(ctor)
        .with_field(origin)
        .with_field(x);

    let make = method("Make", point.clone(), &[("a", TypeSig::I32)]);
    let make_body = body(Vec::new(), |il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::LdcI42)?;
        il.emit_instruction(OpCode::Newobj, Operand::Token(Token::new(0x0A00_0002)))?;
        il.emit(OpCode::Ret)
    })?;
    let read = method("Read", TypeSig::I32, &[]);
    let read_body = body(Vec::new(), |il| {
        il.emit_instruction(OpCode::Ldsfld, Operand::Token(Token::new(0x0400_0001)))?;
        il.emit_instruction(OpCode::Ldfld, Operand::Token(Token::new(0x0400_0002)))?;
        il.emit(OpCode::Ret)
    })?;

    let decompiler = Decompiler::new(&resolver);
    let made = decompiler.decompile(&make, &make_body)?;
    assert_eq!(made.body().to_string(), format!("new {point}(a, 2)"));
    assert_eq!(decompiler.decompile(&read, &read_body)?.body().to_string(), "Origin.X");
    Ok(())
}

#[test]
fn test_array_initializer() -> Result<()> {
    let resolver = MapResolver::new().with_type(TYPE_TOKEN, TypeSig::String);
    let strings = TypeSig::Array(Box::new(TypeSig::String));
    let method = method("Pair", strings.clone(), &[("s", TypeSig::String)]);
    let body = body(Vec::new(), |il| {
        il.emit(OpCode::LdcI42)?;
        il.emit_instruction(OpCode::Newarr, Operand::Token(TYPE_TOKEN))?;
        il.emit(OpCode::Dup)?;
        il.emit(OpCode::LdcI41)?;
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::StelemRef)?;
        il.emit(OpCode::Ret)
    })?;

    let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
    let result = ast.body();
    assert_eq!(result.ty, strings);
    assert_eq!(result.to_string(), "new string[] { null, s }");
    Ok(())
}

#[test]
fn test_custom_variable_prefix() -> Result<()> {
    let next = MethodDescriptor::new(Token::new(0x0A00_0001), "Next", TypeSig::I32)
        .with_flags(MethodFlags::STATIC);
    let resolver = MapResolver::new().with_method(next);
    let method = method("Twice", TypeSig::I32, &[]);
    let body = body(vec![TypeSig::I32], |il| {
        il.emit_instruction(OpCode::Call, Operand::Token(Token::new(0x0A00_0001)))?;
        il.emit(OpCode::Dup)?;
        il.emit(OpCode::Add)?;
        il.emit(OpCode::Ret)
    })?;

    let options = DecompileOptions {
        variable_prefix: "tmp".into(),
        ..DecompileOptions::default()
    };
    let ast = Decompiler::new(&resolver)
        .with_options(options)
        .decompile(&method, &body)?;
    // The declared local takes tmp0, the temporary follows it
    assert_eq!(rendered(&ast.statements), vec!["tmp1 = Next()", "(tmp1 + tmp1)"]);
    Ok(())
}

#[test]
fn test_cache_is_shared_between_threads() -> Result<()> {
    let method = method("Seven", TypeSig::I32, &[]);
    let body = body(Vec::new(), |il| {
        il.emit_instruction(OpCode::LdcI4S, Operand::Int(7))?;
        il.emit(OpCode::Ret)
    })?;

    let resolver = MapResolver::new();
    let decompiler = Decompiler::new(&resolver);
    let cache = DecompileCache::new();

    let results: Vec<Arc<MethodAst>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| cache.get_or_decompile(&decompiler, &method, &body)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Result<Vec<_>>>()
    })?;

    assert_eq!(cache.len(), 1);
    for ast in &results {
        assert_eq!(ast.body().to_string(), "7");
    }
    let cached = cache.get(&CacheKey::of(&decompiler, method.token)).unwrap();
    assert!(results.iter().any(|ast| Arc::ptr_eq(ast, &cached)));
    Ok(())
}
