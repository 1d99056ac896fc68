//! Benchmarks for method decompilation.
//!
//! Measures the cost of turning representative bodies into expression trees:
//! - Instruction decoding alone
//! - Branch-free arithmetic
//! - Nested conditionals (short-circuit reduction)
//! - Locals merged at a join
//! - Cache lookups of an already decompiled method

extern crate cilexpr;

use cilexpr::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn assemble(build: impl FnOnce(&mut InstructionEncoder) -> Result<()>) -> Vec<u8> {
    let mut encoder = InstructionEncoder::new();
    build(&mut encoder).unwrap();
    encoder.finalize().unwrap()
}

fn method(return_type: TypeSig, params: &[(&str, TypeSig)]) -> MethodDescriptor {
    let mut method = MethodDescriptor::new(Token::new(0x0600_0001), "Bench", return_type);
    for (name, ty) in params {
        method = method.with_param(*name, ty.clone());
    }
    method.with_flags(MethodFlags::STATIC)
}

/// a * b + c * 2 - (a >> 3)
fn arithmetic_body() -> MethodBody {
    let code = assemble(|il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::Ldarg1)?;
        il.emit(OpCode::Mul)?;
        il.emit(OpCode::Ldarg2)?;
        il.emit(OpCode::LdcI42)?;
        il.emit(OpCode::Mul)?;
        il.emit(OpCode::Add)?;
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::LdcI43)?;
        il.emit(OpCode::Shr)?;
        il.emit(OpCode::Sub)?;
        il.emit(OpCode::Ret)
    });
    MethodBody::new(code, 4, Vec::new())
}

/// a > 0 && b > 0 ? a : (c ? b : 0)
fn conditional_body() -> MethodBody {
    let code = assemble(|il| {
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::LdcI40)?;
        il.emit_branch(OpCode::BleS, "else")?;
        il.emit(OpCode::Ldarg1)?;
        il.emit(OpCode::LdcI40)?;
        il.emit_branch(OpCode::BleS, "else")?;
        il.emit(OpCode::Ldarg0)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("else")?;
        il.emit(OpCode::Ldarg2)?;
        il.emit_branch(OpCode::BrtrueS, "second")?;
        il.emit(OpCode::LdcI40)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("second")?;
        il.emit(OpCode::Ldarg1)?;
        il.define_label("end")?;
        il.emit(OpCode::Ret)
    });
    MethodBody::new(code, 4, Vec::new())
}

/// int x = c ? a : b; return x * x;
fn locals_body() -> MethodBody {
    let code = assemble(|il| {
        il.emit(OpCode::Ldarg2)?;
        il.emit_branch(OpCode::BrfalseS, "else")?;
        il.emit(OpCode::Ldarg0)?;
        il.emit(OpCode::Stloc0)?;
        il.emit_branch(OpCode::BrS, "end")?;
        il.define_label("else")?;
        il.emit(OpCode::Ldarg1)?;
        il.emit(OpCode::Stloc0)?;
        il.define_label("end")?;
        il.emit(OpCode::Ldloc0)?;
        il.emit(OpCode::Ldloc0)?;
        il.emit(OpCode::Mul)?;
        il.emit(OpCode::Ret)
    });
    MethodBody::new(code, 4, vec![TypeSig::I32])
}

fn int_params() -> MethodDescriptor {
    method(
        TypeSig::I32,
        &[("a", TypeSig::I32), ("b", TypeSig::I32), ("c", TypeSig::I32)],
    )
}

fn bool_selector() -> MethodDescriptor {
    method(
        TypeSig::I32,
        &[("a", TypeSig::I32), ("b", TypeSig::I32), ("c", TypeSig::Bool)],
    )
}

/// Benchmark decoding alone, without building expressions.
fn bench_decode(c: &mut Criterion) {
    let body = conditional_body();

    c.bench_function("decode_conditional", |b| {
        b.iter(|| {
            let instructions = cilexpr::disassembler::decode_stream(black_box(&body.code)).unwrap();
            black_box(instructions)
        });
    });
}

/// Benchmark a branch-free body.
fn bench_arithmetic(c: &mut Criterion) {
    let resolver = MapResolver::new();
    let decompiler = Decompiler::new(&resolver);
    let method = int_params();
    let body = arithmetic_body();

    c.bench_function("decompile_arithmetic", |b| {
        b.iter(|| {
            let ast = decompiler.decompile(black_box(&method), black_box(&body)).unwrap();
            black_box(ast)
        });
    });
}

/// Benchmark a body with nested conditional jumps.
fn bench_conditionals(c: &mut Criterion) {
    let resolver = MapResolver::new();
    let decompiler = Decompiler::new(&resolver);
    let method = bool_selector();
    let body = conditional_body();

    c.bench_function("decompile_conditionals", |b| {
        b.iter(|| {
            let ast = decompiler.decompile(black_box(&method), black_box(&body)).unwrap();
            black_box(ast)
        });
    });
}

/// Benchmark a body whose local is assigned on both sides of a branch.
fn bench_locals(c: &mut Criterion) {
    let resolver = MapResolver::new();
    let decompiler = Decompiler::new(&resolver);
    let method = bool_selector();
    let body = locals_body();

    c.bench_function("decompile_locals", |b| {
        b.iter(|| {
            let ast = decompiler.decompile(black_box(&method), black_box(&body)).unwrap();
            black_box(ast)
        });
    });
}

/// Benchmark cache hits.
fn bench_cache_hit(c: &mut Criterion) {
    let resolver = MapResolver::new();
    let decompiler = Decompiler::new(&resolver);
    let cache = DecompileCache::new();
    let method = bool_selector();
    let body = conditional_body();
    cache.get_or_decompile(&decompiler, &method, &body).unwrap();

    c.bench_function("cache_hit", |b| {
        b.iter(|| {
            let ast = cache
                .get_or_decompile(&decompiler, black_box(&method), black_box(&body))
                .unwrap();
            black_box(ast)
        });
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_arithmetic,
    bench_conditionals,
    bench_locals,
    bench_cache_hit
);
criterion_main!(benches);
