#![no_main]

use cilexpr::prelude::*;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let method = MethodDescriptor::new(Token::new(0x0600_0001), "Fuzz", TypeSig::I32)
        .with_param("a", TypeSig::I32)
        .with_param("b", TypeSig::Bool)
        .with_flags(MethodFlags::STATIC);
    let body = MethodBody::new(data.to_vec(), 8, vec![TypeSig::I32, TypeSig::Object]);

    let resolver = MapResolver::new();
    let _ = Decompiler::new(&resolver).decompile(&method, &body);
});
