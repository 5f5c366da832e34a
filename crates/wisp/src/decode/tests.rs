use crate::decode::decode_module;
use crate::environment::Environment;
use crate::opcode::Opcode;
use crate::types::{BinarySection, Features, ReadOptions, Type};

fn decode(wat: &str, options: &ReadOptions) -> crate::module::Module {
    let bytes = wat::parse_str(wat).expect("fixture assembles");
    let env = Environment::new();
    decode_module("test", &bytes, &env, options).expect("fixture decodes")
}

fn decode_err(bytes: &[u8]) -> crate::error::DecodeError {
    let env = Environment::new();
    decode_module("test", bytes, &env, &ReadOptions::default()).unwrap_err()
}

#[test]
fn rejects_bad_magic() {
    let err = decode_err(b"\0msa\x01\0\0\0");
    assert_eq!(err.message, "magic header not detected");
    let err = decode_err(b"\0asm\x02\0\0\0");
    assert_eq!(err.message, "unknown binary version");
}

#[test]
fn rejects_out_of_order_sections() {
    // Valid header, then a memory section (5) followed by a type
    // section (1).
    let bytes = [
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
        0x05, 0x03, 0x01, 0x00, 0x01, // memory: min 0... flags 0, initial 1
        0x01, 0x01, 0x00, // type section, empty
    ];
    let err = decode_err(&bytes);
    assert_eq!(err.message, "section out of order");
    assert_eq!(err.section, BinarySection::Type);
}

#[test]
fn decodes_signatures_and_exports() {
    let module = decode(
        r#"(module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))"#,
        &ReadOptions::default(),
    );
    assert_eq!(module.signatures.len(), 1);
    assert_eq!(module.signatures[0].params, vec![Type::I32, Type::I32]);
    assert_eq!(module.signatures[0].results, vec![Type::I32]);
    let export = module.export("add").unwrap();
    assert!(module.func_index[export.object as usize].exported);
}

#[test]
fn branch_targets_are_pre_resolved() {
    let module = decode(
        r#"(module
            (func (result i32)
                (block (result i32)
                    i32.const 1
                    br 0)))"#,
        &ReadOptions::default(),
    );
    let ops = &module.funcs[0].opcodes;
    // block emits no record: const, br, end(block), end(func).
    assert_eq!(ops.len(), 4);
    assert_eq!(ops[0].opcode, Opcode::I32Const);
    assert_eq!(ops[1].opcode, Opcode::Br);
    assert_eq!(ops[1].v2(), 2, "br lands on the block's end record");
    assert_eq!(ops[2].opcode, Opcode::End);
    assert_eq!((ops[2].v1(), ops[2].v2()), (0, 1));
    assert_eq!(ops[3].opcode, Opcode::End);
}

#[test]
fn loop_branches_resolve_to_the_head() {
    let module = decode(
        r#"(module
            (func (param i32)
                (loop
                    local.get 0
                    br_if 0)))"#,
        &ReadOptions::default(),
    );
    let ops = &module.funcs[0].opcodes;
    assert_eq!(ops[0].opcode, Opcode::GetLocal);
    assert_eq!(ops[1].opcode, Opcode::BrIf);
    assert_eq!(ops[1].v2(), 0, "loop branches target the body head");
}

#[test]
fn if_else_links_both_arms() {
    let module = decode(
        r#"(module
            (func (param i32) (result i32)
                local.get 0
                (if (result i32)
                    (then i32.const 1)
                    (else i32.const 2))))"#,
        &ReadOptions::default(),
    );
    let ops = &module.funcs[0].opcodes;
    // get_local, if, const, else, const, end(if), end(func)
    assert_eq!(ops[1].opcode, Opcode::If);
    assert_eq!(ops[3].opcode, Opcode::Else);
    assert_eq!(ops[1].v2(), 4, "false branch enters the else arm");
    assert_eq!(ops[3].v2(), 5, "true arm jumps to the end record");
    assert_eq!(ops[5].opcode, Opcode::End);
}

#[test]
fn br_table_stores_targets_inline() {
    let module = decode(
        r#"(module
            (func (param i32) (result i32)
                (block (result i32)
                    (block (result i32)
                        i32.const 7
                        local.get 0
                        br_table 0 1 1))))"#,
        &ReadOptions::default(),
    );
    let ops = &module.funcs[0].opcodes;
    let head = ops.iter().position(|o| o.opcode == Opcode::BrTable).unwrap();
    assert_eq!(ops[head].v1(), 2, "stored length is the label count");
    // Two labels plus the default follow the head.
    assert_eq!(ops[head + 1].opcode, Opcode::Br);
    assert_eq!(ops[head + 2].opcode, Opcode::Br);
    assert_eq!(ops[head + 3].opcode, Opcode::Br);
}

#[test]
fn call_records_flag_imports() {
    let module = decode(
        r#"(module
            (import "env" "host" (func $h (param i32) (result i32)))
            (func $local (param i32) (result i32) local.get 0)
            (func (export "f") (result i32)
                i32.const 1
                call $h
                call $local))"#,
        &ReadOptions::default(),
    );
    let ops = &module.funcs[1].opcodes;
    let calls: Vec<_> = ops.iter().filter(|o| o.opcode == Opcode::Call).collect();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[0].v1(), calls[0].v2()), (0, 1), "imported callee");
    assert_eq!((calls[1].v1(), calls[1].v2()), (1, 0), "local callee");
}

#[test]
fn type_errors_are_reported() {
    let bytes = wat::parse_str(
        r#"(module (func (result i32) i64.const 1))"#,
    );
    // The text assembler is not a validator; the decoder is.
    let bytes = bytes.unwrap();
    let env = Environment::new();
    let err = decode_module("test", &bytes, &env, &ReadOptions::default()).unwrap_err();
    assert!(err.message.contains("type mismatch"), "{}", err.message);
}

#[test]
fn stack_pointer_accesses_become_intrinsics() {
    let wat = r#"(module
        (global $sp (mut i32) (i32.const 1024))
        (func (export "__wasm_get_stack_pointer") (result i32)
            global.get $sp)
        (func (export "bump")
            global.get $sp
            i32.const 16
            i32.sub
            global.set $sp))"#;

    let plain = decode(wat, &ReadOptions::default());
    assert!(plain.stack_pointer_global.is_none());
    assert!(plain.funcs[0].opcodes.iter().any(|o| o.opcode == Opcode::GetGlobal));

    let rewritten = decode(
        wat,
        &ReadOptions { features: Features::all(), ..Default::default() },
    );
    assert_eq!(rewritten.stack_pointer_global, Some(0));
    assert!(rewritten.funcs[0].opcodes.iter().any(|o| o.opcode == Opcode::InterpGetStack));
    assert!(rewritten.funcs[1].opcodes.iter().any(|o| o.opcode == Opcode::InterpSetStack));
    assert!(!rewritten.funcs[1].opcodes.iter().any(|o| o.opcode == Opcode::SetGlobal));
}

#[test]
fn saturating_truncation_needs_the_feature() {
    let wat = r#"(module (func (param f32) (result i32)
        local.get 0
        i32.trunc_sat_f32_s))"#;
    let bytes = wat::parse_str(wat).unwrap();
    let env = Environment::new();
    let err = decode_module("test", &bytes, &env, &ReadOptions::default()).unwrap_err();
    assert!(err.message.contains("not enabled"), "{}", err.message);

    let ok = decode(wat, &ReadOptions { features: Features::all(), ..Default::default() });
    assert!(ok.funcs[0].opcodes.iter().any(|o| o.opcode == Opcode::I32TruncSSatF32));
}

#[test]
fn function_names_attach_when_requested() {
    let wat = r#"(module (func $named (export "f") (result i32) i32.const 3))"#;
    let with_names = decode(
        wat,
        &ReadOptions { read_debug_names: true, ..Default::default() },
    );
    assert_eq!(with_names.funcs[0].name.as_deref(), Some("named"));

    let without = decode(wat, &ReadOptions::default());
    assert_eq!(without.funcs[0].name, None);
}

#[test]
fn redecoding_cached_bytes_is_stable() {
    let module = decode(
        r#"(module
            (memory 1 2)
            (table 2 funcref)
            (global (mut i64) (i64.const -7))
            (func $f (export "f") (param i32) (result i32)
                (local i64)
                local.get 0
                (if (result i32) (then i32.const 1) (else i32.const 0)))
            (elem (i32.const 0) $f)
            (data (i32.const 8) "hello"))"#,
        &ReadOptions::default(),
    );
    let env = Environment::new();
    let again =
        decode_module("test2", module.bytes(), &env, &ReadOptions::default()).unwrap();
    assert!(module.same_representation(&again));
}
