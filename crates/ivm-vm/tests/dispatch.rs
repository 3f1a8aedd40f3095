//! End-to-end execution through `Context`.

use std::sync::Arc;
use std::task::Poll;

use ivm_common_core::{FunctionBuilder, ModuleBuilder, Opcode, Register};
use ivm_runtime::{ConstBuffer, HostModule, NativeModule, NativeRegistryBuilder, Ref, Span};
use ivm_vm::{Context, Execution, Module, Value, VmConfig, VmError, VmResult};
use pretty_assertions::assert_eq;

struct Token {
    tag: i32,
}

ivm_runtime::ref_object!(Token, "test.token");

#[derive(Default)]
struct TestHost {
    polls: u32,
}

impl TestHost {
    fn add(&mut self, a: i32, b: i32) -> VmResult<i32> {
        Ok(a + b)
    }

    fn make(&mut self, tag: i32) -> VmResult<(Ref<Token>, i32)> {
        Ok((Ref::new(Token { tag }), tag + 1))
    }

    fn tag(&mut self, token: Ref<Token>) -> VmResult<i32> {
        Ok(token.deref_non_null()?.tag)
    }

    fn sum(&mut self, base: i32, rest: Span<i32>) -> VmResult<i32> {
        Ok(base + rest.iter().sum::<i32>())
    }

    fn wait(&mut self) -> VmResult<Poll<()>> {
        self.polls += 1;
        Ok(if self.polls == 1 { Poll::Pending } else { Poll::Ready(()) })
    }

    fn fail(&mut self, code: i32) -> VmResult<i32> {
        Err(VmError::native(format!("code {}", code)))
    }

    fn len(&mut self, buffer: Ref<ConstBuffer>) -> VmResult<i32> {
        Ok(buffer.deref_non_null()?.len() as i32)
    }
}

fn test_host() -> Box<dyn HostModule> {
    let registry = NativeRegistryBuilder::new("test")
        .export("add", TestHost::add)
        .export("make", TestHost::make)
        .export("tag", TestHost::tag)
        .export("sum", TestHost::sum)
        .export("wait", TestHost::wait)
        .export("fail", TestHost::fail)
        .export("len", TestHost::len)
        .build()
        .unwrap();
    Box::new(NativeModule::new(Arc::new(registry), TestHost::default()))
}

fn context_with(m: ModuleBuilder, config: VmConfig) -> Context {
    let module = Module::from_def(m.build().unwrap()).unwrap();
    Context::new(module, vec![test_host()], config).unwrap()
}

fn context(m: ModuleBuilder) -> Context {
    context_with(m, VmConfig::default())
}

fn single(name: &str, f: FunctionBuilder) -> ModuleBuilder {
    let mut m = ModuleBuilder::new("t");
    let ordinal = m.function(f);
    m.export(name, ordinal);
    m
}

fn returned(exec: Execution) -> Vec<Value> {
    exec.into_values().expect("execution returned")
}

fn i32s(values: &[Value]) -> Vec<Option<i32>> {
    values.iter().map(Value::as_i32).collect()
}

#[test]
fn add_two_arguments() {
    let mut f = FunctionBuilder::new(2, 0);
    f.binary(Opcode::AddI32, 0, 0, 1).ret(&[Register::i32(0)]);
    let mut ctx = context(single("add", f));
    let values = returned(ctx.invoke("add", &[Value::I32(3), Value::I32(4)]).unwrap());
    assert_eq!(i32s(&values), vec![Some(7)]);
}

#[test]
fn bytecode_call_and_return() {
    let mut m = ModuleBuilder::new("t");
    let mut double = FunctionBuilder::new(1, 0);
    double.binary(Opcode::AddI32, 0, 0, 0).ret(&[Register::i32(0)]);
    let double = m.function(double);

    let mut main = FunctionBuilder::new(2, 0);
    main.const_i32(1, 100)
        .call(double, &[Register::i32(0)], &[Register::i32(0)])
        .binary(Opcode::SubI32, 0, 0, 1)
        .ret(&[Register::i32(0), Register::i32(1)]);
    let main = m.function(main);
    m.export("main", main);

    let mut ctx = context(m);
    let values = returned(ctx.invoke("main", &[Value::I32(21)]).unwrap());
    assert_eq!(i32s(&values), vec![Some(-58), Some(100)]);
}

#[test]
fn loop_with_branches() {
    let mut f = FunctionBuilder::new(3, 0);
    let top = f.new_label();
    let body = f.new_label();
    f.const_i32(1, 0)
        .const_i32(2, 1)
        .bind(top)
        .cond_branch(0, body)
        .ret(&[Register::i32(1)])
        .bind(body)
        .binary(Opcode::AddI32, 1, 1, 0)
        .binary(Opcode::SubI32, 0, 0, 2)
        .branch(top);
    let mut ctx = context(single("tri", f));
    let values = returned(ctx.invoke("tri", &[Value::I32(4)]).unwrap());
    assert_eq!(i32s(&values), vec![Some(10)]);
}

#[test]
fn yield_resumes_at_saved_cursor() {
    let mut f = FunctionBuilder::new(1, 0);
    f.const_i32(0, 20)
        .yield_now()
        .binary(Opcode::AddI32, 0, 0, 0)
        .ret(&[Register::i32(0)]);
    let mut ctx = context(single("y", f));

    let cont = ctx.invoke("y", &[]).unwrap().into_continuation().unwrap();
    assert_eq!(cont.cursor(), Some((0, 16)));
    let frame = cont.stack().current_frame().unwrap();
    assert_eq!(frame.registers.i32(0), Ok(20));

    let values = returned(ctx.resume(cont).unwrap());
    assert_eq!(i32s(&values), vec![Some(40)]);
}

#[test]
fn yield_inside_callee_resumes_whole_chain() {
    let mut m = ModuleBuilder::new("t");
    let mut inner = FunctionBuilder::new(2, 0);
    inner
        .const_i32(0, 5)
        .const_i32(1, 1)
        .binary(Opcode::AddI32, 0, 0, 1)
        .yield_now()
        .binary(Opcode::AddI32, 0, 0, 0)
        .ret(&[Register::i32(0)]);
    let inner = m.function(inner);
    let mut outer = FunctionBuilder::new(2, 0);
    outer
        .call(inner, &[], &[Register::i32(0)])
        .const_i32(1, 1)
        .binary(Opcode::AddI32, 0, 0, 1)
        .ret(&[Register::i32(0)]);
    let outer = m.function(outer);
    m.export("outer", outer);
    let mut ctx = context(m);

    let cont = ctx.invoke("outer", &[]).unwrap().into_continuation().unwrap();
    assert_eq!(cont.depth(), 2);
    assert_eq!(cont.cursor(), Some((inner as u32, 32)));
    let frame = cont.stack().current_frame().unwrap();
    assert_eq!(frame.registers.i32(0), Ok(6));

    // Re-running the increment before the yield would give 15.
    let values = returned(ctx.resume(cont).unwrap());
    assert_eq!(i32s(&values), vec![Some(13)]);
}

#[test]
fn native_pending_yields_after_call() {
    let wait = {
        let mut m = ModuleBuilder::new("t");
        let import = m.import("test.wait");
        let mut f = FunctionBuilder::new(1, 0);
        f.call_import(import, &[], &[]).const_i32(0, 1).ret(&[Register::i32(0)]);
        let ordinal = m.function(f);
        m.export("w", ordinal);
        m
    };
    let mut ctx = context(wait);
    let exec = ctx.invoke("w", &[]).unwrap();
    assert!(exec.is_yielded());
    let cont = exec.into_continuation().unwrap();
    assert_eq!(cont.cursor(), Some((0, 8)));
    let values = returned(ctx.resume(cont).unwrap());
    assert_eq!(i32s(&values), vec![Some(1)]);
}

#[test]
fn resume_on_other_context_rejected() {
    let build = || {
        let mut f = FunctionBuilder::new(0, 0);
        f.yield_now().ret(&[]);
        single("y", f)
    };
    let mut a = context(build());
    let mut b = context(build());
    let cont = a.invoke("y", &[]).unwrap().into_continuation().unwrap();
    assert!(matches!(b.resume(cont), Err(VmError::InvalidArgument(_))));
}

#[test]
fn native_ref_and_scalar_results() {
    let mut m = ModuleBuilder::new("t");
    let make = m.import("test.make");
    let mut f = FunctionBuilder::new(1, 1);
    f.const_i32(0, 41)
        .call_import(make, &[Register::i32(0)], &[Register::reference(0), Register::i32(0)])
        .ret(&[Register::moved(0), Register::i32(0)]);
    let ordinal = m.function(f);
    m.export("make", ordinal);

    let mut ctx = context(m);
    let values = returned(ctx.invoke("make", &[]).unwrap());
    assert_eq!(values.len(), 2);
    let handle = values[0].as_vm_ref().unwrap();
    assert_eq!(handle.count(), 1);
    assert_eq!(handle.downcast::<Token>().map(|p| p.tag), Some(41));
    assert_eq!(values[1].as_i32(), Some(42));
}

#[test]
fn native_result_bank_mismatch_rejected() {
    let mut m = ModuleBuilder::new("t");
    let make = m.import("test.make");
    let mut f = FunctionBuilder::new(1, 1);
    f.const_i32(0, 1)
        .call_import(make, &[Register::i32(0)], &[Register::i32(0), Register::reference(0)])
        .ret(&[]);
    let ordinal = m.function(f);
    m.export("bad", ordinal);
    let mut ctx = context(m);
    assert!(matches!(ctx.invoke("bad", &[]), Err(VmError::InvalidArgument(_))));
}

#[test]
fn native_ref_argument_round_trip() {
    let mut m = ModuleBuilder::new("t");
    let tag = m.import("test.tag");
    let mut f = FunctionBuilder::new(1, 1);
    f.call_import(tag, &[Register::reference(0)], &[Register::i32(0)])
        .ret(&[Register::i32(0)]);
    let ordinal = m.function(f);
    m.export("tag", ordinal);
    let mut ctx = context(m);

    let token = Ref::new(Token { tag: 9 });
    let args = [Value::Ref(token.retain().into_vm_ref())];
    let values = returned(ctx.invoke("tag", &args).unwrap());
    assert_eq!(i32s(&values), vec![Some(9)]);
    drop(args);
    assert_eq!(token.count(), 1);
}

#[test]
fn variadic_span_call() {
    let mut m = ModuleBuilder::new("t");
    let sum = m.import("test.sum");
    let mut f = FunctionBuilder::new(4, 0);
    f.const_i32(0, 10)
        .const_i32(1, 1)
        .const_i32(2, 2)
        .const_i32(3, 3)
        .call_import_variadic(
            sum,
            &[1, 3],
            &[Register::i32(0), Register::i32(1), Register::i32(2), Register::i32(3)],
            &[Register::i32(0)],
        )
        .ret(&[Register::i32(0)]);
    let ordinal = m.function(f);
    m.export("sum", ordinal);
    let mut ctx = context(m);
    let values = returned(ctx.invoke("sum", &[]).unwrap());
    assert_eq!(i32s(&values), vec![Some(16)]);
}

#[test]
fn rodata_is_readable_by_natives() {
    let mut m = ModuleBuilder::new("t");
    let len = m.import("test.len");
    let seg = m.rodata(b"abc");
    let mut f = FunctionBuilder::new(1, 1);
    f.const_ref_rodata(0, seg)
        .call_import(len, &[Register::reference(0)], &[Register::i32(0)])
        .ret(&[Register::i32(0)]);
    let ordinal = m.function(f);
    m.export("len", ordinal);
    let mut ctx = context(m);
    let values = returned(ctx.invoke("len", &[]).unwrap());
    assert_eq!(i32s(&values), vec![Some(3)]);
    assert_eq!(ctx.state().rodata(seg as usize).unwrap().count(), 1);
}

#[test]
fn native_failure_propagates() {
    let mut m = ModuleBuilder::new("t");
    let fail = m.import("test.fail");
    let mut f = FunctionBuilder::new(1, 0);
    f.const_i32(0, 5)
        .call_import(fail, &[Register::i32(0)], &[Register::i32(0)])
        .ret(&[]);
    let ordinal = m.function(f);
    m.export("f", ordinal);
    let mut ctx = context(m);
    assert_eq!(
        ctx.invoke("f", &[]).unwrap_err(),
        VmError::NativeFailure("code 5".into())
    );
}

#[test]
fn globals_persist_across_invocations() {
    let mut m = ModuleBuilder::new("t");
    m.globals(1, 1);
    let mut bump = FunctionBuilder::new(2, 0);
    bump.global_load_i32(0, 0)
        .const_i32(1, 1)
        .binary(Opcode::AddI32, 0, 0, 1)
        .global_store_i32(0, 0)
        .ret(&[Register::i32(0)]);
    let bump = m.function(bump);
    m.export("bump", bump);
    let mut keep = FunctionBuilder::new(0, 1);
    keep.global_store_ref(0, 0).ret(&[]);
    let keep = m.function(keep);
    m.export("keep", keep);

    let mut ctx = context(m);
    assert_eq!(i32s(&returned(ctx.invoke("bump", &[]).unwrap())), vec![Some(1)]);
    assert_eq!(i32s(&returned(ctx.invoke("bump", &[]).unwrap())), vec![Some(2)]);
    assert_eq!(ctx.state().global_i32(0), Ok(2));

    let token = Ref::new(Token { tag: 0 });
    ctx.invoke("keep", &[Value::Ref(token.retain().into_vm_ref())]).unwrap();
    assert_eq!(token.count(), 2);
    drop(ctx);
    assert_eq!(token.count(), 1);
}

#[test]
fn stack_overflow_releases_refs() {
    let mut m = ModuleBuilder::new("t");
    let rec = m.reserve_function();
    let mut f = FunctionBuilder::new(0, 1);
    f.call(rec, &[Register::reference(0)], &[]).ret(&[]);
    m.define_function(rec, f);
    m.export("rec", rec);
    let mut ctx = context_with(m, VmConfig { max_stack_depth: 8 });

    let token = Ref::new(Token { tag: 0 });
    let args = [Value::Ref(token.retain().into_vm_ref())];
    assert_eq!(
        ctx.invoke("rec", &args).unwrap_err(),
        VmError::StackOverflow { depth: 9 }
    );
    assert_eq!(token.count(), 2);
    drop(args);
    assert_eq!(token.count(), 1);
}

#[test]
fn division_by_zero_unwinds_nested_frames() {
    let mut m = ModuleBuilder::new("t");
    let mut inner = FunctionBuilder::new(2, 1);
    inner.const_i32(1, 0).binary(Opcode::DivI32S, 0, 0, 1).ret(&[]);
    let inner = m.function(inner);
    let mut outer = FunctionBuilder::new(1, 1);
    outer
        .const_i32(0, 1)
        .call(inner, &[Register::i32(0), Register::reference(0)], &[])
        .ret(&[]);
    let outer = m.function(outer);
    m.export("outer", outer);
    let mut ctx = context(m);

    let token = Ref::new(Token { tag: 0 });
    let err = ctx
        .invoke("outer", &[Value::Ref(token.retain().into_vm_ref())])
        .unwrap_err();
    assert!(matches!(err, VmError::InvalidArgument(_)));
    assert_eq!(token.count(), 1);
}

#[test]
fn dropping_continuation_releases_refs() {
    let mut f = FunctionBuilder::new(0, 1);
    f.yield_now().ret(&[]);
    let mut ctx = context(single("hold", f));
    let token = Ref::new(Token { tag: 0 });
    let cont = ctx
        .invoke("hold", &[Value::Ref(token.retain().into_vm_ref())])
        .unwrap()
        .into_continuation()
        .unwrap();
    assert_eq!(token.count(), 2);
    drop(cont);
    assert_eq!(token.count(), 1);
}

#[test]
fn missing_import_is_unavailable() {
    for name in ["test.nope", "elsewhere.add"] {
        let mut m = ModuleBuilder::new("t");
        let import = m.import(name);
        let mut f = FunctionBuilder::new(0, 0);
        f.call_import(import, &[], &[]).ret(&[]);
        m.function(f);
        let module = Module::from_def(m.build().unwrap()).unwrap();
        let err = Context::new(module, vec![test_host()], VmConfig::default()).unwrap_err();
        assert!(matches!(err, VmError::Unavailable(_)), "{}", name);
    }
}

#[test]
fn unknown_export_is_unavailable() {
    let mut f = FunctionBuilder::new(0, 0);
    f.ret(&[]);
    let mut ctx = context(single("x", f));
    assert!(matches!(ctx.invoke("y", &[]), Err(VmError::Unavailable(_))));
}

#[test]
fn malformed_binaries_fail_to_load() {
    assert!(matches!(Module::load(b"nope"), Err(VmError::Load(_))));

    let mut f = FunctionBuilder::new(0, 0);
    f.ret(&[]);
    let bytes = single("x", f).to_bytes().unwrap();
    assert!(matches!(Module::load(&bytes[..bytes.len() - 3]), Err(VmError::Load(_))));

    let mut def = {
        let mut f = FunctionBuilder::new(0, 0);
        f.ret(&[]);
        single("x", f).build().unwrap()
    };
    def.functions[0].i32_register_count = i8::MIN;
    assert!(matches!(Module::load(&def.to_bytes()), Err(VmError::Load(_))));
}

#[test]
fn oversized_global_storage_fails_to_load() {
    let module = |i32_count: u32, ref_count: u32, rwdata: u32| {
        let mut f = FunctionBuilder::new(0, 0);
        f.ret(&[]);
        let mut m = single("x", f);
        m.globals(i32_count, ref_count).rwdata(rwdata);
        m.to_bytes().unwrap()
    };
    assert!(matches!(Module::load(&module(0, u32::MAX, 0)), Err(VmError::Load(_))));
    assert!(matches!(Module::load(&module(u32::MAX, 0, 0)), Err(VmError::Load(_))));
    assert!(matches!(Module::load(&module(0, 0, u32::MAX)), Err(VmError::Load(_))));
    assert!(Module::load(&module(256, 256, 4096)).is_ok());
}
