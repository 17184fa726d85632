// benches/value_ops.rs
//! Benchmarks for value rendering and frame management
//!
//! Run with: cargo bench

use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dyn_runtime::{
    stringify, Chunk, FunctionObj, NativeFailure, NativeFunction, ObjectData, Value, Vm,
};

fn function(name: &str, locals: usize) -> Rc<RefCell<FunctionObj>> {
    let mut chunk = Chunk::new();
    for i in 0..locals {
        chunk.add_variable(format!("v{i}"));
    }
    Rc::new(RefCell::new(FunctionObj::new(name, chunk)))
}

fn benchmark_stringify(c: &mut Criterion) {
    let mut object = ObjectData::new();
    for i in 0..20 {
        object.set(format!("field_{i}"), Value::number(i as f64 * 1.25));
    }
    object.set("tags", Value::from(vec!["a", "b", "c"]));
    let value = Value::object(object);

    c.bench_function("stringify_object", |b| b.iter(|| stringify(black_box(&value), true)));

    let mut group = c.benchmark_group("stringify_list");
    for size in [10, 100, 1000] {
        let list = Value::list((0..size).map(|i| Value::number(i as f64 / 3.0)).collect());
        group.bench_with_input(BenchmarkId::from_parameter(size), &list, |b, list| {
            b.iter(|| stringify(black_box(list), false))
        });
    }
    group.finish();
}

fn benchmark_call_return(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_return");
    for depth in [1, 10, 100] {
        let f = function("f", 4);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut vm = Vm::new();
            b.iter(|| {
                for _ in 0..depth {
                    vm.call(&f, vec![Value::number(1.0)]).ok();
                }
                for _ in 0..depth {
                    vm.ret(Value::none()).ok();
                    vm.pop();
                }
            })
        });
    }
    group.finish();
}

fn benchmark_generator_resume(c: &mut Criterion) {
    let template = Rc::new(RefCell::new(FunctionObj::new("gen", Chunk::new()).as_generator()));

    c.bench_function("generator_resume_yield", |b| {
        let mut vm = Vm::new();
        let gen = vm.instantiate_generator(&template).unwrap();
        b.iter(|| {
            vm.resume(&gen, vec![]).ok();
            vm.yield_value(black_box(Value::number(1.0))).ok();
            vm.pop();
        })
    });
}

fn double(args: &[Value]) -> Result<Value, NativeFailure> {
    let n = dyn_runtime::Args::new("double", args).number(0)?;
    Ok(Value::number(n * 2.0))
}

fn benchmark_native_call(c: &mut Criterion) {
    let native = NativeFunction::catchable("double", double);
    let mut vm = Vm::new();

    c.bench_function("native_call", |b| {
        b.iter(|| vm.call_native(&native, vec![black_box(Value::number(21.0))]))
    });
}

criterion_group!(
    benches,
    benchmark_stringify,
    benchmark_call_return,
    benchmark_generator_resume,
    benchmark_native_call
);
criterion_main!(benches);
