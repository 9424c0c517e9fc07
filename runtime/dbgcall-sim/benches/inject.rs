//! Injection round-trip benchmarks
//!
//! Measures one complete injection against the simulated target: signal,
//! save, run, return, restore and wake. Dominated by the two thread hand-offs
//! (signal delivery and completion wake).

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dbgcall::{Aarch64, Arch, CallRequest, Dispatcher, FuncVal, Injector, Ppc64le, RegArgs};
use dbgcall_sim::{trampoline, SimTarget, SimUnit};

fn add_function<A: Arch>() -> (Arc<Dispatcher<A, SimUnit>>, Arc<SimUnit>, SimTarget<A>, FuncVal) {
    let mut builder = SimTarget::<A>::builder();
    let add = builder.function(|call| {
        let sum = call.int_arg(0).wrapping_add(call.int_arg(1));
        call.set_int_result(0, sum);
        Ok(())
    });
    let dispatcher = Arc::new(Dispatcher::new(trampoline()));
    let unit = Arc::new(SimUnit::running());
    let target = builder
        .spawn(Arc::clone(&unit), Arc::clone(&dispatcher))
        .expect("Failed to spawn target thread");
    (dispatcher, unit, target, add)
}

fn bench_round_trip<A: Arch>(c: &mut Criterion) {
    let (dispatcher, unit, target, add) = add_function::<A>();
    let injector = Injector::new(&dispatcher);
    let mut args = RegArgs::new();
    args.ints[0] = 40;
    args.ints[1] = 2;

    c.bench_with_input(BenchmarkId::new("inject_call", A::NAME), &args, |b, args| {
        b.iter(|| {
            let request = CallRequest::new(&*unit, add, target.signaler()).reg_args(*args);
            black_box(injector.inject_call(request).expect("Injection failed"))
        })
    });

    target.stop();
}

fn bench_aarch64(c: &mut Criterion) {
    bench_round_trip::<Aarch64>(c);
}

fn bench_ppc64le(c: &mut Criterion) {
    bench_round_trip::<Ppc64le>(c);
}

criterion_group!(benches, bench_aarch64, bench_ppc64le);
criterion_main!(benches);
