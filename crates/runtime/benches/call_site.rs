//! Call-site cost: cache hits against recomposition.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use weave_primitives::{BindingId, BoundMethodId, ContextId, MemberDescriptor, Value};
use weave_registry::{AdviceMember, Binding, BindingKind};
use weave_runtime::{CallSite, DispatchRuntime};

const TARGET: &str = "bench.Account.balance()J";

fn setup(advice: u32) -> (DispatchRuntime, CallSite) {
	let rt = DispatchRuntime::new();
	let jp = rt.joinpoint_id(TARGET).unwrap();
	rt.link_original(jp, |_| Ok(Value::Int(42))).unwrap();

	let agg = rt.declare_aggregate("Bench", None).unwrap();
	rt.link_lifting(agg, "bench.Account", |_, r| Ok(r.clone()));
	let bindings: Vec<_> = (0..advice)
		.map(|i| {
			let kind = if i % 2 == 0 { BindingKind::Before } else { BindingKind::After };
			Binding::advice(
				kind,
				agg,
				MemberDescriptor::parse(TARGET).unwrap(),
				AdviceMember::new("Role", "observe", "()V"),
				BindingId(i),
			)
		})
		.collect();
	rt.register_aggregate_bindings(agg, bindings).unwrap();
	for i in 0..advice {
		rt.link_advice(agg, BindingId(i), |_| Ok(Value::Unit));
	}
	let inst = rt.instantiate(agg, Value::Unit).unwrap();
	rt.activate(&inst, ContextId::ALL).unwrap();

	let site = rt.call_site(TARGET, BoundMethodId(0)).unwrap();
	(rt, site)
}

fn bench_call_site(c: &mut Criterion) {
	let receiver = Value::Unit;
	let mut group = c.benchmark_group("call_site");
	for advice in [0u32, 4] {
		let (rt, site) = setup(advice);
		group.bench_function(format!("hit/{advice}"), |b| {
			b.iter(|| black_box(site.invoke(black_box(&receiver), &[])))
		});
		group.bench_function(format!("recompose/{advice}"), |b| {
			b.iter(|| {
				rt.invalidate_all();
				black_box(site.invoke(black_box(&receiver), &[]))
			})
		});
	}
	group.finish();
}

criterion_group!(benches, bench_call_site);
criterion_main!(benches);
