use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use weave_primitives::{AggregateId, BindingId, InstanceId, JoinPointKey, MemberDescriptor, Value};
use weave_registry::{AdviceMember, Binding, BindingKind};

use super::*;

fn key(s: &str) -> JoinPointKey {
	JoinPointKey::parse(s).unwrap()
}

fn instance(id: u64) -> AggregateInstance {
	AggregateInstance::new(InstanceId(id), AggregateId(0), Value::Unit)
}

fn binding(id: u32) -> Arc<Binding> {
	Arc::new(Binding::advice(
		BindingKind::Before,
		AggregateId(0),
		MemberDescriptor::parse("app.Shape.draw()V").unwrap(),
		AdviceMember::new("R", "adv", "()V"),
		BindingId(id),
	))
}

fn pairs(table: &JoinPointTable, jp: JoinPointId) -> Vec<(u64, u32)> {
	table
		.get_active_bindings(jp)
		.unwrap()
		.iter()
		.map(|e| {
			let (i, b) = e.pair();
			(i.0, b.0)
		})
		.collect()
}

#[test]
fn ids_are_stable_and_monotonic() {
	let table = JoinPointTable::default();
	let a = table.get_or_create_id(&key("app.Shape.draw()"));
	let b = table.get_or_create_id(&key("app.Circle.draw()"));
	assert_eq!(a, JoinPointId(0));
	assert_eq!(b, JoinPointId(1));
	assert_eq!(table.get_or_create_id(&key("app.Shape.draw()V")), a);
	assert_eq!(table.id("app.Circle.draw()"), Some(b));
	assert_eq!(table.key(b).unwrap().as_str(), "app.Circle.draw()");
	assert_eq!(table.len(), 2);
}

#[test]
fn concurrent_id_assignment_agrees() {
	let table = JoinPointTable::default();
	let keys: Vec<_> = (0..32).map(|i| key(&format!("app.C{i}.m()"))).collect();
	let results: Vec<Vec<JoinPointId>> = std::thread::scope(|s| {
		let handles: Vec<_> = (0..4)
			.map(|_| s.spawn(|| keys.iter().map(|k| table.get_or_create_id(k)).collect::<Vec<_>>()))
			.collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});
	for r in &results[1..] {
		assert_eq!(r, &results[0]);
	}
	assert_eq!(table.len(), 32);
}

#[test]
fn newest_registration_comes_first() {
	let table = JoinPointTable::default();
	let jp = table.get_or_create_id(&key("app.Shape.draw()"));
	table.register(&instance(1), binding(0), jp).unwrap();
	table.register(&instance(2), binding(0), jp).unwrap();
	assert_eq!(pairs(&table, jp), [(2, 0), (1, 0)]);
}

#[test]
fn registration_is_idempotent() {
	let table = JoinPointTable::default();
	let jp = table.get_or_create_id(&key("app.Shape.draw()"));
	let inst = instance(1);
	assert_eq!(table.register(&inst, binding(3), jp).unwrap(), 1);
	let token = table.token(jp).unwrap();
	assert_eq!(table.register(&inst, binding(3), jp).unwrap(), 0);
	assert_eq!(pairs(&table, jp), [(1, 3)]);
	// No change, no invalidation.
	assert!(token.is_valid());
}

#[test]
fn unregister_removes_every_entry_of_the_instance() {
	let table = JoinPointTable::default();
	let jp = table.get_or_create_id(&key("app.Shape.draw()"));
	let inst = instance(1);
	table.register(&inst, binding(0), jp).unwrap();
	table.register(&instance(2), binding(0), jp).unwrap();
	table.register(&inst, binding(1), jp).unwrap();
	assert_eq!(table.unregister(&inst, jp).unwrap(), 2);
	assert_eq!(pairs(&table, jp), [(2, 0)]);
}

#[test]
fn mutations_retire_tokens() {
	let table = JoinPointTable::default();
	let jp = table.get_or_create_id(&key("app.Shape.draw()"));
	let other = table.get_or_create_id(&key("app.Shape.fill()"));
	let inst = instance(1);

	let token = table.token(jp).unwrap();
	let unrelated = table.token(other).unwrap();
	table.register(&inst, binding(0), jp).unwrap();
	assert!(!token.is_valid());
	assert!(unrelated.is_valid());

	let token = table.token(jp).unwrap();
	table.unregister(&inst, jp).unwrap();
	assert!(!token.is_valid());

	let token = table.token(jp).unwrap();
	assert_eq!(table.invalidate(jp).unwrap(), 1);
	assert!(!token.is_valid());
	assert!(pairs(&table, jp).is_empty());
}

#[test]
fn merge_replicates_and_propagates_transitively() {
	let table = JoinPointTable::default();
	let shape = table.get_or_create_id(&key("app.Shape.draw()"));
	let circle = table.get_or_create_id(&key("app.Circle.draw()"));
	let unit = table.get_or_create_id(&key("app.UnitCircle.draw()"));

	table.register(&instance(1), binding(0), shape).unwrap();
	assert!(table.merge_joinpoints(shape, MergeTarget::JoinPoint(circle)).unwrap());
	assert!(table.merge_joinpoints(circle, MergeTarget::JoinPoint(unit)).unwrap());
	assert_eq!(pairs(&table, circle), [(1, 0)]);
	assert_eq!(pairs(&table, unit), [(1, 0)]);

	let token = table.token(unit).unwrap();
	table.register(&instance(2), binding(0), shape).unwrap();
	assert_eq!(pairs(&table, unit), [(2, 0), (1, 0)]);
	assert!(!token.is_valid());

	table.unregister(&instance(1), shape).unwrap();
	assert_eq!(pairs(&table, unit), [(2, 0)]);
	assert_eq!(table.subjoinpoints(shape), vec![circle]);
}

#[test]
fn diamond_merge_has_no_duplicates() {
	let table = JoinPointTable::default();
	let top = table.get_or_create_id(&key("T.m()"));
	let left = table.get_or_create_id(&key("L.m()"));
	let right = table.get_or_create_id(&key("R.m()"));
	let bottom = table.get_or_create_id(&key("B.m()"));
	for (sup, sub) in [(top, left), (top, right), (left, bottom), (right, bottom)] {
		table.merge_joinpoints(sup, MergeTarget::JoinPoint(sub)).unwrap();
	}
	// Repeated merges are no-ops.
	assert!(!table.merge_joinpoints(top, MergeTarget::JoinPoint(left)).unwrap());

	table.register(&instance(1), binding(0), top).unwrap();
	assert_eq!(pairs(&table, bottom), [(1, 0)]);
}

#[test]
fn placeholder_merge_waits_for_wiring() {
	let table = JoinPointTable::default();
	let shape = table.get_or_create_id(&key("app.Shape.draw()"));
	table.register(&instance(1), binding(0), shape).unwrap();

	let ph = table.create_placeholder();
	assert!(!table.merge_joinpoints(shape, MergeTarget::Placeholder(ph)).unwrap());
	assert_eq!(table.pending().len(), 1);
	assert_eq!(table.replay_pending().waiting, 1);

	let circle = table.get_or_create_id(&key("app.Circle.draw()"));
	let report = table.wire_placeholder(ph, circle).unwrap();
	assert_eq!(report.completed, 1);
	assert!(table.pending().is_empty());
	assert_eq!(pairs(&table, circle), [(1, 0)]);

	// Once wired, merges apply immediately.
	let extra = table.get_or_create_id(&key("app.Shape.fill()"));
	table.register(&instance(2), binding(1), extra).unwrap();
	assert!(table.merge_joinpoints(extra, MergeTarget::Placeholder(ph)).unwrap());
	assert_eq!(pairs(&table, circle), [(2, 1), (1, 0)]);
}

#[test]
fn placeholder_merges_racing_with_wiring_are_never_stranded() {
	const N: u32 = 64;
	let table = JoinPointTable::default();
	let mut jobs = Vec::new();
	for i in 0..N {
		let sup = table.get_or_create_id(&key(&format!("app.Base{i}.run()")));
		let sub = table.get_or_create_id(&key(&format!("app.Derived{i}.run()")));
		table.register(&instance(u64::from(i)), binding(i), sup).unwrap();
		jobs.push((sup, sub, table.create_placeholder()));
	}

	std::thread::scope(|s| {
		s.spawn(|| {
			for &(sup, _, ph) in &jobs {
				table.merge_joinpoints(sup, MergeTarget::Placeholder(ph)).unwrap();
			}
		});
		s.spawn(|| {
			for &(_, sub, ph) in &jobs {
				table.wire_placeholder(ph, sub).unwrap();
			}
		});
	});

	assert!(table.pending().is_empty());
	for (i, &(_, sub, _)) in jobs.iter().enumerate() {
		assert_eq!(pairs(&table, sub), [(i as u64, i as u32)]);
	}
}

#[test]
fn failing_pending_tasks_are_kept_or_dropped() {
	let cfg = RuntimeConfig {
		max_pending_retries: Some(2),
		..RuntimeConfig::default()
	};
	let table = JoinPointTable::new(&cfg);
	table.defer(
		"always fails",
		Box::new(|_: &JoinPointTable| Err(LinkageError::UnknownJoinPoint(JoinPointId(99)))),
	);
	let first = table.replay_pending();
	assert_eq!(first.failed, 1);
	assert_eq!(table.pending().len(), 1);
	let second = table.replay_pending();
	assert_eq!(second.dropped, 1);
	assert!(table.pending().is_empty());
}

#[test]
fn unknown_ids_are_linkage_errors() {
	let table = JoinPointTable::default();
	assert!(matches!(
		table.get_active_bindings(JoinPointId(4)),
		Err(LinkageError::UnknownJoinPoint(JoinPointId(4)))
	));
	assert!(matches!(
		table.wire_placeholder(PlaceholderId(0), JoinPointId(0)),
		Err(LinkageError::UnknownJoinPoint(_))
	));
}

proptest! {
	#[test]
	fn active_lists_never_hold_duplicates(
		ops in prop::collection::vec((any::<bool>(), 0u64..4, 0u32..3, 0usize..3), 1..40),
	) {
		let table = JoinPointTable::default();
		let jps: Vec<_> = ["A.m()", "B.m()", "C.m()"].iter().map(|k| table.get_or_create_id(&key(k))).collect();
		table.merge_joinpoints(jps[0], MergeTarget::JoinPoint(jps[1])).unwrap();
		table.merge_joinpoints(jps[1], MergeTarget::JoinPoint(jps[2])).unwrap();

		for (add, inst, b, jp) in ops {
			if add {
				table.register(&instance(inst), binding(b), jps[jp]).unwrap();
			} else {
				table.unregister(&instance(inst), jps[jp]).unwrap();
			}
		}
		for &jp in &jps {
			let list = pairs(&table, jp);
			let mut dedup = list.clone();
			dedup.sort_unstable();
			dedup.dedup();
			prop_assert_eq!(dedup.len(), list.len());
		}
	}
}
