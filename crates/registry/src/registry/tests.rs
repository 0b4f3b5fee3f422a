use std::sync::Arc;

use pretty_assertions::assert_eq;
use weave_primitives::{AggregateId, BindingId, GlobalId, JoinPointKey, MemberDescriptor};

use super::*;
use crate::binding::{AdviceMember, Binding, BindingKind};

fn target() -> MemberDescriptor {
	MemberDescriptor::parse("app.Account.withdraw(J)V").unwrap()
}

fn key() -> JoinPointKey {
	JoinPointKey::parse("app.Account.withdraw(J)").unwrap()
}

fn advice(kind: BindingKind, agg: AggregateId, id: u32, name: &str) -> Binding {
	Binding::advice(kind, agg, target(), AdviceMember::new("Role", name, "(J)V"), BindingId(id))
}

#[test]
fn declare_is_idempotent_per_name() {
	let reg = BindingRegistry::new();
	let a = reg.declare_aggregate("Audit", None).unwrap();
	let b = reg.declare_aggregate("Audit", None).unwrap();
	assert_eq!(a, b);
	assert_eq!(reg.aggregate_id("Audit"), Some(a));
	assert_eq!(reg.snapshot().aggregates().len(), 1);
}

#[test]
fn super_must_exist_and_stay_consistent() {
	let reg = BindingRegistry::new();
	assert!(matches!(
		reg.declare_aggregate("Child", Some("Missing")),
		Err(RegistryError::UnknownAggregate(_))
	));
	reg.declare_aggregate("Base", None).unwrap();
	reg.declare_aggregate("Child", Some("Base")).unwrap();
	assert!(matches!(
		reg.declare_aggregate("Child", None),
		Err(RegistryError::ConflictingSuper { .. })
	));
}

#[test]
fn reregistering_identical_bindings_is_a_noop() {
	let reg = BindingRegistry::new();
	let agg = reg.declare_aggregate("Audit", None).unwrap();
	let bindings = vec![advice(BindingKind::Before, agg, 0, "log")];

	let first = reg.register_aggregate_bindings(agg, bindings.clone()).unwrap();
	assert_eq!(first, RegisterOutcome { added: 1, unchanged: 0 });
	let generation = reg.snapshot().generation;

	let second = reg.register_aggregate_bindings(agg, bindings).unwrap();
	assert_eq!(second, RegisterOutcome { added: 0, unchanged: 1 });
	assert_eq!(reg.snapshot().generation, generation);
	assert_eq!(reg.bindings_for(&key()).len(), 1);
}

#[test]
fn conflicting_duplicate_is_rejected_atomically() {
	let reg = BindingRegistry::new();
	let agg = reg.declare_aggregate("Audit", None).unwrap();
	reg.register_aggregate_bindings(agg, [advice(BindingKind::Before, agg, 0, "log")])
		.unwrap();

	let err = reg
		.register_aggregate_bindings(
			agg,
			[
				advice(BindingKind::After, agg, 7, "fresh"),
				advice(BindingKind::Before, agg, 0, "other"),
			],
		)
		.unwrap_err();
	assert!(matches!(err, RegistryError::DuplicateBinding { local_id: BindingId(0), .. }));
	// Nothing from the failed call was published.
	assert_eq!(reg.bindings_for(&key()).len(), 1);
}

#[test]
fn foreign_and_malformed_bindings_are_rejected() {
	let reg = BindingRegistry::new();
	let a = reg.declare_aggregate("A", None).unwrap();
	let b = reg.declare_aggregate("B", None).unwrap();
	assert!(matches!(
		reg.register_aggregate_bindings(a, [advice(BindingKind::Before, b, 0, "x")]),
		Err(RegistryError::ForeignBinding { .. })
	));

	let mut broken = advice(BindingKind::Replace, a, 1, "x");
	broken.advice = None;
	assert!(matches!(
		reg.register_aggregate_bindings(a, [broken]),
		Err(RegistryError::MalformedBinding { .. })
	));
	assert!(matches!(
		reg.register_aggregate_bindings(AggregateId(9), Vec::<Binding>::new()),
		Err(RegistryError::UnknownAggregateId(_))
	));
}

#[test]
fn joinpoint_index_is_precedence_sorted() {
	let reg = BindingRegistry::new();
	let low = reg.declare_aggregate("Low", None).unwrap();
	let high = reg.declare_aggregate("High", None).unwrap();
	reg.register_aggregate_bindings(low, [advice(BindingKind::Replace, low, 0, "low")])
		.unwrap();
	reg.register_aggregate_bindings(
		high,
		[
			advice(BindingKind::Replace, high, 0, "high"),
			advice(BindingKind::After, high, 1, "after"),
		],
	)
	.unwrap();
	reg.declare_precedence(None, &["High", "Low"]).unwrap();

	let names: Vec<String> = reg
		.bindings_for(&key())
		.iter()
		.map(|b| b.advice.as_ref().unwrap().name.to_string())
		.collect();
	assert_eq!(names, ["after", "high", "low"]);

	let only_low = reg.advice_for(low, &key());
	assert_eq!(only_low.len(), 1);
	assert_eq!(only_low[0].aggregate, low);
}

#[test]
fn aggregate_labels_are_ranked() {
	let reg = BindingRegistry::new();
	let agg = reg.declare_aggregate("Audit", None).unwrap();
	reg.register_aggregate_bindings(
		agg,
		[
			advice(BindingKind::Before, agg, 0, "a").with_label("first"),
			advice(BindingKind::Before, agg, 1, "b").with_label("second"),
		],
	)
	.unwrap();
	reg.declare_precedence(Some(agg), &["second", "first"]).unwrap();

	let ids: Vec<u32> = reg.bindings_for(&key()).iter().map(|b| b.local_id.0).collect();
	assert_eq!(ids, [1, 0]);

	// Redeclaring the same sequence publishes nothing.
	let generation = reg.snapshot().generation;
	reg.declare_precedence(Some(agg), &["second", "first"]).unwrap();
	assert_eq!(reg.snapshot().generation, generation);
}

#[test]
fn access_ids_resolve_through_super_chain() {
	let reg = BindingRegistry::new();
	let base = reg.declare_aggregate("Base", None).unwrap();
	let child = reg.declare_aggregate("Child", Some("Base")).unwrap();
	let field = MemberDescriptor::parse("app.Account.balance()J").unwrap();
	reg.register_aggregate_bindings(
		base,
		[Binding::access(BindingKind::FieldAccess, base, field.clone(), BindingId(3))],
	)
	.unwrap();
	reg.register_aggregate_bindings(
		child,
		[Binding::access(BindingKind::MethodAccess, child, target(), BindingId(0))],
	)
	.unwrap();

	let inherited = reg.member_id(child, BindingId(3)).unwrap();
	assert_eq!(reg.member_id(base, BindingId(3)), Some(inherited));
	let own = reg.member_id(child, BindingId(0)).unwrap();
	assert_ne!(own, inherited);
	assert_eq!(reg.member_id(base, BindingId(0)), None);
}

#[test]
fn same_member_shares_global_id_across_aggregates() {
	let reg = BindingRegistry::new();
	let a = reg.declare_aggregate("A", None).unwrap();
	let b = reg.declare_aggregate("B", None).unwrap();
	let field = MemberDescriptor::parse("app.Account.balance()J").unwrap();
	reg.register_aggregate_bindings(a, [Binding::access(BindingKind::FieldAccess, a, field.clone(), BindingId(0))])
		.unwrap();
	reg.register_aggregate_bindings(b, [Binding::access(BindingKind::FieldAccess, b, field, BindingId(5))])
		.unwrap();
	assert_eq!(reg.member_id(a, BindingId(0)), reg.member_id(b, BindingId(5)));
}

#[test]
fn explicit_global_ids_are_kept() {
	let reg = BindingRegistry::new();
	let a = reg.declare_aggregate("A", None).unwrap();
	let field = MemberDescriptor::parse("app.Account.balance()J").unwrap();
	let other = MemberDescriptor::parse("app.Account.owner()Ljava.lang.String;").unwrap();
	reg.register_aggregate_bindings(
		a,
		[
			Binding::access(BindingKind::FieldAccess, a, field, BindingId(0)).with_global_id(GlobalId(40)),
			Binding::access(BindingKind::FieldAccess, a, other, BindingId(1)),
		],
	)
	.unwrap();
	assert_eq!(reg.member_id(a, BindingId(0)), Some(GlobalId(40)));
	assert_eq!(reg.member_id(a, BindingId(1)), Some(GlobalId(41)));
}

#[test]
fn associations_and_unload() {
	let reg = BindingRegistry::new();
	let agg = reg.declare_aggregate("Audit", None).unwrap();
	reg.register_aggregate_bindings(
		agg,
		[
			Binding::association(agg, "app.Account", BindingId(0)),
			advice(BindingKind::Before, agg, 1, "log"),
		],
	)
	.unwrap();
	let classes = reg.associated_classes(agg);
	assert_eq!(classes, vec![Arc::<str>::from("app.Account")]);

	let removed = reg.unload_aggregate(agg).unwrap();
	assert_eq!(removed.len(), 2);
	assert!(reg.bindings_for(&key()).is_empty());
	assert!(reg.aggregate(agg).unwrap().unloaded);
	assert!(reg.unload_aggregate(agg).unwrap().is_empty());
}

#[test]
fn descriptor_registration_end_to_end() {
	let src = r#"
name = "Audit"
precedence = [["late", "early"]]

[[bindings]]
kind = "before"
id = 0
target = "app.Account.withdraw(J)V"
advice = { role = "W", name = "early", signature = "(J)V" }
label = "early"

[[bindings]]
kind = "before"
id = 1
target = "app.Account.withdraw(J)V"
advice = { role = "W", name = "late", signature = "(J)V" }
label = "late"
"#;
	let reg = BindingRegistry::new();
	let desc = crate::AggregateDescriptor::from_toml_str(src).unwrap();
	let id = reg.register_descriptor(&desc).unwrap();
	assert_eq!(reg.register_descriptor(&desc).unwrap(), id);

	let ids: Vec<u32> = reg.bindings_for(&key()).iter().map(|b| b.local_id.0).collect();
	assert_eq!(ids, [1, 0]);
	assert!(reg.binding(id, &target(), BindingId(1)).is_some());
}

#[test]
fn concurrent_registration_loses_nothing() {
	let reg = Arc::new(BindingRegistry::new());
	let handles: Vec<_> = (0..8)
		.map(|t| {
			let reg = reg.clone();
			std::thread::spawn(move || {
				let agg = reg.declare_aggregate(&format!("Agg{t}"), None).unwrap();
				for i in 0..16 {
					reg.register_aggregate_bindings(agg, [advice(BindingKind::Before, agg, i, "x")])
						.unwrap();
				}
			})
		})
		.collect();
	for h in handles {
		h.join().unwrap();
	}
	assert_eq!(reg.bindings_for(&key()).len(), 8 * 16);
}
