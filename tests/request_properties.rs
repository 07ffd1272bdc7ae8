//! Property-based tests for fetch-request builder invariants.

mod common;

use common::User;
use proptest::prelude::*;
use strata::{FetchRequest, Predicate, Value};

proptest! {
    /// Builder calls never mutate the receiver.
    #[test]
    fn prop_builders_do_not_mutate(
        offset in 0usize..1000,
        limit in 0usize..1000,
        name in "[a-zA-Z]{1,12}",
    ) {
        let base = FetchRequest::<User>::new();
        let built = base
            .filtered_key_eq("name", name.as_str())
            .offset(offset)
            .limit(limit);

        prop_assert_eq!(base.fetch_offset(), 0);
        prop_assert_eq!(base.fetch_limit(), 0);
        prop_assert!(base.predicate().is_none());

        prop_assert_eq!(built.fetch_offset(), offset);
        prop_assert_eq!(built.fetch_limit(), limit);
        prop_assert!(built.predicate().is_some());
    }

    /// Requests built the same way compare equal; changing any descriptor
    /// field breaks equality.
    #[test]
    fn prop_equality_is_structural(
        offset in 0usize..100,
        limit in 1usize..100,
        name in "[a-z]{1,8}",
    ) {
        let a = FetchRequest::<User>::new()
            .filtered_key_eq("name", name.as_str())
            .offset(offset)
            .limit(limit);
        let b = FetchRequest::<User>::new()
            .filtered_key_eq("name", name.as_str())
            .offset(offset)
            .limit(limit);
        prop_assert_eq!(&a, &b);

        let different = a.limit(limit + 1);
        prop_assert_ne!(&a, &different);
    }

    /// Later builder calls replace earlier values for the same field and
    /// leave the others untouched.
    #[test]
    fn prop_last_builder_call_wins(
        first in 0usize..100,
        second in 0usize..100,
        offset in 0usize..100,
    ) {
        let request = FetchRequest::<User>::new()
            .offset(offset)
            .limit(first)
            .limit(second);
        prop_assert_eq!(request.fetch_limit(), second);
        prop_assert_eq!(request.fetch_offset(), offset);
    }

    /// Membership predicates agree with plain set membership.
    #[test]
    fn prop_in_predicate_matches_membership(
        values in proptest::collection::vec("[a-z]{1,6}", 0..8),
        probe in "[a-z]{1,6}",
    ) {
        let mut record = strata::Record::new();
        record.insert("name".into(), Value::String(probe.clone()));

        let contained = values.iter().any(|v| *v == probe);
        let in_predicate = Predicate::key_in("name", values.clone());
        let not_in_predicate = Predicate::key_not_in("name", values);

        prop_assert_eq!(in_predicate.evaluate(&record), contained);
        prop_assert_eq!(not_in_predicate.evaluate(&record), !contained);
    }
}
