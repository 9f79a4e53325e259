//! Turns raw extracted triples into the canonical set persisted for one
//! owner.
//!
//! The canonical set is sorted by `(category, key)` in byte order and holds
//! one triple per `(category, key)`. When a page repeats a pair with
//! different values, the occurrence that comes last in the page wins.

use std::cmp::Ordering;

use crate::error::{KeyValueError, Result};
use crate::triple::{OwnedTriple, OwnerId, Triple};

/// Per-call input describing which owner is being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileContext {
    pub owner_id: OwnerId,
    /// Set for redirect pages; their content must not touch stored rows.
    pub suppressed: bool,
}

impl ReconcileContext {
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            suppressed: false,
        }
    }

    pub fn suppressed(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            suppressed: true,
        }
    }
}

/// Full replacement of one owner's rows: delete everything stored for
/// `owner_id`, then insert `triples`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceSet {
    owner_id: OwnerId,
    triples: Vec<Triple>,
}

impl ReplaceSet {
    /// A replace that only clears the owner, used when a page is deleted.
    pub fn delete_only(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            triples: Vec::new(),
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = OwnedTriple> + '_ {
        self.triples.iter().map(|triple| OwnedTriple {
            owner_id: self.owner_id,
            triple: triple.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The owner is an alias; nothing may be written or deleted.
    Suppressed { owner_id: OwnerId },
    Replace(ReplaceSet),
}

impl ReconcileOutcome {
    pub fn owner_id(&self) -> OwnerId {
        match self {
            Self::Suppressed { owner_id } => *owner_id,
            Self::Replace(set) => set.owner_id(),
        }
    }

    pub fn replace_set(&self) -> Option<&ReplaceSet> {
        match self {
            Self::Suppressed { .. } => None,
            Self::Replace(set) => Some(set),
        }
    }
}

pub fn reconcile<I>(context: &ReconcileContext, raw: I) -> ReconcileOutcome
where
    I: IntoIterator<Item = Triple>,
{
    if context.suppressed {
        return ReconcileOutcome::Suppressed {
            owner_id: context.owner_id,
        };
    }
    ReconcileOutcome::Replace(ReplaceSet {
        owner_id: context.owner_id,
        triples: canonicalize(raw),
    })
}

/// Like [`reconcile`] for rows that already carry an owner. Every row must
/// belong to the context owner.
pub fn reconcile_owned<I>(context: &ReconcileContext, rows: I) -> Result<ReconcileOutcome>
where
    I: IntoIterator<Item = OwnedTriple>,
{
    let mut triples = Vec::new();
    for row in rows {
        if row.owner_id != context.owner_id {
            return Err(KeyValueError::MixedOwnerInput {
                expected: context.owner_id,
                found: row.owner_id,
            });
        }
        triples.push(row.triple);
    }
    Ok(reconcile(context, triples))
}

/// Sorts by `(category, key)` and collapses each run of equal pairs to its
/// last occurrence in input order.
pub fn canonicalize<I>(raw: I) -> Vec<Triple>
where
    I: IntoIterator<Item = Triple>,
{
    let mut triples = raw.into_iter().map(Triple::clamped).collect::<Vec<_>>();
    // Stable, so input order survives inside a run.
    triples.sort_by(Triple::compare_key);

    let mut out: Vec<Triple> = Vec::with_capacity(triples.len());
    for triple in triples {
        match out.last_mut() {
            Some(last) if last.compare_key(&triple) == Ordering::Equal => *last = triple,
            _ => out.push(triple),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_triples;

    fn owned(owner: i64, category: &str, key: &str, value: &str) -> OwnedTriple {
        OwnedTriple {
            owner_id: OwnerId(owner),
            triple: Triple::new(category, key, value),
        }
    }

    #[test]
    fn canonicalize_sorts_by_category_then_key() {
        let out = canonicalize(vec![
            Triple::new("b", "x", "1"),
            Triple::new("a", "z", "2"),
            Triple::new("a", "y", "3"),
            Triple::new("B", "q", "4"),
        ]);
        let keys = out
            .iter()
            .map(|t| (t.category.as_str(), t.key.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(keys, vec![("B", "q"), ("a", "y"), ("a", "z"), ("b", "x")]);
    }

    #[test]
    fn canonicalize_keeps_last_occurrence_of_duplicate_pair() {
        let out = canonicalize(vec![
            Triple::new("Pricing", "usd", "9.99"),
            Triple::new("Other", "k", "v"),
            Triple::new("Pricing", "usd", "19.99"),
            Triple::new("Pricing", "usd", "29.99"),
        ]);
        assert_eq!(
            out,
            vec![
                Triple::new("Other", "k", "v"),
                Triple::new("Pricing", "usd", "29.99"),
            ]
        );
    }

    #[test]
    fn canonicalize_output_is_sorted_and_unique() {
        let mut raw = Vec::new();
        for i in 0..50u32 {
            raw.push(Triple::new(
                format!("c{}", i % 7),
                format!("k{}", i % 5),
                i.to_string(),
            ));
        }
        let out = canonicalize(raw);
        for pair in out.windows(2) {
            assert_eq!(pair[0].compare_key(&pair[1]), Ordering::Less);
        }
        assert_eq!(out.len(), 35);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize(extract_triples(
            "{{#keyvalue:B|b|1}}{{#keyvalue:A|a|2}}{{#keyvalue:A|a|3}}",
        ));
        let twice = canonicalize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn reconcile_pricing_scenario_yields_single_row() {
        let text = "{{#keyvalue: Pricing | usd | 9.99 }} junk {{#keyvalue: Pricing|usd|19.99}} {{#keyvalue: Specs | weight}}";
        let outcome = reconcile(&ReconcileContext::new(OwnerId(7)), extract_triples(text));
        let set = outcome.replace_set().expect("replace");
        assert_eq!(set.owner_id(), OwnerId(7));
        assert_eq!(set.triples(), &[Triple::new("Pricing", "usd", "19.99")]);
    }

    #[test]
    fn reconcile_empty_input_is_a_delete_only_replace() {
        let outcome = reconcile(&ReconcileContext::new(OwnerId(42)), Vec::new());
        assert_eq!(
            outcome,
            ReconcileOutcome::Replace(ReplaceSet::delete_only(OwnerId(42)))
        );
    }

    #[test]
    fn reconcile_suppressed_owner_ignores_input() {
        let outcome = reconcile(
            &ReconcileContext::suppressed(OwnerId(3)),
            vec![Triple::new("A", "a", "1")],
        );
        assert_eq!(outcome, ReconcileOutcome::Suppressed { owner_id: OwnerId(3) });
        assert!(outcome.replace_set().is_none());
    }

    #[test]
    fn reconcile_owned_rejects_mixed_owners() {
        let err = reconcile_owned(
            &ReconcileContext::new(OwnerId(1)),
            vec![owned(1, "A", "a", "1"), owned(2, "A", "b", "2")],
        )
        .expect_err("mixed owners");
        assert!(matches!(
            err,
            KeyValueError::MixedOwnerInput {
                expected: OwnerId(1),
                found: OwnerId(2)
            }
        ));
    }

    #[test]
    fn reconcile_owned_accepts_single_owner() {
        let outcome = reconcile_owned(
            &ReconcileContext::new(OwnerId(1)),
            vec![owned(1, "B", "b", "2"), owned(1, "A", "a", "1")],
        )
        .expect("reconcile");
        let rows = outcome.replace_set().expect("replace").rows().collect::<Vec<_>>();
        assert_eq!(rows, vec![owned(1, "A", "a", "1"), owned(1, "B", "b", "2")]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    // A small alphabet so generated inputs actually collide on (category, key).
    fn triple_strategy() -> impl Strategy<Value = Triple> {
        ("[ABab]{0,2}", "[xyXY]{0,2}", "\\PC{0,6}")
            .prop_map(|(category, key, value)| Triple::new(category, key, value))
    }

    proptest! {
        #[test]
        fn canonical_set_is_strictly_ordered(raw in prop::collection::vec(triple_strategy(), 0..40)) {
            let out = canonicalize(raw);
            for pair in out.windows(2) {
                prop_assert_eq!(pair[0].compare_key(&pair[1]), Ordering::Less);
            }
        }

        #[test]
        fn last_occurrence_of_each_pair_wins(raw in prop::collection::vec(triple_strategy(), 0..40)) {
            let out = canonicalize(raw.clone());
            for triple in &out {
                let last = raw
                    .iter()
                    .rev()
                    .find(|candidate| candidate.compare_key(triple) == Ordering::Equal);
                prop_assert_eq!(last, Some(triple));
            }
            for candidate in &raw {
                prop_assert!(out.iter().any(|triple| triple.compare_key(candidate) == Ordering::Equal));
            }
        }

        #[test]
        fn reconcile_is_idempotent(owner in any::<i64>(), raw in prop::collection::vec(triple_strategy(), 0..40)) {
            let context = ReconcileContext::new(OwnerId(owner));
            let first = reconcile(&context, raw);
            let set = first.replace_set().expect("replace set");
            let second = reconcile(&context, set.triples().to_vec());
            prop_assert_eq!(&second, &first);
        }
    }
}
