//! The fingerprint index: a coarse, cheap pre-filter for unification
//! candidate retrieval.
//!
//! A fingerprint samples two positions of a term (the root symbol and the
//! symbol of the first argument) into integer codes. Three codes are
//! reserved: `A` for "variable at this position", `B` for "below a
//! variable" (the position is unreachable because an ancestor is a
//! variable) and `N` for "position does not exist". Terms that can unify
//! always have compatible fingerprints, so a trie over the codes maps a
//! query to a small set of candidate buckets; false positives are filtered
//! through real unification afterwards.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use saturn_ir::{
    Bank, ClauseId, LiteralId, ResultSubstitution, RobSubstitution, TermData, TermId, TermStore,
};

use crate::Entry;

pub const FINGERPRINT_SIZE: usize = 2;

const A: i64 = -1;
const B: i64 = -2;
const N: i64 = -4;

pub type Fingerprint = [i64; FINGERPRINT_SIZE];

/// The fingerprint of a term: `[top symbol, top symbol of first argument]`.
pub fn fingerprint(store: &TermStore, t: TermId) -> Fingerprint {
    match store.data(t) {
        TermData::Var(_) | TermData::SpecialVar(_) => [A, B],
        TermData::App { functor, args } => {
            let root = functor.index as i64;
            if args.is_empty() {
                return [root, N];
            }
            match store.data(args[0]) {
                TermData::Var(_) | TermData::SpecialVar(_) => [root, A],
                TermData::App { functor, .. } => [root, functor.index as i64],
            }
        }
    }
}

enum Node {
    Branch(FxHashMap<i64, Node>),
    Leaf(u32),
}

/// The trie from fingerprints to bucket ids.
pub struct FingerprintIndex {
    root: Node,
    fresh_bucket: u32,
}

impl Default for FingerprintIndex {
    fn default() -> Self {
        FingerprintIndex::new()
    }
}

impl FingerprintIndex {
    pub fn new() -> FingerprintIndex {
        FingerprintIndex {
            root: Node::Branch(FxHashMap::default()),
            fresh_bucket: 0,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.fresh_bucket as usize
    }

    /// The bucket of `fp`, allocated on first use.
    pub fn make_bucket(&mut self, fp: Fingerprint) -> u32 {
        let fresh = &mut self.fresh_bucket;
        make_bucket_from(&mut self.root, fp, fresh, 0)
    }

    /// All buckets whose fingerprints are unification-compatible with `fp`.
    pub fn unification_buckets(&self, fp: Fingerprint) -> Vec<u32> {
        let mut results = vec![];
        get_unifications(&self.root, &mut results, fp, 0);
        results
    }
}

fn make_bucket_from(node: &mut Node, fp: Fingerprint, fresh: &mut u32, index: usize) -> u32 {
    match node {
        Node::Leaf(bucket) => *bucket,
        Node::Branch(children) => {
            let next = children.entry(fp[index]).or_insert_with(|| {
                if index + 1 == FINGERPRINT_SIZE {
                    let bucket = *fresh;
                    *fresh += 1;
                    Node::Leaf(bucket)
                } else {
                    Node::Branch(FxHashMap::default())
                }
            });
            make_bucket_from(next, fp, fresh, index + 1)
        }
    }
}

fn get_unifications(node: &Node, results: &mut Vec<u32>, fp: Fingerprint, index: usize) {
    let children = match node {
        Node::Leaf(bucket) => {
            results.push(*bucket);
            return;
        }
        Node::Branch(children) => children,
    };
    match fp[index] {
        // A nonexistent position only coexists with "below variable" or
        // another nonexistent position.
        N => {
            descend(children, B, results, fp, index);
            descend(children, N, results, fp, index);
        }
        // Below a variable anything at all may appear.
        B => {
            for (_, next) in sorted_children(children) {
                get_unifications(next, results, fp, index + 1);
            }
        }
        // A variable unifies with anything that exists.
        A => {
            for (key, next) in sorted_children(children) {
                if *key != N {
                    get_unifications(next, results, fp, index + 1);
                }
            }
        }
        value => {
            debug_assert!(value >= 0);
            descend(children, value, results, fp, index);
            descend(children, A, results, fp, index);
            descend(children, B, results, fp, index);
        }
    }
}

fn descend(
    children: &FxHashMap<i64, Node>,
    key: i64,
    results: &mut Vec<u32>,
    fp: Fingerprint,
    index: usize,
) {
    if let Some(next) = children.get(&key) {
        get_unifications(next, results, fp, index + 1);
    }
}

/// Children in key order; hash-map iteration order would still be
/// deterministic for a fixed insertion sequence, but sorting keeps the
/// retrieval order independent of it.
fn sorted_children(children: &FxHashMap<i64, Node>) -> impl Iterator<Item = (&i64, &Node)> {
    let mut v: Vec<_> = children.iter().collect();
    v.sort_by_key(|(k, _)| **k);
    v.into_iter()
}

/// A term index built on fingerprint buckets: entries live in per-bucket
/// sets, retrieval filters bucket candidates through real unification.
pub struct TermFingerprintIndex {
    index: FingerprintIndex,
    buckets: Vec<FxHashSet<Entry>>,
}

impl Default for TermFingerprintIndex {
    fn default() -> Self {
        TermFingerprintIndex::new()
    }
}

impl TermFingerprintIndex {
    pub fn new() -> TermFingerprintIndex {
        TermFingerprintIndex {
            index: FingerprintIndex::new(),
            buckets: vec![],
        }
    }

    pub fn insert(&mut self, store: &TermStore, term: TermId, literal: LiteralId, clause: ClauseId) {
        debug!(?term, ?clause, "fingerprint insert");
        let bucket = self.index.make_bucket(fingerprint(store, term));
        if self.buckets.len() <= bucket as usize {
            self.buckets.resize_with(bucket as usize + 1, FxHashSet::default);
        }
        self.buckets[bucket as usize].insert(Entry {
            clause,
            literal,
            term,
        });
    }

    pub fn remove(&mut self, store: &TermStore, term: TermId, literal: LiteralId, clause: ClauseId) {
        let bucket = self.index.make_bucket(fingerprint(store, term));
        if let Some(set) = self.buckets.get_mut(bucket as usize) {
            set.remove(&Entry {
                clause,
                literal,
                term,
            });
        }
    }

    /// Unification candidates for `query`, lazily filtered: each yielded
    /// entry comes with the unifier in the iterator's substitution
    /// (query bank 0, result bank 1).
    pub fn unifications(&self, store: &TermStore, query: TermId) -> FingerprintUnifications<'_> {
        let mut buckets = self.index.unification_buckets(fingerprint(store, query));
        // Stack order: pop from the back.
        buckets.reverse();
        FingerprintUnifications {
            index: self,
            query,
            buckets,
            pending: vec![],
            subst: RobSubstitution::new(),
        }
    }
}

/// Lazy candidate iterator; resumed by [`next`](Self::next), the unifier of
/// the last yielded entry is available through
/// [`unifier`](Self::unifier) until the next resume.
pub struct FingerprintUnifications<'i> {
    index: &'i TermFingerprintIndex,
    query: TermId,
    buckets: Vec<u32>,
    pending: Vec<Entry>,
    subst: RobSubstitution,
}

impl<'i> FingerprintUnifications<'i> {
    pub fn next(&mut self, store: &TermStore) -> Option<Entry> {
        loop {
            if let Some(entry) = self.pending.pop() {
                self.subst.reset();
                if self
                    .subst
                    .unify_ids(store, self.query, Bank::QUERY, entry.term, Bank::RESULT)
                {
                    return Some(entry);
                }
                continue;
            }
            let bucket = self.buckets.pop()?;
            if let Some(set) = self.index.buckets.get(bucket as usize) {
                let mut entries: Vec<Entry> = set.iter().copied().collect();
                entries.sort_by_key(|e| (e.clause, e.literal, e.term));
                entries.reverse();
                self.pending = entries;
            }
        }
    }

    pub fn unifier(&mut self) -> ResultSubstitution<'_> {
        ResultSubstitution::new(&mut self.subst, Bank::QUERY, Bank::RESULT)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use saturn_ir::{Signature, Sort};

    fn setup() -> (Signature, TermStore) {
        (Signature::new(), TermStore::new())
    }

    fn dummy_entry_ids() -> (ClauseId, LiteralId) {
        (ClauseId { index: 0 }, LiteralId { index: 0 })
    }

    #[test]
    fn fingerprint_of_variants_coincides() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let x = store.var(3);
        let y = store.var(8);
        let t1 = store.app(&sig, f, vec![x, y]);
        let u = store.var(0);
        let v = store.var(1);
        let t2 = store.app(&sig, f, vec![u, v]);
        assert_eq!(fingerprint(&store, t1), fingerprint(&store, t2));
    }

    #[test]
    fn variable_query_reaches_everything_that_exists() {
        let (mut sig, mut store) = setup();
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let fa = store.app(&sig, f, vec![ca]);
        let mut index = FingerprintIndex::new();
        let b1 = index.make_bucket(fingerprint(&store, ca));
        let b2 = index.make_bucket(fingerprint(&store, fa));
        let x = store.var(0);
        let buckets = index.unification_buckets(fingerprint(&store, x));
        assert!(buckets.contains(&b1));
        assert!(buckets.contains(&b2));
    }

    #[test]
    fn incompatible_roots_share_no_bucket() {
        let (mut sig, mut store) = setup();
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let b = sig.add_constant("b", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let cb = store.constant(&sig, b);
        let mut index = FingerprintIndex::new();
        let bucket_a = index.make_bucket(fingerprint(&store, ca));
        let buckets = index.unification_buckets(fingerprint(&store, cb));
        assert!(!buckets.contains(&bucket_a));
    }

    #[test]
    fn no_false_negatives_for_nested_queries() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let g = sig.add_function("g", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let x = store.var(0);
        // Stored: f(x). Query: f(g(x)). These unify, so the bucket of
        // f(x) must be retrieved.
        let fx = store.app(&sig, f, vec![x]);
        let gx = store.app(&sig, g, vec![x]);
        let fgx = store.app(&sig, f, vec![gx]);
        let mut index = FingerprintIndex::new();
        let stored = index.make_bucket(fingerprint(&store, fx));
        let buckets = index.unification_buckets(fingerprint(&store, fgx));
        assert!(buckets.contains(&stored));
    }

    #[test]
    fn retrieval_filters_through_unification() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let b = sig.add_constant("b", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let cb = store.constant(&sig, b);
        let x = store.var(0);
        // Stored: f(a, a) and f(a, b); query f(x, a) unifies only with
        // the first.
        let faa = store.app(&sig, f, vec![ca, ca]);
        let fab = store.app(&sig, f, vec![ca, cb]);
        let query = store.app(&sig, f, vec![x, ca]);
        let (cls, lit) = dummy_entry_ids();
        let mut index = TermFingerprintIndex::new();
        index.insert(&store, faa, lit, cls);
        index.insert(&store, fab, lit, cls);
        let mut it = index.unifications(&store, query);
        let mut found = vec![];
        while let Some(entry) = it.next(&store) {
            found.push(entry.term);
        }
        assert_eq!(found, vec![faa]);
    }

    #[test]
    fn removal_is_effective() {
        let (mut sig, mut store) = setup();
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let (cls, lit) = dummy_entry_ids();
        let mut index = TermFingerprintIndex::new();
        index.insert(&store, ca, lit, cls);
        index.remove(&store, ca, lit, cls);
        let mut it = index.unifications(&store, ca);
        assert!(it.next(&store).is_none());
    }
}
